//! Windows implementation of [`PlatformOps`], shelling out to the standard
//! administration commands (`tasklist`, `taskkill`, `sc`, `net`, `regedit`).
//! File-system steps use std directly.

use std::path::Path;
use std::process::{Command, Output};

use crate::platform::{PlatformOps, ServiceStatus};
use crate::{AppError, AppResult};

pub const COMMAND_FAILED_CODE: &str = "PLATFORM/COMMAND_FAILED";
pub const COMMAND_SPAWN_CODE: &str = "PLATFORM/COMMAND_SPAWN";

#[derive(Debug, Default)]
pub struct ShellPlatform;

impl ShellPlatform {
    pub fn new() -> Self {
        ShellPlatform
    }

    fn run(&self, program: &str, args: &[&str]) -> AppResult<Output> {
        let output = Command::new(program).args(args).output().map_err(|err| {
            AppError::new(COMMAND_SPAWN_CODE, format!("could not run {program}: {err}"))
                .with_context("program", program)
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let detail = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(AppError::new(
                COMMAND_FAILED_CODE,
                format!("{program} {} failed", args.join(" ")),
            )
            .with_context("exit", output.status.to_string())
            .with_context("output", detail));
        }
        Ok(output)
    }
}

/// Parse the state block of `sc query` output.
pub(crate) fn parse_service_status(output: &str) -> ServiceStatus {
    if output.contains("RUNNING") {
        ServiceStatus::Running
    } else if output.contains("STOPPED") {
        ServiceStatus::Stopped
    } else if output.contains("PAUSED") {
        ServiceStatus::Paused
    } else {
        ServiceStatus::Unknown
    }
}

impl PlatformOps for ShellPlatform {
    fn process_running(&self, name: &str) -> AppResult<bool> {
        let image = format!("{name}.exe");
        let filter = format!("IMAGENAME eq {image}");
        let output = self.run("tasklist", &["/FI", &filter])?;
        Ok(String::from_utf8_lossy(&output.stdout).contains(name))
    }

    fn kill_process(&self, name: &str) -> AppResult<()> {
        let image = format!("{name}.exe");
        self.run("taskkill", &["/F", "/IM", &image])?;
        Ok(())
    }

    fn service_status(&self, name: &str) -> AppResult<ServiceStatus> {
        match self.run("sc", &["query", name]) {
            Ok(output) => Ok(parse_service_status(&String::from_utf8_lossy(
                &output.stdout,
            ))),
            // `sc query` exits non-zero for unknown services.
            Err(_) => Ok(ServiceStatus::NotFound),
        }
    }

    fn stop_service(&self, name: &str) -> AppResult<()> {
        self.run("net", &["stop", name])?;
        Ok(())
    }

    fn start_service(&self, name: &str) -> AppResult<()> {
        self.run("net", &["start", name])?;
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> AppResult<()> {
        std::fs::remove_file(path)?;
        Ok(())
    }

    fn remove_dir_all(&self, path: &Path) -> AppResult<()> {
        std::fs::remove_dir_all(path)?;
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> AppResult<()> {
        std::fs::create_dir_all(path)?;
        Ok(())
    }

    fn import_registry_file(&self, path: &Path) -> AppResult<()> {
        let path = path.to_string_lossy();
        self.run("regedit", &["/s", path.as_ref()])?;
        Ok(())
    }

    fn is_elevated(&self) -> bool {
        // `net session` only succeeds in an elevated shell.
        self.run("net", &["session"]).is_ok()
    }
}
