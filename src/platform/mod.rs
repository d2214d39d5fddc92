//! Narrow interface over the operating-system actions the environment
//! operations need. Keeping it a trait lets the teardown sequences run
//! against a recording fake in tests instead of real process, service, and
//! registry manipulation.

use std::path::Path;

use serde::Serialize;

use crate::AppResult;

pub mod shell;

pub use shell::ShellPlatform;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Running,
    Stopped,
    Paused,
    NotFound,
    Unknown,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Running => "running",
            ServiceStatus::Stopped => "stopped",
            ServiceStatus::Paused => "paused",
            ServiceStatus::NotFound => "not found",
            ServiceStatus::Unknown => "unknown",
        }
    }
}

/// Everything the environment teardown is allowed to do to the host.
pub trait PlatformOps: Send + Sync {
    fn process_running(&self, name: &str) -> AppResult<bool>;
    fn kill_process(&self, name: &str) -> AppResult<()>;
    fn service_status(&self, name: &str) -> AppResult<ServiceStatus>;
    fn stop_service(&self, name: &str) -> AppResult<()>;
    fn start_service(&self, name: &str) -> AppResult<()>;
    fn remove_file(&self, path: &Path) -> AppResult<()>;
    fn remove_dir_all(&self, path: &Path) -> AppResult<()>;
    fn create_dir_all(&self, path: &Path) -> AppResult<()>;
    fn import_registry_file(&self, path: &Path) -> AppResult<()>;
    /// Whether the process has administrative rights. Advisory only: the
    /// steps themselves surface permission errors individually.
    fn is_elevated(&self) -> bool;
}
