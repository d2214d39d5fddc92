//! Environment teardown: stopping the suite, wiping its data directory, and
//! purging its Windows registry footprint. Every step is independently
//! logged; a failing step is reported and the sequence keeps going, because
//! half a teardown that stops on the first missing file helps nobody restore
//! a base.

use std::path::PathBuf;
use std::time::Instant;

use serde::Serialize;

use crate::ops::{note_cancelled, OpContext, OpOutcome, OpStatus};
use crate::platform::{PlatformOps, ServiceStatus};
use crate::state::OperationKind;

/// Services installed by the suite, in the order they are stopped.
pub const SUITE_SERVICES: &[&str] = &[
    "DigiMonitor",
    "DigiServer",
    "DigiBackup",
    "DigisatService",
    "DigisatServer",
    "DigisatMobile",
    "DigisatSync",
];

/// What a full environment reset touches. A value type so tests can point the
/// sequence at a scratch directory.
#[derive(Debug, Clone)]
pub struct ResetTargets {
    pub server_process: String,
    pub services: Vec<String>,
    pub config_files: Vec<PathBuf>,
    pub data_dir: PathBuf,
}

impl Default for ResetTargets {
    fn default() -> Self {
        ResetTargets {
            server_process: "ServidorG6".to_string(),
            services: vec!["MongoDBDigisat".to_string(), "SincronizadorDigisat".to_string()],
            config_files: vec![
                PathBuf::from(r"C:\DigiSat\SuiteG6\Servidor\ConfiguracaoServer.xml"),
                PathBuf::from(r"C:\DigiSat\SuiteG6\Sistema\ConfiguracaoClient.xml"),
            ],
            data_dir: PathBuf::from(r"C:\DigiSat\SuiteG6\Dados"),
        }
    }
}

/// What the registry clean touches.
#[derive(Debug, Clone)]
pub struct RegistryTargets {
    pub server_process: String,
    pub services: Vec<String>,
    pub reg_file: PathBuf,
}

impl Default for RegistryTargets {
    fn default() -> Self {
        RegistryTargets {
            server_process: "ServidorG6".to_string(),
            services: vec!["MongoDBDigisat".to_string(), "SincronizadorDigisat".to_string()],
            reg_file: PathBuf::from("regs_windows").join("reg_digisat.reg"),
        }
    }
}

/// Tear the environment down so another base can be restored: kill the
/// server, stop its services, delete the config files, recreate the data
/// directory.
pub fn reset_environment(
    ctx: &OpContext,
    platform: &dyn PlatformOps,
    targets: &ResetTargets,
) -> OpOutcome {
    let started = Instant::now();
    let mut outcome = OpOutcome::new(OperationKind::ResetEnvironment);

    ctx.progress("Starting environment reset...");
    if check_cancel(ctx, &mut outcome) {
        return outcome.finish(started);
    }

    run_step(ctx, &mut outcome, "kill server process", || {
        platform.kill_process(&targets.server_process)
    });

    for service in &targets.services {
        if check_cancel(ctx, &mut outcome) {
            return outcome.finish(started);
        }
        run_step(ctx, &mut outcome, &format!("stop service {service}"), || {
            platform.stop_service(service)
        });
    }

    for file in &targets.config_files {
        if check_cancel(ctx, &mut outcome) {
            return outcome.finish(started);
        }
        run_step(
            ctx,
            &mut outcome,
            &format!("delete file {}", file.display()),
            || platform.remove_file(file),
        );
    }

    if check_cancel(ctx, &mut outcome) {
        return outcome.finish(started);
    }
    run_step(
        ctx,
        &mut outcome,
        &format!("remove directory {}", targets.data_dir.display()),
        || platform.remove_dir_all(&targets.data_dir),
    );
    run_step(
        ctx,
        &mut outcome,
        &format!("create directory {}", targets.data_dir.display()),
        || platform.create_dir_all(&targets.data_dir),
    );

    ctx.progress("Environment reset finished. Another base can be restored now.");
    outcome.finish(started)
}

/// Remove the suite's Windows registry footprint. The server process and the
/// services are only touched when actually present, then the cleanup `.reg`
/// file is imported.
pub fn clean_registry(
    ctx: &OpContext,
    platform: &dyn PlatformOps,
    targets: &RegistryTargets,
) -> OpOutcome {
    let started = Instant::now();
    let mut outcome = OpOutcome::new(OperationKind::CleanRegistry);

    if !platform.is_elevated() {
        ctx.warn("Not running elevated; registry and service steps may be denied.");
    }

    ctx.progress("Removing the suite from the Windows registry...");
    if check_cancel(ctx, &mut outcome) {
        return outcome.finish(started);
    }

    match platform.process_running(&targets.server_process) {
        Ok(true) => run_step(ctx, &mut outcome, "kill server process", || {
            platform.kill_process(&targets.server_process)
        }),
        Ok(false) => ctx.progress(format!(
            "Process '{}' not found.",
            targets.server_process
        )),
        Err(err) => {
            outcome.failed_steps += 1;
            ctx.warn(format!("Could not probe the server process: {err}"));
        }
    }

    for service in &targets.services {
        if check_cancel(ctx, &mut outcome) {
            return outcome.finish(started);
        }
        match platform.service_status(service) {
            Ok(ServiceStatus::Running) => {
                run_step(ctx, &mut outcome, &format!("stop service {service}"), || {
                    platform.stop_service(service)
                });
            }
            Ok(_) => ctx.progress(format!("Service '{service}' not running.")),
            Err(err) => {
                outcome.failed_steps += 1;
                ctx.warn(format!("Could not query service {service}: {err}"));
            }
        }
    }

    if check_cancel(ctx, &mut outcome) {
        return outcome.finish(started);
    }
    run_step(
        ctx,
        &mut outcome,
        &format!("import registry file {}", targets.reg_file.display()),
        || platform.import_registry_file(&targets.reg_file),
    );

    outcome.finish(started)
}

/// Stop every suite service that is currently running.
pub fn stop_services(ctx: &OpContext, platform: &dyn PlatformOps) -> OpOutcome {
    transition_services(ctx, platform, ServiceTransition::Stop)
}

/// Start every suite service that is currently stopped.
pub fn start_services(ctx: &OpContext, platform: &dyn PlatformOps) -> OpOutcome {
    transition_services(ctx, platform, ServiceTransition::Start)
}

enum ServiceTransition {
    Stop,
    Start,
}

fn transition_services(
    ctx: &OpContext,
    platform: &dyn PlatformOps,
    transition: ServiceTransition,
) -> OpOutcome {
    let started = Instant::now();
    let mut outcome = OpOutcome::new(OperationKind::Services);

    let verb = match transition {
        ServiceTransition::Stop => "Stopping",
        ServiceTransition::Start => "Starting",
    };
    ctx.progress(format!("{verb} suite services..."));

    for service in SUITE_SERVICES {
        if check_cancel(ctx, &mut outcome) {
            break;
        }

        let status = match platform.service_status(service) {
            Ok(status) => status,
            Err(err) => {
                outcome.failed_steps += 1;
                ctx.warn(format!("Could not query service {service}: {err}"));
                continue;
            }
        };

        match (&transition, status) {
            (_, ServiceStatus::NotFound) => continue,
            (ServiceTransition::Stop, ServiceStatus::Running) => {
                outcome.matched += 1;
                run_step(ctx, &mut outcome, &format!("stop service {service}"), || {
                    platform.stop_service(service)
                });
            }
            (ServiceTransition::Stop, _) => {
                ctx.progress(format!("{service} is already stopped."));
            }
            (ServiceTransition::Start, ServiceStatus::Running) => {
                ctx.progress(format!("{service} is already running."));
            }
            (ServiceTransition::Start, _) => {
                outcome.matched += 1;
                run_step(ctx, &mut outcome, &format!("start service {service}"), || {
                    platform.start_service(service)
                });
            }
        }
    }

    if outcome.status != OpStatus::Cancelled {
        ctx.progress(format!(
            "{} service(s) transitioned.",
            outcome.modified
        ));
    }
    outcome.finish(started)
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceEntry {
    pub name: String,
    pub status: ServiceStatus,
}

/// Current status of every suite service that is installed.
pub fn service_report(platform: &dyn PlatformOps) -> Vec<ServiceEntry> {
    SUITE_SERVICES
        .iter()
        .filter_map(|name| match platform.service_status(name) {
            Ok(ServiceStatus::NotFound) | Err(_) => None,
            Ok(status) => Some(ServiceEntry {
                name: (*name).to_string(),
                status,
            }),
        })
        .collect()
}

/// Run one teardown step: success and failure both become a visible line,
/// failure additionally counts against the outcome but never aborts.
fn run_step(
    ctx: &OpContext,
    outcome: &mut OpOutcome,
    label: &str,
    step: impl FnOnce() -> crate::AppResult<()>,
) {
    match step() {
        Ok(()) => {
            outcome.modified += 1;
            ctx.progress(format!("Step '{label}' completed."));
        }
        Err(err) => {
            outcome.failed_steps += 1;
            ctx.warn(format!("Step '{label}' failed: {err}"));
        }
    }
}

fn check_cancel(ctx: &OpContext, outcome: &mut OpOutcome) -> bool {
    if ctx.should_stop() && outcome.status != OpStatus::Cancelled {
        note_cancelled(ctx, outcome);
        return true;
    }
    outcome.status == OpStatus::Cancelled
}
