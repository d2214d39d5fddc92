//! Shared fixtures for the integration tests: a reporter that records every
//! progress line and a [`PlatformOps`] fake that logs what the environment
//! sequences ask the host to do.

// Each test binary pulls in this module; not every binary uses every fixture.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use digimaint::ops::{OpEvent, OpReporter};
use digimaint::platform::{PlatformOps, ServiceStatus};
use digimaint::{AppError, AppResult};

pub fn recording_reporter() -> (OpReporter, Arc<Mutex<Vec<OpEvent>>>) {
    let events: Arc<Mutex<Vec<OpEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let reporter: OpReporter = Arc::new(move |event| {
        sink.lock().expect("reporter sink").push(event);
    });
    (reporter, events)
}

/// Flattens recorded events to their text, prefixing warnings so ordering
/// assertions can tell them apart.
pub fn event_lines(events: &Arc<Mutex<Vec<OpEvent>>>) -> Vec<String> {
    events
        .lock()
        .expect("reporter sink")
        .iter()
        .map(|event| match event {
            OpEvent::Progress(line) => line.clone(),
            OpEvent::Warning(line) => format!("warning: {line}"),
        })
        .collect()
}

/// In-memory host. Every call is appended to `calls` as a single line
/// (`"kill ServidorG6"`, `"stop MongoDBDigisat"`, ...); calls whose line
/// contains a configured failure substring return an error instead of
/// succeeding.
pub struct FakePlatform {
    calls: Mutex<Vec<String>>,
    fail_on: Vec<String>,
    processes: Vec<String>,
    services: HashMap<String, ServiceStatus>,
    elevated: bool,
}

impl FakePlatform {
    pub fn new() -> Self {
        FakePlatform {
            calls: Mutex::new(Vec::new()),
            fail_on: Vec::new(),
            processes: Vec::new(),
            services: HashMap::new(),
            elevated: true,
        }
    }

    pub fn fail_on(mut self, fragment: &str) -> Self {
        self.fail_on.push(fragment.to_string());
        self
    }

    pub fn with_process(mut self, name: &str) -> Self {
        self.processes.push(name.to_string());
        self
    }

    pub fn with_service(mut self, name: &str, status: ServiceStatus) -> Self {
        self.services.insert(name.to_string(), status);
        self
    }

    pub fn not_elevated(mut self) -> Self {
        self.elevated = false;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("call log").clone()
    }

    fn record(&self, line: String) -> AppResult<()> {
        let fails = self.fail_on.iter().any(|fragment| line.contains(fragment));
        self.calls.lock().expect("call log").push(line.clone());
        if fails {
            return Err(AppError::new("PLATFORM/TEST", format!("forced failure: {line}")));
        }
        Ok(())
    }
}

impl PlatformOps for FakePlatform {
    fn process_running(&self, name: &str) -> AppResult<bool> {
        self.record(format!("probe-process {name}"))?;
        Ok(self.processes.iter().any(|p| p == name))
    }

    fn kill_process(&self, name: &str) -> AppResult<()> {
        self.record(format!("kill {name}"))
    }

    fn service_status(&self, name: &str) -> AppResult<ServiceStatus> {
        self.record(format!("query-service {name}"))?;
        Ok(self
            .services
            .get(name)
            .copied()
            .unwrap_or(ServiceStatus::NotFound))
    }

    fn stop_service(&self, name: &str) -> AppResult<()> {
        self.record(format!("stop {name}"))
    }

    fn start_service(&self, name: &str) -> AppResult<()> {
        self.record(format!("start {name}"))
    }

    fn remove_file(&self, path: &Path) -> AppResult<()> {
        self.record(format!("remove-file {}", path.display()))
    }

    fn remove_dir_all(&self, path: &Path) -> AppResult<()> {
        self.record(format!("remove-dir {}", path.display()))
    }

    fn create_dir_all(&self, path: &Path) -> AppResult<()> {
        self.record(format!("create-dir {}", path.display()))
    }

    fn import_registry_file(&self, path: &Path) -> AppResult<()> {
        self.record(format!("import-reg {}", path.display()))
    }

    fn is_elevated(&self) -> bool {
        self.elevated
    }
}
