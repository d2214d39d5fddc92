//! Maintenance operations and their shared plumbing.
//!
//! Every operation takes an [`OpContext`] (cancellation state plus a progress
//! reporter) and whatever external handle it works against: the database for
//! the document operations, a [`crate::platform::PlatformOps`] for the
//! environment ones. Progress lines flow through the reporter so the CLI can
//! print them and tests can record them.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::state::{OperationKind, OperationState};

pub mod backup;
pub mod base;
pub mod environment;
pub mod movements;
pub mod products;
pub mod search;
pub mod stock;
pub mod tenants;

/// A visible line of operation output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpEvent {
    Progress(String),
    Warning(String),
}

pub type OpReporter = Arc<dyn Fn(OpEvent) + Send + Sync>;

/// How an operation run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpStatus {
    /// Ran to the end; individual steps may still have been reported failed.
    Completed,
    /// Stopped at a checkpoint after a cancellation; earlier writes stay.
    Cancelled,
    /// Completed, but at least one step failed and was skipped over.
    Partial,
}

impl OpStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpStatus::Completed => "completed",
            OpStatus::Cancelled => "cancelled",
            OpStatus::Partial => "partial",
        }
    }
}

/// Summary of one operation run, printable as text or `--json`.
#[derive(Debug, Clone, Serialize)]
pub struct OpOutcome {
    pub kind: OperationKind,
    pub status: OpStatus,
    /// Records that satisfied the operation's predicate.
    pub matched: u64,
    /// Records actually written (modified, deleted, or dropped).
    pub modified: u64,
    /// Steps whose error was reported and swallowed.
    pub failed_steps: u64,
    pub duration_ms: u64,
}

impl OpOutcome {
    fn new(kind: OperationKind) -> Self {
        OpOutcome {
            kind,
            status: OpStatus::Completed,
            matched: 0,
            modified: 0,
            failed_steps: 0,
            duration_ms: 0,
        }
    }

    fn finish(mut self, started: Instant) -> Self {
        self.duration_ms = started.elapsed().as_millis() as u64;
        if self.status == OpStatus::Completed && self.failed_steps > 0 {
            self.status = OpStatus::Partial;
        }
        self
    }
}

/// Cancellation state and progress reporting shared by all operations.
#[derive(Clone)]
pub struct OpContext {
    state: Arc<OperationState>,
    reporter: OpReporter,
}

impl OpContext {
    pub fn new(state: Arc<OperationState>, reporter: OpReporter) -> Self {
        OpContext { state, reporter }
    }

    pub fn state(&self) -> &OperationState {
        &self.state
    }

    pub fn should_stop(&self) -> bool {
        self.state.should_stop()
    }

    pub fn progress(&self, line: impl Into<String>) {
        (self.reporter)(OpEvent::Progress(line.into()));
    }

    pub fn warn(&self, line: impl Into<String>) {
        (self.reporter)(OpEvent::Warning(line.into()));
    }
}

/// Marks the outcome cancelled and emits the standard line.
fn note_cancelled(ctx: &OpContext, outcome: &mut OpOutcome) {
    outcome.status = OpStatus::Cancelled;
    ctx.progress("Operation cancelled; stopping before the next step.");
}
