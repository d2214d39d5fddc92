//! Run state, cooperative cancellation, and operation gating.
//!
//! Cancellation is advisory: operations poll [`OperationState::should_stop`]
//! between discrete steps (between collections, between update statements) and
//! stop issuing further calls. An in-flight driver call is never interrupted
//! and writes that already landed stay in place.
//!
//! The [`Dispatcher`] enforces single-flight per operation kind and bounds
//! how many operations may run at once, so a repeated command cannot race a
//! still-running copy of itself.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::{AppError, AppResult};

/// Stable error code returned when an operation kind is already in flight.
pub const OP_ALREADY_RUNNING_CODE: &str = "OPS/ALREADY_RUNNING";
/// Stable error code used when the dispatcher has shut down.
pub const OP_DISPATCHER_CLOSED_CODE: &str = "OPS/DISPATCHER_CLOSED";
/// Exit status the CLI uses when an operation was blocked or cancelled.
pub const OP_BLOCKED_EXIT_CODE: i32 = 2;

/// Every maintenance operation the console can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Status,
    InactivateProducts,
    RetributeNcm,
    ListTributations,
    EnableMei,
    ScrubMovements,
    FindIdentifier,
    ZeroStock,
    ZeroNegativeStock,
    ZeroPrices,
    CleanBase,
    PurgeMovements,
    BackupDatabase,
    RestoreDatabase,
    ResetEnvironment,
    CleanRegistry,
    Services,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Status => "status",
            OperationKind::InactivateProducts => "inactivate_products",
            OperationKind::RetributeNcm => "retribute_ncm",
            OperationKind::ListTributations => "list_tributations",
            OperationKind::EnableMei => "enable_mei",
            OperationKind::ScrubMovements => "scrub_movements",
            OperationKind::FindIdentifier => "find_identifier",
            OperationKind::ZeroStock => "zero_stock",
            OperationKind::ZeroNegativeStock => "zero_negative_stock",
            OperationKind::ZeroPrices => "zero_prices",
            OperationKind::CleanBase => "clean_base",
            OperationKind::PurgeMovements => "purge_movements",
            OperationKind::BackupDatabase => "backup_database",
            OperationKind::RestoreDatabase => "restore_database",
            OperationKind::ResetEnvironment => "reset_environment",
            OperationKind::CleanRegistry => "clean_registry",
            OperationKind::Services => "services",
        }
    }
}

/// Shared run/cancel state, owned by the caller and passed into operations
/// through their context rather than read from process-wide globals.
pub struct OperationState {
    running: AtomicBool,
    token: Mutex<CancellationToken>,
}

impl Default for OperationState {
    fn default() -> Self {
        OperationState {
            running: AtomicBool::new(true),
            token: Mutex::new(CancellationToken::new()),
        }
    }
}

impl OperationState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Polled between steps; true once [`cancel_all`](Self::cancel_all) fired.
    pub fn should_stop(&self) -> bool {
        !self.is_running() || self.current_token().is_cancelled()
    }

    pub fn cancel_all(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.current_token().cancel();
    }

    /// Re-arm after a cancellation so the next operation starts clean.
    pub fn reset(&self) {
        let mut guard = self.token.lock().unwrap_or_else(|e| e.into_inner());
        *guard = CancellationToken::new();
        self.running.store(true, Ordering::SeqCst);
    }

    /// Token for code that wants to `select!` on cancellation.
    pub fn token(&self) -> CancellationToken {
        self.current_token()
    }

    fn current_token(&self) -> CancellationToken {
        self.token
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Single-flight and bounded-concurrency gate for operations.
#[derive(Debug)]
pub struct Dispatcher {
    in_flight: Mutex<HashSet<OperationKind>>,
    limit: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(max_concurrent: usize) -> Arc<Self> {
        Arc::new(Dispatcher {
            in_flight: Mutex::new(HashSet::new()),
            limit: Arc::new(Semaphore::new(max_concurrent.max(1))),
        })
    }

    /// Claim the right to run `kind`. Fails immediately when the same kind is
    /// already in flight; otherwise waits for a concurrency permit. The claim
    /// is released when the returned permit drops.
    pub async fn begin(self: &Arc<Self>, kind: OperationKind) -> AppResult<OpPermit> {
        {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            if !in_flight.insert(kind) {
                return Err(AppError::new(
                    OP_ALREADY_RUNNING_CODE,
                    format!("Operation '{}' is already running.", kind.as_str()),
                ));
            }
        }

        match self.limit.clone().acquire_owned().await {
            Ok(permit) => Ok(OpPermit {
                dispatcher: Arc::clone(self),
                kind,
                _permit: permit,
            }),
            Err(_) => {
                self.release(kind);
                Err(AppError::new(
                    OP_DISPATCHER_CLOSED_CODE,
                    "The operation dispatcher has shut down.",
                ))
            }
        }
    }

    fn release(&self, kind: OperationKind) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.remove(&kind);
    }
}

/// RAII claim on an operation kind; dropping it lets the kind run again.
#[must_use = "the operation claim is released as soon as the permit drops"]
#[derive(Debug)]
pub struct OpPermit {
    dispatcher: Arc<Dispatcher>,
    kind: OperationKind,
    _permit: OwnedSemaphorePermit,
}

impl OpPermit {
    pub fn kind(&self) -> OperationKind {
        self.kind
    }
}

impl Drop for OpPermit {
    fn drop(&mut self) {
        self.dispatcher.release(self.kind);
    }
}
