//! Startup connectivity check.
//!
//! Every database-backed command runs this once before doing anything else.
//! An empty database usually means the operator forgot to restore a customer
//! base first, so that state gets its own status instead of being folded into
//! "connected".

use chrono::{SecondsFormat, Utc};
use mongodb::bson::doc;
use once_cell::sync::OnceCell;
use serde::Serialize;

use crate::config::DATABASE_NAME;
use crate::db::{collections, Connection};
use crate::AppResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupStatus {
    Ok,
    EmptyDatabase,
    Unreachable,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartupReport {
    pub status: StartupStatus,
    pub message: String,
    pub database: String,
    pub generated_at: String,
}

impl StartupReport {
    fn new(status: StartupStatus, message: impl Into<String>) -> Self {
        StartupReport {
            status,
            message: message.into(),
            database: DATABASE_NAME.to_string(),
            generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// Caches the emptiness probe for the lifetime of the process so repeated
/// checks within one invocation do not re-count the collection.
#[derive(Default)]
pub struct Validator {
    empty: OnceCell<bool>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn startup_report(&self, conn: &Connection) -> StartupReport {
        if let Err(err) = conn.ping().await {
            tracing::warn!(code = err.code(), "database ping failed");
            return StartupReport::new(
                StartupStatus::Unreachable,
                "Could not reach the database. Check the credentials and whether a base was restored.",
            );
        }

        match self.is_empty(conn).await {
            Ok(true) => StartupReport::new(
                StartupStatus::EmptyDatabase,
                "The database is empty. Start the server once to populate it, or restore a base.",
            ),
            Ok(false) => StartupReport::new(
                StartupStatus::Ok,
                "Database connection established.",
            ),
            Err(err) => {
                tracing::warn!(code = err.code(), "emptiness probe failed");
                StartupReport::new(StartupStatus::Unreachable, err.message().to_string())
            }
        }
    }

    /// A deployment with no stock records has never been written to by the
    /// server, which is the signal operators use to spot a missing restore.
    pub async fn is_empty(&self, conn: &Connection) -> AppResult<bool> {
        if let Some(cached) = self.empty.get() {
            return Ok(*cached);
        }
        let count = conn
            .collection(collections::ESTOQUES)
            .count_documents(doc! {})
            .await?;
        let empty = count == 0;
        let _ = self.empty.set(empty);
        Ok(empty)
    }
}
