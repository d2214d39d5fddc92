//! Connection settings for the managed deployment.
//!
//! The server always listens on the same port and always hosts the same
//! database; only the credentials and the host vary between customer sites,
//! and those come from the environment (optionally seeded from a `.env` file
//! next to the binary).

use serde::Serialize;
use thiserror::Error;

use crate::AppError;

/// Port the bundled MongoDB instance listens on in every deployment.
pub const DEFAULT_PORT: u16 = 12220;
/// Name of the database the suite stores its data in.
pub const DATABASE_NAME: &str = "DigisatServer";

pub const ENV_USER: &str = "DB_USER";
pub const ENV_PASS: &str = "DB_PASS";
pub const ENV_HOST: &str = "DB_HOST";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("environment variable {0} is not set")]
    MissingVar(&'static str),
}

impl From<SettingsError> for AppError {
    fn from(error: SettingsError) -> Self {
        let SettingsError::MissingVar(name) = &error;
        AppError::new("CONFIG/MISSING_CREDENTIALS", error.to_string())
            .with_context("variable", *name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DbSettings {
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub host: String,
    pub port: u16,
}

impl DbSettings {
    /// Read credentials from the process environment, loading a local `.env`
    /// file first when one exists. Construction fails immediately when any of
    /// the three credentials is missing; this is the only startup failure the
    /// console does not soften into a log line.
    pub fn from_env() -> Result<Self, SettingsError> {
        dotenvy::dotenv().ok();
        Ok(DbSettings {
            user: require(ENV_USER)?,
            password: require(ENV_PASS)?,
            host: require(ENV_HOST)?,
            port: DEFAULT_PORT,
        })
    }
}

fn require(name: &'static str) -> Result<String, SettingsError> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or(SettingsError::MissingVar(name))
}
