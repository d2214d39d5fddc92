//! Library surface of the `digimaint` maintenance console.
//!
//! The binary in `main.rs` is a thin clap front end; everything it does goes
//! through the modules below so the operations can be exercised from tests
//! without a terminal, a Windows host, or (for most of them) a live server.

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod ops;
pub mod platform;
pub mod state;

pub use error::{AppError, AppResult};
