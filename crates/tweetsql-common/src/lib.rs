//! tweetsql common library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging and error handling for the tweetsql workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`CommonError`] and its result alias
//! - **Logging**: `tracing` subscriber setup and the [`WarningSink`] side channel
//! - **Types**: [`Row`] and [`Cell`], the storage-ready record shape
//!
//! # Example
//!
//! ```no_run
//! use tweetsql_common::logging::{init_logging, LogConfig, WarningSink};
//!
//! fn main() -> anyhow::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     let warnings = WarningSink::stderr();
//!     warnings.warn("Connection lost, reconnecting immediately.");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{CommonError, Result};
pub use logging::WarningSink;
pub use types::{Cell, Row};
