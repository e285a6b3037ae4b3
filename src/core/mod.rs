//! Core infrastructure module
//!
//! This module provides the ambient layer shared by every component:
//! - Error handling and type system
//! - Configuration management
//! - Structured logging system
//! - Filesystem and string helpers

pub mod config;
pub mod error;
pub mod logging;
pub mod utils;

pub use config::{CliArgs, Config};
pub use error::{AddonError, AggregateInstallError, ErrorContext, InstallError, Result};
pub use logging::Logger;
