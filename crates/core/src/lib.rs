//! Shared foundations for the node authentication workspace.
//!
//! This crate carries the ambient concerns used by every other member:
//! configuration loading, the core error type and logging initialisation.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{Config, ElementConfig, LoggingConfig, TrustConfig};
pub use error::{Error, Result};
