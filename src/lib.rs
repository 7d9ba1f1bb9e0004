//! # Toolrun
//!
//! Runs untrusted, user-submitted tool bundles in short-lived,
//! resource-constrained containers while streaming status, logs and
//! resource usage to observers.
//!
//! ## Features
//!
//! - **Security scan:** every bundle is scanned before it runs; findings are
//!   advisory unless a blocking scan policy is configured
//! - **Resource policy:** memory, CPU, process, file and network limits with
//!   configured ceilings on caller overrides
//! - **Container isolation:** one locked-down container per session via
//!   Docker (bollard), or an in-memory engine for tests
//! - **Live monitoring:** sustained CPU or memory abuse ends the session
//! - **Event channel:** status, log and stats events per session over
//!   WebSocket

pub mod config;
pub mod error;
pub mod gateway;
pub mod monitor;
pub mod orchestrator;
pub mod sandbox;
pub mod security;
pub mod session;

pub use config::Config;
pub use error::{Error, ProvisioningError, Result};
pub use orchestrator::{Metrics, Orchestrator};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const NAME: &str = env!("CARGO_PKG_NAME");
