//! # Bloom
//!
//! Provisions a single host into a Kubernetes node by running an ordered list
//! of steps, while a local web page shows live progress.
//!
//! ## Usage
//!
//! ```bash
//! bloom [--config bloom.yaml] [--one-shot]   # wizard + dashboard
//! bloom cli --config bloom.yaml              # terminal only
//! bloom status                               # summarize bloom.log
//! ```
//!
//! ## Modules
//!
//! - `step` - Step descriptors, the action trait, the enabled-step filter and the demo catalog
//! - `monitor` - Live run state (statuses, logs, variables) and the log file tailer
//! - `orchestrator` - Sequential, fail-fast execution of the enabled steps
//! - `controller` - Phase state machine and the HTTP API
//! - `config` - Configuration snapshots, validation and application settings
//! - `status` - Run status reconstructed from an existing log
//! - `logging` - Tracing setup and the re-openable run log
//! - `cli` - Command implementations used by the binary
pub mod cli;
pub mod config;
pub mod controller;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod orchestrator;
pub mod status;
pub mod step;

pub use error::{BloomError, ErrorCategory, Result};
