//! ShipFlow deploy providers
//!
//! This crate defines the provider capability the step executor drives
//! (build, tag, push, deploy, rollback) and a provider that shells out to a
//! container engine and a managed-compute CLI.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  ShipFlow CLI                    │
//! │                  (ship deploy)                   │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │               shipflow-runner                    │
//! │   batches → build → tag → push → deploy         │
//! └─────────────────┬───────────────────────────────┘
//!                   │  trait DeployProvider
//! ┌─────────────────▼───────────────────────────────┐
//! │              shipflow-provider                   │
//! │  ┌──────────────┐  ┌──────────────────────┐     │
//! │  │ StepError    │  │ CommandProvider      │     │
//! │  │ RetryConfig  │  │ (docker + gcloud)    │     │
//! │  └──────────────┘  └──────────────────────┘     │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod command;
pub mod error;
pub mod provider;
pub mod retry;

// Re-exports
pub use command::{CommandConfig, CommandProvider, PriorRevision};
pub use error::{FailureKind, Result, Step, StepError, classify_failure};
pub use provider::{DeployProvider, ImageId};
pub use retry::RetryConfig;
