//! # Strongroom
//!
//! Pluggable secrets management for a multi-model controller. Secret metadata
//! is kept in a transactional document store; revision content is kept by a
//! per-model backend, either in-process alongside the metadata or in an
//! external HashiCorp Vault.
//!
//! ## Architecture
//!
//! ```text
//! SecretsService → MetadataStore → DocumentStore (memory | SQLite)
//!       ↓
//! ProviderRegistry → SecretBackendProvider → ContentStore (internal | vault)
//! ```
//!
//! ## Core Components
//!
//! - **Secrets Service**: per-model create/read/update/delete and access grants
//! - **Providers**: backend lifecycle and credentials scoped to what an agent
//!   owns and consumes
//! - **Persistence Layer**: SQLx with SQLite for the metadata catalog
//! - **Observability**: `tracing` spans and Prometheus metrics

pub mod cli;
pub mod config;
pub mod errors;
pub mod observability;
pub mod secrets;
pub mod storage;

// Re-export commonly used types and traits
pub use config::AppConfig;
pub use errors::{Result, StrongroomError};
pub use observability::init_tracing;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
