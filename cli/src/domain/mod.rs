//! Domain layer: pure business logic, types, and validation.
//!
//! This module has zero imports from `crate::infra`, `crate::commands`,
//! `crate::application`, `tokio`, `std::fs`, `std::process`, or `std::net`.
//! All functions are synchronous and take data in, returning data out.

pub mod config;
pub mod error;
pub mod model;
pub mod network;
pub mod render;
pub mod token;
pub mod tuning;

pub use config::{AuthMode, BackendKind, DeployConfig, NetworkConfig, Tuning};
pub use error::{ConfigError, DeployError, TokenError};
pub use model::{ModelAliases, ModelSpec, ResolvedModel};
pub use token::TokenRecord;
