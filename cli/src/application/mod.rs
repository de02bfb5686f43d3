//! Application layer: port trait definitions, the step pipeline and
//! use-case orchestration.
//!
//! This module depends only on `crate::domain`, never on `crate::infra`,
//! `crate::commands`, or `crate::output`.

pub mod pipeline;
pub mod ports;
pub mod services;

pub use pipeline::{Pipeline, StepHandle, StepOutputs, StepStatus};
pub use ports::{
    BindProbe, CommandRunner, CredentialStore, HostBackend, MemoryProbe, ProgressReporter,
    StepProgress,
};
