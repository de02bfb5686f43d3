//! Infrastructure layer: concrete implementations of application port traits.
//!
//! This module contains all I/O-performing code: process execution, filesystem
//! access, the token store, Hugging Face downloads and HTTP validation.
//!
//! Imports from `crate::domain` and `crate::application::ports` are allowed.
//! `crate::output::progress` is used for the download bar only.

pub mod command_runner;
pub mod config;
pub mod fs;
pub mod host;
pub mod models;
pub mod system;
pub mod token_store;
pub mod validate;
