//! Command implementations

pub mod deploy;
pub mod tokens;
pub mod tune;
pub mod version;
