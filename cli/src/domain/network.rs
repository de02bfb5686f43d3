//! Bind-port selection.

use std::collections::BTreeSet;

use crate::domain::error::DeployError;

/// First port at or above `preferred` that is not in `avoid` and that
/// `is_free` accepts.
///
/// Port 0 is never returned; a `preferred` of 0 starts the scan at 1.
///
/// # Errors
///
/// Returns `DeployError::NoFreePort` when the scan runs past 65535.
pub fn pick_free_bind_port(
    host: &str,
    preferred: u16,
    avoid: &BTreeSet<u16>,
    mut is_free: impl FnMut(&str, u16) -> bool,
) -> Result<u16, DeployError> {
    (preferred.max(1)..=u16::MAX)
        .filter(|port| !avoid.contains(port))
        .find(|&port| is_free(host, port))
        .ok_or_else(|| DeployError::NoFreePort {
            host: host.to_string(),
            preferred,
        })
}
