//! YAML deploy configuration on disk.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::domain::config::DeployConfig;
use crate::infra::fs::write_file;

/// File the effective configuration of the last deploy is saved to.
pub const EFFECTIVE_CONFIG_FILE: &str = "deploy.yaml";

/// Load a deploy configuration. `None` yields the defaults.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load(path: Option<&Path>) -> Result<DeployConfig> {
    let Some(path) = path else {
        return Ok(DeployConfig::default());
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    serde_yaml::from_str(&content).with_context(|| format!("cannot parse {}", path.display()))
}

/// Where [`save_effective`] writes for `cfg`.
#[must_use]
pub fn effective_path(cfg: &DeployConfig) -> PathBuf {
    cfg.base_dir.join(EFFECTIVE_CONFIG_FILE)
}

/// Save the configuration a deploy actually ran with, so a later run can
/// reuse it with `--config`. Secrets are never serialized.
///
/// # Errors
///
/// Returns an error if serialization or the write fails.
pub fn save_effective(cfg: &DeployConfig) -> Result<PathBuf> {
    let path = effective_path(cfg);
    let content = serde_yaml::to_string(cfg).context("cannot serialize config")?;
    write_file(&path, &content, 0o600)?;
    Ok(path)
}
