//! Host probes: physical memory and TCP bind availability.

use std::net::TcpListener;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};

use crate::application::ports::{BindProbe, MemoryProbe};

/// Reads `MemTotal` from `/proc/meminfo`.
pub struct ProcMemoryProbe {
    path: PathBuf,
}

impl Default for ProcMemoryProbe {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/proc/meminfo"),
        }
    }
}

impl ProcMemoryProbe {
    /// Probe reading an alternative meminfo file (used in tests).
    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }
}

/// Total memory in GiB from meminfo text.
///
/// # Errors
///
/// Returns an error if no well-formed `MemTotal` line is present.
pub fn parse_meminfo_gib(meminfo: &str) -> Result<f64> {
    let line = meminfo
        .lines()
        .find(|l| l.starts_with("MemTotal:"))
        .context("MemTotal not found in meminfo")?;
    let kib: u64 = line
        .split_whitespace()
        .nth(1)
        .context("MemTotal has no value")?
        .parse()
        .with_context(|| format!("invalid MemTotal line: {line}"))?;
    if kib == 0 {
        bail!("MemTotal is zero");
    }
    #[allow(clippy::cast_precision_loss)]
    Ok(kib as f64 / (1024.0 * 1024.0))
}

impl MemoryProbe for ProcMemoryProbe {
    fn total_memory_gib(&self) -> Result<f64> {
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        parse_meminfo_gib(&content)
    }
}

/// Tries to bind a TCP listener and drops it straight away.
#[derive(Default)]
pub struct TcpBindProbe;

impl BindProbe for TcpBindProbe {
    fn is_bind_port_free(&self, host: &str, port: u16) -> bool {
        TcpListener::bind((host, port)).is_ok()
    }
}
