//! Tracing setup with secret redaction at every sink.
//!
//! Components log through `tracing` and never scrub their own messages; the
//! [`Redactor`] built in `main` rewrites each formatted event before it is
//! written to stderr or the log file.

#![allow(clippy::expect_used)] // Redaction patterns are compile-time constants

use std::borrow::Cow;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use regex::Regex;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::{EnvFilter, Layer as _};

/// Log file used by `deploy` when running as root.
pub const DEFAULT_LOG_FILE: &str = "/var/log/llamacpp_deploy.log";

const REPLACEMENT: &str = "${1}<REDACTED>";

/// Secret-scrubbing ruleset applied to every log line.
#[derive(Debug, Clone)]
pub struct Redactor {
    rules: Vec<Regex>,
}

impl Redactor {
    /// Bearer tokens, `x-api-key` headers, `HF_TOKEN=` assignments and the
    /// `--hf-token` / `--api-token` flags.
    #[must_use]
    pub fn standard() -> Self {
        Self::from_patterns(&[
            r"(?i)(Authorization:\s*Bearer\s+)[^\s'\x22]+",
            r"(?i)(x-api-key:\s*)[^\s'\x22]+",
            r"(HF_TOKEN=)[^\s'\x22]+",
            r"(--hf-token[\s=]+)[^\s'\x22]+",
            r"(--api-token[\s=]+)[^\s'\x22]+",
        ])
    }

    /// Each pattern's first capture group is kept; the rest of the match
    /// is replaced.
    ///
    /// # Panics
    ///
    /// Panics if a pattern is not a valid regex.
    #[must_use]
    pub fn from_patterns(patterns: &[&str]) -> Self {
        Self {
            rules: patterns
                .iter()
                .map(|p| Regex::new(p).expect("valid redaction pattern"))
                .collect(),
        }
    }

    #[must_use]
    pub fn redact<'t>(&self, text: &'t str) -> Cow<'t, str> {
        let mut out = Cow::Borrowed(text);
        for rule in &self.rules {
            if let Cow::Owned(replaced) = rule.replace_all(&out, REPLACEMENT) {
                out = Cow::Owned(replaced);
            }
        }
        out
    }
}

/// Wraps a `MakeWriter`, redacting everything written through it.
#[derive(Clone)]
pub struct RedactingMakeWriter<M> {
    inner: M,
    redactor: Arc<Redactor>,
}

impl<M> RedactingMakeWriter<M> {
    pub fn new(inner: M, redactor: Arc<Redactor>) -> Self {
        Self { inner, redactor }
    }
}

impl<'a, M> MakeWriter<'a> for RedactingMakeWriter<M>
where
    M: MakeWriter<'a>,
{
    type Writer = RedactingWriter<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter {
            inner: self.inner.make_writer(),
            redactor: Arc::clone(&self.redactor),
        }
    }
}

pub struct RedactingWriter<W> {
    inner: W,
    redactor: Arc<Redactor>,
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let text = String::from_utf8_lossy(buf);
        self.inner
            .write_all(self.redactor.redact(&text).as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Where the file sink should go: the preferred path when its directory is
/// writable, otherwise `fallback`.
fn open_log_file(preferred: &Path, fallback: Option<&Path>) -> Option<(PathBuf, std::fs::File)> {
    let open = |path: &Path| {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok()?;
        }
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
    };
    if let Some(file) = open(preferred) {
        return Some((preferred.to_path_buf(), file));
    }
    let fallback = fallback?;
    open(fallback).map(|file| (fallback.to_path_buf(), file))
}

/// Options for [`init`].
#[derive(Debug, Default)]
pub struct LogOptions<'a> {
    /// Raise the stderr sink from `warn` to `debug`.
    pub verbose: bool,
    /// File sink at `debug`, if any.
    pub file: Option<&'a Path>,
    /// Used when `file` cannot be opened.
    pub fallback_file: Option<&'a Path>,
}

/// Install the global subscriber. Returns the log file actually opened.
///
/// `RUST_LOG` overrides the stderr level.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init(redactor: Redactor, opts: &LogOptions<'_>) -> Result<Option<PathBuf>> {
    let redactor = Arc::new(redactor);

    let default_level = if opts.verbose { "debug" } else { "warn" };
    let stderr_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(RedactingMakeWriter::new(
            std::io::stderr,
            Arc::clone(&redactor),
        ))
        .with_filter(stderr_filter);

    let opened = opts
        .file
        .and_then(|path| open_log_file(path, opts.fallback_file));
    let log_path = opened.as_ref().map(|(path, _)| path.clone());
    let file_layer = opened.map(|(_, file)| {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(RedactingMakeWriter::new(Mutex::new(file), redactor))
            .with_filter(LevelFilter::DEBUG)
    });

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("installing tracing subscriber")?;
    Ok(log_path)
}
