//! `ModelResolver` for `LocalHost`: Hugging Face listing, streamed download
//! with on-the-fly SHA-256, and reuse of files already on disk.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use futures_util::StreamExt as _;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt as _;

use crate::application::ports::{CommandRunner, ModelResolver};
use crate::domain::error::DeployError;
use crate::domain::token::hex_encode;
use crate::domain::{ModelSpec, ResolvedModel};
use crate::infra::fs::sha256_file;
use crate::infra::host::LocalHost;
use crate::output::progress;

/// One entry of `GET /api/models/{repo}/tree/main`.
#[derive(Debug, Deserialize)]
pub struct RepoEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub path: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub lfs: Option<LfsInfo>,
}

#[derive(Debug, Deserialize)]
pub struct LfsInfo {
    /// SHA-256 of the file contents.
    pub oid: String,
    pub size: u64,
}

impl RepoEntry {
    #[must_use]
    pub fn file_size(&self) -> u64 {
        self.lfs.as_ref().map_or(self.size, |l| l.size)
    }

    #[must_use]
    pub fn expected_sha256(&self) -> Option<&str> {
        self.lfs.as_ref().map(|l| l.oid.as_str())
    }
}

/// Pick the entry for `spec` from a repository listing.
///
/// # Errors
///
/// `DeployError::ModelNotFound` when no file matches the patterns.
pub fn choose_entry<'e>(spec: &ModelSpec, entries: &'e [RepoEntry]) -> Result<&'e RepoEntry> {
    let names: Vec<&str> = entries
        .iter()
        .filter(|e| e.kind == "file")
        .map(|e| e.path.as_str())
        .collect();
    let chosen = spec
        .select_candidate(&names)
        .ok_or_else(|| DeployError::ModelNotFound {
            repo: spec.hf_repo.clone(),
            location: "the Hugging Face repository".to_string(),
            patterns: spec.candidate_patterns.clone(),
        })?;
    entries
        .iter()
        .find(|e| e.path == chosen)
        .context("chosen entry vanished from listing")
}

/// File name component of a repository path (`sub/x.gguf` → `x.gguf`).
fn local_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

async fn hash_in_background(path: PathBuf) -> Result<String> {
    tokio::task::spawn_blocking(move || sha256_file(&path))
        .await
        .context("hashing task panicked")?
}

impl<R: CommandRunner> LocalHost<R> {
    /// Hash `path` off the runtime, with a spinner on a terminal.
    async fn checksum(&self, path: PathBuf) -> Result<String> {
        let spinner = self
            .show_progress
            .then(|| progress::spinner(&format!("Hashing {}", path.display())));
        let sha = hash_in_background(path).await;
        if let Some(spinner) = spinner {
            spinner.finish_and_clear();
        }
        sha
    }

    fn authorized(&self, req: reqwest::RequestBuilder, hf_token: Option<&str>) -> reqwest::RequestBuilder {
        match hf_token {
            Some(token) if !token.is_empty() => req.bearer_auth(token),
            _ => req,
        }
    }

    async fn list_repo(&self, repo: &str, hf_token: Option<&str>) -> Result<Vec<RepoEntry>> {
        let url = format!("{}/api/models/{repo}/tree/main", self.hf_endpoint);
        tracing::info!(%url, "listing repository");
        self.authorized(self.http.get(&url), hf_token)
            .send()
            .await
            .with_context(|| format!("requesting {url}"))?
            .error_for_status()
            .with_context(|| format!("listing {repo}"))?
            .json()
            .await
            .with_context(|| format!("parsing listing of {repo}"))
    }

    async fn download(
        &self,
        repo: &str,
        entry: &RepoEntry,
        target: &Path,
        hf_token: Option<&str>,
    ) -> Result<String> {
        let url = format!("{}/{repo}/resolve/main/{}", self.hf_endpoint, entry.path);
        let part = target.with_extension("gguf.part");
        tracing::info!(%url, target = %target.display(), "downloading");

        let response = self
            .authorized(self.http.get(&url), hf_token)
            .send()
            .await
            .with_context(|| format!("requesting {url}"))?
            .error_for_status()
            .with_context(|| format!("downloading {}", entry.path))?;
        let total = response.content_length().unwrap_or_else(|| entry.file_size());

        let bar = progress::bar(total, &format!("Downloading {}", local_name(&entry.path)));
        if !self.show_progress {
            bar.set_draw_target(indicatif::ProgressDrawTarget::hidden());
        }

        let mut file = tokio::fs::File::create(&part)
            .await
            .with_context(|| format!("creating {}", part.display()))?;
        let mut hasher = Sha256::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.with_context(|| format!("reading {url}"))?;
            hasher.update(&chunk);
            file.write_all(&chunk)
                .await
                .with_context(|| format!("writing {}", part.display()))?;
            bar.inc(chunk.len() as u64);
        }
        file.flush().await.context("flushing download")?;
        drop(file);

        let digest = hex_encode(&hasher.finalize());
        if let Some(expected) = entry.expected_sha256()
            && expected != digest
        {
            let _ = tokio::fs::remove_file(&part).await;
            progress::finish_error(&bar, "checksum mismatch");
            bail!(
                "checksum mismatch for {}: expected {expected}, got {digest}",
                entry.path
            );
        }
        tokio::fs::rename(&part, target)
            .await
            .with_context(|| format!("finalizing {}", target.display()))?;
        progress::finish_success(&bar, local_name(&entry.path));
        Ok(digest)
    }
}

impl<R: CommandRunner> ModelResolver for LocalHost<R> {
    async fn resolve_model(
        &self,
        spec: &ModelSpec,
        dest: &Path,
        hf_token: Option<&str>,
    ) -> Result<ResolvedModel> {
        tokio::fs::create_dir_all(dest)
            .await
            .with_context(|| format!("creating directory {}", dest.display()))?;

        let entries = self.list_repo(&spec.hf_repo, hf_token).await?;
        let entry = choose_entry(spec, &entries)?;
        let filename = local_name(&entry.path).to_string();
        let target = dest.join(&filename);
        let size = entry.file_size();

        let on_disk = tokio::fs::metadata(&target).await.ok().map(|m| m.len());
        if on_disk == Some(size) {
            let sha = self.checksum(target.clone()).await?;
            if entry.expected_sha256().is_none_or(|expected| expected == sha) {
                tracing::info!(file = %filename, "existing file matches, skipping download");
                return Ok(spec.with_resolved(&filename, &sha, size));
            }
            tracing::warn!(file = %filename, "existing file does not match checksum, downloading again");
        }

        let sha = self
            .download(&spec.hf_repo, entry, &target, hf_token)
            .await?;
        let size = tokio::fs::metadata(&target)
            .await
            .with_context(|| format!("reading {}", target.display()))?
            .len();
        Ok(spec.with_resolved(&filename, &sha, size))
    }

    async fn locate_existing(&self, spec: &ModelSpec, dir: &Path) -> Result<ResolvedModel> {
        let mut names = Vec::new();
        if let Ok(mut entries) = tokio::fs::read_dir(dir).await {
            while let Some(entry) = entries
                .next_entry()
                .await
                .with_context(|| format!("listing {}", dir.display()))?
            {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let chosen = spec
            .select_candidate(&refs)
            .ok_or_else(|| DeployError::ModelNotFound {
                repo: spec.hf_repo.clone(),
                location: dir.display().to_string(),
                patterns: spec.candidate_patterns.clone(),
            })?
            .to_string();

        let path = dir.join(&chosen);
        let size = tokio::fs::metadata(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?
            .len();
        let sha = self.checksum(path).await?;
        tracing::info!(file = %chosen, sha = %&sha[..12], "using existing GGUF");
        Ok(spec.with_resolved(&chosen, &sha, size))
    }
}
