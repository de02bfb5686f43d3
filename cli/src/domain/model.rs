//! Model specifications and resolved GGUF artifacts.
//!
//! Pure types only; resolution against Hugging Face or the local disk
//! lives in `crate::infra::models`.

use serde::{Deserialize, Serialize};

/// A model the deployment should serve, before its artifact is resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Hugging Face repository, e.g. `"Qwen/Qwen3-8B-GGUF"`.
    pub hf_repo: String,
    /// Substrings tried in order against `.gguf` filenames, e.g. `"Q4_K_M"`.
    pub candidate_patterns: Vec<String>,
    /// Context length passed to llama-server.
    pub ctx_len: u32,
    /// Whether this is the embedding model.
    #[serde(default)]
    pub is_embedding: bool,
    /// Name advertised in `/v1/models`. Derived from the repo when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl ModelSpec {
    /// The name clients use to address this model.
    ///
    /// An explicit alias wins; otherwise the last path segment of the repo
    /// with a trailing `-GGUF` removed (`Qwen/Qwen3-8B-GGUF` → `Qwen3-8B`).
    #[must_use]
    pub fn effective_alias(&self) -> String {
        if let Some(alias) = self.alias.as_deref().filter(|a| !a.trim().is_empty()) {
            return alias.to_string();
        }
        let last = self.hf_repo.rsplit('/').next().unwrap_or(&self.hf_repo);
        let stripped = last
            .strip_suffix("-GGUF")
            .or_else(|| last.strip_suffix("-gguf"))
            .unwrap_or(last);
        stripped.to_string()
    }

    /// Pick the artifact to use from a listing of filenames.
    ///
    /// Patterns are tried in priority order; within one pattern the
    /// lexicographically first `.gguf` name wins so the choice is stable.
    #[must_use]
    pub fn select_candidate<'a>(&self, names: &[&'a str]) -> Option<&'a str> {
        let mut ggufs: Vec<&'a str> = names
            .iter()
            .copied()
            .filter(|n| n.to_ascii_lowercase().ends_with(".gguf"))
            .collect();
        ggufs.sort_unstable();
        self.candidate_patterns
            .iter()
            .find_map(|pattern| ggufs.iter().copied().find(|n| n.contains(pattern.as_str())))
    }

    /// Attach resolution results to this spec.
    #[must_use]
    pub fn with_resolved(&self, filename: &str, sha256: &str, size: u64) -> ResolvedModel {
        ResolvedModel {
            spec: self.clone(),
            filename: filename.to_string(),
            sha256: sha256.to_string(),
            size,
        }
    }
}

/// A model whose GGUF file is present in the models directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModel {
    pub spec: ModelSpec,
    /// File name relative to the models directory.
    pub filename: String,
    /// SHA-256 hex digest of the file contents.
    pub sha256: String,
    /// File size in bytes.
    pub size: u64,
}

impl ResolvedModel {
    #[must_use]
    pub fn alias(&self) -> String {
        self.spec.effective_alias()
    }

    /// Path of the file as seen from inside the llama container.
    #[must_use]
    pub fn container_path(&self) -> String {
        format!("/models/{}", self.filename)
    }
}

/// Aliases the smoke tests address, one per model role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelAliases {
    pub llm: String,
    pub embedding: String,
}

impl ModelAliases {
    #[must_use]
    pub fn of(llm: &ResolvedModel, emb: &ResolvedModel) -> Self {
        Self {
            llm: llm.alias(),
            embedding: emb.alias(),
        }
    }
}
