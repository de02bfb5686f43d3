//! Domain types and validators for deploy configuration.
//!
//! Pure functions only: no I/O, no async, no filesystem access. YAML
//! loading lives in `crate::infra::config`; CLI flags are merged over it in
//! `crate::commands::deploy`.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::domain::error::ConfigError;
use crate::domain::model::ModelSpec;

// ── Constants ────────────────────────────────────────────────────────────────

pub const DEFAULT_BASE_DIR: &str = "/opt/llama";
pub const CPU_IMAGE: &str = "ghcr.io/ggml-org/llama.cpp:server";
pub const CUDA_IMAGE: &str = "ghcr.io/ggml-org/llama.cpp:server-cuda";

// ── Enums ────────────────────────────────────────────────────────────────────

/// How API credentials are persisted and checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// llama-server reads raw secrets from `api_keys`.
    #[default]
    Plaintext,
    /// An auth sidecar checks SHA-256 digests from `token_hashes.json`.
    Hashed,
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Plaintext => "plaintext",
            Self::Hashed => "hashed",
        })
    }
}

impl FromStr for AuthMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "plaintext" => Ok(Self::Plaintext),
            "hashed" => Ok(Self::Hashed),
            _ => Err(ConfigError::UnknownVariant {
                kind: "auth mode",
                value: s.to_string(),
                valid: "plaintext, hashed",
            }),
        }
    }
}

/// Inference backend, which selects the llama.cpp server image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Cpu,
    Cuda,
}

impl BackendKind {
    #[must_use]
    pub fn default_image(self) -> &'static str {
        match self {
            Self::Cpu => CPU_IMAGE,
            Self::Cuda => CUDA_IMAGE,
        }
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda),
            _ => Err(ConfigError::UnknownVariant {
                kind: "backend",
                value: s.to_string(),
                valid: "cpu, cuda",
            }),
        }
    }
}

// ── Config schema ────────────────────────────────────────────────────────────

/// Networking parameters for the published endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the endpoint binds to on the host.
    pub bind_host: String,
    /// Public port of the endpoint.
    pub port: u16,
    /// Publish the port on the host at all (otherwise compose-network only).
    pub publish: bool,
    /// Open the public port in UFW.
    pub open_firewall: bool,
    /// Manage UFW at all.
    pub configure_ufw: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_host: "127.0.0.1".to_string(),
            port: 8080,
            publish: true,
            open_firewall: false,
            configure_ufw: true,
        }
    }
}

impl NetworkConfig {
    /// Whether the bind address is reachable from outside the host.
    #[must_use]
    pub fn is_public(&self) -> bool {
        !matches!(self.bind_host.as_str(), "127.0.0.1" | "localhost" | "::1")
    }

    /// Host to use when probing the endpoint from this machine.
    #[must_use]
    pub fn loopback_host(&self) -> &str {
        match self.bind_host.as_str() {
            "0.0.0.0" | "::" | "localhost" => "127.0.0.1",
            other => other,
        }
    }
}

/// Concurrency and memory knobs, adjusted by the resource tuner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tuning {
    /// Target swap size in GiB.
    pub swap_gib: u32,
    /// Maximum number of models llama-server keeps loaded.
    pub models_max: u32,
    /// Parallel request slots per model.
    pub parallel: u32,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            swap_gib: 8,
            models_max: 2,
            parallel: 1,
        }
    }
}

/// Full deploy configuration. Immutable once assembled for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    pub base_dir: PathBuf,
    pub backend: BackendKind,
    /// Overrides the backend's default image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub network: NetworkConfig,
    pub tuning: Tuning,
    /// Adjust `tuning` from detected memory before deploying.
    pub auto_tune: bool,
    pub auth_mode: AuthMode,
    /// Fixed value for the first API token.
    #[serde(skip_serializing)]
    pub api_token: Option<String>,
    pub api_token_name: String,
    #[serde(skip_serializing)]
    pub hf_token: Option<String>,
    /// Reuse GGUF files already in `models/` instead of downloading.
    pub skip_download: bool,
    /// Public domain; enables the TLS proxy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certbot_email: Option<String>,
    /// Loopback port llama-server listens on when fronted by the auth proxy.
    pub llama_internal_port: u16,
    /// Loopback port of the auth sidecar.
    pub sidecar_port: u16,
    pub llm: ModelSpec,
    pub emb: ModelSpec,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from(DEFAULT_BASE_DIR),
            backend: BackendKind::Cpu,
            image: None,
            network: NetworkConfig::default(),
            tuning: Tuning::default(),
            auto_tune: true,
            auth_mode: AuthMode::Plaintext,
            api_token: None,
            api_token_name: "default".to_string(),
            hf_token: None,
            skip_download: false,
            domain: None,
            certbot_email: None,
            llama_internal_port: 8081,
            sidecar_port: 9000,
            llm: ModelSpec {
                hf_repo: "Qwen/Qwen3-8B-GGUF".to_string(),
                candidate_patterns: vec!["Q4_K_M".to_string(), "Q5_K_M".to_string()],
                ctx_len: 3072,
                is_embedding: false,
                alias: None,
            },
            emb: ModelSpec {
                hf_repo: "Qwen/Qwen3-Embedding-0.6B-GGUF".to_string(),
                candidate_patterns: vec!["Q8_0".to_string()],
                ctx_len: 2048,
                is_embedding: true,
                alias: None,
            },
        }
    }
}

impl DeployConfig {
    #[must_use]
    pub fn models_dir(&self) -> PathBuf {
        self.base_dir.join("models")
    }

    #[must_use]
    pub fn presets_dir(&self) -> PathBuf {
        self.base_dir.join("presets")
    }

    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.base_dir.join("cache")
    }

    #[must_use]
    pub fn secrets_dir(&self) -> PathBuf {
        self.base_dir.join("secrets")
    }

    #[must_use]
    pub fn auth_dir(&self) -> PathBuf {
        self.base_dir.join("auth")
    }

    #[must_use]
    pub fn preset_path(&self) -> PathBuf {
        self.presets_dir().join("models.ini")
    }

    #[must_use]
    pub fn compose_path(&self) -> PathBuf {
        self.base_dir.join("docker-compose.yml")
    }

    /// Compose project name (compose derives it from the directory name).
    #[must_use]
    pub fn compose_project(&self) -> String {
        self.base_dir
            .file_name()
            .map_or_else(|| "llama".to_string(), |n| n.to_string_lossy().to_string())
    }

    #[must_use]
    pub fn image(&self) -> String {
        self.image
            .clone()
            .unwrap_or_else(|| self.backend.default_image().to_string())
    }

    #[must_use]
    pub fn use_tls(&self) -> bool {
        self.domain.is_some()
    }

    /// Whether llama-server sits behind the nginx + auth sidecar pair.
    #[must_use]
    pub fn behind_auth_proxy(&self) -> bool {
        self.auth_mode == AuthMode::Hashed
    }

    /// Host port llama-server is published on.
    #[must_use]
    pub fn upstream_port(&self) -> u16 {
        if self.behind_auth_proxy() {
            self.llama_internal_port
        } else {
            self.network.port
        }
    }

    /// Base URL used by validation requests from this host.
    #[must_use]
    pub fn validation_base_url(&self) -> String {
        match (&self.domain, self.auth_mode) {
            (Some(domain), AuthMode::Hashed) => format!("https://{domain}"),
            _ => format!(
                "http://{}:{}",
                self.network.loopback_host(),
                self.network.port
            ),
        }
    }

    /// Base URL clients should use.
    #[must_use]
    pub fn public_base_url(&self) -> String {
        match &self.domain {
            Some(domain) => format!("https://{domain}"),
            None => format!("http://{}:{}", self.network.bind_host, self.network.port),
        }
    }

    /// Validate cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        let invalid = |key: &str, reason: &str| -> anyhow::Error {
            ConfigError::InvalidValue {
                key: key.to_string(),
                reason: reason.to_string(),
            }
            .into()
        };

        if self.network.port == 0 {
            return Err(invalid("network.port", "must be between 1 and 65535"));
        }
        if self.llama_internal_port == 0 || self.sidecar_port == 0 {
            return Err(invalid("internal ports", "must be between 1 and 65535"));
        }
        if self.network.bind_host.trim().is_empty() {
            return Err(invalid("network.bind_host", "must not be empty"));
        }
        for (key, spec) in [("llm", &self.llm), ("emb", &self.emb)] {
            if spec.hf_repo.trim().is_empty() {
                return Err(invalid(&format!("{key}.hf_repo"), "must not be empty"));
            }
            if spec.candidate_patterns.iter().all(|p| p.trim().is_empty()) {
                return Err(invalid(
                    &format!("{key}.candidate_patterns"),
                    "needs at least one pattern",
                ));
            }
        }
        if self.llm.effective_alias() == self.emb.effective_alias() {
            return Err(invalid("emb.alias", "must differ from the LLM alias"));
        }
        if self.domain.is_some() && self.certbot_email.is_none() {
            return Err(invalid("certbot_email", "required when a domain is set"));
        }
        if self
            .api_token
            .as_deref()
            .is_some_and(|t| t.trim().is_empty())
        {
            return Err(invalid("api_token", "must not be empty"));
        }
        Ok(())
    }
}
