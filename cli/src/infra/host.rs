//! `LocalHost`: the production `HostBackend`.
//!
//! System preparation, container lifecycle and nginx live here. Model
//! resolution is in `infra::models` and validation in `infra::validate`;
//! all three implement their ports on the same type.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::application::ports::{
    CommandRunner, ReverseProxy, ServiceManager, SystemPreparer,
};
use crate::domain::render::{self, NGINX_SITE_NAME, NginxSite};
use crate::domain::{DeployConfig, ResolvedModel};
use crate::infra::fs::write_file;

const CONFIG_MODE: u32 = 0o644;
const APT_ENV: &str = "export DEBIAN_FRONTEND=noninteractive";

/// The machine the deployer runs on.
pub struct LocalHost<R> {
    pub(crate) runner: R,
    pub(crate) http: reqwest::Client,
    pub(crate) show_progress: bool,
    pub(crate) hf_endpoint: String,
    nginx_dir: PathBuf,
}

impl<R: CommandRunner> LocalHost<R> {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(runner: R, show_progress: bool) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("llama-deploy/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building HTTP client")?;
        let hf_endpoint = std::env::var("HF_ENDPOINT")
            .unwrap_or_else(|_| "https://huggingface.co".to_string());
        Ok(Self {
            runner,
            http,
            show_progress,
            hf_endpoint: hf_endpoint.trim_end_matches('/').to_string(),
            nginx_dir: PathBuf::from("/etc/nginx"),
        })
    }

    fn site_paths(&self) -> (PathBuf, PathBuf) {
        (
            self.nginx_dir.join("sites-available").join(NGINX_SITE_NAME),
            self.nginx_dir.join("sites-enabled").join(NGINX_SITE_NAME),
        )
    }

    async fn install_site(&self, site: &NginxSite) -> Result<()> {
        let (available, enabled) = self.site_paths();
        write_file(&available, &render::nginx_site(site), CONFIG_MODE)?;
        if let Some(parent) = enabled.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
        let _ = std::fs::remove_file(&enabled);
        link(&available, &enabled)?;
        tracing::info!(site = %available.display(), "nginx site written");
        self.runner
            .shell("nginx -t && systemctl enable nginx && systemctl reload-or-restart nginx")
            .await
    }
}

#[cfg(unix)]
fn link(target: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link)
        .with_context(|| format!("linking {} -> {}", link.display(), target.display()))
}

#[cfg(not(unix))]
fn link(target: &Path, link: &Path) -> Result<()> {
    std::fs::copy(target, link)
        .map(|_| ())
        .with_context(|| format!("copying {} -> {}", target.display(), link.display()))
}

/// Script that grows swap to at least `gib`, idempotently.
#[must_use]
pub fn swap_script(gib: u32) -> String {
    format!(
        r#"set -euo pipefail
want={gib}
have=$(awk '/SwapTotal/ {{print int($2/1048576)}}' /proc/meminfo)
if [ "$have" -ge "$want" ]; then echo "swap already ${{have}}G"; exit 0; fi
swapoff /swapfile 2>/dev/null || true
fallocate -l {gib}G /swapfile || dd if=/dev/zero of=/swapfile bs=1M count=$(({gib}*1024))
chmod 600 /swapfile
mkswap /swapfile
swapon /swapfile
grep -q '^/swapfile ' /etc/fstab || echo '/swapfile none swap sw 0 0' >> /etc/fstab"#
    )
}

/// UFW rules for `cfg`: deny inbound except SSH, plus the public endpoint
/// when asked and the HTTP(S) ports when a domain is served.
#[must_use]
pub fn firewall_script(cfg: &DeployConfig) -> String {
    let mut lines = vec![
        "set -euo pipefail".to_string(),
        "ufw default deny incoming".to_string(),
        "ufw default allow outgoing".to_string(),
        "ufw allow OpenSSH".to_string(),
    ];
    if cfg.network.open_firewall && cfg.network.publish && cfg.network.is_public() {
        lines.push(format!("ufw allow {}/tcp", cfg.network.port));
    }
    if cfg.use_tls() {
        lines.push("ufw allow 80/tcp".to_string());
        lines.push("ufw allow 443/tcp".to_string());
    }
    lines.push("ufw --force enable".to_string());
    lines.join("\n")
}

impl<R: CommandRunner> SystemPreparer for LocalHost<R> {
    async fn install_base_packages(&self) -> Result<()> {
        self.runner
            .shell(&format!(
                "{APT_ENV}; apt-get update -y && apt-get install -y --no-install-recommends \
                 ca-certificates curl gnupg lsb-release jq ufw"
            ))
            .await
    }

    async fn enable_unattended_upgrades(&self) -> Result<()> {
        self.runner
            .shell(&format!("{APT_ENV}; apt-get install -y unattended-upgrades"))
            .await?;
        write_file(
            Path::new("/etc/apt/apt.conf.d/20auto-upgrades"),
            "APT::Periodic::Update-Package-Lists \"1\";\nAPT::Periodic::Unattended-Upgrade \"1\";\n",
            CONFIG_MODE,
        )
    }

    async fn install_docker(&self) -> Result<()> {
        self.runner
            .shell(
                "if ! command -v docker >/dev/null 2>&1; then curl -fsSL https://get.docker.com | sh; fi\n\
                 systemctl enable --now docker\n\
                 docker compose version",
            )
            .await
    }

    async fn ensure_swap(&self, gib: u32) -> Result<()> {
        if gib == 0 {
            tracing::info!("swap disabled by configuration");
            return Ok(());
        }
        self.runner.shell(&swap_script(gib)).await
    }

    async fn configure_firewall(&self, cfg: &DeployConfig) -> Result<()> {
        self.runner.shell(&firewall_script(cfg)).await
    }
}

impl<R: CommandRunner> ServiceManager for LocalHost<R> {
    async fn write_service_config(
        &self,
        cfg: &DeployConfig,
        llm: &ResolvedModel,
        emb: &ResolvedModel,
    ) -> Result<()> {
        for dir in [cfg.models_dir(), cfg.presets_dir(), cfg.cache_dir()] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("creating directory {}", dir.display()))?;
        }
        write_file(
            &cfg.preset_path(),
            &render::models_ini(llm, emb, &cfg.tuning),
            CONFIG_MODE,
        )?;
        write_file(
            &cfg.compose_path(),
            &render::compose_file(cfg, &cfg.tuning),
            CONFIG_MODE,
        )?;
        if cfg.behind_auth_proxy() {
            write_file(
                &cfg.auth_dir().join(render::AUTH_SIDECAR_FILE),
                render::AUTH_SIDECAR_SCRIPT,
                CONFIG_MODE,
            )?;
        }
        tracing::info!(
            preset = %cfg.preset_path().display(),
            compose = %cfg.compose_path().display(),
            "service configuration written"
        );
        Ok(())
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        self.runner.run_checked("docker", &["pull", image]).await
    }

    async fn compose_up(&self, compose_file: &Path) -> Result<()> {
        let file = compose_file.to_string_lossy();
        self.runner
            .run_checked(
                "docker",
                &["compose", "-f", &file, "up", "-d", "--remove-orphans"],
            )
            .await
    }
}

impl<R: CommandRunner> ReverseProxy for LocalHost<R> {
    async fn ensure_local_proxy(&self, cfg: &DeployConfig) -> Result<()> {
        self.runner
            .shell(&format!("{APT_ENV}; apt-get install -y nginx"))
            .await?;
        self.install_site(&NginxSite::local(cfg)).await
    }

    async fn ensure_tls(&self, cfg: &DeployConfig) -> Result<()> {
        let domain = cfg.domain.as_deref().context("TLS requires a domain")?;
        let email = cfg
            .certbot_email
            .as_deref()
            .context("TLS requires certbot_email")?;
        self.runner
            .shell(&format!(
                "{APT_ENV}; apt-get install -y nginx certbot python3-certbot-nginx"
            ))
            .await?;
        self.install_site(&NginxSite::tls(cfg, domain)).await?;
        self.runner
            .run_checked(
                "certbot",
                &[
                    "--nginx",
                    "-d",
                    domain,
                    "-m",
                    email,
                    "--agree-tos",
                    "--non-interactive",
                    "--redirect",
                ],
            )
            .await
    }
}
