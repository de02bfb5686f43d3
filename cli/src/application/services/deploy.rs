//! Application service: the deploy use-case.
//!
//! Assembles the four deployment phases into one [`Pipeline`], runs it, and
//! revokes any temporary validation token whatever the outcome.
//!
//! Imports only from `crate::domain`, `crate::application::ports` and the
//! pipeline engine.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use futures_util::FutureExt as _;

use crate::application::pipeline::{Pipeline, StepHandle, StepOutputs, immediate};
use crate::application::ports::{CredentialStore, HostBackend, ProgressReporter, StepProgress};
use crate::application::services::bootstrap_token::{
    BootstrapToken, resolve_bootstrap_token, revoke_temporary_token,
};
use crate::domain::{DeployConfig, ModelAliases, ResolvedModel};

/// Upper bound on waiting for `/health` after `compose up`.
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(300);

/// What a successful deploy produced.
#[derive(Debug)]
pub struct DeployOutcome {
    pub token: BootstrapToken,
    pub llm: ResolvedModel,
    pub emb: ResolvedModel,
    /// A temporary validation token was issued and then revoked.
    pub temporary_revoked: bool,
}

impl DeployOutcome {
    #[must_use]
    pub fn aliases(&self) -> ModelAliases {
        ModelAliases::of(&self.llm, &self.emb)
    }
}

/// Handles to the model acquisition steps.
///
/// Either both download steps ran, or the on-disk step did.
#[derive(Debug, Clone, Copy)]
pub struct ModelHandles {
    pub llm: StepHandle<ResolvedModel>,
    pub emb: StepHandle<ResolvedModel>,
    pub on_disk: StepHandle<(ResolvedModel, ResolvedModel)>,
}

impl ModelHandles {
    /// The resolved (LLM, embedding) pair.
    ///
    /// # Errors
    ///
    /// Fails when neither acquisition path has produced output.
    pub fn resolved(self, outputs: &StepOutputs) -> Result<(ResolvedModel, ResolvedModel)> {
        if let Some(pair) = outputs.try_get(self.on_disk) {
            return Ok(pair.clone());
        }
        Ok((outputs.get(self.llm)?.clone(), outputs.get(self.emb)?.clone()))
    }
}

/// Run the full deployment, abandoning it when `interrupt` completes.
///
/// # Errors
///
/// Returns the error of the first failing step, or `DeployError::Interrupted`
/// naming the step in flight. A temporary token issued for validation is
/// revoked before either is returned.
pub async fn run_deploy<H, S, P, R>(
    host: &H,
    store: &S,
    cfg: &DeployConfig,
    progress: &P,
    reporter: &R,
    interrupt: impl Future<Output = ()>,
) -> Result<DeployOutcome>
where
    H: HostBackend,
    S: CredentialStore,
    P: StepProgress,
    R: ProgressReporter,
{
    let mut pipeline = Pipeline::new();
    let token = system_phase(&mut pipeline, host, store, cfg, reporter);
    let models = model_phase(&mut pipeline, host, cfg);
    service_phase(&mut pipeline, host, cfg, models);
    validation_phase(&mut pipeline, host, cfg, token, models, reporter);

    tracing::info!(base_dir = %cfg.base_dir.display(), "deploy started");
    let result = pipeline.run_until(progress, interrupt).await;

    let outputs = pipeline.outputs();
    let temporary_revoked = outputs
        .try_get(token)
        .is_some_and(|t| revoke_temporary_token(store, t, reporter));
    result?;

    let (llm, emb) = models.resolved(outputs)?;
    Ok(DeployOutcome {
        token: outputs.get(token)?.clone(),
        llm,
        emb,
        temporary_revoked,
    })
}

/// Packages, upgrades, Docker, swap, firewall and the bootstrap token.
pub fn system_phase<'a, H, S, R>(
    pipeline: &mut Pipeline<'a>,
    host: &'a H,
    store: &'a S,
    cfg: &'a DeployConfig,
    reporter: &'a R,
) -> StepHandle<BootstrapToken>
where
    H: HostBackend,
    S: CredentialStore,
    R: ProgressReporter,
{
    pipeline.step("Install base packages", move |_| {
        host.install_base_packages().boxed_local()
    });
    pipeline.step("Enable unattended upgrades", move |_| {
        host.enable_unattended_upgrades().boxed_local()
    });
    pipeline.step("Install / enable Docker", move |_| {
        host.install_docker().boxed_local()
    });
    pipeline.step(format!("Ensure swap ({} GiB)", cfg.tuning.swap_gib), move |_| {
        host.ensure_swap(cfg.tuning.swap_gib).boxed_local()
    });
    pipeline.step_unless(
        "Firewall (UFW) hardening",
        move |_| !cfg.network.configure_ufw,
        move |_| host.configure_firewall(cfg).boxed_local(),
    );
    pipeline.step("Create API token", move |_| {
        immediate(resolve_bootstrap_token(
            store,
            &cfg.api_token_name,
            cfg.api_token.as_deref(),
            reporter,
        ))
    })
}

/// Download both models, or pick them up from disk with `skip_download`.
pub fn model_phase<'a, H: HostBackend>(
    pipeline: &mut Pipeline<'a>,
    host: &'a H,
    cfg: &'a DeployConfig,
) -> ModelHandles {
    let hf_token = cfg.hf_token.as_deref();

    let llm_dir = cfg.models_dir();
    let llm = pipeline.step_unless(
        "Resolve + download LLM GGUF",
        move |_| cfg.skip_download,
        move |_| async move { host.resolve_model(&cfg.llm, &llm_dir, hf_token).await }.boxed_local(),
    );

    let emb_dir = cfg.models_dir();
    let emb = pipeline.step_unless(
        "Resolve + download embedding GGUF",
        move |_| cfg.skip_download,
        move |_| async move { host.resolve_model(&cfg.emb, &emb_dir, hf_token).await }.boxed_local(),
    );

    let disk_dir = cfg.models_dir();
    let on_disk = pipeline.step_unless(
        "Use existing GGUF files",
        move |_| !cfg.skip_download,
        move |_| {
            async move {
                let llm = host.locate_existing(&cfg.llm, &disk_dir).await?;
                let emb = host.locate_existing(&cfg.emb, &disk_dir).await?;
                Ok::<_, anyhow::Error>((llm, emb))
            }
            .boxed_local()
        },
    );

    ModelHandles { llm, emb, on_disk }
}

/// Render config, pull, start, then put nginx in front when needed.
pub fn service_phase<'a, H: HostBackend>(
    pipeline: &mut Pipeline<'a>,
    host: &'a H,
    cfg: &'a DeployConfig,
    models: ModelHandles,
) {
    pipeline.step("Write models.ini + docker-compose.yml", move |outs| {
        let resolved = models.resolved(outs);
        async move {
            let (llm, emb) = resolved?;
            host.write_service_config(cfg, &llm, &emb).await
        }
        .boxed_local()
    });

    let image = cfg.image();
    pipeline.step("Pull Docker image", move |_| {
        async move { host.pull_image(&image).await }.boxed_local()
    });

    let compose = cfg.compose_path();
    pipeline.step("Start Docker Compose", move |_| {
        async move { host.compose_up(&compose).await }.boxed_local()
    });

    pipeline.step_unless(
        "NGINX local auth proxy (hashed mode)",
        move |_| !cfg.behind_auth_proxy() || cfg.use_tls(),
        move |_| host.ensure_local_proxy(cfg).boxed_local(),
    );

    let tls_label = match &cfg.domain {
        Some(domain) => format!("NGINX + Let's Encrypt TLS ({domain})"),
        None => "NGINX + Let's Encrypt TLS".to_string(),
    };
    pipeline.step_unless(
        tls_label,
        move |_| !cfg.use_tls(),
        move |_| host.ensure_tls(cfg).boxed_local(),
    );
}

/// Liveness, smoke tests and diagnostics.
pub fn validation_phase<'a, H, R>(
    pipeline: &mut Pipeline<'a>,
    host: &'a H,
    cfg: &'a DeployConfig,
    token: StepHandle<BootstrapToken>,
    models: ModelHandles,
    reporter: &'a R,
) where
    H: HostBackend,
    R: ProgressReporter,
{
    if cfg.network.publish || cfg.behind_auth_proxy() {
        let health_url = format!("{}/health", cfg.validation_base_url());
        pipeline.step("Wait for /health", move |_| {
            async move { host.wait_live(&health_url, HEALTH_TIMEOUT).await }.boxed_local()
        });

        let base_url = cfg.validation_base_url();
        pipeline.step("Smoke tests (OpenAI-compatible routes)", move |outs| {
            let value = outs.get(token).map(|t| t.value.clone());
            let aliases = models
                .resolved(outs)
                .map(|(llm, emb)| ModelAliases::of(&llm, &emb));
            async move { host.smoke_test(&base_url, &value?, &aliases?).await }.boxed_local()
        });
    } else {
        pipeline.step("Internal network smoke test", move |outs| {
            let value = outs.get(token).map(|t| t.value.clone());
            async move { host.internal_smoke_test(cfg, &value?).await }.boxed_local()
        });
    }

    pipeline.step("Sanity checks (ports + logs)", move |_| {
        async move {
            if let Err(e) = host.sanity_checks(cfg).await {
                tracing::warn!(error = %format!("{e:#}"), "sanity checks reported a problem");
                reporter.warn(&format!("Sanity checks: {e:#}"));
            }
            Ok(())
        }
        .boxed_local()
    });
}
