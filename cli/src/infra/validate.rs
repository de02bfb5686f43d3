//! `ServiceValidator` for `LocalHost`: health polling, OpenAI-compatible
//! smoke tests and read-only diagnostics.

use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use serde_json::{Value, json};

use crate::application::ports::{CommandRunner, ServiceValidator};
use crate::domain::error::DeployError;
use crate::domain::render::{CONTAINER_PORT, INTERNAL_NETWORK, LLAMA_CONTAINER};
use crate::domain::{DeployConfig, ModelAliases};
use crate::infra::host::LocalHost;

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);
const POLL_INTERVAL: Duration = Duration::from_secs(1);
const SMOKE_TIMEOUT: Duration = Duration::from_secs(120);
const CURL_IMAGE: &str = "curlimages/curl:8.5.0";
const LOG_TAIL: &str = "200";

/// Listeners in `ss -lntp` output that expose `port` on every interface.
#[must_use]
pub fn wildcard_listeners(ss_output: &str, port: u16) -> Vec<String> {
    let suffix = format!(":{port}");
    ss_output
        .lines()
        .filter(|line| {
            line.split_whitespace().any(|field| {
                field.ends_with(&suffix)
                    && (field.starts_with("0.0.0.0:")
                        || field.starts_with("[::]:")
                        || field.starts_with("*:"))
            })
        })
        .map(|line| line.trim().to_string())
        .collect()
}

/// Shell script run inside the throwaway curl container.
#[must_use]
pub fn internal_probe_script(token: &str) -> String {
    let base = format!("http://{LLAMA_CONTAINER}:{CONTAINER_PORT}");
    format!(
        "curl -fsS {base}/health && curl -fsS {base}/v1/models -H 'Authorization: Bearer {token}' | head -c 800"
    )
}

fn embedding_request(aliases: &ModelAliases) -> Value {
    json!({ "model": aliases.embedding, "input": ["hello world"] })
}

fn chat_request(aliases: &ModelAliases) -> Value {
    json!({
        "model": aliases.llm,
        "messages": [{ "role": "user", "content": "Say hello in 5 words." }],
        "max_tokens": 64,
        "temperature": 0.2,
    })
}

/// Truncated body for log lines.
fn excerpt(body: &str) -> &str {
    let end = body
        .char_indices()
        .nth(400)
        .map_or(body.len(), |(idx, _)| idx);
    &body[..end]
}

impl<R: CommandRunner> LocalHost<R> {
    async fn expect_ok(&self, label: &str, req: reqwest::RequestBuilder) -> Result<Value> {
        let response = req
            .timeout(SMOKE_TIMEOUT)
            .send()
            .await
            .with_context(|| format!("{label}: request failed"))?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            bail!("{label} returned {status}: {}", excerpt(&body));
        }
        tracing::info!(%label, body = excerpt(&body), "smoke test passed");
        serde_json::from_str(&body).with_context(|| format!("{label}: response is not JSON"))
    }
}

impl<R: CommandRunner> ServiceValidator for LocalHost<R> {
    async fn wait_live(&self, url: &str, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        loop {
            match self.http.get(url).timeout(PROBE_TIMEOUT).send().await {
                Ok(resp) if resp.status().is_success() => {
                    tracing::info!(%url, elapsed = ?start.elapsed(), "service is live");
                    return Ok(());
                }
                Ok(resp) => tracing::debug!(%url, status = %resp.status(), "not ready yet"),
                Err(e) => tracing::debug!(%url, error = %e, "not reachable yet"),
            }
            if start.elapsed() >= timeout {
                return Err(DeployError::Timeout {
                    what: format!("{url} (check: docker logs {LLAMA_CONTAINER})"),
                    secs: timeout.as_secs(),
                }
                .into());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn smoke_test(&self, base_url: &str, token: &str, aliases: &ModelAliases) -> Result<()> {
        let base = base_url.trim_end_matches('/');

        let models = self
            .expect_ok(
                "GET /v1/models",
                self.http.get(format!("{base}/v1/models")).bearer_auth(token),
            )
            .await?;
        let listed: Vec<&str> = models["data"]
            .as_array()
            .map(|data| data.iter().filter_map(|m| m["id"].as_str()).collect())
            .unwrap_or_default();
        tracing::info!(models = ?listed, "models advertised");

        self.expect_ok(
            "POST /v1/embeddings",
            self.http
                .post(format!("{base}/v1/embeddings"))
                .bearer_auth(token)
                .json(&embedding_request(aliases)),
        )
        .await?;

        self.expect_ok(
            "POST /v1/chat/completions",
            self.http
                .post(format!("{base}/v1/chat/completions"))
                .bearer_auth(token)
                .json(&chat_request(aliases)),
        )
        .await?;
        Ok(())
    }

    async fn internal_smoke_test(&self, cfg: &DeployConfig, token: &str) -> Result<()> {
        let _ = self.runner.run("docker", &["pull", CURL_IMAGE]).await;
        let network = format!("{}_{INTERNAL_NETWORK}", cfg.compose_project());
        let script = internal_probe_script(token);
        let output = self
            .runner
            .capture(
                "docker",
                &[
                    "run", "--rm", "--network", &network, CURL_IMAGE, "sh", "-c", &script,
                ],
            )
            .await?;
        tracing::info!(output = excerpt(&output), "internal smoke test passed");
        Ok(())
    }

    async fn sanity_checks(&self, cfg: &DeployConfig) -> Result<()> {
        let containers = self.runner.capture("docker", &["ps"]).await?;
        tracing::info!("docker ps:\n{containers}");

        let logs = self
            .runner
            .capture("docker", &["logs", "--tail", LOG_TAIL, LLAMA_CONTAINER])
            .await?;
        tracing::info!("{LLAMA_CONTAINER} logs:\n{logs}");

        let sockets = self.runner.capture("ss", &["-lntp"]).await?;
        tracing::info!("listening sockets:\n{sockets}");

        if cfg.network.publish && !cfg.network.is_public() {
            let exposed = wildcard_listeners(&sockets, cfg.network.port);
            if !exposed.is_empty() {
                bail!(
                    "port {} is bound on all interfaces although {} was requested: {}",
                    cfg.network.port,
                    cfg.network.bind_host,
                    exposed.join("; ")
                );
            }
        }
        Ok(())
    }
}
