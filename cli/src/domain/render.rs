//! Service configuration rendering: pure functions, no I/O.
//!
//! Each function returns the file content as a `String`; writing to disk is
//! the caller's job.

#![allow(clippy::format_push_string)]

use crate::domain::config::{AuthMode, BackendKind, DeployConfig, Tuning};
use crate::domain::model::ResolvedModel;
use crate::domain::token::HASH_FILE;

/// Port llama-server listens on inside its container.
pub const CONTAINER_PORT: u16 = 8080;
/// Port the auth sidecar listens on inside its container.
pub const SIDECAR_CONTAINER_PORT: u16 = 9000;
pub const LLAMA_CONTAINER: &str = "llama-router";
pub const AUTH_CONTAINER: &str = "llama-auth";
pub const AUTH_IMAGE: &str = "python:3.12-alpine";
pub const INTERNAL_NETWORK: &str = "llm_internal";
pub const NGINX_SITE_NAME: &str = "llama-deploy";

/// Source of the hashed-mode auth sidecar.
pub const AUTH_SIDECAR_SCRIPT: &str = include_str!("../../assets/llama-auth.py");
pub const AUTH_SIDECAR_FILE: &str = "llama-auth.py";

/// Render `presets/models.ini` for llama-server's router mode.
#[must_use]
pub fn models_ini(llm: &ResolvedModel, emb: &ResolvedModel, tuning: &Tuning) -> String {
    let mut out = String::from("# Generated by llama-deploy - DO NOT EDIT\n");
    out.push_str("[*]\n");
    out.push_str(&format!("parallel = {}\n", tuning.parallel));
    if tuning.models_max < 2 {
        out.push_str("load-on-startup = false\n");
    }
    out.push('\n');

    append_model_section(&mut out, llm, true);
    out.push('\n');
    append_model_section(&mut out, emb, tuning.models_max >= 2);
    out
}

fn append_model_section(out: &mut String, model: &ResolvedModel, load_on_startup: bool) {
    out.push_str(&format!("[{}]\n", model.alias()));
    out.push_str(&format!("model = {}\n", model.container_path()));
    out.push_str(&format!("load-on-startup = {load_on_startup}\n"));
    out.push_str(&format!("ctx-size = {}\n", model.spec.ctx_len));
    if model.spec.is_embedding {
        out.push_str("embeddings = true\n");
    }
}

/// Render `docker-compose.yml`.
///
/// In hashed mode llama-server is published on loopback only and an auth
/// sidecar is added; otherwise the server checks `api_keys` itself.
#[must_use]
pub fn compose_file(cfg: &DeployConfig, tuning: &Tuning) -> String {
    let mut out = String::from("# Generated by llama-deploy - DO NOT EDIT\n");
    out.push_str("services:\n");
    out.push_str("  llama:\n");
    out.push_str(&format!("    image: {}\n", cfg.image()));
    out.push_str(&format!("    container_name: {LLAMA_CONTAINER}\n"));
    out.push_str("    restart: unless-stopped\n");
    out.push_str("    command:\n");
    let mut args = vec![
        "--models-preset".to_string(),
        "/presets/models.ini".to_string(),
        "--models-max".to_string(),
        tuning.models_max.to_string(),
        "--host".to_string(),
        "0.0.0.0".to_string(),
        "--port".to_string(),
        CONTAINER_PORT.to_string(),
    ];
    if cfg.auth_mode == AuthMode::Plaintext {
        args.push("--api-key-file".to_string());
        args.push("/secrets/api_keys".to_string());
    }
    for arg in &args {
        out.push_str(&format!("      - \"{arg}\"\n"));
    }
    out.push_str("    environment:\n");
    out.push_str("      - LLAMA_CACHE=/cache\n");
    out.push_str("    volumes:\n");
    out.push_str("      - ./models:/models:ro\n");
    out.push_str("      - ./presets:/presets:ro\n");
    out.push_str("      - ./cache:/cache\n");
    if cfg.auth_mode == AuthMode::Plaintext {
        out.push_str("      - ./secrets:/secrets:ro\n");
    }
    if let Some(mapping) = llama_port_mapping(cfg) {
        out.push_str("    ports:\n");
        out.push_str(&format!("      - \"{mapping}\"\n"));
    }
    if cfg.backend == BackendKind::Cuda {
        out.push_str("    deploy:\n");
        out.push_str("      resources:\n");
        out.push_str("        reservations:\n");
        out.push_str("          devices:\n");
        out.push_str("            - driver: nvidia\n");
        out.push_str("              count: all\n");
        out.push_str("              capabilities: [gpu]\n");
    }
    out.push_str("    networks:\n");
    out.push_str(&format!("      - {INTERNAL_NETWORK}\n"));

    if cfg.auth_mode == AuthMode::Hashed {
        append_auth_sidecar(&mut out, cfg);
    }

    out.push('\n');
    out.push_str("networks:\n");
    out.push_str(&format!("  {INTERNAL_NETWORK}:\n"));
    out.push_str("    driver: bridge\n");
    out
}

/// Host side of llama-server's port mapping, if published at all.
fn llama_port_mapping(cfg: &DeployConfig) -> Option<String> {
    match cfg.auth_mode {
        AuthMode::Hashed => Some(format!(
            "127.0.0.1:{}:{CONTAINER_PORT}",
            cfg.llama_internal_port
        )),
        AuthMode::Plaintext if cfg.network.publish => Some(format!(
            "{}:{}:{CONTAINER_PORT}",
            cfg.network.bind_host, cfg.network.port
        )),
        AuthMode::Plaintext => None,
    }
}

fn append_auth_sidecar(out: &mut String, cfg: &DeployConfig) {
    out.push('\n');
    out.push_str("  auth:\n");
    out.push_str(&format!("    image: {AUTH_IMAGE}\n"));
    out.push_str(&format!("    container_name: {AUTH_CONTAINER}\n"));
    out.push_str("    restart: unless-stopped\n");
    out.push_str(&format!(
        "    command: [\"python\", \"/app/{AUTH_SIDECAR_FILE}\"]\n"
    ));
    out.push_str("    environment:\n");
    out.push_str(&format!("      - TOKEN_HASHES_FILE=/secrets/{HASH_FILE}\n"));
    out.push_str(&format!("      - LISTEN_PORT={SIDECAR_CONTAINER_PORT}\n"));
    out.push_str("    volumes:\n");
    out.push_str(&format!(
        "      - ./auth/{AUTH_SIDECAR_FILE}:/app/{AUTH_SIDECAR_FILE}:ro\n"
    ));
    out.push_str("      - ./secrets:/secrets:ro\n");
    out.push_str("    ports:\n");
    out.push_str(&format!(
        "      - \"127.0.0.1:{}:{SIDECAR_CONTAINER_PORT}\"\n",
        cfg.sidecar_port
    ));
    out.push_str("    networks:\n");
    out.push_str(&format!("      - {INTERNAL_NETWORK}\n"));
}

/// Parameters of the nginx server block fronting llama-server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NginxSite {
    /// `listen` directive argument, e.g. `"127.0.0.1:8080"` or `"80"`.
    pub listen: String,
    pub server_name: Option<String>,
    pub upstream_port: u16,
    /// Set when requests must pass the auth sidecar first.
    pub sidecar_port: Option<u16>,
}

impl NginxSite {
    /// Local auth proxy on the public bind address (hashed mode, no domain).
    #[must_use]
    pub fn local(cfg: &DeployConfig) -> Self {
        Self {
            listen: format!("{}:{}", cfg.network.bind_host, cfg.network.port),
            server_name: None,
            upstream_port: cfg.upstream_port(),
            sidecar_port: cfg.behind_auth_proxy().then_some(cfg.sidecar_port),
        }
    }

    /// Port-80 site for `domain`; certbot adds the TLS listener.
    #[must_use]
    pub fn tls(cfg: &DeployConfig, domain: &str) -> Self {
        Self {
            listen: "80".to_string(),
            server_name: Some(domain.to_string()),
            upstream_port: cfg.upstream_port(),
            sidecar_port: cfg.behind_auth_proxy().then_some(cfg.sidecar_port),
        }
    }
}

/// Render the nginx site file.
#[must_use]
pub fn nginx_site(site: &NginxSite) -> String {
    let upstream = format!("http://127.0.0.1:{}", site.upstream_port);
    let mut out = String::from("# Generated by llama-deploy - DO NOT EDIT\n");
    out.push_str("server {\n");
    out.push_str(&format!("    listen {};\n", site.listen));
    if let Some(name) = &site.server_name {
        out.push_str(&format!("    server_name {name};\n"));
    }
    out.push_str("    client_max_body_size 64m;\n\n");

    if let Some(sidecar) = site.sidecar_port {
        out.push_str("    location = /auth {\n");
        out.push_str("        internal;\n");
        out.push_str(&format!(
            "        proxy_pass              http://127.0.0.1:{sidecar}/auth;\n"
        ));
        out.push_str("        proxy_pass_request_body off;\n");
        out.push_str("        proxy_set_header        Content-Length \"\";\n");
        out.push_str("        proxy_set_header        Authorization $http_authorization;\n");
        out.push_str("        proxy_set_header        X-Api-Key $http_x_api_key;\n");
        out.push_str("    }\n\n");

        out.push_str("    location = /health {\n");
        out.push_str(&format!("        proxy_pass         {upstream};\n"));
        out.push_str("    }\n\n");
    }

    out.push_str("    location / {\n");
    if site.sidecar_port.is_some() {
        out.push_str("        auth_request /auth;\n");
    }
    out.push_str(&format!("        proxy_pass         {upstream};\n"));
    out.push_str("        proxy_http_version 1.1;\n");
    out.push_str("        proxy_set_header   Host $host;\n");
    out.push_str("        proxy_set_header   X-Real-IP $remote_addr;\n");
    out.push_str("        proxy_set_header   X-Forwarded-For $proxy_add_x_forwarded_for;\n");
    out.push_str("        proxy_set_header   X-Forwarded-Proto $scheme;\n");
    out.push_str("        proxy_buffering    off;\n");
    out.push_str("        proxy_read_timeout 600s;\n");
    out.push_str("    }\n");
    out.push_str("}\n");
    out
}
