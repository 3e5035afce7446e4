//! Credential lookup.
//!
//! A [`SecretStore`] returns the raw secret string, normally a JSON object
//! `{"token": "..."}`. [`SecretProvider`] turns that into an optional token
//! and never fails: a missing or unreadable secret resolves to `None`.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("secret {0:?} not found")]
    NotFound(String),

    #[error("failed to read secret {name:?}: {message}")]
    Backend { name: String, message: String },
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret(&self, name: &str) -> Result<String, SecretError>;
}

#[derive(Deserialize)]
struct SecretPayload {
    token: String,
}

/// Resolves named tokens at call time.
#[derive(Clone)]
pub struct SecretProvider {
    store: std::sync::Arc<dyn SecretStore>,
}

impl SecretProvider {
    pub fn new(store: std::sync::Arc<dyn SecretStore>) -> Self {
        Self { store }
    }

    /// Token for `name`, or `None` if it is missing, empty or unparseable.
    pub async fn resolve(&self, name: &str) -> Option<String> {
        match self.store.get_secret(name).await {
            Ok(raw) => {
                let token = parse_token(&raw);
                if token.is_none() {
                    tracing::warn!(secret = name, "Secret present but holds no token");
                }
                token
            }
            Err(SecretError::NotFound(_)) => {
                tracing::info!(secret = name, "Secret not configured, proceeding without it");
                None
            }
            Err(e) => {
                tracing::warn!(secret = name, error = %e, "Secret lookup failed");
                None
            }
        }
    }
}

fn parse_token(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let token = if raw.starts_with('{') {
        serde_json::from_str::<SecretPayload>(raw).ok()?.token
    } else {
        raw.to_string()
    };
    let token = token.trim().to_string();
    (!token.is_empty()).then_some(token)
}

/// Reads secrets from environment variables: `github-token` → `GITHUB_TOKEN`.
#[derive(Debug, Default)]
pub struct EnvSecretStore;

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn get_secret(&self, name: &str) -> Result<String, SecretError> {
        let var = name.to_ascii_uppercase().replace('-', "_");
        std::env::var(&var).map_err(|_| SecretError::NotFound(name.to_string()))
    }
}

/// Reads secrets from files named after the secret (e.g. `/run/secrets`).
#[derive(Debug)]
pub struct FileSecretStore {
    dir: PathBuf,
}

impl FileSecretStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn get_secret(&self, name: &str) -> Result<String, SecretError> {
        if name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(SecretError::NotFound(name.to_string()));
        }
        match tokio::fs::read_to_string(self.dir.join(name)).await {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SecretError::NotFound(name.to_string()))
            }
            Err(e) => Err(SecretError::Backend {
                name: name.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

/// Fixed secrets, for tests and local runs.
#[derive(Debug, Default)]
pub struct StaticSecretStore {
    secrets: HashMap<String, String>,
}

impl StaticSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.secrets.insert(name.to_string(), value.to_string());
        self
    }
}

#[async_trait]
impl SecretStore for StaticSecretStore {
    async fn get_secret(&self, name: &str) -> Result<String, SecretError> {
        self.secrets
            .get(name)
            .cloned()
            .ok_or_else(|| SecretError::NotFound(name.to_string()))
    }
}
