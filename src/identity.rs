use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::config::AuthConfig;

/// The boundary treats every variant as "unauthorized": a caller that
/// cannot be positively verified is never let through.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("credential rejected")]
    InvalidCredential,

    #[error("identity verifier unavailable: {0}")]
    Upstream(String),
}

#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub uid: String,
    pub handle: Option<String>,
}

/// Turns an inbound bearer credential into a trusted caller identity.
/// The verifier itself is an external collaborator; this service only
/// consumes the interface.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, credential: &str) -> Result<CallerIdentity, IdentityError>;
}

pub fn build_verifier(config: &AuthConfig) -> Arc<dyn IdentityVerifier> {
    match &config.verifier_url {
        Some(url) => Arc::new(HttpIdentityVerifier::new(
            url.clone(),
            config.service_token.clone(),
        )),
        None => Arc::new(StaticTokenVerifier::from_config(&config.static_tokens)),
    }
}

/// Resolves credentials against a remote verification endpoint.
pub struct HttpIdentityVerifier {
    client: reqwest::Client,
    verify_url: String,
    service_token: Option<SecretString>,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    uid: String,
    #[serde(default)]
    handle: Option<String>,
}

impl HttpIdentityVerifier {
    pub fn new(verify_url: String, service_token: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            verify_url,
            service_token: service_token.map(SecretString::from),
        }
    }
}

#[async_trait]
impl IdentityVerifier for HttpIdentityVerifier {
    async fn verify(&self, credential: &str) -> Result<CallerIdentity, IdentityError> {
        let mut request = self
            .client
            .post(&self.verify_url)
            .json(&serde_json::json!({ "token": credential }));
        if let Some(token) = &self.service_token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| IdentityError::Upstream(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(IdentityError::InvalidCredential);
        }
        if !status.is_success() {
            return Err(IdentityError::Upstream(format!(
                "verifier returned {status}"
            )));
        }

        let body: VerifyResponse = response
            .json()
            .await
            .map_err(|e| IdentityError::Upstream(e.to_string()))?;
        if body.uid.is_empty() {
            return Err(IdentityError::InvalidCredential);
        }

        debug!(uid = %body.uid, "credential verified");
        Ok(CallerIdentity {
            uid: body.uid,
            handle: body.handle,
        })
    }
}

/// Fixed token table for development and tests.
pub struct StaticTokenVerifier {
    identities: HashMap<String, CallerIdentity>,
}

impl StaticTokenVerifier {
    pub fn new(identities: HashMap<String, CallerIdentity>) -> Self {
        Self { identities }
    }

    pub fn from_config(tokens: &HashMap<String, crate::config::StaticIdentity>) -> Self {
        let identities = tokens
            .iter()
            .map(|(token, identity)| {
                (
                    token.clone(),
                    CallerIdentity {
                        uid: identity.uid.clone(),
                        handle: identity.handle.clone(),
                    },
                )
            })
            .collect();
        Self { identities }
    }
}

#[async_trait]
impl IdentityVerifier for StaticTokenVerifier {
    async fn verify(&self, credential: &str) -> Result<CallerIdentity, IdentityError> {
        self.identities
            .get(credential)
            .cloned()
            .ok_or(IdentityError::InvalidCredential)
    }
}
