//! Registry reached over HTTP.

use super::{resolve_existing, RegistrationOutcome, RegistrationRecord, RegistrationRequest, RegistryClient};
use crate::errors::RegistryError;
use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

/// Client for a registry exposing `PUT/GET {base}/models/{name}/versions/{version}`.
///
/// Creation uses `If-None-Match: *`, so the server refuses to overwrite an
/// existing version and answers 409 or 412 instead.
#[derive(Debug, Clone)]
pub struct HttpRegistry {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRegistry {
    /// Creates a client for `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Creates a client using a preconfigured HTTP client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn version_url(&self, name: &str, version: &str) -> String {
        format!("{}/models/{name}/versions/{version}", self.base_url)
    }
}

fn classify_status(status: StatusCode, context: &str) -> RegistryError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RegistryError::Unavailable(format!("{context}: HTTP {status}"))
    } else {
        RegistryError::Invalid(format!("{context}: HTTP {status}"))
    }
}

fn transport(err: reqwest::Error) -> RegistryError {
    RegistryError::Unavailable(err.to_string())
}

#[async_trait]
impl RegistryClient for HttpRegistry {
    async fn register(&self, request: &RegistrationRequest) -> Result<RegistrationOutcome, RegistryError> {
        request.validate()?;
        let record = request.clone().into_record();

        let response = self
            .client
            .put(self.version_url(&request.name, &request.version))
            .header("If-None-Match", "*")
            .json(&record)
            .send()
            .await
            .map_err(transport)?;

        match response.status() {
            StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => {
                let existing = self
                    .lookup(&request.name, &request.version)
                    .await?
                    .ok_or_else(|| {
                        RegistryError::Unavailable("registry reported a conflict but has no record".into())
                    })?;
                resolve_existing(existing, request)
            }
            s if s.is_success() => {
                debug!(name = %request.name, version = %request.version, "Registered model version");
                let record = response.json().await.unwrap_or(record);
                Ok(RegistrationOutcome {
                    record,
                    created: true,
                })
            }
            s => Err(classify_status(s, "register")),
        }
    }

    async fn lookup(&self, name: &str, version: &str) -> Result<Option<RegistrationRecord>, RegistryError> {
        let response = self
            .client
            .get(self.version_url(name, version))
            .send()
            .await
            .map_err(transport)?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => response
                .json()
                .await
                .map(Some)
                .map_err(|e| RegistryError::Invalid(format!("malformed registry record: {e}"))),
            s => Err(classify_status(s, "lookup")),
        }
    }
}
