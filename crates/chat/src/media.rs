use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;

use remedi_core::MediaItem;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// The provider knows nothing about this reference, or the binary is
    /// gone. Distinguishable so the validator can treat it as recoverable.
    #[error("media `{0}` is unavailable")]
    Unavailable(String),
    #[error("media endpoint failure: {0}")]
    Endpoint(String),
}

/// External media collaborator. Resolution and download both run against the
/// provider with a bounded timeout; the engine treats any failure here as a
/// validation failure for the current step.
#[async_trait]
pub trait MediaResolver: Send + Sync {
    async fn resolve_url(&self, media_ref: &str) -> Result<String, MediaError>;
    async fn download(&self, url: &str) -> Result<MediaItem, MediaError>;
}

#[derive(Default)]
pub struct NoopMediaResolver;

#[async_trait]
impl MediaResolver for NoopMediaResolver {
    async fn resolve_url(&self, media_ref: &str) -> Result<String, MediaError> {
        Err(MediaError::Unavailable(media_ref.to_owned()))
    }

    async fn download(&self, url: &str) -> Result<MediaItem, MediaError> {
        Err(MediaError::Unavailable(url.to_owned()))
    }
}

/// Test double serving a fixed set of media references.
#[derive(Default)]
pub struct FixedMediaResolver {
    items: HashMap<String, MediaItem>,
}

impl FixedMediaResolver {
    pub fn with_item(mut self, media_ref: impl Into<String>, item: MediaItem) -> Self {
        self.items.insert(media_ref.into(), item);
        self
    }
}

#[async_trait]
impl MediaResolver for FixedMediaResolver {
    async fn resolve_url(&self, media_ref: &str) -> Result<String, MediaError> {
        if self.items.contains_key(media_ref) {
            Ok(format!("fixed://{media_ref}"))
        } else {
            Err(MediaError::Unavailable(media_ref.to_owned()))
        }
    }

    async fn download(&self, url: &str) -> Result<MediaItem, MediaError> {
        let media_ref = url.strip_prefix("fixed://").unwrap_or(url);
        self.items
            .get(media_ref)
            .cloned()
            .ok_or_else(|| MediaError::Unavailable(media_ref.to_owned()))
    }
}

#[derive(Deserialize)]
struct ResolveUrlResponse {
    url: String,
}

/// HTTP resolver against the provider's media endpoint: one call to swap the
/// opaque reference for a short-lived URL, one to fetch the bytes.
pub struct HttpMediaResolver {
    client: reqwest::Client,
    base_url: String,
    api_token: SecretString,
}

impl HttpMediaResolver {
    pub fn new(
        base_url: impl Into<String>,
        api_token: SecretString,
        timeout: Duration,
    ) -> Result<Self, MediaError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| MediaError::Endpoint(error.to_string()))?;
        Ok(Self { client, base_url: base_url.into(), api_token })
    }
}

#[async_trait]
impl MediaResolver for HttpMediaResolver {
    async fn resolve_url(&self, media_ref: &str) -> Result<String, MediaError> {
        let response = self
            .client
            .get(format!("{}/media/{media_ref}", self.base_url))
            .bearer_auth(self.api_token.expose_secret())
            .send()
            .await
            .map_err(|error| MediaError::Endpoint(error.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(MediaError::Unavailable(media_ref.to_owned()));
        }
        if !response.status().is_success() {
            return Err(MediaError::Endpoint(format!("status {}", response.status())));
        }

        let payload: ResolveUrlResponse =
            response.json().await.map_err(|error| MediaError::Endpoint(error.to_string()))?;
        Ok(payload.url)
    }

    async fn download(&self, url: &str) -> Result<MediaItem, MediaError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(self.api_token.expose_secret())
            .send()
            .await
            .map_err(|error| MediaError::Endpoint(error.to_string()))?;

        if !response.status().is_success() {
            return Err(MediaError::Unavailable(url.to_owned()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(';').next().unwrap_or(value).trim().to_owned())
            .unwrap_or_else(|| "application/octet-stream".to_owned());

        let bytes = response
            .bytes()
            .await
            .map_err(|error| MediaError::Endpoint(error.to_string()))?;

        Ok(MediaItem { content_type, bytes: bytes.to_vec() })
    }
}
