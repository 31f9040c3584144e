use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use thiserror::Error;

use remedi_core::SubjectId;

use crate::prompts::OutboundPrompt;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("provider rejected the message: {0}")]
    Rejected(String),
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Outbound half of the messaging provider. Sends are fire-and-forget from
/// the engine's perspective: failures are logged by the caller and never
/// retried or rolled back.
#[async_trait]
pub trait PromptSender: Send + Sync {
    async fn send(&self, subject: &SubjectId, prompt: &OutboundPrompt) -> Result<(), SendError>;
}

#[derive(Default)]
pub struct NoopPromptSender;

#[async_trait]
impl PromptSender for NoopPromptSender {
    async fn send(&self, _subject: &SubjectId, _prompt: &OutboundPrompt) -> Result<(), SendError> {
        Ok(())
    }
}

/// Test double that records every prompt in order.
#[derive(Clone, Default)]
pub struct RecordingPromptSender {
    sent: Arc<Mutex<Vec<(SubjectId, OutboundPrompt)>>>,
}

impl RecordingPromptSender {
    pub fn sent(&self) -> Vec<(SubjectId, OutboundPrompt)> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn bodies(&self) -> Vec<String> {
        self.sent().into_iter().map(|(_, prompt)| prompt.body().to_owned()).collect()
    }

    pub fn clear(&self) {
        match self.sent.lock() {
            Ok(mut sent) => sent.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

#[async_trait]
impl PromptSender for RecordingPromptSender {
    async fn send(&self, subject: &SubjectId, prompt: &OutboundPrompt) -> Result<(), SendError> {
        match self.sent.lock() {
            Ok(mut sent) => sent.push((subject.clone(), prompt.clone())),
            Err(poisoned) => poisoned.into_inner().push((subject.clone(), prompt.clone())),
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    to: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    body: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<&'a [String]>,
}

/// HTTP sender posting to the provider's message endpoint.
pub struct HttpPromptSender {
    client: reqwest::Client,
    base_url: String,
    api_token: SecretString,
}

impl HttpPromptSender {
    pub fn new(
        base_url: impl Into<String>,
        api_token: SecretString,
        timeout: Duration,
    ) -> Result<Self, SendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| SendError::Transport(error.to_string()))?;
        Ok(Self { client, base_url: base_url.into(), api_token })
    }
}

#[async_trait]
impl PromptSender for HttpPromptSender {
    async fn send(&self, subject: &SubjectId, prompt: &OutboundPrompt) -> Result<(), SendError> {
        let request = match prompt {
            OutboundPrompt::Text { body } => {
                SendMessageRequest { to: &subject.0, kind: "text", body, options: None }
            }
            OutboundPrompt::Choice { body, options } => SendMessageRequest {
                to: &subject.0,
                kind: "choice",
                body,
                options: Some(options.as_slice()),
            },
        };

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .bearer_auth(self.api_token.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|error| SendError::Transport(error.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            Err(SendError::Rejected(format!("{status}: {detail}")))
        }
    }
}
