use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use remedi_chat::{EventContext, InboundEnvelope, InboundEvent};
use remedi_core::SubjectId;

use crate::bootstrap::AppController;

/// Provider webhook payload: exactly one event per call.
#[derive(Clone, Debug, Deserialize)]
pub struct WebhookPayload {
    pub message_id: String,
    pub from: String,
    #[serde(flatten)]
    pub event: WebhookEvent,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WebhookEvent {
    Text { body: String },
    InteractiveChoice { chosen_label: String },
    Image { media_ref: String, mime_type: String },
}

impl WebhookPayload {
    fn into_envelope(self) -> InboundEnvelope {
        let event = match self.event {
            WebhookEvent::Text { body } => InboundEvent::Text { body },
            WebhookEvent::InteractiveChoice { chosen_label } => {
                InboundEvent::InteractiveChoice { chosen_label }
            }
            WebhookEvent::Image { media_ref, mime_type } => {
                InboundEvent::Image { media_ref, mime_type }
            }
        };
        InboundEnvelope {
            message_id: self.message_id,
            subject_id: SubjectId(self.from),
            event,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    pub correlation_id: String,
}

#[derive(Clone)]
pub struct WebhookState {
    pub controller: Arc<AppController>,
}

pub fn router(controller: Arc<AppController>) -> Router {
    Router::new().route("/webhook", post(receive)).with_state(WebhookState { controller })
}

pub async fn spawn(
    bind_address: &str,
    port: u16,
    controller: Arc<AppController>,
) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.webhook.start",
        correlation_id = "bootstrap",
        subject_id = "unknown",
        bind_address = %address,
        "webhook endpoint started"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(controller)).await {
            error!(
                event_name = "system.webhook.error",
                correlation_id = "bootstrap",
                subject_id = "unknown",
                error = %error,
                "webhook server terminated unexpectedly"
            );
        }
    });

    Ok(())
}

/// One webhook call is one engine turn. The provider only needs an ack; turn
/// failures are logged with the correlation id and never leak detail.
pub async fn receive(
    State(state): State<WebhookState>,
    Json(payload): Json<WebhookPayload>,
) -> (StatusCode, Json<WebhookResponse>) {
    let correlation_id = format!("req-{}", Uuid::new_v4().simple());
    let ctx = EventContext::new(correlation_id.clone());
    let envelope = payload.into_envelope();
    let subject = envelope.subject_id.clone();

    match state.controller.handle(&envelope, &ctx).await {
        Ok(outcome) => {
            info!(
                event_name = "chat.turn_processed",
                correlation_id = %correlation_id,
                subject_id = %subject,
                outcome = ?outcome,
                "inbound event processed"
            );
            (StatusCode::OK, Json(WebhookResponse { status: "accepted", correlation_id }))
        }
        Err(error) => {
            warn!(
                event_name = "chat.turn_failed",
                correlation_id = %correlation_id,
                subject_id = %subject,
                error = %error,
                "inbound event failed"
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(WebhookResponse { status: "error", correlation_id }),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{WebhookEvent, WebhookPayload};

    #[test]
    fn text_payloads_deserialize() {
        let payload: WebhookPayload = serde_json::from_str(
            r#"{"message_id":"m-1","from":"27820000001","kind":"text","body":"hi"}"#,
        )
        .expect("decode");

        assert!(matches!(payload.event, WebhookEvent::Text { ref body } if body == "hi"));
        let envelope = payload.into_envelope();
        assert_eq!(envelope.subject_id.0, "27820000001");
    }

    #[test]
    fn image_payloads_carry_the_media_reference() {
        let payload: WebhookPayload = serde_json::from_str(
            r#"{"message_id":"m-2","from":"27820000001","kind":"image","media_ref":"md-9","mime_type":"image/png"}"#,
        )
        .expect("decode");

        assert!(matches!(
            payload.event,
            WebhookEvent::Image { ref media_ref, .. } if media_ref == "md-9"
        ));
    }

    #[test]
    fn unknown_kinds_are_rejected_at_the_edge() {
        let result = serde_json::from_str::<WebhookPayload>(
            r#"{"message_id":"m-3","from":"27820000001","kind":"sticker"}"#,
        );
        assert!(result.is_err());
    }
}
