use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use serde::Serialize;
use stripe::Webhook;
use tracing::{error, warn};

use crate::web::AppState;
use crate::webhook_pipeline::{GivingEvent, ProcessOutcome};

use super::check_rate_limit;

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// POST /api/webhook
/// Handle incoming Stripe webhook events.
///
/// Responses follow the acknowledge-once contract: anything before the event
/// is durably recorded may be a non-200 so the sender retries; once recorded,
/// the answer is 200 even when the effects failed.
pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if let Err(response) = check_rate_limit(&state.limits.webhook, &headers) {
        return response;
    }

    let (stripe_config, processor) = match (&state.stripe_config, &state.processor) {
        (Some(config), Some(processor)) => (config.clone(), processor.clone()),
        _ => {
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    };

    metrics::counter!("shiloh.webhooks.received").increment(1);
    let start = std::time::Instant::now();

    let signature = match headers.get("Stripe-Signature") {
        Some(sig) => match sig.to_str() {
            Ok(s) => s.to_string(),
            Err(_) => {
                metrics::counter!("shiloh.webhooks.signature_invalid").increment(1);
                return StatusCode::BAD_REQUEST.into_response();
            }
        },
        None => {
            metrics::counter!("shiloh.webhooks.signature_invalid").increment(1);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let payload = match std::str::from_utf8(&body) {
        Ok(s) => s,
        Err(_) => {
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    // Signature gate. Nothing past this line runs for unverified payloads.
    let event = match Webhook::construct_event(payload, &signature, &stripe_config.webhook_secret) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Invalid webhook signature");
            metrics::counter!("shiloh.webhooks.signature_invalid").increment(1);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let event_id = event.id.to_string();
    let event_type = event.type_.to_string();
    let giving_event = GivingEvent::from_stripe(&event);
    let raw_payload = serde_json::to_value(&event).unwrap_or_default();

    let outcome = match processor
        .process(&event_id, &event_type, raw_payload, giving_event)
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            // The event never made it into the ledger; a retry can succeed.
            error!(event_id = %event_id, error = %e, "Failed to record webhook event");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let duration_ms = start.elapsed().as_millis() as f64;
    metrics::histogram!("shiloh.webhooks.processing_ms").record(duration_ms);

    let ack = match outcome {
        ProcessOutcome::Processed => WebhookAck {
            received: true,
            message: None,
        },
        ProcessOutcome::AlreadyProcessed => WebhookAck {
            received: true,
            message: Some("Event already processed".to_string()),
        },
        ProcessOutcome::RecordedError(_) => WebhookAck {
            received: true,
            message: Some("Event recorded; processing deferred".to_string()),
        },
    };

    (StatusCode::OK, Json(ack)).into_response()
}
