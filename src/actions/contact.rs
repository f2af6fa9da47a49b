use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use serde::Serialize;
use tracing::{error, info};

use crate::validations::ContactRequest;
use crate::web::AppState;

use super::{DataResponse, check_rate_limit, json_error};

#[derive(Debug, Serialize)]
pub struct ContactAck {
    pub sent: bool,
}

/// POST /api/contact
/// Validate a contact form submission and forward it to the office inbox
pub async fn submit_contact(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ContactRequest>,
) -> impl IntoResponse {
    if let Err(response) = check_rate_limit(&state.limits.contact, &headers) {
        return response;
    }

    let validated = match request.validate() {
        Ok(v) => v,
        Err(message) => {
            return json_error(StatusCode::BAD_REQUEST, &message);
        }
    };

    match state
        .notifier
        .contact_message(
            &validated.name,
            &validated.email,
            validated.phone.as_deref(),
            &validated.subject,
            &validated.message,
            &validated.message_type,
        )
        .await
    {
        Ok(()) => {
            info!(message_type = %validated.message_type, "contact message forwarded");
            metrics::counter!("shiloh.contact.submitted").increment(1);
            Json(DataResponse {
                data: ContactAck { sent: true },
            })
            .into_response()
        }
        Err(e) => {
            error!(error = %e, "Failed to forward contact message");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to send your message, please try again later",
            )
        }
    }
}
