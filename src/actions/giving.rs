use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use serde::Serialize;
use stripe::{
    CheckoutSession, CreateCheckoutSession, CreateCheckoutSessionLineItems,
    CreateCheckoutSessionLineItemsPriceData, CreateCheckoutSessionLineItemsPriceDataProductData,
    CreateCheckoutSessionLineItemsPriceDataRecurring,
    CreateCheckoutSessionLineItemsPriceDataRecurringInterval,
    CreateCheckoutSessionSubscriptionData, CreatePaymentIntent,
    CreatePaymentIntentAutomaticPaymentMethods, Currency, PaymentIntent,
};
use tracing::error;
use ts_rs::TS;

use crate::stripe_client::map_processor_error;
use crate::validations::{DonationRequest, GivingFrequency, SubscriptionRequest};
use crate::web::AppState;

use super::{DataResponse, check_rate_limit, json_error};

/// Response for one-time donation intents
#[derive(Debug, Serialize, TS)]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntentResponse {
    pub client_secret: String,
}

/// Response for recurring giving checkout
#[derive(Debug, Serialize, TS)]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub checkout_url: String,
}

/// Redirect targets after a checkout session finishes, derived from the
/// frontend origin configured at startup.
fn checkout_urls(base_url: &str) -> (String, String) {
    let base = base_url.trim_end_matches('/');
    (format!("{base}/giving/success"), format!("{base}/giving"))
}

fn giving_metadata(
    name: Option<&str>,
    email: Option<&str>,
    message: Option<&str>,
    purpose: &str,
    frequency: Option<&str>,
) -> stripe::Metadata {
    let mut metadata = stripe::Metadata::new();
    if let Some(name) = name {
        metadata.insert("name".to_string(), name.to_string());
    }
    if let Some(email) = email {
        metadata.insert("email".to_string(), email.to_string());
    }
    if let Some(message) = message {
        metadata.insert("message".to_string(), message.to_string());
    }
    metadata.insert("purpose".to_string(), purpose.to_string());
    if let Some(frequency) = frequency {
        metadata.insert("frequency".to_string(), frequency.to_string());
    }
    metadata
}

/// POST /api/giving/payment-intent
/// Create a one-time donation payment intent
pub async fn create_payment_intent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<DonationRequest>,
) -> impl IntoResponse {
    if let Err(response) = check_rate_limit(&state.limits.payment, &headers) {
        return response;
    }

    let stripe_config = match &state.stripe_config {
        Some(config) => config.clone(),
        None => {
            return json_error(StatusCode::SERVICE_UNAVAILABLE, "Giving is not configured");
        }
    };

    let validated = match request.validate() {
        Ok(v) => v,
        Err(message) => {
            return json_error(StatusCode::BAD_REQUEST, &message);
        }
    };

    let mut params = CreatePaymentIntent::new(validated.amount_cents, Currency::USD);
    params.automatic_payment_methods = Some(CreatePaymentIntentAutomaticPaymentMethods {
        enabled: true,
        allow_redirects: None,
    });
    params.receipt_email = validated.email.as_deref();
    params.metadata = Some(giving_metadata(
        validated.name.as_deref(),
        validated.email.as_deref(),
        validated.message.as_deref(),
        &validated.purpose,
        None,
    ));

    match PaymentIntent::create(&stripe_config.client, params).await {
        Ok(intent) => {
            metrics::counter!("shiloh.giving.intents_created").increment(1);
            match intent.client_secret {
                Some(client_secret) => Json(DataResponse {
                    data: PaymentIntentResponse { client_secret },
                })
                .into_response(),
                None => {
                    error!(payment_intent_id = %intent.id, "payment intent missing client secret");
                    json_error(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Failed to start donation",
                    )
                }
            }
        }
        Err(e) => {
            error!(error = %e, "Failed to create payment intent");
            metrics::counter!("shiloh.stripe.api_errors").increment(1);
            let (status, message) = map_processor_error(&e);
            json_error(status, &message)
        }
    }
}

/// POST /api/giving/subscription
/// Create a recurring giving checkout session
pub async fn create_subscription(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SubscriptionRequest>,
) -> impl IntoResponse {
    if let Err(response) = check_rate_limit(&state.limits.payment, &headers) {
        return response;
    }

    let stripe_config = match &state.stripe_config {
        Some(config) => config.clone(),
        None => {
            return json_error(StatusCode::SERVICE_UNAVAILABLE, "Giving is not configured");
        }
    };

    let validated = match request.validate() {
        Ok(v) => v,
        Err(message) => {
            return json_error(StatusCode::BAD_REQUEST, &message);
        }
    };

    let (success_url, cancel_url) = checkout_urls(&stripe_config.base_url);

    let interval = match validated.frequency {
        GivingFrequency::Weekly => CreateCheckoutSessionLineItemsPriceDataRecurringInterval::Week,
        GivingFrequency::Monthly => CreateCheckoutSessionLineItemsPriceDataRecurringInterval::Month,
    };

    let metadata = giving_metadata(
        validated.name.as_deref(),
        validated.email.as_deref(),
        None,
        &validated.purpose,
        Some(validated.frequency.as_str()),
    );

    let mut checkout_params = CreateCheckoutSession::new();
    checkout_params.success_url = Some(&success_url);
    checkout_params.cancel_url = Some(&cancel_url);
    checkout_params.mode = Some(stripe::CheckoutSessionMode::Subscription);
    checkout_params.customer_email = validated.email.as_deref();
    checkout_params.line_items = Some(vec![CreateCheckoutSessionLineItems {
        price_data: Some(CreateCheckoutSessionLineItemsPriceData {
            currency: Currency::USD,
            product_data: Some(CreateCheckoutSessionLineItemsPriceDataProductData {
                name: format!("{} giving ({})", validated.purpose, validated.frequency.as_str()),
                ..Default::default()
            }),
            unit_amount: Some(validated.amount_cents),
            recurring: Some(CreateCheckoutSessionLineItemsPriceDataRecurring {
                interval,
                interval_count: Some(1),
            }),
            ..Default::default()
        }),
        quantity: Some(1),
        ..Default::default()
    }]);
    // Copy the donor details onto the subscription so lifecycle events
    // carry them without another API call.
    checkout_params.subscription_data = Some(CreateCheckoutSessionSubscriptionData {
        metadata: Some(metadata.clone().into_iter().collect()),
        ..Default::default()
    });
    checkout_params.metadata = Some(metadata);

    match CheckoutSession::create(&stripe_config.client, checkout_params).await {
        Ok(session) => {
            metrics::counter!("shiloh.giving.subscriptions_created").increment(1);
            match session.url {
                Some(checkout_url) => Json(DataResponse {
                    data: CheckoutResponse { checkout_url },
                })
                .into_response(),
                None => {
                    error!("checkout session missing redirect url");
                    json_error(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Failed to start recurring giving",
                    )
                }
            }
        }
        Err(e) => {
            error!(error = %e, "Failed to create checkout session");
            metrics::counter!("shiloh.stripe.api_errors").increment(1);
            let (status, message) = map_processor_error(&e);
            json_error(status, &message)
        }
    }
}
