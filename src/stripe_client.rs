use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::http::StatusCode;
use stripe::{Client, PaymentIntent, PaymentIntentId, Subscription, SubscriptionId};

use crate::webhook_pipeline::{PaymentIntentFacts, SubscriptionFacts};

/// Configuration for Stripe integration
#[derive(Clone)]
pub struct StripeConfig {
    pub client: Client,
    pub webhook_secret: String,
    /// Frontend origin used for checkout redirect URLs.
    pub base_url: String,
}

impl StripeConfig {
    /// Initialize Stripe configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let secret_key =
            std::env::var("STRIPE_SECRET_KEY").context("STRIPE_SECRET_KEY must be set")?;
        let webhook_secret =
            std::env::var("STRIPE_WEBHOOK_SECRET").context("STRIPE_WEBHOOK_SECRET must be set")?;
        let base_url =
            std::env::var("BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());

        let client = Client::new(secret_key);

        Ok(Self {
            client,
            webhook_secret,
            base_url,
        })
    }
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("webhook_secret", &"[REDACTED]")
            .finish()
    }
}

/// Outbound calls the webhook pipeline makes back to the payment processor
/// to enrich sparse events, already reduced to plain facts. Behind a trait
/// so handlers can be tested without network access.
#[async_trait]
pub trait ProcessorGateway: Send + Sync {
    async fn retrieve_subscription(&self, subscription_id: &str) -> Result<SubscriptionFacts>;
    async fn retrieve_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<PaymentIntentFacts>;
}

#[derive(Clone)]
pub struct StripeGateway {
    client: Client,
}

impl StripeGateway {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProcessorGateway for StripeGateway {
    async fn retrieve_subscription(&self, subscription_id: &str) -> Result<SubscriptionFacts> {
        let id: SubscriptionId = subscription_id
            .parse()
            .context("invalid subscription id")?;
        let subscription = Subscription::retrieve(&self.client, &id, &[]).await?;
        Ok(SubscriptionFacts::from_subscription(&subscription))
    }

    async fn retrieve_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<PaymentIntentFacts> {
        let id: PaymentIntentId = payment_intent_id
            .parse()
            .context("invalid payment intent id")?;
        let payment_intent = PaymentIntent::retrieve(&self.client, &id, &[]).await?;
        Ok(PaymentIntentFacts::from_payment_intent(&payment_intent))
    }
}

/// Map a Stripe API error onto the status the client should see. Card
/// declines surface as 402 so the frontend can prompt for another method.
pub fn map_processor_error(err: &stripe::StripeError) -> (StatusCode, String) {
    if let stripe::StripeError::Stripe(request_error) = err {
        let message = request_error
            .message
            .clone()
            .unwrap_or_else(|| "Payment request failed".to_string());
        let status = match request_error.error_type {
            stripe::ErrorType::Authentication => StatusCode::UNAUTHORIZED,
            stripe::ErrorType::InvalidRequest => StatusCode::BAD_REQUEST,
            stripe::ErrorType::Card => StatusCode::PAYMENT_REQUIRED,
            stripe::ErrorType::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        return (status, message);
    }

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Payment processor unavailable".to_string(),
    )
}
