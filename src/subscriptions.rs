use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// API model for recurring giving subscriptions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub stripe_subscription_id: String,
    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
    pub interval: Option<String>,
    pub donor_name: Option<String>,
    pub donor_email: Option<String>,
    pub purpose: Option<String>,
    pub status: String,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub last_payment_failed: bool,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Diesel model for the subscriptions table
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::subscriptions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SubscriptionModel {
    pub id: Uuid,
    pub stripe_subscription_id: String,
    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
    pub interval: Option<String>,
    pub donor_name: Option<String>,
    pub donor_email: Option<String>,
    pub purpose: Option<String>,
    pub status: String,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub last_payment_failed: bool,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Upsert model keyed by the processor's subscription id. Lifecycle events
/// can arrive out of order, so every field the event carries is written.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::subscriptions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewSubscription {
    pub stripe_subscription_id: String,
    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
    pub interval: Option<String>,
    pub donor_name: Option<String>,
    pub donor_email: Option<String>,
    pub purpose: Option<String>,
    pub status: String,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
}

/// Diesel model for the recurring_payments table, one row per invoice
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::recurring_payments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct RecurringPaymentModel {
    pub id: Uuid,
    pub stripe_invoice_id: String,
    pub stripe_subscription_id: String,
    pub stripe_charge_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub status: String,
    pub paid_at: Option<DateTime<Utc>>,
    pub failure_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Insert model for recurring payments; duplicate invoices are dropped
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::recurring_payments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewRecurringPayment {
    pub stripe_invoice_id: String,
    pub stripe_subscription_id: String,
    pub stripe_charge_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub status: String,
    pub paid_at: Option<DateTime<Utc>>,
    pub failure_message: Option<String>,
}

impl From<SubscriptionModel> for Subscription {
    fn from(model: SubscriptionModel) -> Self {
        Self {
            id: model.id,
            stripe_subscription_id: model.stripe_subscription_id,
            amount_cents: model.amount_cents,
            currency: model.currency,
            interval: model.interval,
            donor_name: model.donor_name,
            donor_email: model.donor_email,
            purpose: model.purpose,
            status: model.status,
            current_period_start: model.current_period_start,
            current_period_end: model.current_period_end,
            canceled_at: model.canceled_at,
            last_payment_failed: model.last_payment_failed,
            failure_reason: model.failure_reason,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}
