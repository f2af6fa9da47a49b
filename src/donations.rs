use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_derive_enum::DbEnum;
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DbEnum, TS)]
#[db_enum(existing_type_path = "crate::schema::sql_types::DonationStatus")]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
#[serde(rename_all = "snake_case")]
pub enum DonationStatus {
    #[db_enum(rename = "pending")]
    Pending,
    #[db_enum(rename = "succeeded")]
    Succeeded,
    #[db_enum(rename = "failed")]
    Failed,
    #[db_enum(rename = "refunded")]
    Refunded,
}

/// API model for one-time donations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Donation {
    pub id: Uuid,
    pub stripe_payment_intent_id: String,
    pub stripe_charge_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub donor_name: Option<String>,
    pub donor_email: Option<String>,
    pub message: Option<String>,
    pub purpose: Option<String>,
    pub status: DonationStatus,
    pub failure_message: Option<String>,
    pub refunded: bool,
    pub refund_amount_cents: Option<i64>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Diesel model for the donations table
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::donations)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DonationModel {
    pub id: Uuid,
    pub stripe_payment_intent_id: String,
    pub stripe_charge_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub donor_name: Option<String>,
    pub donor_email: Option<String>,
    pub message: Option<String>,
    pub purpose: Option<String>,
    pub status: DonationStatus,
    pub failure_message: Option<String>,
    pub refunded: bool,
    pub refund_amount_cents: Option<i64>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert model for new donations; upserted by payment intent id so a
/// replayed event never creates a second row
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::donations)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewDonation {
    pub stripe_payment_intent_id: String,
    pub stripe_charge_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub donor_name: Option<String>,
    pub donor_email: Option<String>,
    pub message: Option<String>,
    pub purpose: Option<String>,
    pub status: DonationStatus,
    pub failure_message: Option<String>,
}

impl From<DonationModel> for Donation {
    fn from(model: DonationModel) -> Self {
        Self {
            id: model.id,
            stripe_payment_intent_id: model.stripe_payment_intent_id,
            stripe_charge_id: model.stripe_charge_id,
            amount_cents: model.amount_cents,
            currency: model.currency,
            donor_name: model.donor_name,
            donor_email: model.donor_email,
            message: model.message,
            purpose: model.purpose,
            status: model.status,
            failure_message: model.failure_message,
            refunded: model.refunded,
            refund_amount_cents: model.refund_amount_cents,
            refunded_at: model.refunded_at,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}
