use anyhow::Result;
use async_trait::async_trait;
use diesel::prelude::*;
use diesel::sql_types::{Nullable, Text};
use diesel::upsert::excluded;

use crate::donations::{Donation, DonationModel, DonationStatus, NewDonation};
use crate::web::PgPool;

diesel::define_sql_function! {
    fn coalesce(x: Nullable<Text>, y: Nullable<Text>) -> Nullable<Text>;
}

/// Persistence seam for one-time donations. The webhook pipeline talks to
/// this trait so its handlers can be exercised against an in-memory store.
#[async_trait]
pub trait DonationsStore: Send + Sync {
    async fn get_by_payment_intent_id(&self, payment_intent_id: &str)
    -> Result<Option<Donation>>;

    /// Insert or refresh the row for a payment intent. Replayed or
    /// out-of-order events converge on the same row: donor details from
    /// either event are kept, and a refunded row keeps its terminal status.
    async fn upsert(&self, donation: NewDonation) -> Result<Donation>;

    /// Update status and failure message by payment intent id. Rows already
    /// marked refunded keep their terminal status.
    async fn update_status(
        &self,
        payment_intent_id: &str,
        status: DonationStatus,
        failure_message: Option<String>,
    ) -> Result<Option<Donation>>;

    /// Record a refund against an existing donation.
    async fn record_refund(
        &self,
        payment_intent_id: &str,
        refund_amount_cents: i64,
    ) -> Result<Option<Donation>>;
}

#[derive(Clone)]
pub struct DonationsRepository {
    pool: PgPool,
}

impl DonationsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DonationsStore for DonationsRepository {
    async fn get_by_payment_intent_id(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<Donation>> {
        use crate::schema::donations::dsl;

        let pool = self.pool.clone();
        let payment_intent_id = payment_intent_id.to_string();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let donation: Option<DonationModel> = dsl::donations
                .filter(dsl::stripe_payment_intent_id.eq(&payment_intent_id))
                .first::<DonationModel>(&mut conn)
                .optional()?;

            Ok::<Option<DonationModel>, anyhow::Error>(donation)
        })
        .await??;

        Ok(result.map(|model| model.into()))
    }

    async fn upsert(&self, donation: NewDonation) -> Result<Donation> {
        use crate::schema::donations::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            // Donor details arrive on whichever event carries them (the
            // checkout session for checkout-originated gifts), so the
            // conflict update keeps existing values instead of nulling
            // them. Refunded is terminal; the WHERE clause leaves such
            // rows untouched.
            let upserted: Option<DonationModel> = diesel::query_dsl::methods::FilterDsl::filter(
                diesel::insert_into(dsl::donations)
                    .values(&donation)
                    .on_conflict(dsl::stripe_payment_intent_id)
                    .do_update()
                    .set((
                        dsl::stripe_charge_id.eq(coalesce(
                            excluded(dsl::stripe_charge_id),
                            dsl::stripe_charge_id,
                        )),
                        dsl::donor_name.eq(coalesce(excluded(dsl::donor_name), dsl::donor_name)),
                        dsl::donor_email.eq(coalesce(excluded(dsl::donor_email), dsl::donor_email)),
                        dsl::message.eq(coalesce(excluded(dsl::message), dsl::message)),
                        dsl::purpose.eq(coalesce(excluded(dsl::purpose), dsl::purpose)),
                        dsl::status.eq(donation.status),
                        dsl::failure_message.eq(&donation.failure_message),
                        dsl::updated_at.eq(diesel::dsl::now),
                    )),
                dsl::status.ne(DonationStatus::Refunded),
            )
            .get_result(&mut conn)
            .optional()?;

            let row = match upserted {
                Some(row) => row,
                // The conflict update was skipped because the row is
                // refunded; return it as stored.
                None => dsl::donations
                    .filter(dsl::stripe_payment_intent_id.eq(&donation.stripe_payment_intent_id))
                    .first::<DonationModel>(&mut conn)?,
            };

            Ok::<DonationModel, anyhow::Error>(row)
        })
        .await??;

        Ok(result.into())
    }

    async fn update_status(
        &self,
        payment_intent_id: &str,
        status: DonationStatus,
        failure_message: Option<String>,
    ) -> Result<Option<Donation>> {
        use crate::schema::donations;

        let pool = self.pool.clone();
        let payment_intent_id = payment_intent_id.to_string();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let updated: Option<DonationModel> = diesel::update(donations::table)
                .filter(donations::stripe_payment_intent_id.eq(&payment_intent_id))
                .filter(donations::status.ne(DonationStatus::Refunded))
                .set((
                    donations::status.eq(status),
                    donations::failure_message.eq(&failure_message),
                    donations::updated_at.eq(diesel::dsl::now),
                ))
                .get_result(&mut conn)
                .optional()?;

            Ok::<Option<DonationModel>, anyhow::Error>(updated)
        })
        .await??;

        Ok(result.map(|model| model.into()))
    }

    async fn record_refund(
        &self,
        payment_intent_id: &str,
        refund_amount_cents: i64,
    ) -> Result<Option<Donation>> {
        use crate::schema::donations;

        let pool = self.pool.clone();
        let payment_intent_id = payment_intent_id.to_string();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let updated: Option<DonationModel> = diesel::update(donations::table)
                .filter(donations::stripe_payment_intent_id.eq(&payment_intent_id))
                .set((
                    donations::status.eq(DonationStatus::Refunded),
                    donations::refunded.eq(true),
                    donations::refund_amount_cents.eq(Some(refund_amount_cents)),
                    donations::refunded_at.eq(diesel::dsl::now),
                    donations::updated_at.eq(diesel::dsl::now),
                ))
                .get_result(&mut conn)
                .optional()?;

            Ok::<Option<DonationModel>, anyhow::Error>(updated)
        })
        .await??;

        Ok(result.map(|model| model.into()))
    }
}
