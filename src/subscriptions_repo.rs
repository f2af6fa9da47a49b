use anyhow::Result;
use async_trait::async_trait;
use diesel::prelude::*;

use crate::subscriptions::{
    NewRecurringPayment, NewSubscription, Subscription, SubscriptionModel,
};
use crate::web::PgPool;

/// Persistence seam for recurring giving: the subscription lifecycle plus
/// the per-invoice payment trail.
#[async_trait]
pub trait SubscriptionsStore: Send + Sync {
    async fn get(&self, subscription_id: &str) -> Result<Option<Subscription>>;

    /// Insert or refresh the row for a processor subscription id.
    async fn upsert(&self, subscription: NewSubscription) -> Result<Subscription>;

    /// Flip the payment-health flag after an invoice settles or fails.
    async fn update_payment_status(
        &self,
        subscription_id: &str,
        last_payment_failed: bool,
        failure_reason: Option<String>,
    ) -> Result<Option<Subscription>>;

    /// Record one invoice outcome. Returns false when the invoice was
    /// already recorded.
    async fn record_recurring_payment(&self, payment: NewRecurringPayment) -> Result<bool>;
}

#[derive(Clone)]
pub struct SubscriptionsRepository {
    pool: PgPool,
}

impl SubscriptionsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionsStore for SubscriptionsRepository {
    async fn get(&self, subscription_id: &str) -> Result<Option<Subscription>> {
        use crate::schema::subscriptions::dsl;

        let pool = self.pool.clone();
        let subscription_id = subscription_id.to_string();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let subscription: Option<SubscriptionModel> = dsl::subscriptions
                .filter(dsl::stripe_subscription_id.eq(&subscription_id))
                .first::<SubscriptionModel>(&mut conn)
                .optional()?;

            Ok::<Option<SubscriptionModel>, anyhow::Error>(subscription)
        })
        .await??;

        Ok(result.map(|model| model.into()))
    }

    async fn upsert(&self, subscription: NewSubscription) -> Result<Subscription> {
        use crate::schema::subscriptions::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let upserted: SubscriptionModel = diesel::insert_into(dsl::subscriptions)
                .values(&subscription)
                .on_conflict(dsl::stripe_subscription_id)
                .do_update()
                .set((
                    dsl::amount_cents.eq(subscription.amount_cents),
                    dsl::currency.eq(&subscription.currency),
                    dsl::interval.eq(&subscription.interval),
                    dsl::status.eq(&subscription.status),
                    dsl::current_period_start.eq(subscription.current_period_start),
                    dsl::current_period_end.eq(subscription.current_period_end),
                    dsl::canceled_at.eq(subscription.canceled_at),
                    dsl::updated_at.eq(diesel::dsl::now),
                ))
                .get_result(&mut conn)?;

            Ok::<SubscriptionModel, anyhow::Error>(upserted)
        })
        .await??;

        Ok(result.into())
    }

    async fn update_payment_status(
        &self,
        subscription_id: &str,
        last_payment_failed: bool,
        failure_reason: Option<String>,
    ) -> Result<Option<Subscription>> {
        use crate::schema::subscriptions;

        let pool = self.pool.clone();
        let subscription_id = subscription_id.to_string();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let updated: Option<SubscriptionModel> = diesel::update(subscriptions::table)
                .filter(subscriptions::stripe_subscription_id.eq(&subscription_id))
                .set((
                    subscriptions::last_payment_failed.eq(last_payment_failed),
                    subscriptions::failure_reason.eq(&failure_reason),
                    subscriptions::updated_at.eq(diesel::dsl::now),
                ))
                .get_result(&mut conn)
                .optional()?;

            Ok::<Option<SubscriptionModel>, anyhow::Error>(updated)
        })
        .await??;

        Ok(result.map(|model| model.into()))
    }

    async fn record_recurring_payment(&self, payment: NewRecurringPayment) -> Result<bool> {
        use crate::schema::recurring_payments::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let inserted = diesel::insert_into(dsl::recurring_payments)
                .values(&payment)
                .on_conflict(dsl::stripe_invoice_id)
                .do_nothing()
                .execute(&mut conn)?;

            Ok::<bool, anyhow::Error>(inserted > 0)
        })
        .await??;

        Ok(result)
    }
}
