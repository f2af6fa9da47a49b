use anyhow::Result;
use async_trait::async_trait;
use diesel::prelude::*;

use crate::web::PgPool;
use crate::webhooks::{NewWebhookEvent, WebhookEventModel};

/// Durable ledger of received webhook deliveries; the idempotency guard for
/// the whole pipeline.
#[async_trait]
pub trait WebhookEventsStore: Send + Sync {
    /// Whether this event id has already run to completion (idempotency).
    async fn is_processed(&self, stripe_event_id: &str) -> Result<bool>;

    /// Record a new delivery. Returns false when a row for this event id
    /// already exists (a concurrent or replayed delivery).
    async fn record(&self, event: NewWebhookEvent) -> Result<bool>;

    /// Mark an event done. `error` is stored when the effect handler failed;
    /// the event is still considered handled so the sender stops retrying.
    async fn mark_processed(&self, stripe_event_id: &str, error: Option<String>) -> Result<()>;
}

#[derive(Clone)]
pub struct WebhookEventsRepository {
    pool: PgPool,
}

impl WebhookEventsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WebhookEventsStore for WebhookEventsRepository {
    async fn is_processed(&self, stripe_event_id: &str) -> Result<bool> {
        use crate::schema::webhook_events::dsl;

        let pool = self.pool.clone();
        let stripe_event_id = stripe_event_id.to_string();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let exists: bool = diesel::select(diesel::dsl::exists(
                dsl::webhook_events
                    .filter(dsl::stripe_event_id.eq(&stripe_event_id))
                    .filter(dsl::processed.eq(true)),
            ))
            .get_result(&mut conn)?;

            Ok::<bool, anyhow::Error>(exists)
        })
        .await??;

        Ok(result)
    }

    async fn record(&self, event: NewWebhookEvent) -> Result<bool> {
        use crate::schema::webhook_events::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let inserted: Option<WebhookEventModel> = diesel::insert_into(dsl::webhook_events)
                .values(&event)
                .on_conflict(dsl::stripe_event_id)
                .do_nothing()
                .get_result(&mut conn)
                .optional()?;

            Ok::<bool, anyhow::Error>(inserted.is_some())
        })
        .await??;

        Ok(result)
    }

    async fn mark_processed(&self, stripe_event_id: &str, error: Option<String>) -> Result<()> {
        use crate::schema::webhook_events;

        let pool = self.pool.clone();
        let stripe_event_id = stripe_event_id.to_string();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            diesel::update(webhook_events::table)
                .filter(webhook_events::stripe_event_id.eq(&stripe_event_id))
                .set((
                    webhook_events::processed.eq(true),
                    webhook_events::processing_error.eq(&error),
                ))
                .execute(&mut conn)?;

            Ok::<(), anyhow::Error>(())
        })
        .await??;

        Ok(())
    }
}
