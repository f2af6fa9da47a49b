use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use metrics::counter;
use tracing::{error, info, warn};

use crate::donations::{DonationStatus, NewDonation};
use crate::donations_repo::DonationsStore;
use crate::email::Notifier;
use crate::stripe_client::ProcessorGateway;
use crate::subscriptions::{NewRecurringPayment, NewSubscription};
use crate::subscriptions_repo::SubscriptionsStore;
use crate::webhooks::NewWebhookEvent;
use crate::webhooks_repo::WebhookEventsStore;

fn timestamp(ts: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0)
}

fn metadata_value(metadata: &stripe::Metadata, key: &str) -> Option<String> {
    metadata.get(key).filter(|v| !v.is_empty()).cloned()
}

/// What a payment-intent event tells us, stripped down to plain data so
/// handlers can be driven in tests without constructing processor types.
#[derive(Debug, Clone)]
pub struct PaymentIntentFacts {
    pub payment_intent_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub charge_id: Option<String>,
    pub donor_name: Option<String>,
    pub donor_email: Option<String>,
    pub message: Option<String>,
    pub purpose: Option<String>,
    pub failure_message: Option<String>,
}

impl PaymentIntentFacts {
    pub fn from_payment_intent(pi: &stripe::PaymentIntent) -> Self {
        Self {
            payment_intent_id: pi.id.to_string(),
            amount_cents: pi.amount,
            currency: pi.currency.to_string(),
            charge_id: pi.latest_charge.as_ref().map(|c| c.id().to_string()),
            donor_name: metadata_value(&pi.metadata, "name"),
            donor_email: metadata_value(&pi.metadata, "email").or_else(|| pi.receipt_email.clone()),
            message: metadata_value(&pi.metadata, "message"),
            purpose: metadata_value(&pi.metadata, "purpose"),
            failure_message: pi
                .last_payment_error
                .as_ref()
                .and_then(|e| e.message.clone()),
        }
    }
}

/// Completed checkout sessions are sparse: they point at a payment intent
/// or subscription that must be fetched for the full picture.
#[derive(Debug, Clone)]
pub struct CheckoutFacts {
    pub payment_intent_id: Option<String>,
    pub subscription_id: Option<String>,
    pub customer_email: Option<String>,
    pub amount_total_cents: Option<i64>,
    pub donor_name: Option<String>,
    pub purpose: Option<String>,
}

impl CheckoutFacts {
    pub fn from_session(session: &stripe::CheckoutSession) -> Self {
        let metadata = session.metadata.clone().unwrap_or_default();
        Self {
            payment_intent_id: session.payment_intent.as_ref().map(|p| p.id().to_string()),
            subscription_id: session.subscription.as_ref().map(|s| s.id().to_string()),
            customer_email: session.customer_email.clone(),
            amount_total_cents: session.amount_total,
            donor_name: metadata_value(&metadata, "name"),
            purpose: metadata_value(&metadata, "purpose"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubscriptionFacts {
    pub subscription_id: String,
    pub status: String,
    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
    pub interval: Option<String>,
    pub donor_name: Option<String>,
    pub donor_email: Option<String>,
    pub purpose: Option<String>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
}

impl SubscriptionFacts {
    pub fn from_subscription(sub: &stripe::Subscription) -> Self {
        let price = sub.items.data.first().and_then(|item| item.price.as_ref());
        Self {
            subscription_id: sub.id.to_string(),
            status: sub.status.to_string(),
            amount_cents: price.and_then(|p| p.unit_amount),
            currency: price.and_then(|p| p.currency).map(|c| c.to_string()),
            interval: price
                .and_then(|p| p.recurring.as_ref())
                .map(|r| r.interval.to_string()),
            donor_name: metadata_value(&sub.metadata, "name"),
            donor_email: metadata_value(&sub.metadata, "email"),
            purpose: metadata_value(&sub.metadata, "purpose"),
            current_period_start: timestamp(sub.current_period_start),
            current_period_end: timestamp(sub.current_period_end),
            canceled_at: sub.canceled_at.and_then(timestamp),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InvoiceFacts {
    pub invoice_id: String,
    pub subscription_id: Option<String>,
    pub charge_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
    pub failure_message: Option<String>,
    pub next_payment_attempt: Option<DateTime<Utc>>,
}

impl InvoiceFacts {
    pub fn from_invoice(invoice: &stripe::Invoice) -> Self {
        Self {
            invoice_id: invoice.id.to_string(),
            subscription_id: invoice.subscription.as_ref().map(|s| s.id().to_string()),
            charge_id: invoice.charge.as_ref().map(|c| c.id().to_string()),
            amount_cents: invoice
                .amount_paid
                .or(invoice.amount_due)
                .unwrap_or_default(),
            currency: invoice
                .currency
                .map(|c| c.to_string())
                .unwrap_or_else(|| "usd".to_string()),
            customer_email: invoice.customer_email.clone(),
            customer_name: invoice.customer_name.clone(),
            failure_message: None,
            next_payment_attempt: invoice.next_payment_attempt.and_then(timestamp),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChargeFacts {
    pub payment_intent_id: Option<String>,
    pub amount_refunded_cents: i64,
    pub currency: String,
    pub receipt_email: Option<String>,
}

impl ChargeFacts {
    pub fn from_charge(charge: &stripe::Charge) -> Self {
        Self {
            payment_intent_id: charge.payment_intent.as_ref().map(|p| p.id().to_string()),
            amount_refunded_cents: charge.amount_refunded,
            currency: charge.currency.to_string(),
            receipt_email: charge.receipt_email.clone(),
        }
    }
}

/// Every webhook delivery reduced to the facts the handlers act on.
/// Unrecognized types are acknowledged without side effects.
#[derive(Debug, Clone)]
pub enum GivingEvent {
    PaymentSucceeded(PaymentIntentFacts),
    PaymentFailed(PaymentIntentFacts),
    CheckoutCompleted(CheckoutFacts),
    SubscriptionCreated(SubscriptionFacts),
    SubscriptionUpdated(SubscriptionFacts),
    SubscriptionDeleted(SubscriptionFacts),
    InvoicePaid(InvoiceFacts),
    InvoicePaymentFailed(InvoiceFacts),
    ChargeRefunded(ChargeFacts),
    Unrecognized { event_type: String },
}

impl GivingEvent {
    /// Reduce a verified processor event to plain facts. Only runs after
    /// the signature gate has accepted the payload.
    pub fn from_stripe(event: &stripe::Event) -> Self {
        use stripe::EventObject;

        let event_type = event.type_.to_string();
        match (event_type.as_str(), &event.data.object) {
            ("payment_intent.succeeded", EventObject::PaymentIntent(pi)) => {
                GivingEvent::PaymentSucceeded(PaymentIntentFacts::from_payment_intent(pi))
            }
            ("payment_intent.payment_failed", EventObject::PaymentIntent(pi)) => {
                GivingEvent::PaymentFailed(PaymentIntentFacts::from_payment_intent(pi))
            }
            ("checkout.session.completed", EventObject::CheckoutSession(session)) => {
                GivingEvent::CheckoutCompleted(CheckoutFacts::from_session(session))
            }
            ("customer.subscription.created", EventObject::Subscription(sub)) => {
                GivingEvent::SubscriptionCreated(SubscriptionFacts::from_subscription(sub))
            }
            ("customer.subscription.updated", EventObject::Subscription(sub)) => {
                GivingEvent::SubscriptionUpdated(SubscriptionFacts::from_subscription(sub))
            }
            ("customer.subscription.deleted", EventObject::Subscription(sub)) => {
                GivingEvent::SubscriptionDeleted(SubscriptionFacts::from_subscription(sub))
            }
            ("invoice.paid", EventObject::Invoice(invoice)) => {
                GivingEvent::InvoicePaid(InvoiceFacts::from_invoice(invoice))
            }
            ("invoice.payment_failed", EventObject::Invoice(invoice)) => {
                GivingEvent::InvoicePaymentFailed(InvoiceFacts::from_invoice(invoice))
            }
            ("charge.refunded", EventObject::Charge(charge)) => {
                GivingEvent::ChargeRefunded(ChargeFacts::from_charge(charge))
            }
            _ => GivingEvent::Unrecognized { event_type },
        }
    }
}

/// Outcome of running one delivery through the pipeline. All three variants
/// are acknowledged with 200 so the sender stops retrying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Processed,
    AlreadyProcessed,
    /// The event was durably recorded but its effects failed; the error is
    /// stored on the event row for manual review.
    RecordedError(String),
}

/// Applies verified giving events exactly once: idempotency check, durable
/// record, effect handlers, notifications.
pub struct WebhookProcessor {
    events: Arc<dyn WebhookEventsStore>,
    donations: Arc<dyn DonationsStore>,
    subscriptions: Arc<dyn SubscriptionsStore>,
    gateway: Arc<dyn ProcessorGateway>,
    notifier: Arc<dyn Notifier>,
}

impl WebhookProcessor {
    pub fn new(
        events: Arc<dyn WebhookEventsStore>,
        donations: Arc<dyn DonationsStore>,
        subscriptions: Arc<dyn SubscriptionsStore>,
        gateway: Arc<dyn ProcessorGateway>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            events,
            donations,
            subscriptions,
            gateway,
            notifier,
        }
    }

    /// Run one delivery through the pipeline. Errors bubbled out of here
    /// mean the event could not be durably recorded and the sender should
    /// retry; handler failures are captured as [`ProcessOutcome::RecordedError`].
    pub async fn process(
        &self,
        event_id: &str,
        event_type: &str,
        payload: serde_json::Value,
        event: GivingEvent,
    ) -> Result<ProcessOutcome> {
        if self.events.is_processed(event_id).await? {
            info!(event_id = %event_id, event_type = %event_type, "duplicate webhook delivery");
            counter!("shiloh.webhooks.duplicate").increment(1);
            return Ok(ProcessOutcome::AlreadyProcessed);
        }

        let inserted = self
            .events
            .record(NewWebhookEvent {
                stripe_event_id: event_id.to_string(),
                event_type: event_type.to_string(),
                payload,
            })
            .await?;

        // A row that exists but is unprocessed means a prior attempt died
        // before finishing; run the handlers again.
        if !inserted && self.events.is_processed(event_id).await? {
            counter!("shiloh.webhooks.duplicate").increment(1);
            return Ok(ProcessOutcome::AlreadyProcessed);
        }

        match self.handle(event).await {
            Ok(()) => {
                self.events.mark_processed(event_id, None).await?;
                counter!("shiloh.webhooks.processed").increment(1);
                Ok(ProcessOutcome::Processed)
            }
            Err(err) => {
                let message = format!("{err:#}");
                error!(event_id = %event_id, event_type = %event_type, error = %message, "webhook handler failed");
                counter!("shiloh.webhooks.failed").increment(1);
                self.note_send(
                    "admin_processing_alert",
                    self.notifier
                        .admin_processing_alert(event_id, event_type, &message)
                        .await,
                );
                self.events
                    .mark_processed(event_id, Some(message.clone()))
                    .await?;
                Ok(ProcessOutcome::RecordedError(message))
            }
        }
    }

    async fn handle(&self, event: GivingEvent) -> Result<()> {
        match event {
            GivingEvent::PaymentSucceeded(facts) => self.payment_succeeded(facts).await,
            GivingEvent::PaymentFailed(facts) => self.payment_failed(facts).await,
            GivingEvent::CheckoutCompleted(facts) => self.checkout_completed(facts).await,
            GivingEvent::SubscriptionCreated(facts) => {
                let email = facts.donor_email.clone();
                let name = facts.donor_name.clone();
                let amount = facts.amount_cents;
                let currency = facts.currency.clone();
                let interval = facts.interval.clone();
                self.upsert_subscription(facts).await?;
                if let Some(to) = email {
                    self.note_send(
                        "subscription_confirmation",
                        self.notifier
                            .subscription_confirmation(
                                &to,
                                name.as_deref(),
                                amount,
                                currency.as_deref(),
                                interval.as_deref(),
                            )
                            .await,
                    );
                }
                Ok(())
            }
            GivingEvent::SubscriptionUpdated(facts) => {
                self.upsert_subscription(facts).await?;
                Ok(())
            }
            GivingEvent::SubscriptionDeleted(facts) => {
                let email = facts.donor_email.clone();
                let name = facts.donor_name.clone();
                let subscription = self.upsert_subscription(facts).await?;
                let to = email.or(subscription.donor_email);
                if let Some(to) = to {
                    self.note_send(
                        "subscription_canceled",
                        self.notifier
                            .subscription_canceled(&to, name.as_deref())
                            .await,
                    );
                }
                Ok(())
            }
            GivingEvent::InvoicePaid(facts) => self.invoice_paid(facts).await,
            GivingEvent::InvoicePaymentFailed(facts) => self.invoice_failed(facts).await,
            GivingEvent::ChargeRefunded(facts) => self.charge_refunded(facts).await,
            GivingEvent::Unrecognized { event_type } => {
                info!(event_type = %event_type, "ignoring unrecognized webhook event type");
                counter!("shiloh.webhooks.unrecognized").increment(1);
                Ok(())
            }
        }
    }

    async fn payment_succeeded(&self, facts: PaymentIntentFacts) -> Result<()> {
        let donation = self
            .donations
            .upsert(NewDonation {
                stripe_payment_intent_id: facts.payment_intent_id.clone(),
                stripe_charge_id: facts.charge_id.clone(),
                amount_cents: facts.amount_cents,
                currency: facts.currency.clone(),
                donor_name: facts.donor_name.clone(),
                donor_email: facts.donor_email.clone(),
                message: facts.message.clone(),
                purpose: facts.purpose.clone(),
                status: DonationStatus::Succeeded,
                failure_message: None,
            })
            .await
            .context("recording successful donation")?;

        info!(
            payment_intent_id = %facts.payment_intent_id,
            amount_cents = donation.amount_cents,
            "donation succeeded"
        );
        counter!("shiloh.donations.succeeded").increment(1);

        if let Some(to) = &facts.donor_email {
            self.note_send(
                "donation_receipt",
                self.notifier
                    .donation_receipt(
                        to,
                        facts.donor_name.as_deref(),
                        facts.amount_cents,
                        &facts.currency,
                        facts.purpose.as_deref(),
                    )
                    .await,
            );
        }
        self.note_send(
            "admin_donation_notification",
            self.notifier
                .admin_donation_notification(
                    facts.amount_cents,
                    &facts.currency,
                    facts.donor_email.as_deref(),
                    facts.purpose.as_deref(),
                )
                .await,
        );

        Ok(())
    }

    async fn payment_failed(&self, facts: PaymentIntentFacts) -> Result<()> {
        self.donations
            .upsert(NewDonation {
                stripe_payment_intent_id: facts.payment_intent_id.clone(),
                stripe_charge_id: facts.charge_id.clone(),
                amount_cents: facts.amount_cents,
                currency: facts.currency.clone(),
                donor_name: facts.donor_name.clone(),
                donor_email: facts.donor_email.clone(),
                message: facts.message.clone(),
                purpose: facts.purpose.clone(),
                status: DonationStatus::Failed,
                failure_message: facts.failure_message.clone(),
            })
            .await
            .context("recording failed donation")?;

        warn!(
            payment_intent_id = %facts.payment_intent_id,
            reason = facts.failure_message.as_deref().unwrap_or("unknown"),
            "donation payment failed"
        );
        counter!("shiloh.donations.failed").increment(1);

        if let Some(to) = &facts.donor_email {
            self.note_send(
                "donation_failed",
                self.notifier
                    .donation_failed(
                        to,
                        facts.donor_name.as_deref(),
                        facts.amount_cents,
                        &facts.currency,
                        facts.failure_message.as_deref(),
                    )
                    .await,
            );
        }

        Ok(())
    }

    /// Checkout sessions carry the donor details the later lifecycle events
    /// lack, so the session's metadata is folded into whatever object the
    /// session produced.
    async fn checkout_completed(&self, facts: CheckoutFacts) -> Result<()> {
        if let Some(subscription_id) = &facts.subscription_id {
            let mut sub_facts = self
                .gateway
                .retrieve_subscription(subscription_id)
                .await
                .context("fetching subscription for completed checkout")?;
            if sub_facts.donor_email.is_none() {
                sub_facts.donor_email = facts.customer_email.clone();
            }
            if sub_facts.donor_name.is_none() {
                sub_facts.donor_name = facts.donor_name.clone();
            }
            if sub_facts.purpose.is_none() {
                sub_facts.purpose = facts.purpose.clone();
            }

            let email = sub_facts.donor_email.clone();
            let name = sub_facts.donor_name.clone();
            let amount = sub_facts.amount_cents;
            let currency = sub_facts.currency.clone();
            let interval = sub_facts.interval.clone();
            self.upsert_subscription(sub_facts).await?;

            if let Some(to) = email {
                self.note_send(
                    "subscription_confirmation",
                    self.notifier
                        .subscription_confirmation(
                            &to,
                            name.as_deref(),
                            amount,
                            currency.as_deref(),
                            interval.as_deref(),
                        )
                        .await,
                );
            }
            return Ok(());
        }

        if let Some(payment_intent_id) = &facts.payment_intent_id {
            let mut pi_facts = self
                .gateway
                .retrieve_payment_intent(payment_intent_id)
                .await
                .context("fetching payment intent for completed checkout")?;
            if pi_facts.donor_email.is_none() {
                pi_facts.donor_email = facts.customer_email.clone();
            }
            if pi_facts.donor_name.is_none() {
                pi_facts.donor_name = facts.donor_name.clone();
            }
            if pi_facts.purpose.is_none() {
                pi_facts.purpose = facts.purpose.clone();
            }

            // Receipts ride on payment_intent.succeeded; this upsert only
            // attaches the donor details the session carried.
            self.donations
                .upsert(NewDonation {
                    stripe_payment_intent_id: pi_facts.payment_intent_id.clone(),
                    stripe_charge_id: pi_facts.charge_id.clone(),
                    amount_cents: pi_facts.amount_cents,
                    currency: pi_facts.currency.clone(),
                    donor_name: pi_facts.donor_name.clone(),
                    donor_email: pi_facts.donor_email.clone(),
                    message: pi_facts.message.clone(),
                    purpose: pi_facts.purpose.clone(),
                    status: DonationStatus::Succeeded,
                    failure_message: None,
                })
                .await
                .context("recording checkout donation")?;
            return Ok(());
        }

        warn!("checkout session completed with neither payment intent nor subscription");
        Ok(())
    }

    async fn invoice_paid(&self, facts: InvoiceFacts) -> Result<()> {
        let Some(subscription_id) = &facts.subscription_id else {
            info!(invoice_id = %facts.invoice_id, "invoice without subscription, nothing to do");
            return Ok(());
        };

        // First invoice can beat the subscription.created event; fetch the
        // subscription so the payment has a parent row.
        let mut subscription = self.subscriptions.get(subscription_id).await?;
        if subscription.is_none() {
            let sub_facts = self
                .gateway
                .retrieve_subscription(subscription_id)
                .await
                .context("fetching subscription for paid invoice")?;
            subscription = Some(self.upsert_subscription(sub_facts).await?);
        }

        let inserted = self
            .subscriptions
            .record_recurring_payment(NewRecurringPayment {
                stripe_invoice_id: facts.invoice_id.clone(),
                stripe_subscription_id: subscription_id.clone(),
                stripe_charge_id: facts.charge_id.clone(),
                amount_cents: facts.amount_cents,
                currency: facts.currency.clone(),
                status: "paid".to_string(),
                paid_at: Some(Utc::now()),
                failure_message: None,
            })
            .await
            .context("recording recurring payment")?;

        self.subscriptions
            .update_payment_status(subscription_id, false, None)
            .await?;

        counter!("shiloh.recurring.paid").increment(1);

        if inserted {
            let donor_email = subscription
                .as_ref()
                .and_then(|s| s.donor_email.clone())
                .or(facts.customer_email.clone());
            let donor_name = subscription
                .as_ref()
                .and_then(|s| s.donor_name.clone())
                .or(facts.customer_name.clone());
            if let Some(to) = donor_email {
                self.note_send(
                    "recurring_receipt",
                    self.notifier
                        .recurring_receipt(
                            &to,
                            donor_name.as_deref(),
                            facts.amount_cents,
                            &facts.currency,
                        )
                        .await,
                );
            }
        }

        Ok(())
    }

    async fn invoice_failed(&self, facts: InvoiceFacts) -> Result<()> {
        let Some(subscription_id) = &facts.subscription_id else {
            info!(invoice_id = %facts.invoice_id, "failed invoice without subscription, nothing to do");
            return Ok(());
        };

        self.subscriptions
            .record_recurring_payment(NewRecurringPayment {
                stripe_invoice_id: facts.invoice_id.clone(),
                stripe_subscription_id: subscription_id.clone(),
                stripe_charge_id: facts.charge_id.clone(),
                amount_cents: facts.amount_cents,
                currency: facts.currency.clone(),
                status: "failed".to_string(),
                paid_at: None,
                failure_message: facts.failure_message.clone(),
            })
            .await
            .context("recording failed recurring payment")?;

        let subscription = self
            .subscriptions
            .update_payment_status(
                subscription_id,
                true,
                facts
                    .failure_message
                    .clone()
                    .or_else(|| Some("invoice payment failed".to_string())),
            )
            .await?;

        warn!(
            invoice_id = %facts.invoice_id,
            subscription_id = %subscription_id,
            "recurring payment failed"
        );
        counter!("shiloh.recurring.failed").increment(1);

        let donor_email = subscription
            .as_ref()
            .and_then(|s| s.donor_email.clone())
            .or(facts.customer_email.clone());
        let donor_name = subscription
            .as_ref()
            .and_then(|s| s.donor_name.clone())
            .or(facts.customer_name.clone());
        if let Some(to) = donor_email {
            self.note_send(
                "recurring_payment_failed",
                self.notifier
                    .recurring_payment_failed(
                        &to,
                        donor_name.as_deref(),
                        facts.amount_cents,
                        &facts.currency,
                        facts.next_payment_attempt,
                    )
                    .await,
            );
        }

        Ok(())
    }

    async fn charge_refunded(&self, facts: ChargeFacts) -> Result<()> {
        let Some(payment_intent_id) = &facts.payment_intent_id else {
            warn!("refunded charge without payment intent, nothing to update");
            return Ok(());
        };

        let donation = self
            .donations
            .record_refund(payment_intent_id, facts.amount_refunded_cents)
            .await
            .context("recording refund")?;

        counter!("shiloh.donations.refunded").increment(1);

        let to = donation
            .as_ref()
            .and_then(|d| d.donor_email.clone())
            .or(facts.receipt_email.clone());
        if let Some(to) = to {
            self.note_send(
                "refund_confirmation",
                self.notifier
                    .refund_confirmation(&to, facts.amount_refunded_cents, &facts.currency)
                    .await,
            );
        }

        Ok(())
    }

    async fn upsert_subscription(
        &self,
        facts: SubscriptionFacts,
    ) -> Result<crate::subscriptions::Subscription> {
        let subscription = self
            .subscriptions
            .upsert(NewSubscription {
                stripe_subscription_id: facts.subscription_id.clone(),
                amount_cents: facts.amount_cents,
                currency: facts.currency,
                interval: facts.interval,
                donor_name: facts.donor_name,
                donor_email: facts.donor_email,
                purpose: facts.purpose,
                status: facts.status,
                current_period_start: facts.current_period_start,
                current_period_end: facts.current_period_end,
                canceled_at: facts.canceled_at,
            })
            .await
            .context("upserting subscription")?;
        Ok(subscription)
    }

    /// Notification failures are logged and dropped; a mail outage must not
    /// turn a processed event into a recorded error.
    fn note_send(&self, kind: &str, result: Result<()>) {
        if let Err(err) = result {
            warn!(notification = %kind, error = %err, "notification send failed");
            counter!("shiloh.email.send_failed").increment(1);
        }
    }
}
