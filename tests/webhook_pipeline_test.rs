//! Exercises the webhook pipeline end to end against in-memory stores:
//! idempotency, effect handlers, notifications, and the acknowledge-once
//! contract.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use shiloh::donations::{Donation, DonationStatus, NewDonation};
use shiloh::donations_repo::DonationsStore;
use shiloh::email::Notifier;
use shiloh::stripe_client::ProcessorGateway;
use shiloh::subscriptions::{NewRecurringPayment, NewSubscription, Subscription};
use shiloh::subscriptions_repo::SubscriptionsStore;
use shiloh::webhook_pipeline::{
    ChargeFacts, CheckoutFacts, GivingEvent, InvoiceFacts, PaymentIntentFacts, ProcessOutcome,
    SubscriptionFacts, WebhookProcessor,
};
use shiloh::webhooks::NewWebhookEvent;
use shiloh::webhooks_repo::WebhookEventsStore;

#[derive(Default)]
struct MemoryEvents {
    rows: Mutex<HashMap<String, (bool, Option<String>)>>,
    fail_record: AtomicBool,
}

#[async_trait]
impl WebhookEventsStore for MemoryEvents {
    async fn is_processed(&self, stripe_event_id: &str) -> Result<bool> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .get(stripe_event_id)
            .map(|(processed, _)| *processed)
            .unwrap_or(false))
    }

    async fn record(&self, event: NewWebhookEvent) -> Result<bool> {
        if self.fail_record.load(Ordering::SeqCst) {
            bail!("ledger unavailable");
        }
        let mut rows = self.rows.lock().unwrap();
        if rows.contains_key(&event.stripe_event_id) {
            return Ok(false);
        }
        rows.insert(event.stripe_event_id, (false, None));
        Ok(true)
    }

    async fn mark_processed(&self, stripe_event_id: &str, error: Option<String>) -> Result<()> {
        self.rows
            .lock()
            .unwrap()
            .insert(stripe_event_id.to_string(), (true, error));
        Ok(())
    }
}

#[derive(Default)]
struct MemoryDonations {
    rows: Mutex<HashMap<String, Donation>>,
    upserts: AtomicUsize,
    fail_upsert: AtomicBool,
}

fn donation_from(new: NewDonation) -> Donation {
    Donation {
        id: Uuid::new_v4(),
        stripe_payment_intent_id: new.stripe_payment_intent_id,
        stripe_charge_id: new.stripe_charge_id,
        amount_cents: new.amount_cents,
        currency: new.currency,
        donor_name: new.donor_name,
        donor_email: new.donor_email,
        message: new.message,
        purpose: new.purpose,
        status: new.status,
        failure_message: new.failure_message,
        refunded: false,
        refund_amount_cents: None,
        refunded_at: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[async_trait]
impl DonationsStore for MemoryDonations {
    async fn get_by_payment_intent_id(&self, payment_intent_id: &str) -> Result<Option<Donation>> {
        Ok(self.rows.lock().unwrap().get(payment_intent_id).cloned())
    }

    async fn upsert(&self, donation: NewDonation) -> Result<Donation> {
        if self.fail_upsert.load(Ordering::SeqCst) {
            bail!("donations table unavailable");
        }
        self.upserts.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.rows.lock().unwrap();
        // Mirrors the SQL conflict update: donor details coalesce with the
        // stored row, and a refunded row keeps its terminal status.
        if let Some(row) = rows.get_mut(&donation.stripe_payment_intent_id) {
            if row.status != DonationStatus::Refunded {
                row.stripe_charge_id = donation.stripe_charge_id.or(row.stripe_charge_id.take());
                row.donor_name = donation.donor_name.or(row.donor_name.take());
                row.donor_email = donation.donor_email.or(row.donor_email.take());
                row.message = donation.message.or(row.message.take());
                row.purpose = donation.purpose.or(row.purpose.take());
                row.status = donation.status;
                row.failure_message = donation.failure_message;
                row.updated_at = Utc::now();
            }
            return Ok(row.clone());
        }
        let row = donation_from(donation);
        rows.insert(row.stripe_payment_intent_id.clone(), row.clone());
        Ok(row)
    }

    async fn update_status(
        &self,
        payment_intent_id: &str,
        status: DonationStatus,
        failure_message: Option<String>,
    ) -> Result<Option<Donation>> {
        let mut rows = self.rows.lock().unwrap();
        Ok(rows.get_mut(payment_intent_id).map(|row| {
            if row.status != DonationStatus::Refunded {
                row.status = status;
                row.failure_message = failure_message;
            }
            row.clone()
        }))
    }

    async fn record_refund(
        &self,
        payment_intent_id: &str,
        refund_amount_cents: i64,
    ) -> Result<Option<Donation>> {
        let mut rows = self.rows.lock().unwrap();
        Ok(rows.get_mut(payment_intent_id).map(|row| {
            row.status = DonationStatus::Refunded;
            row.refunded = true;
            row.refund_amount_cents = Some(refund_amount_cents);
            row.refunded_at = Some(Utc::now());
            row.clone()
        }))
    }
}

#[derive(Default)]
struct MemorySubscriptions {
    rows: Mutex<HashMap<String, Subscription>>,
    invoices: Mutex<HashMap<String, String>>,
}

impl MemorySubscriptions {
    fn seed(&self, subscription_id: &str, donor_email: Option<&str>) {
        let row = Subscription {
            id: Uuid::new_v4(),
            stripe_subscription_id: subscription_id.to_string(),
            amount_cents: Some(2500),
            currency: Some("usd".to_string()),
            interval: Some("month".to_string()),
            donor_name: Some("Ada".to_string()),
            donor_email: donor_email.map(str::to_string),
            purpose: Some("Tithe".to_string()),
            status: "active".to_string(),
            current_period_start: None,
            current_period_end: None,
            canceled_at: None,
            last_payment_failed: false,
            failure_reason: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.rows
            .lock()
            .unwrap()
            .insert(subscription_id.to_string(), row);
    }
}

#[async_trait]
impl SubscriptionsStore for MemorySubscriptions {
    async fn get(&self, subscription_id: &str) -> Result<Option<Subscription>> {
        Ok(self.rows.lock().unwrap().get(subscription_id).cloned())
    }

    async fn upsert(&self, subscription: NewSubscription) -> Result<Subscription> {
        let mut rows = self.rows.lock().unwrap();
        // Mirrors the SQL upsert: donor fields survive conflicting updates.
        let row = rows
            .entry(subscription.stripe_subscription_id.clone())
            .and_modify(|row| {
                row.amount_cents = subscription.amount_cents;
                row.currency = subscription.currency.clone();
                row.interval = subscription.interval.clone();
                row.status = subscription.status.clone();
                row.current_period_start = subscription.current_period_start;
                row.current_period_end = subscription.current_period_end;
                row.canceled_at = subscription.canceled_at;
                row.updated_at = Utc::now();
            })
            .or_insert_with(|| Subscription {
                id: Uuid::new_v4(),
                stripe_subscription_id: subscription.stripe_subscription_id.clone(),
                amount_cents: subscription.amount_cents,
                currency: subscription.currency.clone(),
                interval: subscription.interval.clone(),
                donor_name: subscription.donor_name.clone(),
                donor_email: subscription.donor_email.clone(),
                purpose: subscription.purpose.clone(),
                status: subscription.status.clone(),
                current_period_start: subscription.current_period_start,
                current_period_end: subscription.current_period_end,
                canceled_at: subscription.canceled_at,
                last_payment_failed: false,
                failure_reason: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            });
        Ok(row.clone())
    }

    async fn update_payment_status(
        &self,
        subscription_id: &str,
        last_payment_failed: bool,
        failure_reason: Option<String>,
    ) -> Result<Option<Subscription>> {
        let mut rows = self.rows.lock().unwrap();
        Ok(rows.get_mut(subscription_id).map(|row| {
            row.last_payment_failed = last_payment_failed;
            row.failure_reason = failure_reason;
            row.clone()
        }))
    }

    async fn record_recurring_payment(&self, payment: NewRecurringPayment) -> Result<bool> {
        let mut invoices = self.invoices.lock().unwrap();
        if invoices.contains_key(&payment.stripe_invoice_id) {
            return Ok(false);
        }
        invoices.insert(payment.stripe_invoice_id, payment.status);
        Ok(true)
    }
}

/// Records every notification by name; never fails unless told to.
#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<String>>,
    fail_all: AtomicBool,
}

impl RecordingNotifier {
    fn note(&self, kind: &str) -> Result<()> {
        if self.fail_all.load(Ordering::SeqCst) {
            bail!("smtp down");
        }
        self.sent.lock().unwrap().push(kind.to_string());
        Ok(())
    }

    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn donation_receipt(
        &self,
        _to_email: &str,
        _donor_name: Option<&str>,
        _amount_cents: i64,
        _currency: &str,
        _purpose: Option<&str>,
    ) -> Result<()> {
        self.note("donation_receipt")
    }

    async fn donation_failed(
        &self,
        _to_email: &str,
        _donor_name: Option<&str>,
        _amount_cents: i64,
        _currency: &str,
        _reason: Option<&str>,
    ) -> Result<()> {
        self.note("donation_failed")
    }

    async fn refund_confirmation(
        &self,
        _to_email: &str,
        _amount_cents: i64,
        _currency: &str,
    ) -> Result<()> {
        self.note("refund_confirmation")
    }

    async fn subscription_confirmation(
        &self,
        _to_email: &str,
        _donor_name: Option<&str>,
        _amount_cents: Option<i64>,
        _currency: Option<&str>,
        _interval: Option<&str>,
    ) -> Result<()> {
        self.note("subscription_confirmation")
    }

    async fn subscription_canceled(&self, _to_email: &str, _donor_name: Option<&str>) -> Result<()> {
        self.note("subscription_canceled")
    }

    async fn recurring_receipt(
        &self,
        _to_email: &str,
        _donor_name: Option<&str>,
        _amount_cents: i64,
        _currency: &str,
    ) -> Result<()> {
        self.note("recurring_receipt")
    }

    async fn recurring_payment_failed(
        &self,
        _to_email: &str,
        _donor_name: Option<&str>,
        _amount_cents: i64,
        _currency: &str,
        _next_attempt: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.note("recurring_payment_failed")
    }

    async fn contact_message(
        &self,
        _name: &str,
        _email: &str,
        _phone: Option<&str>,
        _subject: &str,
        _message: &str,
        _message_type: &str,
    ) -> Result<()> {
        self.note("contact_message")
    }

    async fn admin_donation_notification(
        &self,
        _amount_cents: i64,
        _currency: &str,
        _donor_email: Option<&str>,
        _purpose: Option<&str>,
    ) -> Result<()> {
        self.note("admin_donation_notification")
    }

    async fn admin_processing_alert(
        &self,
        _event_id: &str,
        _event_type: &str,
        _error: &str,
    ) -> Result<()> {
        self.note("admin_processing_alert")
    }
}

/// Serves canned enrichment fetches; fails loudly for anything unexpected.
#[derive(Default)]
struct FakeGateway {
    subscription: Option<SubscriptionFacts>,
    payment_intent: Option<PaymentIntentFacts>,
}

#[async_trait]
impl ProcessorGateway for FakeGateway {
    async fn retrieve_subscription(&self, subscription_id: &str) -> Result<SubscriptionFacts> {
        self.subscription
            .clone()
            .ok_or_else(|| anyhow::anyhow!("unexpected subscription fetch: {subscription_id}"))
    }

    async fn retrieve_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<PaymentIntentFacts> {
        self.payment_intent
            .clone()
            .ok_or_else(|| anyhow::anyhow!("unexpected payment intent fetch: {payment_intent_id}"))
    }
}

struct Harness {
    events: Arc<MemoryEvents>,
    donations: Arc<MemoryDonations>,
    subscriptions: Arc<MemorySubscriptions>,
    notifier: Arc<RecordingNotifier>,
    processor: WebhookProcessor,
}

fn harness() -> Harness {
    harness_with_gateway(FakeGateway::default())
}

fn harness_with_gateway(gateway: FakeGateway) -> Harness {
    let events = Arc::new(MemoryEvents::default());
    let donations = Arc::new(MemoryDonations::default());
    let subscriptions = Arc::new(MemorySubscriptions::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let processor = WebhookProcessor::new(
        events.clone(),
        donations.clone(),
        subscriptions.clone(),
        Arc::new(gateway),
        notifier.clone(),
    );
    Harness {
        events,
        donations,
        subscriptions,
        notifier,
        processor,
    }
}

/// A checkout-originated intent: the payment event itself carries no donor
/// metadata, only the session does.
fn bare_payment_facts(payment_intent_id: &str) -> PaymentIntentFacts {
    PaymentIntentFacts {
        payment_intent_id: payment_intent_id.to_string(),
        amount_cents: 5000,
        currency: "usd".to_string(),
        charge_id: Some("ch_1".to_string()),
        donor_name: None,
        donor_email: None,
        message: None,
        purpose: None,
        failure_message: None,
    }
}

fn payment_facts(payment_intent_id: &str, email: Option<&str>) -> PaymentIntentFacts {
    PaymentIntentFacts {
        payment_intent_id: payment_intent_id.to_string(),
        amount_cents: 5000,
        currency: "usd".to_string(),
        charge_id: Some("ch_1".to_string()),
        donor_name: Some("Ada".to_string()),
        donor_email: email.map(str::to_string),
        message: None,
        purpose: Some("Offering".to_string()),
        failure_message: None,
    }
}

fn invoice_facts(invoice_id: &str, subscription_id: Option<&str>) -> InvoiceFacts {
    InvoiceFacts {
        invoice_id: invoice_id.to_string(),
        subscription_id: subscription_id.map(str::to_string),
        charge_id: None,
        amount_cents: 2500,
        currency: "usd".to_string(),
        customer_email: None,
        customer_name: None,
        failure_message: None,
        next_payment_attempt: None,
    }
}

#[tokio::test]
async fn payment_succeeded_records_donation_and_notifies() {
    let h = harness();

    let outcome = h
        .processor
        .process(
            "evt_1",
            "payment_intent.succeeded",
            serde_json::json!({}),
            GivingEvent::PaymentSucceeded(payment_facts("pi_1", Some("ada@example.org"))),
        )
        .await
        .unwrap();

    assert_eq!(outcome, ProcessOutcome::Processed);

    let donation = h
        .donations
        .get_by_payment_intent_id("pi_1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(donation.status, DonationStatus::Succeeded);
    assert_eq!(donation.amount_cents, 5000);

    let sent = h.notifier.sent();
    assert!(sent.contains(&"donation_receipt".to_string()));
    assert!(sent.contains(&"admin_donation_notification".to_string()));

    let rows = h.events.rows.lock().unwrap();
    assert_eq!(rows.get("evt_1"), Some(&(true, None)));
}

#[tokio::test]
async fn payment_without_email_skips_receipt() {
    let h = harness();

    h.processor
        .process(
            "evt_1",
            "payment_intent.succeeded",
            serde_json::json!({}),
            GivingEvent::PaymentSucceeded(payment_facts("pi_1", None)),
        )
        .await
        .unwrap();

    let sent = h.notifier.sent();
    assert!(!sent.contains(&"donation_receipt".to_string()));
    assert!(sent.contains(&"admin_donation_notification".to_string()));
}

#[tokio::test]
async fn duplicate_delivery_has_no_second_effects() {
    let h = harness();
    let event = GivingEvent::PaymentSucceeded(payment_facts("pi_1", Some("ada@example.org")));

    let first = h
        .processor
        .process("evt_1", "payment_intent.succeeded", serde_json::json!({}), event.clone())
        .await
        .unwrap();
    let second = h
        .processor
        .process("evt_1", "payment_intent.succeeded", serde_json::json!({}), event)
        .await
        .unwrap();

    assert_eq!(first, ProcessOutcome::Processed);
    assert_eq!(second, ProcessOutcome::AlreadyProcessed);
    assert_eq!(h.donations.upserts.load(Ordering::SeqCst), 1);
    assert_eq!(
        h.notifier
            .sent()
            .iter()
            .filter(|k| *k == "donation_receipt")
            .count(),
        1
    );
}

#[tokio::test]
async fn recorded_but_unprocessed_event_is_retried() {
    let h = harness();
    // A prior attempt recorded the row and died before the handlers ran.
    h.events
        .rows
        .lock()
        .unwrap()
        .insert("evt_1".to_string(), (false, None));

    let outcome = h
        .processor
        .process(
            "evt_1",
            "payment_intent.succeeded",
            serde_json::json!({}),
            GivingEvent::PaymentSucceeded(payment_facts("pi_1", None)),
        )
        .await
        .unwrap();

    assert_eq!(outcome, ProcessOutcome::Processed);
    assert_eq!(h.donations.upserts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn handler_failure_is_recorded_and_alerted() {
    let h = harness();
    h.donations.fail_upsert.store(true, Ordering::SeqCst);

    let outcome = h
        .processor
        .process(
            "evt_1",
            "payment_intent.succeeded",
            serde_json::json!({}),
            GivingEvent::PaymentSucceeded(payment_facts("pi_1", None)),
        )
        .await
        .unwrap();

    let ProcessOutcome::RecordedError(message) = outcome else {
        panic!("expected RecordedError, got {outcome:?}");
    };
    assert!(message.contains("donations table unavailable"));

    // The error lands on the event row and the office hears about it.
    let rows = h.events.rows.lock().unwrap();
    let (processed, error) = rows.get("evt_1").unwrap();
    assert!(processed);
    assert!(error.as_deref().unwrap().contains("donations table unavailable"));
    assert!(h.notifier.sent().contains(&"admin_processing_alert".to_string()));
}

#[tokio::test]
async fn ledger_write_failure_bubbles_up() {
    let h = harness();
    h.events.fail_record.store(true, Ordering::SeqCst);

    let result = h
        .processor
        .process(
            "evt_1",
            "payment_intent.succeeded",
            serde_json::json!({}),
            GivingEvent::PaymentSucceeded(payment_facts("pi_1", None)),
        )
        .await;

    assert!(result.is_err());
    assert_eq!(h.donations.upserts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unrecognized_event_is_acknowledged_without_effects() {
    let h = harness();

    let outcome = h
        .processor
        .process(
            "evt_1",
            "customer.created",
            serde_json::json!({}),
            GivingEvent::Unrecognized {
                event_type: "customer.created".to_string(),
            },
        )
        .await
        .unwrap();

    assert_eq!(outcome, ProcessOutcome::Processed);
    assert!(h.donations.rows.lock().unwrap().is_empty());
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn notification_outage_does_not_fail_processing() {
    let h = harness();
    h.notifier.fail_all.store(true, Ordering::SeqCst);

    let outcome = h
        .processor
        .process(
            "evt_1",
            "payment_intent.succeeded",
            serde_json::json!({}),
            GivingEvent::PaymentSucceeded(payment_facts("pi_1", Some("ada@example.org"))),
        )
        .await
        .unwrap();

    assert_eq!(outcome, ProcessOutcome::Processed);
    assert!(
        h.donations
            .get_by_payment_intent_id("pi_1")
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn subscription_created_upserts_and_confirms() {
    let h = harness();

    let facts = SubscriptionFacts {
        subscription_id: "sub_1".to_string(),
        status: "active".to_string(),
        amount_cents: Some(2500),
        currency: Some("usd".to_string()),
        interval: Some("month".to_string()),
        donor_name: Some("Ada".to_string()),
        donor_email: Some("ada@example.org".to_string()),
        purpose: Some("Tithe".to_string()),
        current_period_start: None,
        current_period_end: None,
        canceled_at: None,
    };

    let outcome = h
        .processor
        .process(
            "evt_1",
            "customer.subscription.created",
            serde_json::json!({}),
            GivingEvent::SubscriptionCreated(facts),
        )
        .await
        .unwrap();

    assert_eq!(outcome, ProcessOutcome::Processed);
    let row = h.subscriptions.get("sub_1").await.unwrap().unwrap();
    assert_eq!(row.status, "active");
    assert!(h.notifier.sent().contains(&"subscription_confirmation".to_string()));
}

#[tokio::test]
async fn subscription_deleted_notifies_stored_email() {
    let h = harness();
    h.subscriptions.seed("sub_1", Some("ada@example.org"));

    // The deletion event itself carries no donor metadata.
    let facts = SubscriptionFacts {
        subscription_id: "sub_1".to_string(),
        status: "canceled".to_string(),
        amount_cents: Some(2500),
        currency: Some("usd".to_string()),
        interval: Some("month".to_string()),
        donor_name: None,
        donor_email: None,
        purpose: None,
        current_period_start: None,
        current_period_end: None,
        canceled_at: Some(Utc::now()),
    };

    h.processor
        .process(
            "evt_1",
            "customer.subscription.deleted",
            serde_json::json!({}),
            GivingEvent::SubscriptionDeleted(facts),
        )
        .await
        .unwrap();

    let row = h.subscriptions.get("sub_1").await.unwrap().unwrap();
    assert_eq!(row.status, "canceled");
    assert!(row.canceled_at.is_some());
    assert!(h.notifier.sent().contains(&"subscription_canceled".to_string()));
}

#[tokio::test]
async fn invoice_paid_receipts_once_per_invoice() {
    let h = harness();
    h.subscriptions.seed("sub_1", Some("ada@example.org"));

    let first = h
        .processor
        .process(
            "evt_1",
            "invoice.paid",
            serde_json::json!({}),
            GivingEvent::InvoicePaid(invoice_facts("in_1", Some("sub_1"))),
        )
        .await
        .unwrap();
    // Same invoice delivered under a fresh event id.
    let second = h
        .processor
        .process(
            "evt_2",
            "invoice.paid",
            serde_json::json!({}),
            GivingEvent::InvoicePaid(invoice_facts("in_1", Some("sub_1"))),
        )
        .await
        .unwrap();

    assert_eq!(first, ProcessOutcome::Processed);
    assert_eq!(second, ProcessOutcome::Processed);
    assert_eq!(
        h.notifier
            .sent()
            .iter()
            .filter(|k| *k == "recurring_receipt")
            .count(),
        1
    );
}

#[tokio::test]
async fn invoice_paid_clears_failure_flag() {
    let h = harness();
    h.subscriptions.seed("sub_1", Some("ada@example.org"));
    h.subscriptions
        .update_payment_status("sub_1", true, Some("card declined".to_string()))
        .await
        .unwrap();

    h.processor
        .process(
            "evt_1",
            "invoice.paid",
            serde_json::json!({}),
            GivingEvent::InvoicePaid(invoice_facts("in_1", Some("sub_1"))),
        )
        .await
        .unwrap();

    let row = h.subscriptions.get("sub_1").await.unwrap().unwrap();
    assert!(!row.last_payment_failed);
    assert!(row.failure_reason.is_none());
}

#[tokio::test]
async fn invoice_without_subscription_is_a_no_op() {
    let h = harness();

    let outcome = h
        .processor
        .process(
            "evt_1",
            "invoice.paid",
            serde_json::json!({}),
            GivingEvent::InvoicePaid(invoice_facts("in_1", None)),
        )
        .await
        .unwrap();

    assert_eq!(outcome, ProcessOutcome::Processed);
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn invoice_failure_flags_subscription_and_notifies() {
    let h = harness();
    h.subscriptions.seed("sub_1", Some("ada@example.org"));

    let mut facts = invoice_facts("in_1", Some("sub_1"));
    facts.failure_message = Some("card declined".to_string());

    h.processor
        .process(
            "evt_1",
            "invoice.payment_failed",
            serde_json::json!({}),
            GivingEvent::InvoicePaymentFailed(facts),
        )
        .await
        .unwrap();

    let row = h.subscriptions.get("sub_1").await.unwrap().unwrap();
    assert!(row.last_payment_failed);
    assert_eq!(row.failure_reason.as_deref(), Some("card declined"));
    assert!(h.notifier.sent().contains(&"recurring_payment_failed".to_string()));
}

#[tokio::test]
async fn checkout_donor_details_survive_arriving_second() {
    // The payment event for a checkout-originated gift lands first and
    // carries no metadata; the session that follows must still attach the
    // donor details to the existing row.
    let h = harness_with_gateway(FakeGateway {
        payment_intent: Some(bare_payment_facts("pi_1")),
        ..Default::default()
    });

    h.processor
        .process(
            "evt_1",
            "payment_intent.succeeded",
            serde_json::json!({}),
            GivingEvent::PaymentSucceeded(bare_payment_facts("pi_1")),
        )
        .await
        .unwrap();

    let outcome = h
        .processor
        .process(
            "evt_2",
            "checkout.session.completed",
            serde_json::json!({}),
            GivingEvent::CheckoutCompleted(CheckoutFacts {
                payment_intent_id: Some("pi_1".to_string()),
                subscription_id: None,
                customer_email: Some("ada@example.org".to_string()),
                amount_total_cents: Some(5000),
                donor_name: Some("Ada".to_string()),
                purpose: Some("Tithe".to_string()),
            }),
        )
        .await
        .unwrap();

    assert_eq!(outcome, ProcessOutcome::Processed);
    let donation = h
        .donations
        .get_by_payment_intent_id("pi_1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(donation.status, DonationStatus::Succeeded);
    assert_eq!(donation.donor_email.as_deref(), Some("ada@example.org"));
    assert_eq!(donation.donor_name.as_deref(), Some("Ada"));
    assert_eq!(donation.purpose.as_deref(), Some("Tithe"));
}

#[tokio::test]
async fn refund_is_terminal_for_replayed_success() {
    let h = harness();

    h.processor
        .process(
            "evt_1",
            "payment_intent.succeeded",
            serde_json::json!({}),
            GivingEvent::PaymentSucceeded(payment_facts("pi_1", Some("ada@example.org"))),
        )
        .await
        .unwrap();
    h.processor
        .process(
            "evt_2",
            "charge.refunded",
            serde_json::json!({}),
            GivingEvent::ChargeRefunded(ChargeFacts {
                payment_intent_id: Some("pi_1".to_string()),
                amount_refunded_cents: 5000,
                currency: "usd".to_string(),
                receipt_email: None,
            }),
        )
        .await
        .unwrap();

    // The same payment succeeding again under a fresh event id must not
    // resurrect the row out of its terminal status.
    let outcome = h
        .processor
        .process(
            "evt_3",
            "payment_intent.succeeded",
            serde_json::json!({}),
            GivingEvent::PaymentSucceeded(payment_facts("pi_1", Some("ada@example.org"))),
        )
        .await
        .unwrap();

    assert_eq!(outcome, ProcessOutcome::Processed);
    let donation = h
        .donations
        .get_by_payment_intent_id("pi_1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(donation.status, DonationStatus::Refunded);
    assert!(donation.refunded);
    assert_eq!(donation.refund_amount_cents, Some(5000));
}

#[tokio::test]
async fn invoice_paid_backfills_missing_subscription() {
    // The first invoice can beat customer.subscription.created; the parent
    // row is fetched from the processor and created before recording.
    let h = harness_with_gateway(FakeGateway {
        subscription: Some(SubscriptionFacts {
            subscription_id: "sub_1".to_string(),
            status: "active".to_string(),
            amount_cents: Some(2500),
            currency: Some("usd".to_string()),
            interval: Some("month".to_string()),
            donor_name: Some("Ada".to_string()),
            donor_email: Some("ada@example.org".to_string()),
            purpose: Some("Tithe".to_string()),
            current_period_start: None,
            current_period_end: None,
            canceled_at: None,
        }),
        ..Default::default()
    });

    let outcome = h
        .processor
        .process(
            "evt_1",
            "invoice.paid",
            serde_json::json!({}),
            GivingEvent::InvoicePaid(invoice_facts("in_1", Some("sub_1"))),
        )
        .await
        .unwrap();

    assert_eq!(outcome, ProcessOutcome::Processed);
    let row = h.subscriptions.get("sub_1").await.unwrap().unwrap();
    assert_eq!(row.status, "active");
    assert_eq!(row.donor_email.as_deref(), Some("ada@example.org"));
    assert!(h.notifier.sent().contains(&"recurring_receipt".to_string()));
}

#[tokio::test]
async fn charge_refunded_marks_donation_refunded() {
    let h = harness();

    h.processor
        .process(
            "evt_1",
            "payment_intent.succeeded",
            serde_json::json!({}),
            GivingEvent::PaymentSucceeded(payment_facts("pi_1", Some("ada@example.org"))),
        )
        .await
        .unwrap();

    let outcome = h
        .processor
        .process(
            "evt_2",
            "charge.refunded",
            serde_json::json!({}),
            GivingEvent::ChargeRefunded(ChargeFacts {
                payment_intent_id: Some("pi_1".to_string()),
                amount_refunded_cents: 5000,
                currency: "usd".to_string(),
                receipt_email: None,
            }),
        )
        .await
        .unwrap();

    assert_eq!(outcome, ProcessOutcome::Processed);
    let donation = h
        .donations
        .get_by_payment_intent_id("pi_1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(donation.status, DonationStatus::Refunded);
    assert!(donation.refunded);
    assert_eq!(donation.refund_amount_cents, Some(5000));
    assert!(h.notifier.sent().contains(&"refund_confirmation".to_string()));
}
