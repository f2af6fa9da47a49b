//! Shiloh Connection backend: congregation service schedule, online giving,
//! and payment-processor webhook handling.

pub mod actions;
pub mod cms;
pub mod countdown;
pub mod donations;
pub mod donations_repo;
pub mod email;
pub mod ratelimit;
pub mod schedule;
pub mod schema;
pub mod service_times;
pub mod stripe_client;
pub mod subscriptions;
pub mod subscriptions_repo;
pub mod validations;
pub mod web;
pub mod webhook_pipeline;
pub mod webhooks;
pub mod webhooks_repo;

pub use schedule::{next_occurrence, next_service, upcoming_schedule};
pub use service_times::{SERVICE_TIMES, parse_time_of_day};
