use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use diesel::PgConnection;
use diesel::r2d2::ConnectionManager;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use shiloh::cms::StaticCms;
use shiloh::donations_repo::DonationsRepository;
use shiloh::email::{EmailService, LogNotifier, Notifier};
use shiloh::ratelimit::RateLimiters;
use shiloh::stripe_client::{StripeConfig, StripeGateway};
use shiloh::subscriptions_repo::SubscriptionsRepository;
use shiloh::web::{AppState, PgPool, start_web_server};
use shiloh::webhook_pipeline::WebhookProcessor;
use shiloh::webhooks_repo::WebhookEventsRepository;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[derive(Parser, Debug)]
#[command(name = "shiloh", about = "Shiloh Connection backend server")]
struct Args {
    /// Interface to bind the web server to
    #[arg(long, default_value = "0.0.0.0")]
    interface: String,

    /// Port to bind the web server to
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

fn build_pool() -> Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = r2d2::Pool::builder()
        .max_size(10)
        .build(manager)
        .context("Failed to create database connection pool")?;
    Ok(pool)
}

async fn run_migrations(pool: PgPool) -> Result<()> {
    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;
        Ok::<_, anyhow::Error>(())
    })
    .await??;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let _sentry_guard = std::env::var("SENTRY_DSN").ok().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let args = Args::parse();

    let pool = build_pool()?;
    run_migrations(pool.clone()).await?;
    info!("Database migrations up to date");

    let notifier: Arc<dyn Notifier> = match EmailService::new() {
        Ok(service) => Arc::new(service),
        Err(e) => {
            warn!(error = %e, "SMTP not configured, falling back to log-only notifier");
            Arc::new(LogNotifier)
        }
    };

    let stripe_config = match StripeConfig::from_env() {
        Ok(config) => Some(config),
        Err(e) => {
            warn!(error = %e, "Stripe not configured, giving endpoints disabled");
            None
        }
    };

    let processor = stripe_config.as_ref().map(|config| {
        Arc::new(WebhookProcessor::new(
            Arc::new(WebhookEventsRepository::new(pool.clone())),
            Arc::new(DonationsRepository::new(pool.clone())),
            Arc::new(SubscriptionsRepository::new(pool.clone())),
            Arc::new(StripeGateway::new(config.client.clone())),
            notifier.clone(),
        ))
    });

    let limits = Arc::new(RateLimiters::new());
    let prune_limits = limits.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            tick.tick().await;
            prune_limits.prune_all();
        }
    });

    let app_state = AppState {
        stripe_config,
        processor,
        cms: Arc::new(StaticCms::new()),
        notifier,
        limits,
    };

    start_web_server(args.interface, args.port, app_state).await
}
