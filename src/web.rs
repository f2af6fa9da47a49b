use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use axum::{
    Router,
    body::Body,
    http::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use diesel::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool};
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::actions;
use crate::cms::CmsClient;
use crate::email::Notifier;
use crate::ratelimit::RateLimiters;
use crate::stripe_client::StripeConfig;
use crate::webhook_pipeline::WebhookProcessor;

pub type PgPool = Pool<ConnectionManager<PgConnection>>;

/// Shared application state. Stripe pieces are optional so the schedule and
/// contact surfaces keep working when giving is not configured.
#[derive(Clone)]
pub struct AppState {
    pub stripe_config: Option<StripeConfig>,
    pub processor: Option<Arc<WebhookProcessor>>,
    pub cms: Arc<dyn CmsClient>,
    pub notifier: Arc<dyn Notifier>,
    pub limits: Arc<RateLimiters>,
}

// Middleware for request logging with correlation ID
async fn request_logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = Uuid::new_v4().to_string()[..8].to_string();
    let start_time = Instant::now();

    info!("Started {} {} [{}]", method, path, request_id);

    let response = next.run(request).await;
    let duration = start_time.elapsed();
    let status = response.status();

    info!(
        "Completed {} {} [{}] {} in {:.2}ms",
        method,
        path,
        request_id,
        status.as_u16(),
        duration.as_secs_f64() * 1000.0
    );

    response
}

// Middleware to capture HTTP errors to Sentry
async fn sentry_error_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();

    let response = next.run(request).await;

    // Capture HTTP 5xx errors to Sentry
    if response.status().is_server_error() {
        let status = response.status();
        error!("HTTP {} error on {} {}", status.as_u16(), method, uri);

        sentry::configure_scope(|scope| {
            scope.set_tag("http.method", method.as_str());
            scope.set_tag("http.url", uri.to_string());
            scope.set_tag("http.status_code", status.as_u16().to_string());
        });

        sentry::capture_message(
            &format!("HTTP {} error on {} {}", status.as_u16(), method, uri),
            sentry::Level::Error,
        );
    }

    response
}

pub fn api_router(app_state: AppState) -> Router {
    Router::new()
        // Schedule and events
        .route("/schedule/next", get(actions::schedule::get_next_service))
        .route("/schedule/upcoming", get(actions::schedule::get_upcoming))
        .route("/events", get(actions::schedule::list_events))
        .route("/events/{slug}", get(actions::schedule::get_event))
        // Online giving
        .route(
            "/giving/payment-intent",
            post(actions::giving::create_payment_intent),
        )
        .route(
            "/giving/subscription",
            post(actions::giving::create_subscription),
        )
        // Processor callbacks
        .route("/webhook", post(actions::webhooks::handle_webhook))
        // Contact form
        .route("/contact", post(actions::contact::submit_contact))
        .with_state(app_state)
}

pub async fn start_web_server(interface: String, port: u16, app_state: AppState) -> Result<()> {
    sentry::configure_scope(|scope| {
        scope.set_tag("operation", "web-server");
    });
    info!("Starting web server on {}:{}", interface, port);

    let cors_layer = CorsLayer::permissive();

    let app = Router::new()
        .nest("/api", api_router(app_state))
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(middleware::from_fn(sentry_error_middleware))
        .layer(cors_layer);

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", interface, port)).await?;
    info!("Web server listening on http://{}:{}", interface, port);

    axum::serve(listener, app).await?;

    Ok(())
}
