//! Operator-facing HTTP surface for the checkout-to-order core.
//!
//! Exposes health, Prometheus metrics, and the outbox tooling contract:
//! stats, a manual processing trigger, and dead-letter replay. Checkout
//! and fulfillment controllers are separate services and out of scope
//! here.

pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use outbox::{HandlerRegistry, OutboxConfig, OutboxProcessor, OutboxService};
use storage::Storage;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use handlers::LogHandler;
use routes::outbox::OutboxState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: Storage + 'static>(
    state: Arc<OutboxState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/outbox/stats", get(routes::outbox::stats::<S>))
        .route("/outbox/run", post(routes::outbox::run::<S>))
        .route("/outbox/dlq", get(routes::outbox::list_dlq::<S>))
        .route("/outbox/dlq/{id}/replay", post(routes::outbox::replay_dlq::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the default outbox state: processor wired with the logging
/// handlers standing in for the email/analytics/warehouse integrations.
pub fn create_default_state<S: Storage + Clone + 'static>(storage: S) -> Arc<OutboxState<S>> {
    let config = OutboxConfig::from_env();

    let mut registry = HandlerRegistry::new();
    registry.register(
        orders::events::ORDER_CREATED,
        Arc::new(LogHandler::new("confirmation-email")),
    );
    registry.register(
        orders::events::ORDER_CREATED,
        Arc::new(LogHandler::new("warehouse-dispatch")),
    );
    registry.register(
        orders::events::ORDER_CREATED,
        Arc::new(LogHandler::new("analytics")),
    );
    registry.register(
        orders::events::LINE_ITEM_TRANSITIONED,
        Arc::new(LogHandler::new("analytics")),
    );
    registry.register(
        orders::events::ORDER_STATUS_CHANGED,
        Arc::new(LogHandler::new("customer-notification")),
    );

    let processor = Arc::new(OutboxProcessor::new(
        storage.clone(),
        registry,
        config.clone(),
    ));
    let service = OutboxService::new(storage.clone(), config);

    Arc::new(OutboxState {
        storage,
        service,
        processor,
    })
}
