//! HTTP API for the order service.
//!
//! Places orders through the saga coordinator, moves confirmed orders
//! through fulfillment, and exposes their status, audit trail, health and
//! Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::InMemoryOrderStore;
use saga::{
    HttpInventoryService, HttpNotificationService, HttpPaymentService, InMemoryInventoryService,
    InMemoryNotificationService, InMemoryPaymentService, InventoryService, NotificationService,
    PaymentService, SagaConfig, SagaCoordinator,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::{Config, ServiceMode};
use routes::orders::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/orders", post(routes::orders::create).get(routes::orders::list))
        .route("/orders/{id}", get(routes::orders::get))
        .route("/orders/{id}/status", put(routes::orders::update_status))
        .route("/orders/{id}/history", get(routes::orders::history))
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

/// Handles to the in-process services, for seeding stock and scripting
/// failures.
#[derive(Clone)]
pub struct InMemoryServices {
    pub inventory: InMemoryInventoryService,
    pub payment: InMemoryPaymentService,
    pub notifier: InMemoryNotificationService,
}

/// Creates application state backed by in-process services.
pub fn create_in_memory_state(saga_config: SagaConfig) -> (Arc<AppState>, InMemoryServices) {
    let services = InMemoryServices {
        inventory: InMemoryInventoryService::new(),
        payment: InMemoryPaymentService::new(),
        notifier: InMemoryNotificationService::new(),
    };
    let state = build_state(
        saga_config,
        Arc::new(services.inventory.clone()),
        Arc::new(services.payment.clone()),
        Arc::new(services.notifier.clone()),
    );
    (state, services)
}

/// Creates application state that calls the collaborating services over HTTP.
pub fn create_http_state(config: &Config) -> Result<Arc<AppState>, reqwest::Error> {
    let client = reqwest::Client::builder()
        .timeout(config.call_timeout)
        .build()?;
    Ok(build_state(
        config.saga_config(),
        Arc::new(HttpInventoryService::new(
            client.clone(),
            config.inventory_url.clone(),
        )),
        Arc::new(HttpPaymentService::new(
            client.clone(),
            config.payment_url.clone(),
        )),
        Arc::new(HttpNotificationService::new(
            client,
            config.notification_url.clone(),
        )),
    ))
}

/// Creates application state for the configured service mode.
pub fn create_state(config: &Config) -> Result<Arc<AppState>, reqwest::Error> {
    match config.service_mode {
        ServiceMode::Http => create_http_state(config),
        ServiceMode::InMemory => Ok(create_in_memory_state(config.saga_config()).0),
    }
}

fn build_state(
    saga_config: SagaConfig,
    inventory: Arc<dyn InventoryService>,
    payment: Arc<dyn PaymentService>,
    notifier: Arc<dyn NotificationService>,
) -> Arc<AppState> {
    let coordinator = SagaCoordinator::new(
        InMemoryOrderStore::new(),
        inventory,
        payment,
        notifier,
        saga_config,
    );
    Arc::new(AppState {
        coordinator: Arc::new(coordinator),
    })
}
