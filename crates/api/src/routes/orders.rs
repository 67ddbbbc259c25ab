//! Order placement, status and audit trail endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use chrono::{DateTime, Utc};
use common::{IdempotencyKey, OrderId, UserId};
use domain::{Money, OrderItem, OrderStatus};
use order_store::{HistoryEntry, InMemoryOrderStore, OrderRecord};
use saga::{
    CancelToken, CreateOrder, InventoryService, NotificationService, PaymentService,
    SagaCoordinator, SecurityContext,
};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Header carrying the client's deduplication key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// The coordinator type served by the API.
///
/// Services are trait objects so the HTTP and in-memory modes share one type.
pub type AppCoordinator = SagaCoordinator<
    InMemoryOrderStore,
    Arc<dyn InventoryService>,
    Arc<dyn PaymentService>,
    Arc<dyn NotificationService>,
>;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub coordinator: Arc<AppCoordinator>,
}

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub user_id: u64,
    pub items: Vec<OrderItemRequest>,
    pub shipping_address: String,
}

#[derive(Debug, Deserialize)]
pub struct OrderItemRequest {
    pub product_id: u64,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

/// Query of `PUT /orders/{id}/status`.
#[derive(Debug, Deserialize)]
pub struct StatusUpdateParams {
    pub status: OrderStatus,
}

// -- Response types --

#[derive(Debug, Serialize)]
pub struct OrderItemResponse {
    pub product_id: u64,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

/// What the customer sees after placing an order.
#[derive(Debug, Serialize)]
pub struct OrderPlacedResponse {
    pub order_id: OrderId,
    /// `confirmed`, `cancelled` or `processing`.
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub total_cents: i64,
    pub items: Vec<OrderItemResponse>,
}

/// The full status of an order, including saga progress.
#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub order_id: OrderId,
    pub user_id: u64,
    pub status: OrderStatus,
    pub requires_operator: bool,
    pub reconciliation_required: bool,
    pub saga_phase: &'static str,
    pub current_step: &'static str,
    pub reason: Option<String>,
    pub last_error: Option<String>,
    pub reservation_id: Option<String>,
    pub charge_id: Option<String>,
    pub revision: u64,
    pub items: Vec<OrderItemResponse>,
    pub total_cents: i64,
    pub shipping_address: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn item_responses(items: &[OrderItem]) -> Vec<OrderItemResponse> {
    items
        .iter()
        .map(|item| OrderItemResponse {
            product_id: item.product_id.as_u64(),
            quantity: item.quantity,
            unit_price_cents: item.unit_price.cents(),
        })
        .collect()
}

impl From<&OrderRecord> for OrderPlacedResponse {
    fn from(record: &OrderRecord) -> Self {
        let status = record.status();
        let reason = match status {
            OrderStatus::Cancelled => record.saga.outcome_reason.clone(),
            _ => None,
        };
        Self {
            order_id: record.id(),
            status: status.customer_view(),
            reason,
            total_cents: record.order.total_amount().cents(),
            items: item_responses(record.order.items()),
        }
    }
}

impl From<&OrderRecord> for OrderResponse {
    fn from(record: &OrderRecord) -> Self {
        let saga = &record.saga;
        Self {
            order_id: record.id(),
            user_id: record.order.user_id().as_u64(),
            status: record.status(),
            requires_operator: record.requires_operator(),
            reconciliation_required: saga.reconciliation_required,
            saga_phase: saga.phase.as_str(),
            current_step: saga.current_step.as_str(),
            reason: saga.outcome_reason.clone(),
            last_error: saga.last_error.clone(),
            reservation_id: saga.reservation_id.as_ref().map(|id| id.as_str().to_string()),
            charge_id: saga.charge_id.as_ref().map(|id| id.as_str().to_string()),
            revision: record.revision.as_u64(),
            items: item_responses(record.order.items()),
            total_cents: record.order.total_amount().cents(),
            shipping_address: record.order.shipping_address().to_string(),
            created_at: record.order.created_at(),
            updated_at: record.order.updated_at(),
        }
    }
}

// -- Handlers --

/// POST /orders — place an order and run its saga.
///
/// The saga runs on its own task so a client disconnect cannot abort it
/// part way. Dropping the request only cancels the saga if no stock has
/// been reserved yet.
#[tracing::instrument(skip(state, headers, body))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<OrderPlacedResponse>), ApiError> {
    let authorization = header_value(&headers, header::AUTHORIZATION.as_str())
        .ok_or_else(|| ApiError::Unauthorized("Authorization header is required".into()))?;
    let idempotency_key = header_value(&headers, IDEMPOTENCY_KEY_HEADER)
        .ok_or_else(|| ApiError::BadRequest("Idempotency-Key header is required".into()))?;
    let Json(req) = body.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;

    let items = req
        .items
        .iter()
        .map(|item| {
            OrderItem::new(
                item.product_id,
                item.quantity,
                Money::from_cents(item.unit_price_cents),
            )
        })
        .collect();
    let cancel = CancelToken::new();
    let request = CreateOrder::new(
        UserId::new(req.user_id),
        items,
        req.shipping_address,
        IdempotencyKey::new(idempotency_key),
    )
    .with_security(SecurityContext::new(authorization))
    .with_cancel(cancel.clone());

    let guard = cancel.drop_guard();
    let coordinator = state.coordinator.clone();
    let placement = tokio::spawn(async move { coordinator.create_order(request).await })
        .await
        .map_err(|e| ApiError::Internal(format!("saga task failed: {e}")))?;
    guard.disarm();
    let placement = placement?;

    let status = match (placement.replayed, placement.record.is_settled()) {
        (false, _) => StatusCode::CREATED,
        (true, true) => StatusCode::OK,
        (true, false) => StatusCode::ACCEPTED,
    };
    Ok((status, Json(OrderPlacedResponse::from(&placement.record))))
}

/// GET /orders/{id} — the order with its saga progress.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let record = state.coordinator.get_order(order_id).await?;
    Ok(Json(OrderResponse::from(&record)))
}

/// GET /orders — every order known to the service.
#[tracing::instrument(skip(state))]
pub async fn list(State(state): State<Arc<AppState>>) -> Result<Json<Vec<OrderResponse>>, ApiError> {
    let records = state.coordinator.list_orders().await?;
    Ok(Json(records.iter().map(OrderResponse::from).collect()))
}

/// GET /orders/{id}/history — the audit trail of an order.
#[tracing::instrument(skip(state))]
pub async fn history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
    let order_id = parse_order_id(&id)?;
    Ok(Json(state.coordinator.history(order_id).await?))
}

/// PUT /orders/{id}/status?status=shipped — move a confirmed order through
/// fulfillment.
#[tracing::instrument(skip(state, headers, params))]
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    params: Result<Query<StatusUpdateParams>, QueryRejection>,
) -> Result<Json<OrderResponse>, ApiError> {
    header_value(&headers, header::AUTHORIZATION.as_str())
        .ok_or_else(|| ApiError::Unauthorized("Authorization header is required".into()))?;
    let order_id = parse_order_id(&id)?;
    let Query(params) = params.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;

    let record = state
        .coordinator
        .update_status(order_id, params.status)
        .await?;
    Ok(Json(OrderResponse::from(&record)))
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    id.parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid order id: {id}")))
}
