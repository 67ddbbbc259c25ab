//! HTTP clients for the inventory, payment and notification services.
//!
//! Status classification:
//! - 2xx: success
//! - 408, 429, 502, 503, 504: `Unavailable`
//! - other 4xx: `Rejected`
//! - other 5xx: `Unknown` for calls that change state, `Unavailable` otherwise
//!
//! Connection failures and timeouts are `Unavailable`. Any other transport
//! error on a state-changing call, or a success body that cannot be read,
//! is `Unknown`.

use async_trait::async_trait;
use common::{OrderId, ProductId, UserId};
use domain::{ChargeId, Money, OrderItem, ReservationId};
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{
    CallContext, InventoryService, Notification, NotificationService, PaymentService,
    ServiceError,
};

/// Payment method sent with every charge.
const PAYMENT_METHOD: &str = "credit_card";

/// Notification type understood by the notification service.
const NOTIFICATION_TYPE: &str = "order";

#[derive(Debug, Clone)]
struct Endpoint {
    client: Client,
    base_url: String,
}

impl Endpoint {
    fn new(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    /// Appends `segments` to the base path, percent-encoding each one.
    fn url(&self, segments: &[&str]) -> Result<Url, ServiceError> {
        let invalid = || ServiceError::Rejected(format!("invalid service url: {}", self.base_url));
        let mut url = Url::parse(&self.base_url).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|()| invalid())?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(
        &self,
        ctx: &CallContext,
        method: Method,
        segments: &[&str],
    ) -> Result<RequestBuilder, ServiceError> {
        let request = self
            .client
            .request(method, self.url(segments)?)
            .timeout(ctx.timeout);
        Ok(match ctx.security.authorization() {
            Some(authorization) => request.header(AUTHORIZATION, authorization),
            None => request,
        })
    }
}

/// Sends a request and classifies the outcome.
///
/// Statuses in `also_ok` count as success.
async fn send(
    request: RequestBuilder,
    mutating: bool,
    also_ok: &[StatusCode],
) -> Result<Response, ServiceError> {
    let response = request
        .send()
        .await
        .map_err(|e| transport_error(&e, mutating))?;

    let status = response.status();
    if status.is_success() || also_ok.contains(&status) {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, &body, mutating))
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ServiceError> {
    response
        .json::<T>()
        .await
        .map_err(|e| ServiceError::Unknown(format!("unreadable response body: {e}")))
}

fn transport_error(err: &reqwest::Error, mutating: bool) -> ServiceError {
    if err.is_connect() || err.is_timeout() || !mutating {
        ServiceError::Unavailable(err.to_string())
    } else {
        ServiceError::Unknown(err.to_string())
    }
}

fn status_error(status: StatusCode, body: &str, mutating: bool) -> ServiceError {
    let reason = format!(
        "HTTP {} - {}",
        status,
        body.chars().take(200).collect::<String>()
    );
    match status {
        StatusCode::REQUEST_TIMEOUT
        | StatusCode::TOO_MANY_REQUESTS
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => ServiceError::Unavailable(reason),
        s if s.is_client_error() => ServiceError::Rejected(reason),
        _ if mutating => ServiceError::Unknown(reason),
        _ => ServiceError::Unavailable(reason),
    }
}

#[derive(Serialize)]
struct ReserveRequest {
    order_id: OrderId,
    items: Vec<ReserveItem>,
}

#[derive(Serialize)]
struct ReserveItem {
    product_id: ProductId,
    quantity: u32,
}

#[derive(Deserialize)]
struct ReserveResponse {
    reservation_id: ReservationId,
}

/// HTTP client for the inventory service.
#[derive(Debug, Clone)]
pub struct HttpInventoryService {
    endpoint: Endpoint,
}

impl HttpInventoryService {
    /// Creates a client for the inventory service at `base_url`
    /// (e.g., "http://inventory-service:8005").
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            endpoint: Endpoint::new(client, base_url),
        }
    }
}

#[async_trait]
impl InventoryService for HttpInventoryService {
    #[tracing::instrument(skip(self, ctx, items), fields(service = "inventory"))]
    async fn reserve(
        &self,
        ctx: &CallContext,
        order_id: OrderId,
        items: &[OrderItem],
    ) -> Result<ReservationId, ServiceError> {
        let body = ReserveRequest {
            order_id,
            items: items
                .iter()
                .map(|item| ReserveItem {
                    product_id: item.product_id,
                    quantity: item.quantity,
                })
                .collect(),
        };
        let request = self
            .endpoint
            .request(ctx, Method::POST, &["reservations"])?
            .json(&body);

        let response = send(request, true, &[]).await?;
        let reserved: ReserveResponse = decode(response).await?;
        Ok(reserved.reservation_id)
    }

    #[tracing::instrument(skip(self, ctx), fields(service = "inventory"))]
    async fn release(
        &self,
        ctx: &CallContext,
        reservation_id: &ReservationId,
    ) -> Result<(), ServiceError> {
        let request = self.endpoint.request(
            ctx,
            Method::DELETE,
            &["reservations", reservation_id.as_str()],
        )?;

        // Already released
        send(request, true, &[StatusCode::NOT_FOUND]).await?;
        Ok(())
    }
}

#[derive(Serialize)]
struct ChargeRequest {
    order_id: OrderId,
    user_id: UserId,
    amount_cents: i64,
    method: &'static str,
}

#[derive(Deserialize)]
struct ChargeResponse {
    charge_id: ChargeId,
}

/// HTTP client for the payment service.
#[derive(Debug, Clone)]
pub struct HttpPaymentService {
    endpoint: Endpoint,
}

impl HttpPaymentService {
    /// Creates a client for the payment service at `base_url`
    /// (e.g., "http://payment-service:8004").
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            endpoint: Endpoint::new(client, base_url),
        }
    }
}

#[async_trait]
impl PaymentService for HttpPaymentService {
    #[tracing::instrument(skip(self, ctx), fields(service = "payment"))]
    async fn charge(
        &self,
        ctx: &CallContext,
        order_id: OrderId,
        user_id: UserId,
        amount: Money,
    ) -> Result<ChargeId, ServiceError> {
        let body = ChargeRequest {
            order_id,
            user_id,
            amount_cents: amount.cents(),
            method: PAYMENT_METHOD,
        };
        let request = self
            .endpoint
            .request(ctx, Method::POST, &["payments"])?
            .json(&body);

        let response = send(request, true, &[]).await?;
        let charged: ChargeResponse = decode(response).await?;
        Ok(charged.charge_id)
    }

    #[tracing::instrument(skip(self, ctx), fields(service = "payment"))]
    async fn refund(&self, ctx: &CallContext, charge_id: &ChargeId) -> Result<(), ServiceError> {
        let request =
            self.endpoint
                .request(ctx, Method::POST, &["payments", charge_id.as_str(), "refund"])?;

        // Already refunded
        send(request, true, &[StatusCode::CONFLICT]).await?;
        Ok(())
    }
}

#[derive(Serialize)]
struct NotificationRequest<'a> {
    user_id: UserId,
    #[serde(rename = "type")]
    notification_type: &'static str,
    message: &'a str,
}

/// HTTP client for the notification service.
#[derive(Debug, Clone)]
pub struct HttpNotificationService {
    endpoint: Endpoint,
}

impl HttpNotificationService {
    /// Creates a client for the notification service at `base_url`
    /// (e.g., "http://notification-service:8006").
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            endpoint: Endpoint::new(client, base_url),
        }
    }
}

#[async_trait]
impl NotificationService for HttpNotificationService {
    #[tracing::instrument(skip(self, ctx, notification), fields(service = "notification", kind = %notification.kind))]
    async fn notify(
        &self,
        ctx: &CallContext,
        notification: &Notification,
    ) -> Result<(), ServiceError> {
        let body = NotificationRequest {
            user_id: notification.user_id,
            notification_type: NOTIFICATION_TYPE,
            message: &notification.message,
        };
        let request = self
            .endpoint
            .request(ctx, Method::POST, &["notifications"])?
            .json(&body);

        send(request, true, &[]).await?;
        Ok(())
    }
}
