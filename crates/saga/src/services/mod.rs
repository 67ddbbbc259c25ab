//! Client adapters for the services a saga calls.
//!
//! Each collaborator has a trait, an in-memory implementation used by tests
//! and the in-memory service mode, and an HTTP client in [`http`]. Every
//! failure is translated into a [`ServiceError`] before it reaches the
//! coordinator.

pub mod http;
pub mod inventory;
pub mod notification;
pub mod payment;
mod script;

pub use http::{HttpInventoryService, HttpNotificationService, HttpPaymentService};
pub use inventory::{InMemoryInventoryService, InventoryService};
pub use notification::{InMemoryNotificationService, Notification, NotificationService};
pub use payment::{InMemoryPaymentService, PaymentService};

use std::future::Future;
use std::time::Duration;

use domain::SagaAction;
use thiserror::Error;

/// Outcome of a failed call to a collaborating service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// The call did not reach the service or timed out. Safe to retry.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// The service refused the request. Retrying will not help.
    #[error("Rejected: {0}")]
    Rejected(String),

    /// The request may or may not have been applied.
    #[error("Outcome unknown: {0}")]
    Unknown(String),
}

impl ServiceError {
    /// Returns the label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Unavailable(_) => "unavailable",
            ServiceError::Rejected(_) => "rejected",
            ServiceError::Unknown(_) => "unknown",
        }
    }

    /// Returns the reason without the kind prefix.
    pub fn reason(&self) -> &str {
        match self {
            ServiceError::Unavailable(reason)
            | ServiceError::Rejected(reason)
            | ServiceError::Unknown(reason) => reason,
        }
    }
}

/// Counts a failed call in `service_call_failures_total`.
pub(crate) fn count_failure(action: SagaAction, err: &ServiceError) {
    let service = match action {
        SagaAction::ReserveInventory | SagaAction::ReleaseInventory => "inventory",
        SagaAction::ChargePayment | SagaAction::RefundPayment => "payment",
        SagaAction::Notify => "notification",
        SagaAction::CommitOrder => "order_store",
    };
    metrics::counter!(
        "service_call_failures_total",
        "service" => service,
        "operation" => action.as_str(),
        "kind" => err.kind()
    )
    .increment(1);
}

/// The caller's credentials, forwarded verbatim to every service.
///
/// The saga never inspects them. `Debug` output is redacted.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SecurityContext {
    authorization: Option<String>,
}

impl SecurityContext {
    /// Creates a context carrying an `Authorization` header value.
    pub fn new(authorization: impl Into<String>) -> Self {
        Self {
            authorization: Some(authorization.into()),
        }
    }

    /// Creates a context with no credentials.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authorization(&self) -> Option<&str> {
        self.authorization.as_deref()
    }
}

impl std::fmt::Debug for SecurityContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let authorization = self.authorization.as_ref().map(|_| "<redacted>");
        f.debug_struct("SecurityContext")
            .field("authorization", &authorization)
            .finish()
    }
}

/// Per-call settings passed to every adapter method.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub timeout: Duration,
    pub security: SecurityContext,
}

impl CallContext {
    pub fn new(timeout: Duration, security: SecurityContext) -> Self {
        Self { timeout, security }
    }

    /// Runs `call`, turning an elapsed timeout into `Unavailable`.
    pub async fn bounded<T, F>(&self, call: F) -> Result<T, ServiceError>
    where
        F: Future<Output = Result<T, ServiceError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ServiceError::Unavailable(format!(
                "no response within {}ms",
                self.timeout.as_millis()
            ))),
        }
    }
}
