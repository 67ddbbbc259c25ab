//! Notification service trait and in-memory implementation.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::{OrderId, UserId};
use domain::{CancelReason, NotificationKind};
use serde::Serialize;

use super::script::{Script, Scripted, lock};
use super::{CallContext, ServiceError};

/// A message for the customer about their order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub user_id: UserId,
    pub order_id: OrderId,
    pub kind: NotificationKind,
    pub message: String,
}

impl Notification {
    pub fn order_confirmed(user_id: UserId, order_id: OrderId) -> Self {
        Self {
            user_id,
            order_id,
            kind: NotificationKind::OrderConfirmed,
            message: format!("Your order {order_id} has been confirmed"),
        }
    }

    pub fn order_cancelled(user_id: UserId, order_id: OrderId, reason: &CancelReason) -> Self {
        Self {
            user_id,
            order_id,
            kind: NotificationKind::OrderCancelled,
            message: format!("Your order {order_id} has been cancelled: {reason}"),
        }
    }
}

/// Trait for sending customer notifications.
///
/// Delivery is best effort. The saga never retries a notification and never
/// changes an order's status because one failed.
#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn notify(
        &self,
        ctx: &CallContext,
        notification: &Notification,
    ) -> Result<(), ServiceError>;
}

#[async_trait]
impl<T: NotificationService + ?Sized> NotificationService for Arc<T> {
    async fn notify(
        &self,
        ctx: &CallContext,
        notification: &Notification,
    ) -> Result<(), ServiceError> {
        (**self).notify(ctx, notification).await
    }
}

#[derive(Debug, Default)]
struct InMemoryNotificationState {
    sent: Vec<Notification>,
    attempts: usize,
    script: Script,
}

/// In-memory notification service that records what it delivered.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotificationService {
    state: Arc<Mutex<InMemoryNotificationState>>,
}

impl InMemoryNotificationService {
    /// Creates a new in-memory notification service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every notify call fail with `error`, or clears it.
    pub fn fail_all(&self, error: Option<ServiceError>) {
        lock(&self.state).script.set_always(error);
    }

    /// Returns the notifications delivered, in order.
    pub fn sent(&self) -> Vec<Notification> {
        lock(&self.state).sent.clone()
    }

    /// Returns the number of delivered notifications of a kind.
    pub fn sent_of_kind(&self, kind: NotificationKind) -> usize {
        lock(&self.state)
            .sent
            .iter()
            .filter(|n| n.kind == kind)
            .count()
    }

    /// Returns the number of notify calls received, delivered or not.
    pub fn attempts(&self) -> usize {
        lock(&self.state).attempts
    }
}

#[async_trait]
impl NotificationService for InMemoryNotificationService {
    async fn notify(
        &self,
        _ctx: &CallContext,
        notification: &Notification,
    ) -> Result<(), ServiceError> {
        let mut state = lock(&self.state);
        state.attempts += 1;
        match state.script.next() {
            Some(Scripted::Fail(error)) => Err(error),
            Some(Scripted::ApplyThenFail(error)) => {
                state.sent.push(notification.clone());
                Err(error)
            }
            None => {
                state.sent.push(notification.clone());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::services::SecurityContext;

    fn ctx() -> CallContext {
        CallContext::new(Duration::from_secs(1), SecurityContext::anonymous())
    }

    #[tokio::test]
    async fn test_notify_records_delivery() {
        let service = InMemoryNotificationService::new();
        let notification = Notification::order_confirmed(UserId::new(3), OrderId::new());

        service.notify(&ctx(), &notification).await.unwrap();

        assert_eq!(service.sent(), vec![notification]);
        assert_eq!(service.sent_of_kind(NotificationKind::OrderConfirmed), 1);
        assert_eq!(service.sent_of_kind(NotificationKind::OrderCancelled), 0);
    }

    #[tokio::test]
    async fn test_failed_notify_counts_attempt() {
        let service = InMemoryNotificationService::new();
        service.fail_all(Some(ServiceError::Unavailable("smtp down".into())));
        let notification = Notification::order_confirmed(UserId::new(3), OrderId::new());

        let result = service.notify(&ctx(), &notification).await;
        assert!(result.is_err());
        assert_eq!(service.attempts(), 1);
        assert!(service.sent().is_empty());
    }

    #[test]
    fn test_cancelled_message_carries_reason() {
        let notification = Notification::order_cancelled(
            UserId::new(3),
            OrderId::new(),
            &CancelReason::PaymentRejected("card declined".into()),
        );
        assert!(notification.message.ends_with("payment declined: card declined"));
    }
}
