//! Notification collaborator
//!
//! Delivery mechanics live outside this service; the orchestrator only calls
//! into this seam after a terminal state change has been durably persisted.
//! Dispatch is fire-and-forget with its own failure handling, decoupled from
//! the callback's HTTP response.

use crate::database::payment_repository::PaymentRecord;
use async_trait::async_trait;
use tracing::{info, warn};

/// Terminal payment events worth telling a human about
#[derive(Debug, Clone)]
pub enum PaymentEvent {
    Completed(PaymentRecord),
    Failed(PaymentRecord),
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: PaymentEvent);
}

/// Default sink: structured log lines picked up by the notification service
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn notify(&self, event: PaymentEvent) {
        match event {
            PaymentEvent::Completed(record) => {
                info!(
                    payment_id = %record.id,
                    amount = record.amount,
                    receipt = record.gateway_receipt_id.as_deref().unwrap_or(""),
                    "payment completed notification"
                );
            }
            PaymentEvent::Failed(record) => {
                warn!(
                    payment_id = %record.id,
                    amount = record.amount,
                    failure_code = record.failure_code.as_deref().unwrap_or(""),
                    "payment failed notification"
                );
            }
        }
    }
}
