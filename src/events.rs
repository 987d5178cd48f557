use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::BuyerId;

/// Events emitted by the purchase engine. Consumers (audit log, alerting,
/// front-end notifications) subscribe via the receiving half of the channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    PaymentCreated {
        buyer: BuyerId,
        product_id: Uuid,
        payment_id: String,
    },
    PurchaseCompleted {
        buyer: BuyerId,
        product_id: Uuid,
        purchase_id: Uuid,
    },
    PurchaseCanceled {
        buyer: BuyerId,
    },
    PurchaseFailed {
        buyer: BuyerId,
        payment_id: String,
    },
    /// The payment succeeded but the last unit was sold to a concurrent
    /// buyer. There is no automated compensation path; this event exists so
    /// operators can resolve it out of band. Distinct from ordinary
    /// out-of-stock on purpose.
    PaidButOutOfStock {
        buyer: BuyerId,
        product_id: Uuid,
        payment_id: String,
        occurred_at: DateTime<Utc>,
    },
    SessionExpired {
        buyer: BuyerId,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event, logging (not failing) when no consumer is attached.
    /// Event delivery is best-effort and must never block a purchase.
    pub async fn send(&self, event: Event) {
        if let Err(e) = self.sender.send(event).await {
            tracing::warn!("event channel closed, dropping event: {}", e);
        }
    }
}

/// Convenience constructor for an event channel with a bounded buffer.
pub fn channel(buffer: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(buffer);
    (EventSender::new(tx), rx)
}
