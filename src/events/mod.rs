use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Events emitted by the order pipeline.
///
/// `OrderConfirmed` is the customer-facing confirmation side effect; the
/// reconciler guarantees it fires at most once per order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated(Uuid),
    OrderConfirmed {
        order_id: Uuid,
        external_reference: String,
        total_cents: i64,
    },
    PaymentStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    CouponRedeemed {
        coupon_id: Uuid,
        order_id: Uuid,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously. A full or closed channel is logged and
    /// swallowed; event delivery never fails a request.
    pub async fn send(&self, event: Event) {
        if let Err(e) = self.sender.send(event).await {
            warn!("failed to send event: {}", e);
        }
    }
}

/// Drains the event channel, logging each event. Downstream consumers
/// (notification senders, analytics) hang off this task.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::OrderCreated(order_id) => {
                info!(%order_id, "order created");
            }
            Event::OrderConfirmed {
                order_id,
                external_reference,
                total_cents,
            } => {
                info!(%order_id, %external_reference, total_cents, "order confirmed");
            }
            Event::PaymentStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(%order_id, %old_status, %new_status, "payment status changed");
            }
            Event::CouponRedeemed {
                coupon_id,
                order_id,
            } => {
                info!(%coupon_id, %order_id, "coupon redeemed");
            }
        }
    }
    info!("event channel closed, consumer exiting");
}
