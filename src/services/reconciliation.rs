use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::{
    entities::order::{self, OrderStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    services::coupons::CouponGateway,
    services::orders::{OrderGateway, PaymentTransition},
};

/// A payment notification after corroboration against the provider.
///
/// Consumed once; redelivery is the provider's job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentNotification {
    pub provider_payment_id: String,
    pub provider_status: String,
    pub external_reference: String,
    pub amount_cents: i64,
    pub payer_email: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// What reconciliation did with a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconcileOutcome {
    /// The transition was written
    Applied {
        payment_status: String,
        order_status: OrderStatus,
    },
    /// The order already holds these values; nothing written, no side effects
    Unchanged,
    /// The notification ranks below the stored payment status (out-of-order
    /// redelivery); not applied
    Stale {
        stored_status: String,
        incoming_status: String,
    },
    /// No order matches the external reference; logged and acknowledged
    OrderNotFound,
}

/// Maps the provider's payment status vocabulary onto ours.
///
/// Unrecognized statuses pass through raw, with the order held at pending
/// until the provider sends something we understand.
pub fn map_provider_status(provider_status: &str) -> (String, OrderStatus) {
    let order_status = match provider_status {
        "approved" | "authorized" => OrderStatus::Confirmed,
        "pending" | "in_process" | "in_mediation" => OrderStatus::Pending,
        "rejected" | "cancelled" => OrderStatus::Cancelled,
        "refunded" | "charged_back" => OrderStatus::Refunded,
        _ => OrderStatus::Pending,
    };
    (provider_status.to_string(), order_status)
}

/// Ordinal rank of a payment status, used to reject out-of-order
/// notifications. Terminal statuses are never overwritten by non-terminal
/// ones; equal ranks may replace each other (a rejection can become a
/// cancellation).
pub fn payment_status_rank(payment_status: &str) -> u8 {
    match payment_status {
        "rejected" | "cancelled" | "refunded" | "charged_back" => 3,
        "approved" | "authorized" => 2,
        "in_process" | "in_mediation" => 1,
        // pending and anything unrecognized
        _ => 0,
    }
}

/// What to do with a notification given the order state it was decided
/// against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Unchanged,
    Stale {
        stored_status: String,
        incoming_status: String,
    },
    Apply(PaymentTransition),
}

/// Decides a notification against a snapshot of the order. Pure; the write
/// is conditioned on the snapshot still being current.
pub fn decide(
    order: &order::Model,
    notification: &PaymentNotification,
    now: DateTime<Utc>,
) -> Decision {
    let (new_payment_status, mapped_order_status) =
        map_provider_status(&notification.provider_status);

    if order.payment_status == new_payment_status {
        return Decision::Unchanged;
    }

    let stored_rank = payment_status_rank(&order.payment_status);
    let incoming_rank = payment_status_rank(&new_payment_status);
    if incoming_rank < stored_rank {
        return Decision::Stale {
            stored_status: order.payment_status.clone(),
            incoming_status: new_payment_status,
        };
    }

    // a delivered order keeps its fulfillment status; only the payment
    // facts change
    let order_status = if order.status == OrderStatus::Delivered {
        OrderStatus::Delivered
    } else {
        mapped_order_status
    };

    Decision::Apply(PaymentTransition {
        payment_status: new_payment_status,
        order_status,
        payment_id: Some(notification.provider_payment_id.clone()),
        updated_at: now,
    })
}

#[derive(Clone)]
pub struct PaymentReconciliationService {
    orders: Arc<dyn OrderGateway>,
    coupons: Arc<dyn CouponGateway>,
    event_sender: EventSender,
}

impl PaymentReconciliationService {
    pub fn new(
        orders: Arc<dyn OrderGateway>,
        coupons: Arc<dyn CouponGateway>,
        event_sender: EventSender,
    ) -> Self {
        Self {
            orders,
            coupons,
            event_sender,
        }
    }

    /// Applies a payment notification to its order, idempotently.
    ///
    /// Reapplying the same notification is a no-op in effect, and the
    /// confirmation side effect fires only on the first transition into an
    /// approved payment. Errors returned here are for the operator log; the
    /// webhook handler acknowledges the provider regardless.
    #[instrument(skip(self, notification), fields(
        external_reference = %notification.external_reference,
        provider_status = %notification.provider_status,
    ))]
    pub async fn reconcile(
        &self,
        notification: &PaymentNotification,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let Some(mut order) = self
            .orders
            .find_by_external_reference(&notification.external_reference)
            .await?
        else {
            warn!("payment notification references an unknown order");
            return Ok(ReconcileOutcome::OrderNotFound);
        };

        // the compare-and-set can lose to a concurrent delivery for the same
        // order; one re-read and re-decide settles who saw the fresh state
        for attempt in 0..2 {
            let transition = match decide(&order, notification, Utc::now()) {
                Decision::Unchanged => {
                    info!(order_id = %order.id, "notification already applied, nothing to do");
                    return Ok(ReconcileOutcome::Unchanged);
                }
                Decision::Stale {
                    stored_status,
                    incoming_status,
                } => {
                    warn!(
                        order_id = %order.id,
                        stored = %stored_status,
                        incoming = %incoming_status,
                        "out-of-order notification ignored"
                    );
                    return Ok(ReconcileOutcome::Stale {
                        stored_status,
                        incoming_status,
                    });
                }
                Decision::Apply(transition) => transition,
            };

            let applied = self
                .orders
                .apply_payment_transition(order.id, &order.payment_status, &transition)
                .await?;

            if applied {
                return self.finish_applied(&order, transition).await;
            }

            if attempt == 0 {
                order = self
                    .orders
                    .find_by_external_reference(&notification.external_reference)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!(
                            "order for reference {} vanished during reconciliation",
                            notification.external_reference
                        ))
                    })?;
            }
        }

        Err(ServiceError::Conflict(format!(
            "order {} changed concurrently twice during reconciliation",
            order.id
        )))
    }

    async fn finish_applied(
        &self,
        order: &order::Model,
        transition: PaymentTransition,
    ) -> Result<ReconcileOutcome, ServiceError> {
        info!(
            order_id = %order.id,
            old_status = %order.payment_status,
            new_status = %transition.payment_status,
            "payment transition applied"
        );
        self.event_sender
            .send(Event::PaymentStatusChanged {
                order_id: order.id,
                old_status: order.payment_status.clone(),
                new_status: transition.payment_status.clone(),
            })
            .await;

        if transition.payment_status == "approved" {
            self.fire_confirmation_once(order).await?;
        }

        Ok(ReconcileOutcome::Applied {
            payment_status: transition.payment_status,
            order_status: transition.order_status,
        })
    }

    /// Confirmation side effects, gated on winning the
    /// `approval_notified_at` stamp: the customer-facing event and the
    /// coupon redemption both happen at most once per order.
    async fn fire_confirmation_once(&self, order: &order::Model) -> Result<(), ServiceError> {
        let won = self
            .orders
            .mark_approval_notified(order.id, Utc::now())
            .await?;
        if !won {
            return Ok(());
        }

        self.event_sender
            .send(Event::OrderConfirmed {
                order_id: order.id,
                external_reference: order.external_reference.clone(),
                total_cents: order.total_cents,
            })
            .await;

        if let Some(coupon_id) = order.coupon_id {
            match self.coupons.redeem(coupon_id).await {
                Ok(()) => {
                    self.event_sender
                        .send(Event::CouponRedeemed {
                            coupon_id,
                            order_id: order.id,
                        })
                        .await;
                }
                Err(e) => {
                    // the order is already confirmed; an unredeemable coupon
                    // is an operator concern, not a reconciliation failure
                    warn!(order_id = %order.id, %coupon_id, error = %e, "coupon redemption failed");
                }
            }
        }
        Ok(())
    }
}
