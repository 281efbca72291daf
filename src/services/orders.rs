use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::{
        order::{self, Entity as Order, OrderStatus},
        order_item,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::pricing::OrderPricing,
};

/// Payment-driven field changes applied through the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentTransition {
    pub payment_status: String,
    pub order_status: OrderStatus,
    pub payment_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Store seam the reconciler writes through.
///
/// Both writes are compare-and-set: they only touch a row still in the state
/// the caller observed, so concurrent webhook deliveries for the same order
/// cannot interleave into an inconsistent (status, payment_status) pair.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn find_by_external_reference(
        &self,
        external_reference: &str,
    ) -> Result<Option<order::Model>, ServiceError>;

    /// Applies a payment transition iff the stored `payment_status` still
    /// equals `expected_payment_status`. Returns whether a row changed.
    async fn apply_payment_transition(
        &self,
        order_id: Uuid,
        expected_payment_status: &str,
        transition: &PaymentTransition,
    ) -> Result<bool, ServiceError>;

    /// Stamps `approval_notified_at` iff it is still unset. Returns whether
    /// this call won the stamp; the confirmation side effect fires only for
    /// the winner.
    async fn mark_approval_notified(
        &self,
        order_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, ServiceError>;
}

/// sea-orm implementation of the gateway over the orders table.
#[derive(Clone)]
pub struct SeaOrmOrderGateway {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmOrderGateway {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl OrderGateway for SeaOrmOrderGateway {
    async fn find_by_external_reference(
        &self,
        external_reference: &str,
    ) -> Result<Option<order::Model>, ServiceError> {
        let query = || {
            Order::find()
                .filter(order::Column::ExternalReference.eq(external_reference))
                .one(&*self.db)
        };

        // idempotent read: retried once with a short backoff; writes below
        // are never blindly retried
        match query().await {
            Ok(found) => Ok(found),
            Err(first) => {
                warn!(error = %first, "order lookup failed, retrying once");
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(query().await?)
            }
        }
    }

    async fn apply_payment_transition(
        &self,
        order_id: Uuid,
        expected_payment_status: &str,
        transition: &PaymentTransition,
    ) -> Result<bool, ServiceError> {
        let result = Order::update_many()
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(transition.payment_status.clone()),
            )
            .col_expr(order::Column::Status, Expr::value(transition.order_status))
            .col_expr(
                order::Column::PaymentId,
                Expr::value(transition.payment_id.clone()),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(transition.updated_at))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::PaymentStatus.eq(expected_payment_status))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn mark_approval_notified(
        &self,
        order_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let result = Order::update_many()
            .col_expr(order::Column::ApprovalNotifiedAt, Expr::value(Some(at)))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::ApprovalNotifiedAt.is_null())
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }
}

/// Service for creating and reading orders.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Persists a priced order and its items in one transaction.
    ///
    /// The order starts in `pending`/`"pending"` with a fresh external
    /// reference, before the customer is handed to the payment provider.
    #[instrument(skip(self, pricing))]
    pub async fn create_order(
        &self,
        pricing: &OrderPricing,
        currency: &str,
    ) -> Result<(order::Model, Vec<order_item::Model>), ServiceError> {
        let txn = self.db.begin().await?;

        let order_id = Uuid::new_v4();
        let now = Utc::now();
        let order = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(format!(
                "ORD-{}",
                order_id.to_string()[..8].to_uppercase()
            )),
            external_reference: Set(Uuid::new_v4().to_string()),
            subtotal_cents: Set(pricing.subtotal_cents),
            shipping_cost_cents: Set(pricing.shipping_cost_cents),
            discount_cents: Set(pricing.discount_cents),
            total_cents: Set(pricing.total_cents),
            currency: Set(currency.to_string()),
            status: Set(OrderStatus::Pending),
            payment_status: Set("pending".to_string()),
            payment_id: Set(None),
            coupon_id: Set(pricing.coupon.as_ref().map(|c| c.coupon_id)),
            approval_notified_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let order = order.insert(&txn).await?;

        let mut items = Vec::with_capacity(pricing.lines.len());
        for priced in &pricing.lines {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(priced.product_id),
                name: Set(priced.name.clone()),
                sku: Set(priced.sku.clone()),
                quantity: Set(priced.quantity),
                unit_price_cents: Set(priced.unit_price_cents),
                total_cents: Set(priced.total_cents),
                created_at: Set(now),
            };
            items.push(item.insert(&txn).await?);
        }

        txn.commit().await?;

        self.event_sender.send(Event::OrderCreated(order_id)).await;
        info!(
            %order_id,
            external_reference = %order.external_reference,
            total_cents = order.total_cents,
            "order created"
        );

        Ok((order, items))
    }

    #[instrument(skip(self))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    #[instrument(skip(self))]
    pub async fn find_by_external_reference(
        &self,
        external_reference: &str,
    ) -> Result<Option<order::Model>, ServiceError> {
        let found = Order::find()
            .filter(order::Column::ExternalReference.eq(external_reference))
            .one(&*self.db)
            .await?;
        Ok(found)
    }
}
