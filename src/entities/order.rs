use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Order header. Monetary columns are BRL centavos.
///
/// `external_reference` is the idempotency key shared with the payment
/// provider; webhook notifications correlate back to the order through it,
/// never through a client-supplied id. `payment_status` is a plain string so
/// an unrecognized provider status can be stored verbatim.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, Validate)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[validate(length(
        min = 1,
        max = 50,
        message = "Order number must be between 1 and 50 characters"
    ))]
    pub order_number: String,

    #[sea_orm(unique)]
    pub external_reference: String,

    pub subtotal_cents: i64,
    pub shipping_cost_cents: i64,
    pub discount_cents: i64,
    pub total_cents: i64,
    pub currency: String,
    pub status: OrderStatus,
    pub payment_status: String,
    pub payment_id: Option<String>,
    pub coupon_id: Option<Uuid>,

    /// Set exactly once, on the first transition into an approved payment.
    /// Guards the confirmation side effect against webhook redelivery.
    pub approval_notified_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
    #[sea_orm(
        belongs_to = "super::coupon::Entity",
        from = "Column::CouponId",
        to = "super::coupon::Column::Id"
    )]
    Coupon,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl Related<super::coupon::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Coupon.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Order status vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "confirmed")]
    Confirmed,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "shipped")]
    Shipped,
    #[sea_orm(string_value = "delivered")]
    Delivered,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    #[sea_orm(string_value = "refunded")]
    Refunded,
}

impl OrderStatus {
    /// A terminal status is never regressed by a payment-driven transition.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Refunded | Self::Delivered)
    }
}

impl Model {
    /// `total == max(0, subtotal + shipping - discount)` must hold for every
    /// persisted order.
    pub fn totals_are_consistent(&self) -> bool {
        let expected = (self.subtotal_cents + self.shipping_cost_cents - self.discount_cents).max(0);
        self.total_cents == expected && self.total_cents >= 0
    }
}
