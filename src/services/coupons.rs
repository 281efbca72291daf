use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::coupon::{self, Column, DiscountType, Entity as Coupon},
    errors::{CouponError, ServiceError},
    money,
};

/// Result of a successful coupon evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct DiscountOutcome {
    pub coupon_id: Uuid,
    pub code: String,
    /// Discount against the subtotal, already clamped to it
    pub discount_cents: i64,
    /// Set by free-shipping coupons; the pricing engine zeroes the
    /// shipping line when this is true
    pub waives_shipping: bool,
}

/// Validates a coupon against an order subtotal and produces its discount.
///
/// Pure: reads nothing but its arguments, so callers decide where the model
/// and clock come from. Checks run in a fixed order so the caller always gets
/// the most actionable rejection first.
pub fn evaluate_coupon(
    coupon: &coupon::Model,
    subtotal_cents: i64,
    now: DateTime<Utc>,
) -> Result<DiscountOutcome, CouponError> {
    if !coupon.is_active {
        return Err(CouponError::Inactive);
    }

    if let Some(expires_at) = coupon.expires_at {
        if now > expires_at {
            return Err(CouponError::Expired);
        }
    }

    if let Some(max_uses) = coupon.max_uses {
        if coupon.uses_count >= max_uses {
            return Err(CouponError::Exhausted);
        }
    }

    if subtotal_cents < coupon.min_purchase_cents {
        return Err(CouponError::BelowMinimum {
            required_cents: coupon.min_purchase_cents,
        });
    }

    let (discount_cents, waives_shipping) = match coupon.discount_type {
        DiscountType::Percentage => {
            let raw = money::percentage_of(subtotal_cents, coupon.discount_value);
            (money::clamp_discount(raw, subtotal_cents), false)
        }
        DiscountType::FixedAmount => {
            use rust_decimal::prelude::ToPrimitive;
            let raw = coupon.discount_value.to_i64().unwrap_or(0);
            (money::clamp_discount(raw, subtotal_cents), false)
        }
        DiscountType::FreeShipping => (0, true),
    };

    Ok(DiscountOutcome {
        coupon_id: coupon.id,
        code: coupon.code.clone(),
        discount_cents,
        waives_shipping,
    })
}

/// Coupon-store seam used by the reconciler to consume a use on confirmed
/// payment.
#[async_trait]
pub trait CouponGateway: Send + Sync {
    async fn redeem(&self, coupon_id: Uuid) -> Result<(), ServiceError>;
}

#[derive(Clone)]
pub struct CouponService {
    db: Arc<DatabaseConnection>,
}

impl CouponService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Finds a coupon by code, case-insensitively. Codes are stored
    /// upper-case, so the lookup upper-cases the input once.
    #[instrument(skip(self))]
    pub async fn find_by_code(&self, code: &str) -> Result<Option<coupon::Model>, ServiceError> {
        let normalized = code.trim().to_uppercase();
        if normalized.is_empty() {
            return Ok(None);
        }

        let found = Coupon::find()
            .filter(Column::Code.eq(normalized))
            .one(&*self.db)
            .await?;
        Ok(found)
    }

    /// Looks a code up and evaluates it against a subtotal.
    #[instrument(skip(self))]
    pub async fn evaluate_code(
        &self,
        code: &str,
        subtotal_cents: i64,
        now: DateTime<Utc>,
    ) -> Result<Result<DiscountOutcome, CouponError>, ServiceError> {
        match self.find_by_code(code).await? {
            None => {
                debug!(code, "coupon code not found");
                Ok(Err(CouponError::NotFound))
            }
            Some(model) => Ok(evaluate_coupon(&model, subtotal_cents, now)),
        }
    }
}

#[async_trait]
impl CouponGateway for CouponService {
    /// Consumes one use of a coupon, atomically.
    ///
    /// The increment and the max-uses guard are a single conditional UPDATE,
    /// so concurrent checkouts cannot push `uses_count` past `max_uses`.
    #[instrument(skip(self))]
    async fn redeem(&self, coupon_id: Uuid) -> Result<(), ServiceError> {
        let result = Coupon::update_many()
            .col_expr(
                Column::UsesCount,
                Expr::col(Column::UsesCount).add(1),
            )
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::Id.eq(coupon_id))
            .filter(
                Condition::any()
                    .add(Column::MaxUses.is_null())
                    .add(Expr::col(Column::UsesCount).lt(Expr::col(Column::MaxUses))),
            )
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            warn!(%coupon_id, "coupon redemption matched no rows (missing or exhausted)");
            return Err(ServiceError::Conflict(format!(
                "coupon {} could not be redeemed",
                coupon_id
            )));
        }
        Ok(())
    }
}
