use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    config::ShippingSettings,
    entities::{coupon, product},
    errors::{CouponError, ServiceError},
    money,
    services::coupons::{evaluate_coupon, CouponService, DiscountOutcome},
    services::shipping::ShippingOption,
};

/// A cart line as submitted by the client. Only the product reference and
/// quantity are taken at face value; price and stock come from the store.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CartLineInput {
    pub product_id: Uuid,
    pub quantity: i32,
}

/// A priced line, denormalized from the product row.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PricedLine {
    pub product_id: Uuid,
    pub name: String,
    pub sku: String,
    pub quantity: i32,
    pub unit_price_cents: i64,
    pub total_cents: i64,
}

/// Complete pricing of an order.
///
/// A rejected coupon does not abort pricing: the result is priced with
/// discount zero and `coupon_error` carries the specific reason for the
/// storefront to surface.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderPricing {
    pub lines: Vec<PricedLine>,
    pub subtotal_cents: i64,
    pub shipping_cost_cents: i64,
    pub discount_cents: i64,
    pub total_cents: i64,
    pub free_shipping_applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon: Option<DiscountOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon_error: Option<CouponError>,
}

/// Prices an order from trusted inputs.
///
/// Pure: same cart, coupon, shipping selection and settings always produce
/// the same result. `coupon` is the resolved model for `coupon_code`, `None`
/// when the code matched nothing.
pub fn price_order(
    lines: &[CartLineInput],
    products: &[product::Model],
    coupon_code: Option<&str>,
    coupon: Option<&coupon::Model>,
    selected_shipping: Option<&ShippingOption>,
    settings: &ShippingSettings,
    now: DateTime<Utc>,
) -> Result<OrderPricing, ServiceError> {
    if lines.is_empty() {
        return Err(ServiceError::ValidationError("cart is empty".to_string()));
    }

    let mut priced_lines = Vec::with_capacity(lines.len());
    let mut subtotal_cents: i64 = 0;

    for line in lines {
        let product = products
            .iter()
            .find(|p| p.id == line.product_id)
            .ok_or_else(|| {
                ServiceError::NotFound(format!("product {} not found", line.product_id))
            })?;

        if !product.is_active {
            return Err(ServiceError::InvalidOperation(format!(
                "product {} is no longer available",
                product.id
            )));
        }

        // stock is re-read at pricing time, never trusted from the client
        if line.quantity > product.stock_quantity {
            return Err(ServiceError::InsufficientStock(format!(
                "product {}: requested {}, available {}",
                product.id, line.quantity, product.stock_quantity
            )));
        }

        let line_total = money::multiply_by_quantity(product.price_cents, line.quantity)?;
        subtotal_cents = money::add(subtotal_cents, line_total);
        priced_lines.push(PricedLine {
            product_id: product.id,
            name: product.name.clone(),
            sku: product.sku.clone(),
            quantity: line.quantity,
            unit_price_cents: product.price_cents,
            total_cents: line_total,
        });
    }

    let (coupon_outcome, coupon_error) = match (coupon_code, coupon) {
        (None, _) => (None, None),
        (Some(_), None) => (None, Some(CouponError::NotFound)),
        (Some(_), Some(model)) => match evaluate_coupon(model, subtotal_cents, now) {
            Ok(outcome) => (Some(outcome), None),
            Err(e) => (None, Some(e)),
        },
    };

    let waives_shipping = coupon_outcome
        .as_ref()
        .map(|o| o.waives_shipping)
        .unwrap_or(false);
    let threshold_met =
        settings.free_shipping_enabled && subtotal_cents >= settings.free_shipping_minimum_cents;

    let shipping_cost_cents = if waives_shipping || threshold_met {
        0
    } else {
        selected_shipping
            .map(|s| s.price_cents)
            .unwrap_or(settings.default_flat_rate_cents)
    };

    let discount_cents = money::clamp_discount(
        coupon_outcome
            .as_ref()
            .map(|o| o.discount_cents)
            .unwrap_or(0),
        subtotal_cents,
    );

    let total_cents =
        money::saturating_subtract(money::add(subtotal_cents, shipping_cost_cents), discount_cents);

    Ok(OrderPricing {
        lines: priced_lines,
        subtotal_cents,
        shipping_cost_cents,
        discount_cents,
        total_cents,
        free_shipping_applied: shipping_cost_cents == 0 && (waives_shipping || threshold_met),
        coupon: coupon_outcome,
        coupon_error,
    })
}

#[derive(Clone)]
pub struct PricingService {
    db: Arc<DatabaseConnection>,
    coupons: CouponService,
    settings: ShippingSettings,
}

impl PricingService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        coupons: CouponService,
        settings: ShippingSettings,
    ) -> Self {
        Self {
            db,
            coupons,
            settings,
        }
    }

    /// Loads the referenced products and coupon, then prices the cart.
    #[instrument(skip(self, lines, selected_shipping))]
    pub async fn price(
        &self,
        lines: &[CartLineInput],
        coupon_code: Option<&str>,
        selected_shipping: Option<&ShippingOption>,
    ) -> Result<OrderPricing, ServiceError> {
        let product_ids: Vec<Uuid> = lines.iter().map(|l| l.product_id).collect();
        let products = product::Entity::find()
            .filter(product::Column::Id.is_in(product_ids))
            .all(&*self.db)
            .await?;

        let coupon_model = match coupon_code {
            Some(code) => self.coupons.find_by_code(code).await?,
            None => None,
        };

        price_order(
            lines,
            &products,
            coupon_code,
            coupon_model.as_ref(),
            selected_shipping,
            &self.settings,
            Utc::now(),
        )
    }
}
