use axum::{extract::State, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    errors::{CouponError, ServiceError},
    services::{pricing::CartLineInput, pricing::OrderPricing, shipping::ShippingOption},
    ApiResponse, AppState,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CheckoutRequest {
    pub lines: Vec<CartLineInput>,
    #[serde(default)]
    pub coupon_code: Option<String>,
    #[serde(default)]
    pub selected_shipping: Option<ShippingOption>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutResponse {
    pub order_id: Uuid,
    pub order_number: String,
    pub external_reference: String,
    pub pricing: OrderPricing,
    /// Provider-hosted checkout URL the storefront redirects to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon_error: Option<CouponError>,
}

/// Prices the cart, creates the order in `pending`/`pending`, and opens a
/// provider checkout for it.
///
/// Totals sent to the provider are the server-computed ones; nothing from
/// the client is forwarded as an amount.
#[utoipa::path(
    post,
    path = "/api/v1/checkout",
    request_body = CheckoutRequest,
    responses(
        (status = 200, description = "Order created and checkout opened"),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn start_checkout(
    State(state): State<AppState>,
    Json(request): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let pricing = state
        .services
        .pricing
        .price(
            &request.lines,
            request.coupon_code.as_deref(),
            request.selected_shipping.as_ref(),
        )
        .await?;
    let coupon_error = pricing.coupon_error.clone();

    let (order, items) = state
        .services
        .orders
        .create_order(&pricing, &state.config.currency)
        .await?;

    // a provider outage should not lose the order that was just created;
    // the storefront can retry the redirect with the external reference
    let checkout_url = match state
        .services
        .payment_provider
        .create_preference(&order, &items)
        .await
    {
        Ok(preference) => Some(preference.init_point),
        Err(e) => {
            warn!(order_id = %order.id, error = %e, "checkout preference creation failed");
            None
        }
    };

    Ok(Json(ApiResponse::success(CheckoutResponse {
        order_id: order.id,
        order_number: order.order_number,
        external_reference: order.external_reference,
        pricing,
        checkout_url,
        coupon_error,
    })))
}
