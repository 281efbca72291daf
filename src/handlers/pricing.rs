use axum::{extract::State, response::IntoResponse, Json};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::{
    errors::ServiceError,
    services::{pricing::CartLineInput, shipping::ShippingOption},
    ApiResponse, AppState,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct PriceOrderRequest {
    pub lines: Vec<CartLineInput>,
    #[serde(default)]
    pub coupon_code: Option<String>,
    #[serde(default)]
    pub selected_shipping: Option<ShippingOption>,
}

/// Prices a cart server-side from trusted inputs.
///
/// A rejected coupon comes back inside the priced result, not as an HTTP
/// failure; hard errors (bad input, unknown product, insufficient stock) use
/// the regular error mapping.
#[utoipa::path(
    post,
    path = "/api/v1/checkout/price",
    request_body = PriceOrderRequest,
    responses(
        (status = 200, description = "Order priced"),
        (status = 404, description = "Unknown product", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn price_order(
    State(state): State<AppState>,
    Json(request): Json<PriceOrderRequest>,
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

    Ok(Json(ApiResponse::success(pricing)))
}
