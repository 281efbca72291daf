use axum::{extract::State, response::IntoResponse, Json};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::{errors::ServiceError, services::shipping::Package, ApiResponse, AppState};

#[derive(Debug, Deserialize, ToSchema)]
pub struct ShippingQuoteRequest {
    #[serde(default)]
    pub origin_postal_code: Option<String>,
    pub dest_postal_code: String,
    #[serde(default)]
    pub packages: Vec<Package>,
    pub subtotal_cents: i64,
}

/// Quotes shipping options for a destination CEP.
///
/// Never returns an empty list: when no carrier is configured or the carrier
/// call fails, the deterministic regional simulation answers.
#[utoipa::path(
    post,
    path = "/api/v1/shipping/quote",
    request_body = ShippingQuoteRequest,
    responses(
        (status = 200, description = "Ranked shipping options"),
        (status = 400, description = "Malformed postal code", body = crate::errors::ErrorResponse)
    ),
    tag = "Shipping"
)]
pub async fn quote_shipping(
    State(state): State<AppState>,
    Json(request): Json<ShippingQuoteRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let options = state
        .services
        .shipping
        .quote(
            request.origin_postal_code.as_deref(),
            &request.dest_postal_code,
            &request.packages,
            request.subtotal_cents,
        )
        .await?;

    Ok(Json(ApiResponse::success(options)))
}
