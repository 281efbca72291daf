use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::{services, AppState};

pub mod checkout;
pub mod health;
pub mod payment_webhooks;
pub mod pricing;
pub mod shipping;

/// Shared service container handed to every handler through `AppState`.
#[derive(Clone)]
pub struct AppServices {
    pub pricing: services::pricing::PricingService,
    pub shipping: services::shipping::ShippingQuoteService,
    pub coupons: services::coupons::CouponService,
    pub orders: services::orders::OrderService,
    pub reconciliation: services::reconciliation::PaymentReconciliationService,
    pub payment_provider: Arc<dyn services::payments::PaymentProviderApi>,
}

/// Routes mounted under `/api/v1`.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/checkout/price", post(pricing::price_order))
        .route("/checkout", post(checkout::start_checkout))
        .route("/shipping/quote", post(shipping::quote_shipping))
        .route("/payments/webhook", post(payment_webhooks::payment_webhook))
}

/// Top-level routes outside the versioned API.
pub fn root_routes() -> Router<AppState> {
    Router::new().route("/health", get(health::health_check))
}
