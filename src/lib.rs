//! Aurea storefront API library
//!
//! Order pricing, coupon evaluation, shipping quotes, and payment
//! reconciliation for the Aurea jewelry store.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod money;
pub mod openapi;
pub mod services;

use std::sync::Arc;

use axum::Router;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use utoipa::ToSchema;

use crate::errors::ServiceError;
use crate::handlers::AppServices;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: AppServices,
}

/// Wires every service against the database and configuration.
pub fn build_services(
    db: Arc<DatabaseConnection>,
    cfg: &config::AppConfig,
    event_sender: events::EventSender,
) -> Result<AppServices, ServiceError> {
    let coupons = services::coupons::CouponService::new(db.clone());
    let shipping = services::shipping::ShippingQuoteService::from_settings(cfg.shipping.clone())?;
    let pricing =
        services::pricing::PricingService::new(db.clone(), coupons.clone(), cfg.shipping.clone());
    let orders = services::orders::OrderService::new(db.clone(), event_sender.clone());

    let order_gateway = Arc::new(services::orders::SeaOrmOrderGateway::new(db.clone()));
    let reconciliation = services::reconciliation::PaymentReconciliationService::new(
        order_gateway,
        Arc::new(coupons.clone()),
        event_sender,
    );

    let payment_provider: Arc<dyn services::payments::PaymentProviderApi> = Arc::new(
        services::payments::HttpPaymentProvider::from_settings(&cfg.payment)?,
    );

    Ok(AppServices {
        pricing,
        shipping,
        coupons,
        orders,
        reconciliation,
        payment_provider,
    })
}

/// Builds the axum application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(handlers::root_routes())
        .nest("/api/v1", handlers::api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Common response wrapper for successful payloads.
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn success_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message.into()),
        }
    }
}
