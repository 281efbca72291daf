use utoipa::OpenApi;

use crate::{errors, handlers, services};

/// OpenAPI document for the storefront core API.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::pricing::price_order,
        handlers::checkout::start_checkout,
        handlers::shipping::quote_shipping,
        handlers::payment_webhooks::payment_webhook,
        handlers::health::health_check,
    ),
    components(schemas(
        errors::ErrorResponse,
        errors::CouponError,
        handlers::pricing::PriceOrderRequest,
        handlers::checkout::CheckoutRequest,
        handlers::checkout::CheckoutResponse,
        handlers::shipping::ShippingQuoteRequest,
        services::coupons::DiscountOutcome,
        services::pricing::CartLineInput,
        services::pricing::PricedLine,
        services::pricing::OrderPricing,
        services::shipping::Package,
        services::shipping::ShippingOption,
    )),
    tags(
        (name = "Checkout", description = "Server-side pricing and order creation"),
        (name = "Shipping", description = "Shipping quotes"),
        (name = "Payments", description = "Payment provider webhooks"),
        (name = "Health", description = "Service health")
    )
)]
pub struct ApiDoc;
