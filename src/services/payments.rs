use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{
    config::PaymentProviderSettings,
    entities::{order, order_item},
    errors::ServiceError,
};

/// Payment details fetched from the provider by payment id.
///
/// Webhook bodies are not trusted: a notification only carries the payment
/// id, and everything else (status, amount, external reference) comes from
/// this fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentDetails {
    pub id: String,
    pub status: String,
    pub external_reference: Option<String>,
    pub transaction_amount_cents: i64,
    pub payer_email: Option<String>,
}

/// Provider-hosted checkout created for an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutPreference {
    pub id: String,
    pub init_point: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox_init_point: Option<String>,
}

/// Payment provider seam.
#[async_trait]
pub trait PaymentProviderApi: Send + Sync {
    /// Creates a hosted-checkout preference carrying the server-computed
    /// total and the order's external reference.
    async fn create_preference(
        &self,
        order: &order::Model,
        items: &[order_item::Model],
    ) -> Result<CheckoutPreference, ServiceError>;

    /// Fetches payment details by provider payment id.
    async fn fetch_payment(&self, payment_id: &str) -> Result<PaymentDetails, ServiceError>;
}

#[derive(Debug, Deserialize)]
struct RawPayment {
    id: serde_json::Value,
    status: String,
    external_reference: Option<String>,
    transaction_amount: Decimal,
    payer: Option<RawPayer>,
}

#[derive(Debug, Deserialize)]
struct RawPayer {
    email: Option<String>,
}

#[derive(Debug, Serialize)]
struct PreferenceItem {
    title: String,
    quantity: i32,
    currency_id: String,
    unit_price: Decimal,
}

#[derive(Debug, Serialize)]
struct PreferenceRequest {
    external_reference: String,
    items: Vec<PreferenceItem>,
}

#[derive(Debug, Deserialize)]
struct RawPreference {
    id: String,
    init_point: String,
    sandbox_init_point: Option<String>,
}

/// REST client for the payment provider.
pub struct HttpPaymentProvider {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl HttpPaymentProvider {
    pub fn from_settings(settings: &PaymentProviderSettings) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            access_token: settings.access_token.clone(),
        })
    }

    fn cents_from_amount(amount: Decimal) -> i64 {
        (amount * Decimal::from(100)).round().to_i64().unwrap_or(0)
    }

    fn amount_from_cents(cents: i64) -> Decimal {
        Decimal::from(cents) / Decimal::from(100)
    }
}

#[async_trait]
impl PaymentProviderApi for HttpPaymentProvider {
    #[instrument(skip(self, order, items), fields(external_reference = %order.external_reference))]
    async fn create_preference(
        &self,
        order: &order::Model,
        items: &[order_item::Model],
    ) -> Result<CheckoutPreference, ServiceError> {
        let request = PreferenceRequest {
            external_reference: order.external_reference.clone(),
            items: items
                .iter()
                .map(|item| PreferenceItem {
                    title: item.name.clone(),
                    quantity: item.quantity,
                    currency_id: order.currency.clone(),
                    unit_price: Self::amount_from_cents(item.unit_price_cents),
                })
                .collect(),
        };

        let raw: RawPreference = self
            .client
            .post(format!("{}/checkout/preferences", self.base_url))
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(CheckoutPreference {
            id: raw.id,
            init_point: raw.init_point,
            sandbox_init_point: raw.sandbox_init_point,
        })
    }

    #[instrument(skip(self))]
    async fn fetch_payment(&self, payment_id: &str) -> Result<PaymentDetails, ServiceError> {
        let raw: RawPayment = self
            .client
            .get(format!("{}/v1/payments/{}", self.base_url, payment_id))
            .bearer_auth(&self.access_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        // the provider serializes payment ids as numbers
        let id = match raw.id {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };

        Ok(PaymentDetails {
            id,
            status: raw.status,
            external_reference: raw.external_reference,
            transaction_amount_cents: Self::cents_from_amount(raw.transaction_amount),
            payer_email: raw.payer.and_then(|p| p.email),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_amount_conversion_round_trips() {
        assert_eq!(HttpPaymentProvider::cents_from_amount(dec!(280.00)), 28000);
        assert_eq!(HttpPaymentProvider::cents_from_amount(dec!(0.01)), 1);
        assert_eq!(HttpPaymentProvider::amount_from_cents(28000), dec!(280));
    }

    #[test]
    fn test_raw_payment_accepts_numeric_id() {
        let raw: RawPayment = serde_json::from_str(
            r#"{
                "id": 123456789,
                "status": "approved",
                "external_reference": "ref-1",
                "transaction_amount": 280.0,
                "payer": {"email": "ana@example.com"}
            }"#,
        )
        .unwrap();
        assert_eq!(raw.status, "approved");
        assert_eq!(HttpPaymentProvider::cents_from_amount(raw.transaction_amount), 28000);
    }
}
