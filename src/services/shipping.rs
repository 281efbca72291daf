use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use utoipa::ToSchema;

use crate::{config::ShippingSettings, errors::ServiceError};

/// A package to quote, aggregated from cart lines.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Package {
    pub weight_grams: i32,
    pub width_cm: i32,
    pub height_cm: i32,
    pub length_cm: i32,
}

/// A single shipping choice presented to the customer.
///
/// Produced fresh per quote request, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ShippingOption {
    pub id: String,
    pub carrier_name: String,
    pub price_cents: i64,
    pub estimated_days: i32,
    pub is_free_override: bool,
}

/// Raw rate returned by a carrier integration before filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarrierRate {
    pub id: String,
    pub carrier_name: String,
    pub price_cents: Option<i64>,
    pub estimated_days: i32,
    #[serde(default)]
    pub error: Option<String>,
}

/// Quote request forwarded to a carrier integration.
#[derive(Debug, Clone, Serialize)]
pub struct CarrierQuoteRequest {
    pub origin_postal_code: String,
    pub dest_postal_code: String,
    pub packages: Vec<Package>,
    pub carriers: Vec<String>,
    pub sandbox: bool,
}

/// Carrier quoting seam. The HTTP client is the production implementation;
/// swapping in another carrier (or a test double) never touches the pricing
/// engine.
#[async_trait]
pub trait CarrierApi: Send + Sync {
    async fn fetch_rates(
        &self,
        request: &CarrierQuoteRequest,
    ) -> Result<Vec<CarrierRate>, ServiceError>;
}

/// Carrier quote endpoint client.
pub struct HttpCarrierClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCarrierClient {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl CarrierApi for HttpCarrierClient {
    async fn fetch_rates(
        &self,
        request: &CarrierQuoteRequest,
    ) -> Result<Vec<CarrierRate>, ServiceError> {
        let response = self
            .client
            .post(format!("{}/quote", self.base_url))
            .json(request)
            .send()
            .await?
            .error_for_status()?;

        let rates: Vec<CarrierRate> = response.json().await?;
        Ok(rates)
    }
}

/// Normalizes a CEP: strips an optional hyphen, requires exactly 8 digits.
pub fn normalize_cep(raw: &str) -> Result<String, ServiceError> {
    let digits: String = raw.trim().chars().filter(|c| *c != '-').collect();
    if digits.len() != 8 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(ServiceError::ValidationError(format!(
            "malformed postal code: {:?}",
            raw
        )));
    }
    Ok(digits)
}

/// Fixed regional price table for the simulation fallback. Rows are
/// (region, standard price/days, express price/days) in centavos.
const REGION_TABLE: &[(&str, i64, i32, i64, i32)] = &[
    ("sp", 1890, 4, 3290, 1),
    ("rj", 2190, 5, 3690, 2),
    ("es", 2390, 6, 3990, 3),
    ("mg", 2290, 5, 3790, 2),
    ("sul", 2590, 7, 4290, 3),
    ("outros", 3490, 10, 5590, 5),
];

/// Buckets a normalized CEP into a pricing region by its first two digits.
pub fn region_for_cep(cep: &str) -> &'static str {
    let prefix: u32 = cep.get(..2).and_then(|p| p.parse().ok()).unwrap_or(0);
    match prefix {
        1..=19 => "sp",
        20..=28 => "rj",
        29 => "es",
        30..=39 => "mg",
        80..=99 => "sul",
        _ => "outros",
    }
}

/// Deterministic regional simulation used when no carrier is configured or
/// the carrier call fails. Pure function of the destination CEP: repeated
/// calls with the same input return identical output.
pub fn simulate_rates(dest_cep: &str) -> Vec<CarrierRate> {
    let region = region_for_cep(dest_cep);
    let row = REGION_TABLE
        .iter()
        .find(|(r, ..)| *r == region)
        .unwrap_or(&REGION_TABLE[REGION_TABLE.len() - 1]);
    let (_, standard_cents, standard_days, express_cents, express_days) = *row;

    vec![
        CarrierRate {
            id: format!("sim-standard-{}", region),
            carrier_name: "Entrega Padrão".to_string(),
            price_cents: Some(standard_cents),
            estimated_days: standard_days,
            error: None,
        },
        CarrierRate {
            id: format!("sim-express-{}", region),
            carrier_name: "Entrega Expressa".to_string(),
            price_cents: Some(express_cents),
            estimated_days: express_days,
            error: None,
        },
    ]
}

#[derive(Clone)]
pub struct ShippingQuoteService {
    settings: ShippingSettings,
    carrier: Option<Arc<dyn CarrierApi>>,
}

impl ShippingQuoteService {
    pub fn new(settings: ShippingSettings, carrier: Option<Arc<dyn CarrierApi>>) -> Self {
        Self { settings, carrier }
    }

    /// Builds a service from configuration: a carrier client when an
    /// endpoint is configured, simulation-only otherwise.
    pub fn from_settings(settings: ShippingSettings) -> Result<Self, ServiceError> {
        let carrier: Option<Arc<dyn CarrierApi>> = match &settings.carrier_api_url {
            Some(url) => Some(Arc::new(HttpCarrierClient::new(
                url.clone(),
                Duration::from_secs(settings.carrier_timeout_secs),
            )?)),
            None => None,
        };
        Ok(Self::new(settings, carrier))
    }

    pub fn settings(&self) -> &ShippingSettings {
        &self.settings
    }

    /// Quotes shipping options for a destination.
    ///
    /// `origin_postal_code` overrides the configured origin when given
    /// (admin previews); storefront callers pass `None`. Returns at least
    /// the simulated fallback; the list is ordered by ascending price, ties
    /// broken by fewer estimated days. When the free-shipping threshold is
    /// met, a zero-priced option derived from the cheapest priced one is
    /// injected while the priced options stay in the response.
    #[instrument(skip(self, packages))]
    pub async fn quote(
        &self,
        origin_postal_code: Option<&str>,
        dest_postal_code: &str,
        packages: &[Package],
        subtotal_cents: i64,
    ) -> Result<Vec<ShippingOption>, ServiceError> {
        let origin = normalize_cep(origin_postal_code.unwrap_or(&self.settings.origin_postal_code))?;
        let dest = normalize_cep(dest_postal_code)?;

        let rates = match &self.carrier {
            Some(carrier) => {
                let request = CarrierQuoteRequest {
                    origin_postal_code: origin,
                    dest_postal_code: dest.clone(),
                    packages: packages.to_vec(),
                    carriers: self.settings.active_carriers.clone(),
                    sandbox: self.settings.sandbox_mode,
                };
                match carrier.fetch_rates(&request).await {
                    Ok(rates) => {
                        let usable: Vec<CarrierRate> = rates
                            .into_iter()
                            .filter(|r| r.error.is_none() && r.price_cents.is_some())
                            .collect();
                        if usable.is_empty() {
                            debug!(dest = %dest, "carrier returned no usable rates, falling back to simulation");
                            simulate_rates(&dest)
                        } else {
                            usable
                        }
                    }
                    Err(e) => {
                        warn!(dest = %dest, error = %e, "carrier quote failed, falling back to simulation");
                        simulate_rates(&dest)
                    }
                }
            }
            None => simulate_rates(&dest),
        };

        let mut options: Vec<ShippingOption> = rates
            .into_iter()
            .filter_map(|r| {
                let price_cents = r.price_cents?;
                Some(ShippingOption {
                    id: r.id,
                    carrier_name: r.carrier_name,
                    price_cents,
                    estimated_days: r.estimated_days,
                    is_free_override: false,
                })
            })
            .collect();

        options.sort_by(|a, b| {
            a.price_cents
                .cmp(&b.price_cents)
                .then(a.estimated_days.cmp(&b.estimated_days))
        });

        if self.settings.free_shipping_enabled
            && subtotal_cents >= self.settings.free_shipping_minimum_cents
        {
            if let Some(cheapest) = options.first().cloned() {
                options.insert(
                    0,
                    ShippingOption {
                        id: format!("{}-free", cheapest.id),
                        carrier_name: cheapest.carrier_name,
                        price_cents: 0,
                        estimated_days: cheapest.estimated_days + 2,
                        is_free_override: true,
                    },
                );
            }
        }

        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ShippingSettings {
        ShippingSettings {
            free_shipping_enabled: true,
            free_shipping_minimum_cents: 30000,
            ..ShippingSettings::default()
        }
    }

    #[test]
    fn test_normalize_cep() {
        assert_eq!(normalize_cep("01310100").unwrap(), "01310100");
        assert_eq!(normalize_cep("01310-100").unwrap(), "01310100");
        assert_eq!(normalize_cep(" 20040-020 ").unwrap(), "20040020");
        assert!(normalize_cep("0131010").is_err());
        assert!(normalize_cep("01310-1000").is_err());
        assert!(normalize_cep("abcdefgh").is_err());
        assert!(normalize_cep("").is_err());
    }

    #[test]
    fn test_region_bucketing() {
        assert_eq!(region_for_cep("01310100"), "sp");
        assert_eq!(region_for_cep("19999999"), "sp");
        assert_eq!(region_for_cep("20040020"), "rj");
        assert_eq!(region_for_cep("28999999"), "rj");
        assert_eq!(region_for_cep("29000000"), "es");
        assert_eq!(region_for_cep("30100000"), "mg");
        assert_eq!(region_for_cep("80010000"), "sul");
        assert_eq!(region_for_cep("99999999"), "sul");
        assert_eq!(region_for_cep("40000000"), "outros");
        assert_eq!(region_for_cep("00999999"), "outros");
    }

    #[test]
    fn test_simulation_is_deterministic() {
        let a = simulate_rates("01310100");
        let b = simulate_rates("01310100");
        assert_eq!(serde_json::to_string(&a).unwrap(), serde_json::to_string(&b).unwrap());
    }

    #[tokio::test]
    async fn test_quote_uses_sp_table_for_sao_paulo() {
        let service = ShippingQuoteService::new(settings(), None);
        let options = service.quote(None, "01310-100", &[], 10000).await.unwrap();
        assert!(options.iter().all(|o| o.id.ends_with("-sp")));
        assert_eq!(options[0].price_cents, 1890);
    }

    #[tokio::test]
    async fn test_quote_sorted_by_price_then_days() {
        let service = ShippingQuoteService::new(settings(), None);
        let options = service.quote(None, "80010000", &[], 10000).await.unwrap();
        let prices: Vec<i64> = options.iter().map(|o| o.price_cents).collect();
        let mut sorted = prices.clone();
        sorted.sort();
        assert_eq!(prices, sorted);
    }

    #[tokio::test]
    async fn test_free_option_injected_above_threshold() {
        let service = ShippingQuoteService::new(settings(), None);
        let options = service.quote(None, "01310100", &[], 30000).await.unwrap();
        assert!(options[0].is_free_override);
        assert_eq!(options[0].price_cents, 0);
        // the priced options remain alongside the free one
        assert!(options.iter().filter(|o| !o.is_free_override).count() >= 2);
        // derived from the cheapest priced option, slightly longer window
        let cheapest_priced = options
            .iter()
            .find(|o| !o.is_free_override)
            .unwrap();
        assert_eq!(options[0].carrier_name, cheapest_priced.carrier_name);
        assert_eq!(options[0].estimated_days, cheapest_priced.estimated_days + 2);
    }

    #[tokio::test]
    async fn test_no_free_option_below_threshold() {
        let service = ShippingQuoteService::new(settings(), None);
        let options = service.quote(None, "01310100", &[], 29999).await.unwrap();
        assert!(options.iter().all(|o| !o.is_free_override));
    }

    #[tokio::test]
    async fn test_no_free_option_when_rule_disabled() {
        let mut s = settings();
        s.free_shipping_enabled = false;
        let service = ShippingQuoteService::new(s, None);
        let options = service.quote(None, "01310100", &[], 100000).await.unwrap();
        assert!(options.iter().all(|o| !o.is_free_override));
    }

    #[tokio::test]
    async fn test_malformed_cep_rejected_before_lookup() {
        let service = ShippingQuoteService::new(settings(), None);
        let err = service.quote(None, "123", &[], 10000).await.unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(_)));
    }

    struct FailingCarrier;

    #[async_trait]
    impl CarrierApi for FailingCarrier {
        async fn fetch_rates(
            &self,
            _request: &CarrierQuoteRequest,
        ) -> Result<Vec<CarrierRate>, ServiceError> {
            Err(ServiceError::ExternalServiceError("timed out".to_string()))
        }
    }

    #[tokio::test]
    async fn test_carrier_failure_falls_back_to_simulation() {
        let service = ShippingQuoteService::new(settings(), Some(Arc::new(FailingCarrier)));
        let options = service.quote(None, "01310100", &[], 10000).await.unwrap();
        assert!(!options.is_empty());
        assert!(options.iter().any(|o| o.id.starts_with("sim-")));
    }

    struct ErrorFlaggedCarrier;

    #[async_trait]
    impl CarrierApi for ErrorFlaggedCarrier {
        async fn fetch_rates(
            &self,
            _request: &CarrierQuoteRequest,
        ) -> Result<Vec<CarrierRate>, ServiceError> {
            Ok(vec![CarrierRate {
                id: "pac".to_string(),
                carrier_name: "PAC".to_string(),
                price_cents: None,
                estimated_days: 6,
                error: Some("área não atendida".to_string()),
            }])
        }
    }

    #[tokio::test]
    async fn test_all_rates_errored_falls_back_to_simulation() {
        let service = ShippingQuoteService::new(settings(), Some(Arc::new(ErrorFlaggedCarrier)));
        let options = service.quote(None, "01310100", &[], 10000).await.unwrap();
        assert!(!options.is_empty());
        assert!(options.iter().any(|o| o.id.starts_with("sim-")));
    }
}
