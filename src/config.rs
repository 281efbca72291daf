use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use tracing::info;
use validator::Validate;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_CURRENCY: &str = "BRL";
const DEFAULT_FLAT_RATE_CENTS: i64 = 2490;
const DEFAULT_FREE_SHIPPING_MINIMUM_CENTS: i64 = 30000;
const DEFAULT_CARRIER_TIMEOUT_SECS: u64 = 5;
const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 10;
const DEFAULT_WEBHOOK_TOLERANCE_SECS: u64 = 300;

/// Shipping settings, admin-managed and read-only at quote time.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ShippingSettings {
    /// Origin CEP for carrier quote requests
    #[validate(length(min = 8, max = 9))]
    pub origin_postal_code: String,

    /// Whether the free-shipping threshold rule is active
    #[serde(default)]
    pub free_shipping_enabled: bool,

    /// Subtotal (centavos) at which shipping becomes free
    #[serde(default = "default_free_shipping_minimum")]
    pub free_shipping_minimum_cents: i64,

    /// Flat rate (centavos) used before the customer picks a quote
    #[serde(default = "default_flat_rate")]
    pub default_flat_rate_cents: i64,

    /// Carrier service codes to request, empty means all
    #[serde(default)]
    pub active_carriers: Vec<String>,

    /// Quote against the carrier sandbox instead of production
    #[serde(default)]
    pub sandbox_mode: bool,

    /// Carrier quote endpoint; unset means the regional simulation is used
    #[serde(default)]
    pub carrier_api_url: Option<String>,

    /// Carrier quote request timeout in seconds
    #[serde(default = "default_carrier_timeout")]
    pub carrier_timeout_secs: u64,
}

impl Default for ShippingSettings {
    fn default() -> Self {
        Self {
            origin_postal_code: "01310100".to_string(),
            free_shipping_enabled: false,
            free_shipping_minimum_cents: default_free_shipping_minimum(),
            default_flat_rate_cents: default_flat_rate(),
            active_carriers: Vec::new(),
            sandbox_mode: false,
            carrier_api_url: None,
            carrier_timeout_secs: default_carrier_timeout(),
        }
    }
}

/// Payment provider settings.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PaymentProviderSettings {
    /// Provider REST base URL
    #[validate(url)]
    pub base_url: String,

    /// Bearer token for provider API calls
    pub access_token: String,

    /// HMAC secret for webhook signature verification; unset disables it
    #[serde(default)]
    pub webhook_secret: Option<String>,

    /// Maximum webhook timestamp skew in seconds
    #[serde(default = "default_webhook_tolerance")]
    pub webhook_tolerance_secs: u64,

    /// Provider request timeout in seconds
    #[serde(default = "default_provider_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for PaymentProviderSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.mercadopago.com".to_string(),
            access_token: String::new(),
            webhook_secret: None,
            webhook_tolerance_secs: default_webhook_tolerance(),
            request_timeout_secs: default_provider_timeout(),
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[serde(default = "default_env")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Store currency; pricing is fixed to BRL minor units
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Shipping settings
    #[serde(default)]
    #[validate]
    pub shipping: ShippingSettings,

    /// Payment provider settings
    #[serde(default)]
    #[validate]
    pub payment: PaymentProviderSettings,
}

impl AppConfig {
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_env() -> String {
    DEFAULT_ENV.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_flat_rate() -> i64 {
    DEFAULT_FLAT_RATE_CENTS
}

fn default_free_shipping_minimum() -> i64 {
    DEFAULT_FREE_SHIPPING_MINIMUM_CENTS
}

fn default_carrier_timeout() -> u64 {
    DEFAULT_CARRIER_TIMEOUT_SECS
}

fn default_provider_timeout() -> u64 {
    DEFAULT_PROVIDER_TIMEOUT_SECS
}

fn default_webhook_tolerance() -> u64 {
    DEFAULT_WEBHOOK_TOLERANCE_SECS
}

/// Loads configuration from layered sources: `config/default`, an
/// environment-specific file, then `APP_`-prefixed environment variables
/// (`APP_SHIPPING__ORIGIN_POSTAL_CODE` style overrides).
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let run_env = std::env::var("RUN_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let settings = Config::builder()
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let cfg: AppConfig = settings.try_deserialize()?;
    cfg.validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {}", e)))?;

    info!(environment = %cfg.environment, "configuration loaded");
    Ok(cfg)
}

/// Initializes the global tracing subscriber.
pub fn init_tracing(log_level: &str, json: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("aurea_api={0},tower_http={0}", log_level)));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shipping_defaults() {
        let settings = ShippingSettings::default();
        assert!(!settings.free_shipping_enabled);
        assert_eq!(settings.free_shipping_minimum_cents, 30000);
        assert_eq!(settings.default_flat_rate_cents, 2490);
        assert!(settings.carrier_api_url.is_none());
    }

    #[test]
    fn test_webhook_tolerance_default() {
        let settings = PaymentProviderSettings::default();
        assert_eq!(settings.webhook_tolerance_secs, 300);
    }
}
