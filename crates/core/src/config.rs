use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `PERK__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub visits: VisitConfig,
    #[serde(default)]
    pub square: SquareConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Header carrying the gateway-verified caller identity claim.
    #[serde(default = "default_identity_header")]
    pub identity_header: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// ─── Visit Pipeline Config ──────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct VisitConfig {
    /// Width of the order look-back window ending at the claimed timestamp.
    #[serde(default = "default_lookback_minutes")]
    pub lookback_minutes: u32,
    #[serde(default = "default_order_search_timeout_ms")]
    pub order_search_timeout_ms: u64,
    /// Extra attempts after an upstream provider failure.
    #[serde(default = "default_provider_retries")]
    pub provider_retries: u32,
    /// Attempts for a ledger increment that hits a concurrency conflict.
    #[serde(default = "default_ledger_max_attempts")]
    pub ledger_max_attempts: u32,
    #[serde(default = "default_minor_units_per_point")]
    pub minor_units_per_point: u32,
}

fn default_lookback_minutes() -> u32 { 3 }
fn default_order_search_timeout_ms() -> u64 { 3000 }
fn default_provider_retries() -> u32 { 1 }
fn default_ledger_max_attempts() -> u32 { 3 }
fn default_minor_units_per_point() -> u32 { 100 }

impl Default for VisitConfig {
    fn default() -> Self {
        Self {
            lookback_minutes: default_lookback_minutes(),
            order_search_timeout_ms: default_order_search_timeout_ms(),
            provider_retries: default_provider_retries(),
            ledger_max_attempts: default_ledger_max_attempts(),
            minor_units_per_point: default_minor_units_per_point(),
        }
    }
}

// ─── Square Config ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct SquareConfig {
    #[serde(default = "default_square_base_url")]
    pub base_url: String,
    #[serde(default = "default_square_version")]
    pub api_version: String,
    #[serde(default = "default_square_search_limit")]
    pub search_limit: u32,
    #[serde(default = "default_square_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_square_base_url() -> String { "https://connect.squareup.com".to_string() }
fn default_square_version() -> String { "2024-01-18".to_string() }
fn default_square_search_limit() -> u32 { 20 }
fn default_square_request_timeout_ms() -> u64 { 2500 }

impl Default for SquareConfig {
    fn default() -> Self {
        Self {
            base_url: default_square_base_url(),
            api_version: default_square_version(),
            search_limit: default_square_search_limit(),
            request_timeout_ms: default_square_request_timeout_ms(),
        }
    }
}

// ─── Secrets Config ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SecretsBackend {
    Memory,
    Aws,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecretsConfig {
    #[serde(default = "default_secrets_backend")]
    pub backend: SecretsBackend,
    /// Secret holding the provider application `client_id`/`client_secret`.
    #[serde(default = "default_provider_secret_ref")]
    pub provider_secret_ref: String,
    /// Key used to decrypt stored provider access tokens.
    #[serde(default = "default_token_key_ref")]
    pub token_key_ref: String,
}

fn default_secrets_backend() -> SecretsBackend { SecretsBackend::Memory }
fn default_provider_secret_ref() -> String { "perk/square-application".to_string() }
fn default_token_key_ref() -> String { "alias/perk-provider-tokens".to_string() }

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            backend: default_secrets_backend(),
            provider_secret_ref: default_provider_secret_ref(),
            token_key_ref: default_token_key_ref(),
        }
    }
}

// ─── Storage Config ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Memory,
    Dynamo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_backend")]
    pub backend: StorageBackend,
    #[serde(default = "default_organizations_table")]
    pub organizations_table: String,
    #[serde(default = "default_shops_table")]
    pub shops_table: String,
    #[serde(default = "default_visits_table")]
    pub visits_table: String,
    #[serde(default = "default_plans_table")]
    pub plans_table: String,
    #[serde(default = "default_rewards_table")]
    pub rewards_table: String,
    /// Local DynamoDB endpoint override.
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

fn default_storage_backend() -> StorageBackend { StorageBackend::Memory }
fn default_organizations_table() -> String { "perk-organizations".to_string() }
fn default_shops_table() -> String { "perk-shops".to_string() }
fn default_visits_table() -> String { "perk-visits".to_string() }
fn default_plans_table() -> String { "perk-plans".to_string() }
fn default_rewards_table() -> String { "perk-rewards".to_string() }

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            organizations_table: default_organizations_table(),
            shops_table: default_shops_table(),
            visits_table: default_visits_table(),
            plans_table: default_plans_table(),
            rewards_table: default_rewards_table(),
            endpoint_url: None,
        }
    }
}

// ─── Discovery Config ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    /// PostGIS connection string. Without it the in-memory geo index is used.
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_radius_meters")]
    pub default_radius_meters: f64,
    #[serde(default = "default_page_limit")]
    pub default_limit: u32,
    #[serde(default = "default_max_page_limit")]
    pub max_limit: u32,
    #[serde(default = "default_enrichment_concurrency")]
    pub enrichment_concurrency: usize,
}

fn default_max_connections() -> u32 { 5 }
fn default_radius_meters() -> f64 { 5000.0 }
fn default_page_limit() -> u32 { 20 }
fn default_max_page_limit() -> u32 { 50 }
fn default_enrichment_concurrency() -> usize { 8 }

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: default_max_connections(),
            default_radius_meters: default_radius_meters(),
            default_limit: default_page_limit(),
            max_limit: default_max_page_limit(),
            enrichment_concurrency: default_enrichment_concurrency(),
        }
    }
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_identity_header() -> String {
    "x-authenticated-user".to_string()
}
fn default_metrics_port() -> u16 {
    9091
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
            identity_header: default_identity_header(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            visits: VisitConfig::default(),
            square: SquareConfig::default(),
            secrets: SecretsConfig::default(),
            storage: StorageConfig::default(),
            discovery: DiscoveryConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("PERK")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
