use serde::Deserialize;

/// Root application configuration. Loaded from environment variables with
/// the prefix `ATTRIBUTION_EXPRESS__`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub api: IhcApiConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_report_path")]
    pub report_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IhcApiConfig {
    #[serde(default = "default_api_url")]
    pub url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub conv_type_id: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Documented provider limit: journeys per request.
    #[serde(default = "default_max_journeys_per_batch")]
    pub max_journeys_per_batch: usize,
    /// Documented provider limit: sessions per request.
    #[serde(default = "default_max_sessions_per_batch")]
    pub max_sessions_per_batch: usize,
    #[serde(default = "default_max_concurrent_batches")]
    pub max_concurrent_batches: usize,
    #[serde(default)]
    pub extra_channels: Vec<String>,
}

fn default_database_path() -> String {
    "data/attribution.db".to_string()
}
fn default_report_path() -> String {
    "data/output/channel_report.csv".to_string()
}
fn default_api_url() -> String {
    "https://api.ihc-attribution.com/v1/compute_ihc".to_string()
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    2_000
}
fn default_max_backoff_ms() -> u64 {
    60_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_jitter_ms() -> u64 {
    250
}
fn default_max_journeys_per_batch() -> usize {
    85
}
fn default_max_sessions_per_batch() -> usize {
    2_750
}
fn default_max_concurrent_batches() -> usize {
    4
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            report_path: default_report_path(),
        }
    }
}

impl Default for IhcApiConfig {
    fn default() -> Self {
        Self {
            url: default_api_url(),
            api_key: String::new(),
            conv_type_id: String::new(),
            request_timeout_ms: default_request_timeout_ms(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_journeys_per_batch: default_max_journeys_per_batch(),
            max_sessions_per_batch: default_max_sessions_per_batch(),
            max_concurrent_batches: default_max_concurrent_batches(),
            extra_channels: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("ATTRIBUTION_EXPRESS")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
