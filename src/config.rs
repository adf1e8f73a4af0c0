//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use url::Url;

pub use crate::analysis::batch::BatchConfig;
pub use crate::analysis::classifier::ClassifierThresholds;
pub use crate::analysis::correlator::CorrelatorConfig;
pub use crate::analysis::entities::{KnownEntityConfig, LaunchPlatformConfig};
pub use crate::analysis::profile::ProfileConfig;
pub use crate::analysis::tracer::TracerConfig;

/// Environment variable holding the API key when it is not in the config
pub const API_KEY_ENV: &str = "PROVENANCE_API_KEY";

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub tracer: TracerConfig,
    #[serde(default)]
    pub profile: ProfileConfig,
    #[serde(default)]
    pub classifier: ClassifierThresholds,
    #[serde(default)]
    pub launch_platform: LaunchPlatformConfig,
    #[serde(default)]
    pub correlator: CorrelatorConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    /// Exchanges, root funders and other pre-identified wallets
    #[serde(default)]
    pub known_entities: Vec<KnownEntityConfig>,
    /// Wallets dropped from launch correlation without being labelled
    #[serde(default)]
    pub exclusions: Vec<String>,
}

/// Ledger gateway connection and pacing
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_chain")]
    pub chain: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    /// Minimum spacing between any two gateway calls, across all work
    #[serde(default = "default_min_call_interval_ms")]
    pub min_call_interval_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_funder_cache_ttl_secs")]
    pub funder_cache_ttl_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            chain: default_chain(),
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            min_call_interval_ms: default_min_call_interval_ms(),
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            funder_cache_ttl_secs: default_funder_cache_ttl_secs(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.nansen.ai/api/v1/".to_string()
}

fn default_chain() -> String {
    "solana".to_string()
}

fn default_page_size() -> u32 {
    100
}

fn default_max_pages() -> u32 {
    50
}

fn default_min_call_interval_ms() -> u64 {
    1500
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_funder_cache_ttl_secs() -> u64 {
    3600 // 1 hour
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Start with defaults
            .set_default("gateway.base_url", default_base_url())?
            .set_default("gateway.chain", default_chain())?
            .set_default("gateway.min_call_interval_ms", default_min_call_interval_ms() as i64)?
            .set_default("gateway.max_retries", default_max_retries() as i64)?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (PROVENANCE__GATEWAY__API_KEY, ...)
            .add_source(
                config::Environment::with_prefix("PROVENANCE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let mut config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        if config.gateway.api_key.is_empty() {
            if let Ok(key) = std::env::var(API_KEY_ENV) {
                config.gateway.api_key = key;
            }
        }

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.gateway.base_url)
            .with_context(|| format!("Invalid gateway base_url: {}", self.gateway.base_url))?;

        if self.gateway.page_size == 0 {
            anyhow::bail!("gateway.page_size must be positive");
        }

        if self.gateway.max_pages == 0 {
            anyhow::bail!("gateway.max_pages must be positive");
        }

        if self.tracer.max_depth == 0 {
            anyhow::bail!("tracer.max_depth must be at least 1");
        }

        if self.batch.concurrency == 0 {
            anyhow::bail!("batch.concurrency must be at least 1");
        }

        if self.profile.window_days == 0 {
            anyhow::bail!("profile.window_days must be positive");
        }

        if self.correlator.max_position.is_none() && self.correlator.max_delay_secs.is_none() {
            anyhow::bail!("correlator needs max_position and/or max_delay_secs");
        }

        if self.correlator.min_appearances < 2 {
            anyhow::bail!("correlator.min_appearances must be at least 2");
        }

        let t = &self.classifier;
        if t.insider_max_tx_per_day > t.bot_tx_per_day {
            anyhow::bail!("classifier.insider_max_tx_per_day cannot exceed bot_tx_per_day");
        }
        if t.insider_min_transactions == 0 {
            anyhow::bail!("classifier.insider_min_transactions must be at least 1");
        }

        // Validate label patterns (compile regex to check)
        for pattern in &self.launch_platform.label_patterns {
            regex::Regex::new(pattern)
                .with_context(|| format!("Invalid launch_platform label pattern: {}", pattern))?;
        }

        // Validate wallet addresses
        for address in &self.launch_platform.addresses {
            validate_address(address).context("launch_platform.addresses")?;
        }
        for entity in &self.known_entities {
            validate_address(&entity.address)
                .with_context(|| format!("known entity '{}'", entity.label))?;
        }
        for address in &self.exclusions {
            validate_address(address).context("exclusions")?;
        }

        if self.gateway.min_call_interval_ms == 0 {
            tracing::warn!("gateway.min_call_interval_ms is 0 - ledger calls will not be paced");
        }

        Ok(())
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  Gateway:
    base_url: {}
    chain: {}
    api_key: {}
    page_size: {} (max {} pages)
    min_call_interval: {}ms
    max_retries: {}
  Tracer:
    max_depth: {}
  Profile:
    window_days: {}
    include_ancestry: {}
  Classifier:
    bot_tx_per_day: {}
    bot_counterparties: {}
    bot_distinct_tokens: {}
    deployer_min_sol: {}
    insider_max_tx_per_day: {}
    insider_max_counterparties: {}
    dormant_max_sol: {}
  Correlator:
    max_position: {:?}
    max_delay_secs: {:?}
    min_appearances: {}
  Batch:
    concurrency: {}
  Known entities: {}
  Exclusions: {}
"#,
            mask_url(&self.gateway.base_url),
            self.gateway.chain,
            if self.gateway.api_key.is_empty() {
                "(not set)"
            } else {
                "***"
            },
            self.gateway.page_size,
            self.gateway.max_pages,
            self.gateway.min_call_interval_ms,
            self.gateway.max_retries,
            self.tracer.max_depth,
            self.profile.window_days,
            self.profile.include_ancestry,
            self.classifier.bot_tx_per_day,
            self.classifier.bot_counterparties,
            self.classifier.bot_distinct_tokens,
            self.classifier.deployer_min_sol,
            self.classifier.insider_max_tx_per_day,
            self.classifier.insider_max_counterparties,
            self.classifier.dormant_max_sol,
            self.correlator.max_position,
            self.correlator.max_delay_secs,
            self.correlator.min_appearances,
            self.batch.concurrency,
            self.known_entities.len(),
            self.exclusions.len(),
        )
    }
}

/// Check that a string is a base58 encoded 32-byte public key
pub fn validate_address(address: &str) -> Result<()> {
    let bytes = bs58::decode(address)
        .into_vec()
        .with_context(|| format!("Invalid wallet address (not base58): {}", address))?;
    if bytes.len() != 32 {
        anyhow::bail!(
            "Invalid wallet address (expected 32 bytes, got {}): {}",
            bytes.len(),
            address
        );
    }
    Ok(())
}

/// Mask URL for display (hide API keys in query params)
fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}
