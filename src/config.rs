use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Console,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub postgres_dsn: Option<String>,
    pub log_level: String,
    pub log_format: LogFormat,
    pub store_raw_response: bool,
    pub http_addr: String,
    /// Zip code used by local-scope providers.
    pub zip_code: String,
    /// Order amount in liters used by local-scope providers.
    pub order_amount: u32,
    pub scrape_hour: u32,
    pub providers: Vec<String>,
    pub backfill: BackfillConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackfillConfig {
    pub provider: String,
    pub min_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            postgres_dsn: None,
            log_level: "info".to_string(),
            log_format: LogFormat::Console,
            store_raw_response: true,
            http_addr: "0.0.0.0:8080".to_string(),
            zip_code: "47259".to_string(),
            order_amount: 3000,
            scrape_hour: 6,
            providers: vec!["heizoel24".to_string(), "hoyer".to_string()],
            backfill: BackfillConfig::default(),
        }
    }
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            provider: "heizoel24".to_string(),
            min_delay_secs: 1,
            max_delay_secs: 5,
        }
    }
}

impl Config {
    /// Read a YAML config file. Missing keys fall back to the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config: Config =
            serde_yaml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scrape_hour > 23 {
            anyhow::bail!("scrape_hour must be between 0 and 23, got {}", self.scrape_hour);
        }
        if self.backfill.min_delay_secs > self.backfill.max_delay_secs {
            anyhow::bail!(
                "backfill min_delay_secs ({}) is greater than max_delay_secs ({})",
                self.backfill.min_delay_secs,
                self.backfill.max_delay_secs
            );
        }
        if self.order_amount == 0 {
            anyhow::bail!("order_amount must be positive");
        }
        Ok(())
    }

    /// The DSN, or an error naming the flag that supplies it.
    pub fn require_dsn(&self) -> Result<&str> {
        self.postgres_dsn
            .as_deref()
            .filter(|dsn| !dsn.trim().is_empty())
            .context("--postgres-dsn (or POSTGRES_DSN) is required")
    }

    /// Set the provider list from a comma-separated string.
    pub fn set_providers(&mut self, list: &str) {
        self.providers = parse_provider_list(list);
    }
}

/// Split on commas, trim, drop empties and repeated names.
pub fn parse_provider_list(list: &str) -> Vec<String> {
    let mut providers: Vec<String> = Vec::new();
    for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !providers.iter().any(|p| p == name) {
            providers.push(name.to_string());
        }
    }
    providers
}
