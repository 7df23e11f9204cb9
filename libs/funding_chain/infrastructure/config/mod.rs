pub mod strategy;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

pub use strategy::{RiskConfig, StrategyConfig};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config file: {0}")]
    FileError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarMissing(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main configuration of the funding chain bot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Interval between status heartbeats
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    #[serde(default)]
    pub strategy: StrategyConfig,

    #[serde(default)]
    pub risk: RiskConfig,

    #[serde(default)]
    pub alerts: AlertsConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub market: MarketConfig,

    #[serde(default)]
    pub paper: PaperConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_heartbeat_interval() -> u64 {
    300 // 5 minutes
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            strategy: StrategyConfig::default(),
            risk: RiskConfig::default(),
            alerts: AlertsConfig::default(),
            store: StoreConfig::default(),
            market: MarketConfig::default(),
            paper: PaperConfig::default(),
        }
    }
}

/// Alert channels
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AlertsConfig {
    #[serde(default)]
    pub telegram: TelegramConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Env var holding the bot token
    #[serde(default = "default_telegram_token_env")]
    pub token_env: String,

    /// Env var holding the chat id
    #[serde(default = "default_telegram_chat_env")]
    pub chat_id_env: String,

    /// Bot token from .env (not in YAML)
    #[serde(skip)]
    pub bot_token: String,

    /// Chat id from .env (not in YAML)
    #[serde(skip)]
    pub chat_id: String,
}

fn default_telegram_token_env() -> String {
    "TELEGRAM_BOT_TOKEN".to_string()
}

fn default_telegram_chat_env() -> String {
    "TELEGRAM_CHAT_ID".to_string()
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            token_env: default_telegram_token_env(),
            chat_id_env: default_telegram_chat_env(),
            bot_token: String::new(),
            chat_id: String::new(),
        }
    }
}

/// Persistence locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    /// Directory for per-account transaction logs and account state records
    #[serde(default = "default_transactions_dir")]
    pub transactions_dir: PathBuf,
}

fn default_state_file() -> PathBuf {
    PathBuf::from("data/strategy_state.json")
}

fn default_transactions_dir() -> PathBuf {
    PathBuf::from("data")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
            transactions_dir: default_transactions_dir(),
        }
    }
}

/// Market data cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Prices younger than this are served from cache
    #[serde(default = "default_price_ttl_ms")]
    pub price_ttl_ms: u64,

    /// Oldest cached price still served when the feed fails
    #[serde(default = "default_stale_tolerance_secs")]
    pub stale_tolerance_secs: u64,
}

fn default_price_ttl_ms() -> u64 {
    2000
}

fn default_stale_tolerance_secs() -> u64 {
    30
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            price_ttl_ms: default_price_ttl_ms(),
            stale_tolerance_secs: default_stale_tolerance_secs(),
        }
    }
}

impl MarketConfig {
    pub fn price_ttl(&self) -> Duration {
        Duration::from_millis(self.price_ttl_ms)
    }

    pub fn stale_tolerance(&self) -> Duration {
        Duration::from_secs(self.stale_tolerance_secs)
    }
}

/// Seed values of the in-memory paper exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperConfig {
    #[serde(default = "default_paper_price")]
    pub initial_price: f64,

    #[serde(default = "default_paper_funding_rate")]
    pub funding_rate: f64,

    /// Quote balance seeded on the master account
    #[serde(default = "default_paper_master_balance")]
    pub master_balance: f64,

    /// Leverage applied to paper derivative positions
    #[serde(default = "default_paper_position_leverage")]
    pub position_leverage: f64,
}

fn default_paper_price() -> f64 {
    60000.0
}

fn default_paper_funding_rate() -> f64 {
    0.0001
}

fn default_paper_master_balance() -> f64 {
    100000.0
}

fn default_paper_position_leverage() -> f64 {
    5.0
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            initial_price: default_paper_price(),
            funding_rate: default_paper_funding_rate(),
            master_balance: default_paper_master_balance(),
            position_leverage: default_paper_position_leverage(),
        }
    }
}

impl AppConfig {
    /// Load configuration from YAML file and .env
    pub fn load(config_path: impl AsRef<Path>) -> Result<Self> {
        let yaml_content = std::fs::read_to_string(config_path)?;
        let mut config = Self::from_yaml_str(&yaml_content)?;

        // Load .env file
        dotenv::dotenv().ok(); // Don't fail if .env doesn't exist

        config.load_secrets()?;
        config.validate()?;

        Ok(config)
    }

    /// Parse without touching the environment
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    fn load_secrets(&mut self) -> Result<()> {
        let telegram = &mut self.alerts.telegram;
        if telegram.enabled {
            telegram.bot_token = std::env::var(&telegram.token_env)
                .map_err(|_| ConfigError::EnvVarMissing(telegram.token_env.clone()))?;
            telegram.chat_id = std::env::var(&telegram.chat_id_env)
                .map_err(|_| ConfigError::EnvVarMissing(telegram.chat_id_env.clone()))?;
        }
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let s = &self.strategy;
        let r = &self.risk;

        if s.exchange_id.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "exchange_id cannot be empty".to_string(),
            ));
        }

        if s.accounts_count == 0 {
            return Err(ConfigError::ValidationError(
                "accounts_count must be greater than 0".to_string(),
            ));
        }

        if s.account_capital <= 0.0 {
            return Err(ConfigError::ValidationError(
                "account_capital must be positive".to_string(),
            ));
        }

        if s.leverage_ratio < 0.0 {
            return Err(ConfigError::ValidationError(
                "leverage_ratio cannot be negative".to_string(),
            ));
        }

        if s.target_loss <= 0.0 {
            return Err(ConfigError::ValidationError(
                "target_loss must be positive".to_string(),
            ));
        }

        if !(0.0..1.0).contains(&s.funding_allocation) {
            return Err(ConfigError::ValidationError(
                "funding_allocation must be in [0, 1)".to_string(),
            ));
        }

        if s.hedge_symbols.is_empty() {
            return Err(ConfigError::ValidationError(
                "hedge_symbols cannot be empty".to_string(),
            ));
        }

        if s.price_tolerance <= 0.0 || s.price_tolerance > 1.0 {
            return Err(ConfigError::ValidationError(
                "price_tolerance must be in (0, 1]".to_string(),
            ));
        }

        if s.target_poll_interval_ms == 0
            || s.funding_check_interval_secs == 0
            || s.driver_tick_ms == 0
            || r.sweep_interval_secs == 0
        {
            return Err(ConfigError::ValidationError(
                "poll, check, tick and sweep intervals must be greater than 0".to_string(),
            ));
        }

        if r.max_leverage_ratio <= 0.0 {
            return Err(ConfigError::ValidationError(
                "max_leverage_ratio must be positive".to_string(),
            ));
        }

        if r.emergency_exit_threshold > r.min_funding_rate {
            return Err(ConfigError::ValidationError(
                "emergency_exit_threshold must not exceed min_funding_rate".to_string(),
            ));
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "log_level must be one of: {}",
                valid_levels.join(", ")
            )));
        }

        Ok(())
    }

    /// Log configuration summary
    pub fn log(&self) {
        let s = &self.strategy;
        let r = &self.risk;
        info!("Configuration loaded:");
        info!("  Exchange: {} ({} accounts)", s.exchange_id, s.accounts_count);
        info!(
            "  Capital: {:.2} {} x{} leverage",
            s.account_capital, s.quote_asset, s.leverage_ratio
        );
        info!("  Target loss: {:.2} {}", s.target_loss, s.quote_asset);
        info!("  Funding allocation: {:.0}%", s.funding_allocation * 100.0);
        info!("  Hedge symbols: {}", s.hedge_symbols.join(", "));
        info!("  Funding symbol: {}", s.funding_symbol);
        info!(
            "  Risk: max leverage {}, min funding {:.4}, emergency {:.4}",
            r.max_leverage_ratio, r.min_funding_rate, r.emergency_exit_threshold
        );
        info!(
            "  Telegram alerts: {}",
            if self.alerts.telegram.enabled { "enabled" } else { "disabled" }
        );
        info!("  State file: {}", self.store.state_file.display());
        info!("  Log level: {}", self.log_level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::from_yaml_str("{}").unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.strategy.accounts_count, 20);
        assert_eq!(config.strategy.master_account_id(), "binance_main");
        assert_eq!(config.strategy.primary_hedge_symbol(), "BTC/USDT");
        assert_eq!(config.risk.max_leverage_ratio, 10.0);
        assert_eq!(config.market.price_ttl_ms, 2000);
        assert_eq!(
            config.store.state_file,
            PathBuf::from("data/strategy_state.json")
        );
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        assert!(config.validate().is_ok());

        // Funding allocation must leave something to carry
        config.strategy.funding_allocation = 1.0;
        assert!(config.validate().is_err());
        config.strategy.funding_allocation = 0.15;

        // Tolerance above 1 would trigger before the target
        config.strategy.price_tolerance = 1.2;
        assert!(config.validate().is_err());
        config.strategy.price_tolerance = 0.995;

        config.strategy.hedge_symbols.clear();
        assert!(config.validate().is_err());
        config.strategy.hedge_symbols = vec!["BTC/USDT".to_string()];

        config.risk.emergency_exit_threshold = 0.0;
        assert!(config.validate().is_err());
        config.risk.emergency_exit_threshold = -0.02;

        config.log_level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
strategy:
  exchange_id: okx
  accounts_count: 3
risk:
  halt_on_extreme_market: true
"#;
        let config = AppConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.strategy.exchange_id, "okx");
        assert_eq!(config.strategy.accounts_count, 3);
        assert_eq!(config.strategy.leverage_ratio, 4.0);
        assert!(config.risk.halt_on_extreme_market);
        assert_eq!(config.risk.min_funding_rate, -0.01);
    }
}
