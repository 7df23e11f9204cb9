//! Integration test: Configuration utilities
//!
//! Config path resolution from the environment and parsing of the shipped
//! strategy config.

use funding_chain_bot::bin_common::{load_config_from_env, CONFIG_ENV_VAR, DEFAULT_CONFIG_PATH};
use funding_chain_bot::funding_chain::AppConfig;
use std::env;

#[test]
fn test_config_path_from_env() {
    env::remove_var(CONFIG_ENV_VAR);
    assert_eq!(load_config_from_env().to_str().unwrap(), DEFAULT_CONFIG_PATH);

    env::set_var(CONFIG_ENV_VAR, "/etc/funding/strategy.yaml");
    assert_eq!(
        load_config_from_env().to_str().unwrap(),
        "/etc/funding/strategy.yaml"
    );
    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
fn test_shipped_strategy_config_is_valid() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/strategy_config.yaml");
    let config = AppConfig::load(path).unwrap();

    assert_eq!(config.strategy.accounts_count, 20);
    assert_eq!(config.strategy.master_account_id(), "binance_main");
    assert_eq!(config.strategy.hedge_symbols, vec!["BTC/USDT", "BTC/USDC"]);
    assert_eq!(config.paper.master_balance, 100000.0);
    assert!(!config.alerts.telegram.enabled);
}
