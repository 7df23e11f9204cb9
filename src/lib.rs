//! Funding Chain Bot
//!
//! Entry crate of the workspace. Binaries live in `src/bin/` and share the
//! helpers in [`bin_common`]; the strategy itself is the `funding_chain`
//! workspace library, re-exported here.
//!
//! ```rust,ignore
//! use funding_chain_bot::bin_common::resolve_config_path;
//! use funding_chain_bot::funding_chain::{AppConfig, StrategyEngine};
//! ```

pub use funding_chain;

pub mod bin_common {
    //! Config path resolution and the run/banner wrapper used by binaries

    pub mod cli;
    pub mod runner;

    pub use cli::{
        load_config_from_env, parse_args, resolve_config_path, ConfigLocation, ConfigSource,
        CONFIG_ENV_VAR, DEFAULT_CONFIG_PATH,
    };
    pub use runner::{format_uptime, BinaryRunner, RunConfig};
}
