//! CLI utilities for binaries
//!
//! Resolves where the strategy configuration is read from. A path given on
//! the command line wins over `CONFIG_PATH`, which wins over the default.

use std::fmt;
use std::path::PathBuf;

pub const CONFIG_ENV_VAR: &str = "CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/strategy_config.yaml";

/// Where the config path came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Argument,
    Environment,
    Default,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::Argument => write!(f, "command line"),
            ConfigSource::Environment => write!(f, "{}", CONFIG_ENV_VAR),
            ConfigSource::Default => write!(f, "default"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigLocation {
    pub path: PathBuf,
    pub source: ConfigSource,
}

/// Pick the config path from parsed arguments and the env var value.
///
/// Accepts either `--config <path>` or a bare positional path.
pub fn resolve_config_path(args: &[String], env_value: Option<String>) -> ConfigLocation {
    let mut iter = args.iter();
    let mut from_args = None;
    while let Some(arg) = iter.next() {
        if arg == "--config" || arg == "-c" {
            from_args = iter.next().cloned();
            break;
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            from_args = Some(path.to_string());
            break;
        }
        if !arg.starts_with('-') && from_args.is_none() {
            from_args = Some(arg.clone());
        }
    }

    match (from_args, env_value.filter(|v| !v.trim().is_empty())) {
        (Some(path), _) => ConfigLocation {
            path: path.into(),
            source: ConfigSource::Argument,
        },
        (None, Some(path)) => ConfigLocation {
            path: path.into(),
            source: ConfigSource::Environment,
        },
        (None, None) => ConfigLocation {
            path: DEFAULT_CONFIG_PATH.into(),
            source: ConfigSource::Default,
        },
    }
}

/// Config path from `CONFIG_PATH` or the default, ignoring the command line
pub fn load_config_from_env() -> PathBuf {
    resolve_config_path(&[], std::env::var(CONFIG_ENV_VAR).ok()).path
}

/// Command line arguments, excluding the program name
pub fn parse_args() -> Vec<String> {
    std::env::args().skip(1).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_argument_wins_over_env() {
        let location = resolve_config_path(&args(&["custom.yaml"]), Some("env.yaml".into()));
        assert_eq!(location.path, PathBuf::from("custom.yaml"));
        assert_eq!(location.source, ConfigSource::Argument);

        let location = resolve_config_path(&args(&["--config", "flag.yaml"]), None);
        assert_eq!(location.path, PathBuf::from("flag.yaml"));

        let location = resolve_config_path(&args(&["--config=eq.yaml"]), None);
        assert_eq!(location.path, PathBuf::from("eq.yaml"));
    }

    #[test]
    fn test_env_then_default() {
        let location = resolve_config_path(&[], Some("env.yaml".into()));
        assert_eq!(location.source, ConfigSource::Environment);

        let location = resolve_config_path(&args(&["--verbose"]), Some("  ".into()));
        assert_eq!(location.path, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert_eq!(location.source, ConfigSource::Default);
    }
}
