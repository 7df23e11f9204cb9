//! Binary runner utilities
//!
//! Wraps an application's main loop with startup and shutdown banners and
//! reports how long it ran.

use std::time::{Duration, Instant};
use tracing::info;

/// Identity of a running binary, shown in its banners
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub name: String,
    /// Venue the binary trades against
    pub backend: String,
}

impl RunConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            backend: "paper".to_string(),
        }
    }

    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = backend.into();
        self
    }
}

/// `1h 02m 03s`, `2m 05s` or `7s`
pub fn format_uptime(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h {:02}m {:02}s", h, m, s)
    } else if m > 0 {
        format!("{}m {:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}

/// Implemented by every binary's application type
pub trait BinaryRunner {
    async fn run(&mut self) -> anyhow::Result<()>;

    fn config(&self) -> &RunConfig;

    /// Extra line for the shutdown banner
    fn stats(&self) -> Option<String> {
        None
    }

    fn print_banner(&self) {
        let config = self.config();
        info!("");
        info!("========================================");
        info!("Starting {} on the {} backend", config.name, config.backend);
        info!("Press Ctrl+C to stop");
        info!("========================================");
        info!("");
    }

    fn print_shutdown(&self, uptime: Duration) {
        let config = self.config();
        info!("");
        info!("========================================");
        info!("{} stopped after {}", config.name, format_uptime(uptime));
        if let Some(stats) = self.stats() {
            info!("{}", stats);
        }
        info!("========================================");
    }

    /// Banner, main loop, shutdown banner. The loop's result is returned
    /// after the shutdown banner is printed.
    async fn execute(&mut self) -> anyhow::Result<()> {
        self.print_banner();
        let started = Instant::now();
        let result = self.run().await;
        self.print_shutdown(started.elapsed());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_config_backend() {
        assert_eq!(RunConfig::new("funding_chain").backend, "paper");

        let config = RunConfig::new("funding_chain").with_backend("testnet");
        assert_eq!(config.name, "funding_chain");
        assert_eq!(config.backend, "testnet");
    }

    #[test]
    fn test_uptime_format() {
        assert_eq!(format_uptime(Duration::from_secs(7)), "7s");
        assert_eq!(format_uptime(Duration::from_secs(125)), "2m 05s");
        assert_eq!(format_uptime(Duration::from_secs(3723)), "1h 02m 03s");
    }
}
