//! Operator alerts
//!
//! The dispatcher formats a message once and fans it out to every
//! configured sink. Delivery is best effort: failures are logged and
//! swallowed so alerting never interrupts trading logic.

use super::config::AlertsConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::Client;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum AlertError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Alert API error: {status} - {body}")]
    Api { status: u16, body: String },
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, text: &str) -> Result<(), AlertError>;
}

/// `[LEVEL] YYYY-mm-dd HH:MM:SS\n<message>`
pub fn format_alert(level: AlertLevel, at: DateTime<Utc>, message: &str) -> String {
    format!("[{}] {}\n{}", level, at.format("%Y-%m-%d %H:%M:%S"), message)
}

// =============================================================================
// Dispatcher
// =============================================================================

#[derive(Default)]
pub struct AlertDispatcher {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl AlertDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sinks enabled in config; secrets must already be resolved
    pub fn from_config(config: &AlertsConfig) -> Self {
        let mut dispatcher = Self::new();
        if config.telegram.enabled {
            dispatcher = dispatcher.with_sink(Arc::new(TelegramAlertSink::new(
                config.telegram.bot_token.clone(),
                config.telegram.chat_id.clone(),
            )));
        }
        dispatcher
    }

    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    pub async fn send(&self, message: &str, level: AlertLevel) {
        match level {
            AlertLevel::Info => info!("Alert: {}", message),
            AlertLevel::Warning => warn!("Alert: {}", message),
            AlertLevel::Error | AlertLevel::Critical => error!("Alert [{}]: {}", level, message),
        }

        if self.sinks.is_empty() {
            return;
        }

        let text = format_alert(level, Utc::now(), message);
        for sink in &self.sinks {
            if let Err(e) = sink.send(&text).await {
                error!("Failed to deliver alert via {}: {}", sink.name(), e);
            }
        }
    }
}

// =============================================================================
// Sinks
// =============================================================================

/// Telegram Bot API sink
pub struct TelegramAlertSink {
    client: Client,
    bot_token: String,
    chat_id: String,
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
}

impl TelegramAlertSink {
    pub fn new(bot_token: String, chat_id: String) -> Self {
        Self {
            client: Client::new(),
            bot_token,
            chat_id,
        }
    }
}

#[async_trait]
impl AlertSink for TelegramAlertSink {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, text: &str) -> Result<(), AlertError> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let request = SendMessageRequest {
            chat_id: &self.chat_id,
            text,
        };

        let response = self.client.post(&url).json(&request).send().await?;
        if response.status().is_success() {
            info!("📨 Telegram alert sent");
            Ok(())
        } else {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            Err(AlertError::Api { status, body })
        }
    }
}

/// Keeps every delivered alert in memory
#[derive(Default)]
pub struct MemoryAlertSink {
    messages: Mutex<Vec<String>>,
}

impl MemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.messages.lock().iter().any(|m| m.contains(needle))
    }
}

#[async_trait]
impl AlertSink for MemoryAlertSink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn send(&self, text: &str) -> Result<(), AlertError> {
        self.messages.lock().push(text.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct BrokenSink;

    #[async_trait]
    impl AlertSink for BrokenSink {
        fn name(&self) -> &str {
            "broken"
        }

        async fn send(&self, _text: &str) -> Result<(), AlertError> {
            Err(AlertError::Api {
                status: 500,
                body: "down".to_string(),
            })
        }
    }

    #[test]
    fn test_alert_format() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap();
        assert_eq!(
            format_alert(AlertLevel::Critical, at, "Emergency stop"),
            "[CRITICAL] 2024-03-01 12:30:05\nEmergency stop"
        );
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_block_others() {
        let memory = Arc::new(MemoryAlertSink::new());
        let dispatcher = AlertDispatcher::new()
            .with_sink(Arc::new(BrokenSink))
            .with_sink(memory.clone());

        dispatcher.send("leverage too high", AlertLevel::Warning).await;

        let messages = memory.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with("[WARNING] "));
        assert!(messages[0].ends_with("\nleverage too high"));
    }

    #[test]
    fn test_disabled_telegram_has_no_sinks() {
        let dispatcher = AlertDispatcher::from_config(&AlertsConfig::default());
        assert_eq!(dispatcher.sink_count(), 0);
    }
}
