//! Price cache
//!
//! Wraps any [`MarketFeed`]. Fresh prices are served from memory; when the
//! underlying feed fails a recent enough cached value is served instead.

use super::config::MarketConfig;
use super::ports::{MarketFeed, PortResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
struct CachedPrice {
    value: f64,
    fetched_at: Instant,
}

pub struct CachedMarketFeed {
    inner: Arc<dyn MarketFeed>,
    prices: RwLock<HashMap<String, CachedPrice>>,
    ttl: Duration,
    stale_tolerance: Duration,
}

impl CachedMarketFeed {
    pub fn new(inner: Arc<dyn MarketFeed>, ttl: Duration, stale_tolerance: Duration) -> Self {
        Self {
            inner,
            prices: RwLock::new(HashMap::new()),
            ttl,
            stale_tolerance,
        }
    }

    pub fn from_config(inner: Arc<dyn MarketFeed>, config: &MarketConfig) -> Self {
        Self::new(inner, config.price_ttl(), config.stale_tolerance())
    }

    /// Cached value no older than `max_age`
    fn cached(&self, symbol: &str, max_age: Duration) -> Option<f64> {
        let prices = self.prices.read();
        prices
            .get(symbol)
            .filter(|p| p.fetched_at.elapsed() <= max_age)
            .map(|p| p.value)
    }
}

#[async_trait]
impl MarketFeed for CachedMarketFeed {
    async fn price(&self, symbol: &str) -> PortResult<f64> {
        if let Some(value) = self.cached(symbol, self.ttl) {
            return Ok(value);
        }

        match self.inner.price(symbol).await {
            Ok(value) => {
                self.prices.write().insert(
                    symbol.to_string(),
                    CachedPrice {
                        value,
                        fetched_at: Instant::now(),
                    },
                );
                debug!("Price refreshed: {} = {:.2}", symbol, value);
                Ok(value)
            }
            Err(e) => match self.cached(symbol, self.stale_tolerance) {
                Some(value) => {
                    warn!("Price fetch failed for {} ({}), serving cached {:.2}", symbol, e, value);
                    Ok(value)
                }
                None => Err(e),
            },
        }
    }

    async fn funding_rate(&self, symbol: &str) -> PortResult<f64> {
        self.inner.funding_rate(symbol).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::ports::CollaboratorError;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Feed returning scripted prices and counting calls
    struct ScriptedFeed {
        calls: AtomicUsize,
        next: Mutex<Vec<PortResult<f64>>>,
    }

    impl ScriptedFeed {
        fn new(mut script: Vec<PortResult<f64>>) -> Self {
            script.reverse();
            Self {
                calls: AtomicUsize::new(0),
                next: Mutex::new(script),
            }
        }
    }

    #[async_trait]
    impl MarketFeed for ScriptedFeed {
        async fn price(&self, _symbol: &str) -> PortResult<f64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.next
                .lock()
                .pop()
                .unwrap_or_else(|| Err(CollaboratorError::Transient("script exhausted".into())))
        }

        async fn funding_rate(&self, _symbol: &str) -> PortResult<f64> {
            Ok(0.0001)
        }
    }

    #[tokio::test]
    async fn test_serves_from_cache_within_ttl() {
        let inner = Arc::new(ScriptedFeed::new(vec![Ok(60000.0), Ok(61000.0)]));
        let feed = CachedMarketFeed::new(inner.clone(), Duration::from_secs(60), Duration::from_secs(60));

        assert_eq!(feed.price("BTC/USDT").await.unwrap(), 60000.0);
        assert_eq!(feed.price("BTC/USDT").await.unwrap(), 60000.0);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_falls_back_to_stale_value_on_error() {
        let inner = Arc::new(ScriptedFeed::new(vec![
            Ok(60000.0),
            Err(CollaboratorError::Transient("timeout".into())),
        ]));
        let feed = CachedMarketFeed::new(inner.clone(), Duration::ZERO, Duration::from_secs(60));

        assert_eq!(feed.price("BTC/USDT").await.unwrap(), 60000.0);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(feed.price("BTC/USDT").await.unwrap(), 60000.0);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_propagates_error_without_cache() {
        let inner = Arc::new(ScriptedFeed::new(vec![Err(CollaboratorError::Transient(
            "timeout".into(),
        ))]));
        let feed = CachedMarketFeed::new(inner, Duration::from_secs(2), Duration::from_secs(30));
        assert!(feed.price("BTC/USDT").await.is_err());
    }
}
