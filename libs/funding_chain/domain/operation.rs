//! Critical operations
//!
//! The unwind batch executed when an account reaches its target, and the
//! per-operation results it produces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key of the synthetic entry recorded when a batch cannot even be set up
pub const GLOBAL_ERROR_KEY: &str = "global_error";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CriticalOperation {
    ClosePosition {
        symbol: String,
        amount: f64,
        limit_price: Option<f64>,
    },
    RepayLoan {
        asset: String,
        amount: f64,
    },
    OpenCoinMarginShort {
        symbol: String,
        amount: f64,
    },
}

impl CriticalOperation {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ClosePosition { .. } => "close_position",
            Self::RepayLoan { .. } => "repay_loan",
            Self::OpenCoinMarginShort { .. } => "open_coin_margin_short",
        }
    }

    /// Stable id of the `index`-th operation of a batch, e.g. `op_0_close_position`
    pub fn operation_id(&self, index: usize) -> String {
        format!("op_{}_{}", index, self.kind())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    pub operation_id: String,
    pub success: bool,
    pub result_data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl OperationResult {
    pub fn ok(operation_id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            operation_id: operation_id.into(),
            success: true,
            result_data: Some(data),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(operation_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            success: false,
            result_data: None,
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }
}

/// Results of one batch keyed by operation id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    results: BTreeMap<String, OperationResult>,
}

impl BatchResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Batch that failed before any operation ran
    pub fn global_error(error: impl Into<String>) -> Self {
        let mut batch = Self::new();
        batch.insert(OperationResult::failed(GLOBAL_ERROR_KEY, error));
        batch
    }

    pub fn insert(&mut self, result: OperationResult) {
        self.results.insert(result.operation_id.clone(), result);
    }

    pub fn get(&self, operation_id: &str) -> Option<&OperationResult> {
        self.results.get(operation_id)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OperationResult> {
        self.results.values()
    }

    /// Aggregate success: every recorded operation succeeded
    pub fn is_success(&self) -> bool {
        self.results.values().all(|r| r.success)
    }

    pub fn success_count(&self) -> usize {
        self.results.values().filter(|r| r.success).count()
    }

    pub fn failures(&self) -> Vec<&OperationResult> {
        self.results.values().filter(|r| !r.success).collect()
    }

    pub fn failed_ids(&self) -> Vec<String> {
        self.failures()
            .into_iter()
            .map(|r| r.operation_id.clone())
            .collect()
    }
}

/// Base amount forwarded to the next account after the funding leg is carved out
pub fn carry_over_amount(base_balance: f64, funding_allocation: f64) -> f64 {
    base_balance * (1.0 - funding_allocation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_ids() {
        let close = CriticalOperation::ClosePosition {
            symbol: "BTC/USDT".to_string(),
            amount: 0.4,
            limit_price: None,
        };
        let repay = CriticalOperation::RepayLoan {
            asset: "USDT".to_string(),
            amount: 40000.0,
        };
        assert_eq!(close.operation_id(0), "op_0_close_position");
        assert_eq!(repay.operation_id(2), "op_2_repay_loan");
    }

    #[test]
    fn test_aggregate_success() {
        let mut batch = BatchResult::new();
        batch.insert(OperationResult::ok("op_0_close_position", json!({})));
        batch.insert(OperationResult::ok("op_1_repay_loan", json!({})));
        assert!(batch.is_success());

        batch.insert(OperationResult::failed("op_2_open_coin_margin_short", "rejected"));
        assert!(!batch.is_success());
        assert_eq!(batch.success_count(), 2);
        assert_eq!(batch.failed_ids(), vec!["op_2_open_coin_margin_short"]);
    }

    #[test]
    fn test_global_error_fails_batch() {
        let batch = BatchResult::global_error("venue unreachable");
        assert!(!batch.is_success());
        assert_eq!(
            batch.get(GLOBAL_ERROR_KEY).and_then(|r| r.error.as_deref()),
            Some("venue unreachable")
        );
    }

    #[test]
    fn test_carry_over_amount() {
        assert!((carry_over_amount(1.0, 0.15) - 0.85).abs() < 1e-12);
        assert_eq!(carry_over_amount(2.0, 0.0), 2.0);
    }
}
