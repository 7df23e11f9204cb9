//! Critical operation coordinator
//!
//! Executes the unwind batch of an account. The execution mode is chosen
//! once from the gateway's declared capabilities: a native batch call when
//! the backend has one, otherwise the operations run one after another.
//! There is no rollback; every operation reports its own result.

use crate::domain::{BatchResult, CriticalOperation, MarginMode, OperationResult};
use crate::infrastructure::{ExecutionGateway, PortResult};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    Native,
    Sequential,
}

pub struct CriticalOperationCoordinator {
    gateway: Arc<dyn ExecutionGateway>,
    mode: BatchMode,
}

impl CriticalOperationCoordinator {
    pub fn new(gateway: Arc<dyn ExecutionGateway>) -> Self {
        let mode = if gateway.capabilities().native_batch {
            BatchMode::Native
        } else {
            BatchMode::Sequential
        };
        Self { gateway, mode }
    }

    pub fn mode(&self) -> BatchMode {
        self.mode
    }

    /// Run the batch and return one result per operation id.
    ///
    /// If the batch cannot be set up at all the result holds a single
    /// `global_error` entry instead.
    pub async fn execute(&self, account_id: &str, operations: &[CriticalOperation]) -> BatchResult {
        if operations.is_empty() {
            return BatchResult::global_error("empty critical batch");
        }

        let started = Instant::now();
        let results = match self.mode {
            BatchMode::Native => self.execute_native(account_id, operations).await,
            BatchMode::Sequential => self.execute_sequential(account_id, operations).await,
        };

        info!(
            account_id,
            mode = ?self.mode,
            succeeded = results.success_count(),
            total = results.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Critical batch executed"
        );
        results
    }

    async fn execute_native(&self, account_id: &str, operations: &[CriticalOperation]) -> BatchResult {
        match self.gateway.execute_batch(account_id, operations).await {
            Ok(mut results) => {
                // Anything the backend did not report on counts as failed
                for (i, op) in operations.iter().enumerate() {
                    let id = op.operation_id(i);
                    if results.get(&id).is_none() {
                        results.insert(OperationResult::failed(id, "no result reported"));
                    }
                }
                results
            }
            Err(e) => {
                error!(account_id, "Batch execution failed: {}", e);
                BatchResult::global_error(e.to_string())
            }
        }
    }

    async fn execute_sequential(
        &self,
        account_id: &str,
        operations: &[CriticalOperation],
    ) -> BatchResult {
        let mut results = BatchResult::new();
        for (i, op) in operations.iter().enumerate() {
            let id = op.operation_id(i);
            let result = match self.run_one(account_id, op).await {
                Ok(data) => OperationResult::ok(id, data),
                Err(e) => {
                    error!(account_id, operation = %id, "Critical operation failed: {}", e);
                    OperationResult::failed(id, e)
                }
            };
            results.insert(result);
        }
        results
    }

    async fn run_one(&self, account_id: &str, op: &CriticalOperation) -> Result<serde_json::Value, String> {
        let outcome: PortResult<serde_json::Value> = match op {
            CriticalOperation::ClosePosition {
                symbol,
                amount,
                limit_price,
            } => self
                .gateway
                .close_position(account_id, symbol, *amount, *limit_price)
                .await
                .map(|order| json!({ "order_id": order.order_id, "filled": order.filled })),
            CriticalOperation::RepayLoan { asset, amount } => {
                match self.gateway.repay_loan(account_id, asset, *amount).await {
                    Ok(true) => Ok(json!({ "repaid": amount, "asset": asset })),
                    Ok(false) => return Err(format!("repay of {} {} refused", amount, asset)),
                    Err(e) => Err(e),
                }
            }
            CriticalOperation::OpenCoinMarginShort { symbol, amount } => self
                .gateway
                .open_short(account_id, symbol, *amount, MarginMode::Coin)
                .await
                .map(|order| json!({ "order_id": order.order_id, "filled": order.filled })),
        };
        outcome.map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::GLOBAL_ERROR_KEY;
    use crate::infrastructure::{GatewayCapabilities, PaperExchange, PaperFault};

    fn venue(native_batch: bool) -> Arc<PaperExchange> {
        let exchange = PaperExchange::new().with_capabilities(GatewayCapabilities {
            native_batch,
            conditional_orders: true,
            linear_symbols: vec!["BTC/USDT".to_string()],
        });
        exchange.set_price("BTC/USDT", 60000.0);
        Arc::new(exchange)
    }

    async fn open_short(exchange: &PaperExchange) {
        exchange
            .open_short("acc", "BTC/USDT", 0.5, MarginMode::Linear)
            .await
            .unwrap();
    }

    /// Close succeeds, repay is refused (nothing borrowed), coin short succeeds
    fn batch() -> Vec<CriticalOperation> {
        vec![
            CriticalOperation::ClosePosition {
                symbol: "BTC/USDT".to_string(),
                amount: 0.5,
                limit_price: None,
            },
            CriticalOperation::RepayLoan {
                asset: "USDT".to_string(),
                amount: 100.0,
            },
            CriticalOperation::OpenCoinMarginShort {
                symbol: "BTC/USD".to_string(),
                amount: 0.1,
            },
        ]
    }

    #[tokio::test]
    async fn test_sequential_continues_after_failure() {
        let exchange = venue(false);
        open_short(&exchange).await;
        let coordinator = CriticalOperationCoordinator::new(exchange.clone());
        assert_eq!(coordinator.mode(), BatchMode::Sequential);

        let results = coordinator.execute("acc", &batch()).await;
        assert_eq!(results.len(), 3);
        assert!(!results.is_success());
        assert_eq!(results.failed_ids(), vec!["op_1_repay_loan".to_string()]);
        assert!(results.get("op_2_open_coin_margin_short").unwrap().success);

        // No rollback: the close and the coin short stay executed
        let positions = exchange.open_positions("acc");
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].symbol, "BTC/USD");
    }

    #[tokio::test]
    async fn test_native_batch_reports_per_operation() {
        let exchange = venue(true);
        open_short(&exchange).await;
        let coordinator = CriticalOperationCoordinator::new(exchange);
        assert_eq!(coordinator.mode(), BatchMode::Native);

        let results = coordinator.execute("acc", &batch()).await;
        assert_eq!(results.len(), 3);
        assert_eq!(results.failed_ids(), vec!["op_1_repay_loan".to_string()]);
    }

    #[tokio::test]
    async fn test_native_setup_failure_is_global_error() {
        let exchange = venue(true);
        exchange.inject(PaperFault::Batch);
        let coordinator = CriticalOperationCoordinator::new(exchange);

        let results = coordinator.execute("acc", &batch()).await;
        assert_eq!(results.len(), 1);
        assert!(!results.get(GLOBAL_ERROR_KEY).unwrap().success);
    }

    #[tokio::test]
    async fn test_empty_batch_is_rejected() {
        let coordinator = CriticalOperationCoordinator::new(venue(false));
        let results = coordinator.execute("acc", &[]).await;
        assert_eq!(results.failed_ids(), vec![GLOBAL_ERROR_KEY.to_string()]);
    }
}
