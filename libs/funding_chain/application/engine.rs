//! Strategy engine
//!
//! Top-level driver. Owns the monitor tasks and, on every tick, reconciles
//! them with the account statuses:
//! - WAITING_TARGET accounts get a [`TargetMonitor`]
//! - FUNDING_COLLECTION accounts get a [`FundingRateMonitor`]
//! - INITIALIZED accounts are armed, then get a [`TargetMonitor`]
//!
//! Finished monitors are joined; errors and panics are escalated to the
//! risk enforcer.

use super::chain::ChainCoordinator;
use super::context::EngineContext;
use super::errors::EngineResult;
use super::monitors::{FundingRateMonitor, MonitorControl, MonitorKind, MonitorOutcome, TargetMonitor};
use super::risk::{RiskEnforcer, RiskScorer};
use super::state_handle::StateHandle;
use crate::domain::{AccountStatus, ChainArena, StrategyState};
use crate::infrastructure::heartbeat::summarize;
use crate::infrastructure::{
    AlertDispatcher, AppConfig, ExecutionGateway, Heartbeat, Ledger, MarketFeed, PaperExchange,
    StateStore, StopSignal,
};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

/// External collaborators the engine is built from
#[derive(Clone)]
pub struct Collaborators {
    pub feed: Arc<dyn MarketFeed>,
    pub gateway: Arc<dyn ExecutionGateway>,
    pub ledger: Arc<dyn Ledger>,
    pub store: Arc<dyn StateStore>,
    pub alerts: Arc<AlertDispatcher>,
}

impl Collaborators {
    /// Paper venue behind all three market ports
    pub fn paper(
        exchange: Arc<PaperExchange>,
        store: Arc<dyn StateStore>,
        alerts: Arc<AlertDispatcher>,
    ) -> Self {
        let feed: Arc<dyn MarketFeed> = exchange.clone();
        let gateway: Arc<dyn ExecutionGateway> = exchange.clone();
        let ledger: Arc<dyn Ledger> = exchange;
        Self {
            feed,
            gateway,
            ledger,
            store,
            alerts,
        }
    }
}

struct MonitorSlot {
    kind: MonitorKind,
    control: MonitorControl,
    handle: JoinHandle<EngineResult<MonitorOutcome>>,
}

pub struct StrategyEngine {
    config: AppConfig,
    ctx: EngineContext,
    enforcer: Arc<RiskEnforcer>,
    chain: Arc<ChainCoordinator>,
    monitors: HashMap<String, MonitorSlot>,
    /// Accounts whose exit orders already rest on the venue
    orders_placed: HashSet<String>,
    heartbeat: Heartbeat,
}

impl StrategyEngine {
    /// Build the engine, restoring persisted state when the store has any
    pub async fn load(
        config: AppConfig,
        collaborators: Collaborators,
        shutdown: StopSignal,
    ) -> EngineResult<Self> {
        let state = match collaborators.store.load_state().await? {
            Some(snapshot) => {
                info!(accounts = snapshot.accounts.len(), "Restoring persisted strategy state");
                StrategyState::from_snapshot(snapshot)?
            }
            None => StrategyState::new(ChainArena::new()),
        };

        // Recovered accounts already had their exit orders placed
        let orders_placed: HashSet<String> = state
            .chain
            .iter()
            .filter(|a| a.status == AccountStatus::WaitingTarget)
            .map(|a| a.account_id.clone())
            .collect();

        let Collaborators {
            feed,
            gateway,
            ledger,
            store,
            alerts,
        } = collaborators;
        let state = StateHandle::new(state, Arc::clone(&store));
        let ctx = EngineContext::new(
            Arc::clone(&feed),
            gateway,
            Arc::clone(&ledger),
            store,
            alerts,
            state,
            shutdown,
        );

        let scorer = Arc::new(RiskScorer::new(feed, ledger, config.risk.max_leverage_ratio));
        let enforcer = Arc::new(RiskEnforcer::new(
            ctx.clone(),
            scorer,
            config.risk.clone(),
            config.strategy.funding_symbol.clone(),
        ));
        let chain = Arc::new(ChainCoordinator::new(
            ctx.clone(),
            config.strategy.clone(),
            Arc::clone(&enforcer),
        ));
        let heartbeat = Heartbeat::new(config.heartbeat_interval_secs);

        Ok(Self {
            config,
            ctx,
            enforcer,
            chain,
            monitors: HashMap::new(),
            orders_placed,
            heartbeat,
        })
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn chain(&self) -> &Arc<ChainCoordinator> {
        &self.chain
    }

    pub fn enforcer(&self) -> &Arc<RiskEnforcer> {
        &self.enforcer
    }

    pub fn monitor_count(&self) -> usize {
        self.monitors.len()
    }

    pub fn monitor_kind(&self, account_id: &str) -> Option<MonitorKind> {
        self.monitors.get(account_id).map(|slot| slot.kind)
    }

    /// Activate the strategy and create the chain on first start
    pub async fn initialize(&mut self) -> EngineResult<()> {
        info!(
            exchange = %self.config.strategy.exchange_id,
            accounts = self.config.strategy.accounts_count,
            "Initializing funding chain engine"
        );

        // 1. Activate and persist
        self.ctx.state.write(|state| state.activate());
        self.ctx.state.persist().await;

        // 2. Create the chain or report what was recovered
        if self.ctx.state.read(|state| state.chain.is_empty()) {
            if let Err(e) = self.chain.initialize_chain().await {
                error!("Chain initialization failed: {}", e);
            }
        } else {
            let counts = self.ctx.state.read(|state| state.status_counts());
            info!(summary = %summarize(&counts), "Recovered existing chain");
        }

        Ok(())
    }

    /// Main loop; returns after shutdown or an emergency stop
    pub async fn run(&mut self) -> EngineResult<()> {
        info!("Starting funding chain main loop");
        self.enforcer.start();

        let tick = self.config.strategy.driver_tick();
        while self.ctx.is_running() {
            self.tick().await;

            if !self.ctx.shutdown.sleep(tick).await {
                break;
            }
        }

        info!("Funding chain loop ended");
        self.stop().await;
        Ok(())
    }

    /// One reconciliation pass
    pub async fn tick(&mut self) {
        // 1. Join finished monitors
        self.reap_monitors().await;

        // 2. Start monitors for accounts that need one
        if self.ctx.is_running() {
            self.spawn_monitors().await;
        }

        // 3. Log status periodically
        let counts = self.ctx.state.read(|state| state.status_counts());
        self.heartbeat.maybe_log(&counts, self.monitors.len());

        // 4. Persist
        self.ctx.state.write(|state| state.touch());
        self.ctx.state.persist().await;
    }

    async fn reap_monitors(&mut self) {
        let finished: Vec<String> = self
            .monitors
            .iter()
            .filter(|(_, slot)| slot.handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect();

        for account_id in finished {
            if let Some(slot) = self.monitors.remove(&account_id) {
                let joined = slot.handle.await;
                self.settle(&account_id, slot.kind, joined).await;
            }
        }
    }

    async fn settle(
        &self,
        account_id: &str,
        kind: MonitorKind,
        joined: Result<EngineResult<MonitorOutcome>, JoinError>,
    ) {
        let failure = match joined {
            Ok(Ok(outcome)) => {
                info!(account_id, %kind, ?outcome, "Monitor finished");
                return;
            }
            Ok(Err(e)) => format!("{} monitor failed: {}", kind, e),
            Err(e) => format!("{} monitor panicked: {}", kind, e),
        };
        error!(account_id, "{}", failure);
        self.enforcer.handle_account_error(account_id, &failure).await;
    }

    async fn spawn_monitors(&mut self) {
        for (account_id, status) in self.ctx.state.statuses() {
            if self.monitors.contains_key(&account_id) {
                continue;
            }
            match status {
                AccountStatus::WaitingTarget => self.spawn_target_monitor(&account_id).await,
                AccountStatus::FundingCollection => self.spawn_funding_monitor(&account_id),
                AccountStatus::Initialized => match self.chain.arm(&account_id).await {
                    Ok(_) => self.spawn_target_monitor(&account_id).await,
                    Err(e) => self.fail(&account_id, format!("arming failed: {}", e)).await,
                },
                _ => {}
            }
        }
    }

    async fn fail(&self, account_id: &str, message: String) {
        self.ctx.state.fail_account(account_id, &message).await;
        self.enforcer.handle_account_error(account_id, &message).await;
    }

    async fn spawn_target_monitor(&mut self, account_id: &str) {
        let Some(hedge) = self.ctx.state.hedge(account_id) else {
            self.fail(account_id, "waiting for target without a hedge entry".to_string())
                .await;
            return;
        };

        let place_orders = self.orders_placed.insert(account_id.to_string());
        let control = MonitorControl::new(self.ctx.shutdown.clone());
        let monitor = TargetMonitor::new(
            account_id,
            hedge,
            self.ctx.clone(),
            Arc::clone(&self.chain),
            place_orders,
            control.clone(),
        );

        debug!(account_id, "Spawning target monitor");
        self.monitors.insert(
            account_id.to_string(),
            MonitorSlot {
                kind: MonitorKind::Target,
                control,
                handle: tokio::spawn(monitor.run()),
            },
        );
    }

    fn spawn_funding_monitor(&mut self, account_id: &str) {
        let control = MonitorControl::new(self.ctx.shutdown.clone());
        let monitor = FundingRateMonitor::new(
            account_id,
            self.ctx.clone(),
            Arc::clone(&self.chain),
            self.config.risk.min_funding_rate,
            control.clone(),
        );

        debug!(account_id, "Spawning funding monitor");
        self.monitors.insert(
            account_id.to_string(),
            MonitorSlot {
                kind: MonitorKind::Funding,
                control,
                handle: tokio::spawn(monitor.run()),
            },
        );
    }

    /// Cancel one account's monitor and wait for it to exit
    pub async fn stop_monitor(&mut self, account_id: &str) -> Option<MonitorOutcome> {
        let slot = self.monitors.remove(account_id)?;
        slot.control.stop();
        match slot.handle.await {
            Ok(Ok(outcome)) => Some(outcome),
            Ok(Err(e)) => {
                warn!(account_id, "Monitor ended with error while stopping: {}", e);
                None
            }
            Err(e) => {
                warn!(account_id, "Monitor failed to join: {}", e);
                None
            }
        }
    }

    /// Stop every monitor and the risk enforcer, then persist
    pub async fn stop(&mut self) {
        info!(monitors = self.monitors.len(), "Stopping funding chain engine");

        for slot in self.monitors.values() {
            slot.control.stop();
        }
        let slots: Vec<(String, MonitorSlot)> = self.monitors.drain().collect();
        let joined = join_all(
            slots
                .into_iter()
                .map(|(id, slot)| async move { (id, slot.kind, slot.handle.await) }),
        )
        .await;
        for (account_id, kind, result) in joined {
            match result {
                Ok(Ok(outcome)) => debug!(account_id = %account_id, %kind, ?outcome, "Monitor stopped"),
                Ok(Err(e)) => warn!(account_id = %account_id, %kind, "Monitor ended with error: {}", e),
                Err(e) => warn!(account_id = %account_id, %kind, "Monitor failed to join: {}", e),
            }
        }

        self.enforcer.stop().await;
        self.ctx.state.persist().await;
        info!("Funding chain engine stopped");
    }
}
