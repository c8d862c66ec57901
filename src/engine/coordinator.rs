//! # engine::coordinator
//!
//! **Strategy Coordinator** — owns the pipeline and its lifecycle.
//!
//! ```text
//!  ┌──────────────┐  one task per symbol   ┌─────────────────────────────┐
//!  │   Gateway    │ ─── last_tick ───────▶ │ TickBuffer → Features       │
//!  │  (broker)    │                         │   → Signal → Risk → Execute │
//!  └──────────────┘ ◀── submit / close ──── │   + monitor() every cycle   │
//!         ▲                                 └─────────────────────────────┘
//!         └── account_info ── equity sampler task (1s)
//! ```
//!
//! One cancellable task per instrument plus one sampler; cancellation is
//! cooperative through a watch channel each worker checks every iteration.
//! Within one instrument the pipeline is strictly sequential; across
//! instruments no ordering is guaranteed or required.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::engine::buffer::TickBuffer;
use crate::engine::execution::ExecutionEngine;
use crate::engine::features::FeatureExtractor;
use crate::engine::risk::{RiskManager, RiskStatus};
use crate::engine::signal::SignalGenerator;
use crate::error::EngineError;
use crate::events::WsEvent;
use crate::gateway::{AccountInfo, MarketGateway};
use crate::models::{CloseReason, EquityHistory, EquityPoint, Position};

// ─── Worker Handles ───────────────────────────────────────────────────────────

struct WorkerHandle {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Signal the worker and join it with a bounded timeout; abort stragglers so
/// `stop()` never blocks indefinitely.
async fn shutdown_worker(worker: WorkerHandle, timeout: Duration) {
    let _ = worker.stop_tx.send(true);
    let mut handle = worker.handle;
    if tokio::time::timeout(timeout, &mut handle).await.is_err() {
        warn!("worker join timed out — aborting task");
        handle.abort();
    }
}

#[derive(Default)]
struct RunState {
    running: bool,
    workers: HashMap<String, WorkerHandle>,
    sampler: Option<WorkerHandle>,
}

// ─── Coordinator ──────────────────────────────────────────────────────────────

pub struct StrategyCoordinator {
    settings: Settings,
    gateway: Arc<dyn MarketGateway>,

    extractor: Arc<FeatureExtractor>,
    generator: Arc<SignalGenerator>,
    risk: Arc<RiskManager>,
    execution: Arc<ExecutionEngine>,

    /// One buffer per instrument; each worker is the only writer of its own.
    buffers: RwLock<HashMap<String, Arc<RwLock<TickBuffer>>>>,
    equity: Arc<EquityHistory>,

    broadcast_tx: broadcast::Sender<String>,
    run: Mutex<RunState>,

    pub tick_count: AtomicU64,
    pub trade_count: AtomicU64,
}

impl StrategyCoordinator {
    pub fn new(settings: Settings, gateway: Arc<dyn MarketGateway>) -> Self {
        let (broadcast_tx, _) = broadcast::channel(256);

        let extractor = Arc::new(FeatureExtractor::new(settings.feature_window));
        let generator = Arc::new(SignalGenerator::new(settings.signal_config()));
        let risk = Arc::new(RiskManager::new(gateway.clone(), settings.risk_config()));
        let execution = Arc::new(ExecutionEngine::new(
            gateway.clone(),
            chrono::Duration::milliseconds(settings.monitor_interval_ms as i64),
        ));

        let buffers = settings
            .symbols
            .iter()
            .map(|symbol| {
                (
                    symbol.clone(),
                    Arc::new(RwLock::new(TickBuffer::new(settings.tick_buffer_size))),
                )
            })
            .collect();

        let equity = Arc::new(EquityHistory::new(settings.equity_history_size));

        Self {
            settings,
            gateway,
            extractor,
            generator,
            risk,
            execution,
            buffers: RwLock::new(buffers),
            equity,
            broadcast_tx,
            run: Mutex::new(RunState::default()),
            tick_count: AtomicU64::new(0),
            trade_count: AtomicU64::new(0),
        }
    }

    // ─── Lifecycle ────────────────────────────────────────────────────────────

    /// Connect, initialize risk, spawn one worker per instrument plus the
    /// equity sampler. Fails fast with no partial state; a second call while
    /// running is a no-op returning `Ok(false)`.
    pub async fn start(self: &Arc<Self>) -> Result<bool, EngineError> {
        let mut run = self.run.lock().await;
        if run.running {
            warn!("coordinator already running — start ignored");
            return Ok(false);
        }

        self.gateway.connect().await?;

        if let Err(e) = self.risk.initialize().await {
            // No partial state: undo the connect before surfacing.
            self.gateway.disconnect().await;
            return Err(e);
        }

        run.running = true;

        let symbols: Vec<String> = self.buffers.read().await.keys().cloned().collect();
        for symbol in &symbols {
            run.workers
                .insert(symbol.clone(), self.spawn_worker(symbol.clone()));
        }
        run.sampler = Some(self.spawn_sampler());
        drop(run);

        info!(?symbols, "🚀 coordinator started");
        self.broadcast(&WsEvent::EngineStarted { symbols });
        Ok(true)
    }

    /// Cooperative shutdown: signal every worker, join with a bounded
    /// timeout, force-close all positions, disconnect. Idempotent, and
    /// guaranteed to return — no worker can initiate orders afterwards.
    pub async fn stop(&self) -> bool {
        let (workers, sampler) = {
            let mut run = self.run.lock().await;
            if !run.running {
                info!("coordinator already stopped");
                return true;
            }
            run.running = false;
            (std::mem::take(&mut run.workers), run.sampler.take())
        };

        let timeout = self.settings.stop_join_timeout();
        for (_, worker) in workers {
            shutdown_worker(worker, timeout).await;
        }
        if let Some(sampler) = sampler {
            shutdown_worker(sampler, timeout).await;
        }

        if !self.close_and_report(None).await {
            warn!("some positions failed to close during shutdown — still tracked");
        }

        self.gateway.disconnect().await;
        info!("coordinator stopped");
        self.broadcast(&WsEvent::EngineStopped);
        true
    }

    pub async fn is_running(&self) -> bool {
        self.run.lock().await.running
    }

    // ─── Dynamic Membership ───────────────────────────────────────────────────

    /// Add an instrument at runtime. Returns `Ok(false)` if already present.
    pub async fn add_instrument(self: &Arc<Self>, symbol: &str) -> Result<bool, EngineError> {
        if self.buffers.read().await.contains_key(symbol) {
            return Ok(false);
        }

        // The gateway must know the symbol before a worker polls it.
        self.gateway.symbol_info(symbol).await?;

        self.buffers.write().await.insert(
            symbol.to_string(),
            Arc::new(RwLock::new(TickBuffer::new(self.settings.tick_buffer_size))),
        );

        let mut run = self.run.lock().await;
        if run.running {
            run.workers
                .insert(symbol.to_string(), self.spawn_worker(symbol.to_string()));
        }
        drop(run);

        info!(symbol, "instrument added");
        self.broadcast(&WsEvent::InstrumentAdded {
            symbol: symbol.to_string(),
        });
        Ok(true)
    }

    /// Remove an instrument: close its positions, stop its worker, discard
    /// its buffer. Returns `Ok(false)` if unknown.
    pub async fn remove_instrument(&self, symbol: &str) -> Result<bool, EngineError> {
        if !self.buffers.read().await.contains_key(symbol) {
            return Ok(false);
        }

        // Positions first, so nothing is ever left unsupervised.
        self.close_and_report(Some(symbol)).await;

        let worker = self.run.lock().await.workers.remove(symbol);
        if let Some(worker) = worker {
            shutdown_worker(worker, self.settings.stop_join_timeout()).await;
        }

        // The worker may have fired between the first sweep and its stop.
        self.close_and_report(Some(symbol)).await;

        self.buffers.write().await.remove(symbol);

        info!(symbol, "instrument removed");
        self.broadcast(&WsEvent::InstrumentRemoved {
            symbol: symbol.to_string(),
        });
        Ok(true)
    }

    pub async fn symbols(&self) -> Vec<String> {
        self.buffers.read().await.keys().cloned().collect()
    }

    // ─── Workers ──────────────────────────────────────────────────────────────

    fn spawn_worker(self: &Arc<Self>, symbol: String) -> WorkerHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let coordinator = Arc::clone(self);
        let poll = self.settings.poll_interval();

        let handle = tokio::spawn(async move {
            info!(symbol = %symbol, "worker started");
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = tokio::time::sleep(poll) => {
                        coordinator.run_cycle(&symbol).await;
                    }
                }
            }
            info!(symbol = %symbol, "worker stopped");
        });

        WorkerHandle { stop_tx, handle }
    }

    fn spawn_sampler(self: &Arc<Self>) -> WorkerHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let coordinator = Arc::clone(self);
        let interval = self.settings.equity_sample_interval();

        let handle = tokio::spawn(async move {
            info!("equity sampler started");
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = tokio::time::sleep(interval) => {
                        coordinator.sample_equity().await;
                    }
                }
            }
            info!("equity sampler stopped");
        });

        WorkerHandle { stop_tx, handle }
    }

    /// One pipeline iteration for one instrument. Every component failure is
    /// handled locally — a bad cycle on one symbol never terminates another
    /// symbol's worker or the sampler.
    async fn run_cycle(&self, symbol: &str) {
        // Virtual stop supervision first: reaction latency to breaches must
        // not depend on this symbol having a fresh tick.
        for (position, reason) in self.execution.monitor().await {
            self.broadcast(&WsEvent::PositionClosed {
                ticket: position.ticket,
                symbol: position.symbol,
                reason,
            });
        }

        let Some(buffer) = self.buffers.read().await.get(symbol).cloned() else {
            return; // removed concurrently
        };

        let tick = match self.gateway.last_tick(symbol).await {
            Ok(tick) => tick,
            Err(e) => {
                debug!(symbol, error = %e, "no tick — skipping cycle");
                return;
            }
        };
        self.tick_count.fetch_add(1, Ordering::Relaxed);

        buffer.write().await.add(tick);

        let features = {
            let buffer = buffer.read().await;
            self.extractor.calculate(&buffer)
        };

        let signal = self.generator.generate(symbol, features, tick.time).await;
        if !signal.direction.is_actionable() {
            return;
        }
        self.broadcast(&WsEvent::SignalFired {
            signal: Box::new(signal.clone()),
        });

        if !self.risk.can_open(symbol).await {
            debug!(symbol, "risk gate rejected signal");
            return;
        }

        let volatility = signal.features.get("volatility").copied().unwrap_or(0.0);
        let sized = match self.risk.size(symbol, signal.strength, volatility).await {
            Ok(sized) if sized.lots > 0.0 => sized,
            Ok(_) => return,
            Err(e) => {
                warn!(symbol, error = %e, "position sizing failed");
                return;
            }
        };

        match self
            .execution
            .execute(&signal, sized.lots, sized.sl_points, sized.tp_points)
            .await
        {
            Ok(position) => {
                self.trade_count.fetch_add(1, Ordering::Relaxed);
                self.broadcast(&WsEvent::PositionOpened {
                    position: Box::new(position),
                });
            }
            Err(e) => warn!(symbol, error = %e, "execution failed"),
        }
    }

    async fn sample_equity(&self) {
        match self.gateway.account_info().await {
            Ok(account) => {
                let point = EquityPoint {
                    timestamp: Utc::now(),
                    balance: account.balance,
                    equity: account.equity,
                    margin: account.margin,
                    profit: account.profit,
                };
                self.equity.add(point).await;
                self.broadcast(&WsEvent::EquitySampled { point });
            }
            Err(e) => debug!(error = %e, "equity sample skipped"),
        }
    }

    // ─── Upward Surface ───────────────────────────────────────────────────────

    pub async fn account_info(&self) -> Result<AccountInfo, EngineError> {
        self.gateway.account_info().await
    }

    pub async fn open_positions(&self) -> Vec<Position> {
        self.execution.open_positions().await
    }

    pub async fn close_all_positions(&self) -> bool {
        self.close_and_report(None).await
    }

    /// Close tracked positions (all, or one symbol's) and broadcast a manual
    /// close event for every position that actually went away.
    async fn close_and_report(&self, symbol: Option<&str>) -> bool {
        let supervised: Vec<Position> = self
            .execution
            .open_positions()
            .await
            .into_iter()
            .filter(|p| symbol.map_or(true, |s| p.symbol == s))
            .collect();

        let all_closed = match symbol {
            Some(symbol) => self.execution.close_symbol(symbol).await,
            None => self.execution.close_all().await,
        };

        let still_open: std::collections::HashSet<u64> = self
            .execution
            .open_positions()
            .await
            .iter()
            .map(|p| p.ticket)
            .collect();

        for position in supervised {
            if !still_open.contains(&position.ticket) {
                self.broadcast(&WsEvent::PositionClosed {
                    ticket: position.ticket,
                    symbol: position.symbol,
                    reason: CloseReason::Manual,
                });
            }
        }

        all_closed
    }

    pub async fn equity_history(&self, n: Option<usize>) -> Vec<EquityPoint> {
        self.equity.recent(n).await
    }

    pub async fn risk_status(&self) -> RiskStatus {
        self.risk.status().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.broadcast_tx.subscribe()
    }

    /// Fire-and-forget: no listener is not an error (headless mode).
    pub fn broadcast(&self, event: &WsEvent) {
        let _ = self.broadcast_tx.send(event.to_json());
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::testkit::MockGateway;
    use crate::models::Tick;

    fn settings() -> Settings {
        Settings {
            symbols: vec!["EURUSD".into()],
            tick_buffer_size: 64,
            feature_window: 5,
            base_threshold: 0.03,
            min_signal_interval_ms: 0,
            max_risk_per_trade: 0.01,
            max_total_risk: 0.06,
            max_positions: 5,
            max_positions_per_symbol: 2,
            max_drawdown: 0.2,
            risk_check_interval_ms: 0,
            min_margin_ratio: 1.5,
            sl_points_min: 50.0,
            sl_points_max: 200.0,
            tp_points_min: 75.0,
            tp_points_max: 300.0,
            poll_interval_ms: 5,
            monitor_interval_ms: 0,
            equity_sample_interval_ms: 20,
            equity_history_size: 100,
            stop_join_timeout_ms: 1000,
            bind_addr: "127.0.0.1:0".into(),
            gateway_base_url: "mock".into(),
            gateway_timeout_ms: 1000,
            gateway_max_retries: 3,
            gateway_retry_delay_ms: 10,
        }
    }

    fn funded_account() -> crate::gateway::AccountInfo {
        crate::gateway::AccountInfo {
            balance: 10_000.0,
            equity: 10_000.0,
            margin: 0.0,
            free_margin: 10_000.0,
            profit: 0.0,
        }
    }

    async fn push_uptrend(coordinator: &StrategyCoordinator, symbol: &str, n: usize) {
        let buffers = coordinator.buffers.read().await;
        let buffer = buffers.get(symbol).unwrap();
        let mut buffer = buffer.write().await;
        for i in 0..n {
            let mid = 1.1000 + i as f64 * 0.0005;
            buffer.add(Tick {
                bid: mid - 0.0001,
                ask: mid + 0.0001,
                volume: 1.0,
                time: Utc::now(),
            });
        }
    }

    #[tokio::test]
    async fn start_fails_fast_when_gateway_connect_fails() {
        let gateway = Arc::new(MockGateway::new());
        gateway.fail_connect(true).await;
        let coordinator = Arc::new(StrategyCoordinator::new(settings(), gateway));

        assert!(coordinator.start().await.is_err());
        assert!(!coordinator.is_running().await);
    }

    #[tokio::test]
    async fn start_fails_fast_when_account_unavailable() {
        let gateway = Arc::new(MockGateway::new());
        gateway.fail_account_info(true).await;
        let coordinator = Arc::new(StrategyCoordinator::new(settings(), gateway));

        // Risk initialization is a hard precondition.
        assert!(coordinator.start().await.is_err());
        assert!(!coordinator.is_running().await);
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let gateway = Arc::new(MockGateway::new());
        gateway.set_account(funded_account()).await;
        let coordinator = Arc::new(StrategyCoordinator::new(settings(), gateway));

        assert!(coordinator.start().await.unwrap());
        assert!(!coordinator.start().await.unwrap(), "double start is a no-op");
        assert!(coordinator.is_running().await);

        assert!(coordinator.stop().await);
        assert!(!coordinator.is_running().await);
        assert!(coordinator.stop().await, "stop is idempotent");
    }

    #[tokio::test]
    async fn cycle_opens_position_on_strong_signal() {
        let gateway = Arc::new(MockGateway::new());
        gateway.set_account(funded_account()).await;
        let coordinator = Arc::new(StrategyCoordinator::new(settings(), gateway.clone()));

        // Nine trending ticks buffered; the tenth arrives via the gateway.
        push_uptrend(&coordinator, "EURUSD", 9).await;
        gateway.set_tick("EURUSD", 1.1044, 1.1046).await;

        coordinator.run_cycle("EURUSD").await;

        let positions = coordinator.open_positions().await;
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].symbol, "EURUSD");
        assert_eq!(positions[0].direction, crate::models::Direction::Buy);
        assert!(positions[0].virtual_sl < positions[0].entry_price);
        assert!(positions[0].virtual_tp > positions[0].entry_price);
        assert_eq!(coordinator.trade_count.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn cycle_skips_when_tick_unavailable() {
        let gateway = Arc::new(MockGateway::new());
        gateway.set_account(funded_account()).await;
        let coordinator = Arc::new(StrategyCoordinator::new(settings(), gateway));

        // No tick configured for the symbol — the cycle is a no-op.
        coordinator.run_cycle("EURUSD").await;
        assert_eq!(coordinator.tick_count.load(Ordering::Relaxed), 0);
        assert!(coordinator.open_positions().await.is_empty());
    }

    #[tokio::test]
    async fn stop_closes_open_positions() {
        let gateway = Arc::new(MockGateway::new());
        gateway.set_account(funded_account()).await;
        let coordinator = Arc::new(StrategyCoordinator::new(settings(), gateway.clone()));

        push_uptrend(&coordinator, "EURUSD", 9).await;
        gateway.set_tick("EURUSD", 1.1044, 1.1046).await;
        coordinator.run_cycle("EURUSD").await;
        assert_eq!(coordinator.open_positions().await.len(), 1);

        assert!(coordinator.start().await.unwrap());
        assert!(coordinator.stop().await);
        assert!(coordinator.open_positions().await.is_empty());
        assert!(!gateway.closed_tickets().await.is_empty());
    }

    #[tokio::test]
    async fn sampler_records_equity_points() {
        let gateway = Arc::new(MockGateway::new());
        gateway.set_account(funded_account()).await;
        gateway.set_tick("EURUSD", 1.1000, 1.1001).await;
        let coordinator = Arc::new(StrategyCoordinator::new(settings(), gateway));

        coordinator.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        coordinator.stop().await;

        assert!(!coordinator.equity_history(None).await.is_empty());
    }

    #[tokio::test]
    async fn add_and_remove_instrument() {
        let gateway = Arc::new(MockGateway::new());
        gateway.set_account(funded_account()).await;
        let coordinator = Arc::new(StrategyCoordinator::new(settings(), gateway.clone()));

        assert!(coordinator.add_instrument("GBPUSD").await.unwrap());
        assert!(!coordinator.add_instrument("GBPUSD").await.unwrap(), "duplicate");
        assert_eq!(coordinator.symbols().await.len(), 2);

        // Open a position on the new symbol, then remove it.
        push_uptrend(&coordinator, "GBPUSD", 9).await;
        gateway.set_tick("GBPUSD", 1.1044, 1.1046).await;
        coordinator.run_cycle("GBPUSD").await;
        assert_eq!(coordinator.open_positions().await.len(), 1);

        assert!(coordinator.remove_instrument("GBPUSD").await.unwrap());
        assert!(coordinator.open_positions().await.is_empty());
        assert_eq!(coordinator.symbols().await, vec!["EURUSD".to_string()]);

        assert!(!coordinator.remove_instrument("GBPUSD").await.unwrap(), "unknown");
    }
}
