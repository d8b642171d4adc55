//! Engine runner - event loop wiring feeds and gateway to the engine

use std::time::Duration;

use log::{error, info, warn};
use tokio::sync::mpsc;
use tokio::time::interval;

use super::config::GridConfig;
use super::engine::GridEngine;
use super::errors::{EngineError, EngineResult};
use super::gateway::{OrderEventFeed, OrderGateway, PriceFeed};
use super::state::StateManager;
use super::types::{EngineStatus, EngineSummary, OrderEvent, PriceTick};

/// Engine runner configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub equity_refresh_interval_secs: u64,
    pub max_consecutive_errors: u32,
    pub close_on_stop: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            equity_refresh_interval_secs: 30,
            max_consecutive_errors: 5,
            close_on_stop: false,
        }
    }
}

/// Control commands accepted by a running engine
///
/// `Pause` stops price processing while order events keep flowing, so
/// fills for already submitted orders are never lost. `Stop` leaves the
/// event loop and runs the shutdown sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCommand {
    Pause,
    Resume,
    Stop,
}

/// Owns a [`GridEngine`] and drives it from price and order event feeds
///
/// The runner serializes all engine access on a single task. External
/// control goes through the command channel returned by [`handle`].
///
/// [`handle`]: EngineRunner::handle
pub struct EngineRunner<G: OrderGateway, P: PriceFeed, F: OrderEventFeed> {
    engine: GridEngine,
    gateway: G,
    price_feed: P,
    event_feed: F,
    runner_config: RunnerConfig,
    state_manager: StateManager,
    status: EngineStatus,
    command_tx: mpsc::UnboundedSender<EngineCommand>,
    command_rx: mpsc::UnboundedReceiver<EngineCommand>,
}

impl<G, P, F> EngineRunner<G, P, F>
where
    G: OrderGateway + 'static,
    P: PriceFeed + 'static,
    F: OrderEventFeed + 'static,
{
    /// Create a runner, resuming from the configured state file when one exists
    pub fn new(
        config: GridConfig,
        gateway: G,
        price_feed: P,
        event_feed: F,
        runner_config: RunnerConfig,
    ) -> EngineResult<Self> {
        let state_manager = StateManager::from_config(&config);
        let engine = match state_manager.load(&config) {
            Some(snapshot) => GridEngine::resume(config, snapshot)?,
            None => GridEngine::new(config)?,
        };
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        Ok(Self {
            engine,
            gateway,
            price_feed,
            event_feed,
            runner_config,
            state_manager,
            status: EngineStatus::Initializing,
            command_tx,
            command_rx,
        })
    }

    /// Sender for control commands
    ///
    /// Grab one before calling [`run`], which consumes the runner.
    ///
    /// [`run`]: EngineRunner::run
    pub fn handle(&self) -> mpsc::UnboundedSender<EngineCommand> {
        self.command_tx.clone()
    }

    /// Current runner status
    pub fn status(&self) -> EngineStatus {
        self.status
    }

    /// Point-in-time view of the owned engine
    pub fn summary(&self) -> EngineSummary {
        self.engine.summary()
    }

    /// Run the event loop until stopped or the feeds close
    pub async fn run(mut self) -> EngineResult<()> {
        let instrument = self.engine.instrument().to_string();
        info!("Starting engine runner for {}", instrument);

        // Orders left resting by a previous run would fill against a
        // cycle that no longer tracks them
        let cleared = self.gateway.cancel_all(&instrument).await?;
        if cleared > 0 {
            info!("Cancelled {} stale orders on startup", cleared);
        }

        let mut price_rx = self.price_feed.subscribe(&instrument).await?;
        let mut event_rx = self.event_feed.subscribe().await?;
        let mut equity_timer = interval(Duration::from_secs(
            self.runner_config.equity_refresh_interval_secs,
        ));
        let mut consecutive_errors = 0u32;
        self.status = EngineStatus::Running;

        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(EngineCommand::Pause) => {
                            if self.status == EngineStatus::Running {
                                self.status = EngineStatus::Paused;
                                info!("Engine paused, order events still applied");
                            }
                        }
                        Some(EngineCommand::Resume) => {
                            if self.status == EngineStatus::Paused {
                                self.status = EngineStatus::Running;
                                info!("Engine resumed");
                            }
                        }
                        Some(EngineCommand::Stop) | None => {
                            info!("Stop requested, leaving event loop");
                            break;
                        }
                    }
                }
                tick = price_rx.recv() => {
                    match tick {
                        Some(tick) => match self.handle_tick(&tick).await {
                            Ok(()) => consecutive_errors = 0,
                            Err(e) => {
                                error!("Error handling price tick: {}", e);
                                consecutive_errors += 1;
                            }
                        },
                        None => {
                            warn!("Price feed closed");
                            break;
                        }
                    }
                }
                event = event_rx.recv() => {
                    match event {
                        Some(event) => match self.handle_event(&event).await {
                            Ok(()) => consecutive_errors = 0,
                            Err(e) => {
                                error!("Error handling order event: {}", e);
                                consecutive_errors += 1;
                            }
                        },
                        None => {
                            warn!("Order event feed closed");
                            break;
                        }
                    }
                }
                _ = equity_timer.tick() => {
                    if let Err(e) = self.engine.refresh_equity(&self.gateway).await {
                        warn!("Equity refresh failed: {}", e);
                    }
                }
            }

            if consecutive_errors >= self.runner_config.max_consecutive_errors {
                error!("Too many consecutive errors, shutting down");
                self.finish(&instrument).await;
                return Err(EngineError::Gateway(
                    "Too many consecutive errors".to_string(),
                ));
            }
        }

        self.finish(&instrument).await;
        info!("Engine runner stopped");
        Ok(())
    }

    async fn handle_tick(&mut self, tick: &PriceTick) -> EngineResult<()> {
        if !self.status.should_process_prices() {
            return Ok(());
        }
        self.engine.on_price_tick(&self.gateway, tick).await?;
        if let Err(e) = self.state_manager.maybe_save(&self.engine.snapshot()) {
            warn!("Failed to save state: {}", e);
        }
        Ok(())
    }

    async fn handle_event(&mut self, event: &OrderEvent) -> EngineResult<()> {
        self.engine.on_order_event(&self.gateway, event).await?;
        if matches!(event, OrderEvent::Filled(_)) {
            if let Err(e) = self.state_manager.force_save(&self.engine.snapshot()) {
                warn!("Failed to save state: {}", e);
            }
        }
        Ok(())
    }

    async fn finish(&mut self, instrument: &str) {
        self.status = EngineStatus::Stopping;
        if let Err(e) = self
            .engine
            .shutdown(&self.gateway, self.runner_config.close_on_stop)
            .await
        {
            error!("Shutdown error: {}", e);
        }
        if let Err(e) = self.state_manager.force_save(&self.engine.snapshot()) {
            warn!("Failed to save final state: {}", e);
        }
        if let Err(e) = self.price_feed.unsubscribe(instrument).await {
            warn!("Price feed unsubscribe failed: {}", e);
        }
        if let Err(e) = self.event_feed.unsubscribe().await {
            warn!("Order event feed unsubscribe failed: {}", e);
        }
        self.status = EngineStatus::Stopped;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::config::{InstrumentSpec, ProfitTarget};
    use crate::grid::gateway::mock::MockGateway;
    use crate::grid::gateway::{ChannelOrderEventFeed, ChannelPriceFeed};
    use crate::grid::types::{FillEvent, OrderSide, StartMode};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn test_config() -> GridConfig {
        GridConfig::new(
            InstrumentSpec::new("EURUSD", dec!(1), dec!(0.01), dec!(0.01)),
            dec!(1),
            dec!(2),
            dec!(10),
            5,
            ProfitTarget::Currency(dec!(5)),
        )
        .with_start_mode(StartMode::Long)
        .without_state_file()
    }

    fn tick(price: Decimal) -> PriceTick {
        PriceTick::new("EURUSD", 0, price)
    }

    fn filled(order_id: u64, txn_id: u64, price: Decimal, volume: Decimal) -> OrderEvent {
        OrderEvent::Filled(FillEvent {
            order_id,
            txn_id,
            price,
            volume,
            side: OrderSide::Buy,
            timestamp_ms: 0,
        })
    }

    #[tokio::test]
    async fn test_runner_starts_and_stops() {
        let gateway = MockGateway::new();
        let gateway_handle = gateway.clone();
        let (price_tx, price_feed) = ChannelPriceFeed::new();
        let (_event_tx, event_feed) = ChannelOrderEventFeed::new();

        let runner = EngineRunner::new(
            test_config(),
            gateway,
            price_feed,
            event_feed,
            RunnerConfig::default(),
        )
        .unwrap();
        assert_eq!(runner.status(), EngineStatus::Initializing);
        let handle = runner.handle();
        let task = tokio::spawn(runner.run());

        price_tx.send(tick(dec!(100))).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(gateway_handle.order_count().await, 1);

        handle.send(EngineCommand::Stop).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_runner_pauses_price_processing() {
        let gateway = MockGateway::new();
        let gateway_handle = gateway.clone();
        let (price_tx, price_feed) = ChannelPriceFeed::new();
        let (_event_tx, event_feed) = ChannelOrderEventFeed::new();

        let runner = EngineRunner::new(
            test_config(),
            gateway,
            price_feed,
            event_feed,
            RunnerConfig::default(),
        )
        .unwrap();
        let handle = runner.handle();
        let task = tokio::spawn(runner.run());

        handle.send(EngineCommand::Pause).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        price_tx.send(tick(dec!(100))).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(gateway_handle.order_count().await, 0); // Paused, no entry

        handle.send(EngineCommand::Resume).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        price_tx.send(tick(dec!(100))).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(gateway_handle.order_count().await, 1);

        handle.send(EngineCommand::Stop).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_runner_processes_fill_events() {
        let gateway = MockGateway::new();
        let gateway_handle = gateway.clone();
        let (price_tx, price_feed) = ChannelPriceFeed::new();
        let (event_tx, event_feed) = ChannelOrderEventFeed::new();

        let runner = EngineRunner::new(
            test_config(),
            gateway,
            price_feed,
            event_feed,
            RunnerConfig::default(),
        )
        .unwrap();
        let handle = runner.handle();
        let task = tokio::spawn(runner.run());

        price_tx.send(tick(dec!(100))).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let oid = gateway_handle.last_order().await.unwrap().order_id;
        event_tx.send(filled(oid, 1, dec!(100), dec!(1))).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // One step below the level 1 fill triggers the level 2 entry
        price_tx.send(tick(dec!(90))).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(gateway_handle.order_count().await, 2);
        let second = gateway_handle.last_order().await.unwrap();
        assert_eq!(second.volume, dec!(2)); // Doubled volume at level 2

        handle.send(EngineCommand::Stop).unwrap();
        task.await.unwrap().unwrap();
    }
}
