//! Grid Engine Simulator
//!
//! Drives the averaging engine over a deterministic zigzag price path with an
//! in-process gateway, so full cycle lifecycles can be watched without a venue
//! connection. Market orders fill at the last simulated price, stop orders
//! rest until the path crosses their trigger.
//!
//! ## Run
//!
//! ```bash
//! cargo run --bin sim_bot -- --config config/sim
//! ```

use std::env;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use log::{error, info};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::Mutex;

use grid_engine::config::{Settings, SimConfig};
use grid_engine::grid::{
    EngineError, EngineResult, FillEvent, GridEngine, InstrumentSpec, OrderEvent, OrderGateway,
    OrderSide, PriceTick,
};

struct RestingStop {
    order_id: u64,
    side: OrderSide,
    volume: Decimal,
    trigger: Decimal,
}

/// In-process venue for the simulation
struct SimGateway {
    events: UnboundedSender<OrderEvent>,
    last_price: Mutex<Decimal>,
    resting: Mutex<Vec<RestingStop>>,
    next_oid: AtomicU64,
    next_txn: AtomicU64,
}

impl SimGateway {
    fn new(events: UnboundedSender<OrderEvent>, start_price: Decimal) -> Self {
        Self {
            events,
            last_price: Mutex::new(start_price),
            resting: Mutex::new(Vec::new()),
            next_oid: AtomicU64::new(1),
            next_txn: AtomicU64::new(1),
        }
    }

    /// Move the simulated price, filling any resting stop the move crossed
    async fn advance(&self, price: Decimal) -> EngineResult<()> {
        *self.last_price.lock().await = price;

        let mut resting = self.resting.lock().await;
        let mut i = 0;
        while i < resting.len() {
            let hit = match resting[i].side {
                OrderSide::Buy => price >= resting[i].trigger,
                OrderSide::Sell => price <= resting[i].trigger,
            };
            if hit {
                let order = resting.remove(i);
                // Stops fill at their trigger price
                self.send_fill(order.order_id, order.side, order.volume, order.trigger)?;
            } else {
                i += 1;
            }
        }
        Ok(())
    }

    fn send_fill(
        &self,
        order_id: u64,
        side: OrderSide,
        volume: Decimal,
        price: Decimal,
    ) -> EngineResult<()> {
        let txn_id = self.next_txn.fetch_add(1, Ordering::SeqCst);
        self.events
            .send(OrderEvent::Filled(FillEvent {
                order_id,
                txn_id,
                price,
                volume,
                side,
                timestamp_ms: chrono::Utc::now().timestamp_millis() as u64,
            }))
            .map_err(|e| EngineError::ChannelSend(e.to_string()))
    }
}

#[async_trait]
impl OrderGateway for SimGateway {
    async fn submit_market(
        &self,
        _instrument: &str,
        side: OrderSide,
        volume: Decimal,
    ) -> EngineResult<u64> {
        let order_id = self.next_oid.fetch_add(1, Ordering::SeqCst);
        let price = *self.last_price.lock().await;
        self.send_fill(order_id, side, volume, price)?;
        Ok(order_id)
    }

    async fn submit_stop(
        &self,
        _instrument: &str,
        side: OrderSide,
        volume: Decimal,
        trigger: Decimal,
    ) -> EngineResult<u64> {
        let order_id = self.next_oid.fetch_add(1, Ordering::SeqCst);
        self.resting.lock().await.push(RestingStop {
            order_id,
            side,
            volume,
            trigger,
        });
        Ok(order_id)
    }

    async fn cancel(&self, _instrument: &str, order_id: u64) -> EngineResult<bool> {
        let mut resting = self.resting.lock().await;
        match resting.iter().position(|o| o.order_id == order_id) {
            Some(idx) => {
                resting.remove(idx);
                self.events
                    .send(OrderEvent::Cancelled { order_id })
                    .map_err(|e| EngineError::ChannelSend(e.to_string()))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn cancel_all(&self, _instrument: &str) -> EngineResult<u32> {
        let mut resting = self.resting.lock().await;
        let count = resting.len() as u32;
        for order in resting.drain(..) {
            self.events
                .send(OrderEvent::Cancelled {
                    order_id: order.order_id,
                })
                .map_err(|e| EngineError::ChannelSend(e.to_string()))?;
        }
        Ok(count)
    }

    async fn account_equity(&self) -> EngineResult<Decimal> {
        Ok(dec!(10000))
    }
}

/// Triangle wave: fall to the swing bottom, recover to the start, repeat
fn build_path(sim: &SimConfig, instrument: &InstrumentSpec) -> Vec<Decimal> {
    let tick = instrument.price_offset(sim.tick_points);
    let bottom = sim.start_price - instrument.price_offset(sim.swing_points);

    let mut path = vec![sim.start_price];
    for _ in 0..sim.swings {
        let mut price = sim.start_price;
        while price > bottom {
            price -= tick;
            path.push(price);
        }
        while price < sim.start_price {
            price += tick;
            path.push(price);
        }
    }
    path
}

async fn drain_events(
    engine: &mut GridEngine,
    gateway: &SimGateway,
    event_rx: &mut mpsc::UnboundedReceiver<OrderEvent>,
) {
    while let Ok(event) = event_rx.try_recv() {
        if let Err(e) = engine.on_order_event(gateway, &event).await {
            error!("Order event failed: {}", e);
        }
    }
}

#[tokio::main]
async fn main() {
    // Load .env before the config layer so APP_* overrides are visible
    let env_file = dotenvy::dotenv();

    // Parse arguments
    let args: Vec<String> = env::args().collect();
    let config_path = if args.len() > 2 && args[1] == "--config" {
        args[2].clone()
    } else {
        "config/sim".to_string()
    };

    let settings = match Settings::new(&config_path) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", config_path, e);
            return;
        }
    };

    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", &settings.log.level);
    }
    env_logger::try_init().ok();

    match env_file {
        Ok(path) => info!("Loaded environment from: {}", path.display()),
        Err(_) => info!("No .env file found, using system environment variables"),
    }

    if settings.sim.tick_points <= Decimal::ZERO || settings.sim.swing_points <= Decimal::ZERO {
        error!("sim.tick_points and sim.swing_points must be positive");
        return;
    }

    info!(
        "Starting grid simulation for {}",
        settings.grid.instrument.symbol
    );
    info!(
        "Grid: {} levels max, {} points apart, base volume {} scaled x{} per level",
        settings.grid.max_level,
        settings.grid.step_distance,
        settings.grid.base_volume,
        settings.grid.volume_multiplier
    );
    info!(
        "Path: {} swings of {} points starting at {}",
        settings.sim.swings, settings.sim.swing_points, settings.sim.start_price
    );

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let gateway = SimGateway::new(event_tx, settings.sim.start_price);
    let mut engine = match GridEngine::new(settings.grid.clone()) {
        Ok(engine) => engine,
        Err(e) => {
            error!("Failed to create engine: {}", e);
            return;
        }
    };

    let path = build_path(&settings.sim, &settings.grid.instrument);
    info!("Simulating {} ticks", path.len());

    for price in path {
        if let Err(e) = gateway.advance(price).await {
            error!("Price advance failed: {}", e);
        }
        drain_events(&mut engine, &gateway, &mut event_rx).await;

        let tick = PriceTick::new(
            settings.grid.instrument.symbol.as_str(),
            chrono::Utc::now().timestamp_millis() as u64,
            price,
        );
        if let Err(e) = engine.on_price_tick(&gateway, &tick).await {
            error!("Price tick failed: {}", e);
        }
        drain_events(&mut engine, &gateway, &mut event_rx).await;
    }

    // Flatten whatever the last swing left open
    if let Err(e) = engine.shutdown(&gateway, true).await {
        error!("Shutdown failed: {}", e);
    }
    drain_events(&mut engine, &gateway, &mut event_rx).await;

    match serde_json::to_string_pretty(&engine.summary()) {
        Ok(json) => info!("Final state:\n{}", json),
        Err(e) => error!("Failed to serialize summary: {}", e),
    }
}
