//! Averaging grid engine - the per-instrument cycle state machine
//!
//! The engine owns one [`GridCycle`] at a time and advances it through
//! `Flat -> Armed -> Pending -> Closing` on price ticks and order
//! events. All handlers take `&mut self`; the runner drives a single
//! engine per instrument so no locking is involved.

use std::collections::HashSet;

use log::{debug, error, info, warn};
use rust_decimal::Decimal;

use super::config::{GridConfig, ProfitTarget};
use super::cycle::GridCycle;
use super::errors::EngineResult;
use super::gateway::{with_retry, OrderGateway};
use super::state::{ConfigSnapshot, CycleSnapshot};
use super::trailing::TrailingController;
use super::types::{
    CyclePhase, CycleStats, EngineSummary, EntryMode, ExitReason, FillEvent, OrderEvent,
    OrderIntent, OrderSide, PendingOrder, PriceTick, Side, StartMode,
};

/// Per-instrument averaging grid engine
pub struct GridEngine {
    config: GridConfig,
    cycle: GridCycle,
    phase: CyclePhase,
    trailing: Option<TrailingController>,
    /// The single cycle order allowed in flight
    pending: Option<PendingOrder>,
    /// Resting straddle stops while waiting for the first fill
    straddle: Vec<PendingOrder>,
    /// A cancel was requested for the pending order; don't ask again
    cancel_requested: bool,
    exposure_limited: bool,
    exit_reason: Option<ExitReason>,
    /// Transaction ids already applied, for replay protection
    processed_fills: HashSet<u64>,
    stats: CycleStats,
    accounting_alerts: u64,
    last_price: Option<Decimal>,
    equity: Option<Decimal>,
    equity_warned: bool,
}

impl GridEngine {
    /// Create a new engine with a validated configuration
    pub fn new(config: GridConfig) -> EngineResult<Self> {
        config.validate()?;

        let trailing = config
            .trailing
            .as_ref()
            .map(|params| TrailingController::from_params(params, &config.instrument));

        info!(
            "Engine created for {}: base_volume={}, multiplier={}, step={}pt, max_level={}, start={:?}, entry={:?}",
            config.instrument.symbol,
            config.base_volume,
            config.volume_multiplier,
            config.step_distance,
            config.max_level,
            config.start_mode,
            config.entry_mode
        );

        Ok(Self {
            config,
            cycle: GridCycle::new(),
            phase: CyclePhase::Flat,
            trailing,
            pending: None,
            straddle: Vec::new(),
            cancel_requested: false,
            exposure_limited: false,
            exit_reason: None,
            processed_fills: HashSet::new(),
            stats: CycleStats::default(),
            accounting_alerts: 0,
            last_price: None,
            equity: None,
            equity_warned: false,
        })
    }

    /// Rebuild an engine from a saved snapshot
    ///
    /// In-flight orders don't survive a restart; the runner cancels
    /// gateway leftovers at startup, so a non-flat cycle resumes as
    /// `Armed` and re-evaluates its triggers on the next tick.
    pub fn resume(config: GridConfig, snapshot: CycleSnapshot) -> EngineResult<Self> {
        config.validate()?;
        snapshot.validate_against_config(&config)?;

        let mut trailing = config
            .trailing
            .as_ref()
            .map(|params| TrailingController::from_params(params, &config.instrument));
        if let Some(controller) = &mut trailing {
            controller.restore(snapshot.trailing_anchor, snapshot.trailing_stop);
        }

        let phase = if snapshot.cycle.is_flat() {
            CyclePhase::Flat
        } else {
            CyclePhase::Armed
        };
        let exposure_limited =
            !snapshot.cycle.is_flat() && snapshot.cycle.level >= config.max_level;

        info!(
            "Resuming {}: phase={:?}, level={}, volume={}, avg={}",
            config.instrument.symbol,
            phase,
            snapshot.cycle.level,
            snapshot.cycle.total_volume,
            snapshot.cycle.average_price
        );

        Ok(Self {
            config,
            cycle: snapshot.cycle,
            phase,
            trailing,
            pending: None,
            straddle: Vec::new(),
            cancel_requested: false,
            exposure_limited,
            exit_reason: None,
            processed_fills: snapshot.processed_fills.into_iter().collect(),
            stats: snapshot.stats,
            accounting_alerts: snapshot.accounting_alerts,
            last_price: snapshot.last_price,
            equity: None,
            equity_warned: false,
        })
    }

    /// Instrument this engine trades
    pub fn instrument(&self) -> &str {
        &self.config.instrument.symbol
    }

    /// Current cycle phase
    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    /// Engine configuration
    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    /// Point-in-time view for logging and monitoring
    pub fn summary(&self) -> EngineSummary {
        EngineSummary {
            instrument: self.config.instrument.symbol.clone(),
            phase: self.phase,
            side: self.cycle.side,
            level: self.cycle.level,
            average_price: self.cycle.average_price,
            total_volume: self.cycle.total_volume,
            last_entry_price: self.cycle.last_entry_price,
            floating_pnl: self
                .last_price
                .map(|price| self.cycle.floating_pnl(price))
                .unwrap_or_default(),
            trailing_anchor: self.trailing.as_ref().and_then(|t| t.anchor()),
            trailing_stop: self.trailing.as_ref().and_then(|t| t.stop()),
            exposure_limited: self.exposure_limited,
            last_price: self.last_price,
            stats: self.stats.clone(),
            accounting_alerts: self.accounting_alerts,
        }
    }

    /// Serialize the engine into a persistable snapshot
    pub fn snapshot(&self) -> CycleSnapshot {
        let mut processed_fills: Vec<u64> = self.processed_fills.iter().copied().collect();
        processed_fills.sort_unstable();

        CycleSnapshot {
            instrument: self.config.instrument.symbol.clone(),
            phase: self.phase,
            cycle: self.cycle.clone(),
            trailing_anchor: self.trailing.as_ref().and_then(|t| t.anchor()),
            trailing_stop: self.trailing.as_ref().and_then(|t| t.stop()),
            exposure_limited: self.exposure_limited,
            processed_fills,
            stats: self.stats.clone(),
            accounting_alerts: self.accounting_alerts,
            last_price: self.last_price,
            last_updated: chrono::Utc::now().timestamp_millis() as u64,
            config_snapshot: Some(ConfigSnapshot::from_config(&self.config)),
        }
    }

    /// Fetch and cache account equity for percent profit targets
    pub async fn refresh_equity<G: OrderGateway>(&mut self, gateway: &G) -> EngineResult<()> {
        let equity = gateway.account_equity().await?;
        debug!("Account equity: {}", equity);
        self.equity = Some(equity);
        self.equity_warned = false;
        Ok(())
    }

    // ========================================================================
    // Price handling
    // ========================================================================

    /// Advance the cycle on a new price observation
    pub async fn on_price_tick<G: OrderGateway>(
        &mut self,
        gateway: &G,
        tick: &PriceTick,
    ) -> EngineResult<()> {
        if tick.instrument != self.config.instrument.symbol {
            debug!("Ignoring tick for {}", tick.instrument);
            return Ok(());
        }
        self.last_price = Some(tick.price);

        match self.phase {
            CyclePhase::Flat => {
                if self.straddle.is_empty() && self.pending.is_none() {
                    self.begin_cycle(gateway, tick.price).await?;
                }
            }
            CyclePhase::Armed => {
                // Exit conditions outrank the next-level trigger
                if let Some(reason) = self.exit_signal(tick.price) {
                    self.submit_close(gateway, reason).await?;
                } else if self.entry_signal(tick.price) {
                    self.submit_next_entry(gateway, tick.price).await?;
                }
            }
            CyclePhase::Pending => {
                if let Some(reason) = self.exit_signal(tick.price) {
                    self.cancel_pending_entry(gateway, reason).await?;
                } else {
                    self.check_entry_expiry(gateway).await?;
                }
            }
            CyclePhase::Closing => {
                // A rejected or cancelled close leaves volume open; try again
                if self.pending.is_none() {
                    let reason = self.exit_reason.unwrap_or(ExitReason::StopLoss);
                    self.submit_close(gateway, reason).await?;
                }
            }
        }

        Ok(())
    }

    /// Open a fresh cycle at the given reference price
    async fn begin_cycle<G: OrderGateway>(
        &mut self,
        gateway: &G,
        price: Decimal,
    ) -> EngineResult<()> {
        let volume = self.config.volume_for_level(1);

        match self.config.start_mode {
            StartMode::Long => {
                debug!("Starting long cycle at {}", price);
                self.submit_entry(gateway, OrderSide::Buy, volume).await
            }
            StartMode::Short => {
                debug!("Starting short cycle at {}", price);
                self.submit_entry(gateway, OrderSide::Sell, volume).await
            }
            StartMode::Either => self.place_straddle(gateway, price, volume).await,
        }
    }

    /// Place the two resting stops that let the market pick the side
    async fn place_straddle<G: OrderGateway>(
        &mut self,
        gateway: &G,
        price: Decimal,
        volume: Decimal,
    ) -> EngineResult<()> {
        let offset = self.config.instrument.price_offset(self.config.step_distance);
        let buy_trigger = self.config.instrument.round_price(price + offset);
        let sell_trigger = self.config.instrument.round_price(price - offset);
        let symbol = self.config.instrument.symbol.clone();

        let buy_oid = with_retry(
            self.config.max_order_retries,
            self.config.retry_base_delay_ms,
            || gateway.submit_stop(&symbol, OrderSide::Buy, volume, buy_trigger),
        )
        .await?;
        self.straddle.push(PendingOrder::new(
            buy_oid,
            OrderIntent::Entry,
            OrderSide::Buy,
            volume,
        ));

        let sell_result = with_retry(
            self.config.max_order_retries,
            self.config.retry_base_delay_ms,
            || gateway.submit_stop(&symbol, OrderSide::Sell, volume, sell_trigger),
        )
        .await;

        let sell_oid = match sell_result {
            Ok(oid) => oid,
            Err(e) => {
                // One resting leg alone would open an unhedged breakout
                error!("Second straddle leg failed, pulling the first: {}", e);
                self.cancel_straddle(gateway).await;
                self.straddle.clear();
                return Err(e);
            }
        };
        self.straddle.push(PendingOrder::new(
            sell_oid,
            OrderIntent::Entry,
            OrderSide::Sell,
            volume,
        ));

        info!(
            "Straddle placed: buy oid={} @ {}, sell oid={} @ {}, volume={}",
            buy_oid, buy_trigger, sell_oid, sell_trigger, volume
        );
        Ok(())
    }

    /// True when the adverse move from the last entry reaches the
    /// widening trigger distance for the next level
    fn entry_signal(&self, price: Decimal) -> bool {
        let side = match self.cycle.side {
            Some(side) => side,
            None => return false,
        };
        if self.cycle.level >= self.config.max_level {
            // Exposure cap: exits stay active, entries stop
            return false;
        }

        let distance = self.config.next_level_distance(self.cycle.level);
        side.adverse_distance(self.cycle.last_entry_price, price) >= distance
    }

    /// Exit check in priority order: hard stop, profit objective,
    /// trailing retrace
    fn exit_signal(&mut self, price: Decimal) -> Option<ExitReason> {
        let side = self.cycle.side?;

        if let Some(stop_offset) = self.config.stop_loss_offset() {
            if side.adverse_distance(self.cycle.average_price, price) >= stop_offset {
                return Some(ExitReason::StopLoss);
            }
        }

        if let Some(target) = self.profit_target_value() {
            if self.cycle.floating_pnl(price) >= target {
                return Some(ExitReason::ProfitTarget);
            }
        }

        if let Some(trailing) = &mut self.trailing {
            if trailing.observe(side, self.cycle.average_price, price) {
                return Some(ExitReason::Trailing);
            }
        }

        None
    }

    /// Resolve the profit objective to account currency
    fn profit_target_value(&mut self) -> Option<Decimal> {
        match self.config.profit_target {
            ProfitTarget::Currency(value) => Some(value),
            ProfitTarget::EquityPercent(percent) => match self.equity {
                Some(equity) => Some(equity * percent / Decimal::ONE_HUNDRED),
                None => {
                    if !self.equity_warned {
                        warn!(
                            "Equity unknown, percent profit target inactive for {}",
                            self.config.instrument.symbol
                        );
                        self.equity_warned = true;
                    }
                    None
                }
            },
        }
    }

    /// Submit the next averaging or reversal entry
    async fn submit_next_entry<G: OrderGateway>(
        &mut self,
        gateway: &G,
        price: Decimal,
    ) -> EngineResult<()> {
        let side = match self.cycle.side {
            Some(side) => side,
            None => return Ok(()),
        };

        let (order_side, volume) = match self.config.entry_mode {
            EntryMode::Averaging => (
                side.entry_order(),
                self.config.volume_for_level(self.cycle.level + 1),
            ),
            EntryMode::Reversal => {
                // Double the last executed entry so the net flips
                let volume = if self.cycle.last_entry_volume > Decimal::ZERO {
                    self.config
                        .instrument
                        .round_volume(self.cycle.last_entry_volume * Decimal::TWO)
                } else {
                    self.config.volume_for_level(1)
                };
                (side.closing_order(), volume)
            }
        };

        debug!(
            "Level {} trigger at {}: last_entry={}, distance={}",
            self.cycle.level + 1,
            price,
            self.cycle.last_entry_price,
            self.config.next_level_distance(self.cycle.level)
        );

        self.submit_entry(gateway, order_side, volume).await
    }

    /// Submit a market entry and move to `Pending`
    async fn submit_entry<G: OrderGateway>(
        &mut self,
        gateway: &G,
        side: OrderSide,
        volume: Decimal,
    ) -> EngineResult<()> {
        let symbol = self.config.instrument.symbol.clone();

        let order_id = with_retry(
            self.config.max_order_retries,
            self.config.retry_base_delay_ms,
            || gateway.submit_market(&symbol, side, volume),
        )
        .await?;

        self.pending = Some(PendingOrder::new(
            order_id,
            OrderIntent::Entry,
            side,
            volume,
        ));
        self.phase = CyclePhase::Pending;

        info!(
            "Entry order submitted: oid={}, side={}, volume={}",
            order_id,
            side.as_str(),
            volume
        );
        Ok(())
    }

    /// Submit a market close for the whole aggregate and move to `Closing`
    async fn submit_close<G: OrderGateway>(
        &mut self,
        gateway: &G,
        reason: ExitReason,
    ) -> EngineResult<()> {
        let side = match self.cycle.side {
            Some(side) => side,
            None => return Ok(()),
        };
        let volume = self.cycle.total_volume;
        let order_side = side.closing_order();
        let symbol = self.config.instrument.symbol.clone();

        info!(
            "Closing {} cycle ({}): volume={}, avg={}",
            side.as_str(),
            reason.as_str(),
            volume,
            self.cycle.average_price
        );

        let order_id = with_retry(
            self.config.max_order_retries,
            self.config.retry_base_delay_ms,
            || gateway.submit_market(&symbol, order_side, volume),
        )
        .await?;

        self.pending = Some(PendingOrder::new(
            order_id,
            OrderIntent::Close,
            order_side,
            volume,
        ));
        self.phase = CyclePhase::Closing;
        self.exit_reason = Some(reason);
        Ok(())
    }

    /// An exit condition fired while an entry is in flight; pull the
    /// entry first so the close can go out against a settled aggregate
    async fn cancel_pending_entry<G: OrderGateway>(
        &mut self,
        gateway: &G,
        reason: ExitReason,
    ) -> EngineResult<()> {
        if self.cancel_requested {
            return Ok(());
        }
        let order_id = match &self.pending {
            Some(pending) => pending.order_id,
            None => return Ok(()),
        };

        info!(
            "Exit condition ({}) with entry oid={} in flight, cancelling it",
            reason.as_str(),
            order_id
        );
        match gateway.cancel(&self.config.instrument.symbol, order_id).await {
            Ok(_) => self.cancel_requested = true,
            Err(e) => warn!("Failed to cancel entry oid={}: {}", order_id, e),
        }
        Ok(())
    }

    /// Cancel an entry that sat unfilled past the configured expiry
    async fn check_entry_expiry<G: OrderGateway>(&mut self, gateway: &G) -> EngineResult<()> {
        let expiry_secs = match self.config.pending_expiry_secs {
            Some(secs) => secs,
            None => return Ok(()),
        };
        if self.cancel_requested {
            return Ok(());
        }
        let (order_id, submitted_at_ms) = match &self.pending {
            Some(pending) if pending.intent == OrderIntent::Entry => {
                (pending.order_id, pending.submitted_at_ms)
            }
            _ => return Ok(()),
        };

        let now_ms = chrono::Utc::now().timestamp_millis() as u64;
        let age_ms = now_ms.saturating_sub(submitted_at_ms);
        if age_ms >= expiry_secs * 1000 {
            info!(
                "Entry oid={} unfilled after {}ms, cancelling",
                order_id, age_ms
            );
            match gateway.cancel(&self.config.instrument.symbol, order_id).await {
                Ok(_) => self.cancel_requested = true,
                Err(e) => warn!("Failed to cancel stale entry oid={}: {}", order_id, e),
            }
        }
        Ok(())
    }

    // ========================================================================
    // Order events
    // ========================================================================

    /// Apply a fill, reject, or cancel confirmation from the gateway
    pub async fn on_order_event<G: OrderGateway>(
        &mut self,
        gateway: &G,
        event: &OrderEvent,
    ) -> EngineResult<()> {
        match event {
            OrderEvent::Filled(fill) => self.on_fill(gateway, fill).await,
            OrderEvent::Rejected { order_id, reason } => {
                self.on_reject(gateway, *order_id, reason).await
            }
            OrderEvent::Cancelled { order_id } => {
                self.on_cancelled(*order_id);
                Ok(())
            }
        }
    }

    async fn on_fill<G: OrderGateway>(
        &mut self,
        gateway: &G,
        fill: &FillEvent,
    ) -> EngineResult<()> {
        // Replay protection: the gateway may deliver a fill twice
        if !self.processed_fills.insert(fill.txn_id) {
            debug!("Duplicate fill txn={} ignored", fill.txn_id);
            return Ok(());
        }

        if fill.volume <= Decimal::ZERO {
            warn!(
                "Dropping fill txn={} with non-positive volume {}",
                fill.txn_id, fill.volume
            );
            self.accounting_alerts += 1;
            return Ok(());
        }

        if let Some(index) = self
            .straddle
            .iter()
            .position(|leg| leg.order_id == fill.order_id)
        {
            return self.on_straddle_fill(gateway, index, fill).await;
        }

        let pending = match self.pending.as_mut() {
            Some(pending) if pending.order_id == fill.order_id => pending,
            _ => {
                warn!(
                    "Fill for unknown order: oid={}, txn={}, volume={}",
                    fill.order_id, fill.txn_id, fill.volume
                );
                self.accounting_alerts += 1;
                return Ok(());
            }
        };

        if fill.side != pending.side {
            warn!(
                "Fill side {:?} doesn't match order side {:?} for oid={}, dropping",
                fill.side, pending.side, fill.order_id
            );
            self.accounting_alerts += 1;
            return Ok(());
        }

        let first_fill = pending.filled == Decimal::ZERO;
        pending.filled += fill.volume;
        let intent = pending.intent;
        let complete = pending.is_complete();

        match intent {
            OrderIntent::Entry => {
                self.cycle
                    .apply_entry_fill(fill.side, fill.price, fill.volume, first_fill)?;
                info!(
                    "Entry fill: oid={}, txn={}, price={}, volume={}, level={}",
                    fill.order_id, fill.txn_id, fill.price, fill.volume, self.cycle.level
                );

                // The aggregate moved; the trailing stop re-arms against
                // the new average
                if let Some(trailing) = &mut self.trailing {
                    trailing.reset();
                }

                if complete {
                    self.conclude_entry();
                    if self.phase == CyclePhase::Armed {
                        info!(
                            "Level {} established: side={}, avg={}, volume={}",
                            self.cycle.level,
                            self.cycle.side.map(|s| s.as_str()).unwrap_or("-"),
                            self.cycle.average_price,
                            self.cycle.total_volume
                        );
                    }
                }
            }
            OrderIntent::Close => {
                let realized = self.cycle.apply_close_fill(fill.price, fill.volume)?;
                info!(
                    "Close fill: oid={}, price={}, volume={}, realized={}, remaining={}",
                    fill.order_id, fill.price, fill.volume, realized, self.cycle.total_volume
                );

                if self.cycle.is_flat() {
                    self.finalize_cycle();
                } else if complete {
                    warn!(
                        "Close order oid={} done but {} remains open, closing the rest",
                        fill.order_id, self.cycle.total_volume
                    );
                    self.pending = None;
                    let reason = self.exit_reason.unwrap_or(ExitReason::StopLoss);
                    self.submit_close(gateway, reason).await?;
                }
            }
        }

        Ok(())
    }

    /// A straddle leg executed; the first one picks the cycle side
    async fn on_straddle_fill<G: OrderGateway>(
        &mut self,
        gateway: &G,
        index: usize,
        fill: &FillEvent,
    ) -> EngineResult<()> {
        if fill.side != self.straddle[index].side {
            warn!(
                "Fill side {:?} doesn't match straddle leg {:?} for oid={}, dropping",
                fill.side, self.straddle[index].side, fill.order_id
            );
            self.accounting_alerts += 1;
            return Ok(());
        }

        if self.cycle.is_flat() && self.pending.is_none() {
            // Winning leg becomes the cycle entry order
            let mut leg = self.straddle.remove(index);
            leg.filled += fill.volume;
            let complete = leg.is_complete();

            info!(
                "Straddle resolved {}: oid={} filled {} at {}",
                Side::from_order(fill.side).as_str(),
                fill.order_id,
                fill.volume,
                fill.price
            );

            self.cycle
                .apply_entry_fill(fill.side, fill.price, fill.volume, true)?;
            self.pending = Some(leg);
            self.phase = CyclePhase::Pending;

            // Losing legs get pulled; they stay tracked until confirmed
            self.cancel_straddle(gateway).await;

            if complete {
                self.conclude_entry();
                if self.phase == CyclePhase::Armed {
                    info!(
                        "Level {} established: side={}, avg={}, volume={}",
                        self.cycle.level,
                        self.cycle.side.map(|s| s.as_str()).unwrap_or("-"),
                        self.cycle.average_price,
                        self.cycle.total_volume
                    );
                }
            }
        } else {
            // Sibling executed before its cancel landed; net it against
            // the cycle so the books stay true to the venue
            warn!(
                "Straddle leg oid={} filled after its sibling, netting {} against the cycle",
                fill.order_id, fill.volume
            );
            self.cycle
                .apply_entry_fill(fill.side, fill.price, fill.volume, false)?;
            self.straddle[index].filled += fill.volume;
            if self.straddle[index].is_complete() {
                self.straddle.remove(index);
            }
            if self.cycle.is_flat() {
                // Equal leg volumes: an exact netting ends the cycle
                info!("Sibling fill netted the cycle flat");
                self.finalize_cycle();
            }
        }

        Ok(())
    }

    async fn on_reject<G: OrderGateway>(
        &mut self,
        gateway: &G,
        order_id: u64,
        reason: &str,
    ) -> EngineResult<()> {
        if let Some(index) = self.straddle.iter().position(|leg| leg.order_id == order_id) {
            warn!("Straddle leg oid={} rejected: {}", order_id, reason);
            self.straddle.remove(index);
            // Pull the surviving legs; a fresh straddle goes out once
            // their cancels confirm
            self.cancel_straddle(gateway).await;
            return Ok(());
        }

        let intent = match &self.pending {
            Some(pending) if pending.order_id == order_id => pending.intent,
            _ => {
                warn!("Reject for unknown order: oid={}", order_id);
                return Ok(());
            }
        };

        match intent {
            OrderIntent::Entry => {
                error!("Entry order oid={} rejected: {}", order_id, reason);
                self.conclude_entry();
            }
            OrderIntent::Close => {
                error!(
                    "Close order oid={} rejected: {}, will resubmit",
                    order_id, reason
                );
                self.pending = None;
                self.cancel_requested = false;
                // Phase stays Closing; the next tick resubmits
            }
        }
        Ok(())
    }

    fn on_cancelled(&mut self, order_id: u64) {
        if let Some(index) = self.straddle.iter().position(|leg| leg.order_id == order_id) {
            debug!("Straddle leg oid={} cancelled", order_id);
            self.straddle.remove(index);
            return;
        }

        let (intent, filled, volume) = match &self.pending {
            Some(pending) if pending.order_id == order_id => {
                (pending.intent, pending.filled, pending.volume)
            }
            _ => {
                debug!("Cancel event for unknown order: oid={}", order_id);
                return;
            }
        };

        info!(
            "Order oid={} cancelled (filled {} of {})",
            order_id, filled, volume
        );
        match intent {
            OrderIntent::Entry => self.conclude_entry(),
            OrderIntent::Close => {
                // Unexpected external cancel; the next tick resubmits
                self.pending = None;
                self.cancel_requested = false;
            }
        }
    }

    /// Best-effort cancel of every tracked straddle leg
    async fn cancel_straddle<G: OrderGateway>(&self, gateway: &G) {
        for leg in &self.straddle {
            if let Err(e) = gateway
                .cancel(&self.config.instrument.symbol, leg.order_id)
                .await
            {
                warn!("Failed to cancel straddle leg oid={}: {}", leg.order_id, e);
            }
        }
    }

    // ========================================================================
    // Cycle lifecycle
    // ========================================================================

    /// Settle the in-flight entry order, however it ended
    ///
    /// Fully filled, partially filled then cancelled, and rejected
    /// entries all land here. Whatever volume executed is already in
    /// the aggregate; the cycle re-arms around it.
    fn conclude_entry(&mut self) {
        let executed = self
            .pending
            .take()
            .map(|pending| pending.filled)
            .unwrap_or_default();
        self.cancel_requested = false;

        if self.cycle.is_flat() {
            if self.cycle.traded_volume > Decimal::ZERO {
                // A netting entry took the book exactly to zero
                info!("Entry netted the cycle flat");
                self.finalize_cycle();
            } else {
                self.phase = CyclePhase::Flat;
            }
            return;
        }

        if executed > Decimal::ZERO {
            self.cycle.record_entry_volume(executed);
        }
        self.phase = CyclePhase::Armed;

        if self.cycle.level >= self.config.max_level && !self.exposure_limited {
            self.exposure_limited = true;
            warn!(
                "Level cap reached for {} at level {}, further entries suppressed",
                self.config.instrument.symbol, self.cycle.level
            );
        }
    }

    /// The cycle went back to flat; roll it into lifetime stats and reset
    fn finalize_cycle(&mut self) {
        let reason = self
            .exit_reason
            .map(|r| r.as_str())
            .unwrap_or("netted_flat");
        let realized = self.cycle.realized_pnl;
        let traded = self.cycle.traded_volume;

        self.stats.complete_cycle(realized, traded);
        info!(
            "Cycle complete ({}): realized={}, traded={}, lifetime_pnl={}, cycles={}",
            reason, realized, traded, self.stats.realized_pnl, self.stats.cycles_completed
        );

        self.cycle.reset();
        self.pending = None;
        self.cancel_requested = false;
        self.exposure_limited = false;
        self.exit_reason = None;
        self.equity_warned = false;
        // Replay protection spans one cycle; a stale duplicate arriving
        // after this lands in the unknown-order guard
        self.processed_fills.clear();
        if let Some(trailing) = &mut self.trailing {
            trailing.reset();
        }
        self.phase = CyclePhase::Flat;
    }

    /// Cancel resting orders and optionally flatten the position
    ///
    /// With `close_position` false the aggregate survives in the
    /// snapshot and resumes on the next start.
    pub async fn shutdown<G: OrderGateway>(
        &mut self,
        gateway: &G,
        close_position: bool,
    ) -> EngineResult<()> {
        info!("Shutting down engine for {}", self.config.instrument.symbol);

        match gateway.cancel_all(&self.config.instrument.symbol).await {
            Ok(count) => info!("Cancelled {} resting orders", count),
            Err(e) => warn!("Failed to cancel resting orders: {}", e),
        }
        self.straddle.clear();
        self.pending = None;
        self.cancel_requested = false;

        if close_position && !self.cycle.is_flat() {
            self.submit_close(gateway, ExitReason::Shutdown).await?;
        } else if self.phase.awaiting_order() {
            self.phase = if self.cycle.is_flat() {
                CyclePhase::Flat
            } else {
                CyclePhase::Armed
            };
        }
        Ok(())
    }
}
