//! Gateway abstraction for order routing - enables mocking for tests
//!
//! The engine never talks to a venue directly. Orders go out through
//! [`OrderGateway`], market data comes in through [`PriceFeed`], and fill
//! confirmations come back through [`OrderEventFeed`]. Submission is
//! asynchronous: a successful submit only returns the order id, and the
//! resulting fills, rejections and cancellations arrive as events.

use std::time::Duration;

use async_trait::async_trait;
use log::warn;
use rust_decimal::Decimal;
use tokio::sync::mpsc;

use super::errors::{EngineError, EngineResult};
use super::types::{OrderEvent, OrderSide, PriceTick};

/// Order routing operations - can be mocked for testing
#[async_trait]
pub trait OrderGateway: Send + Sync {
    /// Submit a market order; fills arrive later via the event feed
    async fn submit_market(
        &self,
        instrument: &str,
        side: OrderSide,
        volume: Decimal,
    ) -> EngineResult<u64>;

    /// Submit a resting stop order that triggers at the given price
    async fn submit_stop(
        &self,
        instrument: &str,
        side: OrderSide,
        volume: Decimal,
        trigger: Decimal,
    ) -> EngineResult<u64>;

    /// Cancel an order by id; Ok(false) when it was already gone
    async fn cancel(&self, instrument: &str, order_id: u64) -> EngineResult<bool>;

    /// Cancel all resting orders for an instrument
    async fn cancel_all(&self, instrument: &str) -> EngineResult<u32>;

    /// Current account equity in account currency
    async fn account_equity(&self) -> EngineResult<Decimal>;
}

/// Market data subscription
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Subscribe to price updates for an instrument
    async fn subscribe(
        &mut self,
        instrument: &str,
    ) -> EngineResult<mpsc::UnboundedReceiver<PriceTick>>;

    /// Unsubscribe from price updates
    async fn unsubscribe(&mut self, instrument: &str) -> EngineResult<()>;
}

/// Order lifecycle event subscription
#[async_trait]
pub trait OrderEventFeed: Send + Sync {
    /// Subscribe to fill, reject, and cancel confirmations
    async fn subscribe(&mut self) -> EngineResult<mpsc::UnboundedReceiver<OrderEvent>>;

    /// Unsubscribe from order events
    async fn unsubscribe(&mut self) -> EngineResult<()>;
}

/// Execute a gateway call with exponential backoff retry
///
/// Delay doubles per attempt starting from `base_delay_ms`. Transient
/// gateway errors are retried; exhaustion maps to
/// [`EngineError::SubmissionFailed`].
pub async fn with_retry<T, F, Fut>(
    max_retries: u32,
    base_delay_ms: u64,
    operation: F,
) -> EngineResult<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = EngineResult<T>>,
{
    let mut attempts = 0;
    let mut last_error = EngineError::Gateway("Unknown error".into());

    while attempts < max_retries {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                attempts += 1;
                last_error = e;

                if attempts < max_retries {
                    let delay = base_delay_ms * 2u64.pow(attempts - 1);
                    warn!(
                        "Gateway call failed (attempt {}/{}), retrying in {}ms: {}",
                        attempts, max_retries, delay, last_error
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
            }
        }
    }

    Err(EngineError::SubmissionFailed {
        attempts: max_retries,
        reason: last_error.to_string(),
    })
}

// ============================================================================
// In-Process Channel Feeds
// ============================================================================

/// Price feed backed by an in-process channel
///
/// The producing side holds the sender; the runner subscribes once and
/// takes the receiver. Used by the simulator and by tests.
pub struct ChannelPriceFeed {
    rx: Option<mpsc::UnboundedReceiver<PriceTick>>,
}

impl ChannelPriceFeed {
    /// Create the feed and the sender that drives it
    pub fn new() -> (mpsc::UnboundedSender<PriceTick>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx: Some(rx) })
    }
}

#[async_trait]
impl PriceFeed for ChannelPriceFeed {
    async fn subscribe(
        &mut self,
        _instrument: &str,
    ) -> EngineResult<mpsc::UnboundedReceiver<PriceTick>> {
        self.rx
            .take()
            .ok_or_else(|| EngineError::Gateway("price feed already subscribed".into()))
    }

    async fn unsubscribe(&mut self, _instrument: &str) -> EngineResult<()> {
        Ok(())
    }
}

/// Order event feed backed by an in-process channel
pub struct ChannelOrderEventFeed {
    rx: Option<mpsc::UnboundedReceiver<OrderEvent>>,
}

impl ChannelOrderEventFeed {
    /// Create the feed and the sender that drives it
    pub fn new() -> (mpsc::UnboundedSender<OrderEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx: Some(rx) })
    }
}

#[async_trait]
impl OrderEventFeed for ChannelOrderEventFeed {
    async fn subscribe(&mut self) -> EngineResult<mpsc::UnboundedReceiver<OrderEvent>> {
        self.rx
            .take()
            .ok_or_else(|| EngineError::Gateway("order event feed already subscribed".into()))
    }

    async fn unsubscribe(&mut self) -> EngineResult<()> {
        Ok(())
    }
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================

/// Mock gateway for testing the engine without a venue connection.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    /// One order recorded by the mock gateway
    #[derive(Debug, Clone, PartialEq)]
    pub struct RecordedOrder {
        pub order_id: u64,
        pub instrument: String,
        pub side: OrderSide,
        pub volume: Decimal,
        /// Trigger price for stop orders, None for market orders
        pub trigger: Option<Decimal>,
    }

    /// Mock gateway recording every call
    ///
    /// Clones share the same order book, so a test can keep a handle
    /// after moving the gateway into a runner.
    #[derive(Clone)]
    pub struct MockGateway {
        pub orders: Arc<Mutex<Vec<RecordedOrder>>>,
        pub cancelled: Arc<Mutex<Vec<u64>>>,
        pub equity: Arc<Mutex<Decimal>>,
        next_oid: Arc<AtomicU64>,
        pub should_fail: Arc<Mutex<bool>>,
    }

    impl MockGateway {
        pub fn new() -> Self {
            Self {
                orders: Arc::new(Mutex::new(Vec::new())),
                cancelled: Arc::new(Mutex::new(Vec::new())),
                equity: Arc::new(Mutex::new(Decimal::ZERO)),
                next_oid: Arc::new(AtomicU64::new(1)),
                should_fail: Arc::new(Mutex::new(false)),
            }
        }

        pub async fn set_equity(&self, equity: Decimal) {
            *self.equity.lock().await = equity;
        }

        pub async fn set_should_fail(&self, fail: bool) {
            *self.should_fail.lock().await = fail;
        }

        pub async fn order_count(&self) -> usize {
            self.orders.lock().await.len()
        }

        pub async fn last_order(&self) -> Option<RecordedOrder> {
            self.orders.lock().await.last().cloned()
        }

        async fn record(
            &self,
            instrument: &str,
            side: OrderSide,
            volume: Decimal,
            trigger: Option<Decimal>,
        ) -> EngineResult<u64> {
            if *self.should_fail.lock().await {
                return Err(EngineError::Gateway("Mock failure".into()));
            }

            let order_id = self.next_oid.fetch_add(1, Ordering::SeqCst);
            self.orders.lock().await.push(RecordedOrder {
                order_id,
                instrument: instrument.to_string(),
                side,
                volume,
                trigger,
            });
            Ok(order_id)
        }
    }

    impl Default for MockGateway {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl OrderGateway for MockGateway {
        async fn submit_market(
            &self,
            instrument: &str,
            side: OrderSide,
            volume: Decimal,
        ) -> EngineResult<u64> {
            self.record(instrument, side, volume, None).await
        }

        async fn submit_stop(
            &self,
            instrument: &str,
            side: OrderSide,
            volume: Decimal,
            trigger: Decimal,
        ) -> EngineResult<u64> {
            self.record(instrument, side, volume, Some(trigger)).await
        }

        async fn cancel(&self, _instrument: &str, order_id: u64) -> EngineResult<bool> {
            self.cancelled.lock().await.push(order_id);
            Ok(true)
        }

        async fn cancel_all(&self, _instrument: &str) -> EngineResult<u32> {
            let mut orders = self.orders.lock().await;
            let count = orders.len() as u32;
            orders.clear();
            Ok(count)
        }

        async fn account_equity(&self) -> EngineResult<Decimal> {
            Ok(*self.equity.lock().await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_with_retry_recovers_from_transient_failure() {
        let calls = AtomicU32::new(0);

        let result = with_retry(3, 1, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(EngineError::Gateway("transient".into()))
                } else {
                    Ok(42u64)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_exhausts_attempts() {
        let result: EngineResult<u64> = with_retry(2, 1, || async {
            Err(EngineError::Gateway("down".into()))
        })
        .await;

        match result {
            Err(EngineError::SubmissionFailed { attempts, .. }) => assert_eq!(attempts, 2),
            other => panic!("expected SubmissionFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_channel_feed_single_subscription() {
        let (_tx, mut feed) = ChannelPriceFeed::new();
        assert!(feed.subscribe("EURUSD").await.is_ok());
        assert!(feed.subscribe("EURUSD").await.is_err());
    }
}
