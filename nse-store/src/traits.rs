//! Broker transport boundary.

use async_trait::async_trait;
use nse_core::model::{Tick, TradeIntent};

use crate::error::StoreError;

/// A live (or replayed) market-data broker. Monotonicity of `Tick` delivery
/// is **not** required: the core tolerates reordering by timestamp (§6).
#[async_trait]
pub trait BrokerFeed: Send + Sync {
    /// Subscribes a new listener; every tick the feed receives after this
    /// call is delivered to the returned receiver.
    fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Tick>;
}

/// Order placement. Must be idempotent on `intent.intent_id` (P11): calling
/// `place_order` twice with the same intent returns the same order id
/// without placing a second order.
#[async_trait]
pub trait BrokerExecutor: Send + Sync {
    async fn place_order(&self, intent: &TradeIntent) -> Result<String, StoreError>;
}
