//! Event bus facade.
//!
//! The core never talks to a websocket hub directly; it calls
//! [`EventBus::emit`] with a scope, a typed event, and a JSON payload, and
//! the injected implementation handles fan-out.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The audience an event is emitted to.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum EventScope {
    /// Broadcast to every connected client (ticks, candles, published signals).
    Global,
    /// Scoped to a single user (portfolio updates).
    User(Uuid),
    /// Scoped to a single user-broker (intents, orders, trades).
    UserBroker(Uuid),
}

/// The full vocabulary of events the core emits, per §6 of the spec.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum EventType {
    SignalGenerated,
    SignalDelivered,
    SignalExpired,
    SignalCancelled,
    ExitSignalDetected,
    ExitSignalConfirmed,
    ExitSignalCancelled,
    ExitIntentCreated,
    ExitIntentApproved,
    ExitIntentRejected,
    ExitIntentCooldownRejected,
    TradeCreated,
    TradeClosed,
    CandleClosed,
}

/// A JSON event payload. Concrete producers build this with `serde_json::json!`
/// or `serde_json::to_value`.
pub type EventPayload = Value;

/// Global / user-scoped / user-broker-scoped emission facade.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn emit(&self, scope: EventScope, event: EventType, payload: EventPayload, source: &str);
}

/// No-op bus, useful for unit tests that don't assert on emitted events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEventBus;

#[async_trait]
impl EventBus for NullEventBus {
    async fn emit(&self, _scope: EventScope, _event: EventType, _payload: EventPayload, _source: &str) {}
}
