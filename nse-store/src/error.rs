//! Store-facing error taxonomy.

use thiserror::Error;

/// Errors surfaced by the `Store`/`BrokerExecutor` boundary.
///
/// `AlreadyHandled` is not really an error: it is the structured form of an
/// idempotent conflict (dedupe unique index, episode cooldown) that callers
/// are required to treat as success, per the spec's error-handling design.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum StoreError {
    /// A unique-index or cooldown constraint was already satisfied by a
    /// prior call; the caller should proceed as if this call had succeeded.
    #[error("already handled: {0}")]
    AlreadyHandled(String),

    /// The re-arm cooldown for `(trade_id, reason)` has not yet elapsed.
    #[error("exit cooldown active")]
    ExitCooldownActive,

    /// The referenced record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A transient I/O failure talking to the backing database or broker.
    #[error("transient I/O failure: {0}")]
    Transient(String),
}
