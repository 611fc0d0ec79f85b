//! The live channel to the reconciliation backend.
//!
//! [`Connection`] is the only surface the sync core needs from the
//! transport: ordered state pushes, range fetches, and an index
//! repositioning request. Implementations must deliver state snapshots to
//! listeners in arrival order; fetch responses carry the generation they
//! were computed under and may complete out of request order.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::cache::Generation;
use crate::model::ListKind;
use crate::protocol::{StateDelta, WireError};
use crate::pubsub::{Subscribers, Subscription};

pub mod mock;
pub mod websocket;

pub use mock::MockConnection;
pub use websocket::WebSocketConnection;

/// Rows returned for one half-open index range, tagged with the generation
/// they were computed under. Rows are raw JSON; the owning list decodes.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeBatch {
    pub generation: Generation,
    pub start: u64,
    pub rows: Vec<serde_json::Value>,
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection closed")]
    Closed,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("protocol error: {0}")]
    Protocol(#[from] WireError),
    #[error("request dropped before completion")]
    RequestDropped,
}

pub type StateListener = Box<dyn Fn(&StateDelta) + Send + Sync>;

#[async_trait]
pub trait Connection: Send + Sync {
    /// Registers a listener for pushed state snapshots. Snapshots are
    /// delivered in arrival order and never reordered relative to each
    /// other. The caller owns the handle and must unsubscribe at teardown.
    fn subscribe(&self, listener: StateListener) -> Subscription;

    fn unsubscribe(&self, handle: Subscription) -> bool;

    /// Fetches rows for `[start, end)` of `list`. Fails fast with
    /// [`ConnectionError::Closed`] while the connection is down.
    async fn fetch_range(
        &self,
        list: ListKind,
        start: u64,
        end: u64,
    ) -> Result<RangeBatch, ConnectionError>;

    /// Asks the server to reposition its "current index" for `list` (the
    /// pending list uses this to drive candidate computation).
    async fn skip_to(&self, list: ListKind, index: u64) -> Result<(), ConnectionError>;

    fn is_closed(&self) -> bool;
}

/// Shared listener bookkeeping for connection implementations.
pub(crate) struct ListenerHub {
    subscribers: Subscribers<StateDelta>,
}

impl ListenerHub {
    pub(crate) fn new() -> Self {
        Self {
            subscribers: Subscribers::new(),
        }
    }

    pub(crate) fn add(&self, listener: StateListener) -> Subscription {
        self.subscribers.subscribe(listener)
    }

    pub(crate) fn remove(&self, handle: Subscription) -> bool {
        self.subscribers.unsubscribe(handle)
    }

    pub(crate) fn push(&self, delta: &StateDelta) {
        self.subscribers.emit(delta);
    }
}

impl std::fmt::Debug for ListenerHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHub")
            .field("listeners", &self.subscribers.len())
            .finish()
    }
}

/// Convenience alias used wherever the core hands a connection around.
pub type SharedConnection = Arc<dyn Connection>;
