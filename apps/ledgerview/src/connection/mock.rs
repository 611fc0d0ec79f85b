//! In-process scripted connection for tests and demos.
//!
//! Fetches answer from a per-list script queue; an unscripted fetch
//! auto-responds with synthetic rows under the list's configured
//! generation. `Hold` parks a fetch until the test resolves or fails it,
//! which is how out-of-order and stale-generation completions are staged.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::{Connection, ConnectionError, ListenerHub, RangeBatch, StateListener};
use crate::cache::Generation;
use crate::model::ListKind;
use crate::protocol::StateDelta;
use crate::pubsub::Subscription;

#[derive(Debug)]
pub enum ScriptedFetch {
    /// Auto-generated rows for the requested range under `generation`.
    Rows { generation: Generation },
    /// An explicit, possibly mismatched batch.
    Batch(RangeBatch),
    Fail(String),
    /// Park until [`MockConnection::resolve_held`] or
    /// [`MockConnection::fail_held`].
    Hold,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchLog {
    pub list: ListKind,
    pub start: u64,
    pub end: u64,
}

struct HeldFetch {
    list: ListKind,
    start: u64,
    end: u64,
    tx: oneshot::Sender<Result<RangeBatch, ConnectionError>>,
}

#[derive(Default)]
struct MockState {
    scripts: HashMap<ListKind, VecDeque<ScriptedFetch>>,
    generations: HashMap<ListKind, Generation>,
    requests: Vec<FetchLog>,
    skips: Vec<(ListKind, u64)>,
    held: VecDeque<HeldFetch>,
    closed: bool,
}

pub struct MockConnection {
    hub: ListenerHub,
    state: Mutex<MockState>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self {
            hub: ListenerHub::new(),
            state: Mutex::new(MockState::default()),
        }
    }

    /// Delivers a pushed snapshot to every subscriber, in order.
    pub fn push_state(&self, delta: StateDelta) {
        self.hub.push(&delta);
    }

    pub fn script(&self, list: ListKind, entry: ScriptedFetch) {
        self.state.lock().scripts.entry(list).or_default().push_back(entry);
    }

    /// Generation used for unscripted fetches of `list`.
    pub fn set_generation(&self, list: ListKind, generation: Generation) {
        self.state.lock().generations.insert(list, generation);
    }

    pub fn set_closed(&self, closed: bool) {
        self.state.lock().closed = closed;
    }

    pub fn requests(&self) -> Vec<FetchLog> {
        self.state.lock().requests.clone()
    }

    pub fn requests_for(&self, list: ListKind) -> Vec<FetchLog> {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|log| log.list == list)
            .cloned()
            .collect()
    }

    pub fn skips(&self) -> Vec<(ListKind, u64)> {
        self.state.lock().skips.clone()
    }

    pub fn held_count(&self) -> usize {
        self.state.lock().held.len()
    }

    pub fn held_ranges(&self) -> Vec<FetchLog> {
        self.state
            .lock()
            .held
            .iter()
            .map(|fetch| FetchLog {
                list: fetch.list,
                start: fetch.start,
                end: fetch.end,
            })
            .collect()
    }

    /// Completes the oldest held fetch with auto rows under `generation`.
    /// Returns false when nothing is held.
    pub fn resolve_held(&self, generation: Generation) -> bool {
        let held = self.state.lock().held.pop_front();
        match held {
            Some(fetch) => {
                let batch = auto_batch(generation, fetch.start, fetch.end);
                let _ = fetch.tx.send(Ok(batch));
                true
            }
            None => false,
        }
    }

    /// Fails the oldest held fetch with a transport error.
    pub fn fail_held(&self) -> bool {
        let held = self.state.lock().held.pop_front();
        match held {
            Some(fetch) => {
                let _ = fetch.tx.send(Err(ConnectionError::Transport(
                    "scripted failure".to_string(),
                )));
                true
            }
            None => false,
        }
    }
}

impl Default for MockConnection {
    fn default() -> Self {
        Self::new()
    }
}

pub fn auto_rows(start: u64, end: u64) -> Vec<serde_json::Value> {
    (start..end)
        .map(|index| serde_json::json!({ "index": index, "formatted": format!("row-{index}") }))
        .collect()
}

fn auto_batch(generation: Generation, start: u64, end: u64) -> RangeBatch {
    RangeBatch {
        generation,
        start,
        rows: auto_rows(start, end),
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn subscribe(&self, listener: StateListener) -> Subscription {
        self.hub.add(listener)
    }

    fn unsubscribe(&self, handle: Subscription) -> bool {
        self.hub.remove(handle)
    }

    async fn fetch_range(
        &self,
        list: ListKind,
        start: u64,
        end: u64,
    ) -> Result<RangeBatch, ConnectionError> {
        let pending = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(ConnectionError::Closed);
            }
            state.requests.push(FetchLog { list, start, end });
            match state.scripts.get_mut(&list).and_then(VecDeque::pop_front) {
                None => {
                    let generation = state.generations.get(&list).copied().unwrap_or(0);
                    return Ok(auto_batch(generation, start, end));
                }
                Some(ScriptedFetch::Rows { generation }) => {
                    return Ok(auto_batch(generation, start, end));
                }
                Some(ScriptedFetch::Batch(batch)) => return Ok(batch),
                Some(ScriptedFetch::Fail(message)) => {
                    return Err(ConnectionError::Transport(message));
                }
                Some(ScriptedFetch::Hold) => {
                    let (tx, rx) = oneshot::channel();
                    state.held.push_back(HeldFetch {
                        list,
                        start,
                        end,
                        tx,
                    });
                    rx
                }
            }
        };
        pending
            .await
            .unwrap_or(Err(ConnectionError::RequestDropped))
    }

    async fn skip_to(&self, list: ListKind, index: u64) -> Result<(), ConnectionError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(ConnectionError::Closed);
        }
        state.skips.push((list, index));
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unscripted_fetch_auto_responds() {
        let conn = MockConnection::new();
        conn.set_generation(ListKind::Pending, 3);
        let batch = conn.fetch_range(ListKind::Pending, 2, 5).await.unwrap();
        assert_eq!(batch.generation, 3);
        assert_eq!(batch.start, 2);
        assert_eq!(batch.rows.len(), 3);
        assert_eq!(conn.requests().len(), 1);
    }

    #[tokio::test]
    async fn held_fetch_resolves_later() {
        let conn = std::sync::Arc::new(MockConnection::new());
        conn.script(ListKind::Errors, ScriptedFetch::Hold);

        let fetcher = conn.clone();
        let task =
            tokio::spawn(async move { fetcher.fetch_range(ListKind::Errors, 0, 4).await });

        while conn.held_count() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(conn.resolve_held(7));
        let batch = task.await.unwrap().unwrap();
        assert_eq!(batch.generation, 7);
        assert_eq!(batch.rows.len(), 4);
    }

    #[tokio::test]
    async fn closed_fails_fast() {
        let conn = MockConnection::new();
        conn.set_closed(true);
        let err = conn.fetch_range(ListKind::Pending, 0, 1).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Closed));
        let err = conn.skip_to(ListKind::Pending, 0).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Closed));
    }
}
