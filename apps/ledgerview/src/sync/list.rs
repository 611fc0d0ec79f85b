//! Per-list orchestration: cache, fetch scheduler, and scroll state behind
//! one subscribable object.
//!
//! All mutation happens on the owning event task; fetches run on spawned
//! tasks and report back through an internal channel, so the only
//! synchronization is the generation fence: every completion is re-checked
//! against the current generation (and request id) before it may touch the
//! cache. Dropping the state drops the channel receiver, which is how
//! in-flight fetches are abandoned — their eventual completions have
//! nowhere to land.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::scroll::ScrollState;
use super::{FetchScheduler, PlannedFetch, RetryPolicy, Window};
use crate::cache::{Generation, GenerationAndCount, ListCache};
use crate::connection::{Connection, ConnectionError, RangeBatch};
use crate::model::ListKind;
use crate::pubsub::{Subscribers, Subscription};

#[derive(Debug, Clone)]
pub struct ListSyncConfig {
    pub viewport: u64,
    pub prefetch_margin: u64,
    pub retry: RetryPolicy,
}

impl Default for ListSyncConfig {
    fn default() -> Self {
        Self {
            viewport: 20,
            prefetch_margin: 20,
            retry: RetryPolicy::default(),
        }
    }
}

/// Notifications delivered to list subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListEvent {
    /// The list identity changed; every previously observed row is invalid.
    Reset { generation: Generation, count: u64 },
    /// Same generation, new count (e.g. an append).
    CountChanged { count: u64 },
    /// Rows for `range` are now cached under `generation`.
    RowsAvailable { generation: Generation, range: Window },
}

enum TaskOutcome {
    Fetch {
        id: u64,
        result: Result<RangeBatch, ConnectionError>,
    },
    Skip {
        index: u64,
        result: Result<(), ConnectionError>,
    },
}

#[derive(Debug, Clone, Copy)]
struct SkipRetry {
    index: u64,
    due: Instant,
}

pub struct ListSyncState<T> {
    kind: ListKind,
    connection: Arc<dyn Connection>,
    cache: ListCache<T>,
    scheduler: FetchScheduler,
    scroll: ScrollState,
    count: u64,
    config: ListSyncConfig,
    subscribers: Subscribers<ListEvent>,
    outcomes_tx: mpsc::UnboundedSender<TaskOutcome>,
    outcomes_rx: mpsc::UnboundedReceiver<TaskOutcome>,
    wake: Arc<Notify>,
    last_skip: Option<u64>,
    skip_attempts: u32,
    skip_retry: Option<SkipRetry>,
}

impl<T: DeserializeOwned + Send + 'static> ListSyncState<T> {
    pub fn new(
        kind: ListKind,
        connection: Arc<dyn Connection>,
        config: ListSyncConfig,
        wake: Arc<Notify>,
    ) -> Self {
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        Self {
            kind,
            connection,
            cache: ListCache::new(),
            scheduler: FetchScheduler::new(config.retry.clone()),
            scroll: ScrollState::new(config.viewport),
            count: 0,
            config,
            subscribers: Subscribers::new(),
            outcomes_tx,
            outcomes_rx,
            wake,
            last_skip: None,
            skip_attempts: 0,
            skip_retry: None,
        }
    }

    pub fn kind(&self) -> ListKind {
        self.kind
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn generation(&self) -> Option<Generation> {
        self.cache.generation()
    }

    pub fn row(&self, index: u64) -> Option<&T> {
        self.cache.get(index)
    }

    pub fn visible_range(&self) -> Window {
        self.scroll.visible_range()
    }

    /// Cached rows for the visible range; `None` marks a row that has not
    /// arrived yet.
    pub fn visible_rows(&self) -> Vec<Option<&T>> {
        let range = self.scroll.visible_range();
        (range.start..range.end).map(|i| self.cache.get(i)).collect()
    }

    pub fn subscribe(&self, listener: Box<dyn Fn(&ListEvent) + Send + Sync>) -> Subscription {
        self.subscribers.subscribe(listener)
    }

    pub fn unsubscribe(&self, handle: Subscription) -> bool {
        self.subscribers.unsubscribe(handle)
    }

    /// Applies a pushed `(generation, count)` for this list.
    pub fn handle_generation_and_count(&mut self, gc: GenerationAndCount) {
        let generation = gc.generation();
        let count = gc.count();
        if self.cache.generation() != Some(generation) {
            self.cache.invalidate_all(generation);
            self.scheduler.clear();
            self.count = count;
            self.scroll.set_count(count);
            debug!(
                target: "sync::list",
                list = %self.kind,
                generation,
                count,
                "generation reset"
            );
            self.subscribers.emit(&ListEvent::Reset { generation, count });
        } else if self.count != count {
            self.count = count;
            self.cache.truncate(count);
            self.scroll.set_count(count);
            trace!(target: "sync::list", list = %self.kind, count, "count changed");
            self.subscribers.emit(&ListEvent::CountChanged { count });
        }
        self.pump();
    }

    /// Consumer-reported viewport change.
    pub fn on_window_change(&mut self, window: Window) {
        self.scroll.on_window_change(window);
        self.pump();
    }

    pub fn scroll_to_index(&mut self, index: u64) {
        self.scroll.scroll_to_index(index);
        self.pump();
    }

    pub fn pending_jump(&self) -> Option<u64> {
        self.scroll.pending_jump()
    }

    /// Forwards the index to the server (which repositions its "current
    /// index" for this list) and scrolls to it locally.
    pub fn skip_to(&mut self, index: u64) {
        self.last_skip = Some(index);
        self.skip_attempts = 0;
        self.skip_retry = None;
        self.spawn_skip(index);
        self.scroll_to_index(index);
    }

    /// Drains completed work, issues whatever the current window is missing,
    /// and returns the earliest retry deadline, if any. Idempotent; the
    /// owner calls it whenever the wake handle fires or a deadline passes.
    pub fn pump(&mut self) -> Option<Instant> {
        while let Ok(outcome) = self.outcomes_rx.try_recv() {
            self.apply_outcome(outcome);
        }

        if self.connection.is_closed() {
            // No new requests while closed; the post-reconnect snapshot
            // re-evaluates the window and resumes fetching.
            return None;
        }

        let now = Instant::now();
        let window = self.scroll.window_with_margin(self.config.prefetch_margin);
        let planned = {
            let cache = &self.cache;
            self.scheduler.plan(window, |index| cache.contains(index), now)
        };
        for fetch in planned {
            trace!(
                target: "sync::fetch",
                list = %self.kind,
                start = fetch.range.start,
                end = fetch.range.end,
                "requesting range"
            );
            self.spawn_fetch(fetch);
        }

        if let Some(retry) = self.skip_retry {
            if self.last_skip != Some(retry.index) {
                self.skip_retry = None;
            } else if retry.due <= now {
                self.skip_retry = None;
                self.spawn_skip(retry.index);
            }
        }

        let mut deadline = self.scheduler.next_deadline();
        if let Some(retry) = self.skip_retry {
            deadline = Some(deadline.map_or(retry.due, |d| d.min(retry.due)));
        }
        deadline
    }

    fn spawn_fetch(&self, fetch: PlannedFetch) {
        let connection = Arc::clone(&self.connection);
        let tx = self.outcomes_tx.clone();
        let wake = Arc::clone(&self.wake);
        let kind = self.kind;
        tokio::spawn(async move {
            let result = connection
                .fetch_range(kind, fetch.range.start, fetch.range.end)
                .await;
            if tx.send(TaskOutcome::Fetch { id: fetch.id, result }).is_ok() {
                wake.notify_one();
            }
        });
    }

    fn spawn_skip(&self, index: u64) {
        let connection = Arc::clone(&self.connection);
        let tx = self.outcomes_tx.clone();
        let wake = Arc::clone(&self.wake);
        let kind = self.kind;
        tokio::spawn(async move {
            let result = connection.skip_to(kind, index).await;
            if tx.send(TaskOutcome::Skip { index, result }).is_ok() {
                wake.notify_one();
            }
        });
    }

    fn apply_outcome(&mut self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Fetch { id, result } => match result {
                Ok(batch) => self.apply_batch(id, batch),
                Err(err) => {
                    if self.scheduler.resolve_failed(id, Instant::now()) {
                        debug!(
                            target: "sync::fetch",
                            list = %self.kind,
                            error = %err,
                            "range fetch failed; retry scheduled"
                        );
                    }
                }
            },
            TaskOutcome::Skip { index, result } => match result {
                Ok(()) => {
                    if self.last_skip == Some(index) {
                        self.skip_attempts = 0;
                    }
                }
                Err(err) => {
                    if self.last_skip == Some(index) {
                        let attempt = self.skip_attempts;
                        self.skip_attempts += 1;
                        self.skip_retry = Some(SkipRetry {
                            index,
                            due: Instant::now() + self.config.retry.delay_for(attempt),
                        });
                        debug!(
                            target: "sync::list",
                            list = %self.kind,
                            index,
                            error = %err,
                            "skip failed; retry scheduled"
                        );
                    }
                }
            },
        }
    }

    fn apply_batch(&mut self, id: u64, batch: RangeBatch) {
        if self.scheduler.resolve(id).is_none() {
            trace!(target: "sync::fetch", list = %self.kind, id, "completion for cleared request discarded");
            return;
        }
        if self.cache.generation() != Some(batch.generation) {
            trace!(
                target: "sync::fetch",
                list = %self.kind,
                response = batch.generation,
                "stale generation discarded"
            );
            return;
        }

        let mut rows = Vec::with_capacity(batch.rows.len());
        for value in batch.rows {
            match serde_json::from_value::<T>(value) {
                Ok(row) => rows.push(row),
                Err(err) => {
                    warn!(
                        target: "sync::fetch",
                        list = %self.kind,
                        error = %err,
                        "row decode failed; dropping batch"
                    );
                    return;
                }
            }
        }

        let start = batch.start;
        let end = start.saturating_add(rows.len() as u64);
        for (offset, row) in rows.into_iter().enumerate() {
            let index = start + offset as u64;
            // The cache never holds indices at or past the pushed count.
            if index < self.count {
                self.cache.put(index, row);
            }
        }

        if let Some(target) = self.scroll.jump_target() {
            if self.cache.contains(target) {
                self.scroll.complete_jump();
            }
        }

        self.subscribers.emit(&ListEvent::RowsAvailable {
            generation: batch.generation,
            range: Window::new(start, end.min(self.count)),
        });
    }
}
