//! Top-level client: one connection, four synchronized lists, and the
//! shared selection stores.
//!
//! A single event-processing task multiplexes pushed snapshots, fetch
//! completions, and retry deadlines; every cache mutation happens here, so
//! generation fencing is the only synchronization the lists need. The
//! stores are constructed once and handed out by reference.

use std::sync::Arc;

use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;
use tracing::debug;

use crate::config::Config;
use crate::connection::Connection;
use crate::model::{InvalidReference, JournalError, ListKind, PendingEntry, UnclearedPosting};
use crate::protocol::StateDelta;
use crate::pubsub::Subscription;
use crate::state::stores::{CandidateSelection, PendingHighlight};
use crate::state::{DeltaOutcome, SessionState};
use crate::sync::ListSyncState;

/// What one call to [`LedgerviewClient::step`] did.
#[derive(Debug)]
pub enum Step {
    /// A pushed snapshot was applied.
    Delta(DeltaOutcome),
    /// Background work progressed (completions drained or retries fired).
    Progress,
    /// The connection dropped its push channel; no more snapshots will
    /// arrive.
    Disconnected,
}

pub struct LedgerviewClient {
    connection: Arc<dyn Connection>,
    session: SessionState,
    pending: ListSyncState<PendingEntry>,
    uncleared: ListSyncState<UnclearedPosting>,
    invalid: ListSyncState<InvalidReference>,
    errors: ListSyncState<JournalError>,
    pending_highlight: Arc<PendingHighlight>,
    candidate_selection: Arc<CandidateSelection>,
    delta_rx: mpsc::UnboundedReceiver<StateDelta>,
    listener: Subscription,
    wake: Arc<Notify>,
}

impl LedgerviewClient {
    pub fn new(connection: Arc<dyn Connection>, config: &Config) -> Self {
        let wake = Arc::new(Notify::new());
        let (delta_tx, delta_rx) = mpsc::unbounded_channel();
        let listener = connection.subscribe(Box::new(move |delta: &StateDelta| {
            let _ = delta_tx.send(delta.clone());
        }));

        let list_config = config.list_sync();
        let pending = ListSyncState::new(
            ListKind::Pending,
            Arc::clone(&connection),
            list_config.clone(),
            Arc::clone(&wake),
        );
        let uncleared = ListSyncState::new(
            ListKind::Uncleared,
            Arc::clone(&connection),
            list_config.clone(),
            Arc::clone(&wake),
        );
        let invalid = ListSyncState::new(
            ListKind::Invalid,
            Arc::clone(&connection),
            list_config.clone(),
            Arc::clone(&wake),
        );
        let errors = ListSyncState::new(
            ListKind::Errors,
            Arc::clone(&connection),
            list_config,
            Arc::clone(&wake),
        );

        Self {
            pending,
            uncleared,
            invalid,
            errors,
            connection,
            session: SessionState::new(),
            pending_highlight: Arc::new(PendingHighlight::new()),
            candidate_selection: Arc::new(CandidateSelection::new()),
            delta_rx,
            listener,
            wake,
        }
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn pending(&self) -> &ListSyncState<PendingEntry> {
        &self.pending
    }

    pub fn pending_mut(&mut self) -> &mut ListSyncState<PendingEntry> {
        &mut self.pending
    }

    pub fn uncleared(&self) -> &ListSyncState<UnclearedPosting> {
        &self.uncleared
    }

    pub fn uncleared_mut(&mut self) -> &mut ListSyncState<UnclearedPosting> {
        &mut self.uncleared
    }

    pub fn invalid(&self) -> &ListSyncState<InvalidReference> {
        &self.invalid
    }

    pub fn invalid_mut(&mut self) -> &mut ListSyncState<InvalidReference> {
        &mut self.invalid
    }

    pub fn errors(&self) -> &ListSyncState<JournalError> {
        &self.errors
    }

    pub fn errors_mut(&mut self) -> &mut ListSyncState<JournalError> {
        &mut self.errors
    }

    pub fn pending_highlight(&self) -> Arc<PendingHighlight> {
        Arc::clone(&self.pending_highlight)
    }

    pub fn candidate_selection(&self) -> Arc<CandidateSelection> {
        Arc::clone(&self.candidate_selection)
    }

    /// Records the highlight and scrolls the pending list to it. The store
    /// itself never scrolls; this is the consumer side of that contract.
    pub fn highlight_pending(&mut self, index: u64) {
        self.pending_highlight.set(index);
        self.pending.scroll_to_index(index);
    }

    /// Selects a pending entry: the server repositions its current index
    /// and recomputes candidates for it.
    pub fn select_pending(&mut self, index: u64) {
        self.pending.skip_to(index);
    }

    /// Selects a candidate row under the currently fenced generation.
    /// Returns false when no candidates are renderable.
    pub fn select_candidate(&self, row: u64) -> bool {
        match self.session.candidates() {
            Some(view) => {
                self.candidate_selection.select(view.generation, row);
                true
            }
            None => false,
        }
    }

    /// Applies one pushed snapshot and routes its consequences.
    pub fn handle_delta(&mut self, delta: &StateDelta) -> DeltaOutcome {
        let outcome = self.session.apply_delta(delta);
        for (kind, gc) in &outcome.lists {
            match kind {
                ListKind::Pending => self.pending.handle_generation_and_count(*gc),
                ListKind::Uncleared => self.uncleared.handle_generation_and_count(*gc),
                ListKind::Invalid => self.invalid.handle_generation_and_count(*gc),
                ListKind::Errors => self.errors.handle_generation_and_count(*gc),
            }
        }
        if let Some(generation) = outcome.candidates_generation_changed {
            self.candidate_selection.observe_generation(generation);
        }
        if let Some(index) = outcome.pending_jump {
            self.pending.scroll_to_index(index);
        }
        if outcome.reopened {
            debug!(target: "client::state", "connection reopened; re-evaluating windows");
            self.pump_all();
        }
        outcome
    }

    /// Pumps every list and returns the earliest retry deadline.
    pub fn pump_all(&mut self) -> Option<Instant> {
        let deadlines = [
            self.pending.pump(),
            self.uncleared.pump(),
            self.invalid.pump(),
            self.errors.pump(),
        ];
        deadlines.into_iter().flatten().min()
    }

    /// Processes one event: the next snapshot, a completion wakeup, or a
    /// retry deadline, whichever comes first.
    pub async fn step(&mut self) -> Step {
        enum Wakeup {
            Delta(Option<StateDelta>),
            Background,
        }

        let deadline = self.pump_all();
        let wake = Arc::clone(&self.wake);
        let wakeup = tokio::select! {
            maybe_delta = self.delta_rx.recv() => Wakeup::Delta(maybe_delta),
            _ = wake.notified() => Wakeup::Background,
            _ = sleep_until_or_forever(deadline) => Wakeup::Background,
        };
        match wakeup {
            Wakeup::Delta(Some(delta)) => Step::Delta(self.handle_delta(&delta)),
            Wakeup::Delta(None) => Step::Disconnected,
            Wakeup::Background => {
                self.pump_all();
                Step::Progress
            }
        }
    }

    /// Runs until the connection stops pushing snapshots.
    pub async fn run(&mut self) {
        loop {
            if let Step::Disconnected = self.step().await {
                return;
            }
        }
    }
}

impl Drop for LedgerviewClient {
    fn drop(&mut self) {
        self.connection.unsubscribe(self.listener);
    }
}

async fn sleep_until_or_forever(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
