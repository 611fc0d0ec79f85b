//! The client's merged view of pushed server state.
//!
//! Pushed snapshots are deltas; [`SessionState::apply_delta`] overlays only
//! the keys a delta carries and reports which facets changed so the
//! orchestrator can re-evaluate windows, reset caches, or re-fence the
//! candidates singleton. The reducer is independent of any rendering
//! concern and is tested as plain state-in, state-out logic.

use crate::cache::{Generation, GenerationAndCount};
use crate::model::{CandidatesData, ListKind};
use crate::protocol::StateDelta;

pub mod stores;

/// The (candidates_generation, pending_index) pair delivered together in
/// one delta. Candidates are renderable only while this pair can still be
/// corroborated against the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CandidateFence {
    generation: Generation,
    pending_index: u64,
}

#[derive(Debug, Default)]
pub struct SessionState {
    pending: Option<GenerationAndCount>,
    uncleared: Option<GenerationAndCount>,
    invalid: Option<GenerationAndCount>,
    errors: Option<GenerationAndCount>,
    candidates_generation: Option<Generation>,
    candidates: Option<CandidatesData>,
    pending_index: Option<u64>,
    accounts: Vec<String>,
    journal_filenames: Vec<String>,
    message: Option<String>,
    closed: bool,
    fence: Option<CandidateFence>,
}

/// Which facets an applied delta touched.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DeltaOutcome {
    /// Lists whose `(generation, count)` the delta carried, in push order.
    pub lists: Vec<(ListKind, GenerationAndCount)>,
    /// New candidates generation when it changed (consumers drop stale
    /// candidate selections on this).
    pub candidates_generation_changed: Option<Generation>,
    /// Pending-list index the view should scroll to: set when the delta
    /// carried both a `pending_index` and a pending `(generation, count)`
    /// that differ from what was previously observed.
    pub pending_jump: Option<u64>,
    pub closed_changed: bool,
    /// `closed` transitioned back to false; windows must be re-evaluated.
    pub reopened: bool,
}

/// Renderable candidates: the fenced pair plus the data it covers.
#[derive(Debug, Clone, Copy)]
pub struct CandidatesView<'a> {
    pub generation: Generation,
    pub pending_index: u64,
    pub data: &'a CandidatesData,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list(&self, kind: ListKind) -> Option<GenerationAndCount> {
        match kind {
            ListKind::Pending => self.pending,
            ListKind::Uncleared => self.uncleared,
            ListKind::Invalid => self.invalid,
            ListKind::Errors => self.errors,
        }
    }

    pub fn pending_index(&self) -> Option<u64> {
        self.pending_index
    }

    pub fn accounts(&self) -> &[String] {
        &self.accounts
    }

    pub fn journal_filenames(&self) -> &[String] {
        &self.journal_filenames
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn closed(&self) -> bool {
        self.closed
    }

    /// Candidates, only while the fenced (generation, pending_index) pair
    /// still matches the current state. `None` means "unavailable", never
    /// "render the previous ones".
    pub fn candidates(&self) -> Option<CandidatesView<'_>> {
        let fence = self.fence?;
        if self.pending_index != Some(fence.pending_index) {
            return None;
        }
        if self.candidates_generation != Some(fence.generation) {
            return None;
        }
        let data = self.candidates.as_ref()?;
        Some(CandidatesView {
            generation: fence.generation,
            pending_index: fence.pending_index,
            data,
        })
    }

    /// Overlays `delta` onto the state. Omitted keys are untouched.
    pub fn apply_delta(&mut self, delta: &StateDelta) -> DeltaOutcome {
        let mut outcome = DeltaOutcome::default();

        // Auto-scroll to the server's pending index when the pending list
        // identity or index moved, judged against the pre-overlay state.
        if let (Some(index), Some(pending)) = (delta.pending_index, delta.pending) {
            let moved = match self.pending {
                None => true,
                Some(prev) => {
                    prev.generation() != pending.generation() || self.pending_index != Some(index)
                }
            };
            if moved {
                outcome.pending_jump = Some(index);
            }
        }

        let pending_generation_changed = match (self.pending, delta.pending) {
            (Some(prev), Some(new)) => prev.generation() != new.generation(),
            (None, Some(_)) => true,
            _ => false,
        };

        for kind in ListKind::ALL {
            if let Some(gc) = delta.list(kind) {
                self.set_list(kind, gc);
                outcome.lists.push((kind, gc));
            }
        }

        if let Some(generation) = delta.candidates_generation {
            if self.candidates_generation != Some(generation) {
                outcome.candidates_generation_changed = Some(generation);
            }
            self.candidates_generation = Some(generation);
        }
        if let Some(candidates) = &delta.candidates {
            self.candidates = Some(candidates.clone());
        }
        if let Some(index) = delta.pending_index {
            self.pending_index = Some(index);
        }

        // Candidates and pending_index form an atomic pair only when they
        // arrive in the same delta; anything that moves one side without the
        // other breaks the fence.
        if delta.candidates.is_some() && delta.pending_index.is_some() {
            match (self.candidates_generation, delta.pending_index) {
                (Some(generation), Some(pending_index)) => {
                    self.fence = Some(CandidateFence {
                        generation,
                        pending_index,
                    });
                }
                _ => self.fence = None,
            }
        } else if delta.pending_index.is_some()
            || delta.candidates.is_some()
            || pending_generation_changed
            || outcome.candidates_generation_changed.is_some()
        {
            self.fence = None;
        }

        if let Some(accounts) = &delta.accounts {
            self.accounts = accounts.clone();
        }
        if let Some(filenames) = &delta.journal_filenames {
            self.journal_filenames = filenames.clone();
        }
        if let Some(message) = &delta.message {
            self.message = Some(message.clone());
        }
        if let Some(closed) = delta.closed {
            if self.closed != closed {
                outcome.closed_changed = true;
                if !closed {
                    outcome.reopened = true;
                }
            }
            self.closed = closed;
        }

        outcome
    }

    fn set_list(&mut self, kind: ListKind, gc: GenerationAndCount) {
        match kind {
            ListKind::Pending => self.pending = Some(gc),
            ListKind::Uncleared => self.uncleared = Some(gc),
            ListKind::Invalid => self.invalid = Some(gc),
            ListKind::Errors => self.errors = Some(gc),
        }
    }
}

/// Longest common prefix of the journal filenames, used to shorten
/// displayed paths.
pub fn common_journal_prefix(filenames: &[String]) -> String {
    let mut iter = filenames.iter();
    let Some(first) = iter.next() else {
        return String::new();
    };
    let mut prefix = first.as_str();
    for name in iter {
        prefix = &prefix[..common_len(prefix, name)];
        if prefix.is_empty() {
            break;
        }
    }
    prefix.to_string()
}

fn common_len(a: &str, b: &str) -> usize {
    let mut len = 0;
    for (ca, cb) in a.chars().zip(b.chars()) {
        if ca != cb {
            break;
        }
        len += ca.len_utf8();
    }
    len
}
