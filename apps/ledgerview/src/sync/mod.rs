//! Windowed fetch scheduling over the generation-tagged cache.
//!
//! The scheduler turns "this index range is of interest" into the minimal
//! set of range requests: it subtracts cached rows and ranges that are
//! already in flight (or waiting out a retry backoff), coalesces what is
//! left into half-open sub-ranges, and hands each out exactly once. Failed
//! ranges retry with bounded exponential backoff and are abandoned only
//! when they leave the window before the retry fires.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

pub mod list;
pub mod scroll;

pub use list::{ListEvent, ListSyncConfig, ListSyncState};
pub use scroll::ScrollState;

/// Half-open index range of interest. Invariant: `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: u64,
    pub end: u64,
}

impl Window {
    pub const EMPTY: Window = Window { start: 0, end: 0 };

    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    pub fn len(self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(self) -> bool {
        self.start == self.end
    }

    pub fn contains(self, index: u64) -> bool {
        index >= self.start && index < self.end
    }

    /// Clamps both bounds to `count`; a window entirely past the end
    /// collapses to empty.
    pub fn clamp(self, count: u64) -> Self {
        Window {
            start: self.start.min(count),
            end: self.end.min(count),
        }
    }

    pub fn intersect(self, other: Window) -> Window {
        let start = self.start.max(other.start);
        Window {
            start,
            end: self.end.min(other.end).max(start),
        }
    }

    pub fn intersects(self, other: Window) -> bool {
        !self.intersect(other).is_empty()
    }
}

/// Minimal set of missing, non-overlapping sub-ranges within `window`:
/// indices that are neither cached nor covered by `covered`.
pub(crate) fn missing_ranges(
    window: Window,
    is_cached: impl Fn(u64) -> bool,
    covered: &[Window],
) -> Vec<Window> {
    let mut ranges: Vec<Window> = Vec::new();
    let mut open: Option<u64> = None;
    for index in window.start..window.end {
        let present = is_cached(index) || covered.iter().any(|range| range.contains(index));
        if present {
            if let Some(start) = open.take() {
                ranges.push(Window::new(start, index));
            }
        } else if open.is_none() {
            open = Some(index);
        }
    }
    if let Some(start) = open {
        ranges.push(Window::new(start, window.end));
    }
    ranges
}

/// Exponential backoff with a small jitter so parallel lists do not retry
/// in lockstep.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base: Duration,
    pub factor: u32,
    pub cap: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(250),
            factor: 2,
            cap: Duration::from_secs(4),
            jitter: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following `attempt` prior failures.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let scale = self.factor.saturating_pow(attempt.min(16));
        let delay = self.base.saturating_mul(scale).min(self.cap);
        if self.jitter.is_zero() {
            delay
        } else {
            let extra = rand::thread_rng().gen_range(0..=self.jitter.as_millis() as u64);
            delay + Duration::from_millis(extra)
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    id: u64,
    range: Window,
    attempt: u32,
}

#[derive(Debug, Clone, Copy)]
struct PendingRetry {
    range: Window,
    attempt: u32,
    due: Instant,
}

/// A range request handed out by [`FetchScheduler::plan`]; the id must be
/// passed back on completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedFetch {
    pub id: u64,
    pub range: Window,
}

/// Tracks which ranges are out on the wire or waiting out a backoff.
///
/// Ids double as a fence: `clear` forgets every outstanding id, so a
/// completion for a cleared id resolves to nothing and is discarded by the
/// caller without touching the cache.
#[derive(Debug)]
pub struct FetchScheduler {
    policy: RetryPolicy,
    next_id: u64,
    in_flight: Vec<InFlight>,
    retries: Vec<PendingRetry>,
}

impl FetchScheduler {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            next_id: 1,
            in_flight: Vec::new(),
            retries: Vec::new(),
        }
    }

    /// Computes the requests to issue for `window`: due retries first, then
    /// fresh missing ranges. Retries whose range no longer intersects the
    /// window are abandoned here.
    pub fn plan(
        &mut self,
        window: Window,
        is_cached: impl Fn(u64) -> bool,
        now: Instant,
    ) -> Vec<PlannedFetch> {
        self.retries.retain(|retry| retry.range.intersects(window));

        let mut planned = Vec::new();
        let mut waiting = Vec::new();
        for retry in self.retries.drain(..).collect::<Vec<_>>() {
            if retry.due > now {
                waiting.push(retry);
                continue;
            }
            let range = retry.range.intersect(window);
            if range.is_empty() {
                continue;
            }
            let id = self.take_id();
            self.in_flight.push(InFlight {
                id,
                range,
                attempt: retry.attempt,
            });
            planned.push(PlannedFetch { id, range });
        }
        self.retries = waiting;

        let mut covered: Vec<Window> = self.in_flight.iter().map(|f| f.range).collect();
        covered.extend(self.retries.iter().map(|r| r.range));
        for range in missing_ranges(window, is_cached, &covered) {
            let id = self.take_id();
            self.in_flight.push(InFlight {
                id,
                range,
                attempt: 0,
            });
            planned.push(PlannedFetch { id, range });
        }
        planned
    }

    /// Removes a completed request. `None` means the id was fenced off by
    /// `clear` and the completion must be discarded.
    pub fn resolve(&mut self, id: u64) -> Option<Window> {
        let position = self.in_flight.iter().position(|f| f.id == id)?;
        Some(self.in_flight.swap_remove(position).range)
    }

    /// Moves a failed request into the retry queue with its backoff delay.
    pub fn resolve_failed(&mut self, id: u64, now: Instant) -> bool {
        let Some(position) = self.in_flight.iter().position(|f| f.id == id) else {
            return false;
        };
        let failed = self.in_flight.swap_remove(position);
        self.retries.push(PendingRetry {
            range: failed.range,
            attempt: failed.attempt + 1,
            due: now + self.policy.delay_for(failed.attempt),
        });
        true
    }

    /// Earliest pending retry, if any; the owner sleeps until then.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.retries.iter().map(|retry| retry.due).min()
    }

    /// Forgets every outstanding request and retry. Used on generation
    /// change: late completions then resolve to nothing.
    pub fn clear(&mut self) {
        self.in_flight.clear();
        self.retries.clear();
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn retry_len(&self) -> usize {
        self.retries.len()
    }

    fn take_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> RetryPolicy {
        RetryPolicy {
            jitter: Duration::ZERO,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn window_clamps_and_intersects() {
        let window = Window::new(7, 12).clamp(10);
        assert_eq!(window, Window::new(7, 10));
        assert_eq!(Window::new(15, 20).clamp(10), Window::new(10, 10));
        assert!(Window::new(15, 20).clamp(10).is_empty());

        assert_eq!(
            Window::new(0, 10).intersect(Window::new(5, 20)),
            Window::new(5, 10)
        );
        assert!(!Window::new(0, 5).intersects(Window::new(5, 10)));
    }

    #[test]
    fn missing_ranges_coalesce_around_cached_rows() {
        let cached = [2u64, 3, 7];
        let ranges = missing_ranges(Window::new(0, 10), |i| cached.contains(&i), &[]);
        assert_eq!(
            ranges,
            vec![Window::new(0, 2), Window::new(4, 7), Window::new(8, 10)]
        );
    }

    #[test]
    fn missing_ranges_respect_covered() {
        let ranges = missing_ranges(Window::new(0, 10), |_| false, &[Window::new(0, 6)]);
        assert_eq!(ranges, vec![Window::new(6, 10)]);
    }

    #[test]
    fn jitter_stays_within_its_bound() {
        let policy = RetryPolicy::default();
        for attempt in 0..6 {
            let floor = no_jitter().delay_for(attempt);
            for _ in 0..16 {
                let delay = policy.delay_for(attempt);
                assert!(delay >= floor);
                assert!(delay <= floor + policy.jitter);
            }
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = no_jitter();
        assert_eq!(policy.delay_for(0), Duration::from_millis(250));
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for(4), Duration::from_secs(4));
        assert_eq!(policy.delay_for(20), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn plan_issues_each_range_once() {
        let mut scheduler = FetchScheduler::new(no_jitter());
        let now = Instant::now();

        let planned = scheduler.plan(Window::new(0, 20), |_| false, now);
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].range, Window::new(0, 20));

        // Overlapping window while the fetch is in flight: nothing new.
        let planned = scheduler.plan(Window::new(5, 15), |_| false, now);
        assert!(planned.is_empty());

        // Widening past the in-flight range requests only the gap.
        let planned = scheduler.plan(Window::new(0, 30), |_| false, now);
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].range, Window::new(20, 30));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_range_retries_after_backoff() {
        let mut scheduler = FetchScheduler::new(no_jitter());
        let now = Instant::now();

        let planned = scheduler.plan(Window::new(0, 10), |_| false, now);
        let id = planned[0].id;
        assert!(scheduler.resolve_failed(id, now));
        assert_eq!(scheduler.retry_len(), 1);

        // Before the deadline the range is neither re-requested nor lost.
        let planned = scheduler.plan(Window::new(0, 10), |_| false, now);
        assert!(planned.is_empty());
        let due = scheduler.next_deadline().unwrap();
        assert_eq!(due - now, Duration::from_millis(250));

        let planned = scheduler.plan(Window::new(0, 10), |_| false, due);
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].range, Window::new(0, 10));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_abandoned_when_window_moves_away() {
        let mut scheduler = FetchScheduler::new(no_jitter());
        let now = Instant::now();

        let planned = scheduler.plan(Window::new(0, 10), |_| false, now);
        scheduler.resolve_failed(planned[0].id, now);

        let later = now + Duration::from_secs(5);
        let planned = scheduler.plan(Window::new(50, 60), |_| false, later);
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].range, Window::new(50, 60));
        assert_eq!(scheduler.retry_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_fences_late_completions() {
        let mut scheduler = FetchScheduler::new(no_jitter());
        let planned = scheduler.plan(Window::new(0, 10), |_| false, Instant::now());
        let id = planned[0].id;
        scheduler.clear();
        assert_eq!(scheduler.resolve(id), None);
    }
}
