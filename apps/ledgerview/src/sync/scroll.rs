//! Scroll position tracking for one synchronized list.
//!
//! Scrolling and fetching are decoupled: `scroll_to_index` records intent
//! and moves the visible range; the fetch scheduler satisfies the range
//! asynchronously and the owning sync state clears the jump once the target
//! row is cached. At most one jump is outstanding; a newer one supersedes
//! it.

use super::Window;

#[derive(Debug)]
pub struct ScrollState {
    top: u64,
    viewport: u64,
    count: u64,
    pending_jump: Option<u64>,
}

impl ScrollState {
    pub fn new(viewport: u64) -> Self {
        Self {
            top: 0,
            viewport,
            count: 0,
            pending_jump: None,
        }
    }

    pub fn top(&self) -> u64 {
        self.top
    }

    pub fn viewport(&self) -> u64 {
        self.viewport
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// The index range currently visible, clamped to the list count.
    pub fn visible_range(&self) -> Window {
        Window::new(self.top, self.top.saturating_add(self.viewport)).clamp(self.count)
    }

    /// Visible range extended by the prefetch margin on both sides.
    pub fn window_with_margin(&self, margin: u64) -> Window {
        let start = self.top.saturating_sub(margin);
        let end = self
            .top
            .saturating_add(self.viewport)
            .saturating_add(margin);
        Window::new(start, end).clamp(self.count)
    }

    /// Moves the visible range to include `index` and records the jump.
    /// Targets past the end are clamped, never an error.
    pub fn scroll_to_index(&mut self, index: u64) {
        let effective = if self.count == 0 {
            0
        } else {
            index.min(self.count - 1)
        };
        if effective < self.top {
            self.top = effective;
        } else if self.viewport > 0 && effective >= self.top + self.viewport {
            self.top = effective + 1 - self.viewport;
        }
        self.pending_jump = Some(index);
    }

    /// Consumer-reported viewport change. A scroll to a new position
    /// supersedes any outstanding jump; an echo of the position we already
    /// requested keeps the jump pending.
    pub fn on_window_change(&mut self, window: Window) {
        if window.start != self.top {
            self.pending_jump = None;
        }
        self.top = window.start;
        self.viewport = window.len();
        self.clamp_top();
    }

    pub fn set_count(&mut self, count: u64) {
        self.count = count;
        self.clamp_top();
    }

    /// Outstanding jump target as requested (unclamped).
    pub fn pending_jump(&self) -> Option<u64> {
        self.pending_jump
    }

    /// Outstanding jump target clamped to the current count; `None` when no
    /// jump is outstanding or the list is empty.
    pub fn jump_target(&self) -> Option<u64> {
        let index = self.pending_jump?;
        if self.count == 0 {
            None
        } else {
            Some(index.min(self.count - 1))
        }
    }

    pub fn complete_jump(&mut self) {
        self.pending_jump = None;
    }

    fn clamp_top(&mut self) {
        if self.count == 0 {
            self.top = 0;
        } else if self.top >= self.count {
            self.top = self.count - 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scroll_down_moves_top_to_show_target() {
        let mut scroll = ScrollState::new(10);
        scroll.set_count(100);
        scroll.scroll_to_index(45);
        assert_eq!(scroll.top(), 36);
        assert!(scroll.visible_range().contains(45));
        assert_eq!(scroll.pending_jump(), Some(45));
    }

    #[test]
    fn scroll_up_moves_top_to_target() {
        let mut scroll = ScrollState::new(10);
        scroll.set_count(100);
        scroll.on_window_change(Window::new(50, 60));
        scroll.scroll_to_index(5);
        assert_eq!(scroll.top(), 5);
        assert!(scroll.visible_range().contains(5));
    }

    #[test]
    fn target_past_end_is_clamped() {
        let mut scroll = ScrollState::new(10);
        scroll.set_count(8);
        scroll.scroll_to_index(500);
        assert_eq!(scroll.jump_target(), Some(7));
        assert!(scroll.visible_range().contains(7));
    }

    #[test]
    fn count_shrink_collapses_visible_range() {
        let mut scroll = ScrollState::new(2);
        scroll.set_count(10);
        scroll.on_window_change(Window::new(7, 9));
        scroll.set_count(3);
        assert!(scroll.visible_range().start < 3);
        assert_eq!(scroll.top(), 2);
    }

    #[test]
    fn empty_list_yields_empty_range() {
        let mut scroll = ScrollState::new(20);
        scroll.set_count(0);
        assert!(scroll.visible_range().is_empty());
        assert!(scroll.window_with_margin(10).is_empty());
        scroll.scroll_to_index(4);
        assert_eq!(scroll.jump_target(), None);
    }

    #[test]
    fn user_scroll_supersedes_jump_but_echo_does_not() {
        let mut scroll = ScrollState::new(10);
        scroll.set_count(100);
        scroll.scroll_to_index(45);
        let top = scroll.top();

        scroll.on_window_change(Window::new(top, top + 10));
        assert_eq!(scroll.pending_jump(), Some(45));

        scroll.on_window_change(Window::new(0, 10));
        assert_eq!(scroll.pending_jump(), None);
    }

    #[test]
    fn margin_extends_both_directions_within_bounds() {
        let mut scroll = ScrollState::new(10);
        scroll.set_count(100);
        scroll.on_window_change(Window::new(30, 40));
        assert_eq!(scroll.window_with_margin(5), Window::new(25, 45));
        scroll.on_window_change(Window::new(0, 10));
        assert_eq!(scroll.window_with_margin(5), Window::new(0, 15));
    }
}
