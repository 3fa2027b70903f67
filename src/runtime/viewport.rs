//! Auto-follow policy for the rendering viewport.
//!
//! The policy issues at most one scroll-to-end request per flush and tells
//! its own programmatic scrolls apart from user scrolls. A request moves the
//! policy into `Programmatic`; it returns to `Idle` when the renderer reports
//! the request settled, or once the settle timeout passes without a report.
//! Only scroll events observed while `Idle` count as user intent.

use std::time::{Duration, Instant};

/// Programmatic scroll-to-end request for the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollRequest {
    pub id: u64,
}

/// How a scroll event was interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollAttribution {
    /// Effect of the policy's own request; ignored.
    Programmatic,
    /// User scroll; follow state updated from the resulting position.
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScrollPhase {
    Idle,
    Programmatic { request: u64, issued_at: Instant },
}

#[derive(Debug, Clone, Copy, Default)]
struct ViewportGeometry {
    total_lines: usize,
    viewport_height: usize,
    offset_from_tail: usize,
}

impl ViewportGeometry {
    fn clamp_offset(&mut self) {
        let height = self.viewport_height.max(1);
        let max_offset = self.total_lines.saturating_sub(height);
        self.offset_from_tail = self.offset_from_tail.min(max_offset);
    }
}

#[derive(Debug, Clone)]
pub struct ViewportPolicy {
    auto_follow: bool,
    geometry: ViewportGeometry,
    phase: ScrollPhase,
    content_dirty: bool,
    settle_timeout: Duration,
    issued: u64,
}

impl ViewportPolicy {
    pub fn new(settle_timeout: Duration) -> Self {
        Self {
            auto_follow: true,
            geometry: ViewportGeometry::default(),
            phase: ScrollPhase::Idle,
            content_dirty: false,
            settle_timeout,
            issued: 0,
        }
    }

    pub fn auto_follow_enabled(&self) -> bool {
        self.auto_follow
    }

    /// User toggle. Turning follow back on scrolls to the end at the next flush.
    pub fn set_auto_follow(&mut self, enabled: bool) {
        self.auto_follow = enabled;
        if enabled {
            self.content_dirty = true;
        }
    }

    pub fn is_at_bottom(&self) -> bool {
        self.geometry.offset_from_tail == 0
    }

    /// Lines between the bottom of the viewport and the end of content.
    pub fn offset_from_tail(&self) -> usize {
        self.geometry.offset_from_tail
    }

    /// Whether scroll events at `now` are attributed to the policy itself.
    pub fn is_suppressing(&self, now: Instant) -> bool {
        match self.phase {
            ScrollPhase::Idle => false,
            ScrollPhase::Programmatic { issued_at, .. } => {
                now.saturating_duration_since(issued_at) < self.settle_timeout
            }
        }
    }

    /// Requests issued since creation.
    pub fn requests_issued(&self) -> u64 {
        self.issued
    }

    /// Renderer-reported content and viewport size.
    pub fn update_geometry(&mut self, total_lines: usize, viewport_height: usize) {
        self.geometry.total_lines = total_lines;
        self.geometry.viewport_height = viewport_height;
        self.geometry.clamp_offset();
    }

    pub fn note_content_changed(&mut self) {
        self.content_dirty = true;
    }

    /// Ends a flush window. Returns one request when content changed and
    /// follow is on, however many changes the window held.
    pub fn finish_flush(&mut self, now: Instant) -> Option<ScrollRequest> {
        let dirty = std::mem::take(&mut self.content_dirty);
        if !dirty || !self.auto_follow {
            return None;
        }

        self.issued += 1;
        self.phase = ScrollPhase::Programmatic {
            request: self.issued,
            issued_at: now,
        };
        self.geometry.offset_from_tail = 0;
        Some(ScrollRequest { id: self.issued })
    }

    /// Completion callback for a request. Stale ids are ignored.
    pub fn on_scroll_settled(&mut self, request_id: u64) -> bool {
        match self.phase {
            ScrollPhase::Programmatic { request, .. } if request == request_id => {
                self.phase = ScrollPhase::Idle;
                true
            }
            _ => false,
        }
    }

    /// Scroll position report from the renderer.
    pub fn on_scroll_event(&mut self, now: Instant, offset_from_tail: usize) -> ScrollAttribution {
        self.geometry.offset_from_tail = offset_from_tail;
        self.geometry.clamp_offset();

        if self.is_suppressing(now) {
            return ScrollAttribution::Programmatic;
        }
        self.phase = ScrollPhase::Idle;
        self.auto_follow = self.is_at_bottom();
        ScrollAttribution::User
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::{ScrollAttribution, ViewportPolicy};

    const SETTLE: Duration = Duration::from_millis(150);

    #[test]
    fn one_request_per_flush_regardless_of_change_count() {
        let mut policy = ViewportPolicy::new(SETTLE);
        let now = Instant::now();
        for _ in 0..25 {
            policy.note_content_changed();
        }

        assert!(policy.finish_flush(now).is_some());
        assert!(policy.finish_flush(now).is_none());
        assert_eq!(policy.requests_issued(), 1);
    }

    #[test]
    fn scroll_inside_suppression_window_keeps_follow() {
        let mut policy = ViewportPolicy::new(SETTLE);
        policy.update_geometry(100, 20);
        let start = Instant::now();
        policy.note_content_changed();
        policy.finish_flush(start).expect("request");

        let attribution = policy.on_scroll_event(start + Duration::from_millis(10), 12);
        assert_eq!(attribution, ScrollAttribution::Programmatic);
        assert!(policy.auto_follow_enabled());
    }

    #[test]
    fn scroll_after_window_is_user_intent() {
        let mut policy = ViewportPolicy::new(SETTLE);
        policy.update_geometry(100, 20);
        let start = Instant::now();
        policy.note_content_changed();
        policy.finish_flush(start).expect("request");

        let attribution = policy.on_scroll_event(start + Duration::from_millis(200), 12);
        assert_eq!(attribution, ScrollAttribution::User);
        assert!(!policy.auto_follow_enabled());

        policy.note_content_changed();
        assert!(policy.finish_flush(start + Duration::from_millis(250)).is_none());
    }

    #[test]
    fn settle_callback_ends_suppression_early() {
        let mut policy = ViewportPolicy::new(SETTLE);
        policy.update_geometry(100, 20);
        let start = Instant::now();
        policy.note_content_changed();
        let request = policy.finish_flush(start).expect("request");

        assert!(!policy.on_scroll_settled(request.id + 1));
        assert!(policy.is_suppressing(start));
        assert!(policy.on_scroll_settled(request.id));

        let attribution = policy.on_scroll_event(start + Duration::from_millis(5), 3);
        assert_eq!(attribution, ScrollAttribution::User);
        assert!(!policy.auto_follow_enabled());
    }

    #[test]
    fn user_scroll_back_to_bottom_resumes_follow() {
        let mut policy = ViewportPolicy::new(SETTLE);
        policy.update_geometry(100, 20);
        let now = Instant::now();

        policy.on_scroll_event(now, 30);
        assert!(!policy.auto_follow_enabled());
        assert_eq!(policy.offset_from_tail(), 30);

        policy.on_scroll_event(now, 0);
        assert!(policy.auto_follow_enabled());
        assert!(policy.is_at_bottom());
    }

    #[test]
    fn offset_clamps_when_content_shrinks() {
        let mut policy = ViewportPolicy::new(SETTLE);
        policy.update_geometry(40, 10);
        policy.on_scroll_event(Instant::now(), 25);
        assert_eq!(policy.offset_from_tail(), 25);

        policy.update_geometry(20, 10);
        assert_eq!(policy.offset_from_tail(), 10);
    }

    #[test]
    fn re_enabling_follow_scrolls_at_next_flush() {
        let mut policy = ViewportPolicy::new(SETTLE);
        policy.set_auto_follow(false);
        policy.note_content_changed();
        assert!(policy.finish_flush(Instant::now()).is_none());

        policy.set_auto_follow(true);
        assert!(policy.finish_flush(Instant::now()).is_some());
    }
}
