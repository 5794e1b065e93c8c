//! Back/forward navigation buffers.
//!
//! Pure state: callers receive the target marker and issue the actual `goto`
//! against the rendering engine themselves.

use std::collections::VecDeque;

use tracing::debug;

use crate::LocationMarker;

#[derive(Debug, Clone, Default)]
pub struct NavigationHistory {
    back: VecDeque<LocationMarker>,
    forward: VecDeque<LocationMarker>,
    limit: Option<usize>,
}

impl NavigationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps both stacks at `limit` entries, evicting the oldest on overflow.
    /// `None` keeps them unbounded.
    pub fn with_limit(limit: Option<usize>) -> Self {
        Self {
            limit: limit.filter(|l| *l > 0),
            ..Self::default()
        }
    }

    /// Manual navigation away from `current`: remember it and drop the redo trail.
    pub fn record_navigation(&mut self, current: LocationMarker) {
        push_bounded(&mut self.back, current, self.limit);
        self.forward.clear();
        debug!(back = self.back.len(), "recorded navigation");
    }

    pub fn go_back(&mut self, current: LocationMarker) -> Option<LocationMarker> {
        let target = self.back.pop_back()?;
        if self.forward.back() != Some(&current) {
            push_bounded(&mut self.forward, current, self.limit);
        }
        Some(target)
    }

    pub fn go_forward(&mut self, current: LocationMarker) -> Option<LocationMarker> {
        let target = self.forward.pop_back()?;
        if self.back.back() != Some(&current) {
            push_bounded(&mut self.back, current, self.limit);
        }
        Some(target)
    }

    pub fn back_len(&self) -> usize {
        self.back.len()
    }

    pub fn forward_len(&self) -> usize {
        self.forward.len()
    }

    pub fn can_go_back(&self) -> bool {
        !self.back.is_empty()
    }

    pub fn can_go_forward(&self) -> bool {
        !self.forward.is_empty()
    }
}

fn push_bounded(stack: &mut VecDeque<LocationMarker>, marker: LocationMarker, limit: Option<usize>) {
    stack.push_back(marker);
    if let Some(limit) = limit {
        while stack.len() > limit {
            stack.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(token: &str) -> LocationMarker {
        LocationMarker::new(token)
    }

    #[test]
    fn back_then_forward_returns_to_origin() {
        let mut history = NavigationHistory::new();
        history.record_navigation(loc("a"));
        history.record_navigation(loc("b"));

        assert_eq!(history.go_back(loc("c")), Some(loc("b")));
        assert_eq!(history.go_back(loc("b")), Some(loc("a")));
        assert_eq!(history.go_forward(loc("a")), Some(loc("b")));
        assert_eq!(history.go_forward(loc("b")), Some(loc("c")));
        assert!(!history.can_go_forward());
    }

    #[test]
    fn record_navigation_clears_forward() {
        let mut history = NavigationHistory::new();
        history.record_navigation(loc("a"));
        history.record_navigation(loc("b"));
        history.go_back(loc("c"));
        history.go_back(loc("b"));
        assert_eq!(history.forward_len(), 2);

        history.record_navigation(loc("x"));
        assert_eq!(history.forward_len(), 0);
        assert!(history.go_forward(loc("y")).is_none());
    }

    #[test]
    fn go_back_on_empty_is_noop() {
        let mut history = NavigationHistory::new();
        history.record_navigation(loc("a"));
        history.go_back(loc("b"));
        assert_eq!(history.forward_len(), 1);

        assert!(history.go_back(loc("a")).is_none());
        assert_eq!(history.forward_len(), 1);
        assert_eq!(history.back_len(), 0);
    }

    #[test]
    fn go_back_does_not_duplicate_forward_top() {
        let mut history = NavigationHistory::new();
        history.record_navigation(loc("a"));
        history.record_navigation(loc("b"));
        history.record_navigation(loc("c"));

        history.go_back(loc("d"));
        assert_eq!(history.forward_len(), 1);
        // caller did not move yet; current is still "d"
        history.go_back(loc("d"));
        assert_eq!(history.forward_len(), 1);
        assert_eq!(history.back_len(), 1);
    }

    #[test]
    fn go_forward_does_not_duplicate_back_top() {
        let mut history = NavigationHistory::new();
        history.record_navigation(loc("a"));
        history.record_navigation(loc("b"));
        assert_eq!(history.go_back(loc("c")), Some(loc("b")));
        // back's top is already "a", the position we report as current
        assert_eq!(history.go_forward(loc("a")), Some(loc("c")));
        assert_eq!(history.back_len(), 1);
        assert_eq!(history.forward_len(), 0);
    }

    #[test]
    fn limit_evicts_oldest_entries() {
        let mut history = NavigationHistory::with_limit(Some(2));
        history.record_navigation(loc("a"));
        history.record_navigation(loc("b"));
        history.record_navigation(loc("c"));
        assert_eq!(history.back_len(), 2);

        assert_eq!(history.go_back(loc("d")), Some(loc("c")));
        assert_eq!(history.go_back(loc("c")), Some(loc("b")));
        assert!(history.go_back(loc("b")).is_none());
    }
}
