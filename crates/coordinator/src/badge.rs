use parking_lot::Mutex;

use pagelift_core_types::TabId;

/// The badge has exactly two states: an affirmative check glyph bound to a
/// tab, or cleared.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BadgeState {
    Ready,
    Empty,
}

/// Glyph and color the affirmative badge renders with.
pub const BADGE_GLYPH: &str = "\u{2713}";
pub const BADGE_COLOR: &str = "#16a34a";

/// Visible affordance surface. `tab` is `None` only for the global badge
/// during startup housekeeping, before any tab context exists.
pub trait BadgePort: Send + Sync {
    fn apply(&self, tab: Option<TabId>, state: BadgeState);
}

pub struct NoopBadge;

impl BadgePort for NoopBadge {
    fn apply(&self, _tab: Option<TabId>, _state: BadgeState) {}
}

/// Badge that records every transition, for assertions.
#[derive(Default)]
pub struct RecordingBadge {
    events: Mutex<Vec<(Option<TabId>, BadgeState)>>,
}

impl RecordingBadge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(Option<TabId>, BadgeState)> {
        self.events.lock().clone()
    }

    /// The most recent state applied for a specific tab.
    pub fn last_for(&self, tab: TabId) -> Option<BadgeState> {
        self.events
            .lock()
            .iter()
            .rev()
            .find(|(scope, _)| *scope == Some(tab))
            .map(|(_, state)| *state)
    }
}

impl BadgePort for RecordingBadge {
    fn apply(&self, tab: Option<TabId>, state: BadgeState) {
        self.events.lock().push((tab, state));
    }
}
