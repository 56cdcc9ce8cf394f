use std::time::Duration;

use parking_lot::Mutex;

/// Auto-dismiss delay for the success overlay.
pub const SUCCESS_DISMISS: Duration = Duration::from_millis(2500);
/// Auto-dismiss delay for the error overlay.
pub const ERROR_DISMISS: Duration = Duration::from_millis(3000);

/// Full-screen overlay surface the clone action drives while it runs.
pub trait OverlayPort: Send + Sync {
    fn show_loading(&self);
    fn show_success(&self, message: &str, dismiss_after: Duration);
    fn show_error(&self, message: &str, dismiss_after: Duration);
    /// Reload the builder iframe (or the whole page) after a successful clone.
    fn reload_builder(&self);
}

/// Overlay that renders nothing; used where no page surface exists.
pub struct NoopOverlay;

impl OverlayPort for NoopOverlay {
    fn show_loading(&self) {}
    fn show_success(&self, _message: &str, _dismiss_after: Duration) {}
    fn show_error(&self, _message: &str, _dismiss_after: Duration) {}
    fn reload_builder(&self) {}
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum OverlayEvent {
    Loading,
    Success(String),
    Error(String),
    Reload,
}

/// Overlay that records what it was asked to show, for assertions.
#[derive(Default)]
pub struct RecordingOverlay {
    events: Mutex<Vec<OverlayEvent>>,
}

impl RecordingOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<OverlayEvent> {
        self.events.lock().clone()
    }
}

impl OverlayPort for RecordingOverlay {
    fn show_loading(&self) {
        self.events.lock().push(OverlayEvent::Loading);
    }

    fn show_success(&self, message: &str, _dismiss_after: Duration) {
        self.events.lock().push(OverlayEvent::Success(message.to_string()));
    }

    fn show_error(&self, message: &str, _dismiss_after: Duration) {
        self.events.lock().push(OverlayEvent::Error(message.to_string()));
    }

    fn reload_builder(&self) {
        self.events.lock().push(OverlayEvent::Reload);
    }
}
