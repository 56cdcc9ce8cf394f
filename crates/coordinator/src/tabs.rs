use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use pagelift_core_types::{LiftError, TabId};

/// The coordinator's view of the browser's tab population.
#[async_trait]
pub trait TabDirectory: Send + Sync {
    async fn live_tabs(&self) -> Vec<TabId>;
    async fn active_tab(&self) -> Option<TabId>;
    /// Ask the relay in `tab` to re-probe. Fire-and-forget: a tab without
    /// a listening relay is not an error.
    async fn request_redetect(&self, tab: TabId) -> Result<(), LiftError>;
}

/// In-memory tab population for tests and the in-process harness.
#[derive(Default)]
pub struct StaticTabs {
    tabs: DashMap<TabId, ()>,
    active: Mutex<Option<TabId>>,
    redetects: Mutex<Vec<TabId>>,
}

impl StaticTabs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, tab: TabId) {
        self.tabs.insert(tab, ());
    }

    pub fn close(&self, tab: TabId) {
        self.tabs.remove(&tab);
        let mut active = self.active.lock();
        if *active == Some(tab) {
            *active = None;
        }
    }

    pub fn activate(&self, tab: TabId) {
        self.tabs.insert(tab, ());
        *self.active.lock() = Some(tab);
    }

    pub fn redetect_requests(&self) -> Vec<TabId> {
        self.redetects.lock().clone()
    }
}

#[async_trait]
impl TabDirectory for StaticTabs {
    async fn live_tabs(&self) -> Vec<TabId> {
        self.tabs.iter().map(|entry| *entry.key()).collect()
    }

    async fn active_tab(&self) -> Option<TabId> {
        *self.active.lock()
    }

    async fn request_redetect(&self, tab: TabId) -> Result<(), LiftError> {
        if !self.tabs.contains_key(&tab) {
            return Err(LiftError::new(format!("no relay listening in tab {tab}")));
        }
        self.redetects.lock().push(tab);
        Ok(())
    }
}
