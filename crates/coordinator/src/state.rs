use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use pagelift_core_types::{
    parse_tab_key, tab_key, CopiedSnapshot, PageData, TabId, COPIED_PAGE_DATA_KEY,
    LAST_PAGE_DATA_KEY,
};
use pagelift_message_bus::protocol::{ExtensionEnvelope, ExtensionKind};

use crate::api::Coordinator;
use crate::badge::{BadgePort, BadgeState};
use crate::metrics;
use crate::model::CoordinatorConfig;
use crate::storage::KeyValueStore;
use crate::tabs::TabDirectory;

/// The long-lived background context: exclusive owner of the tab bindings,
/// the copied-snapshot slot, and the badge.
pub struct BackgroundCoordinator {
    bindings: Arc<DashMap<TabId, PageData>>,
    store: Arc<dyn KeyValueStore>,
    badge: Arc<dyn BadgePort>,
    tabs: Arc<dyn TabDirectory>,
    config: CoordinatorConfig,
    scheduled: DashMap<TabId, CancellationToken>,
    sweeper: Mutex<Option<CancellationToken>>,
}

impl BackgroundCoordinator {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        badge: Arc<dyn BadgePort>,
        tabs: Arc<dyn TabDirectory>,
        config: CoordinatorConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            bindings: Arc::new(DashMap::new()),
            store,
            badge,
            tabs,
            config,
            scheduled: DashMap::new(),
            sweeper: Mutex::new(None),
        })
    }

    /// Startup housekeeping: rehydrate bindings from durable storage, run
    /// one sweep, seed the badge, then keep sweeping periodically.
    pub async fn start(self: &Arc<Self>) {
        self.hydrate().await;
        self.sweep().await;
        match self.tabs.active_tab().await {
            Some(tab) => self.refresh_badge(tab).await,
            // No tab context yet: only the global badge is available.
            None => self.badge.apply(None, BadgeState::Empty),
        }

        let token = CancellationToken::new();
        {
            let mut slot = self.sweeper.lock();
            if let Some(prior) = slot.take() {
                prior.cancel();
            }
            *slot = Some(token.clone());
        }
        let this = Arc::clone(self);
        let interval = self.config.sweep_interval;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = sleep(interval) => {
                        this.sweep().await;
                    }
                }
            }
        });
    }

    pub fn stop(&self) {
        if let Some(token) = self.sweeper.lock().take() {
            token.cancel();
        }
        for entry in self.scheduled.iter() {
            entry.value().cancel();
        }
        self.scheduled.clear();
    }

    async fn hydrate(&self) {
        for key in self.store.keys().await {
            let Some(tab) = parse_tab_key(&key) else {
                continue;
            };
            let Some(value) = self.store.get(&key).await else {
                continue;
            };
            match serde_json::from_value::<PageData>(value) {
                Ok(data) => {
                    self.bindings.insert(tab, data);
                }
                Err(err) => {
                    warn!(%key, "dropping unreadable stored binding: {err}");
                    self.store.remove(&key).await;
                }
            }
        }
        metrics::set_binding_count(self.bindings.len());
    }

    /// The binding for `tab`, falling back to the most recent record seen
    /// on any tab when the binding is momentarily absent (e.g. right after
    /// a navigation).
    pub async fn page_data_for(&self, tab: TabId) -> Option<PageData> {
        if let Some(entry) = self.bindings.get(&tab) {
            return Some(entry.value().clone());
        }
        self.store
            .get(LAST_PAGE_DATA_KEY)
            .await
            .and_then(|value| serde_json::from_value(value).ok())
    }

    /// Extension-bus entry point for messages addressed to the background.
    pub async fn handle(&self, env: ExtensionEnvelope) -> Option<Value> {
        match env.kind {
            ExtensionKind::DataDiscovered { tab, data } => {
                self.data_discovered(tab, data).await;
                None
            }
            ExtensionKind::GetCopied => {
                let snapshot = self.copied_info().await?;
                serde_json::to_value(snapshot).ok()
            }
            ExtensionKind::CopyData { data } => {
                let snapshot = self.copy_info(data).await;
                serde_json::to_value(snapshot).ok()
            }
            _ => None,
        }
    }

    async fn refresh_badge(&self, tab: TabId) {
        let state = if self
            .bindings
            .get(&tab)
            .map(|entry| entry.value().platform_detected || entry.value().is_complete())
            .unwrap_or(false)
        {
            BadgeState::Ready
        } else {
            BadgeState::Empty
        };
        self.badge.apply(Some(tab), state);
    }

    async fn persist(&self, key: &str, data: &PageData) {
        match serde_json::to_value(data) {
            Ok(value) => self.store.set(key, value).await,
            Err(err) => warn!(%key, "binding not mirrored to storage: {err}"),
        }
    }
}

#[async_trait]
impl Coordinator for BackgroundCoordinator {
    async fn data_discovered(&self, tab: TabId, data: Option<PageData>) {
        match data {
            Some(data) => {
                debug!(%tab, method = %data.method, "binding discovery");
                self.persist(&tab_key(tab), &data).await;
                self.persist(LAST_PAGE_DATA_KEY, &data).await;
                self.bindings.insert(tab, data);
                metrics::record_discovery(true);
                self.badge.apply(Some(tab), BadgeState::Ready);
            }
            None => {
                debug!(%tab, "clearing binding on negative signal");
                self.bindings.remove(&tab);
                self.store.remove(&tab_key(tab)).await;
                metrics::record_discovery(false);
                self.badge.apply(Some(tab), BadgeState::Empty);
            }
        }
        metrics::set_binding_count(self.bindings.len());
    }

    async fn tab_removed(&self, tab: TabId) {
        self.bindings.remove(&tab);
        self.store.remove(&tab_key(tab)).await;
        if let Some(prior) = self.scheduled.remove(&tab) {
            prior.1.cancel();
        }
        metrics::set_binding_count(self.bindings.len());
        if let Some(active) = self.tabs.active_tab().await {
            self.refresh_badge(active).await;
        }
    }

    async fn tab_activated(&self, tab: TabId) {
        self.refresh_badge(tab).await;
        if let Err(err) = self.tabs.request_redetect(tab).await {
            // The tab may have no relay yet (chrome pages, mid-navigation).
            debug!(%tab, "redetect request dropped: {err}");
        }
    }

    async fn tab_updated(&self, tab: TabId, load_complete: bool) {
        if !load_complete {
            return;
        }
        if let Some(prior) = self.scheduled.remove(&tab) {
            prior.1.cancel();
        }
        let token = CancellationToken::new();
        self.scheduled.insert(tab, token.clone());

        let bindings = Arc::clone(&self.bindings);
        let badge = Arc::clone(&self.badge);
        let delays = self.config.badge_recheck_delays.clone();
        tokio::spawn(async move {
            let mut elapsed = std::time::Duration::ZERO;
            for delay in delays {
                let wait = delay.saturating_sub(elapsed);
                elapsed = elapsed.max(delay);
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = sleep(wait) => {}
                }
                let state = if bindings.contains_key(&tab) {
                    BadgeState::Ready
                } else {
                    BadgeState::Empty
                };
                badge.apply(Some(tab), state);
            }
        });
    }

    async fn copied_info(&self) -> Option<CopiedSnapshot> {
        self.store
            .get(COPIED_PAGE_DATA_KEY)
            .await
            .and_then(|value| serde_json::from_value(value).ok())
    }

    async fn copy_info(&self, data: PageData) -> CopiedSnapshot {
        let snapshot = CopiedSnapshot::capture(data);
        match serde_json::to_value(&snapshot) {
            Ok(value) => self.store.set(COPIED_PAGE_DATA_KEY, value).await,
            Err(err) => warn!("copied snapshot not mirrored to storage: {err}"),
        }
        snapshot
    }

    async fn sweep(&self) -> usize {
        let live = self.tabs.live_tabs().await;
        let mut removed = 0usize;
        for key in self.store.keys().await {
            let Some(tab) = parse_tab_key(&key) else {
                continue;
            };
            if live.contains(&tab) {
                continue;
            }
            self.store.remove(&key).await;
            self.bindings.remove(&tab);
            removed += 1;
        }
        // In-memory bindings that never made it to storage die here too.
        let stale: Vec<TabId> = self
            .bindings
            .iter()
            .map(|entry| *entry.key())
            .filter(|tab| !live.contains(tab))
            .collect();
        for tab in stale {
            self.bindings.remove(&tab);
        }
        if removed > 0 {
            debug!(removed, "sweep removed stale bindings");
            metrics::record_sweep_removed(removed);
        }
        metrics::set_binding_count(self.bindings.len());
        removed
    }
}
