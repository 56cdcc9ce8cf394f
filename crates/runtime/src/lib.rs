//! In-process wiring of the three contexts.
//!
//! Every seam the production bootstrap fills with browser glue is filled
//! here with an in-memory adapter: the page bus is a broadcast channel per
//! tab, injection spawns a probe runner task, and the extension bus is a
//! direct call into the coordinator. The result is the whole pipeline,
//! runnable and observable without a browser.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::debug;

use pagelift_coordinator::{
    BackgroundCoordinator, BadgePort, Coordinator, CoordinatorConfig, KeyValueStore, MemoryStore,
    NoopBadge, TabDirectory,
};
use pagelift_core_types::{LiftError, TabId};
use pagelift_message_bus::protocol::{
    ExtensionEnvelope, ExtensionKind, ExtensionSource, PageEnvelope,
};
use pagelift_message_bus::InMemoryBus;
use pagelift_prober::{OverlayPort, PageContext, ProbeConfig, ProbeRunner, RetrySchedule};
use pagelift_relay::{
    observer::ScriptChurnObserver, BackgroundPort, ContentRelay, InjectOutcome, ProberBootstrap,
    RelayConfig,
};

/// Extension-bus adapter for one tab's relay: resolves the tab identity
/// locally (the platform knows the sender tab) and hands everything else
/// to the coordinator.
struct CoordinatorLink {
    tab: TabId,
    coordinator: Arc<BackgroundCoordinator>,
}

#[async_trait]
impl BackgroundPort for CoordinatorLink {
    async fn request(&self, env: ExtensionEnvelope) -> Result<Option<Value>, LiftError> {
        match env.kind {
            ExtensionKind::ResolveTab => Ok(Some(json!(self.tab))),
            _ => Ok(self.coordinator.handle(env).await),
        }
    }

    async fn notify(&self, env: ExtensionEnvelope) -> Result<(), LiftError> {
        self.coordinator.handle(env).await;
        Ok(())
    }
}

/// Injection adapter: "injecting the prober" spawns a probe runner task on
/// the tab's page bus. A held runner is the marker guarding double
/// injection; ejecting aborts it so a re-inject starts from a fresh scope.
struct RunnerBootstrap {
    ctx: Arc<PageContext>,
    page_bus: Arc<InMemoryBus<PageEnvelope>>,
    overlay: Arc<dyn OverlayPort>,
    probe: ProbeConfig,
    running: Mutex<Option<(Arc<ProbeRunner>, JoinHandle<()>)>>,
}

#[async_trait]
impl ProberBootstrap for RunnerBootstrap {
    async fn inject(&self) -> Result<InjectOutcome, LiftError> {
        let mut slot = self.running.lock();
        if slot.is_some() {
            return Ok(InjectOutcome::Injected);
        }
        let runner = ProbeRunner::new(
            Arc::clone(&self.ctx),
            Arc::clone(&self.page_bus),
            Arc::clone(&self.overlay),
            self.probe.clone(),
        );
        let handle = runner.spawn();
        *slot = Some((runner, handle));
        Ok(InjectOutcome::Injected)
    }

    async fn eject(&self) {
        if let Some((_, handle)) = self.running.lock().take() {
            handle.abort();
        }
    }
}

/// Live tab population backed by the open relay sessions.
#[derive(Default)]
pub struct RelayTabs {
    relays: DashMap<TabId, Arc<ContentRelay>>,
    active: Mutex<Option<TabId>>,
}

impl RelayTabs {
    fn register(&self, tab: TabId, relay: Arc<ContentRelay>) {
        self.relays.insert(tab, relay);
    }

    fn unregister(&self, tab: TabId) {
        self.relays.remove(&tab);
        let mut active = self.active.lock();
        if *active == Some(tab) {
            *active = None;
        }
    }

    fn set_active(&self, tab: TabId) {
        *self.active.lock() = Some(tab);
    }
}

#[async_trait]
impl TabDirectory for RelayTabs {
    async fn live_tabs(&self) -> Vec<TabId> {
        self.relays.iter().map(|entry| *entry.key()).collect()
    }

    async fn active_tab(&self) -> Option<TabId> {
        *self.active.lock()
    }

    async fn request_redetect(&self, tab: TabId) -> Result<(), LiftError> {
        let relay = self
            .relays
            .get(&tab)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| LiftError::new(format!("no relay listening in tab {tab}")))?;
        let _ = relay
            .handle(ExtensionEnvelope::new(
                ExtensionSource::Background,
                ExtensionKind::Redetect,
            ))
            .await;
        Ok(())
    }
}

/// One open tab: its page bus, relay, and churn observer.
pub struct TabSession {
    pub tab: TabId,
    pub page_bus: Arc<InMemoryBus<PageEnvelope>>,
    pub relay: Arc<ContentRelay>,
    observer: ScriptChurnObserver,
    relay_task: JoinHandle<()>,
}

impl TabSession {
    /// Report page churn (an added `<script>` node) to the observer.
    pub fn script_added(&self) {
        self.observer.script_added();
    }
}

pub struct InProcessRuntime {
    pub coordinator: Arc<BackgroundCoordinator>,
    pub store: Arc<dyn KeyValueStore>,
    tabs: Arc<RelayTabs>,
    sessions: DashMap<TabId, TabSession>,
    relay_config: RelayConfig,
}

impl InProcessRuntime {
    pub async fn new() -> Self {
        Self::with_ports(
            Arc::new(MemoryStore::new()),
            Arc::new(NoopBadge),
            CoordinatorConfig::default(),
        )
        .await
    }

    pub async fn with_ports(
        store: Arc<dyn KeyValueStore>,
        badge: Arc<dyn BadgePort>,
        config: CoordinatorConfig,
    ) -> Self {
        let tabs = Arc::new(RelayTabs::default());
        let coordinator =
            BackgroundCoordinator::new(Arc::clone(&store), badge, tabs.clone(), config);
        coordinator.start().await;
        Self {
            coordinator,
            store,
            tabs,
            sessions: DashMap::new(),
            relay_config: RelayConfig::default(),
        }
    }

    /// Shrink the relay timings; call before opening tabs.
    pub fn set_relay_config(&mut self, config: RelayConfig) {
        self.relay_config = config;
    }

    /// Open a tab on the given page: wire a page bus, inject the prober,
    /// and start relaying. The tab becomes the active one.
    pub async fn open_tab(
        &self,
        tab: TabId,
        ctx: PageContext,
        schedule: RetrySchedule,
        overlay: Arc<dyn OverlayPort>,
    ) -> Result<(), LiftError> {
        let page_bus = InMemoryBus::new(64);
        let bootstrap = Arc::new(RunnerBootstrap {
            ctx: Arc::new(ctx),
            page_bus: Arc::clone(&page_bus),
            overlay,
            probe: ProbeConfig { schedule },
            running: Mutex::new(None),
        });
        let link = Arc::new(CoordinatorLink {
            tab,
            coordinator: Arc::clone(&self.coordinator),
        });
        let relay = ContentRelay::new(
            Arc::clone(&page_bus),
            link,
            bootstrap,
            self.relay_config.clone(),
        );
        let relay_task = relay
            .start()
            .await
            .map_err(|err| LiftError::new(err.to_string()))?;
        let observer = ScriptChurnObserver::spawn(Arc::clone(&page_bus), self.relay_config.clone());

        self.tabs.register(tab, Arc::clone(&relay));
        self.tabs.set_active(tab);
        self.sessions.insert(
            tab,
            TabSession {
                tab,
                page_bus,
                relay,
                observer,
                relay_task,
            },
        );
        self.coordinator.tab_activated(tab).await;
        self.coordinator.tab_updated(tab, true).await;
        Ok(())
    }

    pub fn session(&self, tab: TabId) -> Option<dashmap::mapref::one::Ref<'_, TabId, TabSession>> {
        self.sessions.get(&tab)
    }

    pub async fn close_tab(&self, tab: TabId) {
        if let Some((_, session)) = self.sessions.remove(&tab) {
            session.relay.shutdown().await;
            session.relay_task.abort();
            session.observer.shutdown();
        }
        self.tabs.unregister(tab);
        self.coordinator.tab_removed(tab).await;
    }

    pub async fn activate_tab(&self, tab: TabId) {
        self.tabs.set_active(tab);
        self.coordinator.tab_activated(tab).await;
    }

    /// What the popup does on "copy": take the active tab's current record
    /// and store it in the snapshot slot.
    pub async fn popup_copy(&self, tab: TabId) -> Option<Value> {
        let data = self.coordinator.page_data_for(tab).await?;
        self.coordinator
            .handle(ExtensionEnvelope::new(
                ExtensionSource::Popup,
                ExtensionKind::CopyData { data },
            ))
            .await
    }

    /// What the popup does on "paste": forward the copied snapshot into the
    /// destination tab's page for the clone action. `None` when nothing has
    /// been copied or the tab has no relay.
    pub async fn popup_paste(&self, tab: TabId) -> Option<Value> {
        let snapshot = self.coordinator.copied_info().await?;
        let relay = self
            .sessions
            .get(&tab)
            .map(|session| Arc::clone(&session.relay))?;
        relay
            .handle(ExtensionEnvelope::new(
                ExtensionSource::Popup,
                ExtensionKind::Paste {
                    snapshot: snapshot.data,
                },
            ))
            .await
    }

    pub async fn shutdown(&self) {
        let tabs: Vec<TabId> = self.sessions.iter().map(|entry| *entry.key()).collect();
        for tab in tabs {
            debug!(%tab, "closing session on shutdown");
            self.close_tab(tab).await;
        }
        self.coordinator.stop();
    }
}
