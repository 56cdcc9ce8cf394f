//! Content relay: the isolated middle context between the injected prober
//! and the background coordinator.
//!
//! The relay owns no business logic. It bootstraps the prober into the
//! page, forwards messages across the two buses, and keeps the pending
//! table pairing relayed commands with their eventual responses. Every
//! extension-API call is wrapped so a dead context degrades to a no-op.

pub mod errors;
pub mod observer;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, warn};

use pagelift_core_types::{CallbackId, LiftError, PageData, TabId};
use pagelift_message_bus::protocol::{
    ActionOutcome, ExtensionEnvelope, ExtensionKind, ExtensionSource, PageEnvelope, PageKind,
    PageSource,
};
use pagelift_message_bus::{payload::sanitize, EventBus, InMemoryBus};

use crate::errors::RelayError;

/// Timing knobs for the relay, all substitutable in tests.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Delay between injection attempts while the document body is absent.
    pub inject_retry_delay: Duration,
    pub inject_max_attempts: usize,
    /// Settling delay before the churn observer starts watching.
    pub settle_delay: Duration,
    /// Quiet window collapsing a burst of added scripts into one redetect.
    pub churn_debounce: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            inject_retry_delay: Duration::from_millis(100),
            inject_max_attempts: 50,
            settle_delay: Duration::from_millis(1000),
            churn_debounce: Duration::from_millis(500),
        }
    }
}

/// Outcome of one injection attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InjectOutcome {
    Injected,
    /// The document body is not available yet; try again shortly.
    NotReady,
}

/// Puts the prober script into the page, exactly once per page lifetime.
/// Implementations guard against double-injection with a marker element.
#[async_trait]
pub trait ProberBootstrap: Send + Sync {
    async fn inject(&self) -> Result<InjectOutcome, LiftError>;
    /// Remove the injected prober so a fresh inject resets its module scope.
    async fn eject(&self);
}

/// The relay's view of the background coordinator over the extension bus.
#[async_trait]
pub trait BackgroundPort: Send + Sync {
    /// Request/response round trip (the async keep-channel-open path).
    async fn request(&self, env: ExtensionEnvelope) -> Result<Option<Value>, LiftError>;
    /// Fire-and-forget notification.
    async fn notify(&self, env: ExtensionEnvelope) -> Result<(), LiftError>;
}

pub struct ContentRelay {
    page_bus: Arc<InMemoryBus<PageEnvelope>>,
    background: Arc<dyn BackgroundPort>,
    bootstrap: Arc<dyn ProberBootstrap>,
    config: RelayConfig,
    pending: DashMap<CallbackId, oneshot::Sender<ActionOutcome>>,
    tab: RwLock<Option<TabId>>,
    injected: AtomicBool,
}

impl ContentRelay {
    pub fn new(
        page_bus: Arc<InMemoryBus<PageEnvelope>>,
        background: Arc<dyn BackgroundPort>,
        bootstrap: Arc<dyn ProberBootstrap>,
        config: RelayConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            page_bus,
            background,
            bootstrap,
            config,
            pending: DashMap::new(),
            tab: RwLock::new(None),
            injected: AtomicBool::new(false),
        })
    }

    /// Inject the prober and start forwarding page-bus traffic. The bus
    /// subscription is taken before injection so the prober's very first
    /// emission cannot slip past the relay.
    pub async fn start(self: &Arc<Self>) -> Result<JoinHandle<()>, RelayError> {
        let mut rx = self.page_bus.subscribe();
        self.ensure_injected().await?;
        let relay = Arc::clone(self);
        Ok(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(env) if env.from == PageSource::Prober => relay.on_page_message(env).await,
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "relay lagged behind the page bus");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }))
    }

    async fn ensure_injected(&self) -> Result<(), RelayError> {
        if self.injected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        for _ in 0..self.config.inject_max_attempts {
            match self.bootstrap.inject().await {
                Ok(InjectOutcome::Injected) => return Ok(()),
                Ok(InjectOutcome::NotReady) => sleep(self.config.inject_retry_delay).await,
                Err(err) => {
                    warn!("prober injection failed: {err}");
                    self.injected.store(false, Ordering::SeqCst);
                    return Err(RelayError::InjectionFailed);
                }
            }
        }
        self.injected.store(false, Ordering::SeqCst);
        Err(RelayError::InjectionFailed)
    }

    /// Handle a command arriving over the extension bus (popup or
    /// background). Unknown kinds are ignored; this context never throws
    /// back across the boundary.
    pub async fn handle(self: &Arc<Self>, env: ExtensionEnvelope) -> Option<Value> {
        match env.kind {
            ExtensionKind::Redetect => {
                self.redetect().await;
                None
            }
            ExtensionKind::Paste { snapshot } => {
                let outcome = self
                    .forward_action(|id| {
                        let payload = sanitize(&snapshot).unwrap_or(Value::Null);
                        PageEnvelope::perform_paste(id, payload)
                    })
                    .await;
                sanitize(&outcome)
            }
            ExtensionKind::CheckBuilder => {
                let outcome = self.forward_action(PageEnvelope::check_builder).await;
                sanitize(&outcome)
            }
            _ => None,
        }
    }

    /// Force a fresh probe: re-inject for a clean module scope when the
    /// prober is gone, otherwise post a redetect command into the page.
    pub async fn redetect(self: &Arc<Self>) {
        if self.injected.load(Ordering::SeqCst) {
            if let Err(err) = self.page_bus.publish(PageEnvelope::redetect()).await {
                debug!("redetect had no prober listening: {err}");
            }
        } else if let Err(err) = self.ensure_injected().await {
            warn!("redetect could not re-inject the prober: {err}");
        }
    }

    async fn forward_action(
        &self,
        build: impl FnOnce(CallbackId) -> PageEnvelope,
    ) -> ActionOutcome {
        let callback_id = CallbackId::new();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(callback_id, tx);
        if let Err(err) = self.page_bus.publish(build(callback_id)).await {
            self.pending.remove(&callback_id);
            warn!("page context unavailable for relayed command: {err}");
            return ActionOutcome::err("page context unavailable");
        }
        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => ActionOutcome::err("relay torn down before a response arrived"),
        }
    }

    async fn on_page_message(self: &Arc<Self>, env: PageEnvelope) {
        match env.kind {
            PageKind::DataDiscovered => {
                let data = env
                    .payload
                    .and_then(|payload| serde_json::from_value::<PageData>(payload).ok());
                let Some(tab) = self.resolve_tab().await else {
                    warn!("dropping discovery: tab identity unresolved");
                    return;
                };
                let notify = ExtensionEnvelope::new(
                    ExtensionSource::Relay,
                    ExtensionKind::DataDiscovered { tab, data },
                );
                if let Err(err) = self.background.notify(notify).await {
                    // Context invalidation (tab closing mid-send) is not an
                    // error the user ever sees.
                    debug!("discovery notify dropped: {err}");
                }
            }
            PageKind::ActionResult => {
                let Some(callback_id) = env.callback_id else {
                    return;
                };
                let Some((_, tx)) = self.pending.remove(&callback_id) else {
                    debug!(%callback_id, "response for unknown correlation id");
                    return;
                };
                let outcome = env
                    .payload
                    .and_then(|payload| serde_json::from_value::<ActionOutcome>(payload).ok())
                    .unwrap_or_else(|| ActionOutcome::err("malformed action result"));
                let _ = tx.send(outcome);
            }
            _ => {}
        }
    }

    /// Resolve this context's tab id, caching after the first round trip.
    async fn resolve_tab(&self) -> Option<TabId> {
        if let Some(tab) = *self.tab.read() {
            return Some(tab);
        }
        let env = ExtensionEnvelope::new(ExtensionSource::Relay, ExtensionKind::ResolveTab);
        match self.background.request(env).await {
            Ok(Some(value)) => match serde_json::from_value::<TabId>(value) {
                Ok(tab) => {
                    *self.tab.write() = Some(tab);
                    Some(tab)
                }
                Err(err) => {
                    warn!("malformed tab identity response: {err}");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                debug!("tab identity request dropped: {err}");
                None
            }
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Context teardown: eject the prober and sweep the pending table.
    /// Waiters still holding a correlation id observe a terminal error
    /// outcome instead of hanging.
    pub async fn shutdown(&self) {
        self.bootstrap.eject().await;
        self.injected.store(false, Ordering::SeqCst);
        self.pending.clear();
    }
}
