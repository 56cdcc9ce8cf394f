//! Page-churn observation.
//!
//! The host platform is a client-rendered single-page application that can
//! swap its internal state whenever additional scripts land after a soft
//! navigation. The observer watches for added `<script>` nodes, collapses
//! bursts behind a quiet window, and then asks the prober to run again.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::debug;

use pagelift_message_bus::protocol::PageEnvelope;
use pagelift_message_bus::{EventBus, InMemoryBus};

use crate::RelayConfig;

pub struct ScriptChurnObserver {
    notify_tx: mpsc::UnboundedSender<()>,
    handle: JoinHandle<()>,
}

impl ScriptChurnObserver {
    pub fn spawn(page_bus: Arc<InMemoryBus<PageEnvelope>>, config: RelayConfig) -> Self {
        let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            sleep(config.settle_delay).await;
            loop {
                if notify_rx.recv().await.is_none() {
                    return;
                }
                // Drain the burst: stay quiet until no new script has
                // landed for a full debounce window.
                loop {
                    match timeout(config.churn_debounce, notify_rx.recv()).await {
                        Ok(Some(())) => continue,
                        Ok(None) => return,
                        Err(_) => break,
                    }
                }
                if let Err(err) = page_bus.publish(PageEnvelope::redetect()).await {
                    debug!("churn redetect had no prober listening: {err}");
                }
            }
        });
        Self { notify_tx, handle }
    }

    /// Report one added `<script>` node.
    pub fn script_added(&self) {
        let _ = self.notify_tx.send(());
    }

    pub fn shutdown(self) {
        drop(self.notify_tx);
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use pagelift_message_bus::protocol::{PageKind, PageSource};

    fn fast_config() -> RelayConfig {
        RelayConfig {
            settle_delay: Duration::from_millis(10),
            churn_debounce: Duration::from_millis(30),
            ..RelayConfig::default()
        }
    }

    #[tokio::test]
    async fn a_burst_of_scripts_collapses_into_one_redetect() {
        let bus = InMemoryBus::new(16);
        let mut rx = bus.subscribe();
        let observer = ScriptChurnObserver::spawn(Arc::clone(&bus), fast_config());

        sleep(Duration::from_millis(20)).await;
        observer.script_added();
        observer.script_added();
        observer.script_added();

        let env = timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("redetect published")
            .unwrap();
        assert_eq!(env.kind, PageKind::Redetect);
        assert_eq!(env.from, PageSource::Relay);

        // No second redetect without further churn.
        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());

        observer.script_added();
        let env = timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("second burst publishes again")
            .unwrap();
        assert_eq!(env.kind, PageKind::Redetect);
    }
}
