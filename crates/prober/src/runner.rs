use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, warn};

use pagelift_core_types::PageData;
use pagelift_message_bus::protocol::{ActionOutcome, PageEnvelope, PageKind, PageSource};
use pagelift_message_bus::{EventBus, InMemoryBus};

use crate::clone::{perform_clone, DestinationRef};
use crate::detect::{default_detectors, detect_with, Detector};
use crate::model::PageContext;
use crate::overlay::OverlayPort;
use crate::schedule::RetrySchedule;

#[derive(Clone, Debug, Default)]
pub struct ProbeConfig {
    pub schedule: RetrySchedule,
}

/// Drives detection over the retry schedule and answers relayed commands.
///
/// One runner lives per injected page. The terminal flag stops ticking
/// after a complete record or schedule exhaustion; an explicit redetect
/// bumps the generation counter, which both resets the flag and invalidates
/// any in-flight detection pass.
pub struct ProbeRunner {
    ctx: Arc<PageContext>,
    bus: Arc<InMemoryBus<PageEnvelope>>,
    overlay: Arc<dyn OverlayPort>,
    config: ProbeConfig,
    detectors: Vec<Box<dyn Detector>>,
    terminal: AtomicBool,
    generation: AtomicU64,
}

impl ProbeRunner {
    pub fn new(
        ctx: Arc<PageContext>,
        bus: Arc<InMemoryBus<PageEnvelope>>,
        overlay: Arc<dyn OverlayPort>,
        config: ProbeConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            bus,
            overlay,
            config,
            detectors: default_detectors(),
            terminal: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal.load(Ordering::SeqCst)
    }

    /// Start the detection pass and the command loop. The command
    /// subscription is taken before detection starts so an early redetect
    /// cannot slip past the runner.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let mut rx = self.bus.subscribe();
        let runner = Arc::clone(self);
        runner.start_detection();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(env) if env.from == PageSource::Relay => runner.handle_command(env).await,
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "probe command loop lagged behind the page bus");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Reset the terminal flag and restart the schedule from tick zero.
    pub fn redetect(self: &Arc<Self>) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.terminal.store(false, Ordering::SeqCst);
        self.start_detection();
    }

    fn start_detection(self: &Arc<Self>) {
        let runner = Arc::clone(self);
        let generation = runner.generation.load(Ordering::SeqCst);
        tokio::spawn(async move {
            runner.run_detection(generation).await;
        });
    }

    async fn run_detection(&self, generation: u64) {
        let mut last: Option<PageData> = None;
        let mut emitted_last_tick = false;
        for wait in self.config.schedule.intervals() {
            if !wait.is_zero() {
                sleep(wait).await;
            }
            if self.generation.load(Ordering::SeqCst) != generation {
                return;
            }
            match detect_with(&self.ctx, &self.detectors) {
                Some(found) if found.is_complete() => {
                    self.emit(Some(&found)).await;
                    self.terminal.store(true, Ordering::SeqCst);
                    return;
                }
                Some(found) => {
                    // Partial results are re-emitted on every tick they
                    // recur, keeping the badge alive while the page is
                    // still loading its state.
                    self.emit(Some(&found)).await;
                    last = Some(found);
                    emitted_last_tick = true;
                }
                None => {
                    last = None;
                    emitted_last_tick = false;
                }
            }
        }
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        // Exhausted: surface the final result (the explicit negative signal
        // included) unless the last tick already emitted it.
        if !emitted_last_tick {
            self.emit(last.as_ref()).await;
        }
        self.terminal.store(true, Ordering::SeqCst);
    }

    async fn emit(&self, data: Option<&PageData>) {
        if let Err(err) = self.bus.publish(PageEnvelope::data_discovered(data)).await {
            debug!("no relay listening for discovery: {err}");
        }
    }

    async fn handle_command(self: &Arc<Self>, env: PageEnvelope) {
        match env.kind {
            PageKind::Redetect => self.redetect(),
            PageKind::PerformPaste => {
                let Some(callback_id) = env.callback_id else {
                    warn!("paste command without a correlation id, dropping");
                    return;
                };
                let outcome = match env
                    .payload
                    .and_then(|payload| serde_json::from_value::<PageData>(payload).ok())
                {
                    Some(snapshot) => {
                        match perform_clone(&self.ctx, &snapshot, self.overlay.as_ref()).await {
                            Ok(()) => ActionOutcome::ok(),
                            Err(err) => ActionOutcome::err(err.to_string()),
                        }
                    }
                    None => ActionOutcome::err("malformed snapshot payload"),
                };
                self.respond(callback_id, outcome).await;
            }
            PageKind::CheckBuilder => {
                let Some(callback_id) = env.callback_id else {
                    return;
                };
                let outcome = if DestinationRef::parse(&self.ctx.url).is_some() {
                    ActionOutcome::ok()
                } else {
                    ActionOutcome::err("not on a builder page")
                };
                self.respond(callback_id, outcome).await;
            }
            PageKind::DataDiscovered | PageKind::ActionResult => {}
        }
    }

    async fn respond(&self, callback_id: pagelift_core_types::CallbackId, outcome: ActionOutcome) {
        if let Err(err) = self
            .bus
            .publish(PageEnvelope::action_result(callback_id, &outcome))
            .await
        {
            debug!("no relay listening for action result: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScriptTag;
    use crate::overlay::NoopOverlay;
    use std::time::Duration;
    use tokio::time::timeout;

    fn complete_ctx() -> Arc<PageContext> {
        Arc::new(
            PageContext::new("https://app.gohighlevel.com/x").with_global(
                "funnelData",
                serde_json::json!({"funnel_id": "f1", "step_id": "s1"}),
            ),
        )
    }

    async fn next_discovery(
        rx: &mut tokio::sync::broadcast::Receiver<PageEnvelope>,
    ) -> Option<PageEnvelope> {
        loop {
            match timeout(Duration::from_millis(500), rx.recv()).await {
                Ok(Ok(env))
                    if env.from == PageSource::Prober && env.kind == PageKind::DataDiscovered =>
                {
                    return Some(env)
                }
                Ok(Ok(_)) => continue,
                _ => return None,
            }
        }
    }

    #[tokio::test]
    async fn complete_detection_goes_terminal_after_one_emission() {
        let bus = InMemoryBus::new(16);
        let mut rx = bus.subscribe();
        let runner = ProbeRunner::new(
            complete_ctx(),
            Arc::clone(&bus),
            Arc::new(NoopOverlay),
            ProbeConfig {
                schedule: RetrySchedule::immediate(5),
            },
        );
        runner.spawn();

        let first = next_discovery(&mut rx).await.expect("one emission");
        assert!(first.payload.is_some());
        assert!(next_discovery(&mut rx).await.is_none());
        assert!(runner.is_terminal());
    }

    #[tokio::test]
    async fn redetect_resets_the_terminal_flag() {
        let bus = InMemoryBus::new(16);
        let mut rx = bus.subscribe();
        let runner = ProbeRunner::new(
            complete_ctx(),
            Arc::clone(&bus),
            Arc::new(NoopOverlay),
            ProbeConfig {
                schedule: RetrySchedule::immediate(1),
            },
        );
        runner.spawn();
        assert!(next_discovery(&mut rx).await.is_some());

        bus.publish(PageEnvelope::redetect()).await.unwrap();
        assert!(next_discovery(&mut rx).await.is_some());
    }

    #[tokio::test]
    async fn partial_results_re_emit_each_tick_without_a_trailing_duplicate() {
        let bus = InMemoryBus::new(32);
        let mut rx = bus.subscribe();
        let ctx = Arc::new(PageContext::new("https://customdomain.example").with_script(
            ScriptTag::external("https://widgets.leadconnectorhq.com/loader.js"),
        ));
        let runner = ProbeRunner::new(
            ctx,
            Arc::clone(&bus),
            Arc::new(NoopOverlay),
            ProbeConfig {
                schedule: RetrySchedule::immediate(3),
            },
        );
        runner.spawn();

        let mut emissions = 0;
        while let Some(env) = next_discovery(&mut rx).await {
            assert!(env.payload.is_some());
            emissions += 1;
        }
        assert_eq!(emissions, 3);
        assert!(runner.is_terminal());
    }

    #[tokio::test]
    async fn unrecognised_page_emits_a_single_negative_signal() {
        let bus = InMemoryBus::new(16);
        let mut rx = bus.subscribe();
        let runner = ProbeRunner::new(
            Arc::new(PageContext::new("https://example.com")),
            Arc::clone(&bus),
            Arc::new(NoopOverlay),
            ProbeConfig {
                schedule: RetrySchedule::immediate(4),
            },
        );
        runner.spawn();

        let negative = next_discovery(&mut rx).await.expect("negative signal");
        assert!(negative.payload.is_none());
        assert!(next_discovery(&mut rx).await.is_none());
        assert!(runner.is_terminal());
    }
}
