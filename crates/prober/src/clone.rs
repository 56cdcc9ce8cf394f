//! The one privileged remote action: cloning a funnel step into the page
//! currently open in the builder, through the host application's own
//! authenticated network client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use pagelift_core_types::{LiftError, PageData};

use crate::errors::CloneError;
use crate::metrics;
use crate::model::PageContext;
use crate::overlay::{OverlayPort, ERROR_DISMISS, SUCCESS_DISMISS};

/// Status the host clone endpoint reports on success.
pub const CLONE_SUCCESS_STATUS: u16 = 200;

/// Metadata the host returns for a step in the current workspace.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepMetadata {
    pub funnel_id: String,
}

/// Fixed parameter shape of the host's internal clone endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CloneParams {
    pub source_funnel_id: String,
    pub source_step_id: String,
    pub dest_location_id: String,
    pub dest_funnel_id: String,
    pub dest_step_id: String,
    pub user_id: String,
}

/// The host application's internal network client, reached through its
/// documented runtime handle. Absence of the handle is a hard failure of
/// the clone action, never of detection.
#[async_trait]
pub trait HostClient: Send + Sync {
    async fn step_metadata(
        &self,
        location_id: &str,
        step_id: &str,
    ) -> Result<StepMetadata, LiftError>;

    /// Invoke the clone endpoint; returns the host-reported status code.
    /// Failed transport reports as status 0.
    async fn clone_step(&self, params: &CloneParams) -> Result<u16, LiftError>;
}

/// The host's documented runtime utility for the signed-in user.
pub trait UserResolver: Send + Sync {
    fn current_user_id(&self) -> Option<String>;
}

/// Destination context parsed out of the builder page URL.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DestinationRef {
    pub location_id: String,
    pub step_id: String,
}

impl DestinationRef {
    /// Parse the workspace and destination-step identifiers from a builder
    /// URL, e.g. `/v2/location/<loc>/funnels-websites/funnels/<f>/steps/<s>`.
    pub fn parse(url: &str) -> Option<Self> {
        let parsed = Url::parse(url).ok()?;
        let segments: Vec<&str> = parsed.path_segments()?.filter(|s| !s.is_empty()).collect();
        let location_id = value_after(&segments, &["location"])?;
        let step_id = value_after(&segments, &["steps", "step"])?;
        Some(Self {
            location_id: location_id.to_string(),
            step_id: step_id.to_string(),
        })
    }
}

fn value_after<'a>(segments: &[&'a str], markers: &[&str]) -> Option<&'a str> {
    segments
        .windows(2)
        .find(|pair| markers.contains(&pair[0]))
        .map(|pair| pair[1])
}

/// Clone `source` into the step currently open on this page.
///
/// Precondition failures and host failures alike are rendered through the
/// overlay and returned as a structured error; this function never panics
/// and performs no host calls for an incomplete source.
pub async fn perform_clone(
    ctx: &PageContext,
    source: &PageData,
    overlay: &dyn OverlayPort,
) -> Result<(), CloneError> {
    let (source_funnel, source_step) = match (&source.funnel_id, &source.step_id) {
        (Some(funnel), Some(step)) => (funnel.clone(), step.clone()),
        _ => {
            metrics::record_clone(false);
            return Err(CloneError::MissingSourceKeys);
        }
    };

    overlay.show_loading();
    let result = run_clone(ctx, source_funnel, source_step).await;
    match &result {
        Ok(()) => {
            metrics::record_clone(true);
            overlay.show_success("Page copied into this step", SUCCESS_DISMISS);
            overlay.reload_builder();
        }
        Err(err) => {
            metrics::record_clone(false);
            warn!("clone action failed: {err}");
            overlay.show_error(&err.to_string(), ERROR_DISMISS);
        }
    }
    result
}

async fn run_clone(
    ctx: &PageContext,
    source_funnel: String,
    source_step: String,
) -> Result<(), CloneError> {
    let dest = DestinationRef::parse(&ctx.url).ok_or(CloneError::NotOnValidDestination)?;
    let client = ctx
        .host_client
        .as_ref()
        .ok_or(CloneError::DestinationUnresolvable)?;

    let meta = client
        .step_metadata(&dest.location_id, &dest.step_id)
        .await
        .map_err(|err| {
            debug!("destination metadata request failed: {err}");
            CloneError::DestinationUnresolvable
        })?;

    let user_id = ctx
        .user_resolver
        .as_ref()
        .and_then(|resolver| resolver.current_user_id())
        .ok_or(CloneError::UserUnresolvable)?;

    let params = CloneParams {
        source_funnel_id: source_funnel,
        source_step_id: source_step,
        dest_location_id: dest.location_id,
        dest_funnel_id: meta.funnel_id,
        dest_step_id: dest.step_id,
        user_id,
    };
    let status = client
        .clone_step(&params)
        .await
        .unwrap_or(0);
    if status != CLONE_SUCCESS_STATUS {
        return Err(CloneError::CloneRequestFailed { status });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use pagelift_core_types::DetectionMethod;

    use crate::overlay::{OverlayEvent, RecordingOverlay};

    const BUILDER_URL: &str =
        "https://app.gohighlevel.com/v2/location/loc9/funnels-websites/funnels/fD/steps/sD";

    struct FakeClient {
        metadata_calls: AtomicUsize,
        clone_status: u16,
    }

    impl FakeClient {
        fn new(clone_status: u16) -> Arc<Self> {
            Arc::new(Self {
                metadata_calls: AtomicUsize::new(0),
                clone_status,
            })
        }
    }

    #[async_trait]
    impl HostClient for FakeClient {
        async fn step_metadata(
            &self,
            _location_id: &str,
            _step_id: &str,
        ) -> Result<StepMetadata, LiftError> {
            self.metadata_calls.fetch_add(1, Ordering::SeqCst);
            Ok(StepMetadata {
                funnel_id: "fD".into(),
            })
        }

        async fn clone_step(&self, _params: &CloneParams) -> Result<u16, LiftError> {
            Ok(self.clone_status)
        }
    }

    struct FixedUser;

    impl UserResolver for FixedUser {
        fn current_user_id(&self) -> Option<String> {
            Some("user-1".into())
        }
    }

    fn complete_source() -> PageData {
        PageData::complete("fS", "sS", DetectionMethod::GlobalScan, "https://src")
    }

    #[test]
    fn destination_parses_from_builder_url() {
        let dest = DestinationRef::parse(BUILDER_URL).unwrap();
        assert_eq!(dest.location_id, "loc9");
        assert_eq!(dest.step_id, "sD");
        assert!(DestinationRef::parse("https://example.com/dashboard").is_none());
    }

    #[tokio::test]
    async fn incomplete_source_fails_before_any_host_call() {
        let client = FakeClient::new(CLONE_SUCCESS_STATUS);
        let ctx = PageContext::new(BUILDER_URL)
            .with_host_client(client.clone())
            .with_user_resolver(Arc::new(FixedUser));
        let source = PageData::partial(DetectionMethod::UrlMatch, "https://src");
        let overlay = RecordingOverlay::new();

        let err = perform_clone(&ctx, &source, &overlay).await.unwrap_err();
        assert_eq!(err, CloneError::MissingSourceKeys);
        assert_eq!(client.metadata_calls.load(Ordering::SeqCst), 0);
        assert!(overlay.events().is_empty());
    }

    #[tokio::test]
    async fn absent_host_client_is_destination_unresolvable() {
        let ctx = PageContext::new(BUILDER_URL).with_user_resolver(Arc::new(FixedUser));
        let overlay = RecordingOverlay::new();

        let err = perform_clone(&ctx, &complete_source(), &overlay)
            .await
            .unwrap_err();
        assert_eq!(err, CloneError::DestinationUnresolvable);
        assert_eq!(
            overlay.events(),
            vec![
                OverlayEvent::Loading,
                OverlayEvent::Error("destination unresolvable".into())
            ]
        );
    }

    #[tokio::test]
    async fn wrong_page_is_not_a_valid_destination() {
        let ctx = PageContext::new("https://app.gohighlevel.com/v2/dashboard")
            .with_host_client(FakeClient::new(CLONE_SUCCESS_STATUS));
        let overlay = RecordingOverlay::new();

        let err = perform_clone(&ctx, &complete_source(), &overlay)
            .await
            .unwrap_err();
        assert_eq!(err, CloneError::NotOnValidDestination);
    }

    #[tokio::test]
    async fn missing_user_is_user_unresolvable() {
        let ctx = PageContext::new(BUILDER_URL).with_host_client(FakeClient::new(200));
        let overlay = RecordingOverlay::new();

        let err = perform_clone(&ctx, &complete_source(), &overlay)
            .await
            .unwrap_err();
        assert_eq!(err, CloneError::UserUnresolvable);
    }

    #[tokio::test]
    async fn non_success_status_surfaces_in_the_error() {
        let ctx = PageContext::new(BUILDER_URL)
            .with_host_client(FakeClient::new(403))
            .with_user_resolver(Arc::new(FixedUser));
        let overlay = RecordingOverlay::new();

        let err = perform_clone(&ctx, &complete_source(), &overlay)
            .await
            .unwrap_err();
        assert_eq!(err, CloneError::CloneRequestFailed { status: 403 });
    }

    #[tokio::test]
    async fn successful_clone_reloads_the_builder() {
        let ctx = PageContext::new(BUILDER_URL)
            .with_host_client(FakeClient::new(CLONE_SUCCESS_STATUS))
            .with_user_resolver(Arc::new(FixedUser));
        let overlay = RecordingOverlay::new();

        perform_clone(&ctx, &complete_source(), &overlay)
            .await
            .unwrap();
        assert_eq!(
            overlay.events(),
            vec![
                OverlayEvent::Loading,
                OverlayEvent::Success("Page copied into this step".into()),
                OverlayEvent::Reload
            ]
        );
    }
}
