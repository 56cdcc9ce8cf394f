//! Envelope contracts for the two messaging boundaries.
//!
//! The page bus carries untyped structured messages between the prober and
//! the relay; the extension bus carries request/response messages between
//! the relay, the popup, and the background coordinator. Both sides tag
//! every message with a `from` discriminator so a context can ignore its
//! own echoes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use pagelift_core_types::{CallbackId, PageData, TabId};

use crate::payload::sanitize;

/// Sender discriminator on the page bus.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum PageSource {
    Prober,
    Relay,
}

/// Message kinds exchanged over the page bus.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PageKind {
    DataDiscovered,
    PerformPaste,
    CheckBuilder,
    Redetect,
    ActionResult,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PageEnvelope {
    pub from: PageSource,
    pub kind: PageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_id: Option<CallbackId>,
    pub payload: Option<Value>,
}

impl PageEnvelope {
    /// Prober -> relay: a detection result, or an explicit negative signal
    /// when `data` is `None`. The payload is sanitised before posting; a
    /// value that cannot cross the boundary degrades to null rather than
    /// aborting the send.
    pub fn data_discovered(data: Option<&PageData>) -> Self {
        let payload = data.and_then(sanitize);
        Self {
            from: PageSource::Prober,
            kind: PageKind::DataDiscovered,
            callback_id: None,
            payload,
        }
    }

    pub fn perform_paste(callback_id: CallbackId, snapshot: Value) -> Self {
        Self {
            from: PageSource::Relay,
            kind: PageKind::PerformPaste,
            callback_id: Some(callback_id),
            payload: Some(snapshot),
        }
    }

    pub fn check_builder(callback_id: CallbackId) -> Self {
        Self {
            from: PageSource::Relay,
            kind: PageKind::CheckBuilder,
            callback_id: Some(callback_id),
            payload: None,
        }
    }

    pub fn redetect() -> Self {
        Self {
            from: PageSource::Relay,
            kind: PageKind::Redetect,
            callback_id: None,
            payload: None,
        }
    }

    pub fn action_result(callback_id: CallbackId, outcome: &ActionOutcome) -> Self {
        Self {
            from: PageSource::Prober,
            kind: PageKind::ActionResult,
            callback_id: Some(callback_id),
            payload: sanitize(outcome),
        }
    }
}

/// Result payload reported back for a relayed command.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionOutcome {
    pub fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(message.into()),
        }
    }
}

/// Sender discriminator on the extension bus.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ExtensionSource {
    Relay,
    Popup,
    Background,
}

/// Request kinds on the extension bus. Responses travel back on the
/// per-request channel the platform keeps open for async handlers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExtensionKind {
    /// Relay -> background: forwarded detection result with tab context.
    DataDiscovered {
        tab: TabId,
        data: Option<PageData>,
    },
    /// Relay -> background: "which tab am I?" round trip, cached afterwards.
    ResolveTab,
    /// Popup -> background: read the copied snapshot slot.
    GetCopied,
    /// Popup -> background: overwrite the copied snapshot slot.
    CopyData { data: PageData },
    /// Background/popup -> relay: force a fresh probe of the page.
    Redetect,
    /// Popup -> relay: forward a stored snapshot into the page for cloning.
    Paste { snapshot: PageData },
    /// Popup -> relay: ask whether the page resolves as a paste destination.
    CheckBuilder,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExtensionEnvelope {
    pub from: ExtensionSource,
    #[serde(flatten)]
    pub kind: ExtensionKind,
}

impl ExtensionEnvelope {
    pub fn new(from: ExtensionSource, kind: ExtensionKind) -> Self {
        Self { from, kind }
    }
}
