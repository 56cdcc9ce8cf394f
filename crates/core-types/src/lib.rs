use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Shared error type for the PageLift pipeline crates.
#[derive(Debug, Error, Clone)]
pub enum LiftError {
    #[error("{message}")]
    Message { message: String },
}

impl LiftError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }
}

/// Browser-assigned tab identifier.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TabId(pub i64);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlation token pairing a relayed command with its eventual response.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct CallbackId(pub Uuid);

impl CallbackId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallbackId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which heuristic produced a detection record.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    EmbeddedState,
    GlobalScan,
    DomAttribute,
    DeepScan,
    ScriptRegex,
    SignatureMatch,
    UrlMatch,
}

impl DetectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionMethod::EmbeddedState => "embedded_state",
            DetectionMethod::GlobalScan => "global_scan",
            DetectionMethod::DomAttribute => "dom_attribute",
            DetectionMethod::DeepScan => "deep_scan",
            DetectionMethod::ScriptRegex => "script_regex",
            DetectionMethod::SignatureMatch => "signature_match",
            DetectionMethod::UrlMatch => "url_match",
        }
    }
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit of information the prober produces for a page.
///
/// A record carrying both keys is "complete" and is the only kind eligible
/// as a clone source. A record with only `platform_detected` set is
/// informational: the platform was recognised but the page state has not
/// surfaced its keys yet.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PageData {
    pub funnel_id: Option<String>,
    pub step_id: Option<String>,
    pub platform_detected: bool,
    pub method: DetectionMethod,
    pub url: String,
}

impl PageData {
    pub fn complete(
        funnel_id: impl Into<String>,
        step_id: impl Into<String>,
        method: DetectionMethod,
        url: impl Into<String>,
    ) -> Self {
        Self {
            funnel_id: Some(funnel_id.into()),
            step_id: Some(step_id.into()),
            platform_detected: true,
            method,
            url: url.into(),
        }
    }

    pub fn partial(method: DetectionMethod, url: impl Into<String>) -> Self {
        Self {
            funnel_id: None,
            step_id: None,
            platform_detected: true,
            method,
            url: url.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.funnel_id.is_some() && self.step_id.is_some()
    }
}

/// The single "clipboard slot": one page record chosen by the user as the
/// paste source, stamped with the time it was captured.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CopiedSnapshot {
    pub data: PageData,
    pub copied_at_ms: u64,
}

impl CopiedSnapshot {
    pub fn capture(data: PageData) -> Self {
        Self {
            data,
            copied_at_ms: unix_time_ms(),
        }
    }
}

pub fn unix_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|dur| dur.as_millis() as u64)
        .unwrap_or(0)
}

/// Durable storage key for a per-tab binding.
pub const TAB_KEY_PREFIX: &str = "tab_";
/// Durable storage key for the most recent record seen on any tab.
pub const LAST_PAGE_DATA_KEY: &str = "lastPageData";
/// Durable storage key for the copied snapshot slot.
pub const COPIED_PAGE_DATA_KEY: &str = "copiedPageData";

pub fn tab_key(tab: TabId) -> String {
    format!("{}{}", TAB_KEY_PREFIX, tab.0)
}

pub fn parse_tab_key(key: &str) -> Option<TabId> {
    key.strip_prefix(TAB_KEY_PREFIX)
        .and_then(|raw| raw.parse::<i64>().ok())
        .map(TabId)
}
