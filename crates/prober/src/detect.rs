//! Ordered detection heuristics for locating the funnel and step keys
//! inside the host platform's runtime state.
//!
//! Each strategy is a pure function over a [`PageContext`]; the walk stops
//! at the first strategy yielding a complete record. The strategies are
//! inherently host-specific pattern lists, kept behind the [`Detector`]
//! seam so synthetic contexts can exercise them one by one.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use tracing::debug;
use url::Url;

use pagelift_core_types::{DetectionMethod, PageData};

use crate::metrics;
use crate::model::PageContext;

/// Script element ids the platform uses for its embedded serialized state.
const STATE_SCRIPT_IDS: &[&str] = &["__FUNNEL_STATE__", "funnel-state"];

/// Inline assignment marker preceding the embedded state blob.
const STATE_ASSIGNMENT_MARKER: &str = "window.__FUNNEL_STATE__";

/// Global variable names known to carry the page state object.
const STATE_GLOBALS: &[&str] = &[
    "__FUNNEL_STATE__",
    "funnelData",
    "appState",
    "__APP_DATA__",
    "pageData",
];

/// Name fragments that qualify a global for the bounded deep scan.
const TOPIC_SUBSTRINGS: &[&str] = &["funnel", "page", "step", "builder"];

const DEEP_SCAN_MAX_DEPTH: usize = 6;

const FUNNEL_ATTRIBUTE: &str = "data-funnel-id";
const STEP_ATTRIBUTE: &str = "data-step-id";

const FUNNEL_KEY_NAMES: &[&str] = &["funnel_id", "funnelId"];
const STEP_KEY_NAMES: &[&str] = &["step_id", "stepId", "page_id", "pageId"];

/// Nested containers probed one level deep when the keys are not direct.
const CHILD_CONTAINERS: &[&str] = &["page", "step", "funnel", "data"];

/// Script/CDN host suffixes that identify the platform even when no keys
/// are recoverable.
const SCRIPT_HOST_SUFFIXES: &[&str] = &[
    "msgsndr.com",
    "leadconnectorhq.com",
    "funnel-preview.com",
];

/// Hostname suffixes of the platform's own application shells.
const PLATFORM_HOST_SUFFIXES: &[&str] = &[
    "app.gohighlevel.com",
    "app.leadconnectorhq.com",
    "funnel-preview.com",
];

lazy_static! {
    /// Regex pairs over inline script bodies, covering the quoting and
    /// naming variants observed in the wild. Both halves of a pair must
    /// match the same script body.
    static ref SCRIPT_REGEX_PAIRS: Vec<(Regex, Regex)> = vec![
        (
            Regex::new(r#""funnel_id"\s*:\s*"([0-9A-Za-z_-]+)""#).unwrap(),
            Regex::new(r#""step_id"\s*:\s*"([0-9A-Za-z_-]+)""#).unwrap(),
        ),
        (
            Regex::new(r#"funnelId\s*[:=]\s*['"]([0-9A-Za-z_-]+)['"]"#).unwrap(),
            Regex::new(r#"(?:stepId|pageId)\s*[:=]\s*['"]([0-9A-Za-z_-]+)['"]"#).unwrap(),
        ),
        (
            Regex::new(r#"funnel_id\s*=\s*'([0-9A-Za-z_-]+)'"#).unwrap(),
            Regex::new(r#"(?:step|page)_id\s*=\s*'([0-9A-Za-z_-]+)'"#).unwrap(),
        ),
    ];
}

/// One detection strategy over the probe surface. Strategies only report
/// complete records; partial platform recognition happens after the walk.
pub trait Detector: Send + Sync {
    fn method(&self) -> DetectionMethod;
    fn probe(&self, ctx: &PageContext) -> Option<PageData>;
}

pub fn default_detectors() -> Vec<Box<dyn Detector>> {
    vec![
        Box::new(EmbeddedStateDetector),
        Box::new(GlobalScanDetector),
        Box::new(DomAttributeDetector),
        Box::new(DeepScanDetector),
        Box::new(ScriptRegexDetector),
    ]
}

/// Run the fixed-priority detection walk.
///
/// Returns a complete record from the first matching strategy, a partial
/// record when only the platform signature (or the page URL) matches, or
/// `None` when nothing on the page looks like the platform.
pub fn detect(ctx: &PageContext) -> Option<PageData> {
    detect_with(ctx, &default_detectors())
}

pub fn detect_with(ctx: &PageContext, detectors: &[Box<dyn Detector>]) -> Option<PageData> {
    for detector in detectors {
        if let Some(found) = detector.probe(ctx) {
            debug!(method = %found.method, "detection produced a complete record");
            metrics::record_detection(found.method);
            return Some(found);
        }
    }
    if has_platform_signature(ctx) {
        metrics::record_detection(DetectionMethod::SignatureMatch);
        return Some(PageData::partial(DetectionMethod::SignatureMatch, &ctx.url));
    }
    if is_platform_url(&ctx.url) {
        metrics::record_detection(DetectionMethod::UrlMatch);
        return Some(PageData::partial(DetectionMethod::UrlMatch, &ctx.url));
    }
    metrics::record_miss();
    None
}

/// Strategy 1: the embedded-state script tag, preferring the documented
/// runtime accessor when the host exposes it.
pub struct EmbeddedStateDetector;

impl Detector for EmbeddedStateDetector {
    fn method(&self) -> DetectionMethod {
        DetectionMethod::EmbeddedState
    }

    fn probe(&self, ctx: &PageContext) -> Option<PageData> {
        if let Some(accessor) = &ctx.state_accessor {
            if let Some(state) = accessor() {
                if let Some((funnel, step)) = extract_keys(&state) {
                    return Some(PageData::complete(funnel, step, self.method(), &ctx.url));
                }
            }
        }
        for script in &ctx.scripts {
            let Some(body) = &script.body else { continue };
            let tagged = script
                .element_id
                .as_deref()
                .map(|id| STATE_SCRIPT_IDS.contains(&id))
                .unwrap_or(false);
            let state = if tagged {
                serde_json::from_str::<Value>(body).ok()
            } else {
                parse_state_assignment(body)
            };
            if let Some((funnel, step)) = state.as_ref().and_then(extract_keys) {
                return Some(PageData::complete(funnel, step, self.method(), &ctx.url));
            }
        }
        None
    }
}

/// Pull the JSON blob out of a `window.__FUNNEL_STATE__ = {...};` body.
fn parse_state_assignment(body: &str) -> Option<Value> {
    let at = body.find(STATE_ASSIGNMENT_MARKER)?;
    let rest = &body[at..];
    let open = rest.find('{')?;
    let close = rest.rfind('}')?;
    if close <= open {
        return None;
    }
    serde_json::from_str(&rest[open..=close]).ok()
}

/// Strategy 2: fixed list of known global variable names.
pub struct GlobalScanDetector;

impl Detector for GlobalScanDetector {
    fn method(&self) -> DetectionMethod {
        DetectionMethod::GlobalScan
    }

    fn probe(&self, ctx: &PageContext) -> Option<PageData> {
        for name in STATE_GLOBALS {
            let Some(value) = ctx.globals.get(*name) else {
                continue;
            };
            if let Some((funnel, step)) = extract_keys(value) {
                return Some(PageData::complete(funnel, step, self.method(), &ctx.url));
            }
        }
        None
    }
}

/// Strategy 3: known data-attributes, collected across elements.
pub struct DomAttributeDetector;

impl Detector for DomAttributeDetector {
    fn method(&self) -> DetectionMethod {
        DetectionMethod::DomAttribute
    }

    fn probe(&self, ctx: &PageContext) -> Option<PageData> {
        let mut funnel = None;
        let mut step = None;
        for element in &ctx.elements {
            if funnel.is_none() {
                funnel = element.attributes.get(FUNNEL_ATTRIBUTE).cloned();
            }
            if step.is_none() {
                step = element.attributes.get(STEP_ATTRIBUTE).cloned();
            }
            if funnel.is_some() && step.is_some() {
                break;
            }
        }
        match (funnel, step) {
            (Some(funnel), Some(step)) => {
                Some(PageData::complete(funnel, step, self.method(), &ctx.url))
            }
            _ => None,
        }
    }
}

/// Strategy 4: bounded recursive scan of topic-named globals.
pub struct DeepScanDetector;

impl Detector for DeepScanDetector {
    fn method(&self) -> DetectionMethod {
        DetectionMethod::DeepScan
    }

    fn probe(&self, ctx: &PageContext) -> Option<PageData> {
        for (name, value) in &ctx.globals {
            let lowered = name.to_lowercase();
            if !TOPIC_SUBSTRINGS.iter().any(|topic| lowered.contains(topic)) {
                continue;
            }
            if let Some((funnel, step)) = deep_scan(value, 0) {
                return Some(PageData::complete(funnel, step, self.method(), &ctx.url));
            }
        }
        None
    }
}

fn deep_scan(value: &Value, depth: usize) -> Option<(String, String)> {
    if depth > DEEP_SCAN_MAX_DEPTH {
        return None;
    }
    match value {
        Value::Object(map) => {
            if let Some(pair) = direct_keys(value) {
                return Some(pair);
            }
            map.values().find_map(|child| deep_scan(child, depth + 1))
        }
        Value::Array(items) => items.iter().find_map(|child| deep_scan(child, depth + 1)),
        _ => None,
    }
}

/// Strategy 5: regex pairs over inline script bodies.
pub struct ScriptRegexDetector;

impl Detector for ScriptRegexDetector {
    fn method(&self) -> DetectionMethod {
        DetectionMethod::ScriptRegex
    }

    fn probe(&self, ctx: &PageContext) -> Option<PageData> {
        for script in &ctx.scripts {
            let Some(body) = &script.body else { continue };
            for (funnel_re, step_re) in SCRIPT_REGEX_PAIRS.iter() {
                let funnel = funnel_re.captures(body).map(|cap| cap[1].to_string());
                let step = step_re.captures(body).map(|cap| cap[1].to_string());
                if let (Some(funnel), Some(step)) = (funnel, step) {
                    return Some(PageData::complete(funnel, step, self.method(), &ctx.url));
                }
            }
        }
        None
    }
}

/// Independent signature check: platform script hosts present in the page.
pub fn has_platform_signature(ctx: &PageContext) -> bool {
    ctx.scripts.iter().any(|script| {
        script
            .src
            .as_deref()
            .and_then(|src| Url::parse(src).ok())
            .and_then(|url| url.host_str().map(|host| host_matches_any(host, SCRIPT_HOST_SUFFIXES)))
            .unwrap_or(false)
    })
}

/// Hostname fallback: the page itself lives on a known platform host.
pub fn is_platform_url(url: &str) -> bool {
    Url::parse(url)
        .ok()
        .and_then(|url| {
            url.host_str()
                .map(|host| host_matches_any(host, PLATFORM_HOST_SUFFIXES))
        })
        .unwrap_or(false)
}

fn host_matches_any(host: &str, suffixes: &[&str]) -> bool {
    suffixes
        .iter()
        .any(|suffix| host == *suffix || host.ends_with(&format!(".{suffix}")))
}

/// Both keys from an object, directly or one level of nesting deep.
fn extract_keys(value: &Value) -> Option<(String, String)> {
    if let Some(pair) = direct_keys(value) {
        return Some(pair);
    }
    let map = value.as_object()?;
    let mut funnel = lookup(value, FUNNEL_KEY_NAMES);
    let mut step = lookup(value, STEP_KEY_NAMES);
    for container in CHILD_CONTAINERS {
        let Some(child) = map.get(*container) else {
            continue;
        };
        if funnel.is_none() {
            funnel = lookup(child, FUNNEL_KEY_NAMES).or_else(|| {
                (*container == "funnel").then(|| lookup(child, &["id"])).flatten()
            });
        }
        if step.is_none() {
            step = lookup(child, STEP_KEY_NAMES).or_else(|| {
                matches!(*container, "page" | "step")
                    .then(|| lookup(child, &["id"]))
                    .flatten()
            });
        }
        if let (Some(funnel), Some(step)) = (funnel.clone(), step.clone()) {
            return Some((funnel, step));
        }
    }
    match (funnel, step) {
        (Some(funnel), Some(step)) => Some((funnel, step)),
        _ => None,
    }
}

fn direct_keys(value: &Value) -> Option<(String, String)> {
    let funnel = lookup(value, FUNNEL_KEY_NAMES)?;
    let step = lookup(value, STEP_KEY_NAMES)?;
    Some((funnel, step))
}

fn lookup(value: &Value, names: &[&str]) -> Option<String> {
    let map = value.as_object()?;
    for name in names {
        if let Some(found) = map.get(*name).and_then(non_empty_string) {
            return Some(found);
        }
    }
    None
}

fn non_empty_string(value: &Value) -> Option<String> {
    value
        .as_str()
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}
