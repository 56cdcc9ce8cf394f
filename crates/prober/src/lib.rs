pub mod clone;
pub mod detect;
pub mod errors;
pub mod metrics;
pub mod model;
pub mod overlay;
pub mod runner;
pub mod schedule;

pub use clone::{perform_clone, CloneParams, DestinationRef, HostClient, StepMetadata, UserResolver};
pub use detect::{detect, detect_with, default_detectors, Detector};
pub use errors::CloneError;
pub use model::{ElementNode, PageContext, ScriptTag};
pub use overlay::{NoopOverlay, OverlayEvent, OverlayPort, RecordingOverlay};
pub use runner::{ProbeConfig, ProbeRunner};
pub use schedule::RetrySchedule;
