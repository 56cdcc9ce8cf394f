pub mod api;
pub mod badge;
pub mod metrics;
pub mod model;
pub mod state;
pub mod storage;
pub mod tabs;

pub use api::Coordinator;
pub use badge::{BadgePort, BadgeState, NoopBadge, RecordingBadge};
pub use model::CoordinatorConfig;
pub use state::BackgroundCoordinator;
pub use storage::{KeyValueStore, MemoryStore};
pub use tabs::{StaticTabs, TabDirectory};
