use async_trait::async_trait;

use pagelift_core_types::{CopiedSnapshot, PageData, TabId};

/// Operations the background context owns. Every operation is idempotent
/// and last-write-wins; transient delivery failures degrade to no-ops, so
/// nothing here returns a user-facing error.
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// A relay forwarded a detection result for its tab. `None` is the
    /// explicit negative signal and clears the binding.
    async fn data_discovered(&self, tab: TabId, data: Option<PageData>);

    async fn tab_removed(&self, tab: TabId);

    async fn tab_activated(&self, tab: TabId);

    /// A tab finished (or progressed) loading. Badge re-checks run at
    /// staggered delays to absorb the race against the first probe tick.
    async fn tab_updated(&self, tab: TabId, load_complete: bool);

    async fn copied_info(&self) -> Option<CopiedSnapshot>;

    async fn copy_info(&self, data: PageData) -> CopiedSnapshot;

    /// Remove bindings for tabs that no longer exist. Returns the number
    /// of storage keys removed.
    async fn sweep(&self) -> usize;
}
