mod change_log;
mod page;
mod version;

pub use change_log::{ChangeDetails, ChangeLogEntry, ChangeType};
pub use page::{NewTrackedPage, PruneStrategy, TrackedPage, VersioningConfig};
pub use version::{ChangeMetrics, NewPageVersion, PageStats, PageVersion};
