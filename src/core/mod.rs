pub mod changes;
pub mod filter;
pub mod report;
pub mod snapshot;
pub mod walker;

pub use changes::ChangeSet;
pub use filter::{FilterMasks, PathFilter, PatternError};
pub use report::{render_alerts, render_changes, Alert};
pub use snapshot::{FileRecord, Snapshot, SnapshotError};
pub use walker::{TreeWalker, WalkError};
