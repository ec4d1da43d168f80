pub mod config;
pub mod core;
pub mod job;
pub mod logging;
pub mod notify;
pub mod storage;

pub use config::{AppConfig, TargetConfig};
pub use crate::core::{ChangeSet, PathFilter, Snapshot, TreeWalker};
pub use job::{RunSummary, Target};
