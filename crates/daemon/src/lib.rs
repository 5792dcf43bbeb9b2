// dashsync-daemon library entry point.

pub mod config;
pub mod metrics;
pub mod reconciler;
pub mod runtime;
pub mod store;
pub mod watcher;
