// dashsync-common: shared domain logic for the dashboard sidecar

pub mod error;
pub mod path;
pub mod types;
pub mod validate;
