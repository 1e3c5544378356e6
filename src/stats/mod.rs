//! Statistics snapshots

pub mod metrics;

pub use metrics::{RegistryStats, ServerStats, StreamStats};
