//! Utils Module - shared helpers
//!
//! Constants, verdict cache and telemetry.

pub mod cache;
pub mod constants;
pub mod telemetry;

pub use cache::{CacheStats, VerdictCache};
pub use constants::*;
pub use telemetry::{GuardTelemetry, TelemetryEvent, TelemetryStats};
