//! Utilities module for logging, metrics, and error handling
//!
//! This module provides:
//! - Structured logging with tracing
//! - Binary classification metrics and per-epoch training history
//! - Error handling types

use std::time::Duration;

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{MriError, Result};
pub use logging::init_logging;
pub use metrics::{ConfusionMatrix, EpochMetrics, Metrics, TrainingHistory};

/// Compact wall-clock duration for console summaries: `42.0s`, `3m 05s`, `2h 14m`
pub fn format_duration(elapsed: Duration) -> String {
    let total = elapsed.as_secs_f64();
    let whole = elapsed.as_secs();
    match whole {
        0..=59 => format!("{:.1}s", total),
        60..=3599 => format!("{}m {:02}s", whole / 60, whole % 60),
        _ => format!("{}h {}m", whole / 3600, (whole % 3600) / 60),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(30_500)), "30.5s");
        assert_eq!(format_duration(Duration::from_secs(65)), "1m 05s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 1m");
    }
}
