//! Sorting configuration types
//!
//! This module defines the tunables of the lifecycle reconstruction
//! algorithm ([`SortConfig`]) and the shape of the output
//! ([`OutputOptions`]). The algorithm knobs rarely need changing; their
//! defaults match the behavior documented in the module-level docs of
//! `lifecycle` and `skew`.

use serde::{Deserialize, Serialize};

/// Default output filename template
pub const DEFAULT_OUTPUT_TEMPLATE: &str = "dlt_sorted.dlt";

/// Configuration for lifecycle reconstruction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortConfig {
    /// Trust the logger's receive timestamps when extending a lifecycle's
    /// end. When off (default) the end is derived from the lifecycle begin
    /// plus the message's relative timestamp, which is robust against
    /// corrupted logger clocks.
    #[serde(default)]
    pub trust_logger_time: bool,

    /// Reject a secondary lifecycle acceptance that would move the
    /// lifecycle begin earlier by more than `max_earlier_begin_usec`.
    #[serde(default = "default_true")]
    pub use_max_earlier_sanity_check: bool,

    /// Bound for the sanity check above, in microseconds
    #[serde(default = "default_max_earlier_begin_usec")]
    pub max_earlier_begin_usec: i64,

    /// Estimate per-ECU clock drift against the logger clock and correct
    /// lifecycle windows with it
    #[serde(default = "default_true")]
    pub use_clock_drift_detection: bool,
}

fn default_true() -> bool {
    true
}

fn default_max_earlier_begin_usec() -> i64 {
    120 * 1_000_000
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            trust_logger_time: false,
            use_max_earlier_sanity_check: true,
            max_earlier_begin_usec: default_max_earlier_begin_usec(),
            use_clock_drift_detection: true,
        }
    }
}

impl SortConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: trust logger receive times for lifecycle ends
    pub fn with_trust_logger_time(mut self, enabled: bool) -> Self {
        self.trust_logger_time = enabled;
        self
    }

    /// Builder method: enable or disable the earlier-begin sanity check
    pub fn with_max_earlier_sanity_check(mut self, enabled: bool) -> Self {
        self.use_max_earlier_sanity_check = enabled;
        self
    }

    /// Builder method: set the earlier-begin bound in microseconds
    pub fn with_max_earlier_begin_usec(mut self, usec: i64) -> Self {
        self.max_earlier_begin_usec = usec;
        self
    }

    /// Builder method: enable or disable clock drift detection
    pub fn with_clock_drift_detection(mut self, enabled: bool) -> Self {
        self.use_clock_drift_detection = enabled;
        self
    }
}

/// Where and how the sorted stream is written
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputOptions {
    /// Output filename template. With `split` a three-digit zero-padded
    /// sequence number is inserted before the `.dlt` suffix.
    #[serde(default = "default_template")]
    pub file_template: String,

    /// Emit one output file per overall lifecycle
    #[serde(default)]
    pub split: bool,

    /// Rewrite storage-header receive times with the reconstructed
    /// absolute times
    #[serde(default)]
    pub rewrite_timestamps: bool,
}

fn default_template() -> String {
    DEFAULT_OUTPUT_TEMPLATE.to_string()
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            file_template: default_template(),
            split: false,
            rewrite_timestamps: false,
        }
    }
}

impl OutputOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the output filename template
    pub fn with_file_template(mut self, template: impl Into<String>) -> Self {
        self.file_template = template.into();
        self
    }

    /// Builder method: one output file per overall lifecycle
    pub fn with_split(mut self, enabled: bool) -> Self {
        self.split = enabled;
        self
    }

    /// Builder method: rewrite storage-header times
    pub fn with_rewrite_timestamps(mut self, enabled: bool) -> Self {
        self.rewrite_timestamps = enabled;
        self
    }
}
