//! DLT Sort Library
//!
//! Reconstructs per-ECU power-on lifecycles from DLT log files and merges
//! everything into one temporally coherent stream.
//!
//! # Architecture
//!
//! Logger wall-clock timestamps are noisy and delayed; every record also
//! carries an ECU-local relative timestamp counted from power-on. The
//! pipeline combines the two:
//! - Parses DLT v1 records from the input files (format preserving)
//! - Buckets messages by ECU and reconstructs each ECU's lifecycles
//! - Estimates per-ECU clock drift against the logger clock
//! - Clusters lifecycles across ECUs by wall-clock overlap
//! - K-way merges each cluster into globally monotonic output
//!
//! The library does NOT:
//! - Interpret, filter or transform payloads
//! - Receive live traces; it operates on complete files
//!
//! Presentation (CLI flags, logging setup, exit codes) is in the
//! application layer (dlt-sort-cli).
//!
//! # Example Usage
//!
//! ```no_run
//! use dlt_sort_core::{OutputOptions, SortConfig, Sorter};
//! use std::path::Path;
//!
//! let mut sorter = Sorter::new(SortConfig::new());
//! if let Err(e) = sorter.ingest_file(Path::new("trace.dlt")) {
//!     eprintln!("cannot open input: {}", e);
//! }
//! sorter.sort();
//!
//! let opts = OutputOptions::new()
//!     .with_file_template("sorted.dlt")
//!     .with_rewrite_timestamps(true);
//! sorter.write_output(&opts).unwrap();
//! ```

// Public modules
pub mod codec;
pub mod config;
pub mod emit;
pub mod lifecycle;
pub mod overall;
pub mod pipeline;
pub mod skew;
pub mod sorter;
pub mod types;

// Re-export main types for convenience
pub use codec::{DltReader, ReaderStats};
pub use config::{OutputOptions, SortConfig, DEFAULT_OUTPUT_TEMPLATE};
pub use lifecycle::Lifecycle;
pub use overall::OverallLifecycle;
pub use pipeline::EcuBucket;
pub use skew::{ClockSkew, SkewSolver};
pub use sorter::{OutputStats, Sorter};
pub use types::{DltError, DltMessage, EcuId, Result};

#[cfg(test)]
pub(crate) mod testutil;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_basics() {
        // Smoke test: an empty sorter sorts to an empty result
        let mut sorter = Sorter::new(SortConfig::new());
        sorter.sort();
        assert!(sorter.overall_lifecycles().is_empty());
        assert_eq!(sorter.total_messages(), 0);
    }
}
