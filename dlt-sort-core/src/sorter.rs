//! Driver: ingest → per-ECU lifecycling → cross-ECU grouping → output
//!
//! [`Sorter`] is the explicit context the whole pipeline threads through:
//! the per-ECU buckets (which own all messages) and the overall-lifecycle
//! list. Ingest is resilient: a file that goes bad mid-way contributes the
//! messages parsed so far and the run continues; only output errors are
//! fatal, since a partial output would corrupt split semantics.

use crate::codec::{DltReader, ReaderStats};
use crate::config::{OutputOptions, SortConfig};
use crate::emit::{output_file_name, write_overall};
use crate::overall::{group_lifecycles, OverallLifecycle};
use crate::pipeline::EcuBucket;
use crate::types::{DltError, DltMessage, EcuId, Result};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;

/// Counters for one `write_output` call
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputStats {
    pub files: u32,
    pub messages: u64,
}

/// The sorting pipeline context.
///
/// Feed it input files with [`ingest_file`](Self::ingest_file), run
/// [`sort`](Self::sort) once, then [`write_output`](Self::write_output).
pub struct Sorter {
    config: SortConfig,
    ecus: BTreeMap<EcuId, EcuBucket>,
    overall: Vec<OverallLifecycle>,
}

impl Sorter {
    pub fn new(config: SortConfig) -> Self {
        Self {
            config,
            ecus: BTreeMap::new(),
            overall: Vec::new(),
        }
    }

    pub fn config(&self) -> &SortConfig {
        &self.config
    }

    /// Parse one input file and bucket its messages by ECU.
    ///
    /// Returns an error only when the file cannot be opened; decode errors
    /// inside the file are reported, end that file's ingest and keep the
    /// messages parsed so far.
    pub fn ingest_file(&mut self, path: &Path) -> Result<ReaderStats> {
        log::info!("processing {}", path.display());
        let file = File::open(path)?;
        self.ingest_reader(BufReader::new(file))
    }

    /// Parse an already opened stream; see [`ingest_file`](Self::ingest_file).
    pub fn ingest_reader<R: Read + Seek>(&mut self, reader: R) -> Result<ReaderStats> {
        let mut reader = DltReader::new(reader)?;
        loop {
            match reader.read_message() {
                Ok(Some(msg)) => self.add_message(msg),
                Ok(None) => break,
                Err(err @ (DltError::Unsynchronized { .. } | DltError::Truncated { .. })) => {
                    log::error!("{}; keeping {} parsed message(s)", err, reader.stats.messages);
                    break;
                }
                Err(err) => {
                    log::error!(
                        "read failed: {}; keeping {} parsed message(s)",
                        err,
                        reader.stats.messages
                    );
                    break;
                }
            }
        }
        let stats = reader.stats;
        log::info!(
            "processed {} message(s) ({} byte(s) skipped, {} bad record(s))",
            stats.messages,
            stats.skipped_bytes,
            stats.bad_version + stats.bad_length
        );
        Ok(stats)
    }

    /// Bucket a single parsed message
    pub fn add_message(&mut self, msg: DltMessage) {
        if msg.tmsp() == 0 && !msg.is_control() {
            log::trace!("non-control message from {} without timestamp", msg.ecu_id());
        }
        self.ecus.entry(msg.ecu_id()).or_default().push(msg);
    }

    /// Run lifecycle discovery, merging, sorting and drift correction per
    /// ECU, then cluster the lifecycles across ECUs.
    pub fn sort(&mut self) {
        for (ecu, bucket) in self.ecus.iter_mut() {
            if bucket.msgs.is_empty() {
                continue;
            }
            bucket.run(&self.config);
            let dropped = bucket.msgs.len() - bucket.attached_messages();
            log::debug!(
                "ECU {}: {} message(s), {} lifecycle(s), {} dropped (no timestamp)",
                ecu,
                bucket.msgs.len(),
                bucket.lifecycles.len(),
                dropped
            );
            for lc in &bucket.lifecycles {
                log::debug!("  {}", lc.describe());
            }
        }
        self.overall = group_lifecycles(&mut self.ecus);
        for olc in &self.overall {
            log::debug!("{}", olc.describe());
        }
    }

    /// Write the sorted stream: one file, or one file per overall lifecycle
    /// with `split`. Write errors are fatal.
    pub fn write_output(&mut self, opts: &OutputOptions) -> Result<OutputStats> {
        let Self { ecus, overall, .. } = self;
        let mut stats = OutputStats::default();

        if opts.split {
            for (seq, olc) in overall.iter().enumerate() {
                let name = output_file_name(seq + 1, &opts.file_template);
                let mut writer = BufWriter::new(File::create(&name)?);
                let written = write_overall(olc, ecus, opts.rewrite_timestamps, &mut writer)?;
                writer.flush()?;
                log::info!("wrote {} message(s) to {}", written, name);
                stats.files += 1;
                stats.messages += written;
            }
        } else {
            let name = output_file_name(0, &opts.file_template);
            let mut writer = BufWriter::new(File::create(&name)?);
            for olc in overall.iter() {
                stats.messages += write_overall(olc, ecus, opts.rewrite_timestamps, &mut writer)?;
            }
            writer.flush()?;
            stats.files = 1;
            log::info!("wrote {} message(s) to {}", stats.messages, name);
        }

        Ok(stats)
    }

    /// Per-ECU buckets (messages and, before grouping, lifecycles)
    pub fn ecus(&self) -> &BTreeMap<EcuId, EcuBucket> {
        &self.ecus
    }

    /// Overall lifecycles, populated by [`sort`](Self::sort)
    pub fn overall_lifecycles(&self) -> &[OverallLifecycle] {
        &self.overall
    }

    /// Total ingested messages across all ECUs
    pub fn total_messages(&self) -> usize {
        self.ecus.values().map(|b| b.msgs.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::write_message;
    use crate::testutil::{msg_for_ecu, msg_with_tmsp};
    use std::io::Cursor;

    fn encode_all(msgs: &[DltMessage]) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        for m in msgs {
            write_message(m, &mut out).unwrap();
        }
        out.into_inner()
    }

    #[test]
    fn test_ingest_buckets_by_ecu() {
        let bytes = encode_all(&[
            msg_for_ecu(b"ECU1", 10, 10_000, 100),
            msg_for_ecu(b"ECU2", 10, 20_000, 150),
            msg_for_ecu(b"ECU1", 10, 30_000, 300),
        ]);
        let mut sorter = Sorter::new(SortConfig::new());
        let stats = sorter.ingest_reader(Cursor::new(bytes)).unwrap();
        assert_eq!(stats.messages, 3);
        assert_eq!(sorter.ecus().len(), 2);
        assert_eq!(sorter.ecus()[&crate::types::EcuId(*b"ECU1")].msgs.len(), 2);
        assert_eq!(sorter.total_messages(), 3);
    }

    #[test]
    fn test_ingest_keeps_partial_results_on_truncation() {
        let mut bytes = encode_all(&[msg_with_tmsp(10, 10_000, 100)]);
        let tail = encode_all(&[msg_with_tmsp(10, 20_000, 200)]);
        bytes.extend_from_slice(&tail[..tail.len() - 3]);

        let mut sorter = Sorter::new(SortConfig::new());
        let stats = sorter.ingest_reader(Cursor::new(bytes)).unwrap();
        assert_eq!(stats.messages, 1);
        assert_eq!(sorter.total_messages(), 1);
    }

    #[test]
    fn test_sort_builds_overall_lifecycles() {
        let bytes = encode_all(&[
            msg_for_ecu(b"ECU1", 10, 10_000, 100),
            msg_for_ecu(b"ECU2", 10, 20_000, 150),
        ]);
        let mut sorter = Sorter::new(SortConfig::new());
        sorter.ingest_reader(Cursor::new(bytes)).unwrap();
        sorter.sort();
        assert_eq!(sorter.overall_lifecycles().len(), 1);
        assert_eq!(sorter.overall_lifecycles()[0].message_count(), 2);
    }

    #[test]
    fn test_ingest_missing_file_is_an_error() {
        let mut sorter = Sorter::new(SortConfig::new());
        let err = sorter.ingest_file(Path::new("/nonexistent/trace.dlt"));
        assert!(matches!(err, Err(DltError::Io(_))));
    }
}
