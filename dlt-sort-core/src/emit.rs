//! Time-ordered output of one overall lifecycle
//!
//! The member lifecycles are already sorted by relative timestamp but start
//! at different absolute offsets, so the writer runs a k-way merge: each
//! member gets a cursor carrying the absolute time of its head message
//! (`usec_begin + skew·tmsp`), and the loop drains the earliest cursor until
//! the runner-up would be next. Across the whole emission the sequence of
//! absolute times is non-decreasing.

use crate::codec;
use crate::overall::OverallLifecycle;
use crate::pipeline::EcuBucket;
use crate::skew::ClockSkew;
use crate::types::{EcuId, Result, USECS_PER_SEC};
use std::collections::BTreeMap;
use std::io::{Seek, Write};

/// Walk state for one member lifecycle during the merge
struct Cursor<'a> {
    ecu: EcuId,
    indices: &'a [usize],
    pos: usize,
    /// Absolute time of the head message
    min_time: i64,
    usec_begin: i64,
    skew: ClockSkew,
}

impl Cursor<'_> {
    /// Emit the head message, advance, and update the head time.
    ///
    /// Returns false when the cursor ran out of messages.
    fn emit_head<W: Write + Seek>(
        &mut self,
        ecus: &mut BTreeMap<EcuId, EcuBucket>,
        rewrite_timestamps: bool,
        writer: &mut W,
    ) -> Result<bool> {
        let Some(bucket) = ecus.get_mut(&self.ecu) else {
            // cursors are built from this map; the key cannot vanish
            log::error!("ECU {} bucket missing during emission", self.ecu);
            return Ok(false);
        };

        let msg = &mut bucket.msgs[self.indices[self.pos]];
        let offset = self.skew.scale_tmsp(msg.tmsp_usec());
        if rewrite_timestamps {
            // overwrite the logger receive time with the reconstructed
            // absolute time; the record must not be re-read afterwards
            let t = self.usec_begin + offset;
            msg.storage.seconds = (t / USECS_PER_SEC) as u32;
            msg.storage.microseconds = (t % USECS_PER_SEC) as u32;
        }
        codec::write_message(msg, writer)?;

        self.pos += 1;
        if self.pos == self.indices.len() {
            return Ok(false);
        }
        let next = &bucket.msgs[self.indices[self.pos]];
        self.min_time = self.min_time - offset + self.skew.scale_tmsp(next.tmsp_usec());
        Ok(true)
    }
}

/// Cursor with the earliest head time; `exclude` masks the current cursor
/// when looking for the runner-up.
fn min_head(cursors: &[Cursor<'_>], exclude: Option<usize>) -> Option<(usize, i64)> {
    let mut best: Option<(usize, i64)> = None;
    for (i, cursor) in cursors.iter().enumerate() {
        if Some(i) == exclude {
            continue;
        }
        if best.map_or(true, |(_, t)| cursor.min_time < t) {
            best = Some((i, cursor.min_time));
        }
    }
    best
}

/// Emit all messages of one overall lifecycle in ascending absolute time.
///
/// Returns the number of records written. With `rewrite_timestamps` the
/// storage-header receive times are replaced in place by the reconstructed
/// absolute times.
pub fn write_overall<W: Write + Seek>(
    olc: &OverallLifecycle,
    ecus: &mut BTreeMap<EcuId, EcuBucket>,
    rewrite_timestamps: bool,
    writer: &mut W,
) -> Result<u64> {
    let mut cursors: Vec<Cursor<'_>> = Vec::new();
    for member in &olc.members {
        if member.lifecycle.is_empty() {
            continue;
        }
        let Some(bucket) = ecus.get(&member.ecu) else {
            continue;
        };
        cursors.push(Cursor {
            ecu: member.ecu,
            indices: member.lifecycle.message_indices(),
            pos: 0,
            min_time: member.lifecycle.head_time(&bucket.msgs),
            usec_begin: member.lifecycle.usec_begin,
            skew: member.lifecycle.clock_skew,
        });
    }

    let mut written: u64 = 0;
    let mut last_time = i64::MIN;
    let mut index: Option<usize> = None;

    while cursors.len() > 1 {
        let idx = match index.take() {
            Some(i) => i,
            None => min_head(&cursors, None).map(|(i, _)| i).unwrap_or(0),
        };
        let Some((next_idx, next_time)) = min_head(&cursors, Some(idx)) else {
            break;
        };

        // drain the current cursor up to and including the runner-up's time
        loop {
            debug_assert!(cursors[idx].min_time >= last_time);
            last_time = cursors[idx].min_time;

            let alive = cursors[idx].emit_head(ecus, rewrite_timestamps, writer)?;
            written += 1;
            if !alive {
                // removal shifts positions, so both selections are redone
                cursors.remove(idx);
                break;
            }
            if cursors[idx].min_time > next_time {
                index = Some(next_idx);
                break;
            }
        }
    }

    // a single remaining cursor drains sequentially
    if let Some(mut last) = cursors.pop() {
        loop {
            debug_assert!(last.min_time >= last_time);
            last_time = last.min_time;
            let alive = last.emit_head(ecus, rewrite_timestamps, writer)?;
            written += 1;
            if !alive {
                break;
            }
        }
    }

    Ok(written)
}

/// Output filename for split sequence number `cnt`.
///
/// `cnt == 0` leaves the template untouched. Otherwise a three-digit
/// zero-padded sequence number is inserted before the `.dlt` suffix
/// (appended unpadded from 1000 upward).
pub fn output_file_name(cnt: usize, template: &str) -> String {
    if cnt == 0 {
        return template.to_string();
    }
    let stem = template.strip_suffix(".dlt").unwrap_or(template);
    format!("{}{:03}.dlt", stem, cnt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::DltReader;
    use crate::config::SortConfig;
    use crate::overall::group_lifecycles;
    use crate::testutil::msg_for_ecu;
    use crate::types::DltMessage;
    use std::io::Cursor as IoCursor;

    #[test]
    fn test_output_file_name() {
        assert_eq!(output_file_name(0, "/tmp/x.dlt"), "/tmp/x.dlt");
        assert_eq!(output_file_name(42, "/tmp/x"), "/tmp/x042.dlt");
        assert_eq!(output_file_name(42, "/tmp/x.dlt"), "/tmp/x042.dlt");
        assert_eq!(output_file_name(2, "/tmp/x_"), "/tmp/x_002.dlt");
        assert_eq!(output_file_name(1042, "/tmp/x_"), "/tmp/x_1042.dlt");
    }

    fn sorted_ecus(
        msgs: Vec<DltMessage>,
    ) -> (BTreeMap<EcuId, EcuBucket>, Vec<OverallLifecycle>) {
        let cfg = SortConfig::new().with_clock_drift_detection(false);
        let mut ecus: BTreeMap<EcuId, EcuBucket> = BTreeMap::new();
        for m in msgs {
            ecus.entry(m.ecu_id()).or_default().push(m);
        }
        for bucket in ecus.values_mut() {
            bucket.run(&cfg);
        }
        let olcs = group_lifecycles(&mut ecus);
        (ecus, olcs)
    }

    fn decode_all(bytes: Vec<u8>) -> Vec<DltMessage> {
        DltReader::new(IoCursor::new(bytes))
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_two_ecus_interleave_by_absolute_time() {
        let (mut ecus, olcs) = sorted_ecus(vec![
            msg_for_ecu(b"ECU1", 10, 10_000, 100),
            msg_for_ecu(b"ECU1", 10, 30_000, 300),
            msg_for_ecu(b"ECU2", 10, 20_000, 150),
            msg_for_ecu(b"ECU2", 10, 40_000, 350),
        ]);
        assert_eq!(olcs.len(), 1);

        let mut out = IoCursor::new(Vec::new());
        let written = write_overall(&olcs[0], &mut ecus, false, &mut out).unwrap();
        assert_eq!(written, 4);

        let order: Vec<EcuId> = decode_all(out.into_inner())
            .iter()
            .map(|m| m.ecu_id())
            .collect();
        assert_eq!(
            order,
            vec![
                EcuId(*b"ECU1"),
                EcuId(*b"ECU2"),
                EcuId(*b"ECU1"),
                EcuId(*b"ECU2"),
            ]
        );
    }

    #[test]
    fn test_single_lifecycle_drains_sequentially() {
        let (mut ecus, olcs) = sorted_ecus(vec![
            msg_for_ecu(b"ECU1", 10, 30_000, 300),
            msg_for_ecu(b"ECU1", 10, 10_000, 100),
        ]);
        let mut out = IoCursor::new(Vec::new());
        let written = write_overall(&olcs[0], &mut ecus, false, &mut out).unwrap();
        assert_eq!(written, 2);

        let tmsp: Vec<u32> = decode_all(out.into_inner()).iter().map(|m| m.tmsp()).collect();
        assert_eq!(tmsp, vec![100, 300]);
    }

    #[test]
    fn test_rewrite_timestamps() {
        let (mut ecus, olcs) = sorted_ecus(vec![
            // received late: recv 12 s but produced at 10.010 s
            msg_for_ecu(b"ECU1", 12, 0, 100),
            msg_for_ecu(b"ECU1", 12, 100, 300),
        ]);
        let mut out = IoCursor::new(Vec::new());
        write_overall(&olcs[0], &mut ecus, true, &mut out).unwrap();

        let msgs = decode_all(out.into_inner());
        let begin = olcs[0].usec_begin;
        for m in &msgs {
            let expect = begin + m.tmsp_usec();
            assert_eq!(m.recv_usec(), expect);
        }
    }

    #[test]
    fn test_emitted_times_are_monotonic() {
        let (mut ecus, olcs) = sorted_ecus(vec![
            msg_for_ecu(b"ECU1", 10, 10_000, 100),
            msg_for_ecu(b"ECU1", 10, 25_000, 250),
            msg_for_ecu(b"ECU2", 10, 12_000, 80),
            msg_for_ecu(b"ECU2", 10, 22_000, 180),
            msg_for_ecu(b"ECU3", 10, 18_000, 60),
        ]);
        assert_eq!(olcs.len(), 1);

        let mut out = IoCursor::new(Vec::new());
        // rewritten times make the merge order directly observable
        write_overall(&olcs[0], &mut ecus, true, &mut out).unwrap();

        let times: Vec<i64> = decode_all(out.into_inner())
            .iter()
            .map(|m| m.recv_usec())
            .collect();
        assert_eq!(times.len(), 5);
        assert!(times.windows(2).all(|w| w[0] <= w[1]), "times {:?}", times);
    }
}
