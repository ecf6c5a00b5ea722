//! Lifecycle model: one power-on of one ECU
//!
//! A lifecycle is reconstructed from two unreliable time sources: the
//! logger's receive timestamps (`recv_usec`, delayed by nonnegative
//! processing jitter) and the ECU's relative timestamps (`tmsp`, counted
//! from power-on). The model: the ECU powers on at absolute time t0, a
//! message produced at relative time x arrives at the logger at
//! `r = t0 + x + j` with jitter `j >= 0`, so `t0 <= r - x` and the minimum
//! of `r - x` over many messages approaches t0 from above.
//!
//! [`Lifecycle::fits_in`] is the admit-or-reject contract built on that
//! model; it is the core of the whole sorting pipeline.

use crate::config::SortConfig;
use crate::skew::ClockSkew;
use crate::types::{DltMessage, TMSP_TICK_USECS, USECS_PER_SEC};
use chrono::DateTime;

/// One ECU power-on with its absolute window on the logger wall clock.
///
/// Lifecycles do not own messages; they hold indices into the owning
/// per-ECU bucket's message list.
#[derive(Debug, Clone, Default)]
pub struct Lifecycle {
    /// Inclusive window begin in microseconds since the epoch
    pub usec_begin: i64,
    /// Inclusive window end in microseconds since the epoch
    pub usec_end: i64,
    /// Smallest nonzero relative timestamp absorbed so far (0.1 ms ticks)
    pub min_tmsp: u32,
    /// Largest relative timestamp absorbed so far (0.1 ms ticks)
    pub max_tmsp: u32,
    /// False until a message with a nonzero relative timestamp arrived
    pub rel_offset_valid: bool,
    /// Clock drift factor applied to tmsp-derived durations
    pub clock_skew: ClockSkew,
    msgs: Vec<usize>,
}

impl Lifecycle {
    /// An empty lifecycle with a zero window and no messages
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a lifecycle from its first message.
    ///
    /// With a relative timestamp the power-on happened at least that long
    /// before the receive time, so the window opens there; without one the
    /// window collapses to the receive instant.
    pub fn seeded(msg: &DltMessage, idx: usize) -> Self {
        let recv = msg.recv_usec();
        let tmsp = msg.tmsp();
        let mut lc = Self {
            usec_begin: recv,
            usec_end: recv,
            min_tmsp: 0,
            max_tmsp: 0,
            rel_offset_valid: false,
            clock_skew: ClockSkew::identity(),
            msgs: vec![idx],
        };
        if tmsp != 0 {
            lc.usec_begin -= msg.tmsp_usec();
            lc.min_tmsp = tmsp;
            lc.max_tmsp = tmsp;
            lc.rel_offset_valid = true;
        }
        lc
    }

    /// Decide whether a candidate message belongs to this lifecycle and
    /// absorb it if so.
    ///
    /// Returns true when the message is claimed by this lifecycle. A claim
    /// does not always attach: messages without a relative timestamp are
    /// unreliable boundaries and are claimed-but-dropped, as is a secondary
    /// acceptance that fails the earlier-begin sanity check. A claimed
    /// message must not be offered to other lifecycles.
    pub fn fits_in(&mut self, idx: usize, msg: &DltMessage, cfg: &SortConfig) -> bool {
        let tmsp = msg.tmsp();
        if tmsp == 0 {
            return true;
        }

        let x = msg.tmsp_usec();
        let r = msg.recv_usec();
        // candidate power-on time if this message belonged here and had
        // zero jitter; the real t0 can only be earlier
        let s = r - x;
        // the message's original wall-clock time under that assumption
        let tx = s + x;

        // primary: the candidate start falls inside the current window
        let mut accept = s >= self.usec_begin && s <= self.usec_end;

        // secondary: the candidate start predates the window but the
        // message time itself lands inside it. Guard against absurdly
        // early begins from corrupt timestamps: such a message is claimed
        // so nobody else takes it, but not attached.
        if !accept && s <= self.usec_end && tx >= self.usec_begin {
            if cfg.use_max_earlier_sanity_check && self.usec_begin - s > cfg.max_earlier_begin_usec
            {
                log::debug!(
                    "dropping message: would move lifecycle begin {} s earlier",
                    (self.usec_begin - s) / USECS_PER_SEC
                );
                return true;
            }
            accept = true;
        }

        if accept {
            if s < self.usec_begin {
                self.usec_begin = s;
            }
            // jitter cannot span lifecycles, so the receive time bounds the
            // end when the logger clock is trusted; otherwise derive the
            // end from the begin plus the relative timestamp
            let end = if cfg.trust_logger_time {
                r
            } else {
                self.usec_begin + x
            };
            if end > self.usec_end {
                self.usec_end = end;
            }

            self.msgs.push(idx);

            if !self.rel_offset_valid {
                self.min_tmsp = tmsp;
                self.rel_offset_valid = true;
            } else if tmsp < self.min_tmsp {
                self.min_tmsp = tmsp;
            }
            if tmsp > self.max_tmsp {
                self.max_tmsp = tmsp;
            }
        }

        accept
    }

    /// Absorb another lifecycle of the same ECU if the windows intersect.
    ///
    /// Bounds become the union, the tmsp span is merged, and the other
    /// lifecycle's messages are spliced in front of ours (sort order is
    /// lost; callers re-sort afterwards). Returns false without touching
    /// either lifecycle when the windows are disjoint.
    pub fn expand_if_intersects(&mut self, other: &mut Lifecycle) -> bool {
        if other.usec_begin > self.usec_end || other.usec_end < self.usec_begin {
            return false;
        }
        if other.usec_begin < self.usec_begin {
            self.usec_begin = other.usec_begin;
        }
        if other.usec_end > self.usec_end {
            self.usec_end = other.usec_end;
        }

        if other.rel_offset_valid && (!self.rel_offset_valid || other.min_tmsp < self.min_tmsp) {
            self.min_tmsp = other.min_tmsp;
            self.rel_offset_valid = true;
        }
        if other.max_tmsp > self.max_tmsp {
            self.max_tmsp = other.max_tmsp;
        }

        let mut merged = std::mem::take(&mut other.msgs);
        merged.append(&mut self.msgs);
        self.msgs = merged;
        true
    }

    /// Sort the member messages by relative timestamp (stable, so messages
    /// with equal tmsp keep input order).
    pub fn sort_by_tmsp(&mut self, msgs: &[DltMessage]) {
        self.msgs.sort_by_key(|&i| msgs[i].tmsp());
    }

    /// Absolute time of the head (lowest-tmsp) message, assuming the member
    /// list is sorted.
    pub fn head_time(&self, msgs: &[DltMessage]) -> i64 {
        match self.msgs.first() {
            Some(&i) => self.usec_begin + self.clock_skew.scale_tmsp(msgs[i].tmsp_usec()),
            None => self.usec_begin,
        }
    }

    /// Install an estimated drift factor and recompute the window from the
    /// members: the begin is the minimum of `recv − skew·tmsp`, the end is
    /// the begin plus the skewed tmsp span.
    pub fn apply_skew(&mut self, skew: ClockSkew, msgs: &[DltMessage]) {
        self.clock_skew = skew;
        let begin = self
            .msgs
            .iter()
            .map(|&i| msgs[i].recv_usec() - skew.scale_tmsp(msgs[i].tmsp_usec()))
            .min();
        if let Some(begin) = begin {
            self.usec_begin = begin;
            self.usec_end = begin + skew.scale_tmsp(self.max_tmsp as i64 * TMSP_TICK_USECS);
        }
    }

    /// Indices of the member messages in the owning bucket
    pub fn message_indices(&self) -> &[usize] {
        &self.msgs
    }

    pub fn len(&self) -> usize {
        self.msgs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.msgs.is_empty()
    }

    /// Human-readable window summary for diagnostics
    pub fn describe(&self) -> String {
        format!(
            "LC from {} to {}, tmsp [{}, {}], {} msgs",
            format_usec(self.usec_begin),
            format_usec(self.usec_end),
            self.min_tmsp,
            self.max_tmsp,
            self.msgs.len()
        )
    }
}

/// Render an absolute microsecond timestamp as a wall-clock datetime
pub(crate) fn format_usec(usec: i64) -> String {
    let secs = usec.div_euclid(USECS_PER_SEC);
    let nanos = (usec.rem_euclid(USECS_PER_SEC) * 1_000) as u32;
    match DateTime::from_timestamp(secs, nanos) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        None => format!("{} us", usec),
    }
}
