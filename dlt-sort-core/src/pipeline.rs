//! Per-ECU lifecycle pipeline
//!
//! Messages are bucketed by ECU id in input order. For each bucket the
//! pipeline discovers lifecycles message by message, merges spuriously split
//! lifecycles until no two windows overlap, sorts every lifecycle's members
//! by relative timestamp and finally estimates the ECU's clock drift.

use crate::config::SortConfig;
use crate::lifecycle::Lifecycle;
use crate::skew::SkewSolver;
use crate::types::DltMessage;

/// Container for everything known about one ECU: the messages it emitted
/// (owned, in input order) and the lifecycles discovered for it.
#[derive(Debug, Default)]
pub struct EcuBucket {
    pub msgs: Vec<DltMessage>,
    pub lifecycles: Vec<Lifecycle>,
}

impl EcuBucket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message in input order
    pub fn push(&mut self, msg: DltMessage) {
        self.msgs.push(msg);
    }

    /// Run the full per-ECU pipeline: discover, merge, sort, and (if
    /// enabled) correct clock drift.
    pub fn run(&mut self, cfg: &SortConfig) {
        self.determine_lifecycles(cfg);
        self.merge_lifecycles();
        self.sort_lifecycles();
        if cfg.use_clock_drift_detection {
            self.detect_clock_drift();
        }
    }

    /// Walk the messages in input order and grow or create lifecycles.
    ///
    /// The most recently matching lifecycle is tried first; messages tend
    /// to arrive in bursts from the same power-on, so this check almost
    /// always succeeds. On a miss every other lifecycle is offered the
    /// message in creation order, and if none claims it the message seeds
    /// a new lifecycle.
    pub fn determine_lifecycles(&mut self, cfg: &SortConfig) {
        let Self { msgs, lifecycles } = self;
        lifecycles.clear();
        let Some(first) = msgs.first() else {
            return;
        };
        lifecycles.push(Lifecycle::seeded(first, 0));
        let mut cur = 0usize;

        for (idx, msg) in msgs.iter().enumerate().skip(1) {
            if lifecycles[cur].fits_in(idx, msg, cfg) {
                continue;
            }
            let other = (0..lifecycles.len())
                .find(|&li| li != cur && lifecycles[li].fits_in(idx, msg, cfg));
            match other {
                Some(li) => cur = li,
                None => {
                    lifecycles.push(Lifecycle::seeded(msg, idx));
                    cur = lifecycles.len() - 1;
                }
            }
        }
        log::debug!("discovered {} lifecycle(s)", lifecycles.len());
    }

    /// Merge lifecycles whose windows intersect, repeating until no merge
    /// occurs. The scan restarts from the beginning after every merge; with
    /// more than two transitively overlapping lifecycles the merge order is
    /// iteration-order dependent, which is accepted.
    pub fn merge_lifecycles(&mut self) {
        loop {
            let mut merged = false;
            'scan: for i in 0..self.lifecycles.len() {
                for j in (i + 1)..self.lifecycles.len() {
                    let (head, tail) = self.lifecycles.split_at_mut(j);
                    if head[i].expand_if_intersects(&mut tail[0]) {
                        debug_assert!(tail[0].is_empty());
                        self.lifecycles.remove(j);
                        merged = true;
                        break 'scan;
                    }
                }
            }
            if !merged {
                break;
            }
        }
    }

    /// Sort every lifecycle's members by relative timestamp
    pub fn sort_lifecycles(&mut self) {
        let Self { msgs, lifecycles } = self;
        for lc in lifecycles.iter_mut() {
            lc.sort_by_tmsp(msgs);
        }
    }

    /// Estimate this ECU's clock drift and recompute all lifecycle windows
    /// with the resulting factor.
    pub fn detect_clock_drift(&mut self) {
        let Self { msgs, lifecycles } = self;
        let skew = SkewSolver::solve_for_lifecycles(lifecycles, msgs);
        for lc in lifecycles.iter_mut() {
            lc.apply_skew(skew, msgs);
        }
    }

    /// Number of messages attached to any lifecycle (tmsp-less messages
    /// and sanity-check casualties are claimed but dropped)
    pub fn attached_messages(&self) -> usize {
        self.lifecycles.iter().map(|lc| lc.len()).sum()
    }
}
