//! Cross-ECU lifecycle grouping
//!
//! Lifecycles from different ECUs that ran at the same time form an
//! "overall lifecycle": the transitive closure of wall-clock window
//! intersection, approximated with a single greedy pass. The member count
//! is expected to stay small (tens), so the quadratic scan is fine.

use crate::lifecycle::{format_usec, Lifecycle};
use crate::pipeline::EcuBucket;
use crate::types::EcuId;
use std::collections::BTreeMap;

/// One lifecycle together with the ECU it belongs to
#[derive(Debug)]
pub struct OlcMember {
    pub ecu: EcuId,
    pub lifecycle: Lifecycle,
}

/// A cluster of lifecycles whose wall-clock windows intersect.
///
/// Members intersect the cluster bounds as they were when the member was
/// added, not necessarily each other pairwise.
#[derive(Debug)]
pub struct OverallLifecycle {
    pub usec_begin: i64,
    pub usec_end: i64,
    /// Members ordered so that earlier-starting lifecycles come first
    pub members: Vec<OlcMember>,
}

impl OverallLifecycle {
    pub fn seeded(member: OlcMember) -> Self {
        Self {
            usec_begin: member.lifecycle.usec_begin,
            usec_end: member.lifecycle.usec_end,
            members: vec![member],
        }
    }

    pub fn intersects(&self, lc: &Lifecycle) -> bool {
        lc.usec_begin <= self.usec_end && lc.usec_end >= self.usec_begin
    }

    /// Extend the cluster bounds to the union and take the member. A member
    /// that starts before the cluster goes to the front so the member list
    /// stays begin-ordered.
    pub fn absorb(&mut self, member: OlcMember) {
        if member.lifecycle.usec_begin < self.usec_begin {
            self.usec_begin = member.lifecycle.usec_begin;
            if member.lifecycle.usec_end > self.usec_end {
                self.usec_end = member.lifecycle.usec_end;
            }
            self.members.insert(0, member);
        } else {
            if member.lifecycle.usec_end > self.usec_end {
                self.usec_end = member.lifecycle.usec_end;
            }
            self.members.push(member);
        }
    }

    /// Total messages across all member lifecycles
    pub fn message_count(&self) -> usize {
        self.members.iter().map(|m| m.lifecycle.len()).sum()
    }

    /// Human-readable summary for diagnostics
    pub fn describe(&self) -> String {
        format!(
            "overall LC from {} to {}, {} lifecycle(s)",
            format_usec(self.usec_begin),
            format_usec(self.usec_end),
            self.members.len()
        )
    }
}

/// Cluster every discovered lifecycle across all ECUs into overall
/// lifecycles, consuming the buckets' lifecycle lists. The result is sorted
/// by cluster begin.
pub fn group_lifecycles(ecus: &mut BTreeMap<EcuId, EcuBucket>) -> Vec<OverallLifecycle> {
    let mut olcs: Vec<OverallLifecycle> = Vec::new();
    for (&ecu, bucket) in ecus.iter_mut() {
        for lifecycle in bucket.lifecycles.drain(..) {
            let member = OlcMember { ecu, lifecycle };
            match olcs.iter_mut().find(|o| o.intersects(&member.lifecycle)) {
                Some(olc) => olc.absorb(member),
                None => olcs.insert(0, OverallLifecycle::seeded(member)),
            }
        }
    }
    olcs.sort_by_key(|o| o.usec_begin);
    log::debug!("grouped into {} overall lifecycle(s)", olcs.len());
    olcs
}
