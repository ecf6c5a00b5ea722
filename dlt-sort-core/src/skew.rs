//! Clock drift estimation
//!
//! ECU clocks drift against the logger clock, so a lifecycle reconstructed
//! from relative timestamps slowly diverges from the receive times across its
//! span. [`ClockSkew`] is a fixed-point rate factor (1.0 = no drift) applied
//! to every tmsp-derived duration; [`SkewSolver`] estimates the factor per
//! ECU by narrowing in on the value that minimizes the worst logger-observed
//! latency over all of the ECU's lifecycles.
//!
//! All `tmsp × skew` products go through the fixed-point multiply below
//! instead of floating point, so repeated conversions to and from integer
//! microseconds cannot accumulate rounding drift.

use crate::lifecycle::Lifecycle;
use crate::types::DltMessage;

/// Fractional bits of the fixed-point skew factor
pub const SKEW_FRACT_BITS: u32 = 15;

const SKEW_ONE: i64 = 1 << SKEW_FRACT_BITS;

/// A clock rate ratio stored as a Q15 fixed-point factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSkew {
    m: i64,
}

impl ClockSkew {
    /// The no-drift factor 1.0
    pub fn identity() -> Self {
        Self { m: SKEW_ONE }
    }

    pub fn from_factor(factor: f64) -> Self {
        Self {
            m: (factor * SKEW_ONE as f64).round() as i64,
        }
    }

    pub fn factor(&self) -> f64 {
        self.m as f64 / SKEW_ONE as f64
    }

    pub fn is_identity(&self) -> bool {
        self.m == SKEW_ONE
    }

    /// Fixed-point multiply `a · m >> 15`.
    ///
    /// Inputs whose upper 15 bits are in use are rejected; the caller
    /// decides what rejection means (the solver treats the probe as
    /// infeasible).
    pub fn checked_scale(&self, a: i64) -> Option<i64> {
        if a >> (63 - SKEW_FRACT_BITS) != 0 {
            return None;
        }
        Some(((a as i128 * self.m as i128) >> SKEW_FRACT_BITS) as i64)
    }

    /// Scale a tmsp-derived microsecond count.
    ///
    /// tmsp values are 32-bit ticks of 0.1 ms, so the product always has
    /// headroom; an out-of-range input falls back to the unscaled value.
    pub fn scale_tmsp(&self, a: i64) -> i64 {
        self.checked_scale(a).unwrap_or(a)
    }
}

impl Default for ClockSkew {
    fn default() -> Self {
        Self::identity()
    }
}

/// Per-ECU clock drift estimator.
///
/// Two-sided binary narrowing over the factor interval: from the current
/// best point, probe halfway toward each bound; a probe that lowers the
/// worst-case latency becomes the new best point and pulls the far bound in,
/// any other probe pulls its own bound in. The fixed iteration count gives
/// roughly 2⁻²⁰ relative resolution and bounded work.
pub struct SkewSolver;

impl SkewSolver {
    pub const MAX_ITERATIONS: u32 = 20;
    pub const SKEW_MIN: f64 = 0.5;
    pub const SKEW_MAX: f64 = 1.5;

    /// Run the narrowing loop against an arbitrary evaluation callback.
    ///
    /// `eval` returns the worst-case latency at a candidate factor, or
    /// `None` when the candidate is infeasible (negative latency or
    /// fixed-point overflow). Exposed separately so callers can solve over
    /// any set of lifecycles.
    pub fn solve_with<F>(eval: F) -> ClockSkew
    where
        F: Fn(ClockSkew) -> Option<i64>,
    {
        let mut lo = Self::SKEW_MIN;
        let mut hi = Self::SKEW_MAX;
        let mut best = 1.0f64;
        let mut best_latency = match eval(ClockSkew::from_factor(best)) {
            Some(latency) => latency,
            None => return ClockSkew::identity(),
        };

        for _ in 0..Self::MAX_ITERATIONS {
            let left = (best + lo) / 2.0;
            match eval(ClockSkew::from_factor(left)) {
                Some(latency) if latency < best_latency => {
                    hi = best;
                    best = left;
                    best_latency = latency;
                }
                _ => lo = left,
            }

            let right = (best + hi) / 2.0;
            match eval(ClockSkew::from_factor(right)) {
                Some(latency) if latency < best_latency => {
                    lo = best;
                    best = right;
                    best_latency = latency;
                }
                _ => hi = right,
            }
        }

        ClockSkew::from_factor(best)
    }

    /// Estimate the drift factor for one ECU from its lifecycles.
    pub fn solve_for_lifecycles(lifecycles: &[Lifecycle], msgs: &[DltMessage]) -> ClockSkew {
        if !lifecycles.iter().any(|lc| lc.rel_offset_valid) {
            // no relative timestamps anywhere, nothing to estimate
            return ClockSkew::identity();
        }
        let skew = Self::solve_with(|candidate| Self::max_latency(lifecycles, msgs, candidate));
        log::debug!("estimated clock skew factor {:.6}", skew.factor());
        skew
    }

    /// Worst logger-observed latency across all lifecycles at a candidate
    /// factor. For each lifecycle the begin is recomputed as the minimum of
    /// `recv − skew·tmsp` over its members, and every member's latency
    /// `recv − (begin + skew·tmsp)` must be nonnegative.
    fn max_latency(
        lifecycles: &[Lifecycle],
        msgs: &[DltMessage],
        skew: ClockSkew,
    ) -> Option<i64> {
        let mut worst: i64 = 0;
        for lc in lifecycles {
            let mut begin = i64::MAX;
            for &i in lc.message_indices() {
                let m = &msgs[i];
                begin = begin.min(m.recv_usec() - skew.checked_scale(m.tmsp_usec())?);
            }
            if begin == i64::MAX {
                continue;
            }
            for &i in lc.message_indices() {
                let m = &msgs[i];
                let latency = m.recv_usec() - (begin + skew.checked_scale(m.tmsp_usec())?);
                if latency < 0 {
                    return None;
                }
                worst = worst.max(latency);
            }
        }
        Some(worst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SortConfig;
    use crate::testutil::msg_with_tmsp;

    #[test]
    fn test_identity_scale_is_exact() {
        let skew = ClockSkew::identity();
        assert_eq!(skew.checked_scale(0), Some(0));
        assert_eq!(skew.checked_scale(123_456_789), Some(123_456_789));
        assert!(skew.is_identity());
    }

    #[test]
    fn test_fixed_point_scale() {
        // 1.25 is exactly representable in Q15
        let skew = ClockSkew::from_factor(1.25);
        assert_eq!(skew.checked_scale(1000), Some(1250));
        assert_eq!(skew.checked_scale(4), Some(5));

        let half = ClockSkew::from_factor(0.5);
        assert_eq!(half.checked_scale(1000), Some(500));
    }

    #[test]
    fn test_scale_rejects_wide_inputs() {
        let skew = ClockSkew::identity();
        assert_eq!(skew.checked_scale(1 << 50), None);
        // the total wrapper falls back to the unscaled value
        assert_eq!(skew.scale_tmsp(1 << 50), 1 << 50);
    }

    #[test]
    fn test_solver_stays_at_identity_without_drift() {
        // receive times match the relative timestamps exactly
        let msgs = vec![
            msg_with_tmsp(100, 0, 1_000),
            msg_with_tmsp(101, 0, 11_000),
            msg_with_tmsp(105, 0, 51_000),
        ];
        let mut lc = Lifecycle::seeded(&msgs[0], 0);
        let cfg = SortConfig::new();
        assert!(lc.fits_in(1, &msgs[1], &cfg));
        assert!(lc.fits_in(2, &msgs[2], &cfg));

        let skew = SkewSolver::solve_for_lifecycles(std::slice::from_ref(&lc), &msgs);
        assert!((skew.factor() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_solver_recovers_drift_factor() {
        // ECU ticks run at 1.25x: recv = t0 + 1.25 * tmsp_usec, no jitter.
        // Spacing keeps each candidate start inside the window grown so far.
        let t0: i64 = 1_000 * 1_000_000;
        let ticks = [1_000u32, 4_000, 15_000, 60_000];
        let msgs: Vec<_> = ticks
            .iter()
            .map(|&t| {
                let at = t0 + (t as i64 * 100) * 5 / 4;
                msg_with_tmsp((at / 1_000_000) as u32, (at % 1_000_000) as u32, t)
            })
            .collect();

        let cfg = SortConfig::new();
        let mut lc = Lifecycle::seeded(&msgs[0], 0);
        for (i, m) in msgs.iter().enumerate().skip(1) {
            assert!(lc.fits_in(i, m, &cfg));
        }

        let skew = SkewSolver::solve_for_lifecycles(std::slice::from_ref(&lc), &msgs);
        assert!(
            (skew.factor() - 1.25).abs() < 1e-3,
            "expected ~1.25, got {}",
            skew.factor()
        );
    }

    #[test]
    fn test_solver_identity_without_relative_timestamps() {
        let msgs = vec![msg_with_tmsp(100, 0, 0)];
        let lc = Lifecycle::seeded(&msgs[0], 0);
        let skew = SkewSolver::solve_for_lifecycles(std::slice::from_ref(&lc), &msgs);
        assert!(skew.is_identity());
    }

    #[test]
    fn test_solve_with_infeasible_start() {
        let skew = SkewSolver::solve_with(|_| None);
        assert!(skew.is_identity());
    }
}
