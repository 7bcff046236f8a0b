//! The latency-compensated drift controller (§4.5) — the core of this
//! crate. Owns a second leader connection, dedicated so the event
//! dispatcher's `awaitChange` never starves it (§9).
//!
//! The tolerance table, correction policy and reseek-trigger policy are
//! exposed as free functions over [`FollowerState`] so they can be
//! driven with synthetic sample sequences in tests, independent of any
//! socket (§8).

use std::time::{Duration, Instant};

use crate::follower::FollowerState;
use crate::mpd::{Connection, MpdResult};
use crate::stats::WindowedStat;

/// The minimum drift magnitude below which a track is declared
/// converged (§7: "drift average is below 30 ms across >= 10 samples").
const CONVERGED_THRESHOLD: f64 = 0.030;
const CONVERGED_SAMPLE_COUNT: usize = 10;

/// §9: "the source deliberately subtracts follower status latency from
/// the follower's elapsed rather than adding it". Kept as a single
/// named constant, `+1.0`, multiplying the measured follower-status
/// round trip before it is added to the follower's elapsed — flip this
/// to `-1.0` to try the naive sign, per the Open Question in §9.
pub const FOLLOWER_STATUS_LATENCY_SIGN: f64 = 1.0;

const SAFETY_CLAMP: f64 = 0.300;
const MIN_TOLERANCE_FLOOR: f64 = 0.030;
const PING_TOLERANCE_MIN: f64 = 0.030;
const PING_TOLERANCE_MAX: f64 = 0.200;
const DEFAULT_TOLERANCE: f64 = 0.200;
const TOLERANCE_RELAX_STEP: f64 = 0.025;
const TOLERANCE_RELAX_AFTER: usize = 3;
const LIFETIME_ADJUSTMENTS_FOR_DAMPING: usize = 5;
const ALTERNATING_MODE_AFTER: usize = 5;

/// One pass of §4.5.1-§4.5.3 over one follower; `true` if a reseek was
/// applied.
pub async fn process_follower(
    leader: &mut Connection,
    leader_pings: &mut WindowedStat,
    follower: &mut FollowerState,
) -> MpdResult<bool> {
    let _ = leader.timed_ping(leader_pings).await;
    let _ = follower.connection.timed_ping(&mut follower.pings).await;

    let leader_status = leader.status().await;

    let t_f_start = Instant::now();
    let follower_status = follower.connection.status().await;
    let t_f = t_f_start.elapsed().as_secs_f64();

    if follower.reset_on_track_change(follower_status.current_track) {
        follower.current_track_index = follower_status.current_track;
        follower.refresh_current_filetype();
        tracing::debug!(
            host = %follower.endpoint,
            track = ?follower.current_track_index,
            "track change observed, per-track windows reset"
        );
    }

    let (Some(leader_elapsed), Some(follower_elapsed)) =
        (leader_status.elapsed, follower_status.elapsed)
    else {
        return Ok(false);
    };

    let sample = drift_sample(leader_elapsed, follower_elapsed, t_f);
    follower.current_track_differences.push(sample);
    update_convergence(follower);

    if !should_reseek(follower, leader_pings) {
        return Ok(false);
    }

    let Some(track_index) = follower_status.current_track else {
        return Ok(false);
    };

    let (correction, is_ping_based) = compute_correction(follower);
    let signed = if is_ping_based { correction } else { -correction };
    let position = leader_elapsed - signed;
    if position < 0.0 {
        return Ok(false);
    }

    match follower.connection.seek(track_index, position).await {
        Ok(()) => {
            follower.record_adjustment(signed);
            follower.current_track_differences.clear();
            Ok(true)
        }
        Err(error) => {
            follower.queue_version = None;
            follower.current_track_adjustments.clear();
            follower.connection.check_alive().await;
            Err(error)
        }
    }
}

/// `Delta = elapsed_leader - (elapsed_follower + t_F)` (§4.5.1 step 5).
fn drift_sample(leader_elapsed: f64, follower_elapsed: f64, follower_status_latency: f64) -> f64 {
    leader_elapsed - (follower_elapsed + FOLLOWER_STATUS_LATENCY_SIGN * follower_status_latency)
}

/// Detect the "hopeless no more" / "good enough" outcome (§7): once
/// >= 10 samples show the moving average under 30 ms, stop spending
/// corrections on this track.
pub fn update_convergence(follower: &mut FollowerState) {
    let converged = follower.current_track_differences.len() >= CONVERGED_SAMPLE_COUNT
        && follower.current_track_differences.moving_average().abs() < CONVERGED_THRESHOLD;
    if converged {
        follower.current_track_should_seek = false;
    }
}

/// Tolerance `M` (§4.5.2): the current reseek threshold for a follower.
pub fn tolerance(
    differences: &WindowedStat,
    leader_pings: &WindowedStat,
    follower_pings: &WindowedStat,
    current_track_adjustment_count: usize,
) -> f64 {
    let n = differences.len();
    let max_abs = differences.max().abs().max(differences.min().abs());
    let floor = MIN_TOLERANCE_FLOOR.max(0.5 * max_abs);

    let base = if n >= 10 {
        (differences.moving_range() / 4.0 + differences.moving_average().abs() / 2.0).max(floor)
    } else if n >= 5 {
        (differences.moving_range() / 2.0).max(floor)
    } else if !leader_pings.is_empty() || !follower_pings.is_empty() {
        (30.0 * leader_pings.moving_average().max(follower_pings.moving_average()))
            .clamp(PING_TOLERANCE_MIN, PING_TOLERANCE_MAX)
    } else {
        DEFAULT_TOLERANCE
    };

    let relax = if current_track_adjustment_count > TOLERANCE_RELAX_AFTER {
        TOLERANCE_RELAX_STEP * (current_track_adjustment_count - TOLERANCE_RELAX_AFTER) as f64
    } else {
        0.0
    };

    base + relax
}

/// Reseek-trigger policy (§4.5.2): is a correction warranted right now.
pub fn should_reseek(follower: &FollowerState, leader_pings: &WindowedStat) -> bool {
    if !follower.current_track_should_seek {
        return false;
    }
    if follower.current_track_differences.len() < 3 {
        return false;
    }

    let m = tolerance(
        &follower.current_track_differences,
        leader_pings,
        &follower.pings,
        follower.current_track_adjustments.len(),
    );

    let estimate = follower.current_track_differences.moving_average().abs();
    if estimate <= m {
        return false;
    }

    let most_recent = follower
        .current_track_differences
        .snapshot()
        .first()
        .copied()
        .unwrap_or(0.0)
        .abs();
    most_recent > m
}

/// Correction policy (§4.5.3): the correction `a` and whether it came
/// from the ping windows (which is applied as-is) as opposed to a
/// difference-derived correction (which is applied with its sign
/// flipped, per the literal, deliberately asymmetric rule in step 5).
pub fn compute_correction(follower: &FollowerState) -> (f64, bool) {
    if let Some(latency) = follower.endpoint.static_latency {
        return clamp(latency, follower);
    }

    let track_adjustments = follower.current_track_adjustments.len();

    let (mut a, mut is_ping_based) = if track_adjustments == 0 {
        if follower.adjustments.len() > LIFETIME_ADJUSTMENTS_FOR_DAMPING {
            (0.75 * follower.adjustments.moving_average(), false)
        } else {
            (follower.pings.moving_average(), true)
        }
    } else if track_adjustments > ALTERNATING_MODE_AFTER {
        if track_adjustments % 2 == 1 {
            (follower.pings.moving_average(), true)
        } else {
            (follower.current_track_differences.moving_average(), false)
        }
    } else {
        (follower.current_track_differences.moving_average(), false)
    };

    if a.abs() > SAFETY_CLAMP {
        a = follower.pings.moving_average();
        is_ping_based = true;
    }

    (a, is_ping_based)
}

fn clamp(a: f64, follower: &FollowerState) -> (f64, bool) {
    if a.abs() > SAFETY_CLAMP {
        (follower.pings.moving_average(), true)
    } else {
        (a, false)
    }
}

/// Loop cadence (§4.5.4): how long to sleep before the next iteration,
/// given whether any follower was reseeked this iteration and the
/// largest `currentTrackDifferences` length seen among followers
/// actually processed.
pub fn next_sleep(any_reseek: bool, max_differences_len: usize) -> Duration {
    if any_reseek {
        Duration::from_secs(2)
    } else {
        Duration::from_secs_f64(2.0_f64.max(0.4 * max_differences_len as f64))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::endpoint::Endpoint;

    fn follower() -> FollowerState {
        FollowerState::new(Endpoint::parse("localhost:6600", None).unwrap())
    }

    #[test]
    fn tolerance_at_ten_or_more_samples_uses_range_and_average() {
        let mut w = WindowedStat::unbounded();
        for v in [0.180, 0.150, 0.170, 0.160, 0.155, 0.145, 0.150, 0.152, 0.148, 0.151] {
            w.push(v);
        }
        let pings = WindowedStat::bounded(10);
        let m = tolerance(&w, &pings, &pings, 0);
        let expected = (w.moving_range() / 4.0 + w.moving_average().abs() / 2.0)
            .max(0.030_f64.max(0.5 * w.max().abs().max(w.min().abs())));
        assert!((m - expected).abs() < 1e-9);
    }

    #[test]
    fn tolerance_below_five_samples_falls_back_to_ping_based() {
        let mut w = WindowedStat::unbounded();
        w.push(0.1);
        let mut leader_pings = WindowedStat::bounded(10);
        leader_pings.push(0.002);
        let follower_pings = WindowedStat::bounded(10);
        let m = tolerance(&w, &leader_pings, &follower_pings, 0);
        assert_eq!(m, (30.0 * 0.002_f64).clamp(0.030, 0.200));
    }

    #[test]
    fn tolerance_ping_fallback_is_clamped_to_its_range() {
        let mut w = WindowedStat::unbounded();
        w.push(0.1);
        let mut leader_pings = WindowedStat::bounded(10);
        leader_pings.push(1.0); // absurdly large ping
        let follower_pings = WindowedStat::bounded(10);
        assert_eq!(tolerance(&w, &leader_pings, &follower_pings, 0), 0.200);
    }

    #[test]
    fn tolerance_with_no_pings_and_few_samples_is_default() {
        let mut w = WindowedStat::unbounded();
        w.push(0.1);
        let pings = WindowedStat::bounded(10);
        assert_eq!(tolerance(&w, &pings, &pings, 0), 0.200);
    }

    #[test]
    fn tolerance_relaxes_with_repeated_adjustment_failures() {
        let mut w = WindowedStat::unbounded();
        for v in [0.1; 10] {
            w.push(v);
        }
        let pings = WindowedStat::bounded(10);
        let base = tolerance(&w, &pings, &pings, 0);
        let relaxed = tolerance(&w, &pings, &pings, 6);
        assert!(relaxed > base);
        assert!((relaxed - base - 0.025 * 3.0).abs() < 1e-9);
    }

    #[test]
    fn should_reseek_requires_three_samples_minimum() {
        let mut f = follower();
        f.current_track_differences.push(0.5);
        f.current_track_differences.push(0.5);
        let pings = WindowedStat::bounded(10);
        assert!(!should_reseek(&f, &pings));
    }

    #[test]
    fn should_reseek_false_once_track_declared_good_enough() {
        let mut f = follower();
        f.current_track_should_seek = false;
        for v in [0.5, 0.5, 0.5] {
            f.current_track_differences.push(v);
        }
        let pings = WindowedStat::bounded(10);
        assert!(!should_reseek(&f, &pings));
    }

    #[test]
    fn should_reseek_requires_latest_sample_also_over_tolerance() {
        let mut f = follower();
        // old large samples skew the average, but the newest sample is tiny
        for v in [0.5, 0.5, 0.001] {
            f.current_track_differences.push(v);
        }
        let pings = WindowedStat::bounded(10);
        // average is still > tolerance, but newest (0.001) is not.
        assert!(!should_reseek(&f, &pings));
    }

    #[test]
    fn compute_correction_uses_static_latency_when_configured() {
        let mut f = FollowerState::new(Endpoint::parse("localhost:6600/0.123", None).unwrap());
        f.pings.push(0.01);
        let (a, is_ping_based) = compute_correction(&f);
        assert_eq!(a, 0.123);
        assert!(!is_ping_based);
    }

    #[test]
    fn compute_correction_first_correction_uses_pings_when_no_lifetime_history() {
        let mut f = follower();
        f.pings.push(0.010);
        f.pings.push(0.012);
        let (a, is_ping_based) = compute_correction(&f);
        assert!(is_ping_based);
        assert_eq!(a, f.pings.moving_average());
    }

    #[test]
    fn compute_correction_first_correction_dampens_lifetime_adjustments() {
        let mut f = follower();
        for v in [0.1, 0.1, 0.1, 0.1, 0.1, 0.1] {
            f.adjustments.push(v);
        }
        let (a, is_ping_based) = compute_correction(&f);
        assert!(!is_ping_based);
        assert!((a - 0.75 * f.adjustments.moving_average()).abs() < 1e-9);
    }

    #[test]
    fn compute_correction_later_corrections_use_current_track_differences() {
        let mut f = follower();
        f.current_track_adjustments.push(0.05);
        f.current_track_differences.push(0.2);
        let (a, is_ping_based) = compute_correction(&f);
        assert!(!is_ping_based);
        assert_eq!(a, f.current_track_differences.moving_average());
    }

    #[test]
    fn compute_correction_alternates_past_five_track_adjustments() {
        let mut f = follower();
        for _ in 0..6 {
            f.current_track_adjustments.push(0.01);
        }
        f.pings.push(0.003);
        f.current_track_differences.push(0.02);
        // count is now 6 (even) -> difference-based
        let (a, is_ping_based) = compute_correction(&f);
        assert!(!is_ping_based);
        assert_eq!(a, f.current_track_differences.moving_average());

        f.current_track_adjustments.push(0.01);
        // count is now 7 (odd) -> ping-based
        let (a, is_ping_based) = compute_correction(&f);
        assert!(is_ping_based);
        assert_eq!(a, f.pings.moving_average());
    }

    #[test]
    fn compute_correction_safety_clamp_falls_back_to_pings() {
        let mut f = follower();
        f.pings.push(0.004);
        f.current_track_adjustments.push(0.01);
        f.current_track_differences.push(5.0);
        let (a, is_ping_based) = compute_correction(&f);
        assert!(is_ping_based);
        assert_eq!(a, f.pings.moving_average());
    }

    #[test]
    fn next_sleep_is_two_seconds_after_a_reseek() {
        assert_eq!(next_sleep(true, 50), Duration::from_secs(2));
    }

    #[test]
    fn next_sleep_scales_with_sample_count_when_quiescent() {
        assert_eq!(next_sleep(false, 10), Duration::from_secs_f64(4.0));
        assert_eq!(next_sleep(false, 1), Duration::from_secs(2));
    }

    #[test]
    fn update_convergence_stops_seeking_once_quiescent() {
        let mut f = follower();
        for v in [0.010, 0.015, 0.012, 0.018, 0.011, 0.014, 0.013, 0.012, 0.016, 0.010] {
            f.current_track_differences.push(v);
        }
        update_convergence(&mut f);
        assert!(!f.current_track_should_seek);
    }

    #[test]
    fn update_convergence_keeps_seeking_with_fewer_than_ten_samples() {
        let mut f = follower();
        for v in [0.010, 0.010, 0.010] {
            f.current_track_differences.push(v);
        }
        update_convergence(&mut f);
        assert!(f.current_track_should_seek);
    }

    #[test]
    fn drift_sample_adds_follower_status_latency_per_documented_sign() {
        let d = drift_sample(10.0, 9.5, 0.020);
        assert!((d - (10.0 - (9.5 + 0.020))).abs() < 1e-9);
    }
}
