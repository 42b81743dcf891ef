//! Wall-anchored monotonic nanosecond clock.
//!
//! `Instant` is immune to wall-clock jumps but has no absolute meaning, so a
//! single wall reference is captured on first use and every later reading is
//! the reference plus the monotonic elapsed time. The result is comparable as
//! a duration and serializable as an absolute unix timestamp, even if NTP
//! steps the system clock mid-run.

use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

struct ClockBase {
    wall_ns: i64,
    started: Instant,
}

static BASE: OnceLock<ClockBase> = OnceLock::new();

fn base() -> &'static ClockBase {
    BASE.get_or_init(|| ClockBase {
        wall_ns: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0),
        started: Instant::now(),
    })
}

/// Current unix time in nanoseconds, monotonic between calls.
#[inline]
pub fn now_ns() -> i64 {
    let b = base();
    b.wall_ns + b.started.elapsed().as_nanos() as i64
}

/// Current unix time in milliseconds.
#[inline]
pub fn now_ms() -> i64 {
    now_ns() / 1_000_000
}

#[inline]
pub fn ms_to_ns(ms: i64) -> i64 {
    ms * 1_000_000
}

#[inline]
pub fn ns_to_ms_f64(ns: i64) -> f64 {
    ns as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ns_is_monotonic() {
        let a = now_ns();
        let b = now_ns();
        assert!(b >= a);
    }

    #[test]
    fn conversions() {
        assert_eq!(ms_to_ns(25), 25_000_000);
        assert!((ns_to_ms_f64(1_500_000) - 1.5).abs() < 1e-12);
    }
}
