//! Internal clock and hashing helpers for the storage engines.
//!
//! The clock is a process-wide atomic nanosecond timestamp: recalibrated
//! from the system clock once a second and stepped forward by 100 ms in
//! between, so deadline checks never pay a `clock_gettime` per access.
//! Reads are lock-free and monotone non-decreasing with 100 ms resolution.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Once;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

static CLOCK: AtomicI64 = AtomicI64::new(0);
static CALIBRATOR: Once = Once::new();

const STEP: Duration = Duration::from_millis(100);
const STEP_NANOS: i64 = 100_000_000;

fn unix_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Returns the cached wall-clock time in nanoseconds.
pub fn now() -> i64 {
    CALIBRATOR.call_once(|| {
        CLOCK.fetch_max(unix_nanos(), Ordering::Relaxed);

        thread::Builder::new()
            .name("meshcache-clock".into())
            .spawn(|| loop {
                // Resync once a second; fetch_max keeps reads monotone
                // if the system clock stepped backwards.
                CLOCK.fetch_max(unix_nanos(), Ordering::Relaxed);
                for _ in 0..9 {
                    thread::sleep(STEP);
                    CLOCK.fetch_add(STEP_NANOS, Ordering::Relaxed);
                }
                thread::sleep(STEP);
            })
            .expect("failed to spawn clock thread");
    });

    CLOCK.load(Ordering::Relaxed)
}

/// BKDR string hash used for bucket selection.
pub fn hash_bkdr(s: &str) -> i32 {
    let mut hash: i32 = 0;
    for b in s.as_bytes() {
        hash = hash.wrapping_mul(131).wrapping_add(*b as i32);
    }
    hash
}

/// Smallest power-of-two-minus-one mask covering `cap`.
pub fn mask_of_next_pow_of_2(cap: u16) -> u16 {
    if cap > 0 && cap & (cap - 1) == 0 {
        return cap - 1;
    }

    let mut cap = cap;
    cap |= cap >> 1;
    cap |= cap >> 2;
    cap |= cap >> 4;
    cap | (cap >> 8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_monotone() {
        let a = now();
        let b = now();
        assert!(a > 0);
        assert!(b >= a);
    }

    #[test]
    fn test_now_tracks_wall_clock() {
        let skew = (now() - unix_nanos()).abs();
        // Within the documented 100 ms resolution (plus slack for CI).
        assert!(skew < 500_000_000, "clock skew too large: {}ns", skew);
    }

    #[test]
    fn test_hash_bkdr_is_stable() {
        assert_eq!(hash_bkdr(""), 0);
        assert_eq!(hash_bkdr("a"), 97);
        assert_eq!(hash_bkdr("ab"), 97 * 131 + 98);
        assert_eq!(hash_bkdr("key"), hash_bkdr("key"));
        assert_ne!(hash_bkdr("key1"), hash_bkdr("key2"));
    }

    #[test]
    fn test_mask_of_next_pow_of_2() {
        assert_eq!(mask_of_next_pow_of_2(0), 0);
        assert_eq!(mask_of_next_pow_of_2(1), 0);
        assert_eq!(mask_of_next_pow_of_2(2), 1);
        assert_eq!(mask_of_next_pow_of_2(3), 3);
        assert_eq!(mask_of_next_pow_of_2(16), 15);
        assert_eq!(mask_of_next_pow_of_2(17), 31);
        assert_eq!(mask_of_next_pow_of_2(1000), 1023);
    }
}
