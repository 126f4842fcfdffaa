//! TTL Jitter
//!
//! Spreads the expiry of keys written together so they are not all recomputed
//! at the same instant.

use crate::cache::MIN_TTL_SECS;

const PPM: i64 = 1_000_000;

/// Default relative spread: expiries land within ±20% of the base TTL.
pub const DEFAULT_JITTER_RATIO: f64 = 0.2;

// == TTL Jitter ==
/// Randomizes a base TTL by a uniform offset in `[-ratio, +ratio)` of itself,
/// floored to whole seconds and never below `floor_secs`.
///
/// The offset is drawn in parts per million so the bounds are exact integers:
/// a base of 15 never lands below `floor(0.8 * 15) = 12`.
#[derive(Debug, Clone, Copy)]
pub struct TtlJitter {
    spread_ppm: i64,
    floor_secs: u64,
}

impl TtlJitter {
    pub fn new(ratio: f64, floor_secs: u64) -> Self {
        Self {
            spread_ppm: (ratio.clamp(0.0, 1.0) * PPM as f64).round() as i64,
            floor_secs,
        }
    }

    /// Jittered TTL in seconds using a fresh uniform sample.
    pub fn jitter(&self, base_secs: u64) -> u64 {
        self.jitter_with_sample(base_secs, fastrand::f64())
    }

    /// Jittered TTL for a given uniform sample `u` in `[0, 1)`.
    ///
    /// `u = 0` gives the lowest value, `u → 1` approaches the highest.
    pub fn jitter_with_sample(&self, base_secs: u64, u: f64) -> u64 {
        let width = 2 * self.spread_ppm;
        let step = ((u.clamp(0.0, 1.0) * width as f64).floor() as i64).min((width - 1).max(0));
        let offset_ppm = step - self.spread_ppm;

        // offset_ppm >= -PPM, so the factor is never negative
        let factor = (PPM + offset_ppm) as u128;
        let ttl = (base_secs as u128 * factor) / PPM as u128;
        u64::try_from(ttl).unwrap_or(u64::MAX).max(self.floor_secs)
    }
}

impl Default for TtlJitter {
    fn default() -> Self {
        Self::new(DEFAULT_JITTER_RATIO, MIN_TTL_SECS)
    }
}
