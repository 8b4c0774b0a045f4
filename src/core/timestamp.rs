//! Media timestamps: a signed rational (numerator/denominator in `ticks`),
//! convertible to a real-valued millisecond quantity.

use std::fmt;

/// Sentinel for "no timestamp known", mirroring FFmpeg's `AV_NOPTS_VALUE` convention
/// at the boundary of the opaque packet/frame types this engine consumes.
pub const NO_PTS: i64 = i64::MIN;

/// A presentation or decode timestamp expressed as `ticks / (num/den)` seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaTimestamp {
    ticks: i64,
    num: i32,
    den: i32,
}

impl MediaTimestamp {
    pub const UNKNOWN: MediaTimestamp = MediaTimestamp { ticks: NO_PTS, num: 1, den: 1 };

    pub fn new(ticks: i64, num: i32, den: i32) -> Self {
        debug_assert!(den != 0, "timestamp time base denominator must be non-zero");
        Self { ticks, num, den }
    }

    /// Construct directly from a millisecond value (time base 1/1000).
    pub fn from_millis(ms: i64) -> Self {
        Self { ticks: ms, num: 1, den: 1000 }
    }

    pub fn is_known(&self) -> bool {
        self.ticks != NO_PTS
    }

    /// Real-valued milliseconds. Undefined (returns `f64::NAN`) for `UNKNOWN`.
    pub fn as_millis_f64(&self) -> f64 {
        if !self.is_known() {
            return f64::NAN;
        }
        self.ticks as f64 * self.num as f64 * 1000.0 / self.den as f64
    }
}

impl fmt::Display for MediaTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_known() {
            write!(f, "{:.3}ms", self.as_millis_f64())
        } else {
            write!(f, "<unknown>")
        }
    }
}

/// Tracks the first valid PTS observed for one stream and normalizes
/// subsequent timestamps against it: the first valid timestamp of a stream
/// maps to 0, later ones are offsets from it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizationBase {
    first_pts_ms: Option<f64>,
}

impl NormalizationBase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize `raw_pts_ms`, latching it as the base if this is the first call.
    pub fn normalize(&mut self, raw_pts_ms: f64) -> f64 {
        match self.first_pts_ms {
            Some(base) => raw_pts_ms - base,
            None => {
                self.first_pts_ms = Some(raw_pts_ms);
                0.0
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.first_pts_ms.is_some()
    }

    pub fn reset(&mut self) {
        self.first_pts_ms = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_timestamp_is_not_known() {
        assert!(!MediaTimestamp::UNKNOWN.is_known());
    }

    #[test]
    fn millis_round_trip() {
        let ts = MediaTimestamp::from_millis(1500);
        assert!((ts.as_millis_f64() - 1500.0).abs() < 1e-9);
    }

    #[test]
    fn normalization_maps_first_sample_to_zero() {
        let mut base = NormalizationBase::new();
        assert_eq!(base.normalize(12345.0), 0.0);
        assert_eq!(base.normalize(12345.0 + 40.0), 40.0);
        assert!(base.is_initialized());
    }

    #[test]
    fn reset_clears_the_base() {
        let mut base = NormalizationBase::new();
        base.normalize(100.0);
        base.reset();
        assert!(!base.is_initialized());
        assert_eq!(base.normalize(500.0), 0.0);
    }
}
