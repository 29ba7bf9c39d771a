//! Canonical spatial units and the sanctioned conversions between them.
//!
//! Positions are **integer centimetres** ([`Point`]); speeds are **f64 metres
//! per second**; durations are milliseconds.  Role and conflux code must not
//! perform its own `/100`-style conversions — everything funnels through
//! [`centimetres_covered`] and [`seconds_to_cover`], so a unit mistake can
//! only live in one place.

use std::fmt;

/// Centimetres per metre, the only scale factor in the kernel.
const CM_PER_M: f64 = 100.0;

/// A 2-D position in integer centimetres.
///
/// Network geometry is supplied in centimetres; i64 gives headroom of
/// ±9.2e16 cm (~6 000 AU), so overflow is not a practical concern.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Point {
    pub x_cm: i64,
    pub y_cm: i64,
}

impl Point {
    #[inline]
    pub fn new(x_cm: i64, y_cm: i64) -> Self {
        Self { x_cm, y_cm }
    }

    /// Manhattan (L1) distance in centimetres.
    #[inline]
    pub fn manhattan_cm(self, other: Point) -> i64 {
        (self.x_cm - other.x_cm).abs() + (self.y_cm - other.y_cm).abs()
    }

    /// Euclidean distance in centimetres.
    pub fn distance_cm(self, other: Point) -> f64 {
        let dx = (self.x_cm - other.x_cm) as f64;
        let dy = (self.y_cm - other.y_cm) as f64;
        (dx * dx + dy * dy).sqrt()
    }

    /// Step `dist_cm` centimetres from `self` toward `target`.
    ///
    /// Overshoot clamps to `target`, so iterated stepping terminates exactly.
    pub fn step_towards(self, target: Point, dist_cm: i64) -> Point {
        let total = self.distance_cm(target);
        if total <= dist_cm as f64 || total == 0.0 {
            return target;
        }
        let f = dist_cm as f64 / total;
        Point {
            x_cm: self.x_cm + ((target.x_cm - self.x_cm) as f64 * f).round() as i64,
            y_cm: self.y_cm + ((target.y_cm - self.y_cm) as f64 * f).round() as i64,
        }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}cm, {}cm)", self.x_cm, self.y_cm)
    }
}

/// Distance in centimetres covered at `speed_mps` over `elapsed_ms`.
///
/// The single sanctioned speed→distance conversion.  Truncation (not
/// rounding) keeps covered distance conservative: an agent never advances
/// further than physics allows.
#[inline]
pub fn centimetres_covered(speed_mps: f64, elapsed_ms: u64) -> i64 {
    (speed_mps * CM_PER_M * elapsed_ms as f64 / 1000.0) as i64
}

/// Seconds needed to cover `dist_cm` at `speed_mps`.
///
/// Returns `f64::INFINITY` when the speed is zero or negative, which
/// callers treat as "cannot advance this tick".
#[inline]
pub fn seconds_to_cover(dist_cm: i64, speed_mps: f64) -> f64 {
    if speed_mps <= 0.0 {
        return f64::INFINITY;
    }
    dist_cm as f64 / (speed_mps * CM_PER_M)
}
