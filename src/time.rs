//! Time algebra over scaled integer ticks.
//!
//! A [`Time`] is `ticks / scale` seconds and a [`TimeRange`] covers the
//! half-open interval `[start / scale, (start + duration) / scale)`. Values
//! with different scales are compared exactly by cross-multiplication in
//! 128-bit arithmetic; nothing here goes through floating point.
//!
//! # Ordering
//!
//! Ranges sort by start time, then by end time. Every timeline in a store is
//! non-decreasing under [`TimeRange::compare`], which is what [`search`] and
//! the label join rely on.
//!
//! ```
//! use timeline_store::time::{search, TimeRange};
//!
//! let timeline = [
//!     TimeRange::new(0, 5, 1),
//!     TimeRange::new(5, 4, 1),
//!     TimeRange::new(9, 3, 1),
//! ];
//! assert_eq!(search(&timeline, &TimeRange::new(5, 4, 1)), Some(1));
//! assert_eq!(search(&timeline, &TimeRange::new(1, 3, 1)), None);
//! ```

use std::cmp::Ordering;

/// Size of an encoded [`TimeRange`]: start (i64), duration (i64), scale (i32).
pub const TIME_RANGE_LEN: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Time {
    pub ticks: i64,
    pub scale: i32,
}

impl Time {
    pub fn new(ticks: i64, scale: i32) -> Self {
        Self { ticks, scale }
    }

    /// Compares two instants, possibly expressed with different scales.
    pub fn compare(&self, other: &Time) -> Ordering {
        cmp_scaled(self.ticks as i128, self.scale, other.ticks as i128, other.scale)
    }

    pub fn seconds(&self) -> f64 {
        self.ticks as f64 / self.scale as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeRange {
    pub start: i64,
    pub duration: i64,
    pub scale: i32,
}

impl TimeRange {
    pub fn new(start: i64, duration: i64, scale: i32) -> Self {
        Self {
            start,
            duration,
            scale,
        }
    }

    /// Builds a range from start and stop instants in seconds, rounded to
    /// the nearest tick at `scale`.
    pub fn from_seconds(start: f64, stop: f64, scale: i32) -> Self {
        let start_ticks = (start * scale as f64).round() as i64;
        let stop_ticks = (stop * scale as f64).round() as i64;
        Self::new(start_ticks, stop_ticks - start_ticks, scale)
    }

    pub fn start_time(&self) -> Time {
        Time::new(self.start, self.scale)
    }

    /// End instant; saturates instead of overflowing for extreme ticks.
    pub fn end_time(&self) -> Time {
        Time::new(self.start.saturating_add(self.duration), self.scale)
    }

    /// A range is well formed when its scale is positive and its duration
    /// is not negative.
    pub fn is_valid(&self) -> bool {
        self.scale > 0 && self.duration >= 0
    }

    fn end_ticks(&self) -> i128 {
        self.start as i128 + self.duration as i128
    }

    /// Sort order used for every timeline: start first, end on a tie.
    pub fn compare(&self, other: &TimeRange) -> Ordering {
        cmp_scaled(self.start as i128, self.scale, other.start as i128, other.scale)
            .then_with(|| cmp_scaled(self.end_ticks(), self.scale, other.end_ticks(), other.scale))
    }

    /// Overlap of two ranges. Disjoint ranges give a zero-duration range
    /// located at the later start.
    ///
    /// When the scales differ the result is expressed at their least common
    /// multiple so no precision is lost. If that does not fit an `i32` the
    /// finer of the two scales is used, with the start floored and the end
    /// rounded up, so the result covers the exact overlap.
    ///
    /// The duration is positive exactly when [`TimeRange::intersects`] holds.
    pub fn intersection(&self, other: &TimeRange) -> TimeRange {
        let scale = common_scale(self.scale, other.scale);
        let (a_start, a_end) = self.bounds_at(scale);
        let (b_start, b_end) = other.bounds_at(scale);
        let start = a_start.max(b_start);
        let duration = if self.intersects(other) {
            (a_end.min(b_end) - start).max(1)
        } else {
            0
        };
        TimeRange::new(clamp_i64(start), clamp_i64(duration), scale)
    }

    /// True when the two ranges share a non-empty interval.
    pub fn intersects(&self, other: &TimeRange) -> bool {
        let later_start = match cmp_scaled(
            self.start as i128,
            self.scale,
            other.start as i128,
            other.scale,
        ) {
            Ordering::Less => (other.start as i128, other.scale),
            _ => (self.start as i128, self.scale),
        };
        let ends = cmp_scaled(self.end_ticks(), self.scale, other.end_ticks(), other.scale);
        let earlier_end = match ends {
            Ordering::Greater => (other.end_ticks(), other.scale),
            _ => (self.end_ticks(), self.scale),
        };
        cmp_scaled(later_start.0, later_start.1, earlier_end.0, earlier_end.1) == Ordering::Less
    }

    /// True when `inner` lies entirely within `self`.
    pub fn contains(&self, inner: &TimeRange) -> bool {
        cmp_scaled(self.start as i128, self.scale, inner.start as i128, inner.scale)
            != Ordering::Greater
            && cmp_scaled(inner.end_ticks(), inner.scale, self.end_ticks(), self.scale)
                != Ordering::Greater
    }

    /// True when `time` falls in `[start, end)`.
    pub fn contains_time(&self, time: &Time) -> bool {
        let t = time.ticks as i128;
        cmp_scaled(self.start as i128, self.scale, t, time.scale) != Ordering::Greater
            && cmp_scaled(t, time.scale, self.end_ticks(), self.scale) == Ordering::Less
    }

    pub fn to_le_bytes(&self) -> [u8; TIME_RANGE_LEN] {
        let mut out = [0u8; TIME_RANGE_LEN];
        out[0..8].copy_from_slice(&self.start.to_le_bytes());
        out[8..16].copy_from_slice(&self.duration.to_le_bytes());
        out[16..20].copy_from_slice(&self.scale.to_le_bytes());
        out
    }

    /// Decodes one range. `bytes` must hold at least [`TIME_RANGE_LEN`] bytes.
    pub fn from_le_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < TIME_RANGE_LEN {
            return None;
        }
        let start = i64::from_le_bytes(bytes[0..8].try_into().ok()?);
        let duration = i64::from_le_bytes(bytes[8..16].try_into().ok()?);
        let scale = i32::from_le_bytes(bytes[16..20].try_into().ok()?);
        Some(Self::new(start, duration, scale))
    }

    /// Start floored and end rounded up onto the `scale` grid.
    fn bounds_at(&self, scale: i32) -> (i128, i128) {
        let (to, from) = (scale as i128, self.scale as i128);
        let start = (self.start as i128 * to).div_euclid(from);
        let end = -(-(self.end_ticks() * to)).div_euclid(from);
        (start, end)
    }
}

/// How two timelines relate to each other as sets of ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineRelation {
    /// Same length and pairwise equal.
    Same,
    /// The first timeline contains every range of the second.
    Superset,
    /// Every range of the first timeline is found in the second.
    Subset,
    Other,
}

/// Binary search of `target` in a sorted timeline.
///
/// Returns the index of a range comparing equal to `target`. With duplicate
/// ranges any one of the matching indices may be returned.
pub fn search(timeline: &[TimeRange], target: &TimeRange) -> Option<usize> {
    timeline
        .binary_search_by(|range| range.compare(target))
        .ok()
}

/// Classifies timeline `a` against timeline `b`.
pub fn classify(a: &[TimeRange], b: &[TimeRange]) -> TimelineRelation {
    match a.len().cmp(&b.len()) {
        Ordering::Equal => {
            let same = a
                .iter()
                .zip(b)
                .all(|(x, y)| x.compare(y) == Ordering::Equal);
            if same {
                TimelineRelation::Same
            } else {
                TimelineRelation::Other
            }
        }
        Ordering::Less => {
            if a.iter().all(|range| search(b, range).is_some()) {
                TimelineRelation::Subset
            } else {
                TimelineRelation::Other
            }
        }
        Ordering::Greater => match classify(b, a) {
            TimelineRelation::Subset => TimelineRelation::Superset,
            other => other,
        },
    }
}

fn cmp_scaled(a_ticks: i128, a_scale: i32, b_ticks: i128, b_scale: i32) -> Ordering {
    (a_ticks * b_scale as i128).cmp(&(b_ticks * a_scale as i128))
}

fn common_scale(a: i32, b: i32) -> i32 {
    if a == b {
        return a;
    }
    let lcm = (a as i64 / gcd(a as i64, b as i64)) * b as i64;
    i32::try_from(lcm).unwrap_or(a.max(b))
}

fn gcd(mut a: i64, mut b: i64) -> i64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a.abs().max(1)
}

fn clamp_i64(value: i128) -> i64 {
    value.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(start: i64, stop: i64) -> TimeRange {
        TimeRange::new(start, stop - start, 1)
    }

    #[test]
    fn compare_across_scales() {
        let a = Time::new(1, 2);
        let b = Time::new(500, 1000);
        assert_eq!(a.compare(&b), Ordering::Equal);
        assert_eq!(Time::new(1, 3).compare(&b), Ordering::Less);

        // start tie, end decides
        let short = TimeRange::new(10, 5, 10);
        let long = TimeRange::new(1000, 1000, 1000);
        assert_eq!(short.compare(&long), Ordering::Less);
        assert_eq!(long.compare(&short), Ordering::Greater);
        assert_eq!(TimeRange::new(1, 1, 2).compare(&TimeRange::new(5, 5, 10)), Ordering::Equal);
    }

    #[test]
    fn intersection_and_overlap() {
        let i = r(0, 4).intersection(&r(2, 5));
        assert_eq!(i, r(2, 4));
        assert!(r(0, 4).intersects(&r(2, 5)));

        let disjoint = r(0, 2).intersection(&r(5, 9));
        assert_eq!(disjoint.duration, 0);
        assert!(!r(0, 2).intersects(&r(5, 9)));

        // touching ranges share no interval
        assert!(!r(0, 5).intersects(&r(5, 9)));

        let mixed = TimeRange::new(1, 2, 2).intersection(&TimeRange::new(1, 1, 3));
        assert_eq!(mixed.scale, 6);
        assert_eq!((mixed.start, mixed.duration), (3, 1));
    }

    #[test]
    fn coarse_fallback_keeps_real_overlap() {
        // lcm of two large primes does not fit an i32
        let a = TimeRange::new(0, 1, 999_983);
        let b = TimeRange::new(1, 1, 1_000_003);
        assert!(a.intersects(&b));
        let overlap = a.intersection(&b);
        assert_eq!(overlap.scale, 1_000_003);
        assert_eq!((overlap.start, overlap.duration), (1, 1));

        let later = TimeRange::new(5, 1, 1_000_003);
        assert!(!a.intersects(&later));
        assert_eq!(a.intersection(&later).duration, 0);
    }

    #[test]
    fn containment() {
        assert!(r(0, 10).contains(&r(2, 5)));
        assert!(r(0, 10).contains(&r(0, 10)));
        assert!(!r(2, 5).contains(&r(0, 10)));
        assert!(r(2, 5).contains_time(&Time::new(2, 1)));
        assert!(!r(2, 5).contains_time(&Time::new(5, 1)));
        assert!(r(2, 5).contains_time(&Time::new(9, 2)));
    }

    #[test]
    fn search_timeline() {
        let timeline = [r(0, 5), r(5, 9), r(9, 12)];
        assert_eq!(search(&timeline, &r(5, 9)), Some(1));
        assert_eq!(search(&timeline, &r(1, 4)), None);
        assert_eq!(search(&timeline, &TimeRange::new(18, 6, 2)), Some(2));
        assert_eq!(search(&[], &r(0, 1)), None);
    }

    #[test]
    fn classify_timelines() {
        let full = [r(0, 5), r(5, 9), r(9, 12)];
        let part = [r(0, 5), r(9, 12)];
        let other = [r(0, 5), r(6, 9)];
        assert_eq!(classify(&full, &full), TimelineRelation::Same);
        assert_eq!(classify(&part, &full), TimelineRelation::Subset);
        assert_eq!(classify(&full, &part), TimelineRelation::Superset);
        assert_eq!(classify(&other, &full), TimelineRelation::Other);
        assert_eq!(classify(&other, &part), TimelineRelation::Other);
    }

    #[test]
    fn encoded_layout() {
        let range = TimeRange::new(-3, 7, 1000);
        let bytes = range.to_le_bytes();
        assert_eq!(&bytes[16..20], &1000i32.to_le_bytes());
        assert_eq!(TimeRange::from_le_bytes(&bytes), Some(range));
        assert_eq!(TimeRange::from_le_bytes(&bytes[..10]), None);
    }
}
