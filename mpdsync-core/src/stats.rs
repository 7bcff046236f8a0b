//! Bounded, ordered sample windows with the four derived quantities the
//! drift controller reads on every iteration: moving average, overall
//! average, min/max and moving range.

use std::fmt;

/// The number of newest samples the "moving" quantities are computed over.
const MOVING_WINDOW: usize = 10;

/// An ordered sequence holding at most `capacity` most-recent samples,
/// newest first. `capacity = None` means unbounded.
#[derive(Debug, Clone)]
pub struct WindowedStat {
    name: Option<String>,
    capacity: Option<usize>,
    samples: Vec<f64>,
}

impl WindowedStat {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            name: None,
            capacity,
            samples: Vec::new(),
        }
    }

    pub fn bounded(capacity: usize) -> Self {
        Self::new(Some(capacity))
    }

    pub fn unbounded() -> Self {
        Self::new(None)
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Push a new sample to the front, evicting the oldest beyond capacity.
    pub fn push(&mut self, value: f64) {
        self.samples.insert(0, value);
        if let Some(cap) = self.capacity {
            self.samples.truncate(cap);
        }
        if let Some(name) = &self.name {
            tracing::trace!(
                name,
                moving_average = self.moving_average(),
                overall_average = self.overall_average(),
                min = self.min(),
                max = self.max(),
                "windowed stat updated"
            );
        }
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Newest-first snapshot of the held samples.
    pub fn snapshot(&self) -> &[f64] {
        &self.samples
    }

    fn moving_slice(&self) -> &[f64] {
        &self.samples[..self.samples.len().min(MOVING_WINDOW)]
    }

    pub fn moving_average(&self) -> f64 {
        average(self.moving_slice())
    }

    pub fn overall_average(&self) -> f64 {
        average(&self.samples)
    }

    pub fn min(&self) -> f64 {
        self.moving_slice()
            .iter()
            .copied()
            .fold(f64::INFINITY, f64::min)
            .normalize_empty()
    }

    pub fn max(&self) -> f64 {
        self.moving_slice()
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max)
            .normalize_empty()
    }

    pub fn overall_min(&self) -> f64 {
        self.samples
            .iter()
            .copied()
            .fold(f64::INFINITY, f64::min)
            .normalize_empty()
    }

    pub fn overall_max(&self) -> f64 {
        self.samples
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max)
            .normalize_empty()
    }

    /// `max - min` over the newest <=10 samples.
    pub fn moving_range(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.max() - self.min()
        }
    }

    /// `max - min` over all held samples.
    pub fn overall_range(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.overall_max() - self.overall_min()
        }
    }
}

trait NormalizeEmpty {
    fn normalize_empty(self) -> f64;
}

impl NormalizeEmpty for f64 {
    fn normalize_empty(self) -> f64 {
        if self.is_finite() {
            self
        } else {
            0.0
        }
    }
}

fn average(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        0.0
    } else {
        samples.iter().sum::<f64>() / samples.len() as f64
    }
}

impl fmt::Display for WindowedStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "moving_avg={:.3} overall_avg={:.3} min={:.3} max={:.3}",
            self.moving_average(),
            self.overall_average(),
            self.min(),
            self.max()
        )
    }
}

impl Default for WindowedStat {
    fn default() -> Self {
        Self::unbounded()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_quantities_are_zero() {
        let w = WindowedStat::bounded(10);
        assert_eq!(w.moving_average(), 0.0);
        assert_eq!(w.overall_average(), 0.0);
        assert_eq!(w.min(), 0.0);
        assert_eq!(w.max(), 0.0);
        assert_eq!(w.moving_range(), 0.0);
        assert_eq!(w.overall_range(), 0.0);
    }

    #[test]
    fn capacity_evicts_oldest() {
        let mut w = WindowedStat::bounded(3);
        w.push(1.0);
        w.push(2.0);
        w.push(3.0);
        w.push(4.0);
        assert_eq!(w.len(), 3);
        // newest-first, oldest (1.0) evicted
        assert_eq!(w.snapshot(), &[4.0, 3.0, 2.0]);
    }

    #[test]
    fn moving_window_caps_at_ten_even_when_unbounded() {
        let mut w = WindowedStat::unbounded();
        for i in 0..15 {
            w.push(i as f64);
        }
        assert_eq!(w.len(), 15);
        // moving average only looks at the newest 10: 14,13,...,5
        let expected: f64 = (5..=14).sum::<i32>() as f64 / 10.0;
        assert!((w.moving_average() - expected).abs() < 1e-9);
        // overall average spans all 15 samples: 0..=14
        let expected_overall: f64 = (0..=14).sum::<i32>() as f64 / 15.0;
        assert!((w.overall_average() - expected_overall).abs() < 1e-9);
    }

    #[test]
    fn moving_range_is_max_minus_min_of_newest_ten() {
        let mut w = WindowedStat::unbounded();
        for v in [0.180, 0.150, 0.170, 0.160, 0.155, 0.145] {
            w.push(v);
        }
        assert!((w.moving_range() - (0.180 - 0.145)).abs() < 1e-9);
    }

    #[test]
    fn sample_order_is_never_reordered_relative_to_older_samples() {
        let mut w = WindowedStat::unbounded();
        w.push(1.0);
        w.push(2.0);
        w.push(3.0);
        assert_eq!(w.snapshot(), &[3.0, 2.0, 1.0]);
    }

    #[test]
    fn display_renders_three_decimals() {
        let mut w = WindowedStat::bounded(10);
        w.push(0.1234);
        assert_eq!(
            format!("{w}"),
            "moving_avg=0.123 overall_avg=0.123 min=0.123 max=0.123"
        );
    }
}
