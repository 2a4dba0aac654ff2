// Online statistics used for trends and display summaries
use std::collections::VecDeque;

/// Exponentially smoothed trend over successive values.
///
/// `trend = previous + smoothing * (value - previous)`; the first value seeds
/// the trend and the observed min/max.
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothedTrend {
    smoothing: f64,
    trend: f64,
    trend_prev: f64,
    min: f64,
    max: f64,
    count: u64,
}

impl SmoothedTrend {
    pub fn new(smoothing: f64) -> Self {
        Self {
            smoothing,
            trend: 0.0,
            trend_prev: 0.0,
            min: 0.0,
            max: 0.0,
            count: 0,
        }
    }

    pub fn update(&mut self, value: f64) -> f64 {
        if self.count == 0 {
            self.trend = value;
            self.trend_prev = value;
            self.min = value;
            self.max = value;
        } else {
            self.trend_prev = self.trend;
            self.trend = self.trend_prev + self.smoothing * (value - self.trend_prev);
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.trend
    }

    pub fn trend(&self) -> f64 {
        self.trend
    }

    /// Trend before the most recent update.
    pub fn previous(&self) -> f64 {
        self.trend_prev
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

/// Welford mean/variance with an additional entry-weighted mean.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    weighted_sum: f64,
    weight: f64,
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, value: f64, weight: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);

        self.weighted_sum += value * weight;
        self.weight += weight;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Mean divided by accumulated weight instead of update count.
    pub fn weighted_mean(&self) -> f64 {
        if self.weight == 0.0 {
            0.0
        } else {
            self.weighted_sum / self.weight
        }
    }

    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }
}

/// Standard deviation over the most recent `history` values.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowedStdDev {
    history: usize,
    window: VecDeque<f64>,
}

impl WindowedStdDev {
    pub fn new(history: usize) -> Self {
        Self {
            history: history.max(1),
            window: VecDeque::with_capacity(history.max(1)),
        }
    }

    pub fn update(&mut self, value: f64) {
        self.window.push_back(value);
        while self.window.len() > self.history {
            self.window.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn std_dev(&self) -> f64 {
        let mut stats = RunningStats::new();
        for value in &self.window {
            stats.update(*value, 1.0);
        }
        stats.std_dev()
    }
}
