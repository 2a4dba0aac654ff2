// Series domain model - windows, bounds and arithmetic over datapoints
use std::ops::Range;

use super::calendar::Period;
use super::datapoint::{Datapoint, SeriesConfig, SeriesId};
use super::stats::RunningStats;
use super::trend::TrendState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl ArithmeticOp {
    /// `None` for division by zero.
    pub fn apply(self, lhs: f64, rhs: f64) -> Option<f64> {
        match self {
            ArithmeticOp::Add => Some(lhs + rhs),
            ArithmeticOp::Subtract => Some(lhs - rhs),
            ArithmeticOp::Multiply => Some(lhs * rhs),
            ArithmeticOp::Divide if rhs == 0.0 => None,
            ArithmeticOp::Divide => Some(lhs / rhs),
        }
    }
}

/// Runtime view over a [`SeriesConfig`].
///
/// The backing sequence is ordered by start time and split into three
/// contiguous windows: points before the display range kept for history and
/// interpolation, the visible points, and the lookahead after the range.
#[derive(Debug, Clone)]
pub struct Series {
    config: SeriesConfig,
    enabled: bool,
    datapoints: Vec<Datapoint>,
    pre: Range<usize>,
    visible: Range<usize>,
    post: Range<usize>,
    visible_value_min: Option<f64>,
    visible_value_max: Option<f64>,
    visible_time_min: Option<i64>,
    visible_time_max: Option<i64>,
    time_deltas: RunningStats,
    trend_state: TrendState,
    trend_value: f64,
    dependents: Vec<SeriesId>,
    dependees: Vec<SeriesId>,
    unresolved: Vec<String>,
    cyclic: bool,
}

impl Series {
    pub fn new(config: SeriesConfig, enabled: bool) -> Self {
        Self {
            config,
            enabled,
            datapoints: Vec::new(),
            pre: 0..0,
            visible: 0..0,
            post: 0..0,
            visible_value_min: None,
            visible_value_max: None,
            visible_time_min: None,
            visible_time_max: None,
            time_deltas: RunningStats::new(),
            trend_state: TrendState::Unknown,
            trend_value: 0.0,
            dependents: Vec::new(),
            dependees: Vec::new(),
            unresolved: Vec::new(),
            cyclic: false,
        }
    }

    pub fn id(&self) -> SeriesId {
        self.config.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &SeriesConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: SeriesConfig) {
        self.config = config;
    }

    pub fn is_synthetic(&self) -> bool {
        self.config.is_synthetic()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn datapoints(&self) -> &[Datapoint] {
        &self.datapoints
    }

    pub fn into_datapoints(self) -> Vec<Datapoint> {
        self.datapoints
    }

    pub fn pre_visible(&self) -> &[Datapoint] {
        &self.datapoints[self.pre.clone()]
    }

    pub fn visible(&self) -> &[Datapoint] {
        &self.datapoints[self.visible.clone()]
    }

    pub fn post_visible(&self) -> &[Datapoint] {
        &self.datapoints[self.post.clone()]
    }

    pub fn visible_value_min(&self) -> Option<f64> {
        self.visible_value_min
    }

    pub fn visible_value_max(&self) -> Option<f64> {
        self.visible_value_max
    }

    pub fn visible_time_min(&self) -> Option<i64> {
        self.visible_time_min
    }

    pub fn visible_time_max(&self) -> Option<i64> {
        self.visible_time_max
    }

    /// Mean gap in seconds between consecutive visible datapoints.
    pub fn mean_time_delta(&self) -> f64 {
        self.time_deltas.mean()
    }

    /// Gap mean weighted by the entry count of the later datapoint.
    pub fn weighted_time_delta(&self) -> f64 {
        self.time_deltas.weighted_mean()
    }

    pub fn trend_state(&self) -> TrendState {
        self.trend_state
    }

    pub fn trend_value(&self) -> f64 {
        self.trend_value
    }

    pub fn set_trend(&mut self, state: TrendState, value: f64) {
        self.trend_state = state;
        self.trend_value = value;
    }

    /// Series this one reads from.
    pub fn dependents(&self) -> &[SeriesId] {
        &self.dependents
    }

    /// Series that read from this one.
    pub fn dependees(&self) -> &[SeriesId] {
        &self.dependees
    }

    /// Formula references that did not match a registered series.
    pub fn unresolved(&self) -> &[String] {
        &self.unresolved
    }

    pub fn is_cyclic(&self) -> bool {
        self.cyclic
    }

    pub(crate) fn set_graph_edges(
        &mut self,
        dependents: Vec<SeriesId>,
        dependees: Vec<SeriesId>,
        unresolved: Vec<String>,
        cyclic: bool,
    ) {
        self.dependents = dependents;
        self.dependees = dependees;
        self.unresolved = unresolved;
        self.cyclic = cyclic;
    }

    /// Replaces the backing sequence. Each window must be ascending and the
    /// windows must follow one another in time.
    pub fn set_datapoints(&mut self, pre: Vec<Datapoint>, visible: Vec<Datapoint>, post: Vec<Datapoint>) {
        let pre_end = pre.len();
        let visible_end = pre_end + visible.len();

        let mut datapoints = pre;
        datapoints.extend(visible);
        datapoints.extend(post);

        self.pre = 0..pre_end;
        self.visible = pre_end..visible_end;
        self.post = visible_end..datapoints.len();
        self.datapoints = datapoints;
        self.recompute_bounds();
    }

    fn recompute_bounds(&mut self) {
        self.visible_value_min = None;
        self.visible_value_max = None;
        self.visible_time_min = None;
        self.visible_time_max = None;
        self.time_deltas = RunningStats::new();

        let visible = &self.datapoints[self.visible.clone()];
        for d in visible {
            self.visible_time_min = Some(self.visible_time_min.map_or(d.start_time, |t| t.min(d.start_time)));
            self.visible_time_max = Some(self.visible_time_max.map_or(d.start_time, |t| t.max(d.start_time)));
        }
        for pair in visible.windows(2) {
            let gap = (pair[1].start_time - pair[0].start_time) as f64;
            self.time_deltas.update(gap, pair[1].entry_count.max(1) as f64);
        }
        let visible_values: Vec<f64> = visible.iter().map(|d| d.value).collect();
        for value in visible_values {
            self.widen_value_bounds(value);
        }

        // The segment from the last point inside to the first point outside
        // always crosses the window edge, so it leaves the current bounds
        // exactly when the outside value does. Widen only in that case.
        let pre = &self.datapoints[self.pre.clone()];
        let visible = &self.datapoints[self.visible.clone()];
        let post = &self.datapoints[self.post.clone()];

        let after = post
            .first()
            .filter(|_| visible.last().or(pre.last()).is_some())
            .map(|d| d.value);
        let before = pre
            .last()
            .filter(|_| visible.first().or(post.first()).is_some())
            .map(|d| d.value);

        for value in after.into_iter().chain(before) {
            if self.segment_exceeds_bounds(value) {
                self.widen_value_bounds(value);
            }
        }
    }

    fn segment_exceeds_bounds(&self, outside: f64) -> bool {
        match (self.visible_value_min, self.visible_value_max) {
            (Some(min), Some(max)) => outside < min || outside > max,
            _ => true,
        }
    }

    fn widen_value_bounds(&mut self, value: f64) {
        self.visible_value_min = Some(self.visible_value_min.map_or(value, |m| m.min(value)));
        self.visible_value_max = Some(self.visible_value_max.map_or(value, |m| m.max(value)));
    }

    /// Replaces the whole sequence and makes every point visible.
    fn replace_all(&mut self, datapoints: Vec<Datapoint>) {
        self.set_datapoints(Vec::new(), datapoints, Vec::new());
    }

    /// Applies `value op scalar` to every point. The scalar may come from
    /// either side of the operator in a formula; both orders land here.
    pub fn apply_scalar(&mut self, op: ArithmeticOp, scalar: f64) {
        let datapoints = std::mem::take(&mut self.datapoints)
            .into_iter()
            .filter_map(|mut d| {
                d.value = op.apply(d.value, scalar)?;
                Some(d)
            })
            .collect();
        self.replace_all(datapoints);
    }

    pub fn negate(&mut self) {
        self.apply_scalar(ArithmeticOp::Multiply, -1.0);
    }

    /// Points with a zero value are dropped.
    pub fn reciprocal(&mut self) {
        let datapoints = std::mem::take(&mut self.datapoints)
            .into_iter()
            .filter_map(|mut d| {
                d.value = ArithmeticOp::Divide.apply(1.0, d.value)?;
                Some(d)
            })
            .collect();
        self.replace_all(datapoints);
    }

    /// Combines with `other` over the union of both timestamp sets.
    ///
    /// A side without a point at a timestamp is interpolated from its
    /// neighbours; when either side cannot cover the timestamp no point is
    /// produced.
    pub fn apply_series(&mut self, op: ArithmeticOp, other: &Series) {
        let mut times: Vec<i64> = self
            .datapoints
            .iter()
            .chain(other.datapoints.iter())
            .map(|d| d.start_time)
            .collect();
        times.sort_unstable();
        times.dedup();

        let mut combined = Vec::with_capacity(times.len());
        for ts in times {
            let (Some(lhs), Some(rhs)) = (self.interpolate_value(ts), other.interpolate_value(ts)) else {
                continue;
            };
            let Some(value) = op.apply(lhs, rhs) else {
                continue;
            };
            let Some(template) = self.exact(ts).or_else(|| other.exact(ts)) else {
                continue;
            };
            let mut d = template.clone();
            d.series_id = self.id();
            d.value = value;
            combined.push(d);
        }
        self.replace_all(combined);
    }

    /// Each point takes the value of the point before it; the first keeps its own.
    pub fn previous_value(&mut self) {
        let mut previous: Option<f64> = None;
        for d in &mut self.datapoints {
            let current = d.value;
            if let Some(p) = previous {
                d.value = p;
            }
            previous = Some(current);
        }
        self.recompute_bounds();
    }

    /// Each point's value becomes the start time of the point before it; the
    /// first uses its own start time.
    pub fn previous_timestamp(&mut self) {
        let mut previous: Option<i64> = None;
        for d in &mut self.datapoints {
            d.value = previous.unwrap_or(d.start_time) as f64;
            previous = Some(d.start_time);
        }
        self.recompute_bounds();
    }

    /// Expresses values in units of `period` (divides by its length).
    pub fn in_period(&mut self, period: Period) {
        if period.seconds() > 0 {
            self.apply_scalar(ArithmeticOp::Divide, period.seconds() as f64);
        }
    }

    /// Inverse of [`Series::in_period`].
    pub fn as_period(&mut self, period: Period) {
        if period.seconds() > 0 {
            self.apply_scalar(ArithmeticOp::Multiply, period.seconds() as f64);
        }
    }

    fn exact(&self, ts: i64) -> Option<&Datapoint> {
        self.datapoints
            .binary_search_by_key(&ts, |d| d.start_time)
            .ok()
            .map(|idx| &self.datapoints[idx])
    }

    /// Closest point strictly before `ts`, or the point at `ts` if present.
    pub fn find_pre_neighbor(&self, ts: i64) -> Option<&Datapoint> {
        let idx = self.datapoints.partition_point(|d| d.start_time < ts);
        match self.datapoints.get(idx) {
            Some(d) if d.start_time == ts => Some(d),
            _ => idx.checked_sub(1).map(|i| &self.datapoints[i]),
        }
    }

    /// Closest point strictly after `ts`, or the point at `ts` if present.
    pub fn find_post_neighbor(&self, ts: i64) -> Option<&Datapoint> {
        let idx = self.datapoints.partition_point(|d| d.start_time <= ts);
        if idx > 0 && self.datapoints[idx - 1].start_time == ts {
            return Some(&self.datapoints[idx - 1]);
        }
        self.datapoints.get(idx)
    }

    /// Exact value at `ts`, linear interpolation between neighbours, or
    /// `None` outside the span of the sequence.
    pub fn interpolate_value(&self, ts: i64) -> Option<f64> {
        let pre = self.find_pre_neighbor(ts)?;
        if pre.start_time == ts {
            return Some(pre.value);
        }
        let post = self.find_post_neighbor(ts)?;
        let span = (post.start_time - pre.start_time) as f64;
        let offset = (ts - pre.start_time) as f64;
        Some(pre.value + (post.value - pre.value) * offset / span)
    }
}
