// Collector - series registry and the gather/aggregate/synthesize pipeline
use crate::application::aggregator::aggregate;
use crate::application::datapoint_cache::DatapointCache;
use crate::application::dependency_graph::DependencyGraph;
use crate::application::formula::FormulaEngine;
use crate::application::series_repository::SeriesRepository;
use crate::domain::calendar::{CalendarPeriodResolver, Period};
use crate::domain::datapoint::{Datapoint, SeriesConfig, SeriesId};
use crate::domain::series::Series;
use crate::domain::stats::{SmoothedTrend, WindowedStdDev};
use crate::domain::trend::TrendState;
use crate::infrastructure::config::CollectorSettings;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

#[derive(Debug, Clone, PartialEq)]
pub enum CollectorEvent {
    MetadataSynced { series: usize, unresolved: usize },
    Gathered { start: i64, end: i64, series: usize },
    TrendUpdated { series_id: SeriesId, state: TrendState, value: f64 },
}

#[derive(Default)]
struct CollectorState {
    series: BTreeMap<SeriesId, Series>,
    caches: HashMap<SeriesId, DatapointCache>,
    graph: DependencyGraph,
    query_start: i64,
    query_end: i64,
}

/// Owns every series of a session.
///
/// Each public operation holds the state lock for its whole duration, so
/// operations never interleave. Repository reads made while refilling caches
/// happen under that lock.
pub struct Collector {
    repository: Arc<dyn SeriesRepository>,
    formulas: Arc<dyn FormulaEngine>,
    settings: CollectorSettings,
    resolver: CalendarPeriodResolver,
    events: Option<mpsc::Sender<CollectorEvent>>,
    state: Mutex<CollectorState>,
}

impl Collector {
    pub fn new(
        repository: Arc<dyn SeriesRepository>,
        formulas: Arc<dyn FormulaEngine>,
        settings: CollectorSettings,
    ) -> Self {
        let resolver = CalendarPeriodResolver::with_offset_minutes(
            settings.utc_offset_minutes,
            settings.calendar_first_year,
            settings.calendar_last_year,
        );
        Self {
            repository,
            formulas,
            settings,
            resolver,
            events: None,
            state: Mutex::new(CollectorState::default()),
        }
    }

    /// Publish pipeline events on `events`. Events are dropped when the
    /// channel is full.
    pub fn with_events(mut self, events: mpsc::Sender<CollectorEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn resolver(&self) -> &CalendarPeriodResolver {
        &self.resolver
    }

    fn emit(&self, event: CollectorEvent) {
        if let Some(events) = &self.events {
            if let Err(e) = events.try_send(event) {
                tracing::debug!("Dropping collector event: {}", e);
            }
        }
    }

    /// Registers new series, updates known ones, drops vanished ones and
    /// rebuilds the dependency graph once every series exists.
    pub async fn sync_metadata(&self, disable_new_by_default: bool) {
        let mut state = self.state.lock().await;

        let configs = match self.repository.fetch_all_series_configs().await {
            Ok(configs) => configs,
            Err(e) => {
                tracing::warn!("Error fetching series configs: {}", e);
                return;
            }
        };

        let known: HashSet<SeriesId> = configs.iter().map(|c| c.id).collect();
        state.series.retain(|id, _| known.contains(id));
        state.caches.retain(|id, _| known.contains(id));

        for config in &configs {
            match state.series.get_mut(&config.id) {
                Some(series) => series.set_config(config.clone()),
                None => {
                    tracing::debug!("Registering series {} ({})", config.id, config.name);
                    state
                        .series
                        .insert(config.id, Series::new(config.clone(), !disable_new_by_default));
                }
            }
        }

        let graph = DependencyGraph::build(&configs, self.formulas.as_ref());
        let mut unresolved = 0;
        for (id, series) in state.series.iter_mut() {
            unresolved += graph.unresolved(*id).len();
            series.set_graph_edges(
                graph.dependents(*id).to_vec(),
                graph.dependees(*id).to_vec(),
                graph.unresolved(*id).to_vec(),
                graph.is_cyclic(*id),
            );
        }
        state.graph = graph;

        tracing::info!(
            "Synced metadata: {} series, {} unresolved references",
            state.series.len(),
            unresolved
        );
        self.emit(CollectorEvent::MetadataSynced {
            series: state.series.len(),
            unresolved,
        });
    }

    /// Loads, synthesizes and aggregates every series needed to display `[start, end]`.
    pub async fn gather(&self, start: i64, end: i64) {
        let mut state = self.state.lock().await;
        if start > end {
            tracing::debug!("Ignoring gather for empty range [{}, {}]", start, end);
            return;
        }
        state.query_start = start;
        state.query_end = end;

        let needed = gather_set(&state);
        let (synthetic, recorded): (Vec<SeriesId>, Vec<SeriesId>) = needed
            .iter()
            .copied()
            .partition(|id| state.series.get(id).is_some_and(Series::is_synthetic));

        for &id in &recorded {
            let (lo, hi) = self.load_edges(&state, &needed, id, start, end);
            let (pre, visible, post) = self.slice_window(&mut state, id, lo, hi).await;
            if let Some(series) = state.series.get_mut(&id) {
                series.set_datapoints(pre, visible, post);
            }
        }

        let order: Vec<SeriesId> = state.graph.synthesis_order().to_vec();
        for &id in &synthetic {
            if !order.contains(&id) {
                tracing::warn!("Series {} cannot be synthesized, its dependencies form a cycle", id);
                if let Some(series) = state.series.get_mut(&id) {
                    series.set_datapoints(Vec::new(), Vec::new(), Vec::new());
                }
            }
        }
        for id in order.into_iter().filter(|id| needed.contains(id)) {
            self.generate_synthetic(&mut state, id, start, end);
        }

        for &id in &recorded {
            if state.series.get(&id).is_some_and(Series::is_enabled) {
                self.aggregate_series(&mut state, id, start, end);
            }
        }

        tracing::info!("Gathered {} series for [{}, {}]", needed.len(), start, end);
        self.emit(CollectorEvent::Gathered {
            start,
            end,
            series: needed.len(),
        });
    }

    async fn slice_window(
        &self,
        state: &mut CollectorState,
        id: SeriesId,
        start: i64,
        end: i64,
    ) -> (Vec<Datapoint>, Vec<Datapoint>, Vec<Datapoint>) {
        let history = self.settings.history;
        let repository = self.repository.as_ref();
        let cache = state.caches.entry(id).or_default();

        cache.populate_range(repository, id, start, end).await;
        cache.populate_before(repository, id, start, history).await;
        cache.populate_after(repository, id, end, 1).await;

        (
            cache.before(history, start),
            cache.range_inclusive(start, end),
            cache.after(1, end),
        )
    }

    /// The query window widened to whole periods of `id` itself and of every
    /// synthetic series in `needed` that reads it.
    fn load_edges(
        &self,
        state: &CollectorState,
        needed: &HashSet<SeriesId>,
        id: SeriesId,
        start: i64,
        end: i64,
    ) -> (i64, i64) {
        let own = state
            .series
            .get(&id)
            .filter(|s| s.is_enabled())
            .map(|s| s.config().period);
        let readers = needed
            .iter()
            .filter_map(|reader| state.series.get(reader))
            .filter(|s| s.is_synthetic() && dependency_closure(state, s.id()).contains(&id))
            .map(|s| s.config().period);

        own.into_iter()
            .chain(readers)
            .map(|configured| self.effective_period(configured, start, end))
            .fold((start, end), |(lo, hi), period| {
                (
                    lo.min(self.resolver.period_start(start, period)),
                    hi.max(self.resolver.period_end(end, period)),
                )
            })
    }

    /// Buckets `points` and splits them around the periods touching `[lo, hi]`.
    /// Only that span is zerofilled; earlier and later points keep their own
    /// buckets.
    fn bucket_windows(
        &self,
        points: Vec<Datapoint>,
        config: &SeriesConfig,
        period: Period,
        lo: i64,
        hi: i64,
    ) -> (Vec<Datapoint>, Vec<Datapoint>, Vec<Datapoint>) {
        let first = self.resolver.period_start(lo, period);
        let last = self.resolver.period_end(hi, period);
        let (pre, visible, post) = split_windows(points, first, last);

        let bucket = |points: Vec<Datapoint>, zerofill: bool| {
            aggregate(points, config.aggregation, period, zerofill, &self.resolver)
        };
        (
            bucket(pre, false),
            bucket(visible, config.zerofill),
            bucket(post, false),
        )
    }

    fn effective_period(&self, configured: Option<Period>, start: i64, end: i64) -> Period {
        match configured {
            Some(period) => period,
            None if self.settings.auto_aggregate => CalendarPeriodResolver::pick_display_period(start, end),
            None => Period::None,
        }
    }

    /// Applies the series formula over its dependents and stores the result
    /// split around the dependents' visible span.
    fn generate_synthetic(&self, state: &mut CollectorState, id: SeriesId, start: i64, end: i64) {
        let Some(series) = state.series.get(&id) else {
            return;
        };
        let config = series.config().clone();
        let formula = config.formula.clone().unwrap_or_default();
        let dependents: Vec<&Series> = series
            .dependents()
            .iter()
            .filter_map(|d| state.series.get(d))
            .collect();

        let visible_first = dependents
            .iter()
            .filter_map(|s| s.visible().first().map(|d| d.start_time))
            .min();
        let visible_last = dependents
            .iter()
            .filter_map(|s| s.visible().last().map(|d| d.start_time))
            .max();
        let result = self.formulas.apply(&formula, &dependents);

        let points = match result {
            Ok(points) => points,
            Err(e) => {
                tracing::warn!("Error evaluating formula of series {}: {}", id, e);
                Vec::new()
            }
        };
        let points: Vec<Datapoint> = points
            .into_iter()
            .map(|d| Datapoint {
                series_id: id,
                synthetic: true,
                ..d
            })
            .collect();

        let (lo, hi) = match (visible_first, visible_last) {
            (Some(lo), Some(hi)) if lo.max(start) <= hi.min(end) => (lo.max(start), hi.min(end)),
            _ => (start, end),
        };
        let period = self.effective_period(config.period, start, end);
        let (pre, visible, post) = self.bucket_windows(points, &config, period, lo, hi);

        tracing::debug!(
            "Synthesized series {}: {} pre, {} visible, {} post",
            id,
            pre.len(),
            visible.len(),
            post.len()
        );
        if let Some(series) = state.series.get_mut(&id) {
            series.set_datapoints(pre, visible, post);
        }
    }

    fn aggregate_series(&self, state: &mut CollectorState, id: SeriesId, start: i64, end: i64) {
        let Some(series) = state.series.get_mut(&id) else {
            return;
        };
        let config = series.config().clone();
        let period = self.effective_period(config.period, start, end);
        let (pre, visible, post) = self.bucket_windows(series.datapoints().to_vec(), &config, period, start, end);
        series.set_datapoints(pre, visible, post);
    }

    /// The most recent `history` datapoints of a series whether or not it is
    /// enabled, refreshing stale caches on the way.
    pub async fn gather_latest(&self, id: SeriesId, history: usize) -> Vec<Datapoint> {
        let mut state = self.state.lock().await;
        self.latest_points(&mut state, id, history).await
    }

    async fn latest_points(&self, state: &mut CollectorState, id: SeriesId, history: usize) -> Vec<Datapoint> {
        if !state.series.contains_key(&id) {
            return Vec::new();
        }

        let closure = dependency_closure(state, id);
        let mut latest: HashMap<SeriesId, Vec<Datapoint>> = HashMap::new();

        for &member in &closure {
            if state.series.get(&member).is_some_and(|s| !s.is_synthetic()) {
                let points = self.latest_recorded(state, member, history).await;
                latest.insert(member, points);
            }
        }

        let order: Vec<SeriesId> = state.graph.synthesis_order().to_vec();
        for member in order.into_iter().filter(|m| closure.contains(m)) {
            let Some(series) = state.series.get(&member) else {
                continue;
            };
            let scratch: Vec<Series> = series
                .dependents()
                .iter()
                .filter_map(|d| {
                    let config = state.series.get(d)?.config().clone();
                    let mut dependent = Series::new(config, true);
                    dependent.set_datapoints(Vec::new(), latest.get(d).cloned().unwrap_or_default(), Vec::new());
                    Some(dependent)
                })
                .collect();
            let dependents: Vec<&Series> = scratch.iter().collect();
            let formula = series.config().formula.clone().unwrap_or_default();

            let points = match self.formulas.apply(&formula, &dependents) {
                Ok(points) => points
                    .into_iter()
                    .map(|d| Datapoint {
                        series_id: member,
                        synthetic: true,
                        ..d
                    })
                    .collect(),
                Err(e) => {
                    tracing::warn!("Error evaluating formula of series {}: {}", member, e);
                    Vec::new()
                }
            };
            latest.insert(member, points);
        }

        latest.remove(&id).unwrap_or_default()
    }

    async fn latest_recorded(&self, state: &mut CollectorState, id: SeriesId, history: usize) -> Vec<Datapoint> {
        let repository = self.repository.as_ref();
        let cache = state.caches.entry(id).or_default();

        cache.refresh_if_stale(repository, id).await;
        cache.populate_before(repository, id, i64::MAX, history).await;
        cache.before(history, i64::MAX)
    }

    /// Recomputes the trend of `id`, then of each series reading it.
    ///
    /// Only direct dependees are refreshed; series further down the chain
    /// need their own call.
    pub async fn update_trend(&self, id: SeriesId) -> Option<TrendState> {
        let mut state = self.state.lock().await;
        let dependees = state.series.get(&id)?.dependees().to_vec();

        let trend = self.compute_trend(&mut state, id).await;
        for dependee in dependees {
            self.compute_trend(&mut state, dependee).await;
        }
        trend
    }

    async fn compute_trend(&self, state: &mut CollectorState, id: SeriesId) -> Option<TrendState> {
        let history = self.settings.history;
        let mut points = self.latest_points(state, id, history).await;
        let config: SeriesConfig = state.series.get(&id)?.config().clone();

        let period = config.period.unwrap_or(Period::None);
        if config.zerofill && period != Period::None {
            // Trends look back at most `history` periods.
            if let Some(newest) = points.last().map(|d| d.start_time) {
                let floor = self.periods_back(newest, period, history);
                points.retain(|d| d.start_time >= floor);
            }
        }
        let points = aggregate(points, config.aggregation, period, config.zerofill, &self.resolver);

        let mut trend = SmoothedTrend::new(config.smoothing);
        let mut deviation = WindowedStdDev::new(history);
        let mut changed = Vec::new();
        for point in &points {
            let value = trend.update(point.value);
            deviation.update(point.value);
            if period == Period::None && !point.synthetic && point.trend != value {
                changed.push(Datapoint {
                    trend: value,
                    ..point.clone()
                });
            }
        }

        let classification = if points.is_empty() {
            TrendState::Unknown
        } else {
            let spread = config.sensitivity * deviation.std_dev();
            TrendState::classify(trend.previous(), trend.trend(), config.goal, spread)
        };
        let value = trend.trend();

        for datapoint in changed {
            if let Err(e) = self.repository.update_datapoint(&datapoint).await {
                tracing::warn!("Error storing trend of series {} at {}: {}", id, datapoint.start_time, e);
                continue;
            }
            state.caches.entry(id).or_default().update(datapoint);
        }
        if let Err(e) = self
            .repository
            .update_trend_fields(id, classification.name(), value)
            .await
        {
            tracing::warn!("Error storing trend fields of series {}: {}", id, e);
        }

        if let Some(series) = state.series.get_mut(&id) {
            series.set_trend(classification, value);
        }
        tracing::debug!("Series {} trend {} ({})", id, classification.name(), value);
        self.emit(CollectorEvent::TrendUpdated {
            series_id: id,
            state: classification,
            value,
        });
        Some(classification)
    }

    /// Start of the period `count - 1` periods before the one holding `ts`.
    fn periods_back(&self, ts: i64, period: Period, count: usize) -> i64 {
        let mut floor = self.resolver.period_start(ts, period);
        for _ in 1..count {
            floor = self.resolver.period_start(floor.saturating_sub(1), period);
        }
        floor
    }

    pub async fn insert_datapoint(&self, datapoint: Datapoint) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        self.repository.insert_datapoint(&datapoint).await?;
        state.caches.entry(datapoint.series_id).or_default().add(datapoint);
        Ok(())
    }

    pub async fn update_datapoint(&self, datapoint: Datapoint) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        self.repository.update_datapoint(&datapoint).await?;
        state.caches.entry(datapoint.series_id).or_default().update(datapoint);
        Ok(())
    }

    pub async fn delete_datapoint(&self, series_id: SeriesId, start_time: i64) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        self.repository.delete_datapoint(series_id, start_time).await?;
        if let Some(cache) = state.caches.get_mut(&series_id) {
            cache.remove(start_time);
        }
        Ok(())
    }

    /// Returns `false` for an unknown series.
    pub async fn set_enabled(&self, id: SeriesId, enabled: bool) -> bool {
        let mut state = self.state.lock().await;
        match state.series.get_mut(&id) {
            Some(series) => {
                series.set_enabled(enabled);
                true
            }
            None => false,
        }
    }

    pub async fn is_enabled(&self, id: SeriesId) -> Option<bool> {
        self.state.lock().await.series.get(&id).map(Series::is_enabled)
    }

    pub async fn series(&self, id: SeriesId) -> Option<Series> {
        self.state.lock().await.series.get(&id).cloned()
    }

    pub async fn all_series(&self) -> Vec<Series> {
        self.state.lock().await.series.values().cloned().collect()
    }

    pub async fn all_enabled_series(&self) -> Vec<Series> {
        self.state
            .lock()
            .await
            .series
            .values()
            .filter(|s| s.is_enabled())
            .cloned()
            .collect()
    }

    /// Earliest visible timestamp across enabled series.
    pub async fn visible_first(&self) -> Option<i64> {
        let state = self.state.lock().await;
        state
            .series
            .values()
            .filter(|s| s.is_enabled())
            .filter_map(Series::visible_time_min)
            .min()
    }

    /// Latest visible timestamp across enabled series.
    pub async fn visible_last(&self) -> Option<i64> {
        let state = self.state.lock().await;
        state
            .series
            .values()
            .filter(|s| s.is_enabled())
            .filter_map(Series::visible_time_max)
            .max()
    }

    pub async fn query_window(&self) -> (i64, i64) {
        let state = self.state.lock().await;
        (state.query_start, state.query_end)
    }

    pub async fn interpolate_value(&self, id: SeriesId, ts: i64) -> Option<f64> {
        self.state.lock().await.series.get(&id)?.interpolate_value(ts)
    }

    pub async fn find_pre_neighbor(&self, id: SeriesId, ts: i64) -> Option<Datapoint> {
        self.state.lock().await.series.get(&id)?.find_pre_neighbor(ts).cloned()
    }

    pub async fn find_post_neighbor(&self, id: SeriesId, ts: i64) -> Option<Datapoint> {
        self.state.lock().await.series.get(&id)?.find_post_neighbor(ts).cloned()
    }
}

/// Enabled series, disabled synthetic series read by an enabled series, and
/// everything those read from, transitively.
fn gather_set(state: &CollectorState) -> HashSet<SeriesId> {
    let mut needed: HashSet<SeriesId> = state
        .series
        .values()
        .filter(|s| {
            s.is_enabled()
                || (s.is_synthetic()
                    && s
                        .dependees()
                        .iter()
                        .any(|d| state.series.get(d).is_some_and(Series::is_enabled)))
        })
        .map(Series::id)
        .collect();

    let mut pending: Vec<SeriesId> = needed.iter().copied().collect();
    while let Some(id) = pending.pop() {
        for &dependent in state.graph.dependents(id) {
            if needed.insert(dependent) {
                pending.push(dependent);
            }
        }
    }
    needed
}

/// `id` and every series it reads from, transitively.
fn dependency_closure(state: &CollectorState, id: SeriesId) -> HashSet<SeriesId> {
    let mut closure = HashSet::from([id]);
    let mut pending = vec![id];
    while let Some(current) = pending.pop() {
        for &dependent in state.graph.dependents(current) {
            if closure.insert(dependent) {
                pending.push(dependent);
            }
        }
    }
    closure
}

/// Splits an ascending sequence around `[lo, hi]`. A point spanning into the
/// range counts as visible.
fn split_windows(points: Vec<Datapoint>, lo: i64, hi: i64) -> (Vec<Datapoint>, Vec<Datapoint>, Vec<Datapoint>) {
    let mut pre = Vec::new();
    let mut visible = Vec::new();
    let mut post = Vec::new();
    for point in points {
        if point.start_time > hi {
            post.push(point);
        } else if point.start_time.max(point.end_time) < lo {
            pre.push(point);
        } else {
            visible.push(point);
        }
    }
    (pre, visible, post)
}
