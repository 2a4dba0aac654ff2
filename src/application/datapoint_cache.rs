// Per-series datapoint cache backed by the series repository
use crate::application::series_repository::SeriesRepository;
use crate::domain::datapoint::{Datapoint, SeriesId};
use std::collections::BTreeMap;

/// Time-ordered datapoints of one series keyed by start time.
///
/// `covered` is the contiguous interval known to be complete: every stored
/// datapoint whose start time falls inside it is cached. Points outside it may
/// be cached too but are not trusted for completeness.
#[derive(Debug, Clone, Default)]
pub struct DatapointCache {
    points: BTreeMap<i64, Datapoint>,
    covered: Option<(i64, i64)>,
    valid: bool,
}

impl DatapointCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn covered(&self) -> Option<(i64, i64)> {
        self.covered
    }

    pub fn invalidate(&mut self) {
        self.points.clear();
        self.covered = None;
        self.valid = false;
    }

    /// Insert or replace the datapoint with the same start time.
    pub fn add(&mut self, datapoint: Datapoint) {
        self.points.insert(datapoint.start_time, datapoint);
    }

    pub fn update(&mut self, datapoint: Datapoint) {
        self.add(datapoint);
    }

    pub fn remove(&mut self, start_time: i64) -> Option<Datapoint> {
        self.points.remove(&start_time)
    }

    pub fn get(&self, start_time: i64) -> Option<&Datapoint> {
        self.points.get(&start_time)
    }

    pub fn range_inclusive(&self, start: i64, end: i64) -> Vec<Datapoint> {
        if start > end {
            return Vec::new();
        }
        self.points.range(start..=end).map(|(_, d)| d.clone()).collect()
    }

    pub fn before(&self, n: usize, ts: i64) -> Vec<Datapoint> {
        let mut found: Vec<Datapoint> = self.points.range(..ts).rev().take(n).map(|(_, d)| d.clone()).collect();
        found.reverse();
        found
    }

    pub fn after(&self, n: usize, ts: i64) -> Vec<Datapoint> {
        if ts == i64::MAX {
            return Vec::new();
        }
        self.points.range(ts + 1..).take(n).map(|(_, d)| d.clone()).collect()
    }

    pub fn last_n(&self, n: usize) -> Vec<Datapoint> {
        let mut found: Vec<Datapoint> = self.points.values().rev().take(n).cloned().collect();
        found.reverse();
        found
    }

    pub fn last(&self) -> Option<&Datapoint> {
        self.points.values().next_back()
    }

    fn covers(&self, start: i64, end: i64) -> bool {
        self.valid && matches!(self.covered, Some((lo, hi)) if lo <= start && end <= hi)
    }

    /// Records `[start, end]` as complete, merging with the covered interval
    /// when they touch or overlap and replacing it otherwise.
    fn mark_covered(&mut self, start: i64, end: i64) {
        self.covered = match self.covered {
            Some((lo, hi)) if start <= hi.saturating_add(1) && lo <= end.saturating_add(1) => {
                Some((lo.min(start), hi.max(end)))
            }
            _ => Some((start, end)),
        };
        self.valid = true;
    }

    fn insert_all(&mut self, datapoints: Vec<Datapoint>) {
        for datapoint in datapoints {
            self.add(datapoint);
        }
    }

    /// Make sure every stored datapoint in `[start, end]` is cached.
    pub async fn populate_range(
        &mut self,
        repository: &dyn SeriesRepository,
        series_id: SeriesId,
        start: i64,
        end: i64,
    ) {
        if start > end || self.covers(start, end) {
            return;
        }

        match repository.fetch_range(series_id, start, end).await {
            Ok(datapoints) => {
                tracing::debug!(
                    "Cached {} datapoints for series {} in [{}, {}]",
                    datapoints.len(),
                    series_id,
                    start,
                    end
                );
                self.insert_all(datapoints);
                self.mark_covered(start, end);
            }
            Err(e) => {
                tracing::warn!("Error fetching range for series {}: {}", series_id, e);
            }
        }
    }

    /// Make sure the `n` stored datapoints just before `ts` are cached.
    pub async fn populate_before(
        &mut self,
        repository: &dyn SeriesRepository,
        series_id: SeriesId,
        ts: i64,
        n: usize,
    ) {
        if n == 0 {
            return;
        }
        if let Some((lo, hi)) = self.covered.filter(|_| self.valid) {
            let complete = lo <= ts.saturating_sub(1) && ts <= hi.saturating_add(1);
            if complete && (lo == i64::MIN || self.points.range(lo..ts).count() >= n) {
                return;
            }
        }

        match repository.fetch_before(series_id, ts, n).await {
            Ok(datapoints) => {
                let lo = if datapoints.len() < n {
                    i64::MIN
                } else {
                    datapoints.first().map_or(i64::MIN, |d| d.start_time)
                };
                self.insert_all(datapoints);
                if ts > lo {
                    self.mark_covered(lo, ts - 1);
                }
            }
            Err(e) => {
                tracing::warn!("Error fetching history for series {}: {}", series_id, e);
            }
        }
    }

    /// Make sure the `n` stored datapoints just after `ts` are cached.
    pub async fn populate_after(
        &mut self,
        repository: &dyn SeriesRepository,
        series_id: SeriesId,
        ts: i64,
        n: usize,
    ) {
        if n == 0 || ts == i64::MAX {
            return;
        }
        if let Some((lo, hi)) = self.covered.filter(|_| self.valid) {
            let complete = lo <= ts.saturating_add(1) && ts <= hi.saturating_add(1);
            let cached = if ts < hi { self.points.range(ts + 1..=hi).count() } else { 0 };
            if complete && (hi == i64::MAX || cached >= n) {
                return;
            }
        }

        match repository.fetch_after(series_id, ts, n).await {
            Ok(datapoints) => {
                let hi = if datapoints.len() < n {
                    i64::MAX
                } else {
                    datapoints.last().map_or(i64::MAX, |d| d.start_time)
                };
                self.insert_all(datapoints);
                self.mark_covered(ts + 1, hi);
            }
            Err(e) => {
                tracing::warn!("Error fetching lookahead for series {}: {}", series_id, e);
            }
        }
    }

    /// Drop everything and re-fetch what was covered before.
    pub async fn refresh(&mut self, repository: &dyn SeriesRepository, series_id: SeriesId) {
        let previous = self.covered;
        self.invalidate();
        if let Some((lo, hi)) = previous {
            self.populate_range(repository, series_id, lo, hi).await;
        }
    }

    /// Compares the freshest cached datapoint with the freshest stored one and
    /// refreshes on any disagreement. Returns whether a refresh happened.
    pub async fn refresh_if_stale(&mut self, repository: &dyn SeriesRepository, series_id: SeriesId) -> bool {
        let stored = match repository.fetch_last(series_id, 1).await {
            Ok(mut datapoints) => datapoints.pop(),
            Err(e) => {
                tracing::warn!("Error fetching latest datapoint for series {}: {}", series_id, e);
                return false;
            }
        };

        let stale = match (self.last(), stored.as_ref()) {
            (Some(cached), Some(stored)) => !cached.same_reading(stored),
            (None, None) => false,
            _ => true,
        };

        if stale {
            tracing::debug!("Cache for series {} is stale, refreshing", series_id);
            self.refresh(repository, series_id).await;
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::memory_repository::InMemoryRepository;

    fn cache_with(times: &[i64]) -> DatapointCache {
        let mut cache = DatapointCache::new();
        for &t in times {
            cache.add(Datapoint::new(1, t, t as f64));
        }
        cache
    }

    fn times(datapoints: &[Datapoint]) -> Vec<i64> {
        datapoints.iter().map(|d| d.start_time).collect()
    }

    #[test]
    fn test_range_inclusive() {
        let cache = cache_with(&[10, 20, 30, 40]);
        assert_eq!(times(&cache.range_inclusive(20, 30)), vec![20, 30]);
        assert_eq!(times(&cache.range_inclusive(11, 39)), vec![20, 30]);
        assert!(cache.range_inclusive(30, 20).is_empty());
        assert!(cache.range_inclusive(41, 50).is_empty());
    }

    #[test]
    fn test_before_and_after_exclude_ts() {
        let cache = cache_with(&[10, 20, 30, 40]);
        assert_eq!(times(&cache.before(2, 30)), vec![10, 20]);
        assert_eq!(times(&cache.before(5, 30)), vec![10, 20]);
        assert_eq!(times(&cache.after(2, 20)), vec![30, 40]);
        assert_eq!(times(&cache.after(1, 20)), vec![30]);
        assert!(cache.after(1, i64::MAX).is_empty());
        assert_eq!(times(&cache.last_n(3)), vec![20, 30, 40]);
    }

    #[test]
    fn test_upsert_replaces_same_start_time() {
        let mut cache = cache_with(&[10]);
        let mut replacement = Datapoint::new(1, 10, 99.0);
        replacement.entry_count = 3;
        cache.update(replacement);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(10).map(|d| d.value), Some(99.0));
        assert!(cache.remove(10).is_some());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_populate_range_fetches_once() {
        let repository = InMemoryRepository::new();
        for t in [10, 20, 30] {
            repository.insert(Datapoint::new(1, t, 1.0)).await;
        }

        let mut cache = DatapointCache::new();
        cache.populate_range(&repository, 1, 0, 25).await;
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.covered(), Some((0, 25)));

        // Already covered: a point added behind the cache's back is not seen.
        repository.insert(Datapoint::new(1, 15, 1.0)).await;
        cache.populate_range(&repository, 1, 5, 20).await;
        assert_eq!(cache.len(), 2);

        cache.populate_range(&repository, 1, 20, 40).await;
        assert_eq!(times(&cache.range_inclusive(0, 40)), vec![10, 20, 30]);
        assert_eq!(cache.covered(), Some((0, 40)));
    }

    #[tokio::test]
    async fn test_populate_before_and_after() {
        let repository = InMemoryRepository::new();
        for t in [10, 20, 30, 40, 50] {
            repository.insert(Datapoint::new(1, t, 1.0)).await;
        }

        let mut cache = DatapointCache::new();
        cache.populate_range(&repository, 1, 35, 45).await;
        cache.populate_before(&repository, 1, 35, 2).await;
        cache.populate_after(&repository, 1, 45, 1).await;

        assert_eq!(times(&cache.before(2, 35)), vec![20, 30]);
        assert_eq!(times(&cache.after(1, 45)), vec![50]);
        assert_eq!(cache.covered(), Some((20, 50)));

        // Fewer points exist than asked for: coverage reaches the origin.
        cache.populate_before(&repository, 1, 35, 10).await;
        assert_eq!(times(&cache.before(10, 35)), vec![10, 20, 30]);
        assert_eq!(cache.covered(), Some((i64::MIN, 50)));
    }

    #[tokio::test]
    async fn test_refresh_if_stale() {
        let repository = InMemoryRepository::new();
        repository.insert(Datapoint::new(1, 10, 1.0)).await;

        let mut cache = DatapointCache::new();
        cache.populate_range(&repository, 1, 0, 100).await;
        assert!(!cache.refresh_if_stale(&repository, 1).await);

        repository.insert(Datapoint::new(1, 20, 2.0)).await;
        assert!(cache.refresh_if_stale(&repository, 1).await);
        assert_eq!(times(&cache.last_n(5)), vec![10, 20]);

        // Same timestamp, different value.
        repository.insert(Datapoint::new(1, 20, 5.0)).await;
        assert!(cache.refresh_if_stale(&repository, 1).await);
        assert_eq!(cache.last().map(|d| d.value), Some(5.0));
    }
}
