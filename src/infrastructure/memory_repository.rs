// In-memory repository implementation
use crate::application::series_repository::SeriesRepository;
use crate::domain::datapoint::{Datapoint, SeriesConfig, SeriesId};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tokio::sync::RwLock;

/// Seed file layout: a list of series and a list of datapoints.
#[derive(Debug, Deserialize, Default)]
pub struct SeedData {
    #[serde(default)]
    pub series: Vec<SeriesConfig>,
    #[serde(default)]
    pub datapoints: Vec<Datapoint>,
}

impl SeedData {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("Failed to parse seed data")
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read seed data from {}", path.display()))?;
        Self::from_toml(&text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrendFields {
    pub state: String,
    pub value: f64,
}

/// Repository that keeps everything in memory.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    configs: RwLock<Vec<SeriesConfig>>,
    datapoints: RwLock<HashMap<SeriesId, BTreeMap<i64, Datapoint>>>,
    trends: RwLock<HashMap<SeriesId, TrendFields>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn from_seed(seed: SeedData) -> Self {
        let repository = Self::new();
        for config in seed.series {
            repository.put_config(config).await;
        }
        for mut datapoint in seed.datapoints {
            datapoint.end_time = datapoint.end_time.max(datapoint.start_time);
            repository.insert(datapoint).await;
        }
        repository
    }

    /// Add or replace a series configuration
    pub async fn put_config(&self, config: SeriesConfig) {
        let mut configs = self.configs.write().await;
        match configs.iter_mut().find(|c| c.id == config.id) {
            Some(existing) => *existing = config,
            None => configs.push(config),
        }
    }

    pub async fn remove_config(&self, series_id: SeriesId) {
        self.configs.write().await.retain(|c| c.id != series_id);
        self.datapoints.write().await.remove(&series_id);
    }

    /// Upsert a datapoint without going through the trait
    pub async fn insert(&self, datapoint: Datapoint) {
        self.datapoints
            .write()
            .await
            .entry(datapoint.series_id)
            .or_default()
            .insert(datapoint.start_time, datapoint);
    }

    pub async fn trend_fields(&self, series_id: SeriesId) -> Option<TrendFields> {
        self.trends.read().await.get(&series_id).cloned()
    }

    pub async fn datapoint(&self, series_id: SeriesId, start_time: i64) -> Option<Datapoint> {
        self.datapoints
            .read()
            .await
            .get(&series_id)
            .and_then(|points| points.get(&start_time))
            .cloned()
    }
}

#[async_trait]
impl SeriesRepository for InMemoryRepository {
    async fn fetch_all_series_configs(&self) -> Result<Vec<SeriesConfig>> {
        Ok(self.configs.read().await.clone())
    }

    async fn fetch_range(&self, series_id: SeriesId, start: i64, end: i64) -> Result<Vec<Datapoint>> {
        if start > end {
            return Ok(Vec::new());
        }
        let datapoints = self.datapoints.read().await;
        Ok(datapoints
            .get(&series_id)
            .map(|points| points.range(start..=end).map(|(_, d)| d.clone()).collect())
            .unwrap_or_default())
    }

    async fn fetch_last(&self, series_id: SeriesId, n: usize) -> Result<Vec<Datapoint>> {
        let datapoints = self.datapoints.read().await;
        let mut found: Vec<Datapoint> = datapoints
            .get(&series_id)
            .map(|points| points.values().rev().take(n).cloned().collect())
            .unwrap_or_default();
        found.reverse();
        Ok(found)
    }

    async fn fetch_before(&self, series_id: SeriesId, ts: i64, n: usize) -> Result<Vec<Datapoint>> {
        let datapoints = self.datapoints.read().await;
        let mut found: Vec<Datapoint> = datapoints
            .get(&series_id)
            .map(|points| points.range(..ts).rev().take(n).map(|(_, d)| d.clone()).collect())
            .unwrap_or_default();
        found.reverse();
        Ok(found)
    }

    async fn fetch_after(&self, series_id: SeriesId, ts: i64, n: usize) -> Result<Vec<Datapoint>> {
        if ts == i64::MAX {
            return Ok(Vec::new());
        }
        let datapoints = self.datapoints.read().await;
        Ok(datapoints
            .get(&series_id)
            .map(|points| points.range(ts + 1..).take(n).map(|(_, d)| d.clone()).collect())
            .unwrap_or_default())
    }

    async fn insert_datapoint(&self, datapoint: &Datapoint) -> Result<()> {
        self.insert(datapoint.clone()).await;
        Ok(())
    }

    async fn update_datapoint(&self, datapoint: &Datapoint) -> Result<()> {
        let mut datapoints = self.datapoints.write().await;
        let existing = datapoints
            .get_mut(&datapoint.series_id)
            .and_then(|points| points.get_mut(&datapoint.start_time))
            .with_context(|| {
                format!(
                    "No datapoint at {} in series {}",
                    datapoint.start_time, datapoint.series_id
                )
            })?;
        *existing = datapoint.clone();
        Ok(())
    }

    async fn delete_datapoint(&self, series_id: SeriesId, start_time: i64) -> Result<()> {
        if let Some(points) = self.datapoints.write().await.get_mut(&series_id) {
            points.remove(&start_time);
        }
        Ok(())
    }

    async fn update_trend_fields(&self, series_id: SeriesId, trend_state: &str, trend_value: f64) -> Result<()> {
        self.trends.write().await.insert(
            series_id,
            TrendFields {
                state: trend_state.to_string(),
                value: trend_value,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: &str = r#"
        [[series]]
        id = 1
        name = "Run"
        period = "day"

        [[series]]
        id = 2
        name = "Total"
        type = "synthetic"
        formula = "[Run] * 2"

        [[datapoints]]
        series_id = 1
        start_time = 100
        value = 5.0

        [[datapoints]]
        series_id = 1
        start_time = 200
        value = 7.0
        entry_count = 2
    "#;

    #[tokio::test]
    async fn test_seed_round_trip() {
        let repository = InMemoryRepository::from_seed(SeedData::from_toml(SEED).unwrap()).await;

        let configs = repository.fetch_all_series_configs().await.unwrap();
        assert_eq!(configs.len(), 2);
        assert!(configs[1].is_synthetic());

        let last = repository.fetch_last(1, 1).await.unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].start_time, 200);
        assert_eq!(last[0].entry_count, 2);

        let first = repository.fetch_range(1, 0, 150).await.unwrap();
        assert_eq!(first[0].entry_count, 1);
        assert_eq!(first[0].end_time, 100);
    }

    #[tokio::test]
    async fn test_before_after_exclusive() {
        let repository = InMemoryRepository::from_seed(SeedData::from_toml(SEED).unwrap()).await;

        assert!(repository.fetch_before(1, 100, 5).await.unwrap().is_empty());
        assert_eq!(repository.fetch_after(1, 100, 5).await.unwrap().len(), 1);
        assert!(repository.fetch_after(1, i64::MAX, 5).await.unwrap().is_empty());
        assert!(repository.fetch_range(1, 300, 0).await.unwrap().is_empty());
        assert!(repository.fetch_last(9, 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_writes() {
        let repository = InMemoryRepository::new();
        let mut datapoint = Datapoint::new(1, 10, 1.0);

        assert!(repository.update_datapoint(&datapoint).await.is_err());
        repository.insert_datapoint(&datapoint).await.unwrap();
        datapoint.value = 3.0;
        repository.update_datapoint(&datapoint).await.unwrap();
        assert_eq!(repository.datapoint(1, 10).await.map(|d| d.value), Some(3.0));

        repository.delete_datapoint(1, 10).await.unwrap();
        assert!(repository.datapoint(1, 10).await.is_none());

        repository.update_trend_fields(1, "flat", 2.5).await.unwrap();
        assert_eq!(
            repository.trend_fields(1).await,
            Some(TrendFields {
                state: "flat".to_string(),
                value: 2.5,
            })
        );
    }
}
