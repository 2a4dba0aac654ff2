// Repository trait for series and datapoint storage
use crate::domain::datapoint::{Datapoint, SeriesConfig, SeriesId};
use async_trait::async_trait;

/// Backing store the collector reads from and writes through to.
///
/// Every read returns owned records in ascending start-time order.
#[async_trait]
pub trait SeriesRepository: Send + Sync {
    /// List every configured series
    async fn fetch_all_series_configs(&self) -> anyhow::Result<Vec<SeriesConfig>>;

    /// Datapoints with `start <= start_time <= end`
    async fn fetch_range(&self, series_id: SeriesId, start: i64, end: i64) -> anyhow::Result<Vec<Datapoint>>;

    /// The `n` most recent datapoints
    async fn fetch_last(&self, series_id: SeriesId, n: usize) -> anyhow::Result<Vec<Datapoint>>;

    /// The `n` datapoints closest to `ts` with `start_time < ts`
    async fn fetch_before(&self, series_id: SeriesId, ts: i64, n: usize) -> anyhow::Result<Vec<Datapoint>>;

    /// The `n` datapoints closest to `ts` with `start_time > ts`
    async fn fetch_after(&self, series_id: SeriesId, ts: i64, n: usize) -> anyhow::Result<Vec<Datapoint>>;

    async fn insert_datapoint(&self, datapoint: &Datapoint) -> anyhow::Result<()>;

    async fn update_datapoint(&self, datapoint: &Datapoint) -> anyhow::Result<()>;

    async fn delete_datapoint(&self, series_id: SeriesId, start_time: i64) -> anyhow::Result<()>;

    /// Persist the latest trend classification of a series
    async fn update_trend_fields(&self, series_id: SeriesId, trend_state: &str, trend_value: f64) -> anyhow::Result<()>;
}
