// Mapper to convert gathered series into a JSON report
use crate::domain::datapoint::SeriesId;
use crate::domain::series::Series;
use crate::domain::trend::TrendState;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PointSummary {
    pub start_time: i64,
    pub value: f64,
    pub trend: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SeriesSummary {
    pub id: SeriesId,
    pub name: String,
    pub enabled: bool,
    pub synthetic: bool,
    pub points: usize,
    pub value_min: Option<f64>,
    pub value_max: Option<f64>,
    pub time_min: Option<i64>,
    pub time_max: Option<i64>,
    pub trend_state: TrendState,
    pub trend_value: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unresolved: Vec<String>,
    pub cyclic: bool,
    pub visible: Vec<PointSummary>,
}

pub fn series_to_summary(series: &Series) -> SeriesSummary {
    let visible = series
        .visible()
        .iter()
        .map(|d| PointSummary {
            start_time: d.start_time,
            value: d.value,
            trend: d.trend,
        })
        .collect();

    SeriesSummary {
        id: series.id(),
        name: series.name().to_string(),
        enabled: series.is_enabled(),
        synthetic: series.is_synthetic(),
        points: series.visible().len(),
        value_min: series.visible_value_min(),
        value_max: series.visible_value_max(),
        time_min: series.visible_time_min(),
        time_max: series.visible_time_max(),
        trend_state: series.trend_state(),
        trend_value: series.trend_value(),
        unresolved: series.unresolved().to_vec(),
        cyclic: series.is_cyclic(),
        visible,
    }
}

pub fn render_report(series: &[Series]) -> anyhow::Result<String> {
    let summaries: Vec<SeriesSummary> = series.iter().map(series_to_summary).collect();
    Ok(serde_json::to_string_pretty(&summaries)?)
}
