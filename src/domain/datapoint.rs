// Datapoint and series configuration domain models
use serde::{Deserialize, Serialize};

use super::calendar::Period;

pub type SeriesId = i64;

/// A single recorded (or synthesized) value of a series.
///
/// Unique within a series by `start_time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datapoint {
    pub series_id: SeriesId,
    pub start_time: i64,
    #[serde(default)]
    pub end_time: i64,
    pub value: f64,
    #[serde(default = "default_entry_count")]
    pub entry_count: i32,
    #[serde(default)]
    pub trend: f64,
    #[serde(default)]
    pub synthetic: bool,
}

fn default_entry_count() -> i32 {
    1
}

impl Datapoint {
    pub fn new(series_id: SeriesId, start_time: i64, value: f64) -> Self {
        Self {
            series_id,
            start_time,
            end_time: start_time,
            value,
            entry_count: 1,
            trend: value,
            synthetic: false,
        }
    }

    pub fn with_range(mut self, end_time: i64) -> Self {
        self.end_time = end_time;
        self
    }

    /// Two datapoints describe the same stored state when time and value agree.
    pub fn same_reading(&self, other: &Datapoint) -> bool {
        self.start_time == other.start_time && self.value == other.value
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SeriesType {
    #[default]
    Discrete,
    Range,
    Synthetic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMode {
    #[default]
    Sum,
    Average,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesConfig {
    pub id: SeriesId,
    pub name: String,
    #[serde(default)]
    pub group: String,
    #[serde(default, rename = "type")]
    pub series_type: SeriesType,
    #[serde(default)]
    pub aggregation: AggregationMode,
    /// `None` defers to the auto-detected display period.
    #[serde(default)]
    pub period: Option<Period>,
    #[serde(default)]
    pub goal: f64,
    #[serde(default = "default_sensitivity")]
    pub sensitivity: f64,
    #[serde(default = "default_smoothing")]
    pub smoothing: f64,
    #[serde(default)]
    pub zerofill: bool,
    #[serde(default)]
    pub formula: Option<String>,
}

fn default_sensitivity() -> f64 {
    1.0
}

fn default_smoothing() -> f64 {
    0.1
}

impl SeriesConfig {
    pub fn new(id: SeriesId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            group: String::new(),
            series_type: SeriesType::Discrete,
            aggregation: AggregationMode::Sum,
            period: None,
            goal: 0.0,
            sensitivity: default_sensitivity(),
            smoothing: default_smoothing(),
            zerofill: false,
            formula: None,
        }
    }

    pub fn synthetic(id: SeriesId, name: impl Into<String>, formula: impl Into<String>) -> Self {
        Self {
            series_type: SeriesType::Synthetic,
            formula: Some(formula.into()),
            ..Self::new(id, name)
        }
    }

    pub fn is_synthetic(&self) -> bool {
        self.series_type == SeriesType::Synthetic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_from_toml() {
        let config: SeriesConfig = toml::from_str(
            r#"
            id = 7
            name = "Weight"
            type = "synthetic"
            aggregation = "average"
            period = "week"
            formula = "[Scale] * 2"
            "#,
        )
        .unwrap();

        assert!(config.is_synthetic());
        assert_eq!(config.aggregation, AggregationMode::Average);
        assert_eq!(config.period, Some(Period::Week));
        assert_eq!(config.smoothing, 0.1);
        assert!(!config.zerofill);
    }

    #[test]
    fn test_same_reading() {
        let a = Datapoint::new(1, 100, 2.0);
        let mut b = a.clone();
        b.trend = 9.0;
        assert!(a.same_reading(&b));
        b.value = 3.0;
        assert!(!a.same_reading(&b));
    }
}
