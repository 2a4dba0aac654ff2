// Domain layer - Series, datapoints and the calendar/statistics they rely on
pub mod calendar;
pub mod datapoint;
pub mod series;
pub mod stats;
pub mod trend;
