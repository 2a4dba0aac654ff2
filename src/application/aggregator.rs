// Calendar bucketing of datapoints with sum or average accumulation
use crate::domain::calendar::{CalendarPeriodResolver, Period};
use crate::domain::datapoint::{AggregationMode, Datapoint};

/// Buckets a chronological sequence into calendar periods.
///
/// A new bucket opens whenever the next point falls into a different calendar
/// period than the current one. Bucket start and end times are the period
/// bounds. With `zerofill`, periods between two buckets that received no data
/// appear as zero-valued buckets with no entries.
pub fn aggregate(
    points: Vec<Datapoint>,
    mode: AggregationMode,
    period: Period,
    zerofill: bool,
    resolver: &CalendarPeriodResolver,
) -> Vec<Datapoint> {
    if period == Period::None {
        return points;
    }

    let mut buckets: Vec<Datapoint> = Vec::new();
    for point in points {
        let period_start = resolver.period_start(point.start_time, period);

        if let Some(current) = buckets.last_mut() {
            if current.start_time == period_start {
                accumulate(current, &point, mode);
                continue;
            }
        }

        if zerofill {
            if let Some(previous) = buckets.last() {
                let mut gap_start = resolver.next_period_start(previous.start_time, period);
                let template = previous.clone();
                while gap_start < period_start {
                    buckets.push(empty_bucket(&template, gap_start, resolver.period_end(gap_start, period)));
                    gap_start = resolver.next_period_start(gap_start, period);
                }
            }
        }

        buckets.push(Datapoint {
            start_time: period_start,
            end_time: resolver.period_end(point.start_time, period),
            entry_count: 1,
            ..point
        });
    }
    buckets
}

fn accumulate(bucket: &mut Datapoint, point: &Datapoint, mode: AggregationMode) {
    bucket.entry_count += 1;
    match mode {
        AggregationMode::Sum => bucket.value += point.value,
        AggregationMode::Average => {
            bucket.value += (point.value - bucket.value) / bucket.entry_count as f64;
        }
    }
    bucket.trend = point.trend;
}

fn empty_bucket(template: &Datapoint, start_time: i64, end_time: i64) -> Datapoint {
    Datapoint {
        start_time,
        end_time,
        value: 0.0,
        entry_count: 0,
        ..template.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::calendar::DAY_SECS;

    fn point(t: i64, v: f64) -> Datapoint {
        Datapoint::new(1, t, v)
    }

    #[test]
    fn test_average_vs_sum() {
        let resolver = CalendarPeriodResolver::default();
        let points = vec![point(DAY_SECS + 10, 10.0), point(DAY_SECS + 20, 20.0)];

        let averaged = aggregate(points.clone(), AggregationMode::Average, Period::Day, false, &resolver);
        assert_eq!(averaged.len(), 1);
        assert_eq!(averaged[0].value, 15.0);
        assert_eq!(averaged[0].entry_count, 2);

        let summed = aggregate(points, AggregationMode::Sum, Period::Day, false, &resolver);
        assert_eq!(summed.len(), 1);
        assert_eq!(summed[0].value, 30.0);
        assert_eq!(summed[0].start_time, DAY_SECS);
        assert_eq!(summed[0].end_time, 2 * DAY_SECS - 1);
    }

    #[test]
    fn test_new_bucket_per_calendar_period() {
        let resolver = CalendarPeriodResolver::default();
        // 1 second apart but on either side of midnight.
        let points = vec![point(DAY_SECS - 1, 1.0), point(DAY_SECS, 2.0), point(DAY_SECS + 5, 3.0)];
        let buckets = aggregate(points, AggregationMode::Sum, Period::Day, false, &resolver);
        let values: Vec<f64> = buckets.iter().map(|d| d.value).collect();
        assert_eq!(values, vec![1.0, 5.0]);
    }

    #[test]
    fn test_no_period_returns_input() {
        let resolver = CalendarPeriodResolver::default();
        let points = vec![point(5, 1.0), point(6, 2.0)];
        assert_eq!(aggregate(points.clone(), AggregationMode::Sum, Period::None, true, &resolver), points);
    }

    #[test]
    fn test_zerofill_gaps() {
        let resolver = CalendarPeriodResolver::default();
        let points = vec![point(0, 4.0), point(3 * DAY_SECS + 1, 2.0)];
        let buckets = aggregate(points, AggregationMode::Sum, Period::Day, true, &resolver);

        let starts: Vec<i64> = buckets.iter().map(|d| d.start_time).collect();
        assert_eq!(starts, vec![0, DAY_SECS, 2 * DAY_SECS, 3 * DAY_SECS]);
        assert_eq!(buckets[1].value, 0.0);
        assert_eq!(buckets[1].entry_count, 0);
        assert_eq!(buckets[3].value, 2.0);
    }

    #[test]
    fn test_average_running_mean_many_values() {
        let resolver = CalendarPeriodResolver::default();
        let points: Vec<Datapoint> = (0..1000).map(|i| point(i, 0.1)).collect();
        let buckets = aggregate(points, AggregationMode::Average, Period::Day, false, &resolver);
        assert_eq!(buckets.len(), 1);
        assert!((buckets[0].value - 0.1).abs() < 1e-12);
        assert_eq!(buckets[0].entry_count, 1000);
    }
}
