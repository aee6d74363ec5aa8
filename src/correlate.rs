use crate::models::{Dimension, MetricSeries, ResolvedInstance, TimeSeries};
use crate::planner::PlannedQuery;

/// Pairs each requested instance with the series at the same index. The API
/// answers in request order; instances past the end of `series` get an empty
/// series and surplus series are ignored.
pub fn correlate(
    series: Vec<MetricSeries>,
    instances: Vec<ResolvedInstance>,
) -> Vec<(ResolvedInstance, MetricSeries)> {
    let mut series = series.into_iter();
    instances
        .into_iter()
        .map(|instance| (instance, series.next().unwrap_or_default()))
        .collect()
}

/// Display label: alias value, else `InstanceId`, else the first dimension value.
pub fn series_label(instance: &ResolvedInstance, dimensions: &[Dimension], metric_name: &str) -> String {
    let alias = instance
        .alias_value()
        .or_else(|| instance.field_string("InstanceId"))
        .or_else(|| dimensions.first().map(|d| d.value.clone()))
        .unwrap_or_default();
    format!("{} - {}", alias, metric_name)
}

/// Converts one monitoring response into labelled time series.
pub fn to_time_series(query: PlannedQuery, series: Vec<MetricSeries>) -> Vec<TimeSeries> {
    let PlannedQuery {
        metric_name,
        instances,
        dimensions,
        ..
    } = query;

    correlate(series, instances)
        .into_iter()
        .zip(dimensions)
        .map(|((instance, series), dims)| TimeSeries {
            target: series_label(&instance, &dims, &metric_name),
            datapoints: series.datapoints(),
        })
        .collect()
}
