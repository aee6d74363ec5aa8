use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder, HistogramTimer,
    HistogramVec, IntCounter, IntCounterVec, TextEncoder,
};

lazy_static! {
    pub static ref API_REQUESTS: IntCounterVec = register_int_counter_vec!(
        "api_requests_total",
        "Total number of signed API requests sent",
        &["service", "action"]
    ).unwrap();

    pub static ref API_REQUEST_FAILURES: IntCounterVec = register_int_counter_vec!(
        "api_request_failures_total",
        "API requests that failed in transport or returned an error envelope",
        &["service", "action"]
    ).unwrap();

    pub static ref API_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "api_request_duration_seconds",
        "API request duration in seconds",
        &["service"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0]
    ).unwrap();

    pub static ref SKIPPED_INSTANCES: IntCounter = register_int_counter!(
        "skipped_instances_total",
        "Resolved instances dropped from a query because they failed to parse"
    ).unwrap();

    pub static ref PARTIAL_LISTINGS: IntCounter = register_int_counter!(
        "partial_listings_total",
        "Listings returned with at least one lost page"
    ).unwrap();
}

pub fn record_request(service: &str, action: &str) -> HistogramTimer {
    API_REQUESTS.with_label_values(&[service, action]).inc();
    API_REQUEST_DURATION.with_label_values(&[service]).start_timer()
}

pub fn record_request_failure(service: &str, action: &str) {
    API_REQUEST_FAILURES.with_label_values(&[service, action]).inc();
}

pub fn record_skipped_instance() {
    SKIPPED_INSTANCES.inc();
}

pub fn record_partial_listing() {
    PARTIAL_LISTINGS.inc();
}

/// Renders the default registry in the Prometheus text format.
pub fn gather_text() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_show_up_in_gathered_text() {
        record_request("monitor", "GetMonitorData").observe_duration();
        record_skipped_instance();
        let text = gather_text();
        assert!(text.contains("api_requests_total"));
        assert!(text.contains("skipped_instances_total"));
    }
}
