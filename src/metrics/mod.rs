//! Metrics module
//!
//! Prometheus metrics for the upload lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram, Counter,
    CounterVec, Encoder, Gauge, Histogram, TextEncoder,
};

lazy_static! {
    // Loader metrics
    pub static ref LOADERS_TOTAL: CounterVec = register_counter_vec!(
        "uploadr_loaders_total",
        "Loaders that reached a terminal state",
        &["outcome"]  // "success", "error" or "aborted"
    ).unwrap();

    pub static ref PENDING_UPLOADS: Gauge = register_gauge!(
        "uploadr_pending_uploads",
        "Loaders currently reading or uploading"
    ).unwrap();

    pub static ref READ_DURATION: Histogram = register_histogram!(
        "uploadr_read_duration_seconds",
        "Local file read duration in seconds",
        vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]
    ).unwrap();

    // Upload metrics
    pub static ref UPLOAD_DURATION: Histogram = register_histogram!(
        "uploadr_upload_duration_seconds",
        "Upload duration in seconds",
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]
    ).unwrap();

    pub static ref UPLOAD_BYTES_TOTAL: Counter = register_counter!(
        "uploadr_upload_bytes_total",
        "Total bytes uploaded"
    ).unwrap();

    // Notification metrics
    pub static ref NOTIFICATIONS_TOTAL: CounterVec = register_counter_vec!(
        "uploadr_notifications_total",
        "User notifications raised",
        &["severity"]
    ).unwrap();
}

/// Record a loader reaching a terminal state
pub fn record_loader_outcome(outcome: &str) {
    LOADERS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Publish the number of in-flight loaders
pub fn set_pending_uploads(pending: usize) {
    PENDING_UPLOADS.set(pending as f64);
}

/// Record local read duration
pub fn record_read_duration(duration_secs: f64) {
    READ_DURATION.observe(duration_secs);
}

/// Record upload duration
pub fn record_upload_duration(duration_secs: f64) {
    UPLOAD_DURATION.observe(duration_secs);
}

/// Record bytes of a finished upload
pub fn record_uploaded_bytes(bytes: u64) {
    UPLOAD_BYTES_TOTAL.inc_by(bytes as f64);
}

/// Record a notification shown to the user
pub fn record_notification(severity: &str) {
    NOTIFICATIONS_TOTAL.with_label_values(&[severity]).inc();
}

/// Render every registered metric in the Prometheus text format
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }

    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_loader_outcome() {
        let before = LOADERS_TOTAL.with_label_values(&["aborted"]).get();
        record_loader_outcome("aborted");
        assert!(LOADERS_TOTAL.with_label_values(&["aborted"]).get() >= before + 1.0);
    }

    #[test]
    fn test_record_durations() {
        record_read_duration(0.002);
        record_upload_duration(0.5);
        // Just verify it doesn't panic
    }

    #[test]
    fn test_record_uploaded_bytes() {
        record_uploaded_bytes(1024);
        assert!(UPLOAD_BYTES_TOTAL.get() >= 1024.0);
    }

    #[test]
    fn test_gather_text_contains_metric_names() {
        record_notification("warning");
        set_pending_uploads(0);

        let text = gather_text();
        assert!(text.contains("uploadr_notifications_total"));
        assert!(text.contains("uploadr_pending_uploads"));
    }
}
