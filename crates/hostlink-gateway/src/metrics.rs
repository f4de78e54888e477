//! Prometheus metrics recording.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus metrics recorder and return the handle for rendering.
pub fn install_prometheus_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Record a new WebSocket connection.
pub fn record_ws_connect() {
    metrics::gauge!("hostlink_ws_connections_active").increment(1.0);
    metrics::counter!("hostlink_ws_connections_total").increment(1);
}

/// Record a WebSocket disconnection.
pub fn record_ws_disconnect() {
    metrics::gauge!("hostlink_ws_connections_active").decrement(1.0);
}

/// Record a dispatched command with its host-side duration.
pub fn record_request(command: &str, duration_secs: f64) {
    let labels = [("command", command.to_ascii_lowercase())];
    metrics::counter!("hostlink_commands_total", &labels).increment(1);
    metrics::histogram!("hostlink_command_duration_seconds", &labels).record(duration_secs);
}

/// Record a failed command by error code.
pub fn record_error(code: &str) {
    let labels = [("code", code.to_string())];
    metrics::counter!("hostlink_command_errors_total", &labels).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_prometheus_recorder() {
        // Only one recorder per process; a second install is an error, not a panic.
        if let Ok(handle) = install_prometheus_recorder() {
            record_request("ping", 0.001);
            assert!(handle.render().contains("hostlink_commands_total"));
        }
    }

    #[test]
    fn test_recording_without_recorder_does_not_panic() {
        record_ws_connect();
        record_ws_disconnect();
        record_error("timeout");
    }
}
