//! Prometheus metrics setup and metric definitions

use anyhow::{Context, Result};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Install the Prometheus recorder with its own scrape listener.
/// Must be called from within a tokio runtime.
pub fn install_prometheus_exporter(addr: &str) -> Result<()> {
    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("Invalid METRICS_ADDR: {}", addr))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    describe_metrics();
    Ok(())
}

/// Register metric descriptions and emit initial zero values so Prometheus output
/// includes HELP/TYPE lines for all metrics from startup (not just after first use).
pub fn describe_metrics() {
    describe_counter!(
        "rollcall_auth_attempts_total",
        "Login attempts by outcome"
    );
    describe_counter!("rollcall_tokens_issued_total", "Access tokens issued");
    describe_counter!(
        "rollcall_revocations_total",
        "Credentials revoked, by reason"
    );
    describe_counter!(
        "rollcall_revocation_store_failures_total",
        "Revocation store calls that failed or timed out"
    );
    describe_histogram!(
        "rollcall_revocation_sweep_removed",
        "Expired revocation rows removed per sweep"
    );
    describe_counter!(
        "rollcall_security_events_total",
        "Security events recorded, by type"
    );
    describe_counter!(
        "rollcall_security_alerts_total",
        "Security alerts raised, by type and severity"
    );
    describe_counter!(
        "rollcall_approval_decisions_total",
        "Approval requests closed, by decision"
    );

    counter!("rollcall_auth_attempts_total", "outcome" => "success").absolute(0);
    counter!("rollcall_tokens_issued_total").absolute(0);
    counter!("rollcall_revocations_total", "reason" => "logout").absolute(0);
    counter!("rollcall_revocation_store_failures_total").absolute(0);
    histogram!("rollcall_revocation_sweep_removed").record(0.0);
    counter!("rollcall_security_events_total", "event_type" => "login_failed").absolute(0);
    counter!(
        "rollcall_security_alerts_total",
        "event_type" => "login_failed",
        "severity" => "high"
    )
    .absolute(0);
    counter!("rollcall_approval_decisions_total", "decision" => "approved").absolute(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_metrics_without_recorder() {
        // No recorder installed: calls are no-ops
        describe_metrics();
    }

    #[test]
    fn test_invalid_metrics_addr() {
        assert!(install_prometheus_exporter("not-an-address").is_err());
    }
}
