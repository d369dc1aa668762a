use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and pre-register every series the
/// pipeline emits, so scrapes see them at zero before the first event.
/// The returned handle's `render()` produces the text/plain scrape payload
/// served at `/metrics`.
pub fn init_metrics() -> PrometheusHandle {
    let handle = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => handle,
        // A recorder is already installed (test processes): fall back to a
        // standalone handle that still renders.
        Err(_) => PrometheusBuilder::new().build_recorder().handle(),
    };

    counter!("trades_persisted_total").absolute(0);
    counter!("events_persisted_total").absolute(0);
    counter!("events_broadcast_total").absolute(0);
    counter!("metrics_rebuilds_total").absolute(0);
    counter!("decode_errors_total", "source" => "evm").absolute(0);
    counter!("decode_errors_total", "source" => "utxo").absolute(0);
    counter!("decode_errors_total", "source" => "perp").absolute(0);

    gauge!("tracked_whales").set(0.0);
    gauge!("live_subscribers").set(0.0);

    // Histograms materialize on first record.
    histogram!("collector_tick_seconds").record(0.0);

    handle
}
