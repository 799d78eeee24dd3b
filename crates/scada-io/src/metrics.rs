//! Prometheus metrics and the scrape endpoint.

use prometheus::{Encoder, Gauge, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use std::thread;
use tiny_http::{Response, Server};

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

fn counter(name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
}

fn gauge(name: &str, help: &str) -> Gauge {
    let gauge = Gauge::new(name, help).unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
}

// Polling

pub static POLL_CYCLES: LazyLock<IntCounter> =
    LazyLock::new(|| counter("scada_poll_cycles_total", "Poll cycles executed"));

pub static POLL_READ_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "scada_poll_read_failures_total",
        "Slot reads that produced an unknown value",
    )
});

pub static POLL_CYCLE_US: LazyLock<Histogram> = LazyLock::new(|| {
    let histogram = Histogram::with_opts(
        HistogramOpts::new("scada_poll_cycle_us", "Time spent reading one poll cycle")
            .buckets(vec![
                100.0, 500.0, 1_000.0, 5_000.0, 10_000.0, 50_000.0, 100_000.0, 500_000.0,
            ]),
    )
    .unwrap();
    REGISTRY.register(Box::new(histogram.clone())).unwrap();
    histogram
});

pub static ALARM_EDGES: LazyLock<IntCounter> =
    LazyLock::new(|| counter("scada_alarm_edges_total", "Alarm state transitions"));

pub static ALARMS_ACTIVE: LazyLock<Gauge> =
    LazyLock::new(|| gauge("scada_alarms_active", "Alarm slots currently active"));

// Connection

pub static PLC_CONNECTED: LazyLock<Gauge> = LazyLock::new(|| {
    gauge(
        "scada_plc_connected",
        "PLC link status (1=connected, 0=disconnected)",
    )
});

pub static RECONNECT_ATTEMPTS: LazyLock<IntCounter> =
    LazyLock::new(|| counter("scada_reconnect_attempts_total", "PLC reconnect attempts"));

// Commands

pub static COMMANDS_OK: LazyLock<IntCounter> =
    LazyLock::new(|| counter("scada_commands_ok_total", "Operator commands that succeeded"));

pub static COMMANDS_FAILED: LazyLock<IntCounter> =
    LazyLock::new(|| counter("scada_commands_failed_total", "Operator commands that failed"));

pub static PULSE_RESET_FAILURES: LazyLock<Gauge> = LazyLock::new(|| {
    gauge(
        "scada_pulse_reset_failures",
        "Deferred pulse resets that failed since start",
    )
});

// Bridge

pub static AUTH_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "scada_auth_failures_total",
        "Commands rejected for a bad or missing token",
    )
});

pub static BRIDGE_CONNECTED: LazyLock<Gauge> = LazyLock::new(|| {
    gauge(
        "scada_bridge_connected",
        "Operator client connected (1=connected, 0=disconnected)",
    )
});

/// Serves `/metrics`, `/health` and `/ready`; ready means the PLC link is up.
pub fn serve_metrics(bind_addr: String, ready: Arc<AtomicBool>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let server = match Server::http(&bind_addr) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("failed to start metrics server on {}: {}", bind_addr, e);
                return;
            }
        };

        tracing::info!("metrics server listening on http://{}/metrics", bind_addr);

        for request in server.incoming_requests() {
            match request.url() {
                "/metrics" => {
                    let mut buffer = Vec::new();
                    if let Err(e) = TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer) {
                        tracing::warn!("failed to encode metrics: {}", e);
                        let _ = request.respond(
                            Response::from_string("Internal Server Error").with_status_code(500),
                        );
                        continue;
                    }
                    let mut response = Response::from_data(buffer);
                    if let Ok(header) = tiny_http::Header::from_bytes(
                        &b"Content-Type"[..],
                        &b"text/plain; version=0.0.4"[..],
                    ) {
                        response = response.with_header(header);
                    }
                    let _ = request.respond(response);
                }
                "/health" => {
                    let _ = request.respond(Response::from_string("OK"));
                }
                "/ready" => {
                    if ready.load(Ordering::Relaxed) {
                        let _ = request.respond(Response::from_string("Ready"));
                    } else {
                        let _ = request
                            .respond(Response::from_string("Not Ready").with_status_code(503));
                    }
                }
                _ => {
                    let _ =
                        request.respond(Response::from_string("Not Found").with_status_code(404));
                }
            }
        }
    })
}

/// Registers every metric up front so the first scrape lists them all.
pub fn init_metrics() {
    let _ = POLL_CYCLES.get();
    let _ = POLL_READ_FAILURES.get();
    let _ = POLL_CYCLE_US.get_sample_count();
    let _ = ALARM_EDGES.get();
    let _ = ALARMS_ACTIVE.get();
    let _ = PLC_CONNECTED.get();
    let _ = RECONNECT_ATTEMPTS.get();
    let _ = COMMANDS_OK.get();
    let _ = COMMANDS_FAILED.get();
    let _ = PULSE_RESET_FAILURES.get();
    let _ = AUTH_FAILURES.get();
    let _ = BRIDGE_CONNECTED.get();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_metrics_register_once() {
        init_metrics();
        init_metrics();
        let names: Vec<String> = REGISTRY
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"scada_poll_cycles_total".to_string()));
        assert!(names.contains(&"scada_plc_connected".to_string()));
        assert!(names.contains(&"scada_poll_cycle_us".to_string()));
    }
}
