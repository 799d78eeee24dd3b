use crate::infra::audit::{AuditEventType, AuditLogger};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use scada_core::{PollEvent, Slot};
use scada_io::metrics::{
    init_metrics, serve_metrics, ALARMS_ACTIVE, ALARM_EDGES, PLC_CONNECTED, POLL_CYCLES,
    POLL_CYCLE_US, POLL_READ_FAILURES,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

pub fn init() {
    init_metrics();
}

pub fn start_metrics_server(
    addr: &Option<String>,
    ready: Arc<AtomicBool>,
) -> Option<thread::JoinHandle<()>> {
    addr.as_ref().map(|addr| {
        info!(addr = %addr, "Starting metrics server");
        serve_metrics(addr.clone(), ready)
    })
}

/// Folds poll events into metrics and the audit trail.
pub struct EventRecorder {
    audit: Option<Arc<AuditLogger>>,
    ready: Arc<AtomicBool>,
    connected: Option<bool>,
    active_alarms: HashSet<Slot>,
}

impl EventRecorder {
    pub fn new(audit: Option<Arc<AuditLogger>>, ready: Arc<AtomicBool>) -> Self {
        Self {
            audit,
            ready,
            connected: None,
            active_alarms: HashSet::new(),
        }
    }

    pub fn record(&mut self, event: &PollEvent) {
        match event {
            PollEvent::Connection { connected, cycle } => {
                PLC_CONNECTED.set(if *connected { 1.0 } else { 0.0 });
                self.ready.store(*connected, Ordering::Relaxed);
                if self.connected != Some(*connected) {
                    // Only transitions are worth an audit line; the poller repeats
                    // the status every cycle.
                    if self.connected.is_some() || !*connected {
                        let kind = if *connected {
                            AuditEventType::PlcConnected
                        } else {
                            AuditEventType::PlcDisconnected
                        };
                        self.audit(kind, serde_json::json!({ "cycle": cycle }));
                    }
                    if !*connected {
                        warn!(cycle, "PLC reported disconnected");
                    }
                    self.connected = Some(*connected);
                }
            }
            PollEvent::Value { .. } => {}
            PollEvent::AlarmEdge { cycle, edge } => {
                ALARM_EDGES.inc();
                let kind = if edge.active {
                    self.active_alarms.insert(edge.slot);
                    warn!(tag = %edge.tag, slot = %edge.slot, "alarm raised");
                    AuditEventType::AlarmRaised
                } else {
                    self.active_alarms.remove(&edge.slot);
                    info!(tag = %edge.tag, slot = %edge.slot, "alarm cleared");
                    AuditEventType::AlarmCleared
                };
                ALARMS_ACTIVE.set(self.active_alarms.len() as f64);
                self.audit(
                    kind,
                    serde_json::json!({
                        "cycle": cycle,
                        "tag": edge.tag,
                        "chamber": edge.slot.chamber,
                        "first_observation": edge.first_observation,
                    }),
                );
            }
            PollEvent::CycleComplete {
                read_failures,
                duration_us,
                ..
            } => {
                POLL_CYCLES.inc();
                POLL_READ_FAILURES.inc_by(u64::from(*read_failures));
                POLL_CYCLE_US.observe(*duration_us as f64);
            }
        }
    }

    pub fn active_alarms(&self) -> usize {
        self.active_alarms.len()
    }

    fn audit(&self, kind: AuditEventType, details: serde_json::Value) {
        if let Some(logger) = &self.audit {
            logger.record(kind, details);
        }
    }
}

pub fn start_event_recorder(
    events: Receiver<PollEvent>,
    mut recorder: EventRecorder,
    stop: Arc<AtomicBool>,
) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("telemetry".to_string())
        .spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                match events.recv_timeout(Duration::from_millis(200)) {
                    Ok(event) => recorder.record(&event),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            for event in events.try_iter() {
                recorder.record(&event);
            }
        })
}
