use crate::accessor::TagAccessor;
use crate::edge::AlarmEdgeDetector;
use crate::error::TagError;
use crate::events::{EventBus, PollEvent, Reading};
use crate::registry::TagRegistry;
use crate::roles::{MonitorPlan, RoleMap, Slot};
use crate::sync::Shared;
use crate::tags::TagValue;
use crossbeam_channel::{bounded, Receiver};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{JoinHandle, Thread};
use std::time::{Duration, Instant};
use thiserror::Error;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_millis(1500);

#[derive(Clone, Debug)]
pub struct PollConfig {
    pub interval: Duration,
}

impl PollConfig {
    /// Intervals below [`MIN_POLL_INTERVAL`] are raised to it.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(MIN_POLL_INTERVAL),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Running,
    Stopped,
}

impl PollState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => PollState::Running,
            2 => PollState::Stopped,
            _ => PollState::Idle,
        }
    }
}

#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct PollStats {
    pub cycles_executed: u64,
    pub cycles_disconnected: u64,
    pub read_failures: u64,
    pub alarm_edges: u64,
    pub overruns: u64,
    pub max_cycle_us: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PollerError {
    #[error("poller did not stop within {0:?}")]
    StopTimeout(Duration),
    #[error("poller thread exited abnormally")]
    Crashed,
}

/// Reads the monitored slots once per interval and publishes what it saw.
pub struct Poller {
    accessor: TagAccessor,
    registry: Arc<Shared<TagRegistry>>,
    roles: Arc<Shared<RoleMap>>,
    plan: MonitorPlan,
    config: PollConfig,
    bus: EventBus,
    edges: AlarmEdgeDetector,
    stats: PollStats,
    cycle: u64,
    state: Arc<AtomicU8>,
}

impl Poller {
    pub fn new(
        accessor: TagAccessor,
        registry: Arc<Shared<TagRegistry>>,
        roles: Arc<Shared<RoleMap>>,
        plan: MonitorPlan,
        config: PollConfig,
        bus: EventBus,
    ) -> Self {
        Self {
            accessor,
            registry,
            roles,
            plan,
            config,
            bus,
            edges: AlarmEdgeDetector::new(),
            stats: PollStats::default(),
            cycle: 0,
            state: Arc::new(AtomicU8::new(PollState::Idle as u8)),
        }
    }

    pub fn state(&self) -> PollState {
        PollState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn stats(&self) -> &PollStats {
        &self.stats
    }

    /// One full cycle: status, slot reads, alarm edges, completion marker.
    pub fn poll_once(&mut self) {
        let started = Instant::now();
        self.cycle += 1;
        let cycle = self.cycle;

        let connected = self.accessor.connection().is_connected();
        self.bus.publish(PollEvent::Connection { cycle, connected });

        let mut read_failures = 0u32;
        if connected {
            let registry = self.registry.snapshot();
            let roles = self.roles.snapshot();
            for (slot, tag) in self.targets(&roles, &registry) {
                let reading = match self.read_target(slot, &tag, &registry) {
                    Ok(value) => Reading::Known(value),
                    Err(err) => {
                        read_failures += 1;
                        debug!("cycle {cycle}: {tag} unreadable: {err}");
                        Reading::Unknown
                    }
                };
                self.bus.publish(PollEvent::Value {
                    cycle,
                    slot,
                    tag: tag.clone(),
                    reading,
                });

                let Some(slot) = slot.filter(|slot| slot.role.is_alarm()) else {
                    continue;
                };
                if let Some(value) = reading.value() {
                    if let Some(edge) = self.edges.observe(slot, &tag, value.is_truthy()) {
                        self.stats.alarm_edges += 1;
                        info!(
                            "alarm {} on {slot} ({tag})",
                            if edge.active { "raised" } else { "cleared" }
                        );
                        self.bus.publish(PollEvent::AlarmEdge { cycle, edge });
                    }
                }
            }
        } else {
            self.stats.cycles_disconnected += 1;
        }

        let duration_us = started.elapsed().as_micros() as u64;
        self.stats.cycles_executed += 1;
        self.stats.read_failures += u64::from(read_failures);
        self.stats.max_cycle_us = self.stats.max_cycle_us.max(duration_us);
        self.bus.publish(PollEvent::CycleComplete {
            cycle,
            read_failures,
            duration_us,
        });
    }

    /// Tags to read this cycle, with the slot each one fills.
    fn targets(&self, roles: &RoleMap, registry: &TagRegistry) -> Vec<(Option<Slot>, String)> {
        match &self.plan {
            MonitorPlan::Slots(slots) => slots
                .iter()
                .filter_map(|&slot| roles.tag_for(slot).map(|tag| (Some(slot), tag.to_string())))
                .collect(),
            MonitorPlan::AllTags => registry
                .names()
                .map(|name| (roles.slot_of(name), name.to_string()))
                .collect(),
        }
    }

    fn read_target(
        &self,
        slot: Option<Slot>,
        tag: &str,
        registry: &TagRegistry,
    ) -> Result<TagValue, TagError> {
        let descriptor = registry.get(tag).ok_or_else(|| match slot {
            Some(slot) => TagError::RoleUnresolved {
                slot,
                tag: tag.to_string(),
            },
            None => TagError::UnknownTag(tag.to_string()),
        })?;
        self.accessor.read(descriptor)
    }

    /// Polls until `stop` is set. The flag is checked at every cycle boundary.
    pub fn run(&mut self, stop: &AtomicBool) {
        self.state.store(PollState::Running as u8, Ordering::SeqCst);
        info!("poller running every {:?}", self.config.interval);
        let mut next_cycle = Instant::now();

        while !stop.load(Ordering::SeqCst) {
            self.poll_once();

            next_cycle += self.config.interval;
            let now = Instant::now();
            if now >= next_cycle {
                self.stats.overruns += 1;
                next_cycle = now;
                continue;
            }
            while !stop.load(Ordering::SeqCst) {
                let now = Instant::now();
                if now >= next_cycle {
                    break;
                }
                std::thread::park_timeout(next_cycle - now);
            }
        }

        self.state.store(PollState::Stopped as u8, Ordering::SeqCst);
        info!(
            "poller stopped after {} cycles ({} read failures)",
            self.stats.cycles_executed, self.stats.read_failures
        );
    }

    /// Moves the poller onto its own thread.
    pub fn spawn(mut self) -> std::io::Result<PollerHandle> {
        let stop = Arc::new(AtomicBool::new(false));
        let state = Arc::clone(&self.state);
        let (done_tx, done_rx) = bounded(1);
        let flag = Arc::clone(&stop);
        let join = std::thread::Builder::new()
            .name("poller".into())
            .spawn(move || {
                self.run(&flag);
                let _ = done_tx.send(self.stats.clone());
            })?;
        let thread = join.thread().clone();
        Ok(PollerHandle {
            stop,
            state,
            thread,
            done: done_rx,
            join: Some(join),
        })
    }
}

/// Owner side of a spawned [`Poller`].
pub struct PollerHandle {
    stop: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
    thread: Thread,
    done: Receiver<PollStats>,
    join: Option<JoinHandle<()>>,
}

impl PollerHandle {
    pub fn state(&self) -> PollState {
        PollState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Requests a stop and waits up to `timeout` for the loop to confirm.
    pub fn stop(mut self, timeout: Duration) -> Result<PollStats, PollerError> {
        self.stop.store(true, Ordering::SeqCst);
        self.thread.unpark();
        match self.done.recv_timeout(timeout) {
            Ok(stats) => {
                if let Some(join) = self.join.take() {
                    if join.join().is_err() {
                        return Err(PollerError::Crashed);
                    }
                }
                Ok(stats)
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                warn!("poller still busy after {timeout:?}");
                Err(PollerError::StopTimeout(timeout))
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => Err(PollerError::Crashed),
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.thread.unpark();
    }
}
