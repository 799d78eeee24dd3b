//! Momentary writes with a deferred reset.
//!
//! The reset never runs on the caller's thread: it is handed to a
//! [`Scheduler`], by default a [`TimerQueue`] that owns one timer thread.

use crate::accessor::TagAccessor;
use crate::error::TagError;
use crate::tags::{TagDescriptor, TagValue};
use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

pub const DEFAULT_PULSE_WIDTH: Duration = Duration::from_millis(200);

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Delayed callbacks keyed by name.
pub trait Scheduler: Send + Sync {
    /// Runs `task` after `delay`. Re-arming an existing key replaces its
    /// task and deadline.
    fn schedule(&self, key: String, delay: Duration, task: Task);
    /// Returns true if a pending task was dropped.
    fn cancel(&self, key: &str) -> bool;
}

enum TimerCmd {
    Arm {
        key: String,
        deadline: Instant,
        task: Task,
    },
    Cancel {
        key: String,
        reply: Sender<bool>,
    },
    Shutdown,
}

/// Single-threaded timer wheel fed over a channel.
pub struct TimerQueue {
    tx: Sender<TimerCmd>,
    worker: Option<JoinHandle<()>>,
}

impl TimerQueue {
    pub fn new() -> std::io::Result<Self> {
        let (tx, rx) = unbounded::<TimerCmd>();
        let worker = std::thread::Builder::new()
            .name("pulse-timer".into())
            .spawn(move || {
                let mut pending: HashMap<String, (Instant, Task)> = HashMap::new();
                loop {
                    let next = pending.values().map(|(deadline, _)| *deadline).min();
                    let cmd = match next {
                        Some(deadline) => rx.recv_deadline(deadline),
                        None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
                    };
                    match cmd {
                        Ok(TimerCmd::Arm {
                            key,
                            deadline,
                            task,
                        }) => {
                            pending.insert(key, (deadline, task));
                        }
                        Ok(TimerCmd::Cancel { key, reply }) => {
                            let _ = reply.send(pending.remove(&key).is_some());
                        }
                        Ok(TimerCmd::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {}
                    }
                    let now = Instant::now();
                    let due: Vec<String> = pending
                        .iter()
                        .filter(|(_, (deadline, _))| *deadline <= now)
                        .map(|(key, _)| key.clone())
                        .collect();
                    for key in due {
                        if let Some((_, task)) = pending.remove(&key) {
                            task();
                        }
                    }
                }
                // Flush so nothing stays latched after shutdown.
                if !pending.is_empty() {
                    debug!("timer queue flushing {} pending task(s)", pending.len());
                }
                for (_, (_, task)) in pending.drain() {
                    task();
                }
            })?;
        Ok(Self {
            tx,
            worker: Some(worker),
        })
    }

    pub fn shutdown(&mut self) {
        let _ = self.tx.send(TimerCmd::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("pulse timer thread panicked");
            }
        }
    }
}

impl Drop for TimerQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Scheduler for TimerQueue {
    fn schedule(&self, key: String, delay: Duration, task: Task) {
        let cmd = TimerCmd::Arm {
            key,
            deadline: Instant::now() + delay,
            task,
        };
        if self.tx.send(cmd).is_err() {
            warn!("timer queue is shut down; task dropped");
        }
    }

    fn cancel(&self, key: &str) -> bool {
        let (reply, answer) = crossbeam_channel::bounded(1);
        let cmd = TimerCmd::Cancel {
            key: key.to_string(),
            reply,
        };
        if self.tx.send(cmd).is_err() {
            return false;
        }
        answer.recv().unwrap_or(false)
    }
}

/// Writes an active level now and the inactive level after `width`.
#[derive(Clone)]
pub struct PulseController {
    accessor: TagAccessor,
    scheduler: Arc<dyn Scheduler>,
    width: Duration,
    failed_resets: Arc<AtomicU64>,
}

impl PulseController {
    pub fn new(accessor: TagAccessor, scheduler: Arc<dyn Scheduler>, width: Duration) -> Self {
        Self {
            accessor,
            scheduler,
            width,
            failed_resets: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn width(&self) -> Duration {
        self.width
    }

    /// Returns the result of the active write. The reset is only scheduled
    /// when that write succeeded.
    ///
    /// A reset still pending from an earlier pulse of the same tag is
    /// cancelled before the active write, so it cannot land on the new pulse.
    pub fn pulse(&self, tag: &TagDescriptor) -> Result<(), TagError> {
        let key = format!("pulse:{}", tag.name());
        let (active, inactive) = tag.value_kind().pulse_levels();
        let superseded = self.scheduler.cancel(&key);
        if let Err(err) = self.accessor.write(tag, active) {
            if superseded {
                // The earlier pulse is still latched; give it its reset back.
                self.schedule_reset(key, tag, inactive);
            }
            return Err(err);
        }
        debug!("pulse {} -> {}", tag.name(), active);
        self.schedule_reset(key, tag, inactive);
        Ok(())
    }

    fn schedule_reset(&self, key: String, tag: &TagDescriptor, inactive: TagValue) {
        let accessor = self.accessor.clone();
        let failed = Arc::clone(&self.failed_resets);
        let target = tag.clone();
        self.scheduler.schedule(
            key,
            self.width,
            Box::new(move || {
                if let Err(err) = accessor.write(&target, inactive) {
                    failed.fetch_add(1, Ordering::Relaxed);
                    warn!("pulse reset for {} failed: {err}", target.name());
                }
            }),
        );
    }

    /// Reset writes that failed since startup.
    pub fn failed_resets(&self) -> u64 {
        self.failed_resets.load(Ordering::Relaxed)
    }
}
