use crate::edge::AlarmEdge;
use crate::roles::Slot;
use crate::tags::TagValue;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

/// Result of one slot read. `Unknown` serializes as `null`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reading {
    Known(TagValue),
    Unknown,
}

impl Reading {
    pub fn value(&self) -> Option<TagValue> {
        match self {
            Reading::Known(value) => Some(*value),
            Reading::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PollEvent {
    Connection {
        cycle: u64,
        connected: bool,
    },
    /// `slot` is absent for tags read by the all-tags monitor that hold no role.
    Value {
        cycle: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        slot: Option<Slot>,
        tag: String,
        reading: Reading,
    },
    AlarmEdge {
        cycle: u64,
        edge: AlarmEdge,
    },
    CycleComplete {
        cycle: u64,
        read_failures: u32,
        duration_us: u64,
    },
}

impl PollEvent {
    pub fn cycle(&self) -> u64 {
        match *self {
            PollEvent::Connection { cycle, .. }
            | PollEvent::Value { cycle, .. }
            | PollEvent::AlarmEdge { cycle, .. }
            | PollEvent::CycleComplete { cycle, .. } => cycle,
        }
    }
}

/// Fan-out of poll events to any number of subscribers.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Sender<PollEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<PollEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Delivers to every live subscriber; dropped receivers are pruned.
    pub fn publish(&self, event: PollEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
