use crate::roles::Slot;
use serde::Serialize;
use std::collections::HashMap;

/// A change of alarm state for one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlarmEdge {
    pub slot: Slot,
    pub tag: String,
    pub active: bool,
    /// True when this is the first value ever seen for the slot's tag.
    pub first_observation: bool,
}

/// Last observed alarm level per slot.
#[derive(Debug, Default)]
pub struct AlarmEdgeDetector {
    last: HashMap<Slot, (String, bool)>,
}

impl AlarmEdgeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `active` and returns an edge when it differs from the last
    /// value. A first observation only counts when it is active. Observing a
    /// different tag for the slot starts over from the first observation.
    pub fn observe(&mut self, slot: Slot, tag: &str, active: bool) -> Option<AlarmEdge> {
        let previous = match self.last.get(&slot) {
            Some((seen_tag, level)) if seen_tag == tag => Some(*level),
            _ => None,
        };
        self.last.insert(slot, (tag.to_string(), active));

        let fire = match previous {
            Some(level) => level != active,
            None => active,
        };
        fire.then(|| AlarmEdge {
            slot,
            tag: tag.to_string(),
            active,
            first_observation: previous.is_none(),
        })
    }

    pub fn last(&self, slot: Slot) -> Option<bool> {
        self.last.get(&slot).map(|(_, level)| *level)
    }

    pub fn forget(&mut self, slot: Slot) {
        self.last.remove(&slot);
    }

    pub fn reset(&mut self) {
        self.last.clear();
    }
}
