//! Logical roles (start, alarm, setpoint...) and their assignment to tags.

use crate::error::TagError;
use crate::registry::TagRegistry;
use crate::tags::TagDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Ppm,
    Setpoint,
    Alarm,
    Start,
    Stop,
    Confirm,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Ppm,
        Role::Setpoint,
        Role::Alarm,
        Role::Start,
        Role::Stop,
        Role::Confirm,
    ];

    /// Key used in the role-mapping file.
    pub fn mapping_key(self) -> &'static str {
        match self {
            Role::Ppm => "ppm_tag",
            Role::Setpoint => "set1_tag",
            Role::Alarm => "alerta_tag",
            Role::Start => "start_tag",
            Role::Stop => "stop_tag",
            Role::Confirm => "confirm_tag",
        }
    }

    pub fn from_mapping_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|role| role.mapping_key() == key)
    }

    /// Prefix of the per-chamber tag naming convention (`PPM2`, `ALERTA3`...).
    pub fn tag_prefix(self) -> &'static str {
        match self {
            Role::Ppm => "PPM",
            Role::Setpoint => "SET",
            Role::Alarm => "ALERTA",
            Role::Start => "START",
            Role::Stop => "STOP",
            Role::Confirm => "CONFIRM",
        }
    }

    pub fn conventional_tag(self, chamber: u8) -> String {
        format!("{}{}", self.tag_prefix(), chamber)
    }

    pub fn is_alarm(self) -> bool {
        self == Role::Alarm
    }
}

/// One role, optionally scoped to a chamber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Slot {
    pub chamber: Option<u8>,
    pub role: Role,
}

impl Slot {
    pub const fn new(chamber: Option<u8>, role: Role) -> Self {
        Self { chamber, role }
    }

    pub const fn single(role: Role) -> Self {
        Self::new(None, role)
    }

    pub const fn chamber(chamber: u8, role: Role) -> Self {
        Self::new(Some(chamber), role)
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.chamber {
            Some(n) => write!(f, "{}{}", self.role.tag_prefix(), n),
            None => f.write_str(self.role.mapping_key()),
        }
    }
}

/// Single-chamber screen, an N-chamber SCADA overview, or a plain tag
/// monitor that reads every registered tag.
///
/// The tag monitor keeps the single-chamber role mapping so operator
/// commands still resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Single,
    Chambers(u8),
    Tags,
}

impl Layout {
    pub fn chambers(self) -> Vec<Option<u8>> {
        match self {
            Layout::Single | Layout::Tags => vec![None],
            Layout::Chambers(n) => (1..=n).map(Some).collect(),
        }
    }

    /// Whether roles are unscoped (`start_tag`...) rather than per chamber.
    pub fn is_single_mapping(self) -> bool {
        matches!(self, Layout::Single | Layout::Tags)
    }
}

/// Slot → tag-name assignments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoleMap {
    assignments: BTreeMap<Slot, String>,
}

impl RoleMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-chamber defaults: START1 / ALERTA1 / CONFIRM1 / SET1 when present.
    pub fn single_defaults(registry: &TagRegistry) -> Self {
        let mut map = Self::new();
        for role in [Role::Start, Role::Alarm, Role::Confirm, Role::Setpoint] {
            let name = role.conventional_tag(1);
            if registry.contains(&name) {
                map.assign(Slot::single(role), name);
            }
        }
        map
    }

    /// Multi-chamber convention: `PREFIX{n}` for every tag that exists.
    pub fn conventional(chambers: u8, registry: &TagRegistry) -> Self {
        let mut map = Self::new();
        for chamber in 1..=chambers {
            for role in Role::ALL {
                let name = role.conventional_tag(chamber);
                if registry.contains(&name) {
                    map.assign(Slot::chamber(chamber, role), name);
                }
            }
        }
        map
    }

    pub fn for_layout(layout: Layout, registry: &TagRegistry) -> Self {
        match layout {
            Layout::Single | Layout::Tags => Self::single_defaults(registry),
            Layout::Chambers(n) => Self::conventional(n, registry),
        }
    }

    pub fn assign(&mut self, slot: Slot, tag: impl Into<String>) -> Option<String> {
        self.assignments.insert(slot, tag.into())
    }

    pub fn unassign(&mut self, slot: Slot) -> Option<String> {
        self.assignments.remove(&slot)
    }

    pub fn tag_for(&self, slot: Slot) -> Option<&str> {
        self.assignments.get(&slot).map(String::as_str)
    }

    /// Resolves a slot through the registry on every call.
    pub fn resolve<'r>(
        &self,
        slot: Slot,
        registry: &'r TagRegistry,
    ) -> Result<&'r TagDescriptor, TagError> {
        let tag = self.tag_for(slot).ok_or(TagError::RoleUnassigned(slot))?;
        registry.get(tag).ok_or_else(|| TagError::RoleUnresolved {
            slot,
            tag: tag.to_string(),
        })
    }

    /// Slot a tag is assigned to. Alarm slots win when a tag has several.
    pub fn slot_of(&self, tag: &str) -> Option<Slot> {
        let mut slots = self.iter().filter(|(_, t)| *t == tag).map(|(slot, _)| slot);
        let first = slots.next()?;
        if first.role.is_alarm() {
            return Some(first);
        }
        Some(slots.find(|slot| slot.role.is_alarm()).unwrap_or(first))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Slot, &str)> {
        self.assignments.iter().map(|(slot, tag)| (*slot, tag.as_str()))
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
}

/// What the poller reads each cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorPlan {
    /// Fixed, ordered list of role slots.
    Slots(Vec<Slot>),
    /// Every tag in the registry, in registry order, re-read from the
    /// current snapshot each cycle.
    AllTags,
}

impl MonitorPlan {
    pub fn new(slots: Vec<Slot>) -> Self {
        MonitorPlan::Slots(slots)
    }

    pub fn all_tags() -> Self {
        MonitorPlan::AllTags
    }

    /// Single: ppm, alarm, setpoint. Chambers: per chamber ppm, setpoint, alarm.
    pub fn for_layout(layout: Layout) -> Self {
        let slots = match layout {
            Layout::Tags => return MonitorPlan::AllTags,
            Layout::Single => vec![
                Slot::single(Role::Ppm),
                Slot::single(Role::Alarm),
                Slot::single(Role::Setpoint),
            ],
            Layout::Chambers(n) => (1..=n)
                .flat_map(|c| {
                    [
                        Slot::chamber(c, Role::Ppm),
                        Slot::chamber(c, Role::Setpoint),
                        Slot::chamber(c, Role::Alarm),
                    ]
                })
                .collect(),
        };
        MonitorPlan::Slots(slots)
    }

    /// Role slots of a fixed plan; empty for [`MonitorPlan::AllTags`].
    pub fn slots(&self) -> &[Slot] {
        match self {
            MonitorPlan::Slots(slots) => slots,
            MonitorPlan::AllTags => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::{RegionKind, ValueKind};

    fn registry(names: &[&str]) -> TagRegistry {
        TagRegistry::from_descriptors(names.iter().enumerate().map(|(i, name)| {
            TagDescriptor::new(*name, RegionKind::Flag, ValueKind::Boolean, i as u32, Some(0), None)
                .unwrap()
        }))
        .unwrap()
    }

    #[test]
    fn single_defaults_only_use_existing_tags() {
        let reg = registry(&["START1", "ALERTA1", "PPM1"]);
        let map = RoleMap::single_defaults(&reg);
        assert_eq!(map.tag_for(Slot::single(Role::Start)), Some("START1"));
        assert_eq!(map.tag_for(Slot::single(Role::Alarm)), Some("ALERTA1"));
        assert_eq!(map.tag_for(Slot::single(Role::Confirm)), None);
        assert_eq!(map.tag_for(Slot::single(Role::Ppm)), None);
    }

    #[test]
    fn chamber_convention() {
        let reg = registry(&["PPM1", "PPM2", "ALERTA3", "START2"]);
        let map = RoleMap::conventional(3, &reg);
        assert_eq!(map.tag_for(Slot::chamber(2, Role::Ppm)), Some("PPM2"));
        assert_eq!(map.tag_for(Slot::chamber(3, Role::Alarm)), Some("ALERTA3"));
        assert_eq!(map.tag_for(Slot::chamber(3, Role::Ppm)), None);
        assert_eq!(map.len(), 4);
    }

    #[test]
    fn resolve_distinguishes_unassigned_and_missing() {
        let reg = registry(&["START1"]);
        let mut map = RoleMap::new();
        map.assign(Slot::single(Role::Stop), "STOP1");
        assert_eq!(
            map.resolve(Slot::single(Role::Start), &reg),
            Err(TagError::RoleUnassigned(Slot::single(Role::Start)))
        );
        assert_eq!(
            map.resolve(Slot::single(Role::Stop), &reg),
            Err(TagError::RoleUnresolved {
                slot: Slot::single(Role::Stop),
                tag: "STOP1".to_string()
            })
        );
    }

    #[test]
    fn monitor_plan_order() {
        let plan = MonitorPlan::for_layout(Layout::Chambers(2));
        let names: Vec<String> = plan.slots().iter().map(Slot::to_string).collect();
        assert_eq!(names, ["PPM1", "SET1", "ALERTA1", "PPM2", "SET2", "ALERTA2"]);

        let plan = MonitorPlan::for_layout(Layout::Single);
        let names: Vec<String> = plan.slots().iter().map(Slot::to_string).collect();
        assert_eq!(names, ["ppm_tag", "alerta_tag", "set1_tag"]);
    }

    #[test]
    fn tag_layout_reads_everything_with_single_roles() {
        assert_eq!(MonitorPlan::for_layout(Layout::Tags), MonitorPlan::AllTags);
        assert!(MonitorPlan::for_layout(Layout::Tags).slots().is_empty());
        assert_eq!(Layout::Tags.chambers(), vec![None]);

        let reg = registry(&["START1", "ALERTA1"]);
        assert_eq!(
            RoleMap::for_layout(Layout::Tags, &reg),
            RoleMap::single_defaults(&reg)
        );
    }

    #[test]
    fn slot_of_prefers_alarm() {
        let mut map = RoleMap::new();
        map.assign(Slot::single(Role::Confirm), "FLAG");
        map.assign(Slot::single(Role::Alarm), "FLAG");
        map.assign(Slot::single(Role::Start), "START1");
        assert_eq!(map.slot_of("FLAG"), Some(Slot::single(Role::Alarm)));
        assert_eq!(map.slot_of("START1"), Some(Slot::single(Role::Start)));
        assert_eq!(map.slot_of("OTHER"), None);
    }

    #[test]
    fn mapping_keys_round_trip() {
        for role in Role::ALL {
            assert_eq!(Role::from_mapping_key(role.mapping_key()), Some(role));
        }
    }
}
