//! Synchronous operator commands.
//!
//! Every failure is returned to the caller so the interactive side can tell
//! the operator.

use crate::accessor::TagAccessor;
use crate::diagnostics::{self, DiagnosticReport};
use crate::error::TagError;
use crate::pulse::PulseController;
use crate::registry::TagRegistry;
use crate::roles::{Role, RoleMap, Slot};
use crate::sync::Shared;
use crate::tags::{TagDescriptor, TagValue, ValueKind};
use log::info;
use std::sync::Arc;

#[derive(Clone)]
pub struct ControlPanel {
    accessor: TagAccessor,
    pulses: PulseController,
    registry: Arc<Shared<TagRegistry>>,
    roles: Arc<Shared<RoleMap>>,
    confirm_with_pulse: bool,
}

impl ControlPanel {
    pub fn new(
        accessor: TagAccessor,
        pulses: PulseController,
        registry: Arc<Shared<TagRegistry>>,
        roles: Arc<Shared<RoleMap>>,
    ) -> Self {
        Self {
            accessor,
            pulses,
            registry,
            roles,
            confirm_with_pulse: false,
        }
    }

    /// Send alarm confirmations as pulses instead of plain writes.
    pub fn confirm_with_pulse(mut self, enabled: bool) -> Self {
        self.confirm_with_pulse = enabled;
        self
    }

    pub fn registry(&self) -> &Arc<Shared<TagRegistry>> {
        &self.registry
    }

    pub fn roles(&self) -> &Arc<Shared<RoleMap>> {
        &self.roles
    }

    fn resolve(&self, slot: Slot) -> Result<TagDescriptor, TagError> {
        let registry = self.registry.snapshot();
        let roles = self.roles.snapshot();
        roles.resolve(slot, &registry).cloned()
    }

    pub fn start(&self, chamber: Option<u8>) -> Result<TagDescriptor, TagError> {
        self.pulse_role(Slot::new(chamber, Role::Start))
    }

    pub fn stop(&self, chamber: Option<u8>) -> Result<TagDescriptor, TagError> {
        self.pulse_role(Slot::new(chamber, Role::Stop))
    }

    fn pulse_role(&self, slot: Slot) -> Result<TagDescriptor, TagError> {
        let tag = self.resolve(slot)?;
        self.pulses.pulse(&tag)?;
        info!("{slot} pulsed via {}", tag.name());
        Ok(tag)
    }

    /// Writes a new setpoint. Boolean setpoint tags are refused.
    pub fn apply_setpoint(
        &self,
        chamber: Option<u8>,
        value: TagValue,
    ) -> Result<TagDescriptor, TagError> {
        let tag = self.resolve(Slot::new(chamber, Role::Setpoint))?;
        if tag.value_kind() == ValueKind::Boolean {
            return Err(TagError::TypeMismatch {
                tag: tag.name().to_string(),
                expected: ValueKind::Float32,
                got: tag.value_kind().code(),
            });
        }
        self.accessor.write(&tag, value)?;
        info!("setpoint {} = {value}", tag.name());
        Ok(tag)
    }

    /// Acknowledges an alarm by writing the active level to the confirm tag.
    pub fn confirm_alarm(&self, chamber: Option<u8>) -> Result<TagDescriptor, TagError> {
        let tag = self.resolve(Slot::new(chamber, Role::Confirm))?;
        if self.confirm_with_pulse {
            self.pulses.pulse(&tag)?;
        } else {
            let (active, _) = tag.value_kind().pulse_levels();
            self.accessor.write(&tag, active)?;
        }
        info!("alarm confirmed via {}", tag.name());
        Ok(tag)
    }

    pub fn read_tag(&self, name: &str) -> Result<TagValue, TagError> {
        let registry = self.registry.snapshot();
        self.accessor.read(registry.resolve(name)?)
    }

    pub fn write_tag(&self, name: &str, value: TagValue) -> Result<(), TagError> {
        let registry = self.registry.snapshot();
        self.accessor.write(registry.resolve(name)?, value)
    }

    pub fn pulse_tag(&self, name: &str) -> Result<(), TagError> {
        let registry = self.registry.snapshot();
        self.pulses.pulse(registry.resolve(name)?)
    }

    /// Surveys which controller addresses answer reads.
    pub fn diagnose(&self) -> Result<DiagnosticReport, TagError> {
        diagnostics::survey(self.accessor.connection())
    }

    /// Points `slot` at `tag`, or clears it with `None`.
    ///
    /// The tag must exist at assignment time; it may still go missing later
    /// through [`remove_tag`](Self::remove_tag).
    pub fn assign_role(&self, slot: Slot, tag: Option<String>) -> Result<Option<String>, TagError> {
        match tag {
            Some(name) => {
                if !self.registry.snapshot().contains(&name) {
                    return Err(TagError::UnknownTag(name));
                }
                info!("role {slot} -> {name}");
                Ok(self.roles.update(|roles| roles.assign(slot, name)))
            }
            None => {
                info!("role {slot} cleared");
                Ok(self.roles.update(|roles| roles.unassign(slot)))
            }
        }
    }

    /// Inserts or replaces a tag definition. Returns the replaced one.
    pub fn upsert_tag(&self, descriptor: TagDescriptor) -> Option<TagDescriptor> {
        info!("tag {} defined at {}", descriptor.name(), descriptor.address());
        self.registry.update(|registry| registry.insert_or_replace(descriptor))
    }

    pub fn remove_tag(&self, name: &str) -> Result<TagDescriptor, TagError> {
        let removed = self
            .registry
            .update(|registry| registry.remove(name))
            .ok_or_else(|| TagError::UnknownTag(name.to_string()))?;
        info!("tag {name} removed");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionManager;
    use crate::hal::{Area, Endpoint};
    use crate::hal_sim::SimulatedPlc;
    use crate::pulse::TimerQueue;
    use crate::roles::Layout;
    use crate::tags::RegionKind;
    use std::time::Duration;

    fn panel() -> (SimulatedPlc, ControlPanel, Arc<TimerQueue>) {
        let plc = SimulatedPlc::new();
        let manager = Arc::new(ConnectionManager::new(plc.clone()));
        manager.connect(Endpoint::new("192.168.0.1", 0, 1)).unwrap();
        let accessor = TagAccessor::new(manager);
        let timers = Arc::new(TimerQueue::new().unwrap());
        let pulses = PulseController::new(accessor.clone(), timers.clone(), Duration::from_millis(30));
        let registry = TagRegistry::from_descriptors([
            TagDescriptor::new("START1", RegionKind::Flag, ValueKind::Boolean, 0, Some(0), None).unwrap(),
            TagDescriptor::new("CONFIRM1", RegionKind::Flag, ValueKind::Boolean, 0, Some(2), None).unwrap(),
            TagDescriptor::new("SET1", RegionKind::DataBlock, ValueKind::Float32, 0, None, Some(1)).unwrap(),
            TagDescriptor::new("ALERTA1", RegionKind::Flag, ValueKind::Boolean, 1, Some(0), None).unwrap(),
            TagDescriptor::new("LEVEL", RegionKind::AnalogInput, ValueKind::Integer16, 64, None, None).unwrap(),
        ])
        .unwrap();
        let roles = RoleMap::for_layout(Layout::Single, &registry);
        let panel = ControlPanel::new(
            accessor,
            pulses,
            Arc::new(Shared::new(registry)),
            Arc::new(Shared::new(roles)),
        );
        (plc, panel, timers)
    }

    #[test]
    fn start_pulses_and_resets() {
        let (plc, panel, _timers) = panel();
        let tag = panel.start(None).unwrap();
        assert_eq!(tag.name(), "START1");
        assert!(plc.bit(Area::Flags, 0, 0));
        std::thread::sleep(Duration::from_millis(200));
        assert!(!plc.bit(Area::Flags, 0, 0));
    }

    #[test]
    fn unassigned_stop_is_reported() {
        let (_plc, panel, _timers) = panel();
        assert_eq!(
            panel.stop(None),
            Err(TagError::RoleUnassigned(Slot::single(Role::Stop)))
        );
    }

    #[test]
    fn setpoint_written_as_real() {
        let (plc, panel, _timers) = panel();
        panel.apply_setpoint(None, TagValue::Int(350)).unwrap();
        assert_eq!(plc.peek(Area::DataBlock(1), 0, 4), 350f32.to_be_bytes().to_vec());
    }

    #[test]
    fn boolean_setpoint_refused() {
        let (_plc, panel, _timers) = panel();
        panel.assign_role(Slot::single(Role::Setpoint), Some("START1".into())).unwrap();
        assert!(matches!(
            panel.apply_setpoint(None, TagValue::Int(1)),
            Err(TagError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn confirm_is_a_latched_write_by_default() {
        let (plc, panel, _timers) = panel();
        panel.confirm_alarm(None).unwrap();
        std::thread::sleep(Duration::from_millis(120));
        assert!(plc.bit(Area::Flags, 0, 2));
    }

    #[test]
    fn confirm_can_pulse() {
        let (plc, panel, _timers) = panel();
        let panel = panel.confirm_with_pulse(true);
        panel.confirm_alarm(None).unwrap();
        assert!(plc.bit(Area::Flags, 0, 2));
        std::thread::sleep(Duration::from_millis(200));
        assert!(!plc.bit(Area::Flags, 0, 2));
    }

    #[test]
    fn writes_to_inputs_are_rejected() {
        let (_plc, panel, _timers) = panel();
        assert!(matches!(
            panel.write_tag("LEVEL", TagValue::Int(3)),
            Err(TagError::ReadOnlyViolation { .. })
        ));
        assert_eq!(panel.read_tag("LEVEL"), Ok(TagValue::Int(0)));
        assert_eq!(panel.read_tag("NOPE"), Err(TagError::UnknownTag("NOPE".into())));
    }

    #[test]
    fn diagnose_reports_answering_blocks() {
        let (plc, panel, _timers) = panel();
        plc.limit_blocks(&[1]);
        plc.fail_next(1);
        let report = panel.diagnose().unwrap();
        assert_eq!(report.inputs, vec![1, 2, 3, 4, 5]);
        assert_eq!(report.outputs.len(), 6);
        assert_eq!(report.data_blocks, vec![1]);

        plc.drop_link();
        assert_eq!(panel.diagnose(), Err(TagError::NotConnected));
    }

    #[test]
    fn config_edits_swap_snapshots() {
        let (_plc, panel, _timers) = panel();
        let before = panel.registry().snapshot();
        panel.upsert_tag(
            TagDescriptor::new("STOP1", RegionKind::Flag, ValueKind::Boolean, 0, Some(1), None).unwrap(),
        );
        assert!(!before.contains("STOP1"));
        panel.assign_role(Slot::single(Role::Stop), Some("STOP1".into())).unwrap();
        panel.stop(None).unwrap();

        assert!(matches!(
            panel.assign_role(Slot::single(Role::Ppm), Some("GHOST".into())),
            Err(TagError::UnknownTag(_))
        ));

        panel.remove_tag("STOP1").unwrap();
        assert!(matches!(
            panel.stop(None),
            Err(TagError::RoleUnresolved { .. })
        ));
        assert_eq!(
            panel.assign_role(Slot::single(Role::Stop), None),
            Ok(Some("STOP1".to_string()))
        );
    }
}
