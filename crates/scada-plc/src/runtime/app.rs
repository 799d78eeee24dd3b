use crate::infra::audit::{AuditEventType, AuditLogger};
use crate::runtime::config::RuntimeConfig;
use crate::runtime::error::AppError;
use crate::runtime::logging::init_tracing;
use crate::runtime::telemetry::{self, EventRecorder};
use scada_core::poller::DEFAULT_STOP_TIMEOUT;
use scada_core::{
    ConnectionManager, ControlPanel, EventBus, Layout, MonitorPlan, PollConfig, Poller,
    PulseController, RoleMap, Shared, SimulatedPlc, TagAccessor, TagRegistry, TimerQueue,
};
use scada_io::auth::AuthConfig;
use scada_io::bridge::{Bridge, BridgeConfig, CommandOutcome};
use scada_io::config::{PlcConnectionConfig, RoleMappingFile, TagConfigFile};
use scada_io::metrics::{PULSE_RESET_FAILURES, RECONNECT_ATTEMPTS};
use scada_io::protocol::CommandAction;
use scada_io::transport_modbus::{ModbusConfig, ModbusTransport};
use scada_io::ConfigError;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub fn run_from_args() -> Result<(), AppError> {
    let config = RuntimeConfig::from_env()?;
    if config.show_help {
        RuntimeConfig::print_help();
        return Ok(());
    }
    run(config)
}

pub fn run(config: RuntimeConfig) -> Result<(), AppError> {
    let _log_guard = init_tracing(config.json_logs, config.log_dir.as_deref())?;

    telemetry::init();
    let ready = Arc::new(AtomicBool::new(false));
    let _metrics_handle = telemetry::start_metrics_server(&config.metrics_addr, ready.clone());

    let audit_logger = init_audit_logger(config.audit_path.as_deref())?;

    let layout = config.layout;
    let (registry, tag_connection) = load_registry(&config.tags_path)?;
    let role_file = RoleMappingFile::load_or_default(&config.roles_path)?;
    let roles = match &role_file {
        Some(file) => file.role_map(layout, &registry),
        None => RoleMap::for_layout(layout, &registry),
    };
    let connection_config = resolve_connection(
        &config,
        role_file.as_ref().and_then(|f| f.plc_connection.as_ref()),
        tag_connection.as_ref(),
    );
    let endpoint = connection_config.endpoint();

    info!(
        tags = registry.len(),
        roles = roles.len(),
        ?layout,
        plc = %endpoint,
        simulate = config.simulate,
        "Configuration loaded"
    );

    let connection = Arc::new(if config.simulate {
        ConnectionManager::new(SimulatedPlc::new())
    } else {
        let transport = ModbusTransport::new(ModbusConfig {
            port: config.modbus_port,
            unit_id: config.modbus_unit,
            holding_db: config.modbus_db,
            ..ModbusConfig::default()
        })
        .map_err(|source| AppError::Spawn {
            what: "modbus runtime",
            source,
        })?;
        ConnectionManager::new(transport)
    });
    if let Err(e) = connection.connect(endpoint.clone()) {
        warn!(error = %e, retry_secs = config.reconnect_interval.as_secs(), "Initial PLC connect failed, will retry");
    }

    if let Some(ref logger) = audit_logger {
        logger.record(
            AuditEventType::SystemStart,
            serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "plc": endpoint.to_string(),
                "connected": connection.is_connected(),
                "layout": format!("{layout:?}"),
                "bridge_enabled": config.bridge_enabled,
                "metrics_enabled": config.metrics_addr.is_some(),
            }),
        );
    }

    let accessor = TagAccessor::new(connection.clone());
    let timers = Arc::new(TimerQueue::new().map_err(|source| AppError::Spawn {
        what: "pulse timer",
        source,
    })?);
    let pulses = PulseController::new(accessor.clone(), timers.clone(), config.pulse_width);
    let registry = Arc::new(Shared::new(registry));
    let roles = Arc::new(Shared::new(roles));

    let stop = Arc::new(AtomicBool::new(false));
    let bus = EventBus::new();

    let recorder_handle = telemetry::start_event_recorder(
        bus.subscribe(),
        EventRecorder::new(audit_logger.clone(), ready.clone()),
        stop.clone(),
    )
    .map_err(|source| AppError::Spawn {
        what: "telemetry thread",
        source,
    })?;

    let bridge_handle = if config.bridge_enabled {
        let bridge = Bridge::bind(build_bridge_config(&config)).map_err(|source| {
            AppError::Spawn {
                what: "operator bridge",
                source,
            }
        })?;
        let panel = ControlPanel::new(
            accessor.clone(),
            pulses.clone(),
            registry.clone(),
            roles.clone(),
        )
        .confirm_with_pulse(config.confirm_pulse);
        let persister = CommandRecorder {
            audit: audit_logger.clone(),
            registry: registry.clone(),
            roles: roles.clone(),
            layout,
            tags_path: config.tags_path.clone(),
            roles_path: config.roles_path.clone(),
            tag_connection: tag_connection.clone(),
            connection: connection_config.clone(),
        };
        let events = bus.subscribe();
        let stop_bridge = stop.clone();
        let handle = thread::Builder::new()
            .name("bridge".to_string())
            .spawn(move || {
                bridge.run(panel, events, stop_bridge, |outcome| {
                    persister.on_command(outcome)
                })
            })
            .map_err(|source| AppError::Spawn {
                what: "bridge thread",
                source,
            })?;
        Some(handle)
    } else {
        info!("Bridge disabled");
        None
    };

    let poller = Poller::new(
        accessor,
        registry.clone(),
        roles.clone(),
        MonitorPlan::for_layout(layout),
        PollConfig::new(config.poll_interval),
        bus,
    )
    .spawn()
    .map_err(|source| AppError::Spawn {
        what: "poller thread",
        source,
    })?;

    info!(
        interval_ms = config.poll_interval.as_millis() as u64,
        pulse_ms = config.pulse_width.as_millis() as u64,
        "scada-plc running"
    );

    supervise(&config, &connection, &pulses, audit_logger.as_deref());

    let stats = poller.stop(DEFAULT_STOP_TIMEOUT);
    stop.store(true, Ordering::Relaxed);
    if let Some(handle) = bridge_handle {
        let _ = handle.join();
    }
    let _ = recorder_handle.join();

    // Last handle to the timer queue: pending resets run before disconnect.
    drop(pulses);
    drop(timers);
    connection.disconnect();

    let stats = stats?;
    info!(
        cycles_executed = stats.cycles_executed,
        cycles_disconnected = stats.cycles_disconnected,
        read_failures = stats.read_failures,
        alarm_edges = stats.alarm_edges,
        overruns = stats.overruns,
        max_cycle_us = stats.max_cycle_us,
        "Run complete"
    );
    if let Some(ref logger) = audit_logger {
        logger.record(
            AuditEventType::SystemShutdown,
            serde_json::json!({
                "cycles_executed": stats.cycles_executed,
                "cycles_disconnected": stats.cycles_disconnected,
                "read_failures": stats.read_failures,
                "alarm_edges": stats.alarm_edges,
            }),
        );
    }
    Ok(())
}

/// Keeps the PLC link up until the run deadline, if any.
fn supervise(
    config: &RuntimeConfig,
    connection: &ConnectionManager,
    pulses: &PulseController,
    audit: Option<&AuditLogger>,
) {
    let deadline = config
        .run_seconds
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    if let Some(secs) = config.run_seconds {
        info!(seconds = secs, "Running for limited duration");
    }
    let mut next_attempt = Instant::now() + config.reconnect_interval;

    while deadline.map_or(true, |d| Instant::now() < d) {
        if !connection.is_connected() && Instant::now() >= next_attempt {
            RECONNECT_ATTEMPTS.inc();
            match connection.reconnect() {
                Ok(()) => info!("PLC reconnected"),
                Err(e) => {
                    debug!(error = %e, "PLC reconnect failed");
                    if let Some(logger) = audit {
                        logger.record(
                            AuditEventType::ReconnectFailed,
                            serde_json::json!({ "error": e.to_string() }),
                        );
                    }
                }
            }
            next_attempt = Instant::now() + config.reconnect_interval;
        }
        PULSE_RESET_FAILURES.set(pulses.failed_resets() as f64);
        thread::sleep(Duration::from_millis(100));
    }
}

/// A missing tag file starts an empty registry; anything else wrong with it
/// is fatal.
fn load_registry(
    path: &Path,
) -> Result<(TagRegistry, Option<PlcConnectionConfig>), AppError> {
    match TagConfigFile::load(path) {
        Ok(file) => Ok((file.registry()?, file.plc_connection)),
        Err(ConfigError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "Tag file not found, starting with no tags");
            Ok((TagRegistry::new(), None))
        }
        Err(e) => Err(e.into()),
    }
}

/// Flags beat the role file, which beats the tag file, which beats defaults.
fn resolve_connection(
    config: &RuntimeConfig,
    role_file: Option<&PlcConnectionConfig>,
    tag_file: Option<&PlcConnectionConfig>,
) -> PlcConnectionConfig {
    let base = role_file.or(tag_file).cloned().unwrap_or_default();
    PlcConnectionConfig {
        ip_address: config.plc_address.clone().unwrap_or(base.ip_address),
        rack: config.plc_rack.unwrap_or(base.rack),
        slot: config.plc_slot.unwrap_or(base.slot),
    }
}

fn build_bridge_config(config: &RuntimeConfig) -> BridgeConfig {
    BridgeConfig {
        bind_addr: config.bind_addr.clone(),
        auth: AuthConfig {
            enabled: config.auth_secret.is_some(),
            secret: config.auth_secret.clone().unwrap_or_default().into_bytes(),
            max_age_secs: config.auth_max_age_secs,
        },
        require_handshake: config.bridge_require_handshake,
    }
}

fn init_audit_logger(audit_path: Option<&Path>) -> Result<Option<Arc<AuditLogger>>, AppError> {
    audit_path
        .map(|path| match AuditLogger::new(path) {
            Ok(logger) => {
                info!(path = %path.display(), "Audit logging enabled");
                Ok(Arc::new(logger))
            }
            Err(source) => Err(AppError::Audit {
                path: path.to_path_buf(),
                source,
            }),
        })
        .transpose()
}

/// Bridge command hook: audits every command and saves configuration edits.
struct CommandRecorder {
    audit: Option<Arc<AuditLogger>>,
    registry: Arc<Shared<TagRegistry>>,
    roles: Arc<Shared<RoleMap>>,
    layout: Layout,
    tags_path: PathBuf,
    roles_path: PathBuf,
    tag_connection: Option<PlcConnectionConfig>,
    connection: PlcConnectionConfig,
}

impl CommandRecorder {
    fn on_command(&self, outcome: &CommandOutcome) {
        if let Some(logger) = &self.audit {
            let kind = if outcome.is_ok() {
                AuditEventType::CommandExecuted
            } else {
                AuditEventType::CommandRejected
            };
            logger.record(
                kind,
                serde_json::json!({
                    "action": outcome.action.name(),
                    "slot": outcome.action.slot(),
                    "tag": outcome.tag,
                    "request_id": outcome.request_id,
                    "client_id": outcome.client_id,
                    "error": outcome.error,
                }),
            );
        }
        if outcome.is_ok() && outcome.action.is_config_edit() {
            match self.persist(&outcome.action) {
                Ok(path) => {
                    if let Some(logger) = &self.audit {
                        logger.record(
                            AuditEventType::ConfigChange,
                            serde_json::json!({
                                "action": outcome.action.name(),
                                "file": path.display().to_string(),
                            }),
                        );
                    }
                }
                Err(e) => warn!(error = %e, action = outcome.action.name(), "Configuration edit applied but not saved"),
            }
        }
    }

    fn persist(&self, action: &CommandAction) -> Result<&Path, ConfigError> {
        match action {
            CommandAction::AssignRole { .. } => {
                let roles = self.roles.snapshot();
                let mut file = RoleMappingFile::from_role_map(
                    &roles,
                    self.layout,
                    Some(self.connection.clone()),
                );
                if self.layout.is_single_mapping() {
                    file.validate_single()?;
                }
                file.save(&self.roles_path)?;
                Ok(&self.roles_path)
            }
            _ => {
                let registry = self.registry.snapshot();
                TagConfigFile::from_registry(&registry, self.tag_connection.clone())
                    .save(&self.tags_path)?;
                Ok(&self.tags_path)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scada_core::{RegionKind, Role, Slot, TagDescriptor, ValueKind};
    use scada_io::config::TagEntry;

    fn conn(ip: &str, rack: u16, slot: u16) -> PlcConnectionConfig {
        PlcConnectionConfig {
            ip_address: ip.to_string(),
            rack,
            slot,
        }
    }

    #[test]
    fn connection_precedence() {
        let mut config = RuntimeConfig::default();
        let role = conn("10.0.0.2", 0, 2);
        let tags = conn("10.0.0.3", 1, 3);

        assert_eq!(
            resolve_connection(&config, None, None),
            conn("192.168.0.1", 0, 1)
        );
        assert_eq!(resolve_connection(&config, None, Some(&tags)), tags);
        assert_eq!(resolve_connection(&config, Some(&role), Some(&tags)), role);

        config.plc_address = Some("10.0.0.9".to_string());
        config.plc_rack = Some(4);
        assert_eq!(
            resolve_connection(&config, Some(&role), Some(&tags)),
            conn("10.0.0.9", 4, 2)
        );
    }

    #[test]
    fn missing_tag_file_is_empty_registry() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, connection) = load_registry(&dir.path().join("absent.json")).unwrap();
        assert!(registry.is_empty());
        assert!(connection.is_none());
    }

    #[test]
    fn malformed_tag_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tags.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            load_registry(&path),
            Err(AppError::Config(ConfigError::Malformed { .. }))
        ));
    }

    fn recorder(dir: &Path, layout: Layout) -> CommandRecorder {
        let registry = TagRegistry::from_descriptors([
            TagDescriptor::new("START1", RegionKind::Flag, ValueKind::Boolean, 0, Some(0), None)
                .unwrap(),
            TagDescriptor::new("ALERTA1", RegionKind::Flag, ValueKind::Boolean, 1, Some(0), None)
                .unwrap(),
            TagDescriptor::new("CONFIRM1", RegionKind::Flag, ValueKind::Boolean, 0, Some(2), None)
                .unwrap(),
        ])
        .unwrap();
        let roles = RoleMap::for_layout(layout, &registry);
        CommandRecorder {
            audit: None,
            registry: Arc::new(Shared::new(registry)),
            roles: Arc::new(Shared::new(roles)),
            layout,
            tags_path: dir.join("tags.json"),
            roles_path: dir.join("roles.json"),
            tag_connection: None,
            connection: PlcConnectionConfig::default(),
        }
    }

    fn outcome(action: CommandAction, error: Option<&str>) -> CommandOutcome {
        CommandOutcome {
            request_id: Some(1),
            action,
            client_id: None,
            tag: None,
            error: error.map(String::from),
        }
    }

    #[test]
    fn role_edit_is_saved() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = recorder(dir.path(), Layout::Single);
        recorder
            .roles
            .update(|roles| roles.assign(Slot::single(Role::Ppm), "ALERTA1"));
        recorder.on_command(&outcome(
            CommandAction::AssignRole {
                chamber: None,
                role: Role::Ppm,
                tag: Some("ALERTA1".to_string()),
            },
            None,
        ));

        let saved = RoleMappingFile::load(dir.path().join("roles.json")).unwrap();
        assert_eq!(saved.single.get(Role::Ppm), Some("ALERTA1"));
        assert_eq!(saved.single.get(Role::Start), Some("START1"));
        assert_eq!(saved.single.entry(Role::Stop), Some(None));
        assert_eq!(saved.version.as_deref(), Some("1.1"));
        assert!(!dir.path().join("tags.json").exists());
    }

    #[test]
    fn incomplete_single_mapping_is_not_saved() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = recorder(dir.path(), Layout::Single);
        recorder
            .roles
            .update(|roles| roles.unassign(Slot::single(Role::Confirm)));
        recorder.on_command(&outcome(
            CommandAction::AssignRole {
                chamber: None,
                role: Role::Confirm,
                tag: None,
            },
            None,
        ));
        assert!(!dir.path().join("roles.json").exists());
    }

    #[test]
    fn tag_edit_is_saved_and_failures_are_not() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = recorder(dir.path(), Layout::Chambers(1));
        let entry = TagEntry {
            name: "PPM1".to_string(),
            tag_type: "DB".to_string(),
            address: 4,
            data_type: "int".to_string(),
            bit: None,
            db_number: Some(1),
        };

        recorder.on_command(&outcome(
            CommandAction::UpsertTag { tag: entry.clone() },
            Some("rejected"),
        ));
        assert!(!dir.path().join("tags.json").exists());

        recorder
            .registry
            .update(|registry| registry.insert_or_replace(entry.to_descriptor().unwrap()));
        recorder.on_command(&outcome(CommandAction::UpsertTag { tag: entry }, None));

        let saved = TagConfigFile::load(dir.path().join("tags.json")).unwrap();
        assert_eq!(saved.tags.len(), 4);
        assert_eq!(saved.tags[3].name, "PPM1");
        assert_eq!(saved.registry().unwrap().len(), 4);
    }
}
