use super::error::AppError;
use scada_core::Layout;
use scada_io::config::{DEFAULT_ROLE_FILE, DEFAULT_TAG_FILE};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub show_help: bool,
    pub run_seconds: Option<u64>,
    pub tags_path: PathBuf,
    pub roles_path: PathBuf,
    pub layout: Layout,
    pub poll_interval: Duration,
    pub pulse_width: Duration,
    pub confirm_pulse: bool,
    pub plc_address: Option<String>,
    pub plc_rack: Option<u16>,
    pub plc_slot: Option<u16>,
    pub reconnect_interval: Duration,
    pub simulate: bool,
    pub modbus_port: u16,
    pub modbus_unit: u8,
    pub modbus_db: u16,
    pub bind_addr: String,
    pub bridge_enabled: bool,
    pub bridge_require_handshake: bool,
    pub auth_secret: Option<String>,
    pub auth_max_age_secs: u64,
    pub json_logs: bool,
    pub log_dir: Option<PathBuf>,
    pub metrics_addr: Option<String>,
    pub audit_path: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            show_help: false,
            run_seconds: None,
            tags_path: PathBuf::from(DEFAULT_TAG_FILE),
            roles_path: PathBuf::from(DEFAULT_ROLE_FILE),
            layout: Layout::Single,
            poll_interval: Duration::from_secs(1),
            pulse_width: Duration::from_millis(200),
            confirm_pulse: false,
            plc_address: None,
            plc_rack: None,
            plc_slot: None,
            reconnect_interval: Duration::from_secs(5),
            simulate: false,
            modbus_port: 502,
            modbus_unit: 1,
            modbus_db: 1,
            bind_addr: "127.0.0.1:7000".to_string(),
            bridge_enabled: true,
            bridge_require_handshake: false,
            auth_secret: None,
            auth_max_age_secs: 300,
            json_logs: false,
            log_dir: None,
            metrics_addr: None,
            audit_path: None,
        }
    }
}

fn take<'a>(args: &'a [String], i: &mut usize) -> Result<&'a str, AppError> {
    let flag = &args[*i];
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| AppError::MissingValue(flag.clone()))
}

fn parse<T: FromStr>(flag: &str, raw: &str) -> Result<T, AppError> {
    raw.parse().map_err(|_| AppError::InvalidValue {
        flag: flag.to_string(),
        value: raw.to_string(),
    })
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let args: Vec<String> = std::env::args().collect();
        Self::from_args(&args)
    }

    pub fn from_args(args: &[String]) -> Result<Self, AppError> {
        let mut cfg = RuntimeConfig::default();
        let mut i = 1;
        while i < args.len() {
            let flag = args[i].as_str();
            match flag {
                "--tags" => cfg.tags_path = PathBuf::from(take(args, &mut i)?),
                "--roles" => cfg.roles_path = PathBuf::from(take(args, &mut i)?),
                "--chambers" => {
                    let n: u8 = parse(flag, take(args, &mut i)?)?;
                    if n == 0 {
                        return Err(AppError::InvalidValue {
                            flag: flag.to_string(),
                            value: "0".to_string(),
                        });
                    }
                    cfg.layout = Layout::Chambers(n);
                }
                "--layout" => {
                    cfg.layout = match take(args, &mut i)? {
                        "single" => Layout::Single,
                        "tags" => Layout::Tags,
                        other => {
                            return Err(AppError::InvalidValue {
                                flag: flag.to_string(),
                                value: other.to_string(),
                            })
                        }
                    };
                }
                "--interval-ms" => {
                    cfg.poll_interval = Duration::from_millis(parse(flag, take(args, &mut i)?)?);
                }
                "--pulse-ms" => {
                    cfg.pulse_width = Duration::from_millis(parse(flag, take(args, &mut i)?)?);
                }
                "--confirm-pulse" => cfg.confirm_pulse = true,
                "--plc" => cfg.plc_address = Some(take(args, &mut i)?.to_string()),
                "--rack" => cfg.plc_rack = Some(parse(flag, take(args, &mut i)?)?),
                "--slot" => cfg.plc_slot = Some(parse(flag, take(args, &mut i)?)?),
                "--reconnect-secs" => {
                    cfg.reconnect_interval =
                        Duration::from_secs(parse(flag, take(args, &mut i)?)?);
                }
                "--simulate" => cfg.simulate = true,
                "--modbus-port" => cfg.modbus_port = parse(flag, take(args, &mut i)?)?,
                "--modbus-unit" => cfg.modbus_unit = parse(flag, take(args, &mut i)?)?,
                "--modbus-db" => cfg.modbus_db = parse(flag, take(args, &mut i)?)?,
                "--bind" => cfg.bind_addr = take(args, &mut i)?.to_string(),
                "--no-bridge" => cfg.bridge_enabled = false,
                "--require-handshake" => cfg.bridge_require_handshake = true,
                "--auth-secret" => cfg.auth_secret = Some(take(args, &mut i)?.to_string()),
                "--auth-max-age" => cfg.auth_max_age_secs = parse(flag, take(args, &mut i)?)?,
                "--json-logs" => cfg.json_logs = true,
                "--log-dir" => cfg.log_dir = Some(PathBuf::from(take(args, &mut i)?)),
                "--metrics-addr" => cfg.metrics_addr = Some(take(args, &mut i)?.to_string()),
                "--audit-log" => cfg.audit_path = Some(PathBuf::from(take(args, &mut i)?)),
                "--run-seconds" => cfg.run_seconds = Some(parse(flag, take(args, &mut i)?)?),
                "--help" | "-h" => {
                    cfg.show_help = true;
                    break;
                }
                other => return Err(AppError::UnknownArgument(other.to_string())),
            }
            i += 1;
        }
        Ok(cfg)
    }

    pub fn print_help() {
        println!(
            r#"scada-plc - Supervisory polling and control for S7-style PLCs

USAGE:
    scada-plc [OPTIONS]

OPTIONS:
    --tags <PATH>           Tag list [default: plc_tags_config.json]
    --roles <PATH>          Role mapping [default: gasificado_config.json]
    --chambers <N>          Monitor N chambers by naming convention (PPM1, ALERTA1, ...)
    --layout <single|tags>  Single-chamber roles, or read every configured tag each cycle
    --interval-ms <MS>      Poll interval, clamped to at least 100 [default: 1000]
    --pulse-ms <MS>         Pulse width for start/stop commands [default: 200]
    --confirm-pulse         Send alarm confirmations as pulses instead of plain writes
    --plc <ADDR>            PLC address, overrides the configuration files
    --rack <N>              PLC rack, overrides the configuration files
    --slot <N>              PLC slot, overrides the configuration files
    --reconnect-secs <SECS> Delay between reconnect attempts [default: 5]
    --simulate              Use the in-memory simulated PLC
    --modbus-port <PORT>    Modbus-TCP gateway port [default: 502]
    --modbus-unit <ID>      Modbus unit id [default: 1]
    --modbus-db <N>         Data block mirrored by the holding registers [default: 1]
    --bind <ADDR>           Operator bridge bind address [default: 127.0.0.1:7000]
    --no-bridge             Disable the operator bridge
    --require-handshake     Require a hello message before accepting commands
    --auth-secret <STR>     Shared secret for HMAC command tokens
    --auth-max-age <SECS>   Maximum age for auth tokens in seconds [default: 300]
    --json-logs             Output logs in JSON format
    --log-dir <PATH>        Also write JSON logs to a daily rolling file in PATH
    --metrics-addr <ADDR>   Enable Prometheus metrics server on address (e.g., 0.0.0.0:9090)
    --audit-log <PATH>      Enable audit logging to specified JSONL file
    --run-seconds <SECS>    Run for a fixed duration then exit
    -h, --help              Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log filter (e.g., RUST_LOG=debug,scada_core=trace)

EXAMPLES:
    # Three-chamber overview against a real controller
    scada-plc --chambers 3 --plc 192.168.0.1 --metrics-addr 0.0.0.0:9090

    # Short simulated run
    scada-plc --simulate --run-seconds 10 --no-bridge
"#
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("scada-plc")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn defaults_without_flags() {
        let cfg = RuntimeConfig::from_args(&args(&[])).unwrap();
        assert_eq!(cfg.tags_path, PathBuf::from("plc_tags_config.json"));
        assert_eq!(cfg.poll_interval, Duration::from_secs(1));
        assert_eq!(cfg.pulse_width, Duration::from_millis(200));
        assert!(cfg.bridge_enabled);
        assert_eq!(cfg.layout, Layout::Single);
    }

    #[test]
    fn parses_flags() {
        let cfg = RuntimeConfig::from_args(&args(&[
            "--chambers",
            "3",
            "--interval-ms",
            "250",
            "--plc",
            "10.0.0.7",
            "--slot",
            "2",
            "--simulate",
            "--no-bridge",
            "--audit-log",
            "/tmp/audit.jsonl",
        ]))
        .unwrap();
        assert_eq!(cfg.layout, Layout::Chambers(3));
        assert_eq!(cfg.poll_interval, Duration::from_millis(250));
        assert_eq!(cfg.plc_address.as_deref(), Some("10.0.0.7"));
        assert_eq!(cfg.plc_slot, Some(2));
        assert_eq!(cfg.plc_rack, None);
        assert!(cfg.simulate);
        assert!(!cfg.bridge_enabled);
        assert_eq!(cfg.audit_path, Some(PathBuf::from("/tmp/audit.jsonl")));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(
            RuntimeConfig::from_args(&args(&["--chambers", "many"])),
            Err(AppError::InvalidValue { .. })
        ));
        assert!(matches!(
            RuntimeConfig::from_args(&args(&["--chambers", "0"])),
            Err(AppError::InvalidValue { .. })
        ));
        assert!(matches!(
            RuntimeConfig::from_args(&args(&["--bind"])),
            Err(AppError::MissingValue(_))
        ));
        assert!(matches!(
            RuntimeConfig::from_args(&args(&["--frobnicate"])),
            Err(AppError::UnknownArgument(_))
        ));
    }

    #[test]
    fn layout_flag() {
        let cfg = RuntimeConfig::from_args(&args(&["--layout", "tags"])).unwrap();
        assert_eq!(cfg.layout, Layout::Tags);
        let cfg = RuntimeConfig::from_args(&args(&["--chambers", "2", "--layout", "single"])).unwrap();
        assert_eq!(cfg.layout, Layout::Single);
        assert!(matches!(
            RuntimeConfig::from_args(&args(&["--layout", "grid"])),
            Err(AppError::InvalidValue { value, .. }) if value == "grid"
        ));
    }

    #[test]
    fn help_stops_parsing() {
        let cfg = RuntimeConfig::from_args(&args(&["-h", "--frobnicate"])).unwrap();
        assert!(cfg.show_help);
    }
}
