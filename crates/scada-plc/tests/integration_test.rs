use serde_json::Value;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::process::{Child, Command};
use std::thread;
use std::time::{Duration, Instant};

const TAGS: &str = r#"{
  "plc_connection": {"ip_address": "192.168.0.10", "rack": 0, "slot": 1},
  "tags": [
    {"name": "START1", "tag_type": "M", "address": 0, "data_type": "bool", "bit": 0, "db_number": null},
    {"name": "ALERTA1", "tag_type": "M", "address": 1, "data_type": "bool", "bit": 0, "db_number": null},
    {"name": "CONFIRM1", "tag_type": "M", "address": 0, "data_type": "bool", "bit": 2, "db_number": null},
    {"name": "SET1", "tag_type": "DB", "address": 0, "data_type": "real", "bit": null, "db_number": 1},
    {"name": "PPM1", "tag_type": "DB", "address": 4, "data_type": "int", "bit": null, "db_number": 1}
  ]
}"#;

fn binary() -> String {
    std::env::var("CARGO_BIN_EXE_scada-plc").unwrap_or_else(|_| {
        let candidates = [
            "../../target/debug/scada-plc",
            "target/debug/scada-plc",
            "../../target/release/scada-plc",
            "target/release/scada-plc",
        ];
        for candidate in candidates {
            if Path::new(candidate).exists() {
                return candidate.to_string();
            }
        }
        panic!("Failed to locate scada-plc binary. Expected CARGO_BIN_EXE_scada-plc.");
    })
}

fn free_port() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    format!("127.0.0.1:{}", addr.port())
}

struct PlcProcess {
    child: Child,
    addr: String,
}

impl PlcProcess {
    fn start(dir: &Path, run_seconds: u64) -> Self {
        std::fs::write(dir.join("tags.json"), TAGS).unwrap();
        let addr = free_port();
        let child = Command::new(binary())
            .current_dir(dir)
            .args([
                "--simulate",
                "--tags",
                "tags.json",
                "--roles",
                "roles.json",
                "--audit-log",
                "audit.jsonl",
                "--interval-ms",
                "100",
                "--bind",
                &addr,
                "--run-seconds",
                &run_seconds.to_string(),
            ])
            .spawn()
            .expect("Failed to start scada-plc");
        Self { child, addr }
    }

    fn connect(&self) -> TcpStream {
        let start = Instant::now();
        loop {
            if let Ok(stream) = TcpStream::connect(&self.addr) {
                stream
                    .set_read_timeout(Some(Duration::from_secs(5)))
                    .unwrap();
                return stream;
            }
            assert!(start.elapsed() < Duration::from_secs(10), "bridge never came up");
            thread::sleep(Duration::from_millis(100));
        }
    }

    fn wait(mut self) -> std::process::ExitStatus {
        self.child.wait().expect("wait for scada-plc")
    }
}

impl Drop for PlcProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
    }
}

fn next_line(reader: &mut BufReader<TcpStream>) -> Value {
    let mut line = String::new();
    let read = reader.read_line(&mut line).expect("read bridge line");
    assert!(read > 0, "bridge closed the connection");
    serde_json::from_str(&line).expect("bridge sends JSON lines")
}

fn reply(reader: &mut BufReader<TcpStream>) -> Value {
    loop {
        let value = next_line(reader);
        if value["type"] == "ack" || value["type"] == "error" {
            return value;
        }
    }
}

#[test]
fn simulated_run_streams_events_and_accepts_commands() {
    let dir = tempfile::tempdir().unwrap();
    let plc = PlcProcess::start(dir.path(), 4);

    let mut stream = plc.connect();
    let mut reader = BufReader::new(stream.try_clone().unwrap());

    stream
        .write_all(b"{\"type\":\"hello\",\"protocol_version\":{\"major\":1,\"minor\":0},\"client_id\":\"it\"}\n")
        .unwrap();
    stream
        .write_all(b"{\"type\":\"command\",\"request_id\":7,\"action\":\"apply_setpoint\",\"value\":42.5}\n")
        .unwrap();
    let ack = reply(&mut reader);
    assert_eq!(ack["type"], "ack", "unexpected reply {ack}");
    assert_eq!(ack["request_id"], 7);
    assert_eq!(ack["tag"], "SET1");

    stream
        .write_all(b"{\"type\":\"command\",\"request_id\":8,\"action\":\"read_tag\",\"tag\":\"SET1\"}\n")
        .unwrap();
    let read_back = reply(&mut reader);
    assert_eq!(read_back["value"], 42.5);

    let mut saw_connection = false;
    let mut saw_setpoint_value = false;
    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(3) && !(saw_connection && saw_setpoint_value) {
        let line = next_line(&mut reader);
        if line["type"] != "event" {
            continue;
        }
        match line["kind"].as_str() {
            Some("connection") => saw_connection |= line["connected"] == true,
            Some("value") if line["tag"] == "SET1" => {
                saw_setpoint_value |= line["reading"] == 42.5;
            }
            _ => {}
        }
    }
    assert!(saw_connection, "no connected status event");
    assert!(saw_setpoint_value, "no setpoint value event");

    stream
        .write_all(b"{\"type\":\"command\",\"request_id\":9,\"action\":\"start\",\"chamber\":null}\n")
        .unwrap();
    assert_eq!(reply(&mut reader)["tag"], "START1");

    drop(reader);
    drop(stream);
    assert!(plc.wait().success());

    let audit = std::fs::read_to_string(dir.path().join("audit.jsonl")).unwrap();
    let kinds: Vec<String> = audit
        .lines()
        .map(|line| {
            let entry: Value = serde_json::from_str(line).unwrap();
            entry["event_type"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(kinds.first().map(String::as_str), Some("system_start"));
    assert_eq!(kinds.last().map(String::as_str), Some("system_shutdown"));
    assert!(kinds.iter().any(|k| k == "command_executed"));
}

#[test]
fn role_edits_are_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let plc = PlcProcess::start(dir.path(), 2);

    let mut stream = plc.connect();
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    stream
        .write_all(b"{\"type\":\"command\",\"action\":\"assign_role\",\"role\":\"ppm\",\"tag\":\"PPM1\"}\n")
        .unwrap();
    assert_eq!(reply(&mut reader)["type"], "ack");

    drop(reader);
    drop(stream);
    assert!(plc.wait().success());

    let saved: Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("roles.json")).unwrap())
            .unwrap();
    assert_eq!(saved["ppm_tag"], "PPM1");
    assert_eq!(saved["start_tag"], "START1");
    assert_eq!(saved["version"], "1.1");
    assert_eq!(saved["plc_connection"]["ip_address"], "192.168.0.10");
}

#[test]
fn help_and_bad_flags() {
    let help = Command::new(binary()).arg("--help").output().unwrap();
    assert!(help.status.success());
    assert!(String::from_utf8_lossy(&help.stdout).contains("--simulate"));

    let bad = Command::new(binary()).arg("--frobnicate").output().unwrap();
    assert!(!bad.status.success());
    assert!(String::from_utf8_lossy(&bad.stderr).contains("--frobnicate"));
}
