//! Audit trail of operator-visible events.
//!
//! One JSON object per line: connection transitions, alarm edges, commands
//! and configuration edits.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    SystemStart,
    SystemShutdown,
    PlcConnected,
    PlcDisconnected,
    ReconnectFailed,
    /// Alarm went active (including an alarm already active at startup)
    AlarmRaised,
    AlarmCleared,
    CommandExecuted,
    CommandRejected,
    ConfigChange,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub unix_us: i64,
    pub event_type: AuditEventType,
    pub details: serde_json::Value,
}

/// Thread-safe JSONL writer. Each entry is flushed as it is written.
pub struct AuditLogger {
    writer: Mutex<BufWriter<File>>,
}

impl AuditLogger {
    /// Opens `path` for appending, creating parent directories as needed.
    pub fn new(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::with_capacity(8192, file)),
        })
    }

    pub fn log(&self, entry: &AuditEntry) -> std::io::Result<()> {
        let mut writer = self.writer.lock();
        serde_json::to_writer(&mut *writer, entry)?;
        writer.write_all(b"\n")?;
        writer.flush()
    }

    /// Stamps the entry with the current time.
    pub fn log_event(
        &self,
        event_type: AuditEventType,
        details: serde_json::Value,
    ) -> std::io::Result<()> {
        let now = Utc::now();
        self.log(&AuditEntry {
            timestamp: now,
            unix_us: now.timestamp_micros(),
            event_type,
            details,
        })
    }

    /// Like [`log_event`](Self::log_event) but only warns on failure.
    pub fn record(&self, event_type: AuditEventType, details: serde_json::Value) {
        if let Err(e) = self.log_event(event_type, details) {
            tracing::warn!(error = %e, ?event_type, "failed to write audit entry");
        }
    }
}
