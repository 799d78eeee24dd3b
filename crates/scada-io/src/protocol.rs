use crate::config::TagEntry;
use scada_core::{DiagnosticReport, PollEvent, Role, Slot, TagValue};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

impl ProtocolVersion {
    pub const fn v1() -> Self {
        Self { major: 1, minor: 0 }
    }

    pub fn is_supported(&self) -> bool {
        self.major == 1
    }
}

/// Outbound wrapper around a poll event.
#[derive(Debug, Serialize)]
pub struct EventMsg<'a> {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub protocol_version: ProtocolVersion,
    pub sequence: u64,
    pub unix_us: u64,
    #[serde(flatten)]
    pub event: &'a PollEvent,
}

impl<'a> EventMsg<'a> {
    pub fn new(sequence: u64, unix_us: u64, event: &'a PollEvent) -> Self {
        Self {
            msg_type: "event",
            protocol_version: ProtocolVersion::v1(),
            sequence,
            unix_us,
            event,
        }
    }
}

/// Reply to one command: `ack` or `error`.
#[derive(Debug, Serialize)]
pub struct ReplyMsg {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub request_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<TagValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<DiagnosticReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReplyMsg {
    pub fn ack(request_id: Option<u64>) -> Self {
        Self {
            msg_type: "ack",
            request_id,
            tag: None,
            value: None,
            diagnostics: None,
            error: None,
        }
    }

    pub fn error(request_id: Option<u64>, error: impl Into<String>) -> Self {
        Self {
            msg_type: "error",
            request_id,
            tag: None,
            value: None,
            diagnostics: None,
            error: Some(error.into()),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_value(mut self, value: TagValue) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_diagnostics(mut self, report: DiagnosticReport) -> Self {
        self.diagnostics = Some(report);
        self
    }

    pub fn is_ack(&self) -> bool {
        self.msg_type == "ack"
    }
}

#[derive(Debug, Deserialize)]
pub struct HelloMsg {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub protocol_version: ProtocolVersion,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CommandAction {
    Start {
        #[serde(default)]
        chamber: Option<u8>,
    },
    Stop {
        #[serde(default)]
        chamber: Option<u8>,
    },
    ApplySetpoint {
        #[serde(default)]
        chamber: Option<u8>,
        value: TagValue,
    },
    ConfirmAlarm {
        #[serde(default)]
        chamber: Option<u8>,
    },
    ReadTag {
        tag: String,
    },
    WriteTag {
        tag: String,
        value: TagValue,
    },
    PulseTag {
        tag: String,
    },
    AssignRole {
        #[serde(default)]
        chamber: Option<u8>,
        role: Role,
        #[serde(default)]
        tag: Option<String>,
    },
    UpsertTag {
        tag: TagEntry,
    },
    RemoveTag {
        tag: String,
    },
    /// Survey which controller addresses answer reads.
    Diagnose {},
}

impl CommandAction {
    pub fn name(&self) -> &'static str {
        match self {
            CommandAction::Start { .. } => "start",
            CommandAction::Stop { .. } => "stop",
            CommandAction::ApplySetpoint { .. } => "apply_setpoint",
            CommandAction::ConfirmAlarm { .. } => "confirm_alarm",
            CommandAction::ReadTag { .. } => "read_tag",
            CommandAction::WriteTag { .. } => "write_tag",
            CommandAction::PulseTag { .. } => "pulse_tag",
            CommandAction::AssignRole { .. } => "assign_role",
            CommandAction::UpsertTag { .. } => "upsert_tag",
            CommandAction::RemoveTag { .. } => "remove_tag",
            CommandAction::Diagnose {} => "diagnose",
        }
    }

    /// Edits of the tag list or role mapping, which need persisting.
    pub fn is_config_edit(&self) -> bool {
        matches!(
            self,
            CommandAction::AssignRole { .. }
                | CommandAction::UpsertTag { .. }
                | CommandAction::RemoveTag { .. }
        )
    }

    pub fn slot(&self) -> Option<Slot> {
        match *self {
            CommandAction::Start { chamber } => Some(Slot::new(chamber, Role::Start)),
            CommandAction::Stop { chamber } => Some(Slot::new(chamber, Role::Stop)),
            CommandAction::ApplySetpoint { chamber, .. } => Some(Slot::new(chamber, Role::Setpoint)),
            CommandAction::ConfirmAlarm { chamber } => Some(Slot::new(chamber, Role::Confirm)),
            CommandAction::AssignRole { chamber, role, .. } => Some(Slot::new(chamber, role)),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CommandMsg {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub protocol_version: ProtocolVersion,
    #[serde(default)]
    pub request_id: Option<u64>,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(flatten)]
    pub action: CommandAction,
}

#[derive(Debug)]
pub enum IncomingMessage {
    Hello(HelloMsg),
    Command(CommandMsg),
}

impl IncomingMessage {
    pub fn parse(line: &str) -> Option<Self> {
        let value: serde_json::Value = serde_json::from_str(line).ok()?;
        let msg_type = value.get("type")?.as_str()?;
        match msg_type {
            "command" => serde_json::from_value(value)
                .ok()
                .map(IncomingMessage::Command),
            "hello" => serde_json::from_value(value)
                .ok()
                .map(IncomingMessage::Hello),
            _ => None,
        }
    }
}
