use scada_core::{PollEvent, Reading, Role, Slot, TagValue};
use scada_io::protocol::{CommandAction, EventMsg, IncomingMessage, ProtocolVersion, ReplyMsg};

#[test]
fn parses_hello_message() {
    let raw = r#"{
        "type":"hello",
        "protocol_version":{"major":1,"minor":0},
        "capabilities":["events.v1","auth.hmac-sha256"],
        "client_id":"hmi-panel"
    }"#;

    let msg = IncomingMessage::parse(raw).expect("hello should parse");
    match msg {
        IncomingMessage::Hello(hello) => {
            assert!(hello.protocol_version.is_supported());
            assert_eq!(hello.client_id.as_deref(), Some("hmi-panel"));
            assert_eq!(hello.capabilities.len(), 2);
        }
        _ => panic!("expected hello message"),
    }
}

#[test]
fn parses_chamber_start_command() {
    let raw = r#"{
        "type":"command",
        "protocol_version":{"major":1,"minor":0},
        "request_id":17,
        "action":"start",
        "chamber":3
    }"#;

    let msg = IncomingMessage::parse(raw).expect("command should parse");
    match msg {
        IncomingMessage::Command(cmd) => {
            assert_eq!(cmd.request_id, Some(17));
            assert_eq!(cmd.protocol_version, ProtocolVersion::v1());
            assert_eq!(cmd.action, CommandAction::Start { chamber: Some(3) });
            assert_eq!(cmd.action.slot(), Some(Slot::chamber(3, Role::Start)));
            assert!(!cmd.action.is_config_edit());
        }
        _ => panic!("expected command message"),
    }
}

#[test]
fn single_chamber_commands_omit_chamber() {
    let raw = r#"{"type":"command","action":"apply_setpoint","value":450.5}"#;
    let Some(IncomingMessage::Command(cmd)) = IncomingMessage::parse(raw) else {
        panic!("expected command message");
    };
    assert_eq!(
        cmd.action,
        CommandAction::ApplySetpoint {
            chamber: None,
            value: TagValue::Real(450.5)
        }
    );
    assert_eq!(cmd.request_id, None);
    assert_eq!(cmd.auth_token, None);
}

#[test]
fn parses_config_edits() {
    let upsert = r#"{
        "type":"command",
        "action":"upsert_tag",
        "tag":{"name":"PPM9","tag_type":"DB","address":36,"data_type":"int","db_number":1}
    }"#;
    let Some(IncomingMessage::Command(cmd)) = IncomingMessage::parse(upsert) else {
        panic!("expected command message");
    };
    assert!(cmd.action.is_config_edit());
    let CommandAction::UpsertTag { tag } = &cmd.action else {
        panic!("expected upsert");
    };
    let descriptor = tag.to_descriptor().expect("entry should be valid");
    assert_eq!(descriptor.name(), "PPM9");
    assert_eq!(descriptor.address().to_string(), "DB1.DBW36");

    let assign = r#"{"type":"command","action":"assign_role","chamber":2,"role":"alarm","tag":null}"#;
    let Some(IncomingMessage::Command(cmd)) = IncomingMessage::parse(assign) else {
        panic!("expected command message");
    };
    assert_eq!(
        cmd.action,
        CommandAction::AssignRole {
            chamber: Some(2),
            role: Role::Alarm,
            tag: None
        }
    );
}

#[test]
fn rejects_unknown_types_and_actions() {
    assert!(IncomingMessage::parse(r#"{"type":"recommendation"}"#).is_none());
    assert!(IncomingMessage::parse(r#"{"type":"command","action":"reboot"}"#).is_none());
    assert!(IncomingMessage::parse(r#"{"type":"command","action":"write_tag","tag":"X"}"#).is_none());
    assert!(IncomingMessage::parse("not json").is_none());
}

#[test]
fn event_lines_flatten_the_poll_event() {
    let event = PollEvent::Value {
        cycle: 4,
        slot: Some(Slot::chamber(1, Role::Ppm)),
        tag: "PPM1".to_string(),
        reading: Reading::Unknown,
    };
    let json = serde_json::to_value(EventMsg::new(9, 1_700_000_000_000_000, &event)).unwrap();
    assert_eq!(json["type"], "event");
    assert_eq!(json["sequence"], 9);
    assert_eq!(json["kind"], "value");
    assert_eq!(json["cycle"], 4);
    assert_eq!(json["tag"], "PPM1");
    assert!(json["reading"].is_null());
}

#[test]
fn replies_skip_empty_fields() {
    let ack = serde_json::to_value(ReplyMsg::ack(Some(3)).with_tag("START")).unwrap();
    assert_eq!(ack["type"], "ack");
    assert_eq!(ack["tag"], "START");
    assert!(ack.get("error").is_none());

    let err = serde_json::to_value(ReplyMsg::error(None, "tag not found")).unwrap();
    assert_eq!(err["type"], "error");
    assert!(err["request_id"].is_null());
    assert_eq!(err["error"], "tag not found");
}

#[test]
fn diagnose_command_and_report_reply() {
    let Some(IncomingMessage::Command(cmd)) =
        IncomingMessage::parse(r#"{"type":"command","request_id":2,"action":"diagnose"}"#)
    else {
        panic!("expected command message");
    };
    assert_eq!(cmd.action, CommandAction::Diagnose {});
    assert_eq!(cmd.action.name(), "diagnose");
    assert!(!cmd.action.is_config_edit());

    let report = scada_core::DiagnosticReport {
        endpoint: Some("192.168.0.1 (rack 0, slot 1)".to_string()),
        inputs: vec![0, 1],
        data_blocks: vec![1],
        ..Default::default()
    };
    let json = serde_json::to_value(ReplyMsg::ack(Some(2)).with_diagnostics(report)).unwrap();
    assert_eq!(json["diagnostics"]["inputs"], serde_json::json!([0, 1]));
    assert_eq!(json["diagnostics"]["data_blocks"], serde_json::json!([1]));
    assert!(json.get("tag").is_none());
}
