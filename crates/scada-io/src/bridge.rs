//! Single-client operator bridge: JSON lines over TCP.
//!
//! Poll events stream out as they arrive; commands come in, run through the
//! [`ControlPanel`] synchronously and get exactly one reply each.

use crate::auth::{AuthConfig, TokenValidator};
use crate::metrics::{AUTH_FAILURES, BRIDGE_CONNECTED, COMMANDS_FAILED, COMMANDS_OK};
use crate::protocol::{CommandAction, CommandMsg, EventMsg, HelloMsg, IncomingMessage, ReplyMsg};
use crossbeam_channel::Receiver;
use scada_core::{ControlPanel, PollEvent, Slot};
use serde::Serialize;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Pending output above this drops the client.
const MAX_BACKLOG: usize = 4 * 1024 * 1024;
/// An unterminated inbound line longer than this drops the client.
pub const MAX_LINE: usize = 64 * 1024;

pub struct BridgeConfig {
    pub bind_addr: String,
    pub auth: AuthConfig,
    pub require_handshake: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:7000".to_string(),
            auth: AuthConfig::default(),
            require_handshake: false,
        }
    }
}

/// What happened to one inbound command, for audit and persistence.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub request_id: Option<u64>,
    pub action: CommandAction,
    pub client_id: Option<String>,
    pub tag: Option<String>,
    pub error: Option<String>,
}

impl CommandOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Default)]
struct Session {
    handshake_seen: bool,
    capabilities: Vec<String>,
    client_id: Option<String>,
}

impl Session {
    fn note_handshake(&mut self, hello: &HelloMsg) {
        self.handshake_seen = true;
        self.capabilities = hello.capabilities.clone();
        self.client_id = hello.client_id.clone();
    }
}

pub struct Bridge {
    listener: TcpListener,
    config: BridgeConfig,
    validator: Option<TokenValidator>,
}

impl Bridge {
    pub fn bind(config: BridgeConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind(&config.bind_addr)?;
        listener.set_nonblocking(true)?;
        let validator = config
            .auth
            .enabled
            .then(|| TokenValidator::from_config(&config.auth));
        info!(
            addr = %config.bind_addr,
            auth = config.auth.enabled,
            handshake = config.require_handshake,
            "bridge listening"
        );
        Ok(Self {
            listener,
            config,
            validator,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves until `stop` is set. Events arriving with no client attached
    /// are discarded.
    pub fn run(
        self,
        panel: ControlPanel,
        events: Receiver<PollEvent>,
        stop: Arc<AtomicBool>,
        mut on_command: impl FnMut(&CommandOutcome),
    ) {
        let mut client: Option<TcpStream> = None;
        let mut recv_buf: Vec<u8> = Vec::with_capacity(4096);
        let mut send_buf: Vec<u8> = Vec::new();
        let mut send_offset: usize = 0;
        let mut sequence: u64 = 0;
        let mut session = Session::default();

        while !stop.load(Ordering::Relaxed) {
            if client.is_none() {
                match self.listener.accept() {
                    Ok((stream, addr)) => match stream.set_nonblocking(true) {
                        Ok(()) => {
                            info!(client_addr = %addr, "bridge client connected");
                            client = Some(stream);
                            BRIDGE_CONNECTED.set(1.0);
                        }
                        Err(err) => warn!(error = %err, "cannot make client socket nonblocking"),
                    },
                    Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(err) => warn!(error = %err, "bridge accept error"),
                }
            }

            let mut drop_client = false;
            match client.as_mut() {
                None => {
                    let discarded = events.try_iter().count();
                    if discarded > 0 {
                        debug!(discarded, "no bridge client, events dropped");
                    }
                }
                Some(stream) => {
                    let mut temp = [0u8; 1024];
                    match stream.read(&mut temp) {
                        Ok(0) => {
                            info!("bridge client disconnected");
                            drop_client = true;
                        }
                        Ok(n) => {
                            recv_buf.extend_from_slice(&temp[..n]);
                            while let Some(pos) = recv_buf.iter().position(|b| *b == b'\n') {
                                let line = recv_buf.drain(..=pos).collect::<Vec<u8>>();
                                let text = String::from_utf8_lossy(&line);
                                let trimmed = text.trim();
                                if trimmed.is_empty() {
                                    continue;
                                }
                                let reply = match IncomingMessage::parse(trimmed) {
                                    Some(msg) => self.handle_incoming(
                                        msg,
                                        &panel,
                                        &mut session,
                                        &mut on_command,
                                    ),
                                    None => {
                                        warn!("unparseable bridge message");
                                        Some(ReplyMsg::error(None, "unparseable message"))
                                    }
                                };
                                if let Some(reply) = reply {
                                    queue_line(&mut send_buf, &reply);
                                }
                            }
                            if recv_buf.len() > MAX_LINE {
                                warn!(buffered = recv_buf.len(), "bridge line too long, dropping client");
                                drop_client = true;
                            }
                        }
                        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
                        Err(err) => {
                            warn!(error = %err, "bridge read error");
                            drop_client = true;
                        }
                    }

                    for event in events.try_iter() {
                        sequence = sequence.wrapping_add(1);
                        queue_line(&mut send_buf, &EventMsg::new(sequence, unix_us(), &event));
                    }
                    if send_buf.len() - send_offset > MAX_BACKLOG {
                        warn!(backlog = send_buf.len() - send_offset, "bridge client too slow, dropping");
                        drop_client = true;
                    }

                    while !drop_client && send_offset < send_buf.len() {
                        match stream.write(&send_buf[send_offset..]) {
                            Ok(0) => {
                                info!("bridge client disconnected");
                                drop_client = true;
                            }
                            Ok(n) => send_offset += n,
                            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                            Err(err) => {
                                warn!(error = %err, "bridge write error");
                                drop_client = true;
                            }
                        }
                    }
                    if send_offset >= send_buf.len() {
                        send_buf.clear();
                        send_offset = 0;
                    }
                }
            }

            if drop_client {
                client = None;
                recv_buf.clear();
                send_buf.clear();
                send_offset = 0;
                session = Session::default();
                BRIDGE_CONNECTED.set(0.0);
            }

            std::thread::sleep(Duration::from_millis(5));
        }
        info!("bridge stopped");
    }

    fn handle_incoming(
        &self,
        msg: IncomingMessage,
        panel: &ControlPanel,
        session: &mut Session,
        on_command: &mut impl FnMut(&CommandOutcome),
    ) -> Option<ReplyMsg> {
        match msg {
            IncomingMessage::Hello(hello) => {
                if !hello.protocol_version.is_supported() {
                    warn!(
                        major = hello.protocol_version.major,
                        minor = hello.protocol_version.minor,
                        "unsupported protocol version"
                    );
                    return Some(ReplyMsg::error(None, "unsupported protocol version"));
                }
                session.note_handshake(&hello);
                info!(
                    client_id = ?hello.client_id,
                    capabilities = ?hello.capabilities,
                    "bridge handshake received"
                );
                None
            }
            IncomingMessage::Command(cmd) => {
                let request_id = cmd.request_id;
                let (reply, tag) = match self.admit(&cmd, session) {
                    Ok(()) => match execute(panel, &cmd.action) {
                        Ok(mut reply) => {
                            COMMANDS_OK.inc();
                            reply.request_id = request_id;
                            let tag = reply.tag.clone();
                            (reply, tag)
                        }
                        Err(err) => {
                            COMMANDS_FAILED.inc();
                            warn!(action = cmd.action.name(), error = %err, "command failed");
                            (ReplyMsg::error(request_id, err), None)
                        }
                    },
                    Err(err) => {
                        COMMANDS_FAILED.inc();
                        (ReplyMsg::error(request_id, err), None)
                    }
                };
                on_command(&CommandOutcome {
                    request_id,
                    action: cmd.action,
                    client_id: session.client_id.clone(),
                    tag,
                    error: reply.error.clone(),
                });
                Some(reply)
            }
        }
    }

    /// Version, handshake and token checks.
    fn admit(&self, cmd: &CommandMsg, session: &Session) -> Result<(), String> {
        if !cmd.protocol_version.is_supported() {
            return Err("unsupported protocol version".to_string());
        }
        if self.config.require_handshake && !session.handshake_seen {
            warn!("command received before handshake");
            return Err("handshake required".to_string());
        }
        if let Some(validator) = &self.validator {
            if let Err(err) = validator.authorize(cmd.auth_token.as_deref()) {
                warn!(error = %err, "command rejected by auth");
                AUTH_FAILURES.inc();
                return Err(err.to_string());
            }
        }
        Ok(())
    }
}

#[instrument(skip(panel), fields(action = action.name()))]
fn execute(panel: &ControlPanel, action: &CommandAction) -> Result<ReplyMsg, String> {
    let ack = |tag: &str| ReplyMsg::ack(None).with_tag(tag);
    let reply = match action {
        CommandAction::Start { chamber } => ack(panel.start(*chamber).map_err(err)?.name()),
        CommandAction::Stop { chamber } => ack(panel.stop(*chamber).map_err(err)?.name()),
        CommandAction::ApplySetpoint { chamber, value } => {
            ack(panel.apply_setpoint(*chamber, *value).map_err(err)?.name())
        }
        CommandAction::ConfirmAlarm { chamber } => {
            ack(panel.confirm_alarm(*chamber).map_err(err)?.name())
        }
        CommandAction::ReadTag { tag } => {
            ack(tag).with_value(panel.read_tag(tag).map_err(err)?)
        }
        CommandAction::WriteTag { tag, value } => {
            panel.write_tag(tag, *value).map_err(err)?;
            ack(tag)
        }
        CommandAction::PulseTag { tag } => {
            panel.pulse_tag(tag).map_err(err)?;
            ack(tag)
        }
        CommandAction::AssignRole { chamber, role, tag } => {
            let slot = Slot::new(*chamber, *role);
            panel.assign_role(slot, tag.clone()).map_err(err)?;
            match tag {
                Some(tag) => ack(tag),
                None => ReplyMsg::ack(None),
            }
        }
        CommandAction::UpsertTag { tag } => {
            let descriptor = tag.to_descriptor().map_err(err)?;
            panel.upsert_tag(descriptor);
            ack(&tag.name)
        }
        CommandAction::RemoveTag { tag } => {
            panel.remove_tag(tag).map_err(err)?;
            ack(tag)
        }
        CommandAction::Diagnose {} => {
            ReplyMsg::ack(None).with_diagnostics(panel.diagnose().map_err(err)?)
        }
    };
    debug!("command executed");
    Ok(reply)
}

fn err(e: impl std::fmt::Display) -> String {
    e.to_string()
}

fn queue_line(buf: &mut Vec<u8>, msg: &impl Serialize) {
    match serde_json::to_vec(msg) {
        Ok(line) => {
            buf.extend_from_slice(&line);
            buf.push(b'\n');
        }
        Err(e) => warn!(error = %e, "cannot encode bridge message"),
    }
}

fn unix_us() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_micros()).unwrap_or_default()
}
