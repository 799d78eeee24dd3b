pub mod auth;
pub mod bridge;
pub mod config;
pub mod metrics;
pub mod protocol;
pub mod transport_modbus;

pub use auth::{AuthConfig, AuthError, TokenClaims, TokenValidator};
pub use bridge::{Bridge, BridgeConfig, CommandOutcome};
pub use config::{
    ConfigError, PlcConnectionConfig, RoleAssignments, RoleMappingFile, TagConfigFile, TagEntry,
};
pub use metrics::{init_metrics, serve_metrics};
pub use protocol::{CommandAction, EventMsg, IncomingMessage, ProtocolVersion, ReplyMsg};
pub use transport_modbus::{ModbusConfig, ModbusTransport};
