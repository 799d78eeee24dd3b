use crate::roles::Slot;
use crate::tags::{RegionKind, ValueKind};
use thiserror::Error;

/// Failures reported by a [`ProtocolClient`](crate::hal::ProtocolClient).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    Disconnected,
    #[error("connect to {endpoint} failed: {reason}")]
    ConnectFailed { endpoint: String, reason: String },
    #[error("request timed out")]
    Timeout,
    #[error("area {0} is not reachable through this transport")]
    AreaUnavailable(String),
    #[error("address out of range: {0}")]
    OutOfRange(String),
    #[error("{0} is not supported by this transport")]
    Unsupported(&'static str),
    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },
    #[error("transport I/O failed: {0}")]
    Io(String),
}

/// Rejections raised while building a [`TagDescriptor`](crate::tags::TagDescriptor).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("tag name is empty")]
    EmptyName,
    #[error("data block tags need a block number")]
    MissingBlockNumber,
    #[error("block number must be positive")]
    ZeroBlockNumber,
    #[error("region {0} does not take a block number")]
    BlockNumberNotAllowed(RegionKind),
    #[error("boolean tags need a bit offset")]
    MissingBit,
    #[error("bit offset {0} is outside 0..=7")]
    BitOutOfRange(u8),
    #[error("word region {0} does not take a bit offset")]
    BitNotAllowed(RegionKind),
    #[error("region {region} cannot hold {value} values")]
    Unsupported { region: RegionKind, value: ValueKind },
}

/// Errors returned by the accessor, pulse controller and command panel.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TagError {
    #[error("controller is not connected")]
    NotConnected,
    #[error("tag {tag} lives in read-only region {region}")]
    ReadOnlyViolation { tag: String, region: RegionKind },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("region {region} cannot hold {value} values")]
    UnsupportedCombination { region: RegionKind, value: ValueKind },
    #[error("invalid tag descriptor: {0}")]
    InvalidDescriptor(DescriptorError),
    #[error("unknown tag {0}")]
    UnknownTag(String),
    #[error("duplicate tag {0}")]
    DuplicateTag(String),
    #[error("role {0} has no tag assigned")]
    RoleUnassigned(Slot),
    #[error("role {slot} points to missing tag {tag}")]
    RoleUnresolved { slot: Slot, tag: String },
    #[error("tag {tag} expects {expected}, got {got}")]
    TypeMismatch {
        tag: String,
        expected: ValueKind,
        got: &'static str,
    },
    #[error("value {value} does not fit tag {tag}")]
    ValueOutOfRange { tag: String, value: String },
}

impl From<DescriptorError> for TagError {
    fn from(err: DescriptorError) -> Self {
        match err {
            DescriptorError::Unsupported { region, value } => {
                TagError::UnsupportedCombination { region, value }
            }
            other => TagError::InvalidDescriptor(other),
        }
    }
}

impl TagError {
    /// True when the failure came from the link rather than the request.
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            TagError::NotConnected
                | TagError::Transport(TransportError::Disconnected)
                | TagError::Transport(TransportError::Timeout)
        )
    }
}
