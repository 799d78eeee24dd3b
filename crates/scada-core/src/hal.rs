use crate::error::TransportError;
use std::fmt;

/// Controller memory area addressed by block-level reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Area {
    Inputs,
    Outputs,
    Flags,
    DataBlock(u16),
}

impl fmt::Display for Area {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Area::Inputs => f.write_str("I"),
            Area::Outputs => f.write_str("Q"),
            Area::Flags => f.write_str("M"),
            Area::DataBlock(db) => write!(f, "DB{db}"),
        }
    }
}

/// Where to reach the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub address: String,
    pub rack: u16,
    pub slot: u16,
}

impl Endpoint {
    pub fn new(address: impl Into<String>, rack: u16, slot: u16) -> Self {
        Self {
            address: address.into(),
            rack,
            slot,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (rack {}, slot {})", self.address, self.rack, self.slot)
    }
}

/// Raw block access to a controller. Calls may block on network I/O.
pub trait ProtocolClient: Send {
    fn connect(&mut self, endpoint: &Endpoint) -> Result<(), TransportError>;
    fn disconnect(&mut self) -> Result<(), TransportError>;
    /// Live check of the underlying link, not just the last known state.
    fn is_alive(&mut self) -> bool;
    fn read_area(&mut self, area: Area, start: u32, len: usize) -> Result<Vec<u8>, TransportError>;
    fn write_area(&mut self, area: Area, start: u32, data: &[u8]) -> Result<(), TransportError>;

    /// Whether `write_bit` is atomic on the controller for `area`.
    fn supports_bit_writes(&self, _area: Area) -> bool {
        false
    }

    fn write_bit(
        &mut self,
        _area: Area,
        _byte: u32,
        _bit: u8,
        _value: bool,
    ) -> Result<(), TransportError> {
        Err(TransportError::Unsupported("single-bit write"))
    }
}
