//! Tag addressing model.
//!
//! A tag is a named, typed location in controller memory. The loose
//! `(region, value, byte, bit, block)` tuple found in configuration files is
//! validated once, at construction, into a closed [`TagAddress`] so the
//! accessor never has to re-check combinations per access.

use crate::error::DescriptorError;
use crate::hal::Area;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Controller memory region a tag lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionKind {
    DataBlock,
    Input,
    Output,
    Flag,
    AnalogInput,
    AnalogOutput,
    AnalogFlag,
}

impl RegionKind {
    pub const ALL: [RegionKind; 7] = [
        RegionKind::DataBlock,
        RegionKind::Input,
        RegionKind::Output,
        RegionKind::Flag,
        RegionKind::AnalogInput,
        RegionKind::AnalogOutput,
        RegionKind::AnalogFlag,
    ];

    /// Configuration-file code (`DB`, `I`, `Q`, `M`, `IW`, `QW`, `MW`).
    pub fn code(self) -> &'static str {
        match self {
            RegionKind::DataBlock => "DB",
            RegionKind::Input => "I",
            RegionKind::Output => "Q",
            RegionKind::Flag => "M",
            RegionKind::AnalogInput => "IW",
            RegionKind::AnalogOutput => "QW",
            RegionKind::AnalogFlag => "MW",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        let code = code.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.code().eq_ignore_ascii_case(code))
    }

    /// Process-image inputs cannot be written from the supervisory side.
    pub fn is_read_only(self) -> bool {
        matches!(self, RegionKind::Input | RegionKind::AnalogInput)
    }

    pub fn is_word(self) -> bool {
        matches!(
            self,
            RegionKind::AnalogInput | RegionKind::AnalogOutput | RegionKind::AnalogFlag
        )
    }
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Scalar type stored at a tag address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Boolean,
    Integer16,
    Float32,
}

impl ValueKind {
    pub const ALL: [ValueKind; 3] = [ValueKind::Boolean, ValueKind::Integer16, ValueKind::Float32];

    /// Configuration-file code (`bool`, `int`, `real`).
    pub fn code(self) -> &'static str {
        match self {
            ValueKind::Boolean => "bool",
            ValueKind::Integer16 => "int",
            ValueKind::Float32 => "real",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        let code = code.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.code().eq_ignore_ascii_case(code))
    }

    /// `(active, inactive)` levels written by a pulse.
    pub fn pulse_levels(self) -> (TagValue, TagValue) {
        match self {
            ValueKind::Boolean => (TagValue::Bool(true), TagValue::Bool(false)),
            ValueKind::Integer16 => (TagValue::Int(1), TagValue::Int(0)),
            ValueKind::Float32 => (TagValue::Real(1.0), TagValue::Real(0.0)),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BitRegion {
    Input,
    Output,
    Flag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum WordRegion {
    AnalogInput,
    AnalogOutput,
    AnalogFlag,
}

/// Validated address. Every variant is a legal region/value pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TagAddress {
    DbBit { db: u16, byte: u32, bit: u8 },
    DbInt { db: u16, byte: u32 },
    DbReal { db: u16, byte: u32 },
    Bit { region: BitRegion, byte: u32, bit: u8 },
    Word { region: WordRegion, byte: u32 },
}

impl TagAddress {
    pub fn region_kind(&self) -> RegionKind {
        match self {
            TagAddress::DbBit { .. } | TagAddress::DbInt { .. } | TagAddress::DbReal { .. } => {
                RegionKind::DataBlock
            }
            TagAddress::Bit { region, .. } => match region {
                BitRegion::Input => RegionKind::Input,
                BitRegion::Output => RegionKind::Output,
                BitRegion::Flag => RegionKind::Flag,
            },
            TagAddress::Word { region, .. } => match region {
                WordRegion::AnalogInput => RegionKind::AnalogInput,
                WordRegion::AnalogOutput => RegionKind::AnalogOutput,
                WordRegion::AnalogFlag => RegionKind::AnalogFlag,
            },
        }
    }

    pub fn value_kind(&self) -> ValueKind {
        match self {
            TagAddress::DbBit { .. } | TagAddress::Bit { .. } => ValueKind::Boolean,
            TagAddress::DbInt { .. } | TagAddress::Word { .. } => ValueKind::Integer16,
            TagAddress::DbReal { .. } => ValueKind::Float32,
        }
    }

    pub fn byte_offset(&self) -> u32 {
        match *self {
            TagAddress::DbBit { byte, .. }
            | TagAddress::DbInt { byte, .. }
            | TagAddress::DbReal { byte, .. }
            | TagAddress::Bit { byte, .. }
            | TagAddress::Word { byte, .. } => byte,
        }
    }

    pub fn bit_offset(&self) -> Option<u8> {
        match *self {
            TagAddress::DbBit { bit, .. } | TagAddress::Bit { bit, .. } => Some(bit),
            _ => None,
        }
    }

    pub fn block_number(&self) -> Option<u16> {
        match *self {
            TagAddress::DbBit { db, .. }
            | TagAddress::DbInt { db, .. }
            | TagAddress::DbReal { db, .. } => Some(db),
            _ => None,
        }
    }

    /// Transport area holding this address. Word regions share the byte
    /// image of their bit counterparts.
    pub fn area(&self) -> Area {
        if let Some(db) = self.block_number() {
            return Area::DataBlock(db);
        }
        match self.region_kind() {
            RegionKind::Input | RegionKind::AnalogInput => Area::Inputs,
            RegionKind::Output | RegionKind::AnalogOutput => Area::Outputs,
            _ => Area::Flags,
        }
    }

    /// Number of bytes a scalar read/write touches.
    pub fn width(&self) -> usize {
        match self.value_kind() {
            ValueKind::Boolean => 1,
            ValueKind::Integer16 => 2,
            ValueKind::Float32 => 4,
        }
    }
}

impl fmt::Display for TagAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            TagAddress::DbBit { db, byte, bit } => write!(f, "DB{db}.DBX{byte}.{bit}"),
            TagAddress::DbInt { db, byte } => write!(f, "DB{db}.DBW{byte}"),
            TagAddress::DbReal { db, byte } => write!(f, "DB{db}.DBD{byte}"),
            TagAddress::Bit { byte, bit, .. } => {
                write!(f, "{}{byte}.{bit}", self.region_kind().code())
            }
            TagAddress::Word { byte, .. } => write!(f, "{}{byte}", self.region_kind().code()),
        }
    }
}

/// A named tag with a validated address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TagDescriptor {
    name: String,
    address: TagAddress,
}

impl TagDescriptor {
    /// Builds a descriptor from configuration-style parts.
    ///
    /// A bit offset given for a non-boolean data-block tag is ignored; a bit
    /// offset on a word region is rejected.
    pub fn new(
        name: impl Into<String>,
        region: RegionKind,
        value: ValueKind,
        byte_offset: u32,
        bit_offset: Option<u8>,
        block_number: Option<u16>,
    ) -> Result<Self, DescriptorError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DescriptorError::EmptyName);
        }

        if region != RegionKind::DataBlock && block_number.is_some() {
            return Err(DescriptorError::BlockNumberNotAllowed(region));
        }

        let address = match region {
            RegionKind::DataBlock => {
                let db = match block_number {
                    None => return Err(DescriptorError::MissingBlockNumber),
                    Some(0) => return Err(DescriptorError::ZeroBlockNumber),
                    Some(db) => db,
                };
                match value {
                    ValueKind::Boolean => TagAddress::DbBit {
                        db,
                        byte: byte_offset,
                        bit: checked_bit(bit_offset)?,
                    },
                    ValueKind::Integer16 => TagAddress::DbInt {
                        db,
                        byte: byte_offset,
                    },
                    ValueKind::Float32 => TagAddress::DbReal {
                        db,
                        byte: byte_offset,
                    },
                }
            }
            RegionKind::Input | RegionKind::Output | RegionKind::Flag => {
                if value != ValueKind::Boolean {
                    return Err(DescriptorError::Unsupported { region, value });
                }
                let bit_region = match region {
                    RegionKind::Input => BitRegion::Input,
                    RegionKind::Output => BitRegion::Output,
                    _ => BitRegion::Flag,
                };
                TagAddress::Bit {
                    region: bit_region,
                    byte: byte_offset,
                    bit: checked_bit(bit_offset)?,
                }
            }
            RegionKind::AnalogInput | RegionKind::AnalogOutput | RegionKind::AnalogFlag => {
                if value != ValueKind::Integer16 {
                    return Err(DescriptorError::Unsupported { region, value });
                }
                if bit_offset.is_some() {
                    return Err(DescriptorError::BitNotAllowed(region));
                }
                let word_region = match region {
                    RegionKind::AnalogInput => WordRegion::AnalogInput,
                    RegionKind::AnalogOutput => WordRegion::AnalogOutput,
                    _ => WordRegion::AnalogFlag,
                };
                TagAddress::Word {
                    region: word_region,
                    byte: byte_offset,
                }
            }
        };

        Ok(Self { name, address })
    }

    /// Builds a descriptor from an already-typed address.
    pub fn with_address(name: impl Into<String>, address: TagAddress) -> Result<Self, DescriptorError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DescriptorError::EmptyName);
        }
        if let Some(bit) = address.bit_offset() {
            checked_bit(Some(bit))?;
        }
        if address.block_number() == Some(0) {
            return Err(DescriptorError::ZeroBlockNumber);
        }
        Ok(Self { name, address })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &TagAddress {
        &self.address
    }

    pub fn region_kind(&self) -> RegionKind {
        self.address.region_kind()
    }

    pub fn value_kind(&self) -> ValueKind {
        self.address.value_kind()
    }

    pub fn byte_offset(&self) -> u32 {
        self.address.byte_offset()
    }

    pub fn bit_offset(&self) -> Option<u8> {
        self.address.bit_offset()
    }

    pub fn block_number(&self) -> Option<u16> {
        self.address.block_number()
    }

    pub fn is_read_only(&self) -> bool {
        self.region_kind().is_read_only()
    }
}

impl fmt::Display for TagDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.address)
    }
}

fn checked_bit(bit: Option<u8>) -> Result<u8, DescriptorError> {
    match bit {
        None => Err(DescriptorError::MissingBit),
        Some(bit) if bit > 7 => Err(DescriptorError::BitOutOfRange(bit)),
        Some(bit) => Ok(bit),
    }
}

/// A scalar read from or written to a tag.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Bool(bool),
    Int(i16),
    Real(f32),
}

/// Why a value could not be converted to a tag's kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CoerceError {
    Mismatch,
    OutOfRange,
}

impl TagValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            TagValue::Bool(_) => ValueKind::Boolean,
            TagValue::Int(_) => ValueKind::Integer16,
            TagValue::Real(_) => ValueKind::Float32,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.kind().code()
    }

    /// Alarm semantics: any non-zero value counts as active.
    pub fn is_truthy(&self) -> bool {
        match *self {
            TagValue::Bool(b) => b,
            TagValue::Int(i) => i != 0,
            TagValue::Real(r) => r != 0.0,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            TagValue::Bool(b) => f64::from(u8::from(b)),
            TagValue::Int(i) => f64::from(i),
            TagValue::Real(r) => f64::from(r),
        }
    }

    /// Converts `self` into a value of `kind`.
    pub fn coerce(self, kind: ValueKind) -> Result<TagValue, CoerceError> {
        match (kind, self) {
            (ValueKind::Boolean, TagValue::Bool(b)) => Ok(TagValue::Bool(b)),
            (ValueKind::Boolean, TagValue::Int(i)) => Ok(TagValue::Bool(i != 0)),
            (ValueKind::Boolean, TagValue::Real(_)) => Err(CoerceError::Mismatch),
            (ValueKind::Integer16, TagValue::Int(i)) => Ok(TagValue::Int(i)),
            (ValueKind::Integer16, TagValue::Bool(b)) => Ok(TagValue::Int(i16::from(b))),
            (ValueKind::Integer16, TagValue::Real(r)) => {
                if r.is_finite()
                    && r.fract() == 0.0
                    && r >= f32::from(i16::MIN)
                    && r <= f32::from(i16::MAX)
                {
                    Ok(TagValue::Int(r as i16))
                } else {
                    Err(CoerceError::OutOfRange)
                }
            }
            (ValueKind::Float32, TagValue::Real(r)) if r.is_finite() => Ok(TagValue::Real(r)),
            (ValueKind::Float32, TagValue::Real(_)) => Err(CoerceError::OutOfRange),
            (ValueKind::Float32, TagValue::Int(i)) => Ok(TagValue::Real(f32::from(i))),
            (ValueKind::Float32, TagValue::Bool(_)) => Err(CoerceError::Mismatch),
        }
    }

    /// Parses operator text for a tag of `kind`.
    pub fn parse(text: &str, kind: ValueKind) -> Option<TagValue> {
        let text = text.trim();
        match kind {
            ValueKind::Boolean => match text.to_ascii_lowercase().as_str() {
                "1" | "true" | "on" => Some(TagValue::Bool(true)),
                "0" | "false" | "off" => Some(TagValue::Bool(false)),
                _ => None,
            },
            ValueKind::Integer16 => text.parse::<i16>().ok().map(TagValue::Int),
            ValueKind::Float32 => text
                .parse::<f32>()
                .ok()
                .filter(|r| r.is_finite())
                .map(TagValue::Real),
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Bool(b) => write!(f, "{b}"),
            TagValue::Int(i) => write!(f, "{i}"),
            TagValue::Real(r) => write!(f, "{r:.2}"),
        }
    }
}
