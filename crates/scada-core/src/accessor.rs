use crate::connection::ConnectionManager;
use crate::error::{TagError, TransportError};
use crate::hal::ProtocolClient;
use crate::tags::{CoerceError, TagAddress, TagDescriptor, TagValue};
use log::trace;
use std::sync::Arc;

/// Returns `byte` with only `bit` changed.
pub fn set_bit(byte: u8, bit: u8, value: bool) -> u8 {
    if value {
        byte | (1 << bit)
    } else {
        byte & !(1 << bit)
    }
}

/// Typed scalar reads and writes against the managed connection.
#[derive(Clone)]
pub struct TagAccessor {
    connection: Arc<ConnectionManager>,
}

impl TagAccessor {
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn read(&self, tag: &TagDescriptor) -> Result<TagValue, TagError> {
        let address = *tag.address();
        let value = self
            .connection
            .with_client(|client| read_scalar(client, &address))?;
        trace!("read {} @ {} = {}", tag.name(), address, value);
        Ok(value)
    }

    /// Writes `value` after coercing it to the tag's kind.
    ///
    /// Read-only regions are rejected before the transport is touched.
    pub fn write(&self, tag: &TagDescriptor, value: TagValue) -> Result<(), TagError> {
        if tag.is_read_only() {
            return Err(TagError::ReadOnlyViolation {
                tag: tag.name().to_string(),
                region: tag.region_kind(),
            });
        }
        let value = value.coerce(tag.value_kind()).map_err(|err| match err {
            CoerceError::Mismatch => TagError::TypeMismatch {
                tag: tag.name().to_string(),
                expected: tag.value_kind(),
                got: value.type_name(),
            },
            CoerceError::OutOfRange => TagError::ValueOutOfRange {
                tag: tag.name().to_string(),
                value: value.to_string(),
            },
        })?;
        let address = *tag.address();
        self.connection
            .with_client(|client| write_scalar(client, &address, value))?;
        trace!("wrote {} @ {} = {}", tag.name(), address, value);
        Ok(())
    }
}

fn read_exact(
    client: &mut dyn ProtocolClient,
    address: &TagAddress,
) -> Result<Vec<u8>, TransportError> {
    let expected = address.width();
    let bytes = client.read_area(address.area(), address.byte_offset(), expected)?;
    if bytes.len() < expected {
        return Err(TransportError::ShortRead {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(bytes)
}

fn read_scalar(client: &mut dyn ProtocolClient, address: &TagAddress) -> Result<TagValue, TagError> {
    let bytes = read_exact(client, address)?;
    let value = match *address {
        TagAddress::DbBit { bit, .. } | TagAddress::Bit { bit, .. } => {
            TagValue::Bool(bytes[0] & (1 << bit) != 0)
        }
        TagAddress::DbInt { .. } | TagAddress::Word { .. } => {
            TagValue::Int(i16::from_be_bytes([bytes[0], bytes[1]]))
        }
        TagAddress::DbReal { .. } => {
            TagValue::Real(f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        }
    };
    Ok(value)
}

fn write_scalar(
    client: &mut dyn ProtocolClient,
    address: &TagAddress,
    value: TagValue,
) -> Result<(), TagError> {
    let area = address.area();
    let start = address.byte_offset();
    match (*address, value) {
        (TagAddress::DbBit { bit, .. } | TagAddress::Bit { bit, .. }, TagValue::Bool(on)) => {
            if client.supports_bit_writes(area) {
                client.write_bit(area, start, bit, on)?;
            } else {
                // Caller holds the client lock, so nothing can land between
                // this read and the write back.
                let current = read_exact(client, address)?[0];
                client.write_area(area, start, &[set_bit(current, bit, on)])?;
            }
        }
        (TagAddress::DbInt { .. } | TagAddress::Word { .. }, TagValue::Int(i)) => {
            client.write_area(area, start, &i.to_be_bytes())?;
        }
        (TagAddress::DbReal { .. }, TagValue::Real(r)) => {
            client.write_area(area, start, &r.to_be_bytes())?;
        }
        (address, value) => {
            return Err(TagError::UnsupportedCombination {
                region: address.region_kind(),
                value: value.kind(),
            })
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{Area, Endpoint};
    use crate::hal_sim::{SimOp, SimulatedPlc};
    use crate::tags::{RegionKind, ValueKind};
    use proptest::prelude::*;

    fn connected(plc: &SimulatedPlc) -> TagAccessor {
        let manager = Arc::new(ConnectionManager::new(plc.clone()));
        manager.connect(Endpoint::new("192.168.0.1", 0, 1)).unwrap();
        TagAccessor::new(manager)
    }

    fn tag(region: RegionKind, value: ValueKind, byte: u32, bit: Option<u8>, db: Option<u16>) -> TagDescriptor {
        TagDescriptor::new("T", region, value, byte, bit, db).unwrap()
    }

    #[test]
    fn db_scalars_are_big_endian() {
        let plc = SimulatedPlc::new();
        let accessor = connected(&plc);

        let int = tag(RegionKind::DataBlock, ValueKind::Integer16, 2, None, Some(1));
        accessor.write(&int, TagValue::Int(-2)).unwrap();
        assert_eq!(plc.peek(Area::DataBlock(1), 2, 2), vec![0xFF, 0xFE]);
        assert_eq!(accessor.read(&int).unwrap(), TagValue::Int(-2));

        let real = tag(RegionKind::DataBlock, ValueKind::Float32, 4, None, Some(1));
        accessor.write(&real, TagValue::Real(1.5)).unwrap();
        assert_eq!(plc.peek(Area::DataBlock(1), 4, 4), 1.5f32.to_be_bytes().to_vec());
        assert_eq!(accessor.read(&real).unwrap(), TagValue::Real(1.5));
    }

    #[test]
    fn analog_words_share_the_byte_image() {
        let plc = SimulatedPlc::new();
        let accessor = connected(&plc);
        plc.poke(Area::Outputs, 64, &[0x01, 0x2C]);
        let qw = tag(RegionKind::AnalogOutput, ValueKind::Integer16, 64, None, None);
        assert_eq!(accessor.read(&qw).unwrap(), TagValue::Int(300));

        let q_bit = tag(RegionKind::Output, ValueKind::Boolean, 65, Some(2), None);
        assert_eq!(accessor.read(&q_bit).unwrap(), TagValue::Bool(true));
    }

    #[test]
    fn input_writes_never_reach_transport() {
        let plc = SimulatedPlc::new();
        let accessor = connected(&plc);
        plc.clear_operations();
        for t in [
            tag(RegionKind::Input, ValueKind::Boolean, 0, Some(1), None),
            tag(RegionKind::AnalogInput, ValueKind::Integer16, 64, None, None),
        ] {
            assert!(matches!(
                accessor.write(&t, TagValue::Int(1)),
                Err(TagError::ReadOnlyViolation { .. })
            ));
        }
        assert!(plc.operations().is_empty());
    }

    #[test]
    fn read_only_checked_before_connection() {
        let accessor = TagAccessor::new(Arc::new(ConnectionManager::new(SimulatedPlc::new())));
        let input = tag(RegionKind::Input, ValueKind::Boolean, 0, Some(0), None);
        let flag = tag(RegionKind::Flag, ValueKind::Boolean, 0, Some(0), None);
        assert!(matches!(
            accessor.write(&input, TagValue::Bool(true)),
            Err(TagError::ReadOnlyViolation { .. })
        ));
        assert_eq!(
            accessor.write(&flag, TagValue::Bool(true)),
            Err(TagError::NotConnected)
        );
        assert_eq!(accessor.read(&flag), Err(TagError::NotConnected));
    }

    #[test]
    fn coercion_errors_are_typed() {
        let plc = SimulatedPlc::new();
        let accessor = connected(&plc);
        let flag = tag(RegionKind::Flag, ValueKind::Boolean, 0, Some(0), None);
        assert!(matches!(
            accessor.write(&flag, TagValue::Real(1.0)),
            Err(TagError::TypeMismatch { .. })
        ));
        let int = tag(RegionKind::DataBlock, ValueKind::Integer16, 0, None, Some(1));
        assert!(matches!(
            accessor.write(&int, TagValue::Real(40000.0)),
            Err(TagError::ValueOutOfRange { .. })
        ));
        accessor.write(&int, TagValue::Real(12.0)).unwrap();
        assert_eq!(accessor.read(&int).unwrap(), TagValue::Int(12));
    }

    #[test]
    fn bit_write_prefers_native_support() {
        let plc = SimulatedPlc::new().with_bit_writes(true);
        let accessor = connected(&plc);
        plc.clear_operations();
        let q = tag(RegionKind::Output, ValueKind::Boolean, 3, Some(4), None);
        accessor.write(&q, TagValue::Bool(true)).unwrap();
        assert_eq!(
            plc.operations(),
            vec![SimOp::WriteBit {
                area: Area::Outputs,
                byte: 3,
                bit: 4,
                value: true
            }]
        );
    }

    #[test]
    fn transport_failure_is_returned() {
        let plc = SimulatedPlc::new();
        let accessor = connected(&plc);
        plc.fail_next(1);
        let m = tag(RegionKind::Flag, ValueKind::Boolean, 0, Some(0), None);
        assert!(matches!(accessor.read(&m), Err(TagError::Transport(TransportError::Io(_)))));
        assert!(accessor.read(&m).is_ok());
    }

    proptest! {
        #[test]
        fn rmw_leaves_other_bits_alone(initial in any::<u8>(), bit in 0u8..8, value in any::<bool>()) {
            let plc = SimulatedPlc::new();
            let accessor = connected(&plc);
            plc.poke(Area::Flags, 10, &[initial]);
            let m = tag(RegionKind::Flag, ValueKind::Boolean, 10, Some(bit), None);

            accessor.write(&m, TagValue::Bool(value)).unwrap();

            let after = plc.peek(Area::Flags, 10, 1)[0];
            let mask = !(1u8 << bit);
            prop_assert_eq!(after & mask, initial & mask);
            prop_assert_eq!(accessor.read(&m).unwrap(), TagValue::Bool(value));
        }

        #[test]
        fn set_bit_touches_one_bit(byte in any::<u8>(), bit in 0u8..8, value in any::<bool>()) {
            let out = set_bit(byte, bit, value);
            prop_assert_eq!(out & !(1 << bit), byte & !(1 << bit));
            prop_assert_eq!(out & (1 << bit) != 0, value);
        }
    }
}
