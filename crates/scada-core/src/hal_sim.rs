use crate::error::TransportError;
use crate::hal::{Area, Endpoint, ProtocolClient};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

const AREA_SIZE: usize = 1024;

/// One request seen by the simulated controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimOp {
    Connect(String),
    Disconnect,
    Read { area: Area, start: u32, len: usize },
    Write { area: Area, start: u32, data: Vec<u8> },
    WriteBit { area: Area, byte: u32, bit: u8, value: bool },
}

#[derive(Debug)]
struct SimState {
    inputs: Vec<u8>,
    outputs: Vec<u8>,
    flags: Vec<u8>,
    blocks: HashMap<u16, Vec<u8>>,
    /// When set, only these data blocks exist.
    block_limit: Option<HashSet<u16>>,
    connected: bool,
    link_up: bool,
    reachable: bool,
    bit_writes: bool,
    fail_next: u32,
    ops: Vec<SimOp>,
}

impl SimState {
    fn area_mut(&mut self, area: Area) -> &mut Vec<u8> {
        match area {
            Area::Inputs => &mut self.inputs,
            Area::Outputs => &mut self.outputs,
            Area::Flags => &mut self.flags,
            Area::DataBlock(db) => self.blocks.entry(db).or_insert_with(|| vec![0; AREA_SIZE]),
        }
    }

    fn check_area(&self, area: Area) -> Result<(), TransportError> {
        match (area, &self.block_limit) {
            (Area::DataBlock(db), Some(limit)) if !limit.contains(&db) => {
                Err(TransportError::AreaUnavailable(area.to_string()))
            }
            _ => Ok(()),
        }
    }

    fn check_link(&mut self) -> Result<(), TransportError> {
        if !self.connected || !self.link_up {
            return Err(TransportError::Disconnected);
        }
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(TransportError::Io("injected fault".to_string()));
        }
        Ok(())
    }
}

fn span(area: Area, start: u32, len: usize) -> Result<std::ops::Range<usize>, TransportError> {
    let start = start as usize;
    let end = start + len;
    if end > AREA_SIZE {
        return Err(TransportError::OutOfRange(format!(
            "{area} bytes {start}..{end} exceed {AREA_SIZE}"
        )));
    }
    Ok(start..end)
}

/// In-memory controller with per-area byte images.
///
/// Clones share state, so a test can keep one handle for inspection while
/// the connection manager owns another.
#[derive(Debug, Clone)]
pub struct SimulatedPlc {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedPlc {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                inputs: vec![0; AREA_SIZE],
                outputs: vec![0; AREA_SIZE],
                flags: vec![0; AREA_SIZE],
                blocks: HashMap::new(),
                block_limit: None,
                connected: false,
                link_up: true,
                reachable: true,
                bit_writes: false,
                fail_next: 0,
                ops: Vec::new(),
            })),
        }
    }

    /// Advertise atomic single-bit writes for every area.
    pub fn with_bit_writes(self, enabled: bool) -> Self {
        self.state.lock().bit_writes = enabled;
        self
    }

    /// Writes directly into controller memory, bypassing the op log.
    pub fn poke(&self, area: Area, start: u32, data: &[u8]) {
        let mut state = self.state.lock();
        let image = state.area_mut(area);
        let start = start as usize;
        image[start..start + data.len()].copy_from_slice(data);
    }

    pub fn peek(&self, area: Area, start: u32, len: usize) -> Vec<u8> {
        let mut state = self.state.lock();
        let image = state.area_mut(area);
        let start = start as usize;
        image[start..start + len].to_vec()
    }

    pub fn set_bit(&self, area: Area, byte: u32, bit: u8, value: bool) {
        let mut state = self.state.lock();
        let image = state.area_mut(area);
        let cell = &mut image[byte as usize];
        if value {
            *cell |= 1 << bit;
        } else {
            *cell &= !(1 << bit);
        }
    }

    pub fn bit(&self, area: Area, byte: u32, bit: u8) -> bool {
        self.peek(area, byte, 1)[0] & (1 << bit) != 0
    }

    /// Restricts the controller to `blocks`; other data blocks are unavailable.
    pub fn limit_blocks(&self, blocks: &[u16]) {
        self.state.lock().block_limit = Some(blocks.iter().copied().collect());
    }

    /// Kills the link without telling the client side.
    pub fn drop_link(&self) {
        self.state.lock().link_up = false;
    }

    pub fn restore_link(&self) {
        self.state.lock().link_up = true;
    }

    /// When false, connect attempts fail.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().reachable = reachable;
    }

    /// Fail the next `count` reads/writes with an I/O error.
    pub fn fail_next(&self, count: u32) {
        self.state.lock().fail_next = count;
    }

    pub fn operations(&self) -> Vec<SimOp> {
        self.state.lock().ops.clone()
    }

    pub fn clear_operations(&self) {
        self.state.lock().ops.clear();
    }

    /// Writes logged so far, ignoring reads.
    pub fn writes(&self) -> Vec<SimOp> {
        self.operations()
            .into_iter()
            .filter(|op| matches!(op, SimOp::Write { .. } | SimOp::WriteBit { .. }))
            .collect()
    }
}

impl Default for SimulatedPlc {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolClient for SimulatedPlc {
    fn connect(&mut self, endpoint: &Endpoint) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.ops.push(SimOp::Connect(endpoint.address.clone()));
        if !state.reachable {
            return Err(TransportError::ConnectFailed {
                endpoint: endpoint.to_string(),
                reason: "host unreachable".to_string(),
            });
        }
        state.connected = true;
        state.link_up = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.ops.push(SimOp::Disconnect);
        state.connected = false;
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        let state = self.state.lock();
        state.connected && state.link_up
    }

    fn read_area(&mut self, area: Area, start: u32, len: usize) -> Result<Vec<u8>, TransportError> {
        let mut state = self.state.lock();
        state.ops.push(SimOp::Read { area, start, len });
        state.check_link()?;
        state.check_area(area)?;
        let range = span(area, start, len)?;
        Ok(state.area_mut(area)[range].to_vec())
    }

    fn write_area(&mut self, area: Area, start: u32, data: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.ops.push(SimOp::Write {
            area,
            start,
            data: data.to_vec(),
        });
        state.check_link()?;
        state.check_area(area)?;
        let range = span(area, start, data.len())?;
        state.area_mut(area)[range].copy_from_slice(data);
        Ok(())
    }

    fn supports_bit_writes(&self, _area: Area) -> bool {
        self.state.lock().bit_writes
    }

    fn write_bit(&mut self, area: Area, byte: u32, bit: u8, value: bool) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.ops.push(SimOp::WriteBit {
            area,
            byte,
            bit,
            value,
        });
        if !state.bit_writes {
            return Err(TransportError::Unsupported("single-bit write"));
        }
        state.check_link()?;
        let range = span(area, byte, 1)?;
        let cell = &mut state.area_mut(area)[range.start];
        if value {
            *cell |= 1 << bit;
        } else {
            *cell &= !(1 << bit);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_requires_connection() {
        let mut plc = SimulatedPlc::new();
        assert_eq!(
            plc.read_area(Area::Flags, 0, 1),
            Err(TransportError::Disconnected)
        );
        plc.connect(&Endpoint::new("10.0.0.1", 0, 1)).unwrap();
        assert_eq!(plc.read_area(Area::Flags, 0, 2), Ok(vec![0, 0]));
    }

    #[test]
    fn dropped_link_is_not_alive() {
        let mut plc = SimulatedPlc::new();
        plc.connect(&Endpoint::new("10.0.0.1", 0, 1)).unwrap();
        assert!(plc.is_alive());
        plc.drop_link();
        assert!(!plc.is_alive());
        assert!(plc.write_area(Area::Outputs, 0, &[1]).is_err());
    }

    #[test]
    fn data_blocks_created_on_demand() {
        let mut plc = SimulatedPlc::new();
        plc.connect(&Endpoint::new("10.0.0.1", 0, 1)).unwrap();
        plc.write_area(Area::DataBlock(7), 10, &[0x12, 0x34]).unwrap();
        assert_eq!(plc.peek(Area::DataBlock(7), 10, 2), vec![0x12, 0x34]);
        assert!(matches!(
            plc.read_area(Area::DataBlock(7), 1023, 2),
            Err(TransportError::OutOfRange(_))
        ));
    }

    #[test]
    fn limited_blocks_are_unavailable() {
        let mut plc = SimulatedPlc::new();
        plc.connect(&Endpoint::new("10.0.0.1", 0, 1)).unwrap();
        plc.limit_blocks(&[1]);
        assert!(plc.read_area(Area::DataBlock(1), 0, 1).is_ok());
        assert!(matches!(
            plc.read_area(Area::DataBlock(2), 0, 1),
            Err(TransportError::AreaUnavailable(_))
        ));
    }

    #[test]
    fn injected_faults_are_consumed() {
        let mut plc = SimulatedPlc::new();
        plc.connect(&Endpoint::new("10.0.0.1", 0, 1)).unwrap();
        plc.fail_next(1);
        assert!(plc.read_area(Area::Inputs, 0, 1).is_err());
        assert!(plc.read_area(Area::Inputs, 0, 1).is_ok());
    }
}
