//! Modbus-TCP gateway transport.
//!
//! Talks to a controller exposing its memory through an `MB_SERVER` style
//! mapping: discrete inputs are the `I` bits, coils the `Q` bits, and the
//! holding registers one data block. Flags are not reachable.

use scada_core::{Area, Endpoint, ProtocolClient, TransportError};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct ModbusConfig {
    pub port: u16,
    pub unit_id: u8,
    /// Data block mirrored by the holding registers.
    pub holding_db: u16,
    pub timeout: Duration,
}

impl Default for ModbusConfig {
    fn default() -> Self {
        Self {
            port: 502,
            unit_id: 1,
            holding_db: 1,
            timeout: Duration::from_secs(2),
        }
    }
}

pub struct ModbusTransport {
    config: ModbusConfig,
    runtime: Runtime,
    ctx: Option<Context>,
    broken: bool,
}

fn exec<T>(
    runtime: &Runtime,
    limit: Duration,
    fut: impl Future<Output = std::io::Result<T>>,
) -> Result<T, TransportError> {
    match runtime.block_on(tokio::time::timeout(limit, fut)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(TransportError::Io(err.to_string())),
        Err(_) => Err(TransportError::Timeout),
    }
}

fn modbus_address(value: u32) -> Result<u16, TransportError> {
    u16::try_from(value).map_err(|_| TransportError::OutOfRange(format!("modbus address {value}")))
}

fn modbus_count(value: usize) -> Result<u16, TransportError> {
    u16::try_from(value).map_err(|_| TransportError::OutOfRange(format!("modbus quantity {value}")))
}

/// Coil or discrete-input number of `bit` within byte `byte`.
fn bit_address(byte: u32, bit: u8) -> Result<u16, TransportError> {
    byte.checked_mul(8)
        .and_then(|base| base.checked_add(u32::from(bit)))
        .ok_or_else(|| TransportError::OutOfRange(format!("modbus bit address {byte}.{bit}")))
        .and_then(modbus_address)
}

fn bit_count(len: usize) -> Result<u16, TransportError> {
    len.checked_mul(8)
        .ok_or_else(|| TransportError::OutOfRange(format!("modbus quantity {len} bytes")))
        .and_then(modbus_count)
}

/// Packs bits LSB-first into `len` bytes.
fn pack_bits(bits: &[bool], len: usize) -> Result<Vec<u8>, TransportError> {
    if bits.len() < len * 8 {
        return Err(TransportError::ShortRead {
            expected: len,
            actual: bits.len() / 8,
        });
    }
    let mut bytes = vec![0u8; len];
    for (i, on) in bits.iter().take(len * 8).enumerate() {
        if *on {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    Ok(bytes)
}

fn unpack_bits(bytes: &[u8]) -> Vec<bool> {
    bytes
        .iter()
        .flat_map(|byte| (0..8).map(move |bit| byte & (1 << bit) != 0))
        .collect()
}

/// Register window `(first, count)` covering bytes `start..start + len`.
fn register_window(start: u32, len: usize) -> (u32, usize) {
    let first = start / 2;
    let end = (start as usize + len).div_ceil(2);
    (first, end - first as usize)
}

fn registers_to_bytes(registers: &[u16]) -> Vec<u8> {
    registers.iter().flat_map(|r| r.to_be_bytes()).collect()
}

fn bytes_to_registers(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks(2)
        .map(|pair| u16::from_be_bytes([pair[0], *pair.get(1).unwrap_or(&0)]))
        .collect()
}

impl ModbusTransport {
    pub fn new(config: ModbusConfig) -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            config,
            runtime,
            ctx: None,
            broken: false,
        })
    }

    fn check<T>(&mut self, result: Result<T, TransportError>) -> Result<T, TransportError> {
        if let Err(err @ (TransportError::Io(_) | TransportError::Timeout)) = &result {
            warn!(error = %err, "modbus request failed, marking link dead");
            self.broken = true;
        }
        result
    }

    fn holding_db(&self, area: Area) -> Result<(), TransportError> {
        match area {
            Area::DataBlock(db) if db == self.config.holding_db => Ok(()),
            other => Err(TransportError::AreaUnavailable(other.to_string())),
        }
    }

    fn read_registers(&mut self, first: u32, count: usize) -> Result<Vec<u16>, TransportError> {
        let address = modbus_address(first)?;
        let quantity = modbus_count(count)?;
        let ctx = self.ctx.as_mut().ok_or(TransportError::Disconnected)?;
        let result = exec(
            &self.runtime,
            self.config.timeout,
            ctx.read_holding_registers(address, quantity),
        );
        let registers = self.check(result)?;
        if registers.len() < count {
            return Err(TransportError::ShortRead {
                expected: count * 2,
                actual: registers.len() * 2,
            });
        }
        Ok(registers)
    }

    fn write_registers(&mut self, first: u32, registers: &[u16]) -> Result<(), TransportError> {
        let address = modbus_address(first)?;
        let ctx = self.ctx.as_mut().ok_or(TransportError::Disconnected)?;
        let result = exec(
            &self.runtime,
            self.config.timeout,
            ctx.write_multiple_registers(address, registers),
        );
        self.check(result)
    }
}

impl ProtocolClient for ModbusTransport {
    fn connect(&mut self, endpoint: &Endpoint) -> Result<(), TransportError> {
        let target = format!("{}:{}", endpoint.address, self.config.port);
        let addr: SocketAddr = target.parse().map_err(|_| TransportError::ConnectFailed {
            endpoint: endpoint.to_string(),
            reason: format!("invalid socket address {target}"),
        })?;
        debug!(rack = endpoint.rack, slot = endpoint.slot, "rack/slot unused by modbus gateway");
        let connect = tcp::connect_slave(addr, Slave(self.config.unit_id));
        let ctx = exec(&self.runtime, self.config.timeout, connect).map_err(|err| {
            TransportError::ConnectFailed {
                endpoint: endpoint.to_string(),
                reason: err.to_string(),
            }
        })?;
        info!(%addr, unit = self.config.unit_id, "modbus gateway connected");
        self.ctx = Some(ctx);
        self.broken = false;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        // Dropping the context closes the socket.
        if self.ctx.take().is_some() {
            info!("modbus gateway disconnected");
        }
        self.broken = false;
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        self.ctx.is_some() && !self.broken
    }

    fn read_area(&mut self, area: Area, start: u32, len: usize) -> Result<Vec<u8>, TransportError> {
        match area {
            Area::Inputs | Area::Outputs => {
                let address = bit_address(start, 0)?;
                let quantity = bit_count(len)?;
                let ctx = self.ctx.as_mut().ok_or(TransportError::Disconnected)?;
                let fut_result = if area == Area::Inputs {
                    exec(&self.runtime, self.config.timeout, ctx.read_discrete_inputs(address, quantity))
                } else {
                    exec(&self.runtime, self.config.timeout, ctx.read_coils(address, quantity))
                };
                let bits = self.check(fut_result)?;
                pack_bits(&bits, len)
            }
            Area::Flags => Err(TransportError::AreaUnavailable(area.to_string())),
            Area::DataBlock(_) => {
                self.holding_db(area)?;
                let (first, count) = register_window(start, len);
                let bytes = registers_to_bytes(&self.read_registers(first, count)?);
                let skip = (start % 2) as usize;
                Ok(bytes[skip..skip + len].to_vec())
            }
        }
    }

    fn write_area(&mut self, area: Area, start: u32, data: &[u8]) -> Result<(), TransportError> {
        match area {
            Area::Outputs => {
                let address = bit_address(start, 0)?;
                let bits = unpack_bits(data);
                let ctx = self.ctx.as_mut().ok_or(TransportError::Disconnected)?;
                let result = exec(
                    &self.runtime,
                    self.config.timeout,
                    ctx.write_multiple_coils(address, &bits),
                );
                self.check(result)
            }
            Area::Inputs | Area::Flags => Err(TransportError::AreaUnavailable(area.to_string())),
            Area::DataBlock(_) => {
                self.holding_db(area)?;
                let (first, count) = register_window(start, data.len());
                let aligned = start % 2 == 0 && data.len() % 2 == 0;
                let bytes = if aligned {
                    data.to_vec()
                } else {
                    // Odd edges: merge into the registers already there.
                    let mut current = registers_to_bytes(&self.read_registers(first, count)?);
                    let skip = (start % 2) as usize;
                    current[skip..skip + data.len()].copy_from_slice(data);
                    current
                };
                self.write_registers(first, &bytes_to_registers(&bytes))
            }
        }
    }

    fn supports_bit_writes(&self, area: Area) -> bool {
        area == Area::Outputs
    }

    fn write_bit(&mut self, area: Area, byte: u32, bit: u8, value: bool) -> Result<(), TransportError> {
        if area != Area::Outputs {
            return Err(TransportError::Unsupported("single-bit write outside coils"));
        }
        let address = bit_address(byte, bit)?;
        let ctx = self.ctx.as_mut().ok_or(TransportError::Disconnected)?;
        let result = exec(
            &self.runtime,
            self.config.timeout,
            ctx.write_single_coil(address, value),
        );
        self.check(result)
    }
}
