//! Commissioning survey: which byte addresses and data blocks answer reads.
//!
//! Every read goes through [`ConnectionManager::with_client`], so a survey
//! never overlaps poll-cycle I/O.

use crate::connection::ConnectionManager;
use crate::error::TagError;
use crate::hal::Area;
use log::{debug, info};
use serde::Serialize;
use std::ops::RangeInclusive;

/// Byte addresses tried in the I, Q and M areas.
pub const SCAN_BYTES: RangeInclusive<u32> = 0..=5;
/// Commonly used data block numbers.
pub const SCAN_DATA_BLOCKS: [u16; 4] = [1, 2, 10, 100];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiagnosticReport {
    pub endpoint: Option<String>,
    pub inputs: Vec<u32>,
    pub outputs: Vec<u32>,
    pub flags: Vec<u32>,
    pub data_blocks: Vec<u16>,
}

impl DiagnosticReport {
    pub fn answered(&self) -> usize {
        self.inputs.len() + self.outputs.len() + self.flags.len() + self.data_blocks.len()
    }
}

/// Reads one byte at each address of `range` and returns those that answered.
///
/// A failed read only excludes that address. Losing the link aborts with
/// [`TagError::NotConnected`].
pub fn scan_range(
    connection: &ConnectionManager,
    area: Area,
    range: RangeInclusive<u32>,
) -> Result<Vec<u32>, TagError> {
    let mut answered = Vec::new();
    for start in range {
        match connection.with_client(|client| Ok(client.read_area(area, start, 1)?)) {
            Ok(_) => answered.push(start),
            Err(TagError::NotConnected) => return Err(TagError::NotConnected),
            Err(err) => debug!("{area}{start} did not answer: {err}"),
        }
    }
    Ok(answered)
}

/// Tries the first byte of each block in `blocks`.
pub fn scan_data_blocks(
    connection: &ConnectionManager,
    blocks: &[u16],
) -> Result<Vec<u16>, TagError> {
    let mut answered = Vec::new();
    for &db in blocks {
        if !scan_range(connection, Area::DataBlock(db), 0..=0)?.is_empty() {
            answered.push(db);
        }
    }
    Ok(answered)
}

/// Scans [`SCAN_BYTES`] of I, Q and M plus [`SCAN_DATA_BLOCKS`].
pub fn survey(connection: &ConnectionManager) -> Result<DiagnosticReport, TagError> {
    if !connection.is_connected() {
        return Err(TagError::NotConnected);
    }
    let report = DiagnosticReport {
        endpoint: connection.endpoint().map(|endpoint| endpoint.to_string()),
        inputs: scan_range(connection, Area::Inputs, SCAN_BYTES)?,
        outputs: scan_range(connection, Area::Outputs, SCAN_BYTES)?,
        flags: scan_range(connection, Area::Flags, SCAN_BYTES)?,
        data_blocks: scan_data_blocks(connection, &SCAN_DATA_BLOCKS)?,
    };
    info!(
        "diagnostics: I {:?} Q {:?} M {:?} DB {:?}",
        report.inputs, report.outputs, report.flags, report.data_blocks
    );
    Ok(report)
}
