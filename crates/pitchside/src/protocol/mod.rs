// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Robot wire protocol
//!
//! Byte framing shared by every physical transport, plus the fixed binary
//! layouts of the commands we send and the telemetry robots report.
//!
//! ## Frame Format
//!
//! ```text
//! +------+------+--------+------+-----+---------+----------+
//! | 0xFF | 0xAA | [DEST] | TYPE | LEN | PAYLOAD | CHECKSUM |
//! +------+------+--------+------+-----+---------+----------+
//!                  1B      1B     1B    LEN B      1B
//! ```
//!
//! - DEST is only present on shared-medium transports (WiFi broadcast)
//! - CHECKSUM is the sum of the payload bytes modulo 256

mod command;
mod frame;
mod telemetry;

pub use command::{CommandCategory, RobotCommand};
pub use frame::{Frame, FrameReader, HEADER};
pub use telemetry::{Odometry, Telemetry, TelemetryRecord};

use thiserror::Error;

/// Host -> robot: request periodic telemetry
pub const PACKET_MONITOR: u8 = 1;

/// Robot -> host: telemetry record
pub const PACKET_MONITOR_DATA: u8 = 5;

/// Host -> robot: keepalive with no payload
pub const PACKET_HEARTBEAT: u8 = 7;

/// Host -> robot: robot command (first payload byte selects the command)
pub const PACKET_ROBOT: u8 = 80;

/// Robot sub-command: chassis speed
pub const ROBOT_CONTROL: u8 = 2;

/// Robot sub-command: buzzer
pub const ROBOT_BEEP: u8 = 3;

/// Robot sub-command: custom LED color
pub const ROBOT_LEDS_CUSTOM: u8 = 7;

/// Robot sub-command: breathing LED animation
pub const ROBOT_LEDS_BREATH: u8 = 8;

/// Robot sub-command: kicker
pub const ROBOT_KICK: u8 = 12;

/// Maximum payload carried by one frame (length is a single byte)
pub const MAX_PAYLOAD: usize = u8::MAX as usize;

/// Protocol errors.
///
/// None of these is fatal: the framing layer drops the offending bytes and
/// resynchronizes on the next header.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("unknown packet type {0}")]
    UnknownType(u8),

    #[error("unknown robot command {0}")]
    UnknownCommand(u8),

    #[error("unknown firmware version {0}")]
    UnknownVersion(u8),

    #[error("truncated payload: need {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },
}

/// Sum of payload bytes modulo 256.
pub fn checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Big-endian cursor over a frame payload.
pub(crate) struct PayloadReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let end = self.pos + N;
        if end > self.data.len() {
            return Err(ProtocolError::Truncated {
                need: end,
                got: self.data.len(),
            });
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.pos..end]);
        self.pos = end;
        Ok(out)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take::<1>()?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16, ProtocolError> {
        Ok(u16::from_be_bytes(self.take()?))
    }

    pub(crate) fn i16(&mut self) -> Result<i16, ProtocolError> {
        Ok(i16::from_be_bytes(self.take()?))
    }

    pub(crate) fn i32(&mut self) -> Result<i32, ProtocolError> {
        Ok(i32::from_be_bytes(self.take()?))
    }

    pub(crate) fn u32(&mut self) -> Result<u32, ProtocolError> {
        Ok(u32::from_be_bytes(self.take()?))
    }

    /// Fixed-point value stored as i32 thousandths.
    pub(crate) fn milli(&mut self) -> Result<f64, ProtocolError> {
        Ok(f64::from(self.i32()?) / 1000.0)
    }

    /// Fixed-point value stored as i16 tenths.
    pub(crate) fn deci(&mut self) -> Result<f64, ProtocolError> {
        Ok(f64::from(self.i16()?) / 10.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_wraps() {
        assert_eq!(checksum(&[]), 0);
        assert_eq!(checksum(&[1, 2, 3]), 6);
        assert_eq!(checksum(&[0xFF, 0x02]), 0x01);
    }

    #[test]
    fn test_payload_reader_big_endian() {
        let data = [0x01, 0x02, 0xFF, 0xFE, 0x00, 0x00, 0x03, 0xE8];
        let mut reader = PayloadReader::new(&data);
        assert_eq!(reader.u16().unwrap(), 0x0102);
        assert_eq!(reader.i16().unwrap(), -2);
        assert_eq!(reader.milli().unwrap(), 1.0);
        assert!(matches!(
            reader.u8(),
            Err(ProtocolError::Truncated { need: 9, got: 8 })
        ));
    }
}
