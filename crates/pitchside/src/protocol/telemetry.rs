// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Robot -> host telemetry records

use serde::{Deserialize, Serialize};

use super::frame::Frame;
use super::{PayloadReader, ProtocolError, PACKET_MONITOR_DATA};

/// Firmware layout with the full sensor record
const VERSION_FULL: u8 = 11;

/// Firmware layout with time and battery only
const VERSION_BASIC: u8 = 2;

/// Wheel odometry estimate
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Odometry {
    /// meters
    pub x: f64,
    /// meters
    pub y: f64,
    /// degrees
    pub yaw: f64,
}

/// Full sensor record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Robot uptime in seconds
    pub time: f64,
    pub distance: f64,
    pub optics: [u8; 7],
    pub wheels: [f64; 3],
    pub yaw: f64,
    pub gyro_yaw: f64,
    pub pitch: f64,
    pub roll: f64,
    pub odometry: Odometry,
    /// Cell voltages
    pub battery: [f64; 2],
}

/// Decoded `MonitorData` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "version")]
pub enum Telemetry {
    #[serde(rename = "11")]
    Full(TelemetryRecord),

    #[serde(rename = "2")]
    Basic { time: f64, battery: f64 },
}

impl Telemetry {
    /// Decode a telemetry frame.
    ///
    /// Unknown versions and short records are errors; callers log and drop them.
    pub fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        if frame.packet_type != PACKET_MONITOR_DATA {
            return Err(ProtocolError::UnknownType(frame.packet_type));
        }
        Self::decode(&frame.payload)
    }

    /// Decode a version-tagged record
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = PayloadReader::new(payload);

        match r.u8()? {
            VERSION_FULL => {
                let time = r.milli()?;
                let distance = r.deci()?;
                let mut optics = [0u8; 7];
                for optic in optics.iter_mut() {
                    *optic = r.u8()?;
                }
                let wheels = [r.deci()?, r.deci()?, r.deci()?];
                let yaw = r.deci()?;
                let gyro_yaw = r.deci()?;
                let pitch = r.deci()?;
                let roll = r.deci()?;
                let odometry = Odometry {
                    x: f64::from(r.i16()?) / 1000.0,
                    y: f64::from(r.i16()?) / 1000.0,
                    yaw: r.deci()?,
                };
                let battery = [f64::from(r.u8()?) / 40.0, f64::from(r.u8()?) / 40.0];

                Ok(Telemetry::Full(TelemetryRecord {
                    time,
                    distance,
                    optics,
                    wheels,
                    yaw,
                    gyro_yaw,
                    pitch,
                    roll,
                    odometry,
                    battery,
                }))
            }
            VERSION_BASIC => Ok(Telemetry::Basic {
                time: r.milli()?,
                battery: f64::from(r.u8()?) / 10.0,
            }),
            other => Err(ProtocolError::UnknownVersion(other)),
        }
    }

    /// Robot uptime in seconds
    pub fn time(&self) -> f64 {
        match self {
            Telemetry::Full(record) => record.time,
            Telemetry::Basic { time, .. } => *time,
        }
    }

    /// Battery voltages
    pub fn battery(&self) -> Vec<f64> {
        match self {
            Telemetry::Full(record) => record.battery.to_vec(),
            Telemetry::Basic { battery, .. } => vec![*battery],
        }
    }
}
