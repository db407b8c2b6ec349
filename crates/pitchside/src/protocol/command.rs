// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Host -> robot commands

use serde::{Deserialize, Serialize};

use super::frame::Frame;
use super::{
    PayloadReader, ProtocolError, PACKET_HEARTBEAT, PACKET_MONITOR, PACKET_ROBOT, ROBOT_BEEP,
    ROBOT_CONTROL, ROBOT_KICK, ROBOT_LEDS_BREATH, ROBOT_LEDS_CUSTOM,
};

/// Pending-command slot of a robot handle.
///
/// A newer command of the same category overwrites the unsent older one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandCategory {
    Control,
    Kick,
    Leds,
    Beep,
    Monitor,
}

impl CommandCategory {
    /// All categories, in send order
    pub const ALL: [CommandCategory; 5] = [
        CommandCategory::Monitor,
        CommandCategory::Control,
        CommandCategory::Kick,
        CommandCategory::Leds,
        CommandCategory::Beep,
    ];

    /// Slot index
    pub fn index(self) -> usize {
        match self {
            CommandCategory::Monitor => 0,
            CommandCategory::Control => 1,
            CommandCategory::Kick => 2,
            CommandCategory::Leds => 3,
            CommandCategory::Beep => 4,
        }
    }
}

/// A command in wire units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotCommand {
    /// Chassis speed in robot frame: mm/s, mm/s, deg/s
    Control { dx: i16, dy: i16, dturn: i16 },

    /// Kicker power, 0-100
    Kick { power: u8 },

    /// Buzzer: Hz and ms
    Beep { frequency: u16, duration: u16 },

    /// Custom LED color
    Leds { r: u8, g: u8, b: u8 },

    /// Firmware breathing animation
    LedsBreath,

    /// Request telemetry at `frequency` Hz
    Monitor { frequency: u32 },

    /// Watchdog keepalive
    Heartbeat,
}

impl RobotCommand {
    /// Chassis speed from SI units (m/s, m/s, rad/s)
    pub fn control(dx: f64, dy: f64, dturn: f64) -> Self {
        RobotCommand::Control {
            dx: (dx * 1000.0) as i16,
            dy: (dy * 1000.0) as i16,
            dturn: dturn.to_degrees() as i16,
        }
    }

    /// Zero chassis speed
    pub fn stop() -> Self {
        RobotCommand::Control {
            dx: 0,
            dy: 0,
            dturn: 0,
        }
    }

    /// Kick with a power in [0, 1]
    pub fn kick(power: f64) -> Self {
        RobotCommand::Kick {
            power: (power.clamp(0.0, 1.0) * 100.0) as u8,
        }
    }

    /// Pending slot this command lands in. Heartbeats are never queued.
    pub fn category(&self) -> Option<CommandCategory> {
        match self {
            RobotCommand::Control { .. } => Some(CommandCategory::Control),
            RobotCommand::Kick { .. } => Some(CommandCategory::Kick),
            RobotCommand::Beep { .. } => Some(CommandCategory::Beep),
            RobotCommand::Leds { .. } | RobotCommand::LedsBreath => Some(CommandCategory::Leds),
            RobotCommand::Monitor { .. } => Some(CommandCategory::Monitor),
            RobotCommand::Heartbeat => None,
        }
    }

    /// Build the frame for this command
    pub fn to_frame(&self) -> Frame {
        match *self {
            RobotCommand::Control { dx, dy, dturn } => {
                let mut payload = vec![ROBOT_CONTROL];
                payload.extend_from_slice(&dx.to_be_bytes());
                payload.extend_from_slice(&dy.to_be_bytes());
                payload.extend_from_slice(&dturn.to_be_bytes());
                Frame::new(PACKET_ROBOT, payload)
            }
            RobotCommand::Kick { power } => Frame::new(PACKET_ROBOT, vec![ROBOT_KICK, power]),
            RobotCommand::Beep {
                frequency,
                duration,
            } => {
                let mut payload = vec![ROBOT_BEEP];
                payload.extend_from_slice(&frequency.to_be_bytes());
                payload.extend_from_slice(&duration.to_be_bytes());
                Frame::new(PACKET_ROBOT, payload)
            }
            RobotCommand::Leds { r, g, b } => {
                Frame::new(PACKET_ROBOT, vec![ROBOT_LEDS_CUSTOM, r, g, b])
            }
            RobotCommand::LedsBreath => Frame::new(PACKET_ROBOT, vec![ROBOT_LEDS_BREATH]),
            RobotCommand::Monitor { frequency } => {
                Frame::new(PACKET_MONITOR, frequency.to_be_bytes().to_vec())
            }
            RobotCommand::Heartbeat => Frame::new(PACKET_HEARTBEAT, Vec::new()),
        }
    }

    /// Decode a command frame
    pub fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        let mut reader = PayloadReader::new(&frame.payload);

        match frame.packet_type {
            PACKET_HEARTBEAT => Ok(RobotCommand::Heartbeat),
            PACKET_MONITOR => Ok(RobotCommand::Monitor {
                frequency: reader.u32()?,
            }),
            PACKET_ROBOT => match reader.u8()? {
                ROBOT_CONTROL => Ok(RobotCommand::Control {
                    dx: reader.i16()?,
                    dy: reader.i16()?,
                    dturn: reader.i16()?,
                }),
                ROBOT_KICK => Ok(RobotCommand::Kick { power: reader.u8()? }),
                ROBOT_BEEP => Ok(RobotCommand::Beep {
                    frequency: reader.u16()?,
                    duration: reader.u16()?,
                }),
                ROBOT_LEDS_CUSTOM => Ok(RobotCommand::Leds {
                    r: reader.u8()?,
                    g: reader.u8()?,
                    b: reader.u8()?,
                }),
                ROBOT_LEDS_BREATH => Ok(RobotCommand::LedsBreath),
                other => Err(ProtocolError::UnknownCommand(other)),
            },
            other => Err(ProtocolError::UnknownType(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FrameReader;

    #[test]
    fn test_control_from_si_units() {
        let cmd = RobotCommand::control(0.25, -0.1, std::f64::consts::PI);
        assert_eq!(
            cmd,
            RobotCommand::Control {
                dx: 250,
                dy: -100,
                dturn: 180
            }
        );
    }

    #[test]
    fn test_kick_power_is_clamped() {
        assert_eq!(RobotCommand::kick(0.5), RobotCommand::Kick { power: 50 });
        assert_eq!(RobotCommand::kick(3.0), RobotCommand::Kick { power: 100 });
        assert_eq!(RobotCommand::kick(-1.0), RobotCommand::Kick { power: 0 });
    }

    #[test]
    fn test_control_payload_is_big_endian() {
        let frame = RobotCommand::Control {
            dx: 1000,
            dy: -1,
            dturn: 90,
        }
        .to_frame();
        assert_eq!(frame.packet_type, PACKET_ROBOT);
        assert_eq!(frame.payload, vec![2, 0x03, 0xE8, 0xFF, 0xFF, 0x00, 0x5A]);
    }

    #[test]
    fn test_commands_survive_the_wire() {
        let commands = [
            RobotCommand::Control {
                dx: -321,
                dy: 77,
                dturn: -45,
            },
            RobotCommand::Kick { power: 80 },
            RobotCommand::Beep {
                frequency: 880,
                duration: 250,
            },
            RobotCommand::Leds { r: 1, g: 2, b: 250 },
        ];

        let mut stream = Vec::new();
        for cmd in &commands {
            stream.extend(cmd.to_frame().encode().unwrap());
        }

        let mut reader = FrameReader::new();
        let decoded: Vec<_> = reader
            .feed(&stream)
            .iter()
            .map(|f| RobotCommand::from_frame(f).unwrap())
            .collect();
        assert_eq!(decoded, commands);
    }

    #[test]
    fn test_unknown_subcommand() {
        let frame = Frame::new(PACKET_ROBOT, vec![99]);
        assert_eq!(
            RobotCommand::from_frame(&frame),
            Err(ProtocolError::UnknownCommand(99))
        );
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            RobotCommand::LedsBreath.category(),
            Some(CommandCategory::Leds)
        );
        assert_eq!(RobotCommand::Heartbeat.category(), None);
        assert_eq!(CommandCategory::ALL.len(), 5);
        for (i, cat) in CommandCategory::ALL.iter().enumerate() {
            assert_eq!(cat.index(), i);
        }
    }
}
