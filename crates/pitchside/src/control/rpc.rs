// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Control RPC wire protocol.
//!
//! Length-prefixed JSON over TCP, one request in flight per connection.
//!
//! Wire format:
//! ```text
//! +----------------+-------------------+
//! | Length (4B BE) | JSON payload      |
//! +----------------+-------------------+
//! ```
//!
//! Request: `[key, team, number, [command, args...]]`
//! Response: `[success, message]`

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io::{self, Read, Write};
use thiserror::Error;

/// Largest accepted request or response body
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// RPC errors (transport and decoding; refusals are [`RpcResponse`]s)
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("message too large: {0} bytes")]
    TooLarge(usize),

    #[error("connection closed")]
    Closed,

    #[error("timed out waiting for a response")]
    Timeout,
}

/// Robot command requested over RPC, in SI units
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RpcCommand {
    /// Power in [0, 1]
    Kick { power: f64 },
    /// m/s, m/s, rad/s in the robot frame
    Control { dx: f64, dy: f64, dturn: f64 },
    /// Simulation only
    Teleport { x: f64, y: f64, theta: f64 },
    Leds { r: u8, g: u8, b: u8 },
    /// Hz, ms
    Beep { frequency: u16, duration: u16 },
}

fn arg_f64(args: &[Value], i: usize) -> Result<f64, RpcError> {
    args.get(i)
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite())
        .ok_or_else(|| RpcError::Malformed(format!("argument {} must be a number", i + 1)))
}

fn arg_int<T: TryFrom<u64>>(args: &[Value], i: usize) -> Result<T, RpcError> {
    args.get(i)
        .and_then(|v| v.as_u64().or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)))
        .and_then(|v| T::try_from(v).ok())
        .ok_or_else(|| RpcError::Malformed(format!("argument {} is out of range", i + 1)))
}

impl RpcCommand {
    /// Name used on the wire
    pub fn name(&self) -> &'static str {
        match self {
            RpcCommand::Kick { .. } => "kick",
            RpcCommand::Control { .. } => "control",
            RpcCommand::Teleport { .. } => "teleport",
            RpcCommand::Leds { .. } => "leds",
            RpcCommand::Beep { .. } => "beep",
        }
    }

    /// Decode `[name, args...]`
    pub fn from_json(value: &Value) -> Result<Self, RpcError> {
        let items = value
            .as_array()
            .ok_or_else(|| RpcError::Malformed("command must be an array".into()))?;
        let (name, args) = items
            .split_first()
            .ok_or_else(|| RpcError::Malformed("empty command".into()))?;
        let name = name
            .as_str()
            .ok_or_else(|| RpcError::Malformed("command name must be a string".into()))?;

        let expected = match name {
            "kick" => 1,
            "control" | "teleport" | "leds" => 3,
            "beep" => 2,
            other => return Err(RpcError::UnknownCommand(other.to_string())),
        };
        if args.len() != expected {
            return Err(RpcError::Malformed(format!(
                "{} takes {} argument(s), got {}",
                name,
                expected,
                args.len()
            )));
        }

        let command = match name {
            "kick" => RpcCommand::Kick {
                power: arg_f64(args, 0)?,
            },
            "control" => RpcCommand::Control {
                dx: arg_f64(args, 0)?,
                dy: arg_f64(args, 1)?,
                dturn: arg_f64(args, 2)?,
            },
            "teleport" => RpcCommand::Teleport {
                x: arg_f64(args, 0)?,
                y: arg_f64(args, 1)?,
                theta: arg_f64(args, 2)?,
            },
            "leds" => RpcCommand::Leds {
                r: arg_int(args, 0)?,
                g: arg_int(args, 1)?,
                b: arg_int(args, 2)?,
            },
            _ => RpcCommand::Beep {
                frequency: arg_int(args, 0)?,
                duration: arg_int(args, 1)?,
            },
        };
        Ok(command)
    }

    pub fn to_json(&self) -> Value {
        match *self {
            RpcCommand::Kick { power } => json!(["kick", power]),
            RpcCommand::Control { dx, dy, dturn } => json!(["control", dx, dy, dturn]),
            RpcCommand::Teleport { x, y, theta } => json!(["teleport", x, y, theta]),
            RpcCommand::Leds { r, g, b } => json!(["leds", r, g, b]),
            RpcCommand::Beep {
                frequency,
                duration,
            } => json!(["beep", frequency, duration]),
        }
    }
}

/// Full RPC request
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    pub key: String,
    pub team: String,
    pub number: u8,
    pub command: RpcCommand,
}

impl RpcRequest {
    pub fn from_json(value: &Value) -> Result<Self, RpcError> {
        let items = value
            .as_array()
            .filter(|a| a.len() == 4)
            .ok_or_else(|| RpcError::Malformed("request must be [key, team, number, command]".into()))?;

        let key = items[0]
            .as_str()
            .ok_or_else(|| RpcError::Malformed("key must be a string".into()))?;
        let team = items[1]
            .as_str()
            .ok_or_else(|| RpcError::Malformed("team must be a string".into()))?;
        let number = items[2]
            .as_u64()
            .and_then(|n| u8::try_from(n).ok())
            .ok_or_else(|| RpcError::Malformed("number must be a small integer".into()))?;

        Ok(Self {
            key: key.to_string(),
            team: team.to_string(),
            number,
            command: RpcCommand::from_json(&items[3])?,
        })
    }

    pub fn to_json(&self) -> Value {
        json!([self.key, self.team, self.number, self.command.to_json()])
    }
}

/// RPC response, `[success, message]` on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(bool, String)", into = "(bool, String)")]
pub struct RpcResponse {
    pub ok: bool,
    pub message: String,
}

impl RpcResponse {
    pub fn ok() -> Self {
        Self {
            ok: true,
            message: "ok".into(),
        }
    }

    pub fn refuse(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

impl From<(bool, String)> for RpcResponse {
    fn from((ok, message): (bool, String)) -> Self {
        Self { ok, message }
    }
}

impl From<RpcResponse> for (bool, String) {
    fn from(r: RpcResponse) -> Self {
        (r.ok, r.message)
    }
}

/// Write one length-prefixed body
pub fn write_frame(stream: &mut impl Write, body: &[u8]) -> Result<(), RpcError> {
    if body.len() > MAX_MESSAGE_SIZE {
        return Err(RpcError::TooLarge(body.len()));
    }
    let len = body.len() as u32;
    stream.write_all(&len.to_be_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Read one length-prefixed body.
///
/// Returns `Ok(None)` when the read timeout expires before the first byte,
/// so callers can poll a shutdown flag between requests. A timeout in the
/// middle of a frame is an error.
pub fn read_frame(stream: &mut impl Read) -> Result<Option<Vec<u8>>, RpcError> {
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        match stream.read(&mut len_buf[filled..]) {
            Ok(0) => return Err(RpcError::Closed),
            Ok(n) => filled += n,
            Err(e) if is_timeout(&e) && filled == 0 => return Ok(None),
            Err(e) if is_timeout(&e) => return Err(RpcError::Timeout),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(RpcError::TooLarge(len));
    }

    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).map_err(|e| {
        if is_timeout(&e) {
            RpcError::Timeout
        } else if e.kind() == io::ErrorKind::UnexpectedEof {
            RpcError::Closed
        } else {
            RpcError::Io(e)
        }
    })?;
    Ok(Some(body))
}
