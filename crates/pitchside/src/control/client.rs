// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Blocking control client, as used by team programs.

use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use super::rpc::{read_frame, write_frame, RpcCommand, RpcError, RpcRequest, RpcResponse};
use crate::field::Team;

/// Default time to wait for a response
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// One team's connection to the control server
#[derive(Debug)]
pub struct ControlClient {
    stream: TcpStream,
    key: String,
}

impl ControlClient {
    pub fn connect(addr: impl ToSocketAddrs, key: impl Into<String>) -> Result<Self, RpcError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(DEFAULT_TIMEOUT))?;
        Ok(Self {
            stream,
            key: key.into(),
        })
    }

    pub fn peer_addr(&self) -> Result<SocketAddr, RpcError> {
        Ok(self.stream.peer_addr()?)
    }

    pub fn set_key(&mut self, key: impl Into<String>) {
        self.key = key.into();
    }

    pub fn set_timeout(&mut self, timeout: Duration) -> Result<(), RpcError> {
        self.stream.set_read_timeout(Some(timeout))?;
        Ok(())
    }

    /// Send one command and wait for its response
    pub fn command(
        &mut self,
        team: &str,
        number: u8,
        command: RpcCommand,
    ) -> Result<RpcResponse, RpcError> {
        let request = RpcRequest {
            key: self.key.clone(),
            team: team.to_string(),
            number,
            command,
        };
        let body = serde_json::to_vec(&request.to_json())?;
        write_frame(&mut self.stream, &body)?;

        match read_frame(&mut self.stream)? {
            Some(body) => Ok(serde_json::from_slice(&body)?),
            None => Err(RpcError::Timeout),
        }
    }

    pub fn kick(&mut self, team: Team, number: u8, power: f64) -> Result<RpcResponse, RpcError> {
        self.command(team.as_str(), number, RpcCommand::Kick { power })
    }

    /// Robot-frame speeds: m/s, m/s, rad/s
    pub fn control(
        &mut self,
        team: Team,
        number: u8,
        dx: f64,
        dy: f64,
        dturn: f64,
    ) -> Result<RpcResponse, RpcError> {
        self.command(team.as_str(), number, RpcCommand::Control { dx, dy, dturn })
    }

    pub fn leds(
        &mut self,
        team: Team,
        number: u8,
        r: u8,
        g: u8,
        b: u8,
    ) -> Result<RpcResponse, RpcError> {
        self.command(team.as_str(), number, RpcCommand::Leds { r, g, b })
    }

    pub fn beep(
        &mut self,
        team: Team,
        number: u8,
        frequency: u16,
        duration: u16,
    ) -> Result<RpcResponse, RpcError> {
        self.command(
            team.as_str(),
            number,
            RpcCommand::Beep {
                frequency,
                duration,
            },
        )
    }

    /// Simulation only
    pub fn teleport(
        &mut self,
        team: Team,
        number: u8,
        x: f64,
        y: f64,
        theta: f64,
    ) -> Result<RpcResponse, RpcError> {
        self.command(team.as_str(), number, RpcCommand::Teleport { x, y, theta })
    }

    /// Move the simulated ball
    pub fn teleport_ball(&mut self, x: f64, y: f64) -> Result<RpcResponse, RpcError> {
        self.command(
            super::BALL_TEAM,
            0,
            RpcCommand::Teleport { x, y, theta: 0.0 },
        )
    }
}
