// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Robot handles and transports
//!
//! A [`RobotHandle`] owns exactly one connection to a robot. Commands are
//! stored per [`CommandCategory`] ("latest wins") and drained by the
//! transport loop:
//!
//! - **serial**: one thread per port, point-to-point frames
//! - **wifi**: one shared UDP socket for every robot, addressed frames
//! - **sim**: no I/O, commands apply to the [`Simulator`] directly
//!
//! Control and Referee only see the handle, never the transport.

pub mod serial;
pub mod wifi;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::field::{Pose, RobotId};
use crate::protocol::{CommandCategory, RobotCommand, Telemetry};
use crate::sim::Simulator;

pub use serial::{SerialLink, SerialOpener, SerialTransport, TtyLink};
pub use wifi::{WifiService, WifiTransport};

/// Number of LED blink cycles used to spot a robot
const BLINK_CYCLES: usize = 5;

/// Duration of each blink half-cycle
const BLINK_PERIOD: Duration = Duration::from_millis(250);

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid transport address: {0}")]
    InvalidAddress(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} is not supported by this robot")]
    Unsupported(&'static str),

    #[error("no simulator attached")]
    NoSimulator,

    #[error("wifi service not running")]
    NoWifiService,
}

/// Where a robot is reached.
///
/// Text form: `serial:<path>`, `wifi:<ip>[:port]` or `sim:<robot>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TransportAddress {
    Serial(PathBuf),
    Wifi(SocketAddr),
    Sim(RobotId),
}

impl TransportAddress {
    /// Kind prefix of the address
    pub fn kind(&self) -> &'static str {
        match self {
            TransportAddress::Serial(_) => "serial",
            TransportAddress::Wifi(_) => "wifi",
            TransportAddress::Sim(_) => "sim",
        }
    }
}

impl fmt::Display for TransportAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportAddress::Serial(path) => write!(f, "serial:{}", path.display()),
            TransportAddress::Wifi(addr) => write!(f, "wifi:{}", addr),
            TransportAddress::Sim(id) => write!(f, "sim:{}", id),
        }
    }
}

impl FromStr for TransportAddress {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TransportError::InvalidAddress(s.to_string());
        let (kind, rest) = s.split_once(':').ok_or_else(invalid)?;
        if rest.is_empty() {
            return Err(invalid());
        }

        match kind {
            "serial" => Ok(TransportAddress::Serial(PathBuf::from(rest))),
            "wifi" => {
                if let Ok(addr) = rest.parse::<SocketAddr>() {
                    return Ok(TransportAddress::Wifi(addr));
                }
                let ip: IpAddr = rest.parse().map_err(|_| invalid())?;
                Ok(TransportAddress::Wifi(SocketAddr::new(
                    ip,
                    wifi::DEFAULT_ROBOT_PORT,
                )))
            }
            "sim" => Ok(TransportAddress::Sim(rest.parse().map_err(|_| invalid())?)),
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for TransportAddress {
    type Error = TransportError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TransportAddress> for String {
    fn from(addr: TransportAddress) -> Self {
        addr.to_string()
    }
}

/// State shared between a handle and its transport loop
#[derive(Debug, Default)]
pub struct LinkState {
    /// Latest command per category
    slots: Mutex<[Option<RobotCommand>; 5]>,

    last_inbound: Mutex<Option<Instant>>,
    last_outbound: Mutex<Option<Instant>>,
    telemetry: Mutex<Option<Telemetry>>,
    closed: AtomicBool,
}

impl LinkState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a command, replacing the pending one of the same category
    pub fn store(&self, command: RobotCommand) {
        if let Some(category) = command.category() {
            self.slots.lock()[category.index()] = Some(command);
        }
    }

    /// Pending command of one category
    pub fn pending(&self, category: CommandCategory) -> Option<RobotCommand> {
        self.slots.lock()[category.index()]
    }

    /// Take every pending command, in category order
    pub fn drain(&self) -> Vec<RobotCommand> {
        let mut slots = self.slots.lock();
        slots.iter_mut().filter_map(Option::take).collect()
    }

    /// Forget every pending command
    pub fn clear(&self) {
        *self.slots.lock() = [None; 5];
    }

    pub fn mark_inbound(&self) {
        *self.last_inbound.lock() = Some(Instant::now());
    }

    pub fn mark_outbound(&self) {
        *self.last_outbound.lock() = Some(Instant::now());
    }

    pub fn last_inbound(&self) -> Option<Instant> {
        *self.last_inbound.lock()
    }

    pub fn last_outbound(&self) -> Option<Instant> {
        *self.last_outbound.lock()
    }

    pub fn set_telemetry(&self, telemetry: Telemetry) {
        *self.telemetry.lock() = Some(telemetry);
    }

    pub fn telemetry(&self) -> Option<Telemetry> {
        self.telemetry.lock().clone()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Delivery strategy behind a robot handle
pub trait Transport: Send + Sync {
    /// Accept a command. Queued transports store it in the link slots.
    fn enqueue(&self, command: RobotCommand);

    /// Whether the robot can currently be reached
    fn is_available(&self) -> bool;

    /// Stop the transport. Must be idempotent.
    fn close(&self);

    /// Move the robot instantly (simulation only)
    fn teleport(&self, _pose: Pose) -> Result<(), TransportError> {
        Err(TransportError::Unsupported("teleport"))
    }
}

/// Commands applied straight to the simulator
pub struct SimTransport {
    link: Arc<LinkState>,
    body: RobotId,
    simulator: Arc<Simulator>,
}

impl SimTransport {
    pub fn new(link: Arc<LinkState>, body: RobotId, simulator: Arc<Simulator>) -> Self {
        simulator.add_robot(body);
        Self {
            link,
            body,
            simulator,
        }
    }
}

impl Transport for SimTransport {
    fn enqueue(&self, command: RobotCommand) {
        // The slot keeps the last applied command for inspection
        self.link.store(command);
        self.link.mark_outbound();
        self.link.mark_inbound();
        self.simulator.apply(self.body, command);
    }

    fn is_available(&self) -> bool {
        !self.link.is_closed()
    }

    fn close(&self) {
        self.link.close();
    }

    fn teleport(&self, pose: Pose) -> Result<(), TransportError> {
        self.simulator.teleport_robot(self.body, pose);
        Ok(())
    }
}

/// Point-in-time view of a robot handle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotInfo {
    pub address: TransportAddress,
    pub identity: Option<RobotId>,
    pub available: bool,
    pub telemetry: Option<Telemetry>,
    /// Seconds since the last inbound frame
    pub last_inbound_age: Option<f64>,
    /// Seconds since the last outbound frame
    pub last_outbound_age: Option<f64>,
}

/// One connection to one robot
pub struct RobotHandle {
    address: TransportAddress,
    identity: RwLock<Option<RobotId>>,
    link: Arc<LinkState>,
    transport: Box<dyn Transport>,
    leds_dirty: AtomicBool,
}

impl RobotHandle {
    /// Wrap an already started transport
    pub fn new(
        address: TransportAddress,
        link: Arc<LinkState>,
        transport: Box<dyn Transport>,
    ) -> Self {
        Self {
            address,
            identity: RwLock::new(None),
            link,
            transport,
            leds_dirty: AtomicBool::new(false),
        }
    }

    pub fn address(&self) -> &TransportAddress {
        &self.address
    }

    pub fn identity(&self) -> Option<RobotId> {
        *self.identity.read()
    }

    pub fn set_identity(&self, identity: Option<RobotId>) {
        *self.identity.write() = identity;
    }

    /// Queue a command; replaces the pending one of the same category
    pub fn enqueue(&self, command: RobotCommand) {
        if self.link.is_closed() {
            return;
        }
        self.transport.enqueue(command);
    }

    /// Pending (or, for simulated robots, last applied) command
    pub fn pending(&self, category: CommandCategory) -> Option<RobotCommand> {
        self.link.pending(category)
    }

    /// Time since the robot was last heard from
    pub fn last_seen_age(&self) -> Option<Duration> {
        self.link.last_inbound().map(|t| t.elapsed())
    }

    pub fn telemetry(&self) -> Option<Telemetry> {
        self.link.telemetry()
    }

    pub fn is_available(&self) -> bool {
        self.transport.is_available()
    }

    pub fn teleport(&self, pose: Pose) -> Result<(), TransportError> {
        self.transport.teleport(pose)
    }

    /// Blink white a few times so an operator can spot the robot. Blocks.
    pub fn blink(&self) {
        for _ in 0..BLINK_CYCLES {
            self.enqueue(RobotCommand::Leds {
                r: 255,
                g: 255,
                b: 255,
            });
            std::thread::sleep(BLINK_PERIOD);
            self.enqueue(RobotCommand::Leds { r: 0, g: 0, b: 0 });
            std::thread::sleep(BLINK_PERIOD);
        }
        self.leds_dirty.store(true, Ordering::SeqCst);
    }

    /// Whether LEDs were overridden locally and should be set again.
    /// Reading clears the flag.
    pub fn take_leds_dirty(&self) -> bool {
        self.leds_dirty.swap(false, Ordering::SeqCst)
    }

    pub fn info(&self) -> RobotInfo {
        RobotInfo {
            address: self.address.clone(),
            identity: self.identity(),
            available: self.is_available(),
            telemetry: self.telemetry(),
            last_inbound_age: self.link.last_inbound().map(|t| t.elapsed().as_secs_f64()),
            last_outbound_age: self.link.last_outbound().map(|t| t.elapsed().as_secs_f64()),
        }
    }

    /// Stop the transport. Idempotent.
    pub fn close(&self) {
        self.transport.close();
    }
}

impl fmt::Debug for RobotHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RobotHandle")
            .field("address", &self.address)
            .field("identity", &self.identity())
            .finish()
    }
}

impl Drop for RobotHandle {
    fn drop(&mut self) {
        self.transport.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Team;

    #[test]
    fn test_address_parsing() {
        assert_eq!(
            "serial:/dev/ttyUSB0".parse::<TransportAddress>().unwrap(),
            TransportAddress::Serial(PathBuf::from("/dev/ttyUSB0"))
        );
        assert_eq!(
            "wifi:192.168.1.42".parse::<TransportAddress>().unwrap(),
            TransportAddress::Wifi("192.168.1.42:7600".parse().unwrap())
        );
        assert_eq!(
            "wifi:10.0.0.3:9000".parse::<TransportAddress>().unwrap(),
            TransportAddress::Wifi("10.0.0.3:9000".parse().unwrap())
        );
        assert_eq!(
            "sim:blue1".parse::<TransportAddress>().unwrap(),
            TransportAddress::Sim(RobotId::new(Team::Blue, 1))
        );
        assert!("tcp:1.2.3.4".parse::<TransportAddress>().is_err());
        assert!("serial:".parse::<TransportAddress>().is_err());
        assert!("wifi:not-an-ip".parse::<TransportAddress>().is_err());
    }

    #[test]
    fn test_address_text_form_is_stable() {
        let addr: TransportAddress = "wifi:10.0.0.3:9000".parse().unwrap();
        assert_eq!(addr.to_string(), "wifi:10.0.0.3:9000");
        assert_eq!(addr.kind(), "wifi");
    }

    #[test]
    fn test_latest_command_wins() {
        let link = LinkState::new();
        link.store(RobotCommand::control(0.1, 0.0, 0.0));
        link.store(RobotCommand::kick(1.0));
        link.store(RobotCommand::control(0.2, 0.0, 0.0));

        assert_eq!(
            link.pending(CommandCategory::Control),
            Some(RobotCommand::Control {
                dx: 200,
                dy: 0,
                dturn: 0
            })
        );

        let drained = link.drain();
        assert_eq!(drained.len(), 2);
        assert!(link.drain().is_empty());
    }

    #[test]
    fn test_heartbeat_is_never_stored() {
        let link = LinkState::new();
        link.store(RobotCommand::Heartbeat);
        assert!(link.drain().is_empty());
    }

    #[test]
    fn test_sim_handle_applies_commands() {
        let simulator = Arc::new(Simulator::new(Default::default()));
        let id = RobotId::new(Team::Green, 1);
        let link = Arc::new(LinkState::new());
        let transport = SimTransport::new(link.clone(), id, simulator.clone());
        let handle = RobotHandle::new(TransportAddress::Sim(id), link, Box::new(transport));

        handle.enqueue(RobotCommand::control(0.5, 0.0, 0.0));
        assert!(handle.last_seen_age().is_some());
        assert_eq!(
            handle.pending(CommandCategory::Control),
            Some(RobotCommand::Control {
                dx: 500,
                dy: 0,
                dturn: 0
            })
        );

        handle.teleport(Pose::new(0.3, -0.2, 0.0)).unwrap();
        let pose = simulator.robot_pose(id).unwrap();
        assert_eq!(pose.position(), crate::field::Point::new(0.3, -0.2));

        handle.close();
        handle.close();
        assert!(!handle.is_available());
    }
}
