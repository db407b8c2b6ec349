// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Robot registry
//!
//! Owns every [`RobotHandle`], in the order they were added, and maps match
//! identities to them. Each change is written to the robots file as an
//! ordered list of `[address, identity-or-""]` pairs so assignments survive
//! a restart.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::SerialConfig;
use crate::feed::PositionFeed;
use crate::field::{angle_wrap, RobotId};
use crate::protocol::RobotCommand;
use crate::robot::serial::{self, tty_opener};
use crate::robot::{
    LinkState, RobotHandle, SerialOpener, SerialTransport, SimTransport, Transport,
    TransportAddress, TransportError, WifiService,
};
use crate::sim::Simulator;

/// Spin speed used by [`RobotRegistry::identify`], deg/s
const IDENTIFY_SPIN: f64 = 50.0;

/// How long each robot spins during identification
const IDENTIFY_DURATION: Duration = Duration::from_secs(1);

/// Accepted orientation change of the spinning robot, degrees
const IDENTIFY_WINDOW: (f64, f64) = (25.0, 90.0);

/// Registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("robot {0} is already registered")]
    AlreadyRegistered(TransportAddress),

    #[error("no robot at {0}")]
    UnknownAddress(TransportAddress),

    #[error("invalid robot record: {0}")]
    InvalidRecord(String),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One persisted `(address, identity)` pair.
///
/// Serialized as `["wifi:192.168.100.11", "green1"]`, with `""` for a robot
/// that has no identity yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "(String, String)", into = "(String, String)")]
pub struct RobotRecord {
    pub address: TransportAddress,
    pub identity: Option<RobotId>,
}

impl TryFrom<(String, String)> for RobotRecord {
    type Error = RegistryError;

    fn try_from((address, identity): (String, String)) -> Result<Self, Self::Error> {
        let address = address.parse()?;
        let identity = if identity.is_empty() {
            None
        } else {
            Some(
                identity
                    .parse()
                    .map_err(|_| RegistryError::InvalidRecord(identity.clone()))?,
            )
        };
        Ok(Self { address, identity })
    }
}

impl From<RobotRecord> for (String, String) {
    fn from(record: RobotRecord) -> Self {
        (
            record.address.to_string(),
            record.identity.map(|id| id.to_string()).unwrap_or_default(),
        )
    }
}

/// Read persisted records. A missing file is an empty registry.
pub fn load_records(path: &Path) -> Result<Vec<RobotRecord>, RegistryError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(serde_json::from_str(&text)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

/// Write records, replacing the file
pub fn save_records(path: &Path, records: &[RobotRecord]) -> Result<(), RegistryError> {
    let text = serde_json::to_string_pretty(records)?;
    std::fs::write(path, text)?;
    Ok(())
}

/// Every robot handle of the process
pub struct RobotRegistry {
    robots: RwLock<Vec<Arc<RobotHandle>>>,
    robots_file: Option<PathBuf>,
    serial: SerialConfig,
    opener: SerialOpener,
    wifi: Option<Arc<WifiService>>,
    simulator: Option<Arc<Simulator>>,
}

impl RobotRegistry {
    pub fn new(serial: SerialConfig) -> Self {
        Self {
            robots: RwLock::new(Vec::new()),
            robots_file: None,
            serial,
            opener: tty_opener(),
            wifi: None,
            simulator: None,
        }
    }

    /// Persist assignments to `path` on every change
    pub fn with_robots_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.robots_file = Some(path.into());
        self
    }

    pub fn with_wifi(mut self, wifi: Arc<WifiService>) -> Self {
        self.wifi = Some(wifi);
        self
    }

    pub fn with_simulator(mut self, simulator: Arc<Simulator>) -> Self {
        self.simulator = Some(simulator);
        self
    }

    /// Replace how serial ports are opened
    pub fn with_serial_opener(mut self, opener: SerialOpener) -> Self {
        self.opener = opener;
        self
    }

    pub fn simulator(&self) -> Option<&Arc<Simulator>> {
        self.simulator.as_ref()
    }

    /// Serial ports present on this machine
    pub fn available_serial_ports(&self) -> Vec<PathBuf> {
        serial::available_ports()
    }

    /// Restore handles and identities from the robots file
    pub fn load(&self) -> Result<usize, RegistryError> {
        let Some(path) = &self.robots_file else {
            return Ok(0);
        };

        let records = load_records(path)?;
        let count = records.len();
        for record in records {
            let handle = match self.attach(record.address.clone()) {
                Ok(handle) => handle,
                Err(e) => {
                    warn!("[registry] skipping {}: {}", record.address, e);
                    continue;
                }
            };
            self.assign(&handle, record.identity);
        }

        info!("[registry] restored {} robot(s) from {}", count, path.display());
        Ok(count)
    }

    /// Connect a new robot. A simulated robot takes the identity of its body.
    pub fn add(&self, address: TransportAddress) -> Result<Arc<RobotHandle>, RegistryError> {
        let handle = self.attach(address)?;
        if let TransportAddress::Sim(body) = handle.address() {
            self.assign(&handle, Some(*body));
        }
        self.save();
        Ok(handle)
    }

    fn attach(&self, address: TransportAddress) -> Result<Arc<RobotHandle>, RegistryError> {
        if self.by_address(&address).is_some() {
            return Err(RegistryError::AlreadyRegistered(address));
        }

        let link = Arc::new(LinkState::new());
        let transport: Box<dyn Transport> = match &address {
            TransportAddress::Serial(path) => Box::new(SerialTransport::start(
                path.clone(),
                link.clone(),
                self.serial.clone(),
                self.opener.clone(),
            )?),
            TransportAddress::Wifi(addr) => {
                let wifi = self.wifi.as_ref().ok_or(TransportError::NoWifiService)?;
                Box::new(wifi.register(*addr, link.clone()))
            }
            TransportAddress::Sim(body) => {
                let simulator = self.simulator.as_ref().ok_or(TransportError::NoSimulator)?;
                Box::new(SimTransport::new(link.clone(), *body, simulator.clone()))
            }
        };

        let handle = Arc::new(RobotHandle::new(address.clone(), link, transport));

        let mut robots = self.robots.write();
        // Lost a race with a concurrent add of the same address
        if robots.iter().any(|r| *r.address() == address) {
            handle.close();
            return Err(RegistryError::AlreadyRegistered(address));
        }
        robots.push(handle.clone());
        drop(robots);

        info!("[registry] added {}", address);
        Ok(handle)
    }

    /// Disconnect and forget a robot
    pub fn remove(&self, address: &TransportAddress) -> Result<(), RegistryError> {
        let handle = {
            let mut robots = self.robots.write();
            let index = robots
                .iter()
                .position(|r| r.address() == address)
                .ok_or_else(|| RegistryError::UnknownAddress(address.clone()))?;
            robots.remove(index)
        };

        handle.close();
        info!("[registry] removed {}", address);
        self.save();
        Ok(())
    }

    /// Assign (or clear) the identity of the robot at `address`.
    /// A robot already holding that identity loses it.
    pub fn set_identity(
        &self,
        address: &TransportAddress,
        identity: Option<RobotId>,
    ) -> Result<(), RegistryError> {
        let handle = self
            .by_address(address)
            .ok_or_else(|| RegistryError::UnknownAddress(address.clone()))?;
        self.assign(&handle, identity);
        self.save();
        Ok(())
    }

    /// Check-and-set under the write lock: at most one handle holds an identity
    fn assign(&self, handle: &Arc<RobotHandle>, identity: Option<RobotId>) {
        let robots = self.robots.write();
        if let Some(id) = identity {
            for other in robots.iter() {
                if !Arc::ptr_eq(other, handle) && other.identity() == Some(id) {
                    debug!("[registry] {} loses identity {}", other.address(), id);
                    other.set_identity(None);
                }
            }
        }
        handle.set_identity(identity);
    }

    /// Handle currently holding `id`
    pub fn get(&self, id: RobotId) -> Option<Arc<RobotHandle>> {
        self.robots
            .read()
            .iter()
            .find(|r| r.identity() == Some(id))
            .cloned()
    }

    pub fn by_address(&self, address: &TransportAddress) -> Option<Arc<RobotHandle>> {
        self.robots
            .read()
            .iter()
            .find(|r| r.address() == address)
            .cloned()
    }

    /// Every handle, in insertion order
    pub fn handles(&self) -> Vec<Arc<RobotHandle>> {
        self.robots.read().clone()
    }

    /// Identities of the robots that are identified and reachable
    pub fn available(&self) -> Vec<RobotId> {
        self.robots
            .read()
            .iter()
            .filter(|r| r.is_available())
            .filter_map(|r| r.identity())
            .collect()
    }

    pub fn records(&self) -> Vec<RobotRecord> {
        self.robots
            .read()
            .iter()
            .map(|r| RobotRecord {
                address: r.address().clone(),
                identity: r.identity(),
            })
            .collect()
    }

    fn save(&self) {
        let Some(path) = &self.robots_file else {
            return;
        };
        if let Err(e) = save_records(path, &self.records()) {
            warn!("[registry] failed to save {}: {}", path.display(), e);
        }
    }

    /// Find out which marker each robot carries.
    ///
    /// Spins every robot in turn and assigns it the identity whose orientation
    /// changed by a plausible amount. Blocks for about a second per robot.
    pub fn identify(&self, feed: &PositionFeed) {
        for handle in self.handles() {
            let before = feed.view();
            handle.enqueue(RobotCommand::control(0.0, 0.0, IDENTIFY_SPIN.to_radians()));
            std::thread::sleep(IDENTIFY_DURATION);
            handle.enqueue(RobotCommand::stop());
            let after = feed.view();

            let found = RobotId::all().find(|id| {
                match (before.pose(*id), after.pose(*id)) {
                    (Some(a), Some(b)) => {
                        let delta = angle_wrap(b.theta - a.theta).abs().to_degrees();
                        delta > IDENTIFY_WINDOW.0 && delta < IDENTIFY_WINDOW.1
                    }
                    _ => false,
                }
            });

            match found {
                Some(id) => {
                    info!("[registry] {} identified as {}", handle.address(), id);
                    self.assign(&handle, Some(id));
                }
                None => warn!("[registry] could not identify {}", handle.address()),
            }
        }
        self.save();
    }

    /// Close every transport
    pub fn close_all(&self) {
        for handle in self.handles() {
            handle.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{FieldDimensions, Team};

    const G1: RobotId = RobotId::new(Team::Green, 1);
    const B1: RobotId = RobotId::new(Team::Blue, 1);

    fn sim_registry() -> RobotRegistry {
        let sim = Arc::new(Simulator::new(FieldDimensions::default()));
        RobotRegistry::new(SerialConfig::default()).with_simulator(sim)
    }

    #[test]
    fn test_record_format() {
        let records = vec![
            RobotRecord {
                address: "sim:green1".parse().unwrap(),
                identity: Some(G1),
            },
            RobotRecord {
                address: "wifi:192.168.100.12".parse().unwrap(),
                identity: None,
            },
        ];
        let text = serde_json::to_string(&records).unwrap();
        assert_eq!(
            text,
            r#"[["sim:green1","green1"],["wifi:192.168.100.12:7600",""]]"#
        );
        let back: Vec<RobotRecord> = serde_json::from_str(&text).unwrap();
        assert_eq!(back, records);

        assert!(serde_json::from_str::<Vec<RobotRecord>>(r#"[["sim:green1","red7"]]"#).is_err());
    }

    #[test]
    fn test_sim_robot_is_identified() {
        let registry = sim_registry();
        let handle = registry.add(TransportAddress::Sim(G1)).unwrap();

        assert_eq!(handle.identity(), Some(G1));
        assert_eq!(registry.available(), vec![G1]);
        assert!(registry.get(G1).is_some());
        assert!(matches!(
            registry.add(TransportAddress::Sim(G1)),
            Err(RegistryError::AlreadyRegistered(_))
        ));
    }

    #[test]
    fn test_identity_moves_between_handles() {
        let registry = sim_registry();
        let a = registry.add(TransportAddress::Sim(G1)).unwrap();
        let b = registry.add(TransportAddress::Sim(B1)).unwrap();

        registry.set_identity(b.address(), Some(G1)).unwrap();
        assert_eq!(a.identity(), None);
        assert_eq!(b.identity(), Some(G1));
        assert_eq!(registry.get(G1).unwrap().address(), b.address());
    }

    #[test]
    fn test_remove() {
        let registry = sim_registry();
        let addr = TransportAddress::Sim(G1);
        let handle = registry.add(addr.clone()).unwrap();

        registry.remove(&addr).unwrap();
        assert!(!handle.is_available());
        assert!(registry.handles().is_empty());
        assert!(matches!(
            registry.remove(&addr),
            Err(RegistryError::UnknownAddress(_))
        ));
    }

    #[test]
    fn test_missing_transport_services() {
        let registry = RobotRegistry::new(SerialConfig::default());
        assert!(matches!(
            registry.add(TransportAddress::Sim(G1)),
            Err(RegistryError::Transport(TransportError::NoSimulator))
        ));
        assert!(matches!(
            registry.add("wifi:10.0.0.1".parse().unwrap()),
            Err(RegistryError::Transport(TransportError::NoWifiService))
        ));
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_records(&dir.path().join("none.json")).unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_assignments_keep_identity_unique() {
        let registry = Arc::new(sim_registry());
        let handles: Vec<_> = RobotId::all()
            .map(|id| registry.add(TransportAddress::Sim(id)).unwrap())
            .collect();

        let workers: Vec<_> = handles
            .iter()
            .map(|handle| {
                let registry = registry.clone();
                let address = handle.address().clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        registry.set_identity(&address, Some(G1)).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let holders = handles.iter().filter(|h| h.identity() == Some(G1)).count();
        assert_eq!(holders, 1);
    }
}
