// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! WiFi transport
//!
//! One UDP socket per process, shared by every WiFi robot. A fixed-rate send
//! loop drains the pending commands of all peers into one datagram per peer
//! (or a single broadcast datagram) and adds a heartbeat for any robot that
//! was not addressed during the last heartbeat interval, so the on-board
//! watchdog stays quiet while the robot idles. A receive loop demultiplexes
//! inbound datagrams by source IP.
//!
//! Frames carry the destination byte; a robot's id is the last octet of its
//! IP address.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, warn};

use super::{LinkState, Transport, TransportError};
use crate::config::WifiConfig;
use crate::protocol::{FrameReader, RobotCommand, Telemetry, PACKET_MONITOR_DATA};

/// UDP port robots listen on
pub const DEFAULT_ROBOT_PORT: u16 = 7600;

/// Largest datagram we accept
const MAX_DATAGRAM: usize = 1024;

/// Destination id of a robot: last octet of its address
pub fn robot_dest(ip: IpAddr) -> u8 {
    match ip {
        IpAddr::V4(v4) => v4.octets()[3],
        IpAddr::V6(v6) => v6.octets()[15],
    }
}

struct Peer {
    addr: SocketAddr,
    link: Arc<LinkState>,
    reader: Mutex<FrameReader>,
    last_addressed: Mutex<Option<Instant>>,
}

/// Shared WiFi socket and its loops
pub struct WifiService {
    socket: UdpSocket,
    config: WifiConfig,
    peers: RwLock<HashMap<IpAddr, Arc<Peer>>>,
    /// Last datagram seen per source, registered or not
    last_heard: Mutex<HashMap<IpAddr, Instant>>,
    running: AtomicBool,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl WifiService {
    /// Bind the shared socket on all interfaces
    pub fn bind(config: WifiConfig) -> Result<Arc<Self>, TransportError> {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.port);
        Self::bind_on(addr, config)
    }

    /// Bind the shared socket on a specific address
    pub fn bind_on(addr: SocketAddr, config: WifiConfig) -> Result<Arc<Self>, TransportError> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_broadcast(true)?;
        socket.bind(&addr.into())?;
        let socket: UdpSocket = socket.into();
        socket.set_read_timeout(Some(config.loop_period()))?;

        debug!("[wifi] socket bound on {}", socket.local_addr()?);

        Ok(Arc::new(Self {
            socket,
            config,
            peers: RwLock::new(HashMap::new()),
            last_heard: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
            threads: Mutex::new(Vec::new()),
        }))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Spawn the send and receive loops
    pub fn start(self: &Arc<Self>) -> Result<(), TransportError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let sender = Arc::clone(self);
        let send_thread = std::thread::Builder::new()
            .name("pitchside-wifi-tx".into())
            .spawn(move || sender.send_loop())?;

        let receiver = Arc::clone(self);
        let recv_thread = std::thread::Builder::new()
            .name("pitchside-wifi-rx".into())
            .spawn(move || receiver.recv_loop())?;

        self.threads.lock().extend([send_thread, recv_thread]);
        info!("[wifi] service started");
        Ok(())
    }

    /// Stop both loops and wait for them
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let threads: Vec<_> = self.threads.lock().drain(..).collect();
        for thread in threads {
            let _ = thread.join();
        }
    }

    /// Attach a robot reachable at `addr`
    pub fn register(self: &Arc<Self>, addr: SocketAddr, link: Arc<LinkState>) -> WifiTransport {
        let peer = Arc::new(Peer {
            addr,
            link: link.clone(),
            reader: Mutex::new(FrameReader::new()),
            last_addressed: Mutex::new(None),
        });
        self.peers.write().insert(addr.ip(), peer);

        WifiTransport {
            ip: addr.ip(),
            link,
            service: Arc::clone(self),
        }
    }

    fn unregister(&self, ip: IpAddr) {
        self.peers.write().remove(&ip);
    }

    /// Whether `ip` sent anything within the availability timeout
    pub fn is_available(&self, ip: IpAddr) -> bool {
        let timeout = self.config.availability_timeout();
        self.last_heard
            .lock()
            .get(&ip)
            .is_some_and(|t| t.elapsed() < timeout)
    }

    /// Every source heard from within the availability timeout
    pub fn available_addresses(&self) -> Vec<IpAddr> {
        let timeout = self.config.availability_timeout();
        let mut addrs: Vec<IpAddr> = self
            .last_heard
            .lock()
            .iter()
            .filter(|(_, t)| t.elapsed() < timeout)
            .map(|(ip, _)| *ip)
            .collect();
        addrs.sort();
        addrs
    }

    /// Drain pending commands into datagrams, adding heartbeats where due
    pub(crate) fn collect_datagrams(&self, now: Instant) -> Vec<(SocketAddr, Vec<u8>)> {
        let heartbeat = self.config.heartbeat_interval();
        let peers: Vec<Arc<Peer>> = self.peers.read().values().cloned().collect();
        let mut out = Vec::new();
        let mut broadcast = Vec::new();

        for peer in peers {
            if peer.link.is_closed() {
                continue;
            }

            let mut commands = peer.link.drain();
            let mut last = peer.last_addressed.lock();
            let due = last.map_or(true, |t| now.saturating_duration_since(t) >= heartbeat);
            if commands.is_empty() && due {
                commands.push(RobotCommand::Heartbeat);
            }
            if commands.is_empty() {
                continue;
            }
            *last = Some(now);
            drop(last);

            let dest = robot_dest(peer.addr.ip());
            let mut bytes = Vec::new();
            for command in commands {
                match command.to_frame().with_dest(dest).encode() {
                    Ok(frame) => bytes.extend(frame),
                    Err(e) => warn!("[wifi] {}: cannot encode {:?}: {}", peer.addr, command, e),
                }
            }
            peer.link.mark_outbound();

            if self.config.broadcast_address.is_some() {
                broadcast.extend(bytes);
            } else {
                out.push((peer.addr, bytes));
            }
        }

        if let Some(ip) = self.config.broadcast_address {
            if !broadcast.is_empty() {
                out.push((SocketAddr::new(ip, DEFAULT_ROBOT_PORT), broadcast));
            }
        }

        out
    }

    /// Route one inbound datagram to its peer
    pub(crate) fn handle_datagram(&self, src: SocketAddr, data: &[u8]) {
        self.last_heard.lock().insert(src.ip(), Instant::now());

        let Some(peer) = self.peers.read().get(&src.ip()).cloned() else {
            return;
        };
        peer.link.mark_inbound();

        let frames = peer.reader.lock().feed(data);
        for frame in frames {
            if frame.packet_type != PACKET_MONITOR_DATA {
                continue;
            }
            match Telemetry::from_frame(&frame) {
                Ok(telemetry) => peer.link.set_telemetry(telemetry),
                Err(e) => warn!("[wifi] {}: dropping telemetry: {}", src, e),
            }
        }
    }

    fn send_loop(&self) {
        let period = self.config.loop_period();
        while self.running.load(Ordering::SeqCst) {
            let started = Instant::now();
            for (addr, bytes) in self.collect_datagrams(started) {
                if let Err(e) = self.socket.send_to(&bytes, addr) {
                    debug!("[wifi] send to {} failed: {}", addr, e);
                }
            }
            if let Some(rest) = period.checked_sub(started.elapsed()) {
                std::thread::sleep(rest);
            }
        }
    }

    fn recv_loop(&self) {
        let mut buf = [0u8; MAX_DATAGRAM];
        while self.running.load(Ordering::SeqCst) {
            match self.socket.recv_from(&mut buf) {
                Ok((n, src)) => self.handle_datagram(src, &buf[..n]),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) => {}
                Err(e) => {
                    warn!("[wifi] receive failed: {}", e);
                    std::thread::sleep(self.config.loop_period());
                }
            }
        }
    }
}

/// Handle side of one WiFi peer
pub struct WifiTransport {
    ip: IpAddr,
    link: Arc<LinkState>,
    service: Arc<WifiService>,
}

impl Transport for WifiTransport {
    fn enqueue(&self, command: RobotCommand) {
        self.link.store(command);
    }

    fn is_available(&self) -> bool {
        !self.link.is_closed() && self.service.is_available(self.ip)
    }

    fn close(&self) {
        if !self.link.is_closed() {
            self.link.close();
            self.service.unregister(self.ip);
        }
    }
}
