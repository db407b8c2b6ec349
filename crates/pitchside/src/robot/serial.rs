// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Serial transport
//!
//! One thread per port. The thread owns the device, feeds inbound bytes to a
//! [`FrameReader`] and writes the pending commands once per iteration.
//!
//! ## Connection lifecycle
//!
//! ```text
//! open -> wake string -> monitor(hz) + stop + beep -> run
//!   ^                                                  |
//!   +---- I/O error, or silent > 5 s and init > 5 s ---+
//! ```

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{LinkState, Transport, TransportError};
use crate::config::SerialConfig;
use crate::protocol::{FrameReader, RobotCommand, Telemetry, PACKET_MONITOR_DATA};

/// Sent on open to wake the radio bridge
const WAKE_SEQUENCE: &[u8] = b"rhock\r\nrhock\r\nrhock\r\n";

/// Settle time around the wake sequence
const WAKE_DELAY: Duration = Duration::from_millis(100);

/// Wait before retrying a device path that does not exist
const MISSING_DEVICE_DELAY: Duration = Duration::from_secs(1);

/// Monitor rate requested by the periodic keep-alive
const KEEPALIVE_MONITOR_HZ: u32 = 1;

/// Device name prefixes listed by [`available_ports`]
const PORT_PREFIXES: [&str; 3] = ["ttyUSB", "ttyACM", "rfcomm"];

/// Byte stream to one robot
pub trait SerialLink: Send {
    /// Read what is available, waiting at most the link timeout.
    /// Returns `Ok(0)` when nothing arrived.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write the whole buffer
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;
}

/// Opens a link for a device path with the given read timeout
pub type SerialOpener =
    Arc<dyn Fn(&Path, Duration) -> io::Result<Box<dyn SerialLink>> + Send + Sync>;

/// Default opener: a raw tty
pub fn tty_opener() -> SerialOpener {
    Arc::new(
        |path: &Path, timeout: Duration| -> io::Result<Box<dyn SerialLink>> {
            Ok(Box::new(TtyLink::open(path, timeout)?))
        },
    )
}

/// Serial devices present on this machine
pub fn available_ports() -> Vec<PathBuf> {
    let mut ports: Vec<PathBuf> = match std::fs::read_dir("/dev") {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter(|e| {
                let name = e.file_name();
                let name = name.to_string_lossy();
                PORT_PREFIXES.iter().any(|p| name.starts_with(p))
            })
            .map(|e| e.path())
            .collect(),
        Err(_) => Vec::new(),
    };
    ports.sort();
    ports
}

/// Raw, non-blocking tty at 115200 baud
pub struct TtyLink {
    file: File,
    timeout: Duration,
}

impl TtyLink {
    pub fn open(path: &Path, timeout: Duration) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(path)?;
        configure_raw(file.as_raw_fd())?;
        Ok(Self { file, timeout })
    }

    fn poll(&self, events: libc::c_short) -> io::Result<bool> {
        let mut pfd = libc::pollfd {
            fd: self.file.as_raw_fd(),
            events,
            revents: 0,
        };
        let timeout_ms = self.timeout.as_millis().min(i32::MAX as u128) as libc::c_int;

        // SAFETY: pfd is a valid pollfd for the duration of the call
        let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(err);
        }
        if pfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "serial device hung up",
            ));
        }
        Ok(ret > 0)
    }
}

fn configure_raw(fd: RawFd) -> io::Result<()> {
    // SAFETY: termios is plain data and tcgetattr fills it before any use
    let mut tio: libc::termios = unsafe { std::mem::zeroed() };

    // SAFETY: fd is an open descriptor owned by the caller
    unsafe {
        if libc::tcgetattr(fd, &mut tio) != 0 {
            return Err(io::Error::last_os_error());
        }
        libc::cfmakeraw(&mut tio);
        libc::cfsetispeed(&mut tio, libc::B115200);
        libc::cfsetospeed(&mut tio, libc::B115200);
        tio.c_cflag |= libc::CLOCAL | libc::CREAD;
        if libc::tcsetattr(fd, libc::TCSANOW, &tio) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

impl SerialLink for TtyLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.poll(libc::POLLIN)? {
            return Ok(0);
        }
        match self.file.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn write_all(&mut self, mut data: &[u8]) -> io::Result<()> {
        while !data.is_empty() {
            match self.file.write(data) {
                Ok(n) => data = &data[n..],
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if !self.poll(libc::POLLOUT)? {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "serial write timed out",
                        ));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Serial transport: the handle side of the port thread
pub struct SerialTransport {
    link: Arc<LinkState>,
    /// A robot silent for longer is unavailable
    timeout: Duration,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl SerialTransport {
    /// Spawn the port thread
    pub fn start(
        path: PathBuf,
        link: Arc<LinkState>,
        config: SerialConfig,
        opener: SerialOpener,
    ) -> Result<Self, TransportError> {
        let timeout = config.reconnect_timeout();
        let worker = SerialWorker {
            path,
            link: link.clone(),
            config,
            opener,
            port: None,
            reader: FrameReader::new(),
            needs_init: true,
            last_init: None,
            last_sent: None,
        };

        let thread = std::thread::Builder::new()
            .name("pitchside-serial".into())
            .spawn(move || worker.run())?;

        Ok(Self {
            link,
            timeout,
            thread: Mutex::new(Some(thread)),
        })
    }
}

impl Transport for SerialTransport {
    fn enqueue(&self, command: RobotCommand) {
        self.link.store(command);
    }

    fn is_available(&self) -> bool {
        !self.link.is_closed()
            && self
                .link
                .last_inbound()
                .is_some_and(|t| t.elapsed() <= self.timeout)
    }

    fn close(&self) {
        self.link.close();
        if let Some(thread) = self.thread.lock().take() {
            let _ = thread.join();
        }
    }
}

struct SerialWorker {
    path: PathBuf,
    link: Arc<LinkState>,
    config: SerialConfig,
    opener: SerialOpener,
    port: Option<Box<dyn SerialLink>>,
    reader: FrameReader,
    needs_init: bool,
    last_init: Option<Instant>,
    last_sent: Option<Instant>,
}

impl SerialWorker {
    fn run(mut self) {
        let reconnect = self.config.reconnect_timeout();

        while !self.link.is_closed() {
            if let Err(e) = self.step() {
                warn!("[serial] {}: {}", self.path.display(), e);
                self.port = None;
                self.needs_init = true;
                if e.kind() == io::ErrorKind::NotFound {
                    std::thread::sleep(MISSING_DEVICE_DELAY);
                }
            }

            let silent = self
                .link
                .last_inbound()
                .map_or(true, |t| t.elapsed() > reconnect);
            let old_init = self.last_init.is_some_and(|t| t.elapsed() > reconnect);

            if silent && old_init && !self.needs_init {
                info!(
                    "[serial] {}: no message for {:?}, reconnecting",
                    self.path.display(),
                    reconnect
                );
                self.needs_init = true;
            }
        }

        debug!("[serial] {}: closed", self.path.display());
    }

    fn open(&mut self) -> io::Result<()> {
        info!("[serial] opening {}", self.path.display());
        self.needs_init = false;
        self.port = None;
        self.last_init = Some(Instant::now());

        let mut port = (self.opener)(&self.path, self.config.read_timeout())?;
        std::thread::sleep(WAKE_DELAY);
        port.write_all(WAKE_SEQUENCE)?;
        std::thread::sleep(WAKE_DELAY);
        self.port = Some(port);

        self.link.store(RobotCommand::Monitor {
            frequency: self.config.monitor_hz,
        });
        self.link.store(RobotCommand::stop());
        self.link.store(RobotCommand::Beep {
            frequency: 880,
            duration: 250,
        });
        self.reader.reset();
        self.last_sent = None;
        Ok(())
    }

    fn step(&mut self) -> io::Result<()> {
        if self.needs_init || self.port.is_none() {
            self.open()?;
        }
        let Some(port) = self.port.as_mut() else {
            return Ok(());
        };

        let mut buf = [0u8; 64];
        let n = port.read(&mut buf)?;
        for frame in self.reader.feed(&buf[..n]) {
            self.link.mark_inbound();
            if frame.packet_type != PACKET_MONITOR_DATA {
                continue;
            }
            match Telemetry::from_frame(&frame) {
                Ok(telemetry) => self.link.set_telemetry(telemetry),
                Err(e) => warn!("[serial] {}: dropping telemetry: {}", self.path.display(), e),
            }
        }

        for command in self.link.drain() {
            let bytes = command
                .to_frame()
                .encode()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            port.write_all(&bytes)?;
            self.last_sent = Some(Instant::now());
            self.link.mark_outbound();
        }

        // Keep telemetry flowing when nothing else is sent
        let resend = self.config.monitor_resend();
        if self.last_sent.map_or(true, |t| t.elapsed() > resend) {
            self.link.store(RobotCommand::Monitor {
                frequency: KEEPALIVE_MONITOR_HZ,
            });
        }

        Ok(())
    }
}
