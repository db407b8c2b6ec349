// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Control RPC server
//!
//! TCP, one thread per connection, length-prefixed JSON in both directions.
//! Requests from every connection go through one dispatch lock so they are
//! answered strictly one at a time.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, warn};

use super::rpc::{read_frame, write_frame, RpcError, RpcRequest, RpcResponse};
use super::Control;

/// Accept poll interval
const ACCEPT_POLL: Duration = Duration::from_millis(10);

struct Shared {
    control: Arc<Control>,
    shutdown: AtomicBool,
    dispatch: Mutex<()>,
    read_timeout: Duration,
    connections: Mutex<Vec<JoinHandle<()>>>,
}

/// Listening RPC endpoint of a [`Control`]
pub struct RpcServer {
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    accept: Mutex<Option<JoinHandle<()>>>,
}

impl RpcServer {
    /// Bind and start accepting connections.
    ///
    /// `read_timeout` bounds how long a connection thread blocks between
    /// requests before checking for shutdown.
    pub fn start(
        bind: SocketAddr,
        read_timeout: Duration,
        control: Arc<Control>,
    ) -> io::Result<Self> {
        let domain = if bind.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&bind.into())?;
        socket.listen(128)?;

        let listener: TcpListener = socket.into();
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let shared = Arc::new(Shared {
            control,
            shutdown: AtomicBool::new(false),
            dispatch: Mutex::new(()),
            read_timeout,
            connections: Mutex::new(Vec::new()),
        });

        let accept_shared = Arc::clone(&shared);
        let accept = thread::Builder::new()
            .name("pitchside-rpc".into())
            .spawn(move || accept_loop(listener, accept_shared))?;

        info!("[rpc] listening on {}", local_addr);
        Ok(Self {
            local_addr,
            shared,
            accept: Mutex::new(Some(accept)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and wait for connection threads to notice
    pub fn stop(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        if let Some(accept) = self.accept.lock().take() {
            let _ = accept.join();
        }
        let connections: Vec<_> = self.shared.connections.lock().drain(..).collect();
        for connection in connections {
            let _ = connection.join();
        }
        info!("[rpc] stopped");
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
    }
}

fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    while !shared.shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!("[rpc] connection from {}", peer);
                let conn_shared = Arc::clone(&shared);
                let spawned = thread::Builder::new()
                    .name("pitchside-rpc-conn".into())
                    .spawn(move || serve_connection(stream, peer, conn_shared));
                match spawned {
                    Ok(handle) => {
                        let mut connections = shared.connections.lock();
                        connections.retain(|c| !c.is_finished());
                        connections.push(handle);
                    }
                    Err(e) => warn!("[rpc] cannot spawn connection thread: {}", e),
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                warn!("[rpc] accept failed: {}", e);
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
}

fn serve_connection(mut stream: TcpStream, peer: SocketAddr, shared: Arc<Shared>) {
    let setup = stream
        .set_nonblocking(false)
        .and_then(|_| stream.set_nodelay(true))
        .and_then(|_| stream.set_read_timeout(Some(shared.read_timeout)));
    if let Err(e) = setup {
        warn!("[rpc] {}: {}", peer, e);
        return;
    }

    while !shared.shutdown.load(Ordering::SeqCst) {
        let body = match read_frame(&mut stream) {
            Ok(Some(body)) => body,
            Ok(None) => continue,
            Err(RpcError::Closed) => break,
            Err(e) => {
                debug!("[rpc] {}: {}", peer, e);
                break;
            }
        };

        let response = respond(&shared, &body);
        let encoded = match serde_json::to_vec(&response) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("[rpc] cannot encode response: {}", e);
                break;
            }
        };
        if let Err(e) = write_frame(&mut stream, &encoded) {
            debug!("[rpc] {}: {}", peer, e);
            break;
        }
    }

    debug!("[rpc] {} disconnected", peer);
}

fn respond(shared: &Shared, body: &[u8]) -> RpcResponse {
    let request = serde_json::from_slice::<serde_json::Value>(body)
        .map_err(RpcError::from)
        .and_then(|value| RpcRequest::from_json(&value));

    match request {
        Ok(request) => {
            let _one_at_a_time = shared.dispatch.lock();
            shared.control.handle_request(request)
        }
        Err(e) => RpcResponse::refuse(e.to_string()),
    }
}
