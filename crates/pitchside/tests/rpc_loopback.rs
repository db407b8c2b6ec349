// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test code readability

//! Control RPC over TCP loopback.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use pitchside::config::{ControlConfig, SerialConfig};
use pitchside::control::rpc::{read_frame, write_frame};
use pitchside::control::{ControlClient, ControlTask, RpcServer};
use pitchside::field::{FieldDimensions, Point};
use pitchside::protocol::{CommandCategory, RobotCommand};
use pitchside::{Control, PositionFeed, RobotId, RobotRegistry, RpcResponse, Simulator, Team, TransportAddress};

const G1: RobotId = RobotId::new(Team::Green, 1);

fn start_server() -> (Arc<Control>, RpcServer) {
    let sim = Arc::new(Simulator::new(FieldDimensions::default()));
    let registry = RobotRegistry::new(SerialConfig::default()).with_simulator(sim);
    registry.add(TransportAddress::Sim(G1)).unwrap();

    let control = Arc::new(Control::new(
        Arc::new(registry),
        Arc::new(PositionFeed::new()),
        FieldDimensions::default(),
        &ControlConfig::default(),
    ));
    let bind: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let server = RpcServer::start(bind, Duration::from_millis(100), control.clone()).unwrap();
    (control, server)
}

#[test]
fn test_client_commands() -> pitchside::Result<()> {
    let (control, server) = start_server();
    control.set_team_key(Team::Green, "k");

    let mut client = ControlClient::connect(server.local_addr(), "k")?;
    let response = client.control(Team::Green, 1, 0.2, 0.0, 0.0)?;
    assert!(response.ok, "{}", response.message);

    let handle = control.registry().get(G1).unwrap();
    assert_eq!(
        handle.pending(CommandCategory::Control),
        Some(RobotCommand::Control {
            dx: 200,
            dy: 0,
            dturn: 0
        })
    );

    control.add_task(ControlTask::stop_one("hold", G1, true));
    let refused = client.kick(Team::Green, 1, 1.0)?;
    assert!(!refused.ok);
    assert!(refused.message.contains("hold"));

    client.set_key("wrong");
    let refused = client.kick(Team::Green, 1, 1.0)?;
    assert_eq!(refused.message, "Bad key for team green");

    let refused = client.teleport_ball(0.3, -0.2)?;
    assert!(!refused.ok);

    client.set_key(control.master_key());
    let moved = client.teleport_ball(0.3, -0.2)?;
    assert!(moved.ok, "{}", moved.message);
    let sim = control.registry().simulator().unwrap();
    assert_eq!(sim.ball(), Point::new(0.3, -0.2));

    server.stop();
    Ok(())
}

#[test]
fn test_malformed_request_keeps_connection() {
    let (_control, server) = start_server();
    let mut stream = TcpStream::connect(server.local_addr()).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    for body in [
        &b"not json"[..],
        br#"["k", "green", 1, ["dance"]]"#,
        br#"["k", "green", 1, ["kick"]]"#,
    ] {
        write_frame(&mut stream, body).unwrap();
        let reply = read_frame(&mut stream).unwrap().expect("response");
        let response: RpcResponse = serde_json::from_slice(&reply).unwrap();
        assert!(!response.ok);
        assert!(!response.message.is_empty());
    }

    // Still usable: the wire answer is a [bool, message] pair
    write_frame(&mut stream, br#"["", "green", 1, ["kick", 0.5]]"#).unwrap();
    let reply = read_frame(&mut stream).unwrap().expect("response");
    let value: serde_json::Value = serde_json::from_slice(&reply).unwrap();
    assert_eq!(value, serde_json::json!([true, "ok"]));

    server.stop();
}

#[test]
fn test_oversized_frame_closes_connection() {
    let (_control, server) = start_server();
    let mut stream = TcpStream::connect(server.local_addr()).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    stream.write_all(&u32::MAX.to_be_bytes()).unwrap();
    let mut buf = [0u8; 1];
    // Server drops the connection: EOF (or reset) instead of a response
    match stream.read(&mut buf) {
        Ok(n) => assert_eq!(n, 0),
        Err(e) => assert_ne!(e.kind(), std::io::ErrorKind::WouldBlock),
    }

    server.stop();
}
