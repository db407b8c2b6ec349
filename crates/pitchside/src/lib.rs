// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Pitchside - match arbitration for robot soccer fleets
//!
//! Arbitrates control of a small fleet of robots playing a refereed match.
//! Team programs send movement and kick commands over a request/response RPC;
//! the control service authenticates them and lets its own preemption tasks
//! (stop, go-to, placement) override them. The referee consumes the live
//! position feed and drives match phases, scoring and penalties.
//!
//! ## Architecture
//!
//! ```text
//! +-------------------+      +--------------------------+
//! |  Team programs    | RPC  |  Control                 |
//! |  (ControlClient)  +----->+  auth + task scheduler   |
//! +-------------------+      +-----------+--------------+
//!                                        |  ^ add/remove tasks
//!            +---------------------------+  |
//!            v                              |
//! +-------------------+      +--------------+-----------+
//! |  RobotRegistry    |      |  Referee                 |
//! |  RobotHandle x N  |      |  phases, goals, penalties|
//! +----+-----+----+---+      +--------------+-----------+
//!      |     |    |                         ^
//!   serial wifi  sim                        | latest frame (HWM 1)
//!      |     |    |              +----------+-----------+
//!      v     v    v              |  PositionFeed        |
//!   wire protocol frames         |  (perception / sim)  |
//!                                +----------------------+
//! ```
//!
//! Every long-running loop runs on its own thread and shares state only
//! through the lock-protected structures owned by [`control::Control`],
//! [`referee::Referee`] and [`registry::RobotRegistry`].

pub mod config;
pub mod control;
pub mod error;
pub mod feed;
pub mod field;
pub mod protocol;
pub mod referee;
pub mod registry;
pub mod robot;
pub mod sim;

pub use crate::config::ArbiterConfig;
pub use crate::control::{Control, ControlClient, ControlTask, RpcCommand, RpcResponse, RpcServer};
pub use crate::error::{Error, Result};
pub use crate::feed::{FieldView, PositionFeed};
pub use crate::field::{Pose, RobotId, Team};
pub use crate::referee::{GameSnapshot, Phase, Referee};
pub use crate::registry::RobotRegistry;
pub use crate::protocol::CommandCategory;
pub use crate::robot::{RobotHandle, TransportAddress};
pub use crate::sim::Simulator;

/// Version of the pitchside crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
