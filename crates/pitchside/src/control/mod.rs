// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Control service
//!
//! Authenticates team commands and runs the preemption scheduler.
//!
//! ```text
//!  team RPC ──► handle_command ──► auth ──► RobotHandle::enqueue
//!                                    ▲
//!                                    │ preempted?
//!  Referee ──► add_task/remove_task ─┴─► tasks ──► tick() every 10 ms
//! ```
//!
//! Each robot is driven by at most one task per tick: the highest priority
//! task targeting it, earliest added on ties.

pub mod client;
pub mod rpc;
pub mod server;
pub mod task;

pub use client::ControlClient;
pub use rpc::{RpcCommand, RpcError, RpcRequest, RpcResponse};
pub use server::RpcServer;
pub use task::{ControlTask, TaskBehavior, TaskKind, TickContext};

use std::borrow::Borrow;
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ControlConfig;
use crate::feed::{FieldView, PositionFeed};
use crate::field::{FieldDimensions, Point, Pose, RobotId, Team, OUT_OF_GAME_MARGIN, ROBOT_NUMBERS};
use crate::protocol::RobotCommand;
use crate::registry::RobotRegistry;

use task::PRIORITY_RECOVERY;

/// Pseudo-team addressing the simulated ball
pub const BALL_TEAM: &str = "ball";

/// Name of the task added by [`Control::emergency`]
pub const EMERGENCY_TASK: &str = "emergency";

/// Prefix of the tasks bringing robots back from outside the field
pub const OUT_OF_GAME_TASK_PREFIX: &str = "out-of-game-";

/// Name of the recovery task of `robot`
pub fn out_of_game_task_name(robot: RobotId) -> String {
    format!("{}{}", OUT_OF_GAME_TASK_PREFIX, robot)
}

#[derive(Debug, Clone)]
struct TeamAuth {
    key: String,
    allow_control: bool,
    packets: u64,
}

impl Default for TeamAuth {
    fn default() -> Self {
        Self {
            key: String::new(),
            allow_control: true,
            packets: 0,
        }
    }
}

#[derive(Debug, Clone)]
struct TaskEntry {
    id: u64,
    task: ControlTask,
}

#[derive(Debug, Default)]
struct TaskList {
    next_id: u64,
    entries: Vec<TaskEntry>,
}

/// Authorization snapshot of one team
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamStatus {
    pub allow_control: bool,
    pub packets: u64,
    /// Names of the tasks preempting each robot, by robot number
    pub preempted: BTreeMap<u8, Vec<String>>,
}

/// Consistent view of [`Control`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlStatus {
    pub teams: BTreeMap<Team, TeamStatus>,
    pub tasks: Vec<String>,
    pub extra_features: bool,
}

/// Team authorization and preemption scheduler
pub struct Control {
    registry: Arc<RobotRegistry>,
    feed: Arc<PositionFeed>,
    dims: FieldDimensions,
    master_key: String,
    teams: Mutex<BTreeMap<Team, TeamAuth>>,
    tasks: Mutex<TaskList>,
    extra_features: AtomicBool,
    tick_period: Duration,
    running: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Control {
    pub fn new(
        registry: Arc<RobotRegistry>,
        feed: Arc<PositionFeed>,
        dims: FieldDimensions,
        config: &ControlConfig,
    ) -> Self {
        let teams = Team::ALL.iter().map(|t| (*t, TeamAuth::default())).collect();
        Self {
            registry,
            feed,
            dims,
            master_key: Uuid::new_v4().to_string(),
            teams: Mutex::new(teams),
            tasks: Mutex::new(TaskList::default()),
            extra_features: AtomicBool::new(true),
            tick_period: config.tick_period(),
            running: AtomicBool::new(false),
            thread: Mutex::new(None),
        }
    }

    /// Key that bypasses every team check
    pub fn master_key(&self) -> &str {
        &self.master_key
    }

    pub fn registry(&self) -> &Arc<RobotRegistry> {
        &self.registry
    }

    pub fn feed(&self) -> &Arc<PositionFeed> {
        &self.feed
    }

    pub fn dimensions(&self) -> &FieldDimensions {
        &self.dims
    }

    // ---- tasks ----

    /// Add a task. A task with the same name is replaced in place.
    pub fn add_task(&self, task: ControlTask) {
        let mut tasks = self.tasks.lock();
        let id = tasks.next_id;
        tasks.next_id += 1;

        debug!("[control] task {} (priority {})", task.name, task.priority);
        match tasks.entries.iter_mut().find(|e| e.task.name == task.name) {
            Some(entry) => *entry = TaskEntry { id, task },
            None => tasks.entries.push(TaskEntry { id, task }),
        }
    }

    /// Remove a task by name. Returns whether it existed.
    pub fn remove_task(&self, name: &str) -> bool {
        let mut tasks = self.tasks.lock();
        let before = tasks.entries.len();
        tasks.entries.retain(|e| e.task.name != name);
        before != tasks.entries.len()
    }

    /// Remove every task whose name starts with `prefix`
    pub fn remove_tasks_with_prefix(&self, prefix: &str) {
        self.tasks
            .lock()
            .entries
            .retain(|e| !e.task.name.starts_with(prefix));
    }

    pub fn has_task(&self, name: &str) -> bool {
        self.tasks.lock().entries.iter().any(|e| e.task.name == name)
    }

    /// Names of the tasks targeting `robot`, in insertion order
    pub fn task_names_for(&self, robot: RobotId) -> Vec<String> {
        self.tasks
            .lock()
            .entries
            .iter()
            .filter(|e| e.task.targets(robot))
            .map(|e| e.task.name.clone())
            .collect()
    }

    pub fn task_names(&self) -> Vec<String> {
        self.tasks
            .lock()
            .entries
            .iter()
            .map(|e| e.task.name.clone())
            .collect()
    }

    // ---- teams ----

    pub fn allow_team_control(&self, team: Team, allow: bool) {
        if let Some(auth) = self.teams.lock().get_mut(&team) {
            auth.allow_control = allow;
        }
        info!("[control] team {} control allowed: {}", team, allow);
    }

    pub fn set_team_key(&self, team: Team, key: impl Into<String>) {
        if let Some(auth) = self.teams.lock().get_mut(&team) {
            auth.key = key.into();
        }
    }

    pub fn team_key(&self, team: Team) -> String {
        self.teams
            .lock()
            .get(&team)
            .map(|a| a.key.clone())
            .unwrap_or_default()
    }

    /// Successful commands received from a team
    pub fn packets(&self, team: Team) -> u64 {
        self.teams.lock().get(&team).map_or(0, |a| a.packets)
    }

    /// Allow teams to use leds and beep
    pub fn set_extra_features_allowed(&self, allowed: bool) {
        self.extra_features.store(allowed, Ordering::SeqCst);
    }

    pub fn extra_features_allowed(&self) -> bool {
        self.extra_features.load(Ordering::SeqCst)
    }

    /// Take control away from every team and stop every robot once
    pub fn emergency(&self) {
        warn!("[control] emergency stop");
        {
            let mut teams = self.teams.lock();
            for auth in teams.values_mut() {
                auth.allow_control = false;
            }
        }
        self.add_task(ControlTask::stop_all(EMERGENCY_TASK, false));
    }

    pub fn status(&self) -> ControlStatus {
        // Tasks first, then teams: never both locks at once
        let entries = self.tasks.lock().entries.clone();
        let preempted_for = |team: Team| -> BTreeMap<u8, Vec<String>> {
            ROBOT_NUMBERS
                .iter()
                .map(|n| {
                    let robot = RobotId::new(team, *n);
                    let names = entries
                        .iter()
                        .filter(|e| e.task.targets(robot))
                        .map(|e| e.task.name.clone())
                        .collect();
                    (*n, names)
                })
                .collect()
        };

        let teams = self
            .teams
            .lock()
            .iter()
            .map(|(team, auth)| {
                (
                    *team,
                    TeamStatus {
                        allow_control: auth.allow_control,
                        packets: auth.packets,
                        preempted: preempted_for(*team),
                    },
                )
            })
            .collect();

        ControlStatus {
            teams,
            tasks: entries.into_iter().map(|e| e.task.name).collect(),
            extra_features: self.extra_features_allowed(),
        }
    }

    // ---- commands ----

    /// Authorize and forward one team command
    pub fn handle_command(
        &self,
        key: &str,
        team: &str,
        number: u8,
        command: RpcCommand,
    ) -> RpcResponse {
        let response = self.dispatch(key, team, number, command);
        if !response.ok {
            debug!("[control] refused {} {}: {}", team, number, response.message);
        }
        response
    }

    /// Execute a decoded request
    pub fn handle_request(&self, request: RpcRequest) -> RpcResponse {
        self.handle_command(&request.key, &request.team, request.number, request.command)
    }

    fn dispatch(&self, key: &str, team: &str, number: u8, command: RpcCommand) -> RpcResponse {
        let master = key == self.master_key;

        if team == BALL_TEAM {
            if !master {
                return RpcResponse::refuse("Moving the ball requires the master key");
            }
            return self.ball_command(command);
        }

        let Ok(team) = team.parse::<Team>() else {
            return RpcResponse::refuse(format!("Unknown team: {}", team));
        };
        let robot = RobotId::new(team, number);

        if !master {
            {
                let teams = self.teams.lock();
                let Some(auth) = teams.get(&team) else {
                    return RpcResponse::refuse(format!("Unknown team: {}", team));
                };
                if auth.key != key {
                    return RpcResponse::refuse(format!("Bad key for team {}", team));
                }
                if !auth.allow_control {
                    return RpcResponse::refuse(format!(
                        "You are not allowed to control the robots of team {}",
                        team
                    ));
                }
            }

            let preempting = self.task_names_for(robot);
            if !preempting.is_empty() {
                return RpcResponse::refuse(format!(
                    "Robot {} of team {} is preempted: {}",
                    number,
                    team,
                    preempting.join(", ")
                ));
            }
        }

        let Some(handle) = self.registry.get(robot) else {
            return RpcResponse::refuse(format!("Unknown robot: {}", robot));
        };

        match command {
            RpcCommand::Leds { .. } | RpcCommand::Beep { .. }
                if !master && !self.extra_features_allowed() =>
            {
                return RpcResponse::refuse("Leds and beep are not allowed now");
            }
            RpcCommand::Teleport { x, y, theta } => {
                if let Err(e) = handle.teleport(Pose::new(x, y, theta)) {
                    return RpcResponse::refuse(format!("Teleport failed: {}", e));
                }
            }
            ref other => {
                if let Some(command) = robot_command(other) {
                    handle.enqueue(command);
                }
            }
        }

        if let Some(auth) = self.teams.lock().get_mut(&team) {
            auth.packets += 1;
        }
        RpcResponse::ok()
    }

    fn ball_command(&self, command: RpcCommand) -> RpcResponse {
        let RpcCommand::Teleport { x, y, .. } = command else {
            return RpcResponse::refuse("Only teleport is supported for the ball");
        };
        match self.registry.simulator() {
            Some(sim) => {
                sim.teleport_ball(Point::new(x, y));
                RpcResponse::ok()
            }
            None => RpcResponse::refuse("Teleporting the ball requires the simulator"),
        }
    }

    // ---- scheduling ----

    /// Run one scheduling pass
    pub fn tick(&self) {
        let view = self.feed.view();
        self.recover_out_of_game(&view);

        let entries = self.tasks.lock().entries.clone();
        let available = self.registry.available();
        let ctx = TickContext {
            view: &view,
            available: &available,
            play_area: self.dims.play_area(),
        };

        let tasks: Vec<&ControlTask> = entries.iter().map(|e| &e.task).collect();
        let robots: Vec<RobotId> = RobotId::all().collect();
        for (robot, index) in schedule(&tasks, &robots) {
            if let Some(handle) = self.registry.get(robot) {
                handle.enqueue(tasks[index].tick(robot, &ctx));
            }
        }

        let mut finished = HashSet::new();
        for entry in &entries {
            if entry.task.finished(&ctx) {
                for (robot, command) in entry.task.on_finished(&ctx) {
                    if let Some(handle) = self.registry.get(robot) {
                        handle.enqueue(command);
                    }
                }
                finished.insert(entry.id);
            }
        }

        if !finished.is_empty() {
            // By id: a task replaced since the snapshot is kept
            self.tasks
                .lock()
                .entries
                .retain(|e| !finished.contains(&e.id));
        }

        self.restore_leds();
    }

    /// Send robots seen well outside the field back to the center. Once a
    /// robot is back, its recovery task becomes a one-shot stop.
    fn recover_out_of_game(&self, view: &FieldView) {
        let area = self.dims.rect(OUT_OF_GAME_MARGIN);
        for robot in RobotId::all() {
            let Some(pose) = view.pose(robot) else {
                continue;
            };
            let name = out_of_game_task_name(robot);
            if !area.contains(pose.position()) {
                if !self.has_task(&name) {
                    info!("[control] {} is out of the game, bringing it back", robot);
                }
                self.add_task(
                    ControlTask::go_to(name, robot, Pose::new(0.0, 0.0, 0.0))
                        .with_priority(PRIORITY_RECOVERY),
                );
            } else if self.has_task(&name) {
                self.add_task(
                    ControlTask::stop_one(name, robot, false).with_priority(PRIORITY_RECOVERY),
                );
            }
        }
    }

    /// Set the team color again on robots whose LEDs were overridden
    fn restore_leds(&self) {
        for handle in self.registry.handles() {
            let Some(id) = handle.identity() else {
                continue;
            };
            if handle.take_leds_dirty() {
                let (r, g, b) = team_color(id.team);
                handle.enqueue(RobotCommand::Leds { r, g, b });
            }
        }
    }

    /// Spawn the tick loop
    pub fn start(self: &Arc<Self>) -> io::Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let control = Arc::clone(self);
        let thread = std::thread::Builder::new()
            .name("pitchside-control".into())
            .spawn(move || {
                while control.running.load(Ordering::SeqCst) {
                    control.tick();
                    std::thread::sleep(control.tick_period);
                }
            })?;

        *self.thread.lock() = Some(thread);
        info!("[control] scheduler started ({:?} tick)", self.tick_period);
        Ok(())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.lock().take() {
            let _ = thread.join();
        }
    }
}

/// Robot LED color of a team
pub fn team_color(team: Team) -> (u8, u8, u8) {
    match team {
        Team::Green => (0, 255, 0),
        Team::Blue => (0, 0, 255),
    }
}

/// Wire command for an RPC command; teleport never reaches the robot
fn robot_command(command: &RpcCommand) -> Option<RobotCommand> {
    match *command {
        RpcCommand::Kick { power } => Some(RobotCommand::kick(power)),
        RpcCommand::Control { dx, dy, dturn } => Some(RobotCommand::control(dx, dy, dturn)),
        RpcCommand::Leds { r, g, b } => Some(RobotCommand::Leds { r, g, b }),
        RpcCommand::Beep {
            frequency,
            duration,
        } => Some(RobotCommand::Beep {
            frequency,
            duration,
        }),
        RpcCommand::Teleport { .. } => None,
    }
}

/// Which task drives each robot this tick.
///
/// Returns `(robot, task index)` for every robot targeted by at least one
/// task. Tasks are ranked by descending priority; the sort is stable so
/// ties go to the earliest added.
pub fn schedule<T: Borrow<ControlTask>>(tasks: &[T], robots: &[RobotId]) -> Vec<(RobotId, usize)> {
    let mut order: Vec<usize> = (0..tasks.len()).collect();
    order.sort_by_key(|i| Reverse(tasks[*i].borrow().priority));

    robots
        .iter()
        .filter_map(|robot| {
            order
                .iter()
                .find(|i| tasks[**i].borrow().targets(*robot))
                .map(|i| (*robot, *i))
        })
        .collect()
}
