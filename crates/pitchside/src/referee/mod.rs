// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Referee
//!
//! Consumes the position feed and drives the match:
//!
//! ```text
//! NotStarted ─start─► Paused(game start) ─ball at center 1 s─► Running
//!                          ▲                                   │  ▲
//!                          │                    goal, sideline │  │ ball at
//!                          │                    manual pause   ▼  │ wait position
//!                     HalfTime ◄──── first half over ───── Paused(reason)
//! ```
//!
//! All match state lives behind one lock. Task changes for [`Control`] are
//! collected while the lock is held and applied once it is released. An
//! outer `apply` lock spans both steps so task changes land in the same
//! order as the state changes that produced them. Lock order: apply, then
//! state; the state lock is never held while calling into [`Control`].

pub mod penalty;
pub mod rules;
pub mod state;

pub use penalty::Penalties;
pub use rules::Crossing;
pub use state::{GameEvent, GameSnapshot, History, PauseReason, PenaltySnapshot, Phase, TeamSnapshot};

use std::collections::BTreeMap;
use std::f64::consts::FRAC_PI_2;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::RefereeConfig;
use crate::control::task::{PRIORITY_PAUSE, PRIORITY_PENALTY, STALE_POSITION};
use crate::control::{Control, ControlTask};
use crate::feed::FieldView;
use crate::field::{FieldDimensions, Point, Pose, RobotId, Team, PLACE_BALL_MARGIN};

use rules::TimedCircle;

/// Holds every robot while the game is paused or at half-time
pub const PAUSE_TASK: &str = "referee-pause";

/// Kickoff and operator placements
pub const PLACEMENT_TASK: &str = "referee-placement";

/// Prefix of the per-robot penalty tasks
pub const PENALTY_TASK_PREFIX: &str = "penalty-";

/// Name of the task holding `robot` on its penalty spot
pub fn penalty_task_name(robot: RobotId) -> String {
    format!("{}{}", PENALTY_TASK_PREFIX, robot)
}

/// Change requested from [`Control`]
#[derive(Debug)]
enum Effect {
    AddTask(ControlTask),
    RemoveTask(String),
    RemoveTasksWithPrefix(&'static str),
    ExtraFeatures(bool),
}

#[derive(Debug, Clone)]
struct TeamState {
    name: String,
    score: u32,
    x_positive: bool,
}

#[derive(Debug, Clone, Copy)]
struct WaitBall {
    target: Point,
    /// Uptime at which the ball was first seen at the target
    since: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
struct PendingGoal {
    scorer: Team,
    at: Point,
}

struct MatchState {
    phase: Phase,
    /// Seconds left on the current clock
    timer: f64,
    first_half: bool,
    /// Seconds of play since the game started
    match_time: f64,
    /// Seconds since the referee started stepping
    uptime: f64,
    last_step: Option<Instant>,
    teams: BTreeMap<Team, TeamState>,
    history: History,
    wait_ball: Option<WaitBall>,
    pending_goal: Option<PendingGoal>,
    last_ball: Option<Point>,
    /// Cleared by a crossing, set again once the ball is back in the safe area
    armed: bool,
    penalties: Penalties,
    circle: TimedCircle,
    effects: Vec<Effect>,
}

impl MatchState {
    fn new(config: &RefereeConfig) -> Self {
        let teams = Team::ALL
            .iter()
            .map(|team| {
                (
                    *team,
                    TeamState {
                        name: team.as_str().to_string(),
                        score: 0,
                        x_positive: *team == Team::Green,
                    },
                )
            })
            .collect();

        Self {
            phase: Phase::NotStarted,
            timer: config.game_duration_secs,
            first_half: true,
            match_time: 0.0,
            uptime: 0.0,
            last_step: None,
            teams,
            history: History::new(config.history_size),
            wait_ball: None,
            pending_goal: None,
            last_ball: None,
            armed: true,
            penalties: Penalties::new(),
            circle: TimedCircle::default(),
            effects: Vec::new(),
        }
    }

    fn snapshot(&self) -> GameSnapshot {
        GameSnapshot {
            phase: self.phase,
            timer: self.timer.max(0.0),
            first_half: self.first_half,
            teams: self
                .teams
                .iter()
                .map(|(team, t)| {
                    (
                        *team,
                        TeamSnapshot {
                            name: t.name.clone(),
                            score: t.score,
                            x_positive: t.x_positive,
                        },
                    )
                })
                .collect(),
            history: self.history.events(),
            wait_ball_position: self.wait_ball.map(|w| w.target),
            pending_goal: self.pending_goal.map(|g| g.scorer),
            penalties: self.penalties.snapshot(),
        }
    }

    fn event(&mut self, message: String) {
        info!("[referee] {}", message);
        self.history.push(self.match_time, message);
    }

    fn team_name(&self, team: Team) -> String {
        self.teams
            .get(&team)
            .map(|t| t.name.clone())
            .unwrap_or_else(|| team.to_string())
    }

    fn x_positive(&self, team: Team) -> bool {
        self.teams.get(&team).is_some_and(|t| t.x_positive)
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            debug!("[referee] phase {} -> {}", self.phase, phase);
        }
        self.phase = phase;
        match phase {
            Phase::Paused(_) | Phase::HalfTime => self.effects.push(Effect::AddTask(
                ControlTask::stop_all(PAUSE_TASK, true).with_priority(PRIORITY_PAUSE),
            )),
            Phase::Running => {
                self.effects.push(Effect::RemoveTask(PAUSE_TASK.into()));
                self.effects.push(Effect::RemoveTask(PLACEMENT_TASK.into()));
            }
            Phase::NotStarted => {
                self.effects.push(Effect::RemoveTask(PAUSE_TASK.into()));
                self.effects.push(Effect::RemoveTask(PLACEMENT_TASK.into()));
                self.effects
                    .push(Effect::RemoveTasksWithPrefix(PENALTY_TASK_PREFIX));
            }
        }
    }

    fn arm_wait(&mut self, target: Point) {
        self.wait_ball = Some(WaitBall {
            target,
            since: None,
        });
    }

    fn kickoff_configuration(&self) -> &'static str {
        if self.x_positive(Team::Green) {
            "game_green_positive"
        } else {
            "game_blue_positive"
        }
    }

    fn place(&mut self, configuration: &str, dims: &FieldDimensions) -> bool {
        let configuration = if configuration == "game" {
            self.kickoff_configuration()
        } else {
            configuration
        };
        match ControlTask::go_to_configuration(PLACEMENT_TASK, configuration, dims) {
            Some(task) => {
                info!("[referee] placing robots: {}", configuration);
                self.effects.push(Effect::AddTask(task));
                true
            }
            None => false,
        }
    }

    fn reset_penalties(&mut self) {
        self.penalties.reset();
        self.circle.clear();
        self.effects
            .push(Effect::RemoveTasksWithPrefix(PENALTY_TASK_PREFIX));
    }

    fn start_game(&mut self, config: &RefereeConfig) {
        for team in self.teams.values_mut() {
            team.score = 0;
        }
        self.history.clear();
        self.reset_penalties();
        self.timer = config.game_duration_secs;
        self.first_half = true;
        self.match_time = 0.0;
        self.pending_goal = None;
        self.armed = true;
        self.arm_wait(Point::ORIGIN);
        self.set_phase(Phase::Paused(PauseReason::GameStart));
        self.effects.push(Effect::ExtraFeatures(false));
        self.event("Game started".into());
    }

    fn stop_game(&mut self) {
        self.wait_ball = None;
        self.pending_goal = None;
        self.penalties.reset();
        self.circle.clear();
        self.set_phase(Phase::NotStarted);
        self.effects.push(Effect::ExtraFeatures(true));
        self.event("Game stopped".into());
    }

    /// Detection stays disarmed until the ball is back in the safe area
    fn resume(&mut self, message: &str) {
        self.wait_ball = None;
        self.pending_goal = None;
        self.set_phase(Phase::Running);
        self.event(message.into());
    }

    fn end_half(&mut self, config: &RefereeConfig) {
        self.wait_ball = None;
        self.pending_goal = None;
        if self.first_half {
            self.timer = config.halftime_duration_secs;
            self.set_phase(Phase::HalfTime);
            self.event("Half time".into());
        } else {
            self.timer = 0.0;
            self.event("Game over".into());
            self.stop_game();
        }
    }

    fn start_second_half(&mut self, config: &RefereeConfig, dims: &FieldDimensions) {
        self.first_half = false;
        self.timer = config.game_duration_secs;
        self.swap_sides();
        self.place("game", dims);
        self.armed = true;
        self.arm_wait(Point::ORIGIN);
        self.set_phase(Phase::Paused(PauseReason::GameStart));
        self.event("Second half".into());
    }

    fn swap_sides(&mut self) {
        for team in self.teams.values_mut() {
            team.x_positive = !team.x_positive;
        }
    }

    fn penalize(
        &mut self,
        robot: RobotId,
        seconds: f64,
        reason: &str,
        view: &FieldView,
        env: &Env,
    ) {
        let position = view.pose(robot).map(|p| p.position());
        let others: Vec<Point> = RobotId::all()
            .filter(|id| *id != robot)
            .filter_map(|id| view.pose(id).map(|p| p.position()))
            .collect();
        let spot = self.penalties.assign_spot(
            &env.dims,
            position,
            &others,
            self.uptime,
            env.config.spot_lock_secs,
        );

        self.penalties.penalize(robot, seconds, reason, spot);
        self.circle.forget(robot);

        // Face the field from the sideline
        let theta = if spot.y > 0.0 { -FRAC_PI_2 } else { FRAC_PI_2 };
        let task = ControlTask::go_to(penalty_task_name(robot), robot, Pose::new(spot.x, spot.y, theta))
            .with_priority(PRIORITY_PENALTY)
            .forever();
        self.effects.push(Effect::AddTask(task));
        self.event(format!("Penalty for {} ({})", robot, reason));
    }

    fn cancel_penalty(&mut self, robot: RobotId) -> bool {
        if !self.penalties.cancel(robot) {
            return false;
        }
        self.effects
            .push(Effect::RemoveTask(penalty_task_name(robot)));
        self.event(format!("Penalty of {} cancelled", robot));
        true
    }

    fn validate_goal(&mut self, dims: &FieldDimensions) -> bool {
        let Some(goal) = self.pending_goal.take() else {
            return false;
        };
        self.place("game", dims);
        self.arm_wait(Point::ORIGIN);
        self.set_phase(Phase::Paused(PauseReason::GameStart));
        let name = self.team_name(goal.scorer);
        self.event(format!("Goal for {} validated", name));
        true
    }

    fn cancel_goal(&mut self, dims: &FieldDimensions) -> bool {
        let Some(goal) = self.pending_goal.take() else {
            return false;
        };
        if let Some(team) = self.teams.get_mut(&goal.scorer) {
            team.score = team.score.saturating_sub(1);
        }
        self.arm_wait(dims.nearest_dot(goal.at));
        let name = self.team_name(goal.scorer);
        self.event(format!("Goal for {} cancelled", name));
        true
    }

    fn step(&mut self, view: &FieldView, dt: f64, env: &Env) {
        self.uptime += dt;

        for robot in self.penalties.tick(dt, env.config.grace_secs) {
            self.effects
                .push(Effect::RemoveTask(penalty_task_name(robot)));
            self.event(format!("Penalty of {} is over", robot));
        }

        match self.phase {
            Phase::NotStarted => {}
            Phase::Running => {
                self.timer -= dt;
                self.match_time += dt;
                if self.timer <= 0.0 {
                    self.end_half(&env.config);
                } else {
                    self.check_ball(view, &env.dims);
                    if self.phase.is_running() {
                        self.check_rules(view, env);
                    }
                }
            }
            Phase::Paused(_) => self.check_wait(view, &env.config),
            Phase::HalfTime => {
                self.timer -= dt;
                if self.timer <= 0.0 {
                    self.start_second_half(&env.config, &env.dims);
                }
            }
        }

        if let Some(ball) = view.ball {
            if !self.armed && rules::ball_in_safe_area(&env.dims, ball) {
                self.armed = true;
            }
            self.last_ball = Some(ball);
        }
    }

    fn check_ball(&mut self, view: &FieldView, dims: &FieldDimensions) {
        let (Some(from), Some(to)) = (self.last_ball, view.ball) else {
            return;
        };
        if from == to || !self.armed {
            return;
        }

        match rules::ball_crossing(dims, from, to) {
            Some(Crossing::Goal { x_positive, at }) => {
                let defender = Team::ALL
                    .into_iter()
                    .find(|t| self.x_positive(*t) == x_positive)
                    .unwrap_or(Team::Green);
                let scorer = defender.other();
                if let Some(team) = self.teams.get_mut(&scorer) {
                    team.score += 1;
                }
                self.armed = false;
                self.wait_ball = None;
                self.pending_goal = Some(PendingGoal { scorer, at });
                self.set_phase(Phase::Paused(PauseReason::Goal));
                let name = self.team_name(scorer);
                self.event(format!("Goal for {}", name));
            }
            Some(Crossing::Sideline { at }) => {
                self.armed = false;
                self.arm_wait(dims.nearest_dot(at));
                self.set_phase(Phase::Paused(PauseReason::SidelineCrossed));
                self.event("Ball left the field".into());
            }
            None => {}
        }
    }

    fn check_rules(&mut self, view: &FieldView, env: &Env) {
        let positions: BTreeMap<RobotId, Point> = RobotId::all()
            .filter_map(|id| view.fresh_pose(id, STALE_POSITION).map(|p| (id, p.position())))
            .collect();

        let mut offenders: Vec<(RobotId, &'static str)> = Vec::new();
        for (id, position) in &positions {
            if !self.penalties.can_penalize(*id) {
                self.circle.forget(*id);
                continue;
            }
            if let Some(ball) = view.ball {
                if self.circle.update(*id, *position, ball, self.uptime, env.config.timed_circle_secs) {
                    offenders.push((*id, "ball abuse"));
                    continue;
                }
            }
            if rules::in_opponent_defense_area(&env.dims, *position, self.x_positive(id.team)) {
                offenders.push((*id, "opponent defense area"));
            }
        }

        for team in Team::ALL {
            let x_positive = self.x_positive(team);
            if let Some(id) = rules::crowded_defense(&env.dims, team, x_positive, &positions) {
                if self.penalties.can_penalize(id) && !offenders.iter().any(|(o, _)| *o == id) {
                    offenders.push((id, "defense area crowding"));
                }
            }
        }

        for (id, reason) in offenders {
            self.penalize(id, env.config.penalty_secs, reason, view, env);
        }
    }

    fn check_wait(&mut self, view: &FieldView, config: &RefereeConfig) {
        let (Some(mut wait), Some(ball)) = (self.wait_ball, view.ball) else {
            return;
        };

        if ball.distance(wait.target) > PLACE_BALL_MARGIN {
            wait.since = None;
            self.wait_ball = Some(wait);
            return;
        }

        let since = *wait.since.get_or_insert(self.uptime);
        self.wait_ball = Some(wait);
        if self.uptime - since >= config.resume_hold_secs {
            self.resume("Game resumed");
        }
    }
}

/// Fixed inputs of every referee decision
struct Env {
    dims: FieldDimensions,
    config: RefereeConfig,
}

/// Match state machine
pub struct Referee {
    control: Arc<Control>,
    env: Env,
    /// Serializes mutation plus effect application
    apply: Mutex<()>,
    state: Mutex<MatchState>,
    running: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Referee {
    pub fn new(control: Arc<Control>, config: RefereeConfig) -> Self {
        let dims = control.dimensions().clone();
        Self {
            state: Mutex::new(MatchState::new(&config)),
            env: Env { dims, config },
            apply: Mutex::new(()),
            control,
            running: AtomicBool::new(false),
            thread: Mutex::new(None),
        }
    }

    pub fn control(&self) -> &Arc<Control> {
        &self.control
    }

    /// Mutate the state under its lock, then apply task changes and publish
    fn with_state<R>(&self, f: impl FnOnce(&mut MatchState, &Env) -> R) -> R {
        let _apply = self.apply.lock();
        let (result, effects, snapshot) = {
            let mut state = self.state.lock();
            let result = f(&mut *state, &self.env);
            let effects = std::mem::take(&mut state.effects);
            (result, effects, state.snapshot())
        };

        for effect in effects {
            match effect {
                Effect::AddTask(task) => self.control.add_task(task),
                Effect::RemoveTask(name) => {
                    self.control.remove_task(&name);
                }
                Effect::RemoveTasksWithPrefix(prefix) => {
                    self.control.remove_tasks_with_prefix(prefix)
                }
                Effect::ExtraFeatures(allowed) => self.control.set_extra_features_allowed(allowed),
            }
        }
        self.control.feed().set_referee(snapshot);
        result
    }

    pub fn snapshot(&self) -> GameSnapshot {
        self.state.lock().snapshot()
    }

    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    pub fn score(&self, team: Team) -> u32 {
        self.state.lock().teams.get(&team).map_or(0, |t| t.score)
    }

    /// Advance the match to `now` using the latest feed frame
    pub fn step(&self, now: Instant) {
        let view = self.control.feed().view();
        self.with_state(|state, env| {
            let dt = state
                .last_step
                .map_or(0.0, |last| now.saturating_duration_since(last).as_secs_f64());
            state.last_step = Some(now);
            state.step(&view, dt, env);
        });
    }

    // ---- operator surface ----

    pub fn start_game(&self) {
        self.with_state(|state, env| state.start_game(&env.config));
    }

    /// Returns false unless the game was running
    pub fn pause_game(&self) -> bool {
        self.with_state(|state, _| {
            if !state.phase.is_running() {
                return false;
            }
            state.set_phase(Phase::Paused(PauseReason::Manual));
            state.event("Game paused".into());
            true
        })
    }

    /// Resume a paused game without waiting for the ball
    pub fn resume_game(&self) -> bool {
        self.with_state(|state, _| {
            if !matches!(state.phase, Phase::Paused(_)) {
                return false;
            }
            state.resume("Game resumed by the operator");
            true
        })
    }

    pub fn stop_game(&self) {
        self.with_state(|state, _| state.stop_game());
    }

    /// End the half-time break early
    pub fn start_second_half(&self) -> bool {
        self.with_state(|state, env| {
            if state.phase != Phase::HalfTime {
                return false;
            }
            state.start_second_half(&env.config, &env.dims);
            true
        })
    }

    pub fn set_team_name(&self, team: Team, name: impl Into<String>) {
        let name = name.into();
        self.with_state(|state, _| {
            if let Some(t) = state.teams.get_mut(&team) {
                t.name = name;
            }
        });
    }

    pub fn set_team_key(&self, team: Team, key: impl Into<String>) {
        self.control.set_team_key(team, key);
    }

    pub fn enable_team_control(&self, team: Team, allow: bool) {
        self.control.allow_team_control(team, allow);
    }

    /// Make `team` defend the positive X goal (or not); the other team
    /// takes the opposite side
    pub fn set_team_side(&self, team: Team, x_positive: bool) {
        self.with_state(|state, _| {
            for (t, s) in state.teams.iter_mut() {
                s.x_positive = if *t == team { x_positive } else { !x_positive };
            }
        });
    }

    /// Swap sides and place the kickoff configuration for the new sides
    pub fn swap_sides(&self) {
        self.with_state(|state, env| {
            state.swap_sides();
            state.place("game", &env.dims);
            state.event("Sides swapped".into());
        });
    }

    /// Send the robots to a named configuration. `"game"` resolves to the
    /// kickoff configuration for the current sides.
    pub fn place_game(&self, configuration: &str) -> bool {
        self.with_state(|state, env| state.place(configuration, &env.dims))
    }

    /// Penalize a robot; `None` uses the configured duration
    pub fn add_penalty(&self, robot: RobotId, seconds: Option<f64>, reason: &str) {
        let view = self.control.feed().view();
        self.with_state(|state, env| {
            let seconds = seconds.unwrap_or(env.config.penalty_secs);
            state.penalize(robot, seconds, reason, &view, env);
        });
    }

    pub fn cancel_penalty(&self, robot: RobotId) -> bool {
        self.with_state(|state, _| state.cancel_penalty(robot))
    }

    /// Confirm the pending goal; robots go back to kickoff
    pub fn validate_goal(&self) -> bool {
        self.with_state(|state, env| state.validate_goal(&env.dims))
    }

    /// Reject the pending goal and revert the score
    pub fn cancel_goal(&self) -> bool {
        self.with_state(|state, env| state.cancel_goal(&env.dims))
    }

    // ---- loop ----

    pub fn start(self: &Arc<Self>) -> io::Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let referee = Arc::clone(self);
        let period = self.env.config.tick_period();
        let thread = std::thread::Builder::new()
            .name("pitchside-referee".into())
            .spawn(move || {
                while referee.running.load(Ordering::SeqCst) {
                    referee.step(Instant::now());
                    std::thread::sleep(period);
                }
            })?;

        *self.thread.lock() = Some(thread);
        info!("[referee] started");
        Ok(())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.lock().take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ControlConfig, SerialConfig};
    use crate::feed::PositionFeed;
    use crate::registry::RobotRegistry;
    use std::time::Duration;

    const G1: RobotId = RobotId::new(Team::Green, 1);
    const G2: RobotId = RobotId::new(Team::Green, 2);

    fn referee() -> Referee {
        let registry = Arc::new(RobotRegistry::new(SerialConfig::default()));
        let control = Arc::new(Control::new(
            registry,
            Arc::new(PositionFeed::new()),
            FieldDimensions::default(),
            &ControlConfig::default(),
        ));
        Referee::new(control, RefereeConfig::default())
    }

    fn ms(t0: Instant, ms: u64) -> Instant {
        t0 + Duration::from_millis(ms)
    }

    #[test]
    fn test_start_waits_for_ball_at_center() {
        let referee = referee();
        let feed = referee.control().feed().clone();
        let t0 = Instant::now();

        referee.start_game();
        assert_eq!(referee.phase(), Phase::Paused(PauseReason::GameStart));
        assert!(referee.control().has_task(PAUSE_TASK));
        assert!(!referee.control().extra_features_allowed());

        feed.set_ball(Some(Point::new(0.01, 0.0)));
        referee.step(t0);
        referee.step(ms(t0, 500));
        assert_eq!(referee.phase(), Phase::Paused(PauseReason::GameStart));

        // Ball moved away: the hold restarts
        feed.set_ball(Some(Point::new(0.3, 0.0)));
        referee.step(ms(t0, 900));
        feed.set_ball(Some(Point::ORIGIN));
        referee.step(ms(t0, 1000));
        referee.step(ms(t0, 1800));
        assert_eq!(referee.phase(), Phase::Paused(PauseReason::GameStart));

        referee.step(ms(t0, 2100));
        assert_eq!(referee.phase(), Phase::Running);
        assert!(!referee.control().has_task(PAUSE_TASK));
    }

    #[test]
    fn test_sideline_arms_nearest_dot() {
        let referee = referee();
        let feed = referee.control().feed().clone();
        let t0 = Instant::now();

        referee.start_game();
        referee.resume_game();
        feed.set_ball(Some(Point::new(0.3, 0.55)));
        referee.step(t0);
        feed.set_ball(Some(Point::new(0.35, 0.7)));
        referee.step(ms(t0, 10));

        let snapshot = referee.snapshot();
        assert_eq!(snapshot.phase, Phase::Paused(PauseReason::SidelineCrossed));
        assert_eq!(snapshot.wait_ball_position, Some(Point::new(0.45, 0.305)));
    }

    #[test]
    fn test_goal_validation_and_cancel() {
        let referee = referee();
        let feed = referee.control().feed().clone();
        let t0 = Instant::now();

        referee.start_game();
        referee.resume_game();
        feed.set_ball(Some(Point::new(-0.85, 0.1)));
        referee.step(t0);
        feed.set_ball(Some(Point::new(-0.95, 0.1)));
        referee.step(ms(t0, 10));

        // Blue defends -X: green scores
        assert_eq!(referee.score(Team::Green), 1);
        assert_eq!(referee.snapshot().pending_goal, Some(Team::Green));

        assert!(referee.cancel_goal());
        assert_eq!(referee.score(Team::Green), 0);
        assert_eq!(
            referee.snapshot().wait_ball_position,
            Some(Point::new(-0.45, 0.305))
        );
        assert!(!referee.validate_goal());
    }

    #[test]
    fn test_validate_goal_places_kickoff() {
        let referee = referee();
        let feed = referee.control().feed().clone();
        let t0 = Instant::now();

        referee.start_game();
        referee.resume_game();
        feed.set_ball(Some(Point::new(0.85, 0.0)));
        referee.step(t0);
        feed.set_ball(Some(Point::new(0.95, 0.0)));
        referee.step(ms(t0, 10));
        assert_eq!(referee.score(Team::Blue), 1);

        assert!(referee.validate_goal());
        let snapshot = referee.snapshot();
        assert_eq!(snapshot.phase, Phase::Paused(PauseReason::GameStart));
        assert_eq!(snapshot.wait_ball_position, Some(Point::ORIGIN));
        assert_eq!(snapshot.teams[&Team::Blue].score, 1);
        assert!(referee.control().has_task(PLACEMENT_TASK));
    }

    #[test]
    fn test_penalty_lifecycle() {
        let referee = referee();
        let control = referee.control().clone();
        let t0 = Instant::now();

        referee.start_game();
        referee.add_penalty(G1, Some(1.0), "manual");
        let task = penalty_task_name(G1);
        assert!(control.has_task(&task));
        assert_eq!(control.task_names_for(G1), vec![PAUSE_TASK.to_string(), task.clone()]);

        referee.step(t0);
        referee.step(ms(t0, 1100));
        assert!(!control.has_task(&task));
        let penalty = &referee.snapshot().penalties[&G1];
        assert_eq!(penalty.remaining, None);
        assert!(penalty.grace.is_some());

        referee.add_penalty(G2, None, "manual");
        assert!(referee.cancel_penalty(G2));
        assert!(!control.has_task(&penalty_task_name(G2)));
    }

    #[test]
    fn test_opponent_defense_area_is_penalized() {
        let referee = referee();
        let feed = referee.control().feed().clone();
        let t0 = Instant::now();

        referee.start_game();
        referee.resume_game();
        // Green defends +X; -X is the blue defense area
        feed.set_robot(G1, Pose::new(-0.85, 0.0, 0.0));
        referee.step(t0);

        let snapshot = referee.snapshot();
        assert_eq!(
            snapshot.penalties[&G1].reason.as_deref(),
            Some("opponent defense area")
        );
        assert!(referee.control().has_task(&penalty_task_name(G1)));
    }

    #[test]
    fn test_half_time_swaps_sides() {
        let registry = Arc::new(RobotRegistry::new(SerialConfig::default()));
        let control = Arc::new(Control::new(
            registry,
            Arc::new(PositionFeed::new()),
            FieldDimensions::default(),
            &ControlConfig::default(),
        ));
        let config = RefereeConfig {
            game_duration_secs: 1.0,
            halftime_duration_secs: 1.0,
            ..RefereeConfig::default()
        };
        let referee = Referee::new(control, config);
        let t0 = Instant::now();

        referee.start_game();
        referee.resume_game();
        referee.step(t0);
        referee.step(ms(t0, 1100));
        assert_eq!(referee.phase(), Phase::HalfTime);

        referee.step(ms(t0, 2200));
        let snapshot = referee.snapshot();
        assert_eq!(snapshot.phase, Phase::Paused(PauseReason::GameStart));
        assert!(!snapshot.first_half);
        assert!(!snapshot.teams[&Team::Green].x_positive);
        assert!(snapshot.teams[&Team::Blue].x_positive);

        referee.resume_game();
        referee.step(ms(t0, 2300));
        referee.step(ms(t0, 3400));
        assert_eq!(referee.phase(), Phase::NotStarted);
        assert!(referee.control().extra_features_allowed());
    }

    #[test]
    fn test_snapshot_is_published() {
        let referee = referee();
        referee.start_game();
        let published = referee.control().feed().view().referee;
        assert_eq!(published, Some(referee.snapshot()));
        assert_eq!(referee.snapshot().history[0].message, "Game started");
    }

    #[test]
    fn test_concurrent_pause_and_resume_keep_tasks_consistent() {
        let referee = Arc::new(referee());
        referee.start_game();
        referee.resume_game();

        let pauser = {
            let referee = referee.clone();
            std::thread::spawn(move || {
                for _ in 0..500 {
                    referee.pause_game();
                }
            })
        };
        let resumer = {
            let referee = referee.clone();
            std::thread::spawn(move || {
                for _ in 0..500 {
                    referee.resume_game();
                }
            })
        };
        pauser.join().unwrap();
        resumer.join().unwrap();

        let paused = matches!(referee.phase(), Phase::Paused(_));
        assert_eq!(referee.control().has_task(PAUSE_TASK), paused);

        // One more transition each way stays in sync
        referee.resume_game();
        assert!(!referee.control().has_task(PAUSE_TASK));
        assert!(referee.pause_game());
        assert!(referee.control().has_task(PAUSE_TASK));
    }
}
