// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Match phase and the snapshot published with every feed frame.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::field::{Point, RobotId, Team};

/// Why the game is paused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    /// Kickoff pending, at game start or after a goal
    GameStart,
    Goal,
    SidelineCrossed,
    Manual,
}

impl fmt::Display for PauseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            PauseReason::GameStart => "game start",
            PauseReason::Goal => "goal",
            PauseReason::SidelineCrossed => "sideline crossed",
            PauseReason::Manual => "manually paused",
        };
        f.write_str(text)
    }
}

/// Match phase. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    NotStarted,
    Paused(PauseReason),
    Running,
    HalfTime,
}

impl Phase {
    pub fn is_running(&self) -> bool {
        matches!(self, Phase::Running)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::NotStarted => f.write_str("not started"),
            Phase::Paused(reason) => write!(f, "paused ({})", reason),
            Phase::Running => f.write_str("running"),
            Phase::HalfTime => f.write_str("half time"),
        }
    }
}

/// One entry of the event history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameEvent {
    /// Elapsed match clock, seconds
    pub time: f64,
    pub message: String,
}

/// Ring buffer keeping the most recent events
#[derive(Debug, Clone)]
pub struct History {
    events: VecDeque<GameEvent>,
    capacity: usize,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, time: f64, message: impl Into<String>) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(GameEvent {
            time,
            message: message.into(),
        });
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Oldest first
    pub fn events(&self) -> Vec<GameEvent> {
        self.events.iter().cloned().collect()
    }
}

/// Public state of a team
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamSnapshot {
    pub name: String,
    pub score: u32,
    /// Defends the goal on the positive X side
    pub x_positive: bool,
}

/// Public penalty state of a robot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PenaltySnapshot {
    /// Seconds left, if penalized
    pub remaining: Option<f64>,
    pub reason: Option<String>,
    /// Seconds left before the robot can be penalized again
    pub grace: Option<f64>,
}

/// Consistent copy of the referee state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub phase: Phase,
    /// Seconds left on the current clock (half or half-time)
    pub timer: f64,
    pub first_half: bool,
    pub teams: BTreeMap<Team, TeamSnapshot>,
    pub history: Vec<GameEvent>,
    /// Where the ball must rest before play resumes
    pub wait_ball_position: Option<Point>,
    /// Team whose goal awaits operator validation
    pub pending_goal: Option<Team>,
    pub penalties: BTreeMap<RobotId, PenaltySnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_keeps_most_recent() {
        let mut history = History::new(3);
        for i in 0..5 {
            history.push(i as f64, format!("event {}", i));
        }
        let events = history.events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].message, "event 2");
        assert_eq!(events[2].time, 4.0);
    }

    #[test]
    fn test_phase_json() {
        let paused = serde_json::to_value(Phase::Paused(PauseReason::Goal)).unwrap();
        assert_eq!(paused, serde_json::json!({"paused": "goal"}));
        let running = serde_json::to_value(Phase::Running).unwrap();
        assert_eq!(running, serde_json::json!("running"));
        assert_eq!(Phase::Paused(PauseReason::Manual).to_string(), "paused (manually paused)");
    }
}
