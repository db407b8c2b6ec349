// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test code readability

//! Referee integration tests: goals, hysteresis and preemption of teams.

use std::sync::Arc;
use std::time::{Duration, Instant};

use pitchside::config::{ControlConfig, RefereeConfig, SerialConfig};
use pitchside::control::RpcCommand;
use pitchside::field::{FieldDimensions, Point, Pose};
use pitchside::referee::{penalty_task_name, PauseReason, PAUSE_TASK};
use pitchside::{Control, Phase, PositionFeed, Referee, RobotId, RobotRegistry, Simulator, Team, TransportAddress};

fn referee_on(dims: FieldDimensions) -> Referee {
    let sim = Arc::new(Simulator::new(dims.clone()));
    let registry = RobotRegistry::new(SerialConfig::default()).with_simulator(sim);
    for id in RobotId::all() {
        registry.add(TransportAddress::Sim(id)).unwrap();
    }
    let control = Arc::new(Control::new(
        Arc::new(registry),
        Arc::new(PositionFeed::new()),
        dims,
        &ControlConfig::default(),
    ));
    Referee::new(control, RefereeConfig::default())
}

#[test]
fn test_goal_scores_exactly_once() {
    let dims = FieldDimensions {
        length: 1.9,
        ..FieldDimensions::default()
    };
    let referee = referee_on(dims);
    let feed = referee.control().feed().clone();
    let t0 = Instant::now();
    let at = |ms: u64| t0 + Duration::from_millis(ms);

    referee.start_game();
    assert!(referee.resume_game());
    assert_eq!(referee.phase(), Phase::Running);

    feed.set_ball(Some(Point::new(0.9, 0.0)));
    referee.step(at(0));
    feed.set_ball(Some(Point::new(1.0, 0.0)));
    referee.step(at(10));

    // Green defends +X, so blue scored
    assert_eq!(referee.score(Team::Blue), 1);
    assert_eq!(referee.score(Team::Green), 0);
    assert_eq!(referee.phase(), Phase::Paused(PauseReason::Goal));

    // The ball stays in the goal
    for ms in [20, 30, 40, 1000] {
        referee.step(at(ms));
    }
    assert_eq!(referee.score(Team::Blue), 1);
}

#[test]
fn test_crossing_needs_ball_back_in_safe_area() {
    let referee = referee_on(FieldDimensions::default());
    let feed = referee.control().feed().clone();
    let t0 = Instant::now();
    let at = |ms: u64| t0 + Duration::from_millis(ms);

    referee.start_game();
    referee.resume_game();

    feed.set_ball(Some(Point::new(0.85, 0.0)));
    referee.step(at(0));
    feed.set_ball(Some(Point::new(0.95, 0.0)));
    referee.step(at(10));
    assert_eq!(referee.score(Team::Blue), 1);

    // Operator resumes while the ball is still in the goal
    assert!(referee.validate_goal());
    assert!(referee.resume_game());

    // Out of the goal and back in: same physical crossing
    feed.set_ball(Some(Point::new(0.9, 0.0)));
    referee.step(at(20));
    feed.set_ball(Some(Point::new(0.95, 0.0)));
    referee.step(at(30));
    assert_eq!(referee.score(Team::Blue), 1);
    assert_eq!(referee.phase(), Phase::Running);

    // Back to the center re-arms detection
    feed.set_ball(Some(Point::ORIGIN));
    referee.step(at(40));
    feed.set_ball(Some(Point::new(0.95, 0.0)));
    referee.step(at(50));
    assert_eq!(referee.score(Team::Blue), 2);
    assert_eq!(referee.phase(), Phase::Paused(PauseReason::Goal));
}

#[test]
fn test_penalized_robot_refuses_team_commands() {
    let referee = referee_on(FieldDimensions::default());
    let control = referee.control().clone();
    let g2 = RobotId::new(Team::Green, 2);

    referee.start_game();
    referee.resume_game();
    referee.add_penalty(g2, Some(5.0), "manual");

    let response = control.handle_command(
        "",
        "green",
        2,
        RpcCommand::Control {
            dx: 0.1,
            dy: 0.0,
            dturn: 0.0,
        },
    );
    assert!(!response.ok);
    assert!(response.message.contains(&penalty_task_name(g2)), "{}", response.message);

    let teammate = control.handle_command("", "green", 1, RpcCommand::Kick { power: 1.0 });
    assert!(teammate.ok, "{}", teammate.message);
}

fn penalty_reason(referee: &Referee, robot: RobotId) -> Option<String> {
    referee
        .snapshot()
        .penalties
        .get(&robot)
        .filter(|p| p.remaining.is_some())
        .and_then(|p| p.reason.clone())
}

#[test]
fn test_crowded_defense_penalizes_the_deeper_defender() {
    let referee = referee_on(FieldDimensions::default());
    let feed = referee.control().feed().clone();
    let g1 = RobotId::new(Team::Green, 1);
    let g2 = RobotId::new(Team::Green, 2);

    referee.start_game();
    referee.resume_game();

    // Green defends +X; g1 stands closer to its goal line
    feed.set_robot(g1, Pose::new(0.85, 0.0, 0.0));
    feed.set_robot(g2, Pose::new(0.7, 0.1, 0.0));
    referee.step(Instant::now());

    assert_eq!(penalty_reason(&referee, g1).as_deref(), Some("defense area crowding"));
    assert_eq!(penalty_reason(&referee, g2), None);
    assert!(referee.control().has_task(&penalty_task_name(g1)));
    assert!(!referee.control().has_task(&penalty_task_name(g2)));
}

#[test]
fn test_crowded_defense_tie_penalizes_higher_number() {
    let referee = referee_on(FieldDimensions::default());
    let feed = referee.control().feed().clone();
    let t0 = Instant::now();
    let g1 = RobotId::new(Team::Green, 1);
    let g2 = RobotId::new(Team::Green, 2);

    referee.start_game();
    referee.resume_game();

    feed.set_robot(g1, Pose::new(0.75, 0.2, 0.0));
    feed.set_robot(g2, Pose::new(0.75, -0.2, 0.0));
    referee.step(t0);
    referee.step(t0 + Duration::from_millis(10));

    // Exactly one penalty, and it stays on g2
    assert_eq!(penalty_reason(&referee, g2).as_deref(), Some("defense area crowding"));
    assert_eq!(penalty_reason(&referee, g1), None);
    let control = referee.control();
    assert!(control.has_task(&penalty_task_name(g2)));
    assert!(!control.has_task(&penalty_task_name(g1)));
}

#[test]
fn test_robot_holding_the_ball_is_penalized() {
    let referee = referee_on(FieldDimensions::default());
    let feed = referee.control().feed().clone();
    let t0 = Instant::now();
    let at = |ms: u64| t0 + Duration::from_millis(ms);
    let b1 = RobotId::new(Team::Blue, 1);

    referee.start_game();
    referee.resume_game();

    feed.set_ball(Some(Point::ORIGIN));
    feed.set_robot(b1, Pose::new(0.1, 0.0, 0.0));
    for ms in [0, 1000, 2000, 3000] {
        referee.step(at(ms));
    }
    assert_eq!(penalty_reason(&referee, b1), None);

    referee.step(at(3100));
    assert_eq!(penalty_reason(&referee, b1).as_deref(), Some("ball abuse"));
    assert!(referee.control().has_task(&penalty_task_name(b1)));
}

#[test]
fn test_ball_at_dot_for_one_second_resumes_play() {
    let referee = referee_on(FieldDimensions::default());
    let feed = referee.control().feed().clone();
    let t0 = Instant::now();
    let at = |ms: u64| t0 + Duration::from_millis(ms);

    referee.start_game();
    referee.resume_game();

    feed.set_ball(Some(Point::new(0.3, 0.55)));
    referee.step(at(0));
    feed.set_ball(Some(Point::new(0.35, 0.7)));
    referee.step(at(10));
    assert_eq!(referee.phase(), Phase::Paused(PauseReason::SidelineCrossed));
    assert!(referee.control().has_task(PAUSE_TASK));

    // Placed on the dot, within the placement margin
    feed.set_ball(Some(Point::new(0.46, 0.3)));
    referee.step(at(20));
    referee.step(at(520));
    assert_eq!(referee.phase(), Phase::Paused(PauseReason::SidelineCrossed));

    referee.step(at(1100));
    assert_eq!(referee.phase(), Phase::Running);
    assert!(!referee.control().has_task(PAUSE_TASK));
    assert_eq!(referee.snapshot().wait_ball_position, None);
}
