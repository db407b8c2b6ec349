// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Preemption tasks
//!
//! A task names the robots it targets, produces a command for each robot it
//! drives on a tick, and says when it is done.

use std::time::Duration;

use crate::feed::FieldView;
use crate::field::{angle_wrap, named_configuration, FieldDimensions, Point, Pose, Rect, RobotId};
use crate::protocol::RobotCommand;

/// Emergency stops and operator overrides
pub const PRIORITY_EMERGENCY: i32 = 100;

/// Robots serving a penalty
pub const PRIORITY_PENALTY: i32 = 50;

/// Placement before kickoff
pub const PRIORITY_PLACEMENT: i32 = 20;

/// Everyone stands still while the game is paused
pub const PRIORITY_PAUSE: i32 = 10;

/// Bringing robots that left the play area back to the center
pub const PRIORITY_RECOVERY: i32 = 0;

/// Position error norm (x, y, theta) under which a robot has arrived
pub const DEFAULT_TOLERANCE: f64 = 0.05;

/// Proportional gain of the goto controller
const GOTO_GAIN: f64 = 1.5;

/// Positions older than this are ignored when skipping stale positions
pub const STALE_POSITION: Duration = Duration::from_secs(1);

/// What a tick and a completion check can see
pub struct TickContext<'a> {
    pub view: &'a FieldView,
    /// Robots that are connected and identified
    pub available: &'a [RobotId],
    /// Area goto targets are clamped to
    pub play_area: Rect,
}

/// Shared interface of every task variant
pub trait TaskBehavior {
    /// Whether the task wants to drive `robot`
    fn targets(&self, robot: RobotId) -> bool;

    /// Command for a robot this task drives this tick
    fn tick(&self, robot: RobotId, ctx: &TickContext<'_>) -> RobotCommand;

    /// Whether the task can be dropped
    fn finished(&self, ctx: &TickContext<'_>) -> bool;

    /// Commands to send once the task is dropped
    fn on_finished(&self, _ctx: &TickContext<'_>) -> Vec<(RobotId, RobotCommand)> {
        Vec::new()
    }
}

/// Go-to target of one robot
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub robot: RobotId,
    pub pose: Pose,
}

/// Closed set of task variants
#[derive(Debug, Clone, PartialEq)]
pub enum TaskKind {
    /// Hold one robot still
    StopOne { robot: RobotId, forever: bool },

    /// Hold every robot still
    StopAll { forever: bool },

    /// Drive one robot to a pose
    GoToPose {
        target: Target,
        tolerance: f64,
        skip_old: bool,
        forever: bool,
    },

    /// Drive several robots to a named configuration
    GoToConfiguration {
        configuration: String,
        targets: Vec<Target>,
        tolerance: f64,
        skip_old: bool,
    },
}

/// Named, prioritized task
#[derive(Debug, Clone, PartialEq)]
pub struct ControlTask {
    pub name: String,
    pub priority: i32,
    pub kind: TaskKind,
}

impl ControlTask {
    pub fn new(name: impl Into<String>, priority: i32, kind: TaskKind) -> Self {
        Self {
            name: name.into(),
            priority,
            kind,
        }
    }

    pub fn stop_one(name: impl Into<String>, robot: RobotId, forever: bool) -> Self {
        Self::new(name, PRIORITY_EMERGENCY, TaskKind::StopOne { robot, forever })
    }

    pub fn stop_all(name: impl Into<String>, forever: bool) -> Self {
        Self::new(name, PRIORITY_EMERGENCY, TaskKind::StopAll { forever })
    }

    pub fn go_to(name: impl Into<String>, robot: RobotId, pose: Pose) -> Self {
        Self::new(
            name,
            PRIORITY_PLACEMENT,
            TaskKind::GoToPose {
                target: Target { robot, pose },
                tolerance: DEFAULT_TOLERANCE,
                skip_old: true,
                forever: false,
            },
        )
    }

    /// `None` if the configuration name is unknown
    pub fn go_to_configuration(
        name: impl Into<String>,
        configuration: &str,
        dims: &FieldDimensions,
    ) -> Option<Self> {
        let targets = named_configuration(configuration, dims)?
            .into_iter()
            .map(|(robot, pose)| Target { robot, pose })
            .collect();

        Some(Self::new(
            name,
            PRIORITY_PLACEMENT,
            TaskKind::GoToConfiguration {
                configuration: configuration.to_string(),
                targets,
                tolerance: DEFAULT_TOLERANCE,
                skip_old: true,
            },
        ))
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Keep a go-to or stop task alive after it is satisfied
    pub fn forever(mut self) -> Self {
        match &mut self.kind {
            TaskKind::StopOne { forever, .. }
            | TaskKind::StopAll { forever }
            | TaskKind::GoToPose { forever, .. } => *forever = true,
            TaskKind::GoToConfiguration { .. } => {}
        }
        self
    }

    /// Robots this task targets, out of the match roster
    pub fn robots(&self) -> Vec<RobotId> {
        RobotId::all().filter(|r| self.targets(*r)).collect()
    }
}

impl TaskBehavior for ControlTask {
    fn targets(&self, robot: RobotId) -> bool {
        self.kind.targets(robot)
    }

    fn tick(&self, robot: RobotId, ctx: &TickContext<'_>) -> RobotCommand {
        self.kind.tick(robot, ctx)
    }

    fn finished(&self, ctx: &TickContext<'_>) -> bool {
        self.kind.finished(ctx)
    }

    fn on_finished(&self, ctx: &TickContext<'_>) -> Vec<(RobotId, RobotCommand)> {
        self.kind.on_finished(ctx)
    }
}

impl TaskKind {
    fn goal(&self, robot: RobotId) -> Option<(Pose, f64, bool)> {
        match self {
            TaskKind::GoToPose {
                target,
                tolerance,
                skip_old,
                ..
            } if target.robot == robot => Some((target.pose, *tolerance, *skip_old)),
            TaskKind::GoToConfiguration {
                targets,
                tolerance,
                skip_old,
                ..
            } => targets
                .iter()
                .find(|t| t.robot == robot)
                .map(|t| (t.pose, *tolerance, *skip_old)),
            _ => None,
        }
    }

    fn goal_robots(&self) -> Vec<RobotId> {
        match self {
            TaskKind::GoToPose { target, .. } => vec![target.robot],
            TaskKind::GoToConfiguration { targets, .. } => targets.iter().map(|t| t.robot).collect(),
            _ => Vec::new(),
        }
    }
}

impl TaskBehavior for TaskKind {
    fn targets(&self, robot: RobotId) -> bool {
        match self {
            TaskKind::StopOne { robot: r, .. } => *r == robot,
            TaskKind::StopAll { .. } => true,
            TaskKind::GoToPose { target, .. } => target.robot == robot,
            TaskKind::GoToConfiguration { targets, .. } => targets.iter().any(|t| t.robot == robot),
        }
    }

    fn tick(&self, robot: RobotId, ctx: &TickContext<'_>) -> RobotCommand {
        match self.goal(robot) {
            Some((target, tolerance, skip_old)) => {
                goto_order(ctx.view, robot, target, tolerance, skip_old, ctx.play_area).1
            }
            None => RobotCommand::stop(),
        }
    }

    fn finished(&self, ctx: &TickContext<'_>) -> bool {
        match self {
            TaskKind::StopOne { forever, .. } | TaskKind::StopAll { forever } => !forever,
            TaskKind::GoToPose { forever: true, .. } => false,
            _ => self
                .goal_robots()
                .into_iter()
                .filter(|r| ctx.available.contains(r))
                .all(|robot| match self.goal(robot) {
                    Some((target, tolerance, skip_old)) => {
                        goto_order(ctx.view, robot, target, tolerance, skip_old, ctx.play_area).0
                    }
                    None => true,
                }),
        }
    }

    fn on_finished(&self, ctx: &TickContext<'_>) -> Vec<(RobotId, RobotCommand)> {
        match self {
            TaskKind::GoToConfiguration { .. } => self
                .goal_robots()
                .into_iter()
                .filter(|r| ctx.available.contains(r))
                .map(|r| (r, RobotCommand::stop()))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Proportional go-to controller.
///
/// Returns whether the robot has arrived and the robot-frame order. A robot
/// without a position (or with a stale one when `skip_old` is set) is told to
/// stop and never counts as arrived.
pub fn goto_order(
    view: &FieldView,
    robot: RobotId,
    target: Pose,
    tolerance: f64,
    skip_old: bool,
    play_area: Rect,
) -> (bool, RobotCommand) {
    let pose = if skip_old {
        view.fresh_pose(robot, STALE_POSITION)
    } else {
        view.pose(robot)
    };
    let Some(pose) = pose else {
        return (false, RobotCommand::stop());
    };

    let goal = Point::new(
        target.x.clamp(play_area.min.x, play_area.max.x),
        target.y.clamp(play_area.min.y, play_area.max.y),
    );
    let error = pose.to_local(goal);
    let error_theta = angle_wrap(target.theta - pose.theta);

    let norm = (error.x * error.x + error.y * error.y + error_theta * error_theta).sqrt();
    let order = RobotCommand::control(
        GOTO_GAIN * error.x,
        GOTO_GAIN * error.y,
        GOTO_GAIN * error_theta,
    );

    (norm < tolerance, order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::PositionFeed;
    use crate::field::Team;

    const G1: RobotId = RobotId::new(Team::Green, 1);
    const B2: RobotId = RobotId::new(Team::Blue, 2);

    fn ctx<'a>(view: &'a FieldView, available: &'a [RobotId]) -> TickContext<'a> {
        TickContext {
            view,
            available,
            play_area: FieldDimensions::default().play_area(),
        }
    }

    #[test]
    fn test_stop_tasks() {
        let view = FieldView::empty();
        let once = ControlTask::stop_one("s", G1, false);
        let held = ControlTask::stop_all("all", true);

        assert!(once.targets(G1));
        assert!(!once.targets(B2));
        assert_eq!(held.robots().len(), 4);
        assert_eq!(once.tick(G1, &ctx(&view, &[])), RobotCommand::stop());
        assert!(once.finished(&ctx(&view, &[])));
        assert!(!held.finished(&ctx(&view, &[])));
    }

    #[test]
    fn test_goto_order_in_robot_frame() {
        let feed = PositionFeed::new();
        feed.set_robot(G1, Pose::new(0.0, 0.0, std::f64::consts::FRAC_PI_2));
        let view = feed.view();

        let (arrived, order) = goto_order(
            &view,
            G1,
            Pose::new(0.0, 0.2, std::f64::consts::FRAC_PI_2),
            DEFAULT_TOLERANCE,
            true,
            FieldDimensions::default().play_area(),
        );
        assert!(!arrived);
        // Target straight ahead: forward speed only
        assert_eq!(
            order,
            RobotCommand::Control {
                dx: 300,
                dy: 0,
                dturn: 0
            }
        );
    }

    #[test]
    fn test_goto_target_is_clamped() {
        let feed = PositionFeed::new();
        feed.set_robot(G1, Pose::new(1.07, 0.0, 0.0));
        let view = feed.view();

        // Far outside the field: clamped to field + half border (x = 1.07)
        let (arrived, _) = goto_order(
            &view,
            G1,
            Pose::new(5.0, 0.0, 0.0),
            DEFAULT_TOLERANCE,
            true,
            FieldDimensions::default().play_area(),
        );
        assert!(arrived);
    }

    #[test]
    fn test_goto_without_position_stops() {
        let view = FieldView::empty();
        let (arrived, order) = goto_order(
            &view,
            G1,
            Pose::default(),
            DEFAULT_TOLERANCE,
            true,
            FieldDimensions::default().play_area(),
        );
        assert!(!arrived);
        assert_eq!(order, RobotCommand::stop());
    }

    #[test]
    fn test_goto_finishes_on_arrival_or_absence() {
        let feed = PositionFeed::new();
        feed.set_robot(G1, Pose::new(0.3, 0.1, 0.0));
        let view = feed.view();

        let task = ControlTask::go_to("g", G1, Pose::new(0.3, 0.1, 0.0));
        assert!(task.finished(&ctx(&view, &[G1])));

        let far = ControlTask::go_to("g", G1, Pose::new(-0.3, 0.1, 0.0));
        assert!(!far.finished(&ctx(&view, &[G1])));
        assert!(far.finished(&ctx(&view, &[])), "unavailable robot");

        assert!(!far.forever().finished(&ctx(&view, &[])));
    }

    #[test]
    fn test_configuration_stops_robots_when_done() {
        let dims = FieldDimensions::default();
        let task = ControlTask::go_to_configuration("place", "game", &dims).unwrap();
        assert_eq!(task.robots().len(), 4);
        assert!(ControlTask::go_to_configuration("x", "unknown", &dims).is_none());

        let feed = PositionFeed::new();
        let (_, pose) = named_configuration("game", &dims)
            .unwrap()
            .into_iter()
            .find(|(r, _)| *r == G1)
            .unwrap();
        feed.set_robot(G1, pose);
        let view = feed.view();

        let c = ctx(&view, &[G1]);
        assert!(task.finished(&c));
        assert_eq!(task.on_finished(&c), vec![(G1, RobotCommand::stop())]);
    }
}
