// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Simulated robots and ball
//!
//! Kinematic stand-in for the real field: commanded robot-frame speeds are
//! integrated at 50 Hz, the ball rolls with a constant deceleration, robots
//! push the ball out of their footprint and kicks launch it. Every step is
//! published into the [`PositionFeed`] as a calibrated frame.

use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::feed::{FeedFrame, MarkerPose, PositionFeed};
use crate::field::{angle_wrap, named_configuration, FieldDimensions, Point, Pose, RobotId, ROBOT_RADIUS};
use crate::protocol::RobotCommand;

/// Integration period
pub const SIM_PERIOD: Duration = Duration::from_millis(20);

const BALL_RADIUS: f64 = 0.021;
const BALL_DECELERATION: f64 = 0.3;
const KICKER_X_TOLERANCE: f64 = 0.03;
const KICKER_Y_TOLERANCE: f64 = 0.065;

/// Ball speed of a full-power kick, m/s
const KICK_SPEED: f64 = 1.5;

#[derive(Debug, Clone, Copy, Default)]
struct SimRobot {
    pose: Pose,
    /// Robot-frame speed: m/s, m/s, rad/s
    speed: (f64, f64, f64),
}

#[derive(Debug, Default)]
struct World {
    robots: BTreeMap<RobotId, SimRobot>,
    ball: Point,
    ball_speed: Point,
}

/// Physics stand-in shared by every simulated robot handle
pub struct Simulator {
    dims: FieldDimensions,
    world: Mutex<World>,
    running: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Simulator {
    pub fn new(dims: FieldDimensions) -> Self {
        Self {
            dims,
            world: Mutex::new(World::default()),
            running: AtomicBool::new(false),
            thread: Mutex::new(None),
        }
    }

    /// Add a robot, placed on its "dots" position
    pub fn add_robot(&self, id: RobotId) {
        let pose = named_configuration("dots", &self.dims)
            .and_then(|targets| targets.into_iter().find(|(r, _)| *r == id))
            .map(|(_, pose)| pose)
            .unwrap_or_default();

        self.world
            .lock()
            .robots
            .entry(id)
            .or_insert(SimRobot {
                pose,
                speed: (0.0, 0.0, 0.0),
            });
    }

    /// Apply a command to a robot
    pub fn apply(&self, id: RobotId, command: RobotCommand) {
        let mut world = self.world.lock();
        match command {
            RobotCommand::Control { dx, dy, dturn } => {
                if let Some(robot) = world.robots.get_mut(&id) {
                    robot.speed = (
                        f64::from(dx) / 1000.0,
                        f64::from(dy) / 1000.0,
                        f64::from(dturn).to_radians(),
                    );
                }
            }
            RobotCommand::Kick { power } => {
                let Some(pose) = world.robots.get(&id).map(|r| r.pose) else {
                    return;
                };
                let local = pose.to_local(world.ball);
                let reach = ROBOT_RADIUS + BALL_RADIUS + KICKER_X_TOLERANCE;
                if local.x > 0.0 && local.x <= reach && local.y.abs() <= KICKER_Y_TOLERANCE {
                    let speed = KICK_SPEED * f64::from(power.min(100)) / 100.0;
                    world.ball_speed = pose.rotate_to_world(Point::new(speed, 0.0));
                    debug!("[sim] {} kicked at {:.2} m/s", id, speed);
                }
            }
            _ => {}
        }
    }

    pub fn teleport_robot(&self, id: RobotId, pose: Pose) {
        let mut world = self.world.lock();
        let robot = world.robots.entry(id).or_default();
        robot.pose = pose;
        robot.speed = (0.0, 0.0, 0.0);
    }

    pub fn teleport_ball(&self, position: Point) {
        let mut world = self.world.lock();
        world.ball = position;
        world.ball_speed = Point::ORIGIN;
    }

    pub fn robot_pose(&self, id: RobotId) -> Option<Pose> {
        self.world.lock().robots.get(&id).map(|r| r.pose)
    }

    pub fn ball(&self) -> Point {
        self.world.lock().ball
    }

    /// Advance the world by `dt` seconds
    pub fn step(&self, dt: f64) {
        let hx = self.dims.carpet_length / 2.0;
        let hy = self.dims.carpet_width / 2.0;
        let mut world = self.world.lock();

        for robot in world.robots.values_mut() {
            let (dx, dy, dturn) = robot.speed;
            let v = robot.pose.rotate_to_world(Point::new(dx, dy));
            robot.pose.x = (robot.pose.x + v.x * dt).clamp(-hx, hx);
            robot.pose.y = (robot.pose.y + v.y * dt).clamp(-hy, hy);
            robot.pose.theta = angle_wrap(robot.pose.theta + dturn * dt);
        }

        let speed = world.ball_speed.norm();
        if speed > 0.0 {
            let next = (speed - BALL_DECELERATION * dt).max(0.0);
            world.ball = world.ball + world.ball_speed * dt;
            world.ball_speed = world.ball_speed * (next / speed);
        }
        if world.ball.x.abs() > hx || world.ball.y.abs() > hy {
            world.ball = Point::new(world.ball.x.clamp(-hx, hx), world.ball.y.clamp(-hy, hy));
            world.ball_speed = Point::ORIGIN;
        }

        // Robots push the ball out of their footprint
        let contact = ROBOT_RADIUS + BALL_RADIUS;
        let centers: Vec<Point> = world.robots.values().map(|r| r.pose.position()).collect();
        for center in centers {
            let offset = world.ball - center;
            let distance = offset.norm();
            if distance < contact && distance > 0.0 {
                world.ball = center + offset * (contact / distance);
            }
        }
    }

    /// Current world as a feed frame
    pub fn frame(&self) -> FeedFrame {
        let world = self.world.lock();
        FeedFrame {
            ball: Some(world.ball),
            markers: world
                .robots
                .iter()
                .map(|(id, r)| (id.to_string(), MarkerPose::from(r.pose)))
                .collect(),
            calibrated: true,
            referee: None,
        }
    }

    /// Run the integration loop, publishing into `feed`
    pub fn start(self: &Arc<Self>, feed: Arc<PositionFeed>) -> io::Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let sim = Arc::clone(self);
        let thread = std::thread::Builder::new()
            .name("pitchside-sim".into())
            .spawn(move || {
                let mut last = Instant::now();
                while sim.running.load(Ordering::SeqCst) {
                    std::thread::sleep(SIM_PERIOD);
                    let now = Instant::now();
                    sim.step(now.duration_since(last).as_secs_f64());
                    last = now;
                    feed.ingest(sim.frame());
                }
            })?;

        *self.thread.lock() = Some(thread);
        info!("[sim] simulation started");
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
    use crate::field::Team;

    const G1: RobotId = RobotId::new(Team::Green, 1);

    fn simulator() -> Simulator {
        let sim = Simulator::new(FieldDimensions::default());
        sim.add_robot(G1);
        sim.teleport_robot(G1, Pose::new(0.0, 0.0, 0.0));
        sim.teleport_ball(Point::new(0.5, 0.5));
        sim
    }

    #[test]
    fn test_robot_follows_robot_frame_speed() {
        let sim = simulator();
        sim.teleport_robot(G1, Pose::new(0.0, 0.0, std::f64::consts::FRAC_PI_2));
        sim.apply(G1, RobotCommand::control(0.5, 0.0, 0.0));
        for _ in 0..50 {
            sim.step(0.02);
        }

        let pose = sim.robot_pose(G1).unwrap();
        assert!(pose.x.abs() < 1e-9);
        assert!((pose.y - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_kick_launches_ball_which_slows_down() {
        let sim = simulator();
        sim.teleport_ball(Point::new(0.12, 0.0));
        sim.apply(G1, RobotCommand::kick(1.0));

        sim.step(0.1);
        let after_one = sim.ball();
        assert!(after_one.x > 0.2);

        for _ in 0..400 {
            sim.step(0.02);
        }
        let rest = sim.ball();
        sim.step(0.02);
        assert_eq!(sim.ball(), rest, "ball eventually stops");
    }

    #[test]
    fn test_kick_needs_ball_in_front() {
        let sim = simulator();
        sim.teleport_ball(Point::new(-0.12, 0.0));
        sim.apply(G1, RobotCommand::kick(1.0));
        sim.step(0.1);
        assert_eq!(sim.ball(), Point::new(-0.12, 0.0));
    }

    #[test]
    fn test_robot_pushes_ball() {
        let sim = simulator();
        sim.teleport_ball(Point::new(0.05, 0.0));
        sim.step(0.02);
        assert!((sim.ball().distance(Point::ORIGIN) - (ROBOT_RADIUS + BALL_RADIUS)).abs() < 1e-9);
    }

    #[test]
    fn test_frame_is_calibrated() {
        let sim = simulator();
        let frame = sim.frame();
        assert!(frame.calibrated);
        assert_eq!(frame.ball, Some(Point::new(0.5, 0.5)));
        assert!(frame.markers.contains_key("green1"));
    }
}
