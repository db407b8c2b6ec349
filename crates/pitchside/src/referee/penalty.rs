// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Penalty bookkeeping and penalty spot assignment.

use std::collections::BTreeMap;

use crate::field::{FieldDimensions, Point, RobotId, ROBOT_RADIUS};

use super::state::PenaltySnapshot;

/// A spot closer than this to another robot is occupied
const SPOT_CLEARANCE: f64 = 2.0 * ROBOT_RADIUS;

#[derive(Debug, Clone, Default)]
struct Penalty {
    remaining: Option<f64>,
    reason: Option<String>,
    grace: Option<f64>,
    spot: Option<Point>,
}

/// Penalty state of every robot
#[derive(Debug, Clone, Default)]
pub struct Penalties {
    robots: BTreeMap<RobotId, Penalty>,
    /// Recently assigned spots and when (referee uptime, seconds)
    spot_locks: Vec<(Point, f64)>,
}

impl Penalties {
    pub fn new() -> Self {
        Self {
            robots: RobotId::all().map(|id| (id, Penalty::default())).collect(),
            spot_locks: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn is_penalized(&self, id: RobotId) -> bool {
        self.robots.get(&id).is_some_and(|p| p.remaining.is_some())
    }

    pub fn in_grace(&self, id: RobotId) -> bool {
        self.robots.get(&id).is_some_and(|p| p.grace.is_some())
    }

    /// Not serving a penalty and past grace
    pub fn can_penalize(&self, id: RobotId) -> bool {
        !self.is_penalized(id) && !self.in_grace(id)
    }

    pub fn spot(&self, id: RobotId) -> Option<Point> {
        self.robots.get(&id).and_then(|p| p.spot)
    }

    /// Start (or extend) a penalty served at `spot`
    pub fn penalize(&mut self, id: RobotId, seconds: f64, reason: &str, spot: Point) {
        let penalty = self.robots.entry(id).or_default();
        penalty.remaining = Some(penalty.remaining.unwrap_or(0.0) + seconds);
        penalty.reason = Some(reason.to_string());
        penalty.grace = None;
        penalty.spot = Some(spot);
    }

    /// End a penalty now, without grace. Returns whether one was active.
    pub fn cancel(&mut self, id: RobotId) -> bool {
        match self.robots.get_mut(&id) {
            Some(penalty) if penalty.remaining.is_some() => {
                *penalty = Penalty::default();
                true
            }
            _ => false,
        }
    }

    /// Count down penalties and grace periods.
    ///
    /// Returns the robots whose penalty ended; they enter a grace period of
    /// `grace` seconds.
    pub fn tick(&mut self, dt: f64, grace: f64) -> Vec<RobotId> {
        let mut ended = Vec::new();
        for (id, penalty) in &mut self.robots {
            if let Some(remaining) = penalty.remaining {
                let left = remaining - dt;
                if left <= 0.0 {
                    *penalty = Penalty {
                        grace: Some(grace),
                        ..Penalty::default()
                    };
                    ended.push(*id);
                } else {
                    penalty.remaining = Some(left);
                }
            } else if let Some(g) = penalty.grace {
                let left = g - dt;
                penalty.grace = (left > 0.0).then_some(left);
            }
        }
        ended
    }

    /// Pick the spot a penalized robot is sent to.
    ///
    /// Nearest free spot to the robot: not locked by a recent assignment,
    /// not held by another penalized robot and not crowded by another robot.
    /// Falls back to the nearest unlocked spot, then the nearest spot.
    pub fn assign_spot(
        &mut self,
        dims: &FieldDimensions,
        robot: Option<Point>,
        others: &[Point],
        now: f64,
        lock: f64,
    ) -> Point {
        self.spot_locks.retain(|(_, at)| now - at < lock);

        let held: Vec<Point> = self.robots.values().filter_map(|p| p.spot).collect();
        let locked = |s: &Point| {
            self.spot_locks.iter().any(|(p, _)| p == s) || held.contains(s)
        };
        let crowded = |s: &Point| others.iter().any(|o| o.distance(*s) < SPOT_CLEARANCE);

        let from = robot.unwrap_or(Point::ORIGIN);
        let nearest = |spots: Vec<Point>| {
            spots
                .into_iter()
                .min_by(|a, b| a.distance(from).total_cmp(&b.distance(from)))
        };

        let spots = dims.penalty_spots();
        let free = nearest(spots.iter().copied().filter(|s| !locked(s) && !crowded(s)).collect());
        let unlocked = || nearest(spots.iter().copied().filter(|s| !locked(s)).collect());
        let spot = free
            .or_else(unlocked)
            .or_else(|| nearest(spots.clone()))
            .unwrap_or(from);

        self.spot_locks.push((spot, now));
        spot
    }

    pub fn snapshot(&self) -> BTreeMap<RobotId, PenaltySnapshot> {
        self.robots
            .iter()
            .map(|(id, p)| {
                (
                    *id,
                    PenaltySnapshot {
                        remaining: p.remaining,
                        reason: p.reason.clone(),
                        grace: p.grace,
                    },
                )
            })
            .collect()
    }
}
