// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Geometric rule checks run by the referee each tick.

use std::collections::BTreeMap;

use crate::field::{
    segment_intersection, FieldDimensions, Point, RobotId, Team, FIELD_IN_MARGIN,
    FIELD_OUT_MARGIN, TIMED_CIRCLE_RADIUS,
};

/// Ball leaving the playing area
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Crossing {
    /// Through the goal mouth on the positive or negative X side
    Goal { x_positive: bool, at: Point },
    /// Over a field boundary
    Sideline { at: Point },
}

/// What the ball crossed moving from `from` to `to`, goals first
pub fn ball_crossing(dims: &FieldDimensions, from: Point, to: Point) -> Option<Crossing> {
    for x_positive in [true, false] {
        let [a, b] = dims.goal_posts(x_positive);
        if let Some(at) = segment_intersection(from, to, a, b) {
            return Some(Crossing::Goal { x_positive, at });
        }
    }

    dims.boundary(FIELD_OUT_MARGIN)
        .iter()
        .find_map(|(a, b)| segment_intersection(from, to, *a, *b))
        .map(|at| Crossing::Sideline { at })
}

/// Whether the ball is back far enough inside the field to re-arm detection
pub fn ball_in_safe_area(dims: &FieldDimensions, ball: Point) -> bool {
    dims.rect(FIELD_IN_MARGIN).contains(ball)
}

/// Robot standing in the defense area of the opposing team
pub fn in_opponent_defense_area(
    dims: &FieldDimensions,
    position: Point,
    own_x_positive: bool,
) -> bool {
    dims.defense_area(!own_x_positive).contains(position)
}

/// With two or more robots of one team in their own defense area, the one
/// to penalize: farthest from the center line, higher number on ties.
pub fn crowded_defense(
    dims: &FieldDimensions,
    team: Team,
    x_positive: bool,
    positions: &BTreeMap<RobotId, Point>,
) -> Option<RobotId> {
    let area = dims.defense_area(x_positive);
    let inside: Vec<(RobotId, Point)> = positions
        .iter()
        .filter(|(id, p)| id.team == team && area.contains(**p))
        .map(|(id, p)| (*id, *p))
        .collect();

    if inside.len() < 2 {
        return None;
    }

    inside
        .into_iter()
        .max_by(|(ia, pa), (ib, pb)| {
            pa.x.abs()
                .total_cmp(&pb.x.abs())
                .then(ia.number.cmp(&ib.number))
        })
        .map(|(id, _)| id)
}

/// Time each robot has continuously spent close to the ball
#[derive(Debug, Clone, Default)]
pub struct TimedCircle {
    since: BTreeMap<RobotId, f64>,
}

impl TimedCircle {
    /// Update one robot at time `now`. Returns true once it stayed within the
    /// circle for longer than `limit` seconds; the timer restarts then.
    pub fn update(&mut self, robot: RobotId, position: Point, ball: Point, now: f64, limit: f64) -> bool {
        if position.distance(ball) > TIMED_CIRCLE_RADIUS {
            self.since.remove(&robot);
            return false;
        }

        let since = *self.since.entry(robot).or_insert(now);
        if now - since > limit {
            self.since.remove(&robot);
            return true;
        }
        false
    }

    pub fn forget(&mut self, robot: RobotId) {
        self.since.remove(&robot);
    }

    pub fn clear(&mut self) {
        self.since.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const G1: RobotId = RobotId::new(Team::Green, 1);
    const G2: RobotId = RobotId::new(Team::Green, 2);

    #[test]
    fn test_goal_before_sideline() {
        let dims = FieldDimensions::default();
        let crossing = ball_crossing(&dims, Point::new(0.85, 0.0), Point::new(1.0, 0.0));
        assert!(matches!(crossing, Some(Crossing::Goal { x_positive: true, .. })));

        let wide = ball_crossing(&dims, Point::new(0.85, 0.5), Point::new(1.0, 0.5));
        assert!(matches!(wide, Some(Crossing::Sideline { .. })));

        let side = ball_crossing(&dims, Point::new(0.0, 0.6), Point::new(0.1, 0.7));
        match side {
            Some(Crossing::Sideline { at }) => assert!((at.y - 0.635).abs() < 1e-9),
            other => panic!("unexpected {:?}", other),
        }

        assert_eq!(ball_crossing(&dims, Point::ORIGIN, Point::new(0.1, 0.1)), None);
    }

    #[test]
    fn test_negative_goal() {
        let dims = FieldDimensions::default();
        let crossing = ball_crossing(&dims, Point::new(-0.9, 0.1), Point::new(-0.95, 0.1));
        assert!(matches!(crossing, Some(Crossing::Goal { x_positive: false, .. })));
    }

    #[test]
    fn test_safe_area() {
        let dims = FieldDimensions::default();
        assert!(ball_in_safe_area(&dims, Point::ORIGIN));
        assert!(!ball_in_safe_area(&dims, Point::new(0.9, 0.0)));
    }

    #[test]
    fn test_defense_areas() {
        let dims = FieldDimensions::default();
        // Green defends +X: the -X area belongs to its opponent
        assert!(in_opponent_defense_area(&dims, Point::new(-0.85, 0.0), true));
        assert!(!in_opponent_defense_area(&dims, Point::new(0.85, 0.0), true));

        let mut positions = BTreeMap::new();
        positions.insert(G1, Point::new(0.85, 0.1));
        assert_eq!(crowded_defense(&dims, Team::Green, true, &positions), None);

        positions.insert(G2, Point::new(0.75, -0.1));
        assert_eq!(crowded_defense(&dims, Team::Green, true, &positions), Some(G1));

        positions.insert(G2, Point::new(0.85, -0.1));
        assert_eq!(crowded_defense(&dims, Team::Green, true, &positions), Some(G2));
    }

    #[test]
    fn test_timed_circle() {
        let mut circle = TimedCircle::default();
        let ball = Point::ORIGIN;
        let near = Point::new(0.1, 0.0);

        assert!(!circle.update(G1, near, ball, 0.0, 3.0));
        assert!(!circle.update(G1, near, ball, 2.9, 3.0));
        assert!(circle.update(G1, near, ball, 3.1, 3.0));

        assert!(!circle.update(G1, near, ball, 4.0, 3.0));
        assert!(!circle.update(G1, Point::new(0.5, 0.0), ball, 5.0, 3.0));
        assert!(!circle.update(G1, near, ball, 7.5, 3.0));
    }
}
