// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Field model
//!
//! Identities, poses, field dimensions and the 2D geometry the referee and
//! the goto controller work with. Coordinates are meters, origin at the
//! center spot, X along the field length; angles are radians.

use std::f64::consts::PI;
use std::fmt;
use std::ops::{Add, Mul, Sub};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Robot numbers within a team
pub const ROBOT_NUMBERS: [u8; 2] = [1, 2];

/// Robot footprint radius
pub const ROBOT_RADIUS: f64 = 0.088;

/// Radius of the circle a robot may not linger in around the ball
pub const TIMED_CIRCLE_RADIUS: f64 = 0.25;

/// Ball placement tolerance (center or dot)
pub const PLACE_BALL_MARGIN: f64 = 0.05;

/// Inner "safe" rectangle margin, negative means inside the field
pub const FIELD_IN_MARGIN: f64 = -0.08;

/// Margin past the lines before the ball counts as out
pub const FIELD_OUT_MARGIN: f64 = 0.02;

/// Distance outside the field beyond which a robot is sent back to the center
pub const OUT_OF_GAME_MARGIN: f64 = 0.25;

/// Distance of the penalty spots outside the sidelines
pub const PENALTY_SPOT_OFFSET: f64 = 0.15;

/// X coordinates of the penalty spots (both signs)
pub const PENALTY_SPOT_XS: [f64; 2] = [0.2, 0.6];

/// Named configurations known to [`named_configuration`]
pub const CONFIGURATION_NAMES: [&str; 8] = [
    "dots",
    "game",
    "game_green_positive",
    "game_blue_positive",
    "side",
    "swap_covers_green_positive",
    "swap_covers_blue_positive",
    "gently_swap_side",
];

/// Team color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Team {
    Green,
    Blue,
}

impl Team {
    pub const ALL: [Team; 2] = [Team::Green, Team::Blue];

    pub fn as_str(self) -> &'static str {
        match self {
            Team::Green => "green",
            Team::Blue => "blue",
        }
    }

    pub fn other(self) -> Team {
        match self {
            Team::Green => Team::Blue,
            Team::Blue => Team::Green,
        }
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Team {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "green" => Ok(Team::Green),
            "blue" => Ok(Team::Blue),
            other => Err(format!("unknown team: {}", other)),
        }
    }
}

/// Robot identity: team and number. Rendered as `green1`, `blue2`, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RobotId {
    pub team: Team,
    pub number: u8,
}

impl RobotId {
    pub const fn new(team: Team, number: u8) -> Self {
        Self { team, number }
    }

    /// Every robot of the match, green first
    pub fn all() -> impl Iterator<Item = RobotId> {
        Team::ALL
            .into_iter()
            .flat_map(|team| ROBOT_NUMBERS.into_iter().map(move |n| RobotId::new(team, n)))
    }
}

impl fmt::Display for RobotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.team, self.number)
    }
}

impl FromStr for RobotId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let split = s
            .find(|c: char| c.is_ascii_digit())
            .ok_or_else(|| format!("invalid robot id: {}", s))?;
        let team = s[..split].parse()?;
        let number = s[split..]
            .parse()
            .map_err(|_| format!("invalid robot number: {}", s))?;
        Ok(RobotId::new(team, number))
    }
}

impl TryFrom<String> for RobotId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RobotId> for String {
    fn from(id: RobotId) -> Self {
        id.to_string()
    }
}

/// 2D point, serialized as `[x, y]`
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const ORIGIN: Point = Point { x: 0.0, y: 0.0 };

    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn norm(self) -> f64 {
        self.x.hypot(self.y)
    }

    pub fn distance(self, other: Point) -> f64 {
        (self - other).norm()
    }

    fn cross(self, other: Point) -> f64 {
        self.x * other.y - self.y * other.x
    }
}

impl From<[f64; 2]> for Point {
    fn from(v: [f64; 2]) -> Self {
        Point::new(v[0], v[1])
    }
}

impl From<Point> for [f64; 2] {
    fn from(p: Point) -> Self {
        [p.x, p.y]
    }
}

impl Add for Point {
    type Output = Point;

    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Point;

    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f64> for Point {
    type Output = Point;

    fn mul(self, k: f64) -> Point {
        Point::new(self.x * k, self.y * k)
    }
}

/// Position and heading
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

impl Pose {
    pub const fn new(x: f64, y: f64, theta: f64) -> Self {
        Self { x, y, theta }
    }

    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }

    /// Express a world point in this pose's frame
    pub fn to_local(&self, p: Point) -> Point {
        let (sin, cos) = self.theta.sin_cos();
        let d = p - self.position();
        Point::new(cos * d.x + sin * d.y, -sin * d.x + cos * d.y)
    }

    /// Express a local vector in the world frame (rotation only)
    pub fn rotate_to_world(&self, v: Point) -> Point {
        let (sin, cos) = self.theta.sin_cos();
        Point::new(cos * v.x - sin * v.y, sin * v.x + cos * v.y)
    }
}

/// Axis-aligned rectangle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub min: Point,
    pub max: Point,
}

impl Rect {
    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }
}

/// Wrap an angle into [-pi, pi)
pub fn angle_wrap(alpha: f64) -> f64 {
    (alpha + PI).rem_euclid(2.0 * PI) - PI
}

/// Intersection of segments [a, b] and [c, d].
///
/// Solves `a + l0 (b - a) = c + l1 (d - c)`. Parallel segments (singular
/// system) never intersect; both parameters must lie in [0, 1], endpoints
/// included.
pub fn segment_intersection(a: Point, b: Point, c: Point, d: Point) -> Option<Point> {
    let u = b - a;
    let v = d - c;
    let det = -u.cross(v);
    if det == 0.0 {
        return None;
    }

    let w = c - a;
    let l0 = -w.cross(v) / det;
    let l1 = u.cross(w) / det;

    if (0.0..=1.0).contains(&l0) && (0.0..=1.0).contains(&l1) {
        Some(a + u * l0)
    } else {
        None
    }
}

/// Field dimensions, in meters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDimensions {
    #[serde(default = "default_length")]
    pub length: f64,

    #[serde(default = "default_width")]
    pub width: f64,

    #[serde(default = "default_goal_width")]
    pub goal_width: f64,

    /// Visible border around the field
    #[serde(default = "default_border")]
    pub border: f64,

    #[serde(default = "default_dots_x")]
    pub dots_x: f64,

    #[serde(default = "default_dots_y")]
    pub dots_y: f64,

    #[serde(default = "default_defense_area_length")]
    pub defense_area_length: f64,

    #[serde(default = "default_defense_area_width")]
    pub defense_area_width: f64,

    #[serde(default = "default_carpet_length")]
    pub carpet_length: f64,

    #[serde(default = "default_carpet_width")]
    pub carpet_width: f64,
}

fn default_length() -> f64 {
    1.84
}

fn default_width() -> f64 {
    1.23
}

fn default_goal_width() -> f64 {
    0.6
}

fn default_border() -> f64 {
    0.3
}

fn default_dots_x() -> f64 {
    0.45
}

fn default_dots_y() -> f64 {
    0.305
}

fn default_defense_area_length() -> f64 {
    0.3
}

fn default_defense_area_width() -> f64 {
    0.9
}

fn default_carpet_length() -> f64 {
    2.45
}

fn default_carpet_width() -> f64 {
    1.84
}

impl Default for FieldDimensions {
    fn default() -> Self {
        Self {
            length: default_length(),
            width: default_width(),
            goal_width: default_goal_width(),
            border: default_border(),
            dots_x: default_dots_x(),
            dots_y: default_dots_y(),
            defense_area_length: default_defense_area_length(),
            defense_area_width: default_defense_area_width(),
            carpet_length: default_carpet_length(),
            carpet_width: default_carpet_width(),
        }
    }
}

impl FieldDimensions {
    /// The two posts of the goal on the positive or negative X side
    pub fn goal_posts(&self, x_positive: bool) -> [Point; 2] {
        let x = if x_positive { 1.0 } else { -1.0 } * self.length / 2.0;
        [
            Point::new(x, -self.goal_width / 2.0),
            Point::new(x, self.goal_width / 2.0),
        ]
    }

    /// Field corners grown by `margin`, in boundary order
    pub fn corners(&self, margin: f64) -> [Point; 4] {
        let hx = self.length / 2.0 + margin;
        let hy = self.width / 2.0 + margin;
        [
            Point::new(hx, hy),
            Point::new(hx, -hy),
            Point::new(-hx, -hy),
            Point::new(-hx, hy),
        ]
    }

    /// The four boundary segments of the field grown by `margin`
    pub fn boundary(&self, margin: f64) -> [(Point, Point); 4] {
        let c = self.corners(margin);
        [(c[0], c[1]), (c[1], c[2]), (c[2], c[3]), (c[3], c[0])]
    }

    /// Field rectangle grown by `margin` (negative shrinks it)
    pub fn rect(&self, margin: f64) -> Rect {
        let hx = self.length / 2.0 + margin;
        let hy = self.width / 2.0 + margin;
        Rect {
            min: Point::new(-hx, -hy),
            max: Point::new(hx, hy),
        }
    }

    /// Defense area in front of the goal on the given side
    pub fn defense_area(&self, x_positive: bool) -> Rect {
        let goal_x = if x_positive { 1.0 } else { -1.0 } * self.length / 2.0;
        Rect {
            min: Point::new(
                goal_x - self.defense_area_length,
                -self.defense_area_width / 2.0,
            ),
            max: Point::new(
                goal_x + self.defense_area_length,
                self.defense_area_width / 2.0,
            ),
        }
    }

    /// Dot in the quadrant of `p`
    pub fn nearest_dot(&self, p: Point) -> Point {
        Point::new(
            self.dots_x.copysign(p.x),
            self.dots_y.copysign(p.y),
        )
    }

    /// Penalty spots on both sidelines, outside the field
    pub fn penalty_spots(&self) -> Vec<Point> {
        let y = self.width / 2.0 + PENALTY_SPOT_OFFSET;
        let mut spots = Vec::with_capacity(8);
        for sy in [1.0, -1.0] {
            for x in PENALTY_SPOT_XS {
                for sx in [1.0, -1.0] {
                    spots.push(Point::new(sx * x, sy * y));
                }
            }
        }
        spots
    }

    /// Area the goto controller may target: field plus half the border
    pub fn play_area(&self) -> Rect {
        self.rect(self.border / 2.0)
    }
}

/// Target pose of every robot for a named configuration
pub fn named_configuration(name: &str, dims: &FieldDimensions) -> Option<Vec<(RobotId, Pose)>> {
    use Team::{Blue, Green};

    let l = dims.length;
    let w = dims.width;
    let g = |n, x, y, t| (RobotId::new(Green, n), Pose::new(x, y, t));
    let b = |n, x, y, t| (RobotId::new(Blue, n), Pose::new(x, y, t));

    let targets = match name {
        "dots" => vec![
            g(1, l / 4.0, -w / 4.0, PI),
            g(2, l / 4.0, w / 4.0, PI),
            b(1, -l / 4.0, w / 4.0, 0.0),
            b(2, -l / 4.0, -w / 4.0, 0.0),
        ],
        "game" | "game_green_positive" => vec![
            g(1, l / 4.0, 0.0, PI),
            g(2, l / 2.0, 0.0, PI),
            b(1, -l / 4.0, 0.0, 0.0),
            b(2, -l / 2.0, 0.0, 0.0),
        ],
        "game_blue_positive" => vec![
            g(1, -l / 4.0, 0.0, 0.0),
            g(2, -l / 2.0, 0.0, 0.0),
            b(1, l / 4.0, 0.0, PI),
            b(2, l / 2.0, 0.0, PI),
        ],
        "side" => vec![
            g(1, 0.2, w / 2.0, -PI / 2.0),
            g(2, 0.6, w / 2.0, -PI / 2.0),
            b(1, -0.2, w / 2.0, -PI / 2.0),
            b(2, -0.6, w / 2.0, -PI / 2.0),
        ],
        "swap_covers_green_positive" => vec![
            g(1, 0.15, -0.2, PI),
            g(2, 0.15, 0.2, PI),
            b(1, -0.15, -0.2, 0.0),
            b(2, -0.15, 0.2, 0.0),
        ],
        "swap_covers_blue_positive" => vec![
            g(1, -0.15, -0.2, 0.0),
            g(2, -0.15, 0.2, 0.0),
            b(1, 0.15, -0.2, PI),
            b(2, 0.15, 0.2, PI),
        ],
        "gently_swap_side" => vec![
            g(1, 0.0, -0.15, 0.0),
            g(2, 0.0, 0.5, 0.0),
            b(1, 0.0, -0.5, PI),
            b(2, 0.0, 0.15, PI),
        ],
        _ => return None,
    };

    Some(targets)
}
