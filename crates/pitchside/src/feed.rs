// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Position feed
//!
//! Latest-value store for the ball and robot poses reported by the perception
//! service (or the simulator), with a UDP listener ingesting perception
//! frames and a UDP publisher pushing frames to subscribers.
//!
//! The store keeps exactly one frame (high-water-mark 1): readers always get
//! the newest state, never a backlog. Markers missing from an update keep
//! their last pose and timestamp so consumers can judge staleness.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::field::{Point, Pose, RobotId};
use crate::referee::GameSnapshot;

/// Read timeout of the listener socket, bounds shutdown latency
const LISTEN_TIMEOUT: Duration = Duration::from_millis(100);

/// Largest perception datagram accepted
const MAX_DATAGRAM: usize = 16 * 1024;

/// Marker pose on the wire
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarkerPose {
    pub position: Point,
    /// radians
    pub orientation: f64,
}

impl From<MarkerPose> for Pose {
    fn from(m: MarkerPose) -> Self {
        Pose::new(m.position.x, m.position.y, m.orientation)
    }
}

impl From<Pose> for MarkerPose {
    fn from(p: Pose) -> Self {
        MarkerPose {
            position: p.position(),
            orientation: p.theta,
        }
    }
}

/// One feed message, as received from perception and sent to subscribers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedFrame {
    #[serde(default)]
    pub ball: Option<Point>,

    /// Keyed by marker name (`green1`, ...). Unknown names are ignored.
    #[serde(default)]
    pub markers: BTreeMap<String, MarkerPose>,

    #[serde(default)]
    pub calibrated: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referee: Option<GameSnapshot>,
}

/// Tracked robot pose with its capture time
#[derive(Debug, Clone, Copy)]
pub struct Tracked {
    pub pose: Pose,
    pub updated: Instant,
}

/// Consistent snapshot of the feed
#[derive(Debug, Clone)]
pub struct FieldView {
    pub ball: Option<Point>,
    pub robots: HashMap<RobotId, Tracked>,
    pub calibrated: bool,
    pub referee: Option<GameSnapshot>,
    /// When this view was taken
    pub taken: Instant,
}

impl FieldView {
    /// An empty view (no ball, no robots)
    pub fn empty() -> Self {
        Self {
            ball: None,
            robots: HashMap::new(),
            calibrated: false,
            referee: None,
            taken: Instant::now(),
        }
    }

    /// Last known pose of a robot, however old
    pub fn pose(&self, id: RobotId) -> Option<Pose> {
        self.robots.get(&id).map(|t| t.pose)
    }

    /// Pose of a robot if updated within `max_age` of this view
    pub fn fresh_pose(&self, id: RobotId, max_age: Duration) -> Option<Pose> {
        self.robots
            .get(&id)
            .filter(|t| self.taken.saturating_duration_since(t.updated) <= max_age)
            .map(|t| t.pose)
    }

    /// Serializable form of this view
    pub fn to_frame(&self) -> FeedFrame {
        FeedFrame {
            ball: self.ball,
            markers: self
                .robots
                .iter()
                .map(|(id, t)| (id.to_string(), MarkerPose::from(t.pose)))
                .collect(),
            calibrated: self.calibrated,
            referee: self.referee.clone(),
        }
    }
}

/// Latest-value position store
pub struct PositionFeed {
    current: ArcSwap<FieldView>,
    /// Serializes read-modify-write updates; readers never take it
    write: Mutex<()>,
}

impl PositionFeed {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(FieldView::empty()),
            write: Mutex::new(()),
        }
    }

    /// Newest snapshot
    pub fn view(&self) -> FieldView {
        let mut view = FieldView::clone(&self.current.load());
        view.taken = Instant::now();
        view
    }

    /// Newest snapshot as a wire frame
    pub fn frame(&self) -> FeedFrame {
        self.current.load().to_frame()
    }

    fn update(&self, f: impl FnOnce(&mut FieldView)) {
        let _guard = self.write.lock();
        let mut next = FieldView::clone(&self.current.load());
        f(&mut next);
        next.taken = Instant::now();
        self.current.store(Arc::new(next));
    }

    /// Merge a perception frame: ball and calibration are replaced, markers
    /// present in the frame are updated, absent ones are kept as they were.
    pub fn ingest(&self, frame: FeedFrame) {
        let now = Instant::now();
        self.update(|view| {
            view.ball = frame.ball;
            view.calibrated = frame.calibrated;
            for (name, marker) in frame.markers {
                match name.parse::<RobotId>() {
                    Ok(id) => {
                        view.robots.insert(
                            id,
                            Tracked {
                                pose: marker.into(),
                                updated: now,
                            },
                        );
                    }
                    Err(_) => debug!("[feed] ignoring marker {}", name),
                }
            }
        });
    }

    /// Set one robot pose
    pub fn set_robot(&self, id: RobotId, pose: Pose) {
        let now = Instant::now();
        self.update(|view| {
            view.robots.insert(id, Tracked { pose, updated: now });
        });
    }

    /// Set (or clear) the ball position
    pub fn set_ball(&self, ball: Option<Point>) {
        self.update(|view| view.ball = ball);
    }

    /// Attach the referee snapshot published with every frame
    pub fn set_referee(&self, snapshot: GameSnapshot) {
        self.update(|view| view.referee = Some(snapshot));
    }
}

impl Default for PositionFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// Background thread with a stop flag
struct Worker {
    running: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    fn spawn(name: &str, body: impl FnOnce(Arc<AtomicBool>) + Send + 'static) -> io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let thread = std::thread::Builder::new()
            .name(name.into())
            .spawn(move || body(flag))?;
        Ok(Self {
            running,
            thread: Mutex::new(Some(thread)),
        })
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.lock().take() {
            let _ = thread.join();
        }
    }
}

/// Ingests perception frames (JSON datagrams) into a [`PositionFeed`]
pub struct FeedListener {
    local_addr: SocketAddr,
    worker: Worker,
}

impl FeedListener {
    pub fn start(bind: SocketAddr, feed: Arc<PositionFeed>) -> io::Result<Self> {
        let socket = UdpSocket::bind(bind)?;
        socket.set_read_timeout(Some(LISTEN_TIMEOUT))?;
        let local_addr = socket.local_addr()?;
        info!("[feed] listening for perception frames on {}", local_addr);

        let worker = Worker::spawn("pitchside-feed-rx", move |running| {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            while running.load(Ordering::SeqCst) {
                match socket.recv_from(&mut buf) {
                    Ok((n, src)) => match serde_json::from_slice::<FeedFrame>(&buf[..n]) {
                        Ok(frame) => feed.ingest(frame),
                        Err(e) => warn!("[feed] malformed frame from {}: {}", src, e),
                    },
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                        ) => {}
                    Err(e) => {
                        warn!("[feed] receive failed: {}", e);
                        std::thread::sleep(LISTEN_TIMEOUT);
                    }
                }
            }
        })?;

        Ok(Self { local_addr, worker })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stop(&self) {
        self.worker.stop();
    }
}

/// Sends the latest frame to subscribers at a fixed rate
pub struct FeedPublisher {
    worker: Worker,
}

impl FeedPublisher {
    pub fn start(
        subscribers: Vec<SocketAddr>,
        period: Duration,
        feed: Arc<PositionFeed>,
    ) -> io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        info!("[feed] publishing to {} subscriber(s)", subscribers.len());

        let worker = Worker::spawn("pitchside-feed-tx", move |running| {
            while running.load(Ordering::SeqCst) {
                let started = Instant::now();
                match serde_json::to_vec(&feed.frame()) {
                    Ok(bytes) => {
                        for addr in &subscribers {
                            if let Err(e) = socket.send_to(&bytes, addr) {
                                debug!("[feed] send to {} failed: {}", addr, e);
                            }
                        }
                    }
                    Err(e) => warn!("[feed] cannot serialize frame: {}", e),
                }
                if let Some(rest) = period.checked_sub(started.elapsed()) {
                    std::thread::sleep(rest);
                }
            }
        })?;

        Ok(Self { worker })
    }

    pub fn stop(&self) {
        self.worker.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Team;

    #[test]
    fn test_missing_markers_keep_last_pose() {
        let feed = PositionFeed::new();
        let g1 = RobotId::new(Team::Green, 1);
        let b2 = RobotId::new(Team::Blue, 2);

        let frame: FeedFrame = serde_json::from_str(
            r#"{"ball": [0.1, 0.2],
                "markers": {"green1": {"position": [0.5, 0.0], "orientation": 1.0},
                            "blue2": {"position": [-0.5, 0.0], "orientation": 0.0},
                            "obj7": {"position": [0.0, 0.0], "orientation": 0.0}},
                "calibrated": true}"#,
        )
        .unwrap();
        feed.ingest(frame);
        let first = feed.view();

        std::thread::sleep(Duration::from_millis(20));
        feed.ingest(
            serde_json::from_str(
                r#"{"ball": null,
                    "markers": {"green1": {"position": [0.6, 0.0], "orientation": 1.0}}}"#,
            )
            .unwrap(),
        );
        let view = feed.view();

        assert_eq!(view.ball, None);
        assert!(!view.calibrated);
        assert_eq!(view.pose(g1).unwrap().x, 0.6);
        assert_eq!(view.pose(b2).unwrap().x, -0.5);
        assert_eq!(view.robots.len(), 2);
        assert_eq!(
            view.robots[&b2].updated,
            first.robots[&b2].updated,
            "absent marker keeps its timestamp"
        );
        assert!(view.fresh_pose(b2, Duration::from_millis(5)).is_none());
        assert!(view.fresh_pose(b2, Duration::from_secs(5)).is_some());
    }

    #[test]
    fn test_frame_wire_shape() {
        let feed = PositionFeed::new();
        feed.set_ball(Some(Point::new(0.25, -0.5)));
        feed.set_robot(RobotId::new(Team::Blue, 1), Pose::new(0.1, 0.2, 0.3));

        let json = serde_json::to_value(feed.frame()).unwrap();
        assert_eq!(json["ball"], serde_json::json!([0.25, -0.5]));
        assert_eq!(
            json["markers"]["blue1"]["position"],
            serde_json::json!([0.1, 0.2])
        );
        assert_eq!(json["markers"]["blue1"]["orientation"], 0.3);
        assert!(json.get("referee").is_none());
    }

    #[test]
    fn test_listener_ingests_datagrams() {
        let feed = Arc::new(PositionFeed::new());
        let listener = FeedListener::start("127.0.0.1:0".parse().unwrap(), feed.clone()).unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(b"not json", listener.local_addr()).unwrap();
        sender
            .send_to(
                br#"{"ball": [0.3, 0.3], "markers": {}, "calibrated": true}"#,
                listener.local_addr(),
            )
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while feed.view().ball.is_none() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(feed.view().ball, Some(Point::new(0.3, 0.3)));
        listener.stop();
    }

    #[test]
    fn test_publisher_sends_latest_frame() {
        let feed = Arc::new(PositionFeed::new());
        feed.set_ball(Some(Point::new(0.0, 0.1)));

        let subscriber = UdpSocket::bind("127.0.0.1:0").unwrap();
        subscriber
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let publisher = FeedPublisher::start(
            vec![subscriber.local_addr().unwrap()],
            Duration::from_millis(20),
            feed,
        )
        .unwrap();

        let mut buf = [0u8; 4096];
        let n = subscriber.recv(&mut buf).unwrap();
        let frame: FeedFrame = serde_json::from_slice(&buf[..n]).unwrap();
        assert_eq!(frame.ball, Some(Point::new(0.0, 0.1)));
        publisher.stop();
    }
}
