//! Global pose accumulation and the per-frame trajectory log.

use log::{trace, warn};
use nalgebra::{Quaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::math::{SE3, SO3, so3::normalize_quaternion};

/// Camera-to-world pose of one processed frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryRecord {
    pub frame_index: u64,
    pub timestamp: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub qx: f64,
    pub qy: f64,
    pub qz: f64,
    pub qw: f64,
}

impl TrajectoryRecord {
    pub fn from_pose(frame_index: u64, timestamp: f64, pose_wc: &SE3) -> Self {
        let t = pose_wc.translation();
        let q = pose_wc.rotation().to_quaternion();
        Self {
            frame_index,
            timestamp,
            x: t.x,
            y: t.y,
            z: t.z,
            qx: q.i,
            qy: q.j,
            qz: q.k,
            qw: q.w,
        }
    }

    pub fn position(&self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.z)
    }

    pub fn pose(&self) -> SE3 {
        let q = normalize_quaternion(&Quaternion::new(self.qw, self.qx, self.qy, self.qz));
        SE3::from_parts(SO3::from_quaternion(&q), self.position())
    }
}

/// Append-only log with strictly increasing frame indices and non-decreasing timestamps.
#[derive(Debug, Default, Clone)]
pub struct Trajectory {
    records: Vec<TrajectoryRecord>,
}

impl Trajectory {
    /// Appends a record. Out-of-order records are kept and reported; callers
    /// sanitize indices and timestamps before recording.
    pub fn push(&mut self, record: TrajectoryRecord) {
        if let Some(last) = self.records.last()
            && !(record.frame_index > last.frame_index && record.timestamp >= last.timestamp)
        {
            warn!(
                target: "monovo_core::trajectory",
                "record ({}, {}) does not follow ({}, {})",
                record.frame_index,
                record.timestamp,
                last.frame_index,
                last.timestamp
            );
        }
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&TrajectoryRecord> {
        self.records.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrajectoryRecord> {
        self.records.iter()
    }

    pub fn records(&self) -> &[TrajectoryRecord] {
        &self.records
    }
}

/// Owns the global camera-to-world pose and its trajectory.
#[derive(Debug, Default, Clone)]
pub struct TrajectoryIntegrator {
    global: SE3,
    trajectory: Trajectory,
}

impl TrajectoryIntegrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial_pose(pose_wc: SE3) -> Self {
        Self {
            global: pose_wc.orthonormalized(),
            trajectory: Trajectory::default(),
        }
    }

    pub fn global_pose(&self) -> &SE3 {
        &self.global
    }

    pub fn trajectory(&self) -> &Trajectory {
        &self.trajectory
    }

    /// Right-composes a motion expressed in the previous camera frame, then
    /// projects the rotation back onto SO(3).
    pub fn integrate(&mut self, relative: &SE3) -> &SE3 {
        self.global = self.global.compose(relative).orthonormalized();
        trace!(
            target: "monovo_core::trajectory",
            "global pose at {:?}",
            self.global.translation().as_slice()
        );
        &self.global
    }

    /// Appends a record of the current global pose.
    pub fn record(&mut self, frame_index: u64, timestamp: f64) -> TrajectoryRecord {
        let record = TrajectoryRecord::from_pose(frame_index, timestamp, &self.global);
        self.trajectory.push(record);
        record
    }
}
