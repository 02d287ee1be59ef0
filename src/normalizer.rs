//! Joint normalization
//!
//! This module converts raw sensor joint positions (meters) into engineering
//! units (millimetres by default) so that thresholds written as integers in
//! gesture definitions have a stable meaning.

use glam::Vec3;
use std::collections::HashMap;

use crate::types::{JointId, PlayerId, RawJoint, Skeleton, TrackingState};

/// Default scale applied to sensor coordinates (meters to millimetres)
pub const DEFAULT_JOINT_SCALE: f32 = 1000.0;

/// Skeleton with every joint expressed in engineering units
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSkeleton {
    pub player: PlayerId,
    /// Skeleton position as reported by the sensor, left in meters
    pub position: Option<Vec3>,
    pub joints: HashMap<JointId, Vec3>,
    /// Joints the sensor could not track this frame
    pub untracked: Vec<JointId>,
}

impl NormalizedSkeleton {
    pub fn joint(&self, joint: JointId) -> Option<Vec3> {
        self.joints.get(&joint).copied()
    }
}

/// Normalizer for converting raw joints into engineering-unit points
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    scale: f32,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(DEFAULT_JOINT_SCALE)
    }
}

impl Normalizer {
    pub fn new(scale: f32) -> Self {
        Self { scale }
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Normalize one raw joint position
    pub fn normalize_joint(&self, joint: &RawJoint) -> Vec3 {
        Vec3::new(joint.x, joint.y, joint.z) * self.scale
    }

    /// Normalize a whole skeleton
    pub fn normalize(&self, skeleton: &Skeleton) -> NormalizedSkeleton {
        let mut untracked = Vec::new();
        let joints = skeleton
            .joints
            .iter()
            .map(|(id, raw)| {
                if raw.tracking_state == TrackingState::NotTracked {
                    untracked.push(*id);
                }
                (*id, self.normalize_joint(raw))
            })
            .collect();
        untracked.sort();

        NormalizedSkeleton {
            player: skeleton.tracking_id,
            position: skeleton.position.as_ref().map(|p| Vec3::new(p.x, p.y, p.z)),
            joints,
            untracked,
        }
    }
}
