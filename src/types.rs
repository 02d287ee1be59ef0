//! Core types for skeletal gesture recognition
//!
//! This module defines the data that flows through each stage of recognition:
//! raw skeleton frames from the sensor, gesture definitions built from steps and
//! conditions, and the static reference points conditions may compare against.

use chrono::{DateTime, Utc};
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::GestureError;

/// Stable per-session tracking identifier assigned by the sensor
pub type PlayerId = u32;

/// Default gesture timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Skeleton joint identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JointId {
    HipCenter,
    Spine,
    ShoulderCenter,
    Head,
    ShoulderLeft,
    ElbowLeft,
    WristLeft,
    HandLeft,
    ShoulderRight,
    ElbowRight,
    WristRight,
    HandRight,
    HipLeft,
    KneeLeft,
    AnkleLeft,
    FootLeft,
    HipRight,
    KneeRight,
    AnkleRight,
    FootRight,
}

impl JointId {
    /// Every joint, in sensor order
    pub const ALL: [JointId; 20] = [
        JointId::HipCenter,
        JointId::Spine,
        JointId::ShoulderCenter,
        JointId::Head,
        JointId::ShoulderLeft,
        JointId::ElbowLeft,
        JointId::WristLeft,
        JointId::HandLeft,
        JointId::ShoulderRight,
        JointId::ElbowRight,
        JointId::WristRight,
        JointId::HandRight,
        JointId::HipLeft,
        JointId::KneeLeft,
        JointId::AnkleLeft,
        JointId::FootLeft,
        JointId::HipRight,
        JointId::KneeRight,
        JointId::AnkleRight,
        JointId::FootRight,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JointId::HipCenter => "HipCenter",
            JointId::Spine => "Spine",
            JointId::ShoulderCenter => "ShoulderCenter",
            JointId::Head => "Head",
            JointId::ShoulderLeft => "ShoulderLeft",
            JointId::ElbowLeft => "ElbowLeft",
            JointId::WristLeft => "WristLeft",
            JointId::HandLeft => "HandLeft",
            JointId::ShoulderRight => "ShoulderRight",
            JointId::ElbowRight => "ElbowRight",
            JointId::WristRight => "WristRight",
            JointId::HandRight => "HandRight",
            JointId::HipLeft => "HipLeft",
            JointId::KneeLeft => "KneeLeft",
            JointId::AnkleLeft => "AnkleLeft",
            JointId::FootLeft => "FootLeft",
            JointId::HipRight => "HipRight",
            JointId::KneeRight => "KneeRight",
            JointId::AnkleRight => "AnkleRight",
            JointId::FootRight => "FootRight",
        }
    }
}

impl fmt::Display for JointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JointId {
    type Err = GestureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JointId::ALL
            .iter()
            .copied()
            .find(|joint| joint.as_str() == s)
            .ok_or_else(|| GestureError::UnknownJoint(s.to_string()))
    }
}

/// Geometric relation between an actor joint and its relative
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Relation {
    Above,
    Below,
    LeftOf,
    RightOf,
    InfrontOf,
    Behind,
    Distance,
    XChange,
    YChange,
    ZChange,
}

impl Relation {
    pub const ALL: [Relation; 10] = [
        Relation::Above,
        Relation::Below,
        Relation::LeftOf,
        Relation::RightOf,
        Relation::InfrontOf,
        Relation::Behind,
        Relation::Distance,
        Relation::XChange,
        Relation::YChange,
        Relation::ZChange,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::Above => "Above",
            Relation::Below => "Below",
            Relation::LeftOf => "LeftOf",
            Relation::RightOf => "RightOf",
            Relation::InfrontOf => "InfrontOf",
            Relation::Behind => "Behind",
            Relation::Distance => "Distance",
            Relation::XChange => "XChange",
            Relation::YChange => "YChange",
            Relation::ZChange => "ZChange",
        }
    }

    /// Relations measured against the player's reference snapshot
    pub fn is_delta(&self) -> bool {
        matches!(self, Relation::XChange | Relation::YChange | Relation::ZChange)
    }

    /// Relations whose value is 0.0 or 1.0
    pub fn is_boolean(&self) -> bool {
        !self.is_delta() && *self != Relation::Distance
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Relation {
    type Err = GestureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Relation::ALL
            .iter()
            .copied()
            .find(|relation| relation.as_str() == s)
            .ok_or_else(|| GestureError::UnknownRelation(s.to_string()))
    }
}

/// A single geometric condition of a gesture step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Joint the condition is evaluated for
    pub actor_joint: JointId,
    /// Kind of measurement
    pub relation: Relation,
    /// Joint name or static reference id the actor is compared against
    pub relative_id: String,
    /// Signed threshold for delta and distance relations
    #[serde(default)]
    pub deviation: i32,
}

impl Condition {
    pub fn new(
        actor_joint: JointId,
        relation: Relation,
        relative_id: impl Into<String>,
        deviation: i32,
    ) -> Self {
        Self {
            actor_joint,
            relation,
            relative_id: relative_id.into(),
            deviation,
        }
    }
}

/// One step of a gesture sequence
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    #[serde(default)]
    pub success_conditions: Vec<Condition>,
    #[serde(default)]
    pub failure_conditions: Vec<Condition>,
}

impl Step {
    /// All conditions of the step, success first
    pub fn conditions(&self) -> impl Iterator<Item = &Condition> {
        self.success_conditions
            .iter()
            .chain(self.failure_conditions.iter())
    }
}

/// Named gesture made of an ordered list of steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GestureDefinition {
    pub name: String,
    /// Time allowed from the first completed step to the last (milliseconds)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub steps: Vec<Step>,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl GestureDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            steps: Vec::new(),
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }
}

/// Named absolute position usable in place of a relative joint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticReferencePoint {
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl StaticReferencePoint {
    pub fn new(id: impl Into<String>, position: Vec3) -> Self {
        Self {
            id: id.into(),
            x: position.x,
            y: position.y,
            z: position.z,
        }
    }

    pub fn position(&self) -> Vec3 {
        Vec3::new(self.x, self.y, self.z)
    }
}

/// Sensor tracking state of a skeleton or joint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingState {
    #[default]
    Tracked,
    Inferred,
    PositionOnly,
    NotTracked,
}

/// Raw joint position as reported by the sensor (meters)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawJoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    #[serde(default)]
    pub tracking_state: TrackingState,
}

impl RawJoint {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self {
            x,
            y,
            z,
            tracking_state: TrackingState::Tracked,
        }
    }
}

/// One skeleton of a sensor frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Skeleton {
    pub tracking_id: PlayerId,
    #[serde(default)]
    pub tracking_state: TrackingState,
    /// Skeleton center of mass (meters)
    #[serde(default)]
    pub position: Option<RawJoint>,
    #[serde(default)]
    pub joints: HashMap<JointId, RawJoint>,
}

impl Skeleton {
    pub fn new(tracking_id: PlayerId) -> Self {
        Self {
            tracking_id,
            tracking_state: TrackingState::Tracked,
            position: None,
            joints: HashMap::new(),
        }
    }

    /// Builder helper setting a joint position in meters
    pub fn with_joint(mut self, joint: JointId, x: f32, y: f32, z: f32) -> Self {
        self.joints.insert(joint, RawJoint::new(x, y, z));
        self
    }

    pub fn is_tracked(&self) -> bool {
        self.tracking_state == TrackingState::Tracked
    }
}

/// A sensor frame carrying every skeleton slot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub skeletons: Vec<Skeleton>,
}

impl Frame {
    pub fn new(skeletons: Vec<Skeleton>) -> Self {
        Self {
            timestamp: None,
            skeletons,
        }
    }

    /// Skeletons fully tracked by the sensor
    pub fn tracked(&self) -> impl Iterator<Item = &Skeleton> {
        self.skeletons.iter().filter(|s| s.is_tracked())
    }

    /// Every non-zero tracking id present in the frame
    pub fn present_players(&self) -> Vec<PlayerId> {
        self.skeletons
            .iter()
            .filter(|s| s.tracking_id != 0 && s.tracking_state != TrackingState::NotTracked)
            .map(|s| s.tracking_id)
            .collect()
    }
}

/// Position of a joint or player from the last processed frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointInfo {
    pub player: PlayerId,
    pub tracked: bool,
    pub position: Vec3,
}
