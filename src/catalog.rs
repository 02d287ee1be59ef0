//! Gesture and static reference configuration
//!
//! The catalog is what the host edits: gestures are created by name, steps and
//! conditions appended to them, and static reference points registered. Calls
//! that omit the gesture or step fall back to the last one touched, so a host
//! script can build a gesture line by line.

use glam::Vec3;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::GestureError;
use crate::types::{Condition, GestureDefinition, Step, StaticReferencePoint, DEFAULT_TIMEOUT_MS};

/// Static reference points in registration order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceSet {
    points: Vec<StaticReferencePoint>,
    by_id: HashMap<String, usize>,
}

impl ReferenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a point; ids are immutable once registered
    pub fn insert(&mut self, point: StaticReferencePoint) -> Result<(), GestureError> {
        if self.by_id.contains_key(&point.id) {
            return Err(GestureError::DuplicateReference(point.id));
        }
        self.by_id.insert(point.id.clone(), self.points.len());
        self.points.push(point);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&StaticReferencePoint> {
        self.by_id.get(id).map(|&i| &self.points[i])
    }

    pub fn position(&self, id: &str) -> Option<Vec3> {
        self.get(id).map(StaticReferencePoint::position)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StaticReferencePoint> {
        self.points.iter()
    }

    pub fn to_vec(&self) -> Vec<StaticReferencePoint> {
        self.points.clone()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn clear(&mut self) {
        self.points.clear();
        self.by_id.clear();
    }
}

/// Which condition list of a step to edit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionKind {
    Success,
    Failure,
}

impl ConditionKind {
    fn list(self, step: &mut Step) -> &mut Vec<Condition> {
        match self {
            ConditionKind::Success => &mut step.success_conditions,
            ConditionKind::Failure => &mut step.failure_conditions,
        }
    }
}

/// Configured gestures and static reference points
#[derive(Debug, Clone)]
pub struct GestureCatalog {
    gestures: Vec<GestureDefinition>,
    references: ReferenceSet,
    default_timeout_ms: u64,
    last_gesture: Option<String>,
    last_step: Option<usize>,
}

impl Default for GestureCatalog {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT_MS)
    }
}

impl GestureCatalog {
    pub fn new(default_timeout_ms: u64) -> Self {
        Self {
            gestures: Vec::new(),
            references: ReferenceSet::new(),
            default_timeout_ms,
            last_gesture: None,
            last_step: None,
        }
    }

    /// Timeout given to gestures created by [`GestureCatalog::add_gesture`]
    pub fn set_default_timeout_ms(&mut self, timeout_ms: u64) {
        self.default_timeout_ms = timeout_ms;
    }

    pub fn gestures(&self) -> &[GestureDefinition] {
        &self.gestures
    }

    pub fn references(&self) -> &ReferenceSet {
        &self.references
    }

    pub fn gesture(&self, name: &str) -> Option<&GestureDefinition> {
        self.gestures.iter().find(|g| g.name == name)
    }

    fn gesture_mut(&mut self, name: &str) -> Result<&mut GestureDefinition, GestureError> {
        self.gestures
            .iter_mut()
            .find(|g| g.name == name)
            .ok_or_else(|| GestureError::UnknownGesture(name.to_string()))
    }

    /// Explicit gesture name, or the last one touched
    fn select(&mut self, gesture: Option<&str>) -> Result<String, GestureError> {
        let name = match gesture {
            Some(name) => name.to_string(),
            None => self
                .last_gesture
                .clone()
                .ok_or(GestureError::NoGestureSelected)?,
        };
        if self.gesture(&name).is_none() {
            return Err(GestureError::UnknownGesture(name));
        }
        if self.last_gesture.as_deref() != Some(name.as_str()) {
            self.last_step = None;
        }
        self.last_gesture = Some(name.clone());
        Ok(name)
    }

    /// Add an empty gesture and make it current
    pub fn add_gesture(&mut self, name: &str) -> Result<(), GestureError> {
        if self.gesture(name).is_some() {
            warn!(gesture = name, "rejected duplicate gesture");
            return Err(GestureError::DuplicateGesture(name.to_string()));
        }
        self.gestures
            .push(GestureDefinition::new(name).with_timeout_ms(self.default_timeout_ms));
        self.last_gesture = Some(name.to_string());
        self.last_step = None;
        debug!(gesture = name, "gesture added");
        Ok(())
    }

    /// Insert a fully built gesture
    pub fn insert_gesture(&mut self, gesture: GestureDefinition) -> Result<(), GestureError> {
        if self.gesture(&gesture.name).is_some() {
            return Err(GestureError::DuplicateGesture(gesture.name));
        }
        self.last_gesture = Some(gesture.name.clone());
        self.last_step = gesture.steps.len().checked_sub(1);
        self.gestures.push(gesture);
        Ok(())
    }

    /// Remove a gesture, returning its definition
    pub fn remove_gesture(&mut self, name: &str) -> Result<GestureDefinition, GestureError> {
        let position = self
            .gestures
            .iter()
            .position(|g| g.name == name)
            .ok_or_else(|| GestureError::UnknownGesture(name.to_string()))?;
        if self.last_gesture.as_deref() == Some(name) {
            self.last_gesture = None;
            self.last_step = None;
        }
        Ok(self.gestures.remove(position))
    }

    pub fn set_timeout(&mut self, gesture: Option<&str>, timeout_ms: u64) -> Result<(), GestureError> {
        let name = self.select(gesture)?;
        self.gesture_mut(&name)?.timeout_ms = timeout_ms;
        Ok(())
    }

    /// Append an empty step, returning its index
    pub fn add_step(&mut self, gesture: Option<&str>) -> Result<usize, GestureError> {
        let name = self.select(gesture)?;
        let definition = self.gesture_mut(&name)?;
        definition.steps.push(Step::default());
        let index = definition.steps.len() - 1;
        self.last_step = Some(index);
        Ok(index)
    }

    fn step_mut(&mut self, gesture: Option<&str>, step: Option<usize>) -> Result<&mut Step, GestureError> {
        let name = self.select(gesture)?;
        let index = match step {
            Some(index) => index,
            None => self.last_step.ok_or(GestureError::NoStepSelected)?,
        };
        let definition = self.gesture_mut(&name)?;
        let count = definition.steps.len();
        if index >= count {
            return Err(GestureError::StepOutOfRange {
                gesture: name,
                step: index,
                count,
            });
        }
        self.last_step = Some(index);
        // Re-borrow after updating the cursor
        Ok(&mut self.gesture_mut(&name)?.steps[index])
    }

    /// Append a condition, returning its index within the list
    pub fn add_condition(
        &mut self,
        kind: ConditionKind,
        condition: Condition,
        step: Option<usize>,
        gesture: Option<&str>,
    ) -> Result<usize, GestureError> {
        let list = kind.list(self.step_mut(gesture, step)?);
        list.push(condition);
        Ok(list.len() - 1)
    }

    /// Replace an existing condition
    pub fn set_condition(
        &mut self,
        kind: ConditionKind,
        gesture: &str,
        step: usize,
        index: usize,
        condition: Condition,
    ) -> Result<(), GestureError> {
        let list = kind.list(self.step_mut(Some(gesture), Some(step))?);
        let count = list.len();
        match list.get_mut(index) {
            Some(slot) => {
                *slot = condition;
                Ok(())
            }
            None => Err(GestureError::ConditionOutOfRange {
                gesture: gesture.to_string(),
                step,
                index,
                count,
            }),
        }
    }

    pub fn add_static_reference(&mut self, id: &str, position: Vec3) -> Result<(), GestureError> {
        self.references
            .insert(StaticReferencePoint::new(id, position))
            .inspect_err(|_| warn!(reference = id, "rejected duplicate static reference"))
    }

    /// Replace every gesture, rejecting duplicate names
    pub fn replace_gestures(&mut self, gestures: Vec<GestureDefinition>) -> Result<(), GestureError> {
        let mut seen = std::collections::HashSet::new();
        for gesture in &gestures {
            if !seen.insert(gesture.name.as_str()) {
                return Err(GestureError::DuplicateGesture(gesture.name.clone()));
            }
        }
        self.gestures = gestures;
        self.last_gesture = None;
        self.last_step = None;
        Ok(())
    }

    /// Register every point; nothing is added if any id collides
    pub fn add_references(&mut self, points: Vec<StaticReferencePoint>) -> Result<(), GestureError> {
        let mut staged = self.references.clone();
        for point in points {
            staged.insert(point)?;
        }
        self.references = staged;
        Ok(())
    }

    /// Reject gestures that could never be evaluated
    pub fn validate(&self) -> Result<(), GestureError> {
        match self.gestures.iter().find(|g| g.steps.is_empty()) {
            Some(empty) => Err(GestureError::EmptyGesture(empty.name.clone())),
            None => Ok(()),
        }
    }
}
