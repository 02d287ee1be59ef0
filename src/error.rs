//! Error types for skeletal gesture recognition

use thiserror::Error;

/// Errors surfaced by configuration, persistence, and the frame callback
#[derive(Debug, Error)]
pub enum GestureError {
    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Unknown gesture: {0}")]
    UnknownGesture(String),

    #[error("Gesture already defined: {0}")]
    DuplicateGesture(String),

    #[error("Gesture {0} has no steps")]
    EmptyGesture(String),

    #[error("Step {step} out of range for gesture {gesture} ({count} steps)")]
    StepOutOfRange {
        gesture: String,
        step: usize,
        count: usize,
    },

    #[error("Condition {index} out of range for step {step} of gesture {gesture} ({count} conditions)")]
    ConditionOutOfRange {
        gesture: String,
        step: usize,
        index: usize,
        count: usize,
    },

    #[error("Static reference already registered: {0}")]
    DuplicateReference(String),

    #[error("No gesture selected; add a gesture or name one explicitly")]
    NoGestureSelected,

    #[error("No step selected; add a step or pass a step index")]
    NoStepSelected,

    #[error("Unknown joint: {0}")]
    UnknownJoint(String),

    #[error("Unknown relation: {0}")]
    UnknownRelation(String),

    #[error("Tracking has not been started")]
    NotTracking,
}
