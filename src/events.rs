//! Engine events and sinks
//!
//! Every observable transition of the engine is an [`EngineEvent`]. Hosts that
//! expect the plugin-style text callbacks can use
//! [`EngineEvent::processing_text`], which renders the same messages a script
//! would log, with [`FRAME_MARKER`] reserved for the end-of-frame notification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};

use crate::types::PlayerId;

/// Processing text reserved for the end-of-frame notification
pub const FRAME_MARKER: &str = "Frame";

/// Observable engine transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Tracking started with a freshly built relationship index
    TrackingStarted { relationships: usize },
    /// A step's success conditions were met
    StepCompleted {
        player: PlayerId,
        gesture: String,
        step: usize,
        of: usize,
    },
    /// The last step was completed
    GestureCompleted { player: PlayerId, gesture: String },
    /// Recognition callback: the gesture was performed
    GestureRecognized { player: PlayerId, gesture: String },
    /// A failure condition reset the gesture
    StepReset { player: PlayerId, gesture: String },
    /// The gesture deadline expired
    TimeoutReset { player: PlayerId, gesture: String },
    /// Every player of a frame was processed
    FrameProcessed,
}

impl EngineEvent {
    /// Host text for processing events, `None` for the recognition callback
    pub fn processing_text(&self) -> Option<String> {
        match self {
            EngineEvent::TrackingStarted { relationships } => {
                Some(format!("Tracking Started With {relationships} Relationships"))
            }
            EngineEvent::StepCompleted {
                player,
                gesture,
                step,
                of,
            } => Some(format!(
                "Player {player} Has Completed Gesture {gesture} Step {step} Of {of}"
            )),
            EngineEvent::GestureCompleted { player, gesture } => {
                Some(format!("Player {player} Has Completed Gesture {gesture}"))
            }
            EngineEvent::GestureRecognized { .. } => None,
            EngineEvent::StepReset { player, gesture } => {
                Some(format!("Player {player} Gesture {gesture} Step Reset"))
            }
            EngineEvent::TimeoutReset { player, gesture } => {
                Some(format!("Player {player} Gesture {gesture} Reset (Timeout)"))
            }
            EngineEvent::FrameProcessed => Some(FRAME_MARKER.to_string()),
        }
    }

    pub fn is_recognition(&self) -> bool {
        matches!(self, EngineEvent::GestureRecognized { .. })
    }
}

/// Receiver of engine events
///
/// Called without the engine lock held, from the frame caller's thread or
/// from the timer thread.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: &EngineEvent);
}

impl<F> EventSink for F
where
    F: Fn(&EngineEvent) + Send + Sync,
{
    fn on_event(&self, event: &EngineEvent) {
        self(event)
    }
}

/// Sink that drops every event
pub struct NullSink;

impl EventSink for NullSink {
    fn on_event(&self, _event: &EngineEvent) {}
}

/// Event with the wall-clock time it was received
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: EngineEvent,
}

/// Sink queueing events until drained
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every queued event
    pub fn drain(&self) -> Vec<RecordedEvent> {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *events)
    }

    /// Copy of the queued events
    pub fn snapshot(&self) -> Vec<EngineEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|r| r.event.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for EventLog {
    fn on_event(&self, event: &EngineEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedEvent {
                at: Utc::now(),
                event: event.clone(),
            });
    }
}
