//! Gesture engine
//!
//! Owns the whole recognition state behind one mutex. Two sources mutate it:
//! the host calling [`GestureEngine::process_frame`] once per sensor frame, and
//! a background timeout thread that sleeps on a condition variable until the
//! next armed deadline. Events produced under the lock are handed to the
//! [`EventSink`] only after the lock is released, so a sink may call back into
//! the engine.

use glam::Vec3;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::catalog::{ConditionKind, GestureCatalog};
use crate::config::EngineConfig;
use crate::error::GestureError;
use crate::evaluator::{Evaluator, RelationshipTable};
use crate::events::{EngineEvent, EventSink};
use crate::index::UsedRelationships;
use crate::machine::GestureMachine;
use crate::normalizer::{NormalizedSkeleton, Normalizer};
use crate::persistence;
use crate::presence::{PresenceEvent, PresenceTracker};
use crate::snapshot::SnapshotStore;
use crate::types::{
    Condition, Frame, GestureDefinition, JointId, JointInfo, PlayerId, Relation,
    StaticReferencePoint,
};

/// What a frame pass did besides emitting engine events
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    /// Tracked skeletons that were evaluated
    pub players: usize,
    /// Presence transitions observed in this frame
    pub presence: Vec<PresenceEvent>,
}

struct EngineState {
    config: EngineConfig,
    catalog: GestureCatalog,
    index: UsedRelationships,
    normalizer: Normalizer,
    snapshots: SnapshotStore,
    machine: GestureMachine,
    presence: PresenceTracker,
    tables: HashMap<PlayerId, RelationshipTable>,
    skeletons: HashMap<PlayerId, NormalizedSkeleton>,
    frame_order: Vec<PlayerId>,
    tracking: bool,
    session_id: Option<Uuid>,
    frames: u64,
}

impl EngineState {
    fn new(config: EngineConfig) -> Self {
        Self {
            catalog: GestureCatalog::new(config.default_timeout_ms),
            index: UsedRelationships::default(),
            normalizer: Normalizer::new(config.joint_scale),
            snapshots: SnapshotStore::new(),
            machine: GestureMachine::new(config.progress_scope).with_seeding(config.seed_snapshots),
            presence: PresenceTracker::new(config.presence_drop_frames),
            tables: HashMap::new(),
            skeletons: HashMap::new(),
            frame_order: Vec::new(),
            tracking: false,
            session_id: None,
            frames: 0,
            config,
        }
    }

    fn forget_player(&mut self, player: PlayerId) {
        self.snapshots.forget(player);
        self.machine.forget_player(player);
        self.tables.remove(&player);
        self.skeletons.remove(&player);
        self.frame_order.retain(|p| *p != player);
    }

    fn clear_session(&mut self) {
        self.machine.reset_all();
        self.snapshots = SnapshotStore::new();
        self.presence = PresenceTracker::new(self.config.presence_drop_frames);
        self.tables.clear();
        self.skeletons.clear();
        self.frame_order.clear();
        self.frames = 0;
    }
}

struct Shared {
    state: Mutex<EngineState>,
    wake: Condvar,
    sink: Box<dyn EventSink>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dispatch(&self, events: &[EngineEvent]) {
        for event in events {
            self.sink.on_event(event);
        }
    }
}

/// Timeout thread body; exits once tracking stops
fn run_timeouts(shared: Arc<Shared>) {
    let mut state = shared.lock();
    while state.tracking {
        let now = Instant::now();
        let events = {
            let EngineState { machine, catalog, .. } = &mut *state;
            machine.expire(catalog.gestures(), now)
        };
        if !events.is_empty() {
            drop(state);
            shared.dispatch(&events);
            state = shared.lock();
            continue;
        }

        let next = state.machine.next_deadline();
        state = match next {
            Some(deadline) => {
                let wait = deadline.saturating_duration_since(now);
                match shared.wake.wait_timeout(state, wait) {
                    Ok((guard, _)) => guard,
                    Err(poisoned) => poisoned.into_inner().0,
                }
            }
            None => shared
                .wake
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner),
        };
    }
    trace!("timeout thread exiting");
}

/// Skeletal gesture recognition engine
pub struct GestureEngine {
    shared: Arc<Shared>,
    timer: Option<JoinHandle<()>>,
}

impl GestureEngine {
    /// Create an idle engine delivering its events to `sink`
    pub fn new(config: EngineConfig, sink: impl EventSink + 'static) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(EngineState::new(config)),
                wake: Condvar::new(),
                sink: Box::new(sink),
            }),
            timer: None,
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start a tracking session
    ///
    /// Rebuilds the used-relationships index from the current gestures, clears
    /// every counter, timer, snapshot and cached frame, and starts the timeout
    /// thread. Restarting an active engine stops it first.
    pub fn start(&mut self) -> Result<Uuid, GestureError> {
        self.stop();

        let (session, started) = {
            let mut state = self.shared.lock();
            state.catalog.validate()?;

            let index = UsedRelationships::build(state.catalog.gestures());
            for relative in index.named_relatives() {
                if !state.catalog.references().contains(relative) {
                    warn!(relative, "relative is neither a joint nor a static reference");
                }
            }
            let relationships = index.len();
            state.index = index;
            state.clear_session();

            let session = Uuid::new_v4();
            state.session_id = Some(session);
            state.tracking = true;
            info!(
                session = %session,
                gestures = state.catalog.gestures().len(),
                relationships,
                "tracking started"
            );
            (session, EngineEvent::TrackingStarted { relationships })
        };

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("gesture-timeouts".to_string())
            .spawn(move || run_timeouts(shared));
        match spawned {
            Ok(handle) => self.timer = Some(handle),
            Err(e) => {
                self.shared.lock().tracking = false;
                return Err(e.into());
            }
        }

        self.shared.dispatch(&[started]);
        Ok(session)
    }

    /// Stop tracking and join the timeout thread
    ///
    /// Progress is left frozen; the next `start` clears it.
    pub fn stop(&mut self) {
        let was_tracking = {
            let mut state = self.shared.lock();
            let was_tracking = state.tracking;
            state.tracking = false;
            state.machine.reset_timers();
            was_tracking
        };
        self.shared.wake.notify_all();

        if let Some(handle) = self.timer.take() {
            if handle.join().is_err() {
                warn!("timeout thread panicked");
            }
        }
        if was_tracking {
            info!("tracking stopped");
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.shared.lock().tracking
    }

    /// Id of the current or last tracking session
    pub fn session_id(&self) -> Option<Uuid> {
        self.shared.lock().session_id
    }

    /// Frames processed in the current session
    pub fn frames_processed(&self) -> u64 {
        self.shared.lock().frames
    }

    // ========================================================================
    // Frame processing
    // ========================================================================

    /// Run one sensor frame through every gesture
    pub fn process_frame(&self, frame: &Frame) -> Result<FrameReport, GestureError> {
        let now = Instant::now();
        let (events, report) = {
            let mut guard = self.shared.lock();
            if !guard.tracking {
                return Err(GestureError::NotTracking);
            }
            let state = &mut *guard;

            let presence = state.presence.observe(&frame.present_players());
            for event in &presence {
                if let PresenceEvent::Removed { player } = event {
                    debug!(player, "player removed after absence");
                    state.forget_player(*player);
                }
            }

            state.tables.clear();
            state.skeletons.clear();
            state.frame_order.clear();

            let mut events = Vec::new();
            let mut players = 0;
            for skeleton in frame.tracked().filter(|s| s.tracking_id != 0) {
                let normalized = state.normalizer.normalize(skeleton);
                let table = Evaluator::new(&state.index, state.catalog.references(), &state.snapshots)
                    .evaluate(&normalized);

                events.extend(state.machine.run_player(
                    state.catalog.gestures(),
                    &normalized,
                    &table,
                    &state.index,
                    &mut state.snapshots,
                    now,
                ));

                let player = normalized.player;
                state.frame_order.push(player);
                state.tables.insert(player, table);
                state.skeletons.insert(player, normalized);
                players += 1;
            }

            state.frames += 1;
            events.push(EngineEvent::FrameProcessed);
            trace!(frame = state.frames, players, events = events.len(), "frame processed");
            (events, FrameReport { players, presence })
        };

        // Deadlines may have moved
        self.shared.wake.notify_all();
        self.shared.dispatch(&events);
        Ok(report)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Progress of a gesture for a player (shared counters ignore the player)
    pub fn progress(&self, player: PlayerId, gesture: &str) -> usize {
        self.shared.lock().machine.progress().get(player, gesture)
    }

    /// Relationship value computed for a player in the last frame
    pub fn relationship_value(
        &self,
        player: PlayerId,
        actor: JointId,
        relation: Relation,
        relative: &str,
    ) -> Option<f32> {
        self.shared
            .lock()
            .tables
            .get(&player)
            .and_then(|table| table.lookup(actor, relative, relation))
    }

    /// Normalized joint position from the last frame
    pub fn joint_position(&self, player: PlayerId, joint: JointId) -> Option<JointInfo> {
        let state = self.shared.lock();
        let skeleton = state.skeletons.get(&player)?;
        Some(JointInfo {
            player,
            tracked: !skeleton.untracked.contains(&joint),
            position: skeleton.joint(joint)?,
        })
    }

    /// Sensor skeleton position from the last frame, in meters
    ///
    /// Unlike [`GestureEngine::joint_position`] this is not scaled.
    pub fn player_position(&self, player: PlayerId) -> Option<JointInfo> {
        let state = self.shared.lock();
        let position = state.skeletons.get(&player)?.position?;
        Some(JointInfo {
            player,
            tracked: true,
            position,
        })
    }

    /// Players evaluated in the last frame, in frame order
    pub fn tracked_players(&self) -> Vec<PlayerId> {
        self.shared.lock().frame_order.clone()
    }

    pub fn first_tracked_player(&self) -> Option<PlayerId> {
        self.shared.lock().frame_order.first().copied()
    }

    /// Clear every piece of state held for a player
    pub fn forget_player(&self, player: PlayerId) {
        self.shared.lock().forget_player(player);
        self.shared.wake.notify_all();
    }

    /// Index built by the last `start`
    pub fn used_relationships(&self) -> UsedRelationships {
        self.shared.lock().index.clone()
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    pub fn config(&self) -> EngineConfig {
        self.shared.lock().config.clone()
    }

    /// Apply new settings; changing the progress scope resets every counter
    pub fn set_config(&self, config: EngineConfig) {
        let mut state = self.shared.lock();
        state.normalizer = Normalizer::new(config.joint_scale);
        state.machine.set_scope(config.progress_scope);
        state.machine.set_seeding(config.seed_snapshots);
        if config.presence_drop_frames != state.config.presence_drop_frames {
            state.presence = PresenceTracker::new(config.presence_drop_frames);
        }
        state.catalog.set_default_timeout_ms(config.default_timeout_ms);
        state.config = config;
        drop(state);
        self.shared.wake.notify_all();
    }

    pub fn gestures(&self) -> Vec<GestureDefinition> {
        self.shared.lock().catalog.gestures().to_vec()
    }

    pub fn references(&self) -> Vec<StaticReferencePoint> {
        self.shared.lock().catalog.references().to_vec()
    }

    pub fn add_gesture(&self, name: &str) -> Result<(), GestureError> {
        self.shared.lock().catalog.add_gesture(name)
    }

    pub fn insert_gesture(&self, gesture: GestureDefinition) -> Result<(), GestureError> {
        self.shared.lock().catalog.insert_gesture(gesture)
    }

    pub fn remove_gesture(&self, name: &str) -> Result<GestureDefinition, GestureError> {
        let mut state = self.shared.lock();
        let removed = state.catalog.remove_gesture(name)?;
        state.machine.forget_gesture(name);
        Ok(removed)
    }

    /// Set a gesture's timeout; `None` targets the last gesture touched
    pub fn set_timeout(&self, gesture: Option<&str>, timeout_ms: u64) -> Result<(), GestureError> {
        self.shared.lock().catalog.set_timeout(gesture, timeout_ms)
    }

    /// Append an empty step, returning its index
    pub fn add_step(&self, gesture: Option<&str>) -> Result<usize, GestureError> {
        self.shared.lock().catalog.add_step(gesture)
    }

    pub fn add_success_condition(
        &self,
        condition: Condition,
        step: Option<usize>,
        gesture: Option<&str>,
    ) -> Result<usize, GestureError> {
        self.shared
            .lock()
            .catalog
            .add_condition(ConditionKind::Success, condition, step, gesture)
    }

    pub fn add_failure_condition(
        &self,
        condition: Condition,
        step: Option<usize>,
        gesture: Option<&str>,
    ) -> Result<usize, GestureError> {
        self.shared
            .lock()
            .catalog
            .add_condition(ConditionKind::Failure, condition, step, gesture)
    }

    pub fn set_success_condition(
        &self,
        gesture: &str,
        step: usize,
        index: usize,
        condition: Condition,
    ) -> Result<(), GestureError> {
        self.shared
            .lock()
            .catalog
            .set_condition(ConditionKind::Success, gesture, step, index, condition)
    }

    pub fn set_failure_condition(
        &self,
        gesture: &str,
        step: usize,
        index: usize,
        condition: Condition,
    ) -> Result<(), GestureError> {
        self.shared
            .lock()
            .catalog
            .set_condition(ConditionKind::Failure, gesture, step, index, condition)
    }

    pub fn add_static_reference(&self, id: &str, position: Vec3) -> Result<(), GestureError> {
        self.shared.lock().catalog.add_static_reference(id, position)
    }

    /// Replace every gesture with the contents of a JSON document
    ///
    /// The document is parsed before anything is touched. Takes effect for
    /// evaluation at the next `start`.
    pub fn load_gestures_json(&self, json: &str) -> Result<usize, GestureError> {
        let gestures = persistence::gestures_from_json(json)?;
        let count = gestures.len();
        let mut state = self.shared.lock();
        state.catalog.replace_gestures(gestures)?;
        state.machine.reset_all();
        debug!(count, "gestures loaded");
        Ok(count)
    }

    /// Register every static reference of a JSON document
    pub fn load_references_json(&self, json: &str) -> Result<usize, GestureError> {
        let points = persistence::references_from_json(json)?;
        let count = points.len();
        self.shared.lock().catalog.add_references(points)?;
        debug!(count, "static references loaded");
        Ok(count)
    }

    pub fn gestures_json(&self) -> Result<String, GestureError> {
        persistence::gestures_to_json(self.shared.lock().catalog.gestures())
    }

    pub fn references_json(&self) -> Result<String, GestureError> {
        persistence::references_to_json(&self.references())
    }
}

impl Drop for GestureEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
