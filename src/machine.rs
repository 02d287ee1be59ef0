//! Gesture state machine
//!
//! Each gesture owns an integer progress counter: 0 is idle, and reaching the
//! gesture's step count is recognized and reset to 0 in the same pass. Every
//! frame, for every tracked player, the step at the current progress is
//! checked against the player's relationship table:
//! 1. a firing failure condition resets progress
//! 2. otherwise, when every success condition is met, progress advances
//! 3. otherwise nothing happens
//!
//! Both transitions refresh the player's reference snapshots. The first
//! completed step arms the (player, gesture) timeout; recognition, failure and
//! expiry disarm it.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::ProgressScope;
use crate::evaluator::RelationshipTable;
use crate::events::EngineEvent;
use crate::index::UsedRelationships;
use crate::normalizer::NormalizedSkeleton;
use crate::rules::{check_step, StepOutcome};
use crate::scheduler::TimerTable;
use crate::snapshot::SnapshotStore;
use crate::types::{GestureDefinition, PlayerId};

/// Progress counter identity; the player is `None` for shared counters
pub type ProgressKey = (Option<PlayerId>, String);

/// Progress counters under a scope
#[derive(Debug, Clone, Default)]
pub struct ProgressTable {
    scope: ProgressScope,
    counters: HashMap<ProgressKey, usize>,
}

impl ProgressTable {
    pub fn new(scope: ProgressScope) -> Self {
        Self {
            scope,
            counters: HashMap::new(),
        }
    }

    pub fn scope(&self) -> ProgressScope {
        self.scope
    }

    fn key(&self, player: PlayerId, gesture: &str) -> ProgressKey {
        match self.scope {
            ProgressScope::Shared => (None, gesture.to_string()),
            ProgressScope::PerPlayer => (Some(player), gesture.to_string()),
        }
    }

    pub fn get(&self, player: PlayerId, gesture: &str) -> usize {
        self.counters
            .get(&self.key(player, gesture))
            .copied()
            .unwrap_or(0)
    }

    pub fn set(&mut self, player: PlayerId, gesture: &str, progress: usize) {
        let key = self.key(player, gesture);
        if progress == 0 {
            self.counters.remove(&key);
        } else {
            self.counters.insert(key, progress);
        }
    }

    pub fn reset(&mut self, player: PlayerId, gesture: &str) {
        self.set(player, gesture, 0);
    }

    /// Drop per-player counters; shared counters are left alone
    pub fn forget_player(&mut self, player: PlayerId) {
        self.counters.retain(|(p, _), _| *p != Some(player));
    }

    pub fn forget_gesture(&mut self, gesture: &str) {
        self.counters.retain(|(_, g), _| g != gesture);
    }

    pub fn clear(&mut self) {
        self.counters.clear();
    }

    /// Number of gestures currently in progress
    pub fn active(&self) -> usize {
        self.counters.len()
    }
}

/// Result of running one gesture for one player
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    Reset,
    Advanced { step: usize, of: usize },
    Recognized,
}

/// Progress counters plus their timeout timers
#[derive(Debug, Clone, Default)]
pub struct GestureMachine {
    progress: ProgressTable,
    timers: TimerTable,
    seed_snapshots: bool,
}

impl GestureMachine {
    pub fn new(scope: ProgressScope) -> Self {
        Self {
            progress: ProgressTable::new(scope),
            timers: TimerTable::new(),
            seed_snapshots: true,
        }
    }

    /// Whether a player without snapshots gets one at the end of its pass
    pub fn with_seeding(mut self, seed_snapshots: bool) -> Self {
        self.seed_snapshots = seed_snapshots;
        self
    }

    pub fn progress(&self) -> &ProgressTable {
        &self.progress
    }

    pub fn timers(&self) -> &TimerTable {
        &self.timers
    }

    /// Change the scope, discarding every counter and timer
    pub fn set_scope(&mut self, scope: ProgressScope) {
        if scope != self.progress.scope() {
            self.progress = ProgressTable::new(scope);
            self.timers.disarm_all();
        }
    }

    pub fn set_seeding(&mut self, seed_snapshots: bool) {
        self.seed_snapshots = seed_snapshots;
    }

    /// Run one gesture's current step for a player
    pub fn step(
        &mut self,
        gesture: &GestureDefinition,
        player: PlayerId,
        table: &RelationshipTable,
        now: Instant,
    ) -> Transition {
        let count = gesture.step_count();
        let current = self.progress.get(player, &gesture.name);
        let Some(step) = gesture.steps.get(current) else {
            // Gesture was edited below its stored progress
            self.progress.reset(player, &gesture.name);
            self.timers.disarm(player, &gesture.name);
            return Transition::Unchanged;
        };

        match check_step(step, table) {
            StepOutcome::Pending => Transition::Unchanged,
            StepOutcome::Failed => {
                self.progress.reset(player, &gesture.name);
                self.timers.disarm(player, &gesture.name);
                Transition::Reset
            }
            StepOutcome::Succeeded => {
                let next = current + 1;
                if next >= count {
                    self.progress.reset(player, &gesture.name);
                    self.timers.disarm(player, &gesture.name);
                    return Transition::Recognized;
                }
                self.progress.set(player, &gesture.name, next);
                if next == 1 {
                    self.timers.arm(
                        player,
                        &gesture.name,
                        Duration::from_millis(gesture.timeout_ms),
                        now,
                    );
                }
                Transition::Advanced {
                    step: next,
                    of: count,
                }
            }
        }
    }

    /// Run every gesture for one player and collect the resulting events
    ///
    /// `table` was computed before this pass, so snapshot refreshes only affect
    /// the next frame.
    pub fn run_player(
        &mut self,
        gestures: &[GestureDefinition],
        skeleton: &NormalizedSkeleton,
        table: &RelationshipTable,
        index: &UsedRelationships,
        snapshots: &mut SnapshotStore,
        now: Instant,
    ) -> Vec<EngineEvent> {
        let player = skeleton.player;
        let mut events = Vec::new();

        for gesture in gestures {
            let transition = self.step(gesture, player, table, now);
            if transition == Transition::Unchanged {
                continue;
            }
            snapshots.refresh(skeleton, index.actors());

            let name = gesture.name.clone();
            match transition {
                Transition::Unchanged => {}
                Transition::Reset => {
                    debug!(player, gesture = %name, "step reset");
                    events.push(EngineEvent::StepReset {
                        player,
                        gesture: name,
                    });
                }
                Transition::Advanced { step, of } => {
                    debug!(player, gesture = %name, step, of, "step completed");
                    events.push(EngineEvent::StepCompleted {
                        player,
                        gesture: name,
                        step,
                        of,
                    });
                }
                Transition::Recognized => {
                    let of = gesture.step_count();
                    info!(player, gesture = %name, "gesture recognized");
                    events.push(EngineEvent::StepCompleted {
                        player,
                        gesture: name.clone(),
                        step: of,
                        of,
                    });
                    events.push(EngineEvent::GestureCompleted {
                        player,
                        gesture: name.clone(),
                    });
                    events.push(EngineEvent::GestureRecognized {
                        player,
                        gesture: name,
                    });
                }
            }
        }

        if self.seed_snapshots && !snapshots.has_player(player) {
            snapshots.refresh(skeleton, index.actors());
        }

        events
    }

    /// Earliest armed deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Reset every gesture whose timer expired
    ///
    /// Timers of gestures that no longer exist are dropped without an event.
    pub fn expire(&mut self, gestures: &[GestureDefinition], now: Instant) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        for (player, gesture) in self.timers.take_expired(now) {
            if !gestures.iter().any(|g| g.name == gesture) {
                self.timers.forget_gesture(&gesture);
                continue;
            }
            self.progress.reset(player, &gesture);
            debug!(player, gesture = %gesture, "gesture timed out");
            events.push(EngineEvent::TimeoutReset { player, gesture });
        }
        events
    }

    /// Drop a player's per-player counters and the timers guarding them
    ///
    /// Under the shared scope the counters outlive the player, so its armed
    /// timers stay and still reset them on expiry.
    pub fn forget_player(&mut self, player: PlayerId) {
        if self.progress.scope() == ProgressScope::PerPlayer {
            self.timers.forget_player(player);
        }
        self.progress.forget_player(player);
    }

    pub fn forget_gesture(&mut self, gesture: &str) {
        self.timers.forget_gesture(gesture);
        self.progress.forget_gesture(gesture);
    }

    /// Disarm every timer, leaving progress frozen
    pub fn reset_timers(&mut self) {
        self.timers.disarm_all();
    }

    /// Return every gesture to idle
    pub fn reset_all(&mut self) {
        self.progress.clear();
        self.timers.disarm_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ReferenceSet;
    use crate::evaluator::Evaluator;
    use crate::normalizer::Normalizer;
    use crate::types::{Condition, JointId, Relation, Skeleton, StaticReferencePoint, Step};
    use glam::Vec3;
    use pretty_assertions::assert_eq;

    /// Minimal frame driver over the machine, without threads or locking
    struct Harness {
        gestures: Vec<GestureDefinition>,
        index: UsedRelationships,
        references: ReferenceSet,
        snapshots: SnapshotStore,
        machine: GestureMachine,
        now: Instant,
    }

    impl Harness {
        fn new(gestures: Vec<GestureDefinition>, scope: ProgressScope) -> Self {
            Self {
                index: UsedRelationships::build(&gestures),
                gestures,
                references: ReferenceSet::new(),
                snapshots: SnapshotStore::new(),
                machine: GestureMachine::new(scope),
                now: Instant::now(),
            }
        }

        fn frame(&mut self, skeleton: &Skeleton) -> Vec<EngineEvent> {
            let normalized = Normalizer::new(1.0).normalize(skeleton);
            let table = Evaluator::new(&self.index, &self.references, &self.snapshots)
                .evaluate(&normalized);
            self.machine.run_player(
                &self.gestures,
                &normalized,
                &table,
                &self.index,
                &mut self.snapshots,
                self.now,
            )
        }

        fn progress(&self, player: PlayerId, gesture: &str) -> usize {
            self.machine.progress().get(player, gesture)
        }
    }

    fn recognized(events: &[EngineEvent]) -> Vec<(PlayerId, String)> {
        events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::GestureRecognized { player, gesture } => Some((*player, gesture.clone())),
                _ => None,
            })
            .collect()
    }

    fn step_of(success: Vec<Condition>, failure: Vec<Condition>) -> Step {
        Step {
            success_conditions: success,
            failure_conditions: failure,
        }
    }

    fn hands(player: PlayerId, right_y: f32, left_y: f32) -> Skeleton {
        Skeleton::new(player)
            .with_joint(JointId::HandRight, 0.0, right_y, 0.0)
            .with_joint(JointId::HandLeft, 0.0, left_y, 0.0)
            .with_joint(JointId::Head, 0.0, 600.0, 0.0)
            .with_joint(JointId::ShoulderRight, 0.0, 400.0, 0.0)
    }

    #[test]
    fn test_one_step_wave_is_recognized_and_reset() {
        let wave = GestureDefinition::new("Wave").with_step(step_of(
            vec![Condition::new(JointId::HandRight, Relation::Above, "ShoulderRight", 0)],
            vec![],
        ));
        let mut harness = Harness::new(vec![wave], ProgressScope::Shared);

        let events = harness.frame(&hands(1, 500.0, 0.0));

        assert_eq!(recognized(&events), vec![(1, "Wave".to_string())]);
        assert_eq!(harness.progress(1, "Wave"), 0);
        assert!(!harness.machine.timers().is_armed(1, "Wave"));
        assert_eq!(
            events[0].processing_text().unwrap(),
            "Player 1 Has Completed Gesture Wave Step 1 Of 1"
        );
        assert_eq!(
            events[1].processing_text().unwrap(),
            "Player 1 Has Completed Gesture Wave"
        );
    }

    #[test]
    fn test_punch_uses_committed_snapshots() {
        let punch = GestureDefinition::new("Punch")
            .with_step(step_of(
                vec![Condition::new(JointId::HandRight, Relation::XChange, "HandRight", -50)],
                vec![],
            ))
            .with_step(step_of(
                vec![Condition::new(JointId::HandRight, Relation::XChange, "HandRight", 80)],
                vec![],
            ));
        let mut harness = Harness::new(vec![punch], ProgressScope::Shared);
        let at = |x: f32| Skeleton::new(3).with_joint(JointId::HandRight, x, 0.0, 0.0);

        // Seeds the snapshot at x=0
        assert!(harness.frame(&at(0.0)).is_empty());
        assert_eq!(harness.progress(3, "Punch"), 0);

        // XChange = 0 - 60 = -60 <= -50
        let events = harness.frame(&at(60.0));
        assert_eq!(harness.progress(3, "Punch"), 1);
        assert!(harness.machine.timers().is_armed(3, "Punch"));
        assert!(recognized(&events).is_empty());

        // XChange = 60 - (-30) = 90 >= 80
        let events = harness.frame(&at(-30.0));
        assert_eq!(recognized(&events), vec![(3, "Punch".to_string())]);
        assert_eq!(harness.progress(3, "Punch"), 0);
        assert!(!harness.machine.timers().is_armed(3, "Punch"));
    }

    #[test]
    fn test_static_target_condition() {
        let reach = GestureDefinition::new("Reach").with_step(step_of(
            vec![Condition::new(JointId::HandLeft, Relation::Above, "Target", 0)],
            vec![],
        ));
        let mut harness = Harness::new(vec![reach], ProgressScope::Shared);
        harness
            .references
            .insert(StaticReferencePoint::new("Target", Vec3::new(0.0, 1000.0, 0.0)))
            .unwrap();

        assert!(recognized(&harness.frame(&hands(1, 0.0, 900.0))).is_empty());
        assert_eq!(
            recognized(&harness.frame(&hands(1, 0.0, 1200.0))),
            vec![(1, "Reach".to_string())]
        );
    }

    #[test]
    fn test_n_steps_need_n_consecutive_successes() {
        // Alternate hands above the head, three times
        let above_head = |joint| step_of(vec![Condition::new(joint, Relation::Above, "Head", 0)], vec![]);
        let gesture = GestureDefinition::new("Alternate")
            .with_step(above_head(JointId::HandRight))
            .with_step(above_head(JointId::HandLeft))
            .with_step(above_head(JointId::HandRight));
        let mut harness = Harness::new(vec![gesture], ProgressScope::Shared);

        assert!(recognized(&harness.frame(&hands(1, 700.0, 0.0))).is_empty());
        assert!(recognized(&harness.frame(&hands(1, 0.0, 0.0))).is_empty());
        assert_eq!(harness.progress(1, "Alternate"), 1);
        assert!(recognized(&harness.frame(&hands(1, 0.0, 700.0))).is_empty());
        assert_eq!(harness.progress(1, "Alternate"), 2);
        assert_eq!(
            recognized(&harness.frame(&hands(1, 700.0, 0.0))),
            vec![(1, "Alternate".to_string())]
        );
    }

    #[test]
    fn test_failure_resets_without_recognition() {
        // Step 2 fails if the right hand drops below the shoulder
        let gesture = GestureDefinition::new("Raise")
            .with_step(step_of(
                vec![Condition::new(JointId::HandRight, Relation::Above, "Head", 0)],
                vec![],
            ))
            .with_step(step_of(
                vec![Condition::new(JointId::HandLeft, Relation::Above, "Head", 0)],
                vec![Condition::new(JointId::HandRight, Relation::Below, "ShoulderRight", 0)],
            ));
        let mut harness = Harness::new(vec![gesture], ProgressScope::Shared);

        harness.frame(&hands(1, 700.0, 0.0));
        assert_eq!(harness.progress(1, "Raise"), 1);

        // Both the failure and the success hold: failure wins
        let events = harness.frame(&hands(1, 100.0, 700.0));
        assert_eq!(
            events,
            vec![EngineEvent::StepReset {
                player: 1,
                gesture: "Raise".to_string()
            }]
        );
        assert_eq!(harness.progress(1, "Raise"), 0);
        assert!(!harness.machine.timers().is_armed(1, "Raise"));
    }

    #[test]
    fn test_failure_refreshes_snapshot() {
        let gesture = GestureDefinition::new("Slide").with_step(step_of(
            vec![Condition::new(JointId::HandRight, Relation::XChange, "HandRight", 100)],
            vec![Condition::new(JointId::HandRight, Relation::YChange, "HandRight", 50)],
        ));
        let mut harness = Harness::new(vec![gesture], ProgressScope::Shared);
        let at = |x: f32, y: f32| Skeleton::new(1).with_joint(JointId::HandRight, x, y, 0.0);

        harness.frame(&at(0.0, 0.0));
        // YChange = 0 - (-80) = 80 > 50: reset, snapshot now (0, -80)
        let events = harness.frame(&at(0.0, -80.0));
        assert!(matches!(events[0], EngineEvent::StepReset { .. }));
        assert_eq!(
            harness.snapshots.get(1, JointId::HandRight),
            Some(Vec3::new(0.0, -80.0, 0.0))
        );
    }

    #[test]
    fn test_shared_and_per_player_scopes() {
        let gesture = || {
            GestureDefinition::new("Both")
                .with_step(step_of(
                    vec![Condition::new(JointId::HandRight, Relation::Above, "Head", 0)],
                    vec![],
                ))
                .with_step(step_of(
                    vec![Condition::new(JointId::HandLeft, Relation::Above, "Head", 0)],
                    vec![],
                ))
        };

        // Player 2 finishes what player 1 started
        let mut shared = Harness::new(vec![gesture()], ProgressScope::Shared);
        shared.frame(&hands(1, 700.0, 0.0));
        assert_eq!(
            recognized(&shared.frame(&hands(2, 0.0, 700.0))),
            vec![(2, "Both".to_string())]
        );

        let mut per_player = Harness::new(vec![gesture()], ProgressScope::PerPlayer);
        per_player.frame(&hands(1, 700.0, 0.0));
        assert!(recognized(&per_player.frame(&hands(2, 0.0, 700.0))).is_empty());
        assert_eq!(per_player.progress(1, "Both"), 1);
        assert_eq!(per_player.progress(2, "Both"), 0);
        assert_eq!(
            recognized(&per_player.frame(&hands(1, 0.0, 700.0))),
            vec![(1, "Both".to_string())]
        );
    }

    #[test]
    fn test_expiry_resets_once() {
        let gesture = GestureDefinition::new("Slow")
            .with_timeout_ms(200)
            .with_step(step_of(
                vec![Condition::new(JointId::HandRight, Relation::Above, "Head", 0)],
                vec![],
            ))
            .with_step(step_of(
                vec![Condition::new(JointId::HandLeft, Relation::Above, "Head", 0)],
                vec![],
            ));
        let mut harness = Harness::new(vec![gesture], ProgressScope::Shared);
        harness.frame(&hands(4, 700.0, 0.0));
        assert_eq!(harness.progress(4, "Slow"), 1);

        let start = harness.now;
        let gestures = harness.gestures.clone();
        assert!(harness
            .machine
            .expire(&gestures, start + Duration::from_millis(199))
            .is_empty());

        let events = harness.machine.expire(&gestures, start + Duration::from_millis(200));
        assert_eq!(
            events,
            vec![EngineEvent::TimeoutReset {
                player: 4,
                gesture: "Slow".to_string()
            }]
        );
        assert_eq!(harness.progress(4, "Slow"), 0);
        assert!(harness
            .machine
            .expire(&gestures, start + Duration::from_secs(5))
            .is_empty());
    }

    #[test]
    fn test_expired_timer_of_removed_gesture_is_silent() {
        let mut machine = GestureMachine::new(ProgressScope::PerPlayer);
        let now = Instant::now();
        let gesture = GestureDefinition::new("Gone").with_step(Step::default()).with_step(Step::default());
        assert_eq!(
            machine.step(&gesture, 1, &RelationshipTable::default(), now),
            Transition::Advanced { step: 1, of: 2 }
        );

        assert!(machine.expire(&[], now + Duration::from_secs(10)).is_empty());
        assert!(machine.timers().is_empty());
    }

    #[test]
    fn test_forget_player_drops_per_player_state() {
        let mut machine = GestureMachine::new(ProgressScope::PerPlayer);
        let now = Instant::now();
        let gesture = GestureDefinition::new("Two").with_step(Step::default()).with_step(Step::default());
        machine.step(&gesture, 9, &RelationshipTable::default(), now);
        assert_eq!(machine.progress().get(9, "Two"), 1);

        machine.forget_player(9);
        assert_eq!(machine.progress().get(9, "Two"), 0);
        assert!(!machine.timers().is_armed(9, "Two"));
    }

    #[test]
    fn test_forget_player_keeps_shared_timer_armed() {
        let mut machine = GestureMachine::new(ProgressScope::Shared);
        let now = Instant::now();
        let gesture = GestureDefinition::new("Two")
            .with_timeout_ms(150)
            .with_step(Step::default())
            .with_step(Step::default());
        machine.step(&gesture, 5, &RelationshipTable::default(), now);

        machine.forget_player(5);
        assert_eq!(machine.progress().get(5, "Two"), 1);
        assert!(machine.timers().is_armed(5, "Two"));

        let events = machine.expire(&[gesture], now + Duration::from_millis(150));
        assert_eq!(
            events,
            vec![EngineEvent::TimeoutReset {
                player: 5,
                gesture: "Two".to_string()
            }]
        );
        assert_eq!(machine.progress().get(7, "Two"), 0);
    }

    #[test]
    fn test_shrunk_gesture_disarms_its_timer() {
        let mut machine = GestureMachine::new(ProgressScope::Shared);
        let now = Instant::now();
        let long = GestureDefinition::new("Edit")
            .with_step(Step::default())
            .with_step(Step::default());
        machine.step(&long, 1, &RelationshipTable::default(), now);
        assert!(machine.timers().is_armed(1, "Edit"));

        let short = GestureDefinition::new("Edit").with_step(Step::default());
        assert_eq!(
            machine.step(&short, 1, &RelationshipTable::default(), now),
            Transition::Unchanged
        );
        assert_eq!(machine.progress().get(1, "Edit"), 0);
        assert!(!machine.timers().is_armed(1, "Edit"));
        assert!(machine
            .expire(&[short], now + Duration::from_secs(60))
            .is_empty());
    }
}
