//! Player presence bookkeeping
//!
//! Tracking ids come and go as people step in and out of the sensor's view. The
//! tracker counts how many consecutive frames a known player has been absent
//! and reports its removal once that count reaches the drop threshold, at
//! which point the engine can forget the player's snapshots and timers.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::types::PlayerId;

/// Default number of absent frames before a player is removed
pub const DEFAULT_DROP_FRAMES: u32 = 360;

/// Presence transitions of one player
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "presence", rename_all = "snake_case")]
pub enum PresenceEvent {
    /// First sighting
    Added { player: PlayerId },
    /// Seen again while counted as inactive
    Reactivated { player: PlayerId },
    /// Absent for `frames` consecutive frames out of the `of` allowed
    Inactive { player: PlayerId, frames: u32, of: u32 },
    /// Absent for too long
    Removed { player: PlayerId },
}

impl PresenceEvent {
    pub fn player(&self) -> PlayerId {
        match self {
            PresenceEvent::Added { player }
            | PresenceEvent::Reactivated { player }
            | PresenceEvent::Inactive { player, .. }
            | PresenceEvent::Removed { player } => *player,
        }
    }
}

/// Tracker of active and inactive players
#[derive(Debug, Clone)]
pub struct PresenceTracker {
    drop_after: u32,
    active: BTreeSet<PlayerId>,
    inactive: BTreeMap<PlayerId, u32>,
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new(DEFAULT_DROP_FRAMES)
    }
}

impl PresenceTracker {
    pub fn new(drop_after: u32) -> Self {
        Self {
            drop_after: drop_after.max(1),
            active: BTreeSet::new(),
            inactive: BTreeMap::new(),
        }
    }

    /// Record the players present in a frame; id 0 is ignored
    pub fn observe(&mut self, present: &[PlayerId]) -> Vec<PresenceEvent> {
        let current: BTreeSet<PlayerId> = present.iter().copied().filter(|id| *id != 0).collect();
        let mut events = Vec::new();

        for &player in &current {
            if self.active.contains(&player) {
                continue;
            }
            if self.inactive.remove(&player).is_some() {
                events.push(PresenceEvent::Reactivated { player });
            } else {
                events.push(PresenceEvent::Added { player });
            }
        }

        for &player in self.active.difference(&current) {
            self.inactive.insert(player, 0);
        }
        self.active = current;

        let drop_after = self.drop_after;
        let mut removed = Vec::new();
        for (&player, frames) in self.inactive.iter_mut() {
            *frames += 1;
            if *frames >= drop_after {
                removed.push(player);
            } else {
                events.push(PresenceEvent::Inactive {
                    player,
                    frames: *frames,
                    of: drop_after,
                });
            }
        }
        for player in removed {
            self.inactive.remove(&player);
            events.push(PresenceEvent::Removed { player });
        }

        events
    }

    pub fn is_active(&self, player: PlayerId) -> bool {
        self.active.contains(&player)
    }

    /// Absent-frame count of an inactive player
    pub fn inactive_frames(&self, player: PlayerId) -> Option<u32> {
        self.inactive.get(&player).copied()
    }

    pub fn active_players(&self) -> impl Iterator<Item = PlayerId> + '_ {
        self.active.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_added_then_removed() {
        let mut tracker = PresenceTracker::new(3);

        assert_eq!(tracker.observe(&[5, 0]), vec![PresenceEvent::Added { player: 5 }]);
        assert!(tracker.observe(&[5]).is_empty());

        assert_eq!(
            tracker.observe(&[]),
            vec![PresenceEvent::Inactive { player: 5, frames: 1, of: 3 }]
        );
        assert_eq!(
            tracker.observe(&[]),
            vec![PresenceEvent::Inactive { player: 5, frames: 2, of: 3 }]
        );
        assert_eq!(tracker.observe(&[]), vec![PresenceEvent::Removed { player: 5 }]);
        assert!(tracker.observe(&[]).is_empty());
        assert!(!tracker.is_active(5));
    }

    #[test]
    fn test_reactivation_resets_count() {
        let mut tracker = PresenceTracker::new(10);
        tracker.observe(&[1, 2]);
        tracker.observe(&[2]);
        assert_eq!(tracker.inactive_frames(1), Some(1));

        let events = tracker.observe(&[1, 2]);
        assert_eq!(events, vec![PresenceEvent::Reactivated { player: 1 }]);
        assert_eq!(tracker.inactive_frames(1), None);
        assert_eq!(tracker.active_players().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_returning_after_removal_is_added() {
        let mut tracker = PresenceTracker::new(1);
        tracker.observe(&[8]);
        assert_eq!(tracker.observe(&[]), vec![PresenceEvent::Removed { player: 8 }]);
        assert_eq!(tracker.observe(&[8]), vec![PresenceEvent::Added { player: 8 }]);
    }
}
