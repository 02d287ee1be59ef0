//! Reference snapshot store
//!
//! Holds each player's joint positions as they were when that player last
//! completed or reset a gesture step. Delta relations are measured against
//! these snapshots instead of the previous frame.

use glam::Vec3;
use std::collections::HashMap;

use crate::normalizer::NormalizedSkeleton;
use crate::types::{JointId, PlayerId};

/// Last committed joint positions keyed by (player, joint)
#[derive(Debug, Clone, Default)]
pub struct SnapshotStore {
    positions: HashMap<(PlayerId, JointId), Vec3>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, player: PlayerId, joint: JointId) -> Option<Vec3> {
        self.positions.get(&(player, joint)).copied()
    }

    pub fn set(&mut self, player: PlayerId, joint: JointId, position: Vec3) {
        self.positions.insert((player, joint), position);
    }

    /// Overwrite the snapshot of every listed joint present in the skeleton
    pub fn refresh(
        &mut self,
        skeleton: &NormalizedSkeleton,
        joints: impl IntoIterator<Item = JointId>,
    ) {
        for joint in joints {
            if let Some(position) = skeleton.joint(joint) {
                self.positions.insert((skeleton.player, joint), position);
            }
        }
    }

    /// Whether any snapshot exists for the player
    pub fn has_player(&self, player: PlayerId) -> bool {
        self.positions.keys().any(|(p, _)| *p == player)
    }

    /// Drop every snapshot belonging to the player
    pub fn forget(&mut self, player: PlayerId) {
        self.positions.retain(|(p, _), _| *p != player);
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::Normalizer;
    use crate::types::Skeleton;

    #[test]
    fn test_refresh_overwrites_listed_joints() {
        let normalizer = Normalizer::default();
        let mut store = SnapshotStore::new();

        let first = normalizer.normalize(
            &Skeleton::new(1)
                .with_joint(JointId::HandRight, 0.1, 0.0, 0.0)
                .with_joint(JointId::Head, 0.0, 0.9, 0.0),
        );
        store.refresh(&first, [JointId::HandRight]);
        assert!(store.has_player(1));
        assert_eq!(store.len(), 1);
        assert!(store.get(1, JointId::Head).is_none());

        let second =
            normalizer.normalize(&Skeleton::new(1).with_joint(JointId::HandRight, 0.3, 0.0, 0.0));
        store.refresh(&second, [JointId::HandRight, JointId::Head]);

        let hand = store.get(1, JointId::HandRight).unwrap();
        assert!((hand.x - 300.0).abs() < 1e-3);
        assert!(store.get(1, JointId::Head).is_none());
    }

    #[test]
    fn test_forget_only_touches_one_player() {
        let mut store = SnapshotStore::new();
        store.set(1, JointId::HandLeft, Vec3::ONE);
        store.set(2, JointId::HandLeft, Vec3::ZERO);

        store.forget(1);

        assert!(!store.has_player(1));
        assert_eq!(store.get(2, JointId::HandLeft), Some(Vec3::ZERO));
    }
}
