//! Relationship evaluation
//!
//! For one normalized skeleton this module computes the value of every triple
//! in the used-relationships index:
//! - directional relations yield 1.0 or 0.0
//! - `Distance` yields the Euclidean distance between actor and relative
//! - delta relations yield `snapshot - current` along one axis
//!
//! A triple whose relative cannot be resolved, or whose delta has no snapshot
//! yet, is left out of the table.

use glam::Vec3;
use std::collections::HashMap;

use crate::catalog::ReferenceSet;
use crate::index::{RelationshipKey, UsedRelationships};
use crate::normalizer::NormalizedSkeleton;
use crate::snapshot::SnapshotStore;
use crate::types::{JointId, Relation};

/// Values computed for one player in one frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationshipTable {
    values: HashMap<RelationshipKey, f32>,
}

impl RelationshipTable {
    pub fn get(&self, key: &RelationshipKey) -> Option<f32> {
        self.values.get(key).copied()
    }

    pub fn lookup(&self, actor: JointId, relative: &str, relation: Relation) -> Option<f32> {
        self.get(&RelationshipKey::new(actor, relative, relation))
    }

    pub fn insert(&mut self, key: RelationshipKey, value: f32) {
        self.values.insert(key, value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RelationshipKey, f32)> {
        self.values.iter().map(|(k, v)| (k, *v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Compute one relation between two resolved points
///
/// Delta relations are not handled here; see [`delta`].
pub fn compare(relation: Relation, actor: Vec3, relative: Vec3) -> Option<f32> {
    let flag = |b: bool| if b { 1.0 } else { 0.0 };
    match relation {
        Relation::Above => Some(flag(actor.y >= relative.y)),
        Relation::Below => Some(flag(actor.y < relative.y)),
        Relation::RightOf => Some(flag(actor.x >= relative.x)),
        Relation::LeftOf => Some(flag(actor.x < relative.x)),
        Relation::Behind => Some(flag(actor.z >= relative.z)),
        Relation::InfrontOf => Some(flag(actor.z < relative.z)),
        Relation::Distance => Some(actor.distance(relative)),
        Relation::XChange | Relation::YChange | Relation::ZChange => None,
    }
}

/// Signed change of a joint along the relation's axis since its snapshot
pub fn delta(relation: Relation, snapshot: Vec3, current: Vec3) -> Option<f32> {
    let change = snapshot - current;
    match relation {
        Relation::XChange => Some(change.x),
        Relation::YChange => Some(change.y),
        Relation::ZChange => Some(change.z),
        _ => None,
    }
}

/// Evaluator for the used-relationships of a skeleton
pub struct Evaluator<'a> {
    index: &'a UsedRelationships,
    references: &'a ReferenceSet,
    snapshots: &'a SnapshotStore,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        index: &'a UsedRelationships,
        references: &'a ReferenceSet,
        snapshots: &'a SnapshotStore,
    ) -> Self {
        Self {
            index,
            references,
            snapshots,
        }
    }

    /// Resolve a relative id, joints taking precedence over static points
    fn resolve(&self, skeleton: &NormalizedSkeleton, relative: &str) -> Option<Vec3> {
        match relative.parse::<JointId>() {
            Ok(joint) => skeleton.joint(joint),
            Err(_) => self.references.position(relative),
        }
    }

    /// Build the relationship table for one skeleton
    pub fn evaluate(&self, skeleton: &NormalizedSkeleton) -> RelationshipTable {
        let mut table = RelationshipTable::default();

        for actor in self.index.actors() {
            let Some(actor_pos) = skeleton.joint(actor) else {
                continue;
            };

            for (relative, relation) in self.index.relations_for(actor) {
                let value = if relation.is_delta() {
                    self.snapshots
                        .get(skeleton.player, actor)
                        .and_then(|snapshot| delta(*relation, snapshot, actor_pos))
                } else {
                    self.resolve(skeleton, relative)
                        .and_then(|relative_pos| compare(*relation, actor_pos, relative_pos))
                };

                if let Some(value) = value {
                    table.insert(RelationshipKey::new(actor, relative.clone(), *relation), value);
                }
            }
        }

        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::Normalizer;
    use crate::types::{Condition, GestureDefinition, Skeleton, StaticReferencePoint, Step};

    fn index_for(conditions: Vec<Condition>) -> UsedRelationships {
        UsedRelationships::build(&[GestureDefinition::new("g").with_step(Step {
            success_conditions: conditions,
            failure_conditions: vec![],
        })])
    }

    fn skeleton(joints: &[(JointId, f32, f32, f32)]) -> NormalizedSkeleton {
        let mut raw = Skeleton::new(1);
        for (joint, x, y, z) in joints {
            raw = raw.with_joint(*joint, *x, *y, *z);
        }
        Normalizer::new(1.0).normalize(&raw)
    }

    #[test]
    fn test_boolean_relations_are_zero_or_one() {
        let samples = [
            (Vec3::new(1.0, 2.0, 3.0), Vec3::new(1.0, 2.0, 3.0)),
            (Vec3::new(-5.0, 0.5, 9.0), Vec3::new(3.0, 7.0, -2.0)),
            (Vec3::new(400.0, -10.0, 0.0), Vec3::new(-400.0, 10.0, 0.1)),
        ];
        for relation in Relation::ALL.iter().filter(|r| r.is_boolean()) {
            for (a, b) in samples {
                let value = compare(*relation, a, b).unwrap();
                assert!(value == 0.0 || value == 1.0, "{relation} produced {value}");
            }
        }
    }

    #[test]
    fn test_directional_relations_are_complements() {
        let a = Vec3::new(10.0, 20.0, 30.0);
        let b = Vec3::new(10.0, 25.0, 5.0);
        for (lhs, rhs) in [
            (Relation::Above, Relation::Below),
            (Relation::RightOf, Relation::LeftOf),
            (Relation::Behind, Relation::InfrontOf),
        ] {
            assert_eq!(compare(lhs, a, b).unwrap() + compare(rhs, a, b).unwrap(), 1.0);
        }
        // Equality counts as Above / RightOf
        assert_eq!(compare(Relation::RightOf, a, b), Some(1.0));
        assert_eq!(compare(Relation::Above, a, b), Some(0.0));
        assert_eq!(compare(Relation::Behind, a, b), Some(1.0));
    }

    #[test]
    fn test_distance_is_symmetric_and_non_negative() {
        let a = Vec3::new(100.0, -200.0, 50.0);
        let b = Vec3::new(-30.0, 40.0, 1000.0);
        let ab = compare(Relation::Distance, a, b).unwrap();
        let ba = compare(Relation::Distance, b, a).unwrap();

        assert_eq!(ab, ba);
        assert!(ab >= 0.0);
        assert_eq!(compare(Relation::Distance, a, a), Some(0.0));
        let expected = Vec3::new(3.0, 4.0, 0.0).length();
        assert_eq!(compare(Relation::Distance, Vec3::new(3.0, 4.0, 0.0), Vec3::ZERO), Some(expected));
    }

    #[test]
    fn test_delta_is_snapshot_minus_current() {
        let snapshot = Vec3::new(100.0, 50.0, 10.0);
        let current = Vec3::new(160.0, 20.0, 10.0);

        assert_eq!(delta(Relation::XChange, snapshot, current), Some(-60.0));
        assert_eq!(delta(Relation::YChange, snapshot, current), Some(30.0));
        assert_eq!(delta(Relation::ZChange, snapshot, current), Some(0.0));
        assert_eq!(delta(Relation::Above, snapshot, current), None);
    }

    #[test]
    fn test_evaluate_joint_and_static_relatives() {
        let index = index_for(vec![
            Condition::new(JointId::HandRight, Relation::Above, "ShoulderRight", 0),
            Condition::new(JointId::HandLeft, Relation::Above, "Target", 0),
        ]);
        let mut references = ReferenceSet::new();
        references
            .insert(StaticReferencePoint::new("Target", Vec3::new(0.0, 1000.0, 0.0)))
            .unwrap();
        let snapshots = SnapshotStore::new();
        let evaluator = Evaluator::new(&index, &references, &snapshots);

        let table = evaluator.evaluate(&skeleton(&[
            (JointId::HandRight, 0.0, 500.0, 0.0),
            (JointId::ShoulderRight, 0.0, 400.0, 0.0),
            (JointId::HandLeft, 0.0, 1200.0, 0.0),
        ]));

        assert_eq!(table.lookup(JointId::HandRight, "ShoulderRight", Relation::Above), Some(1.0));
        assert_eq!(table.lookup(JointId::HandLeft, "Target", Relation::Above), Some(1.0));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_unresolved_relative_is_omitted() {
        let index = index_for(vec![
            Condition::new(JointId::HandLeft, Relation::Distance, "Nowhere", 100),
            Condition::new(JointId::HandLeft, Relation::Above, "Head", 0),
        ]);
        let references = ReferenceSet::new();
        let snapshots = SnapshotStore::new();
        let evaluator = Evaluator::new(&index, &references, &snapshots);

        // Head is missing from the skeleton, Nowhere is not registered
        let table = evaluator.evaluate(&skeleton(&[(JointId::HandLeft, 0.0, 0.0, 0.0)]));

        assert!(table.is_empty());
    }

    #[test]
    fn test_delta_requires_snapshot() {
        let index = index_for(vec![Condition::new(
            JointId::HandRight,
            Relation::XChange,
            "HandRight",
            -50,
        )]);
        let references = ReferenceSet::new();
        let mut snapshots = SnapshotStore::new();
        let current = skeleton(&[(JointId::HandRight, 260.0, 0.0, 0.0)]);

        let table = Evaluator::new(&index, &references, &snapshots).evaluate(&current);
        assert!(table.lookup(JointId::HandRight, "HandRight", Relation::XChange).is_none());

        snapshots.set(1, JointId::HandRight, Vec3::new(200.0, 0.0, 0.0));
        let table = Evaluator::new(&index, &references, &snapshots).evaluate(&current);
        assert_eq!(
            table.lookup(JointId::HandRight, "HandRight", Relation::XChange),
            Some(-60.0)
        );
    }
}
