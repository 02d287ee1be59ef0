//! Used-relationships index
//!
//! Scanning every configured gesture once, this module collects the
//! (actor, relative, relation) triples actually referenced by any step so that
//! each frame evaluates only what some condition can consult.

use std::collections::{BTreeMap, BTreeSet};

use crate::types::{GestureDefinition, JointId, Relation};

/// Triple evaluated every frame
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationshipKey {
    pub actor: JointId,
    pub relative: String,
    pub relation: Relation,
}

impl RelationshipKey {
    pub fn new(actor: JointId, relative: impl Into<String>, relation: Relation) -> Self {
        Self {
            actor,
            relative: relative.into(),
            relation,
        }
    }
}

/// Minimal set of triples referenced by a gesture set
///
/// Not maintained incrementally: rebuild it after gestures change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsedRelationships {
    by_actor: BTreeMap<JointId, BTreeSet<(String, Relation)>>,
}

impl UsedRelationships {
    /// Build the index from every success and failure condition
    pub fn build(gestures: &[GestureDefinition]) -> Self {
        let mut by_actor: BTreeMap<JointId, BTreeSet<(String, Relation)>> = BTreeMap::new();

        for condition in gestures
            .iter()
            .flat_map(|g| g.steps.iter())
            .flat_map(|s| s.conditions())
        {
            by_actor
                .entry(condition.actor_joint)
                .or_default()
                .insert((condition.relative_id.clone(), condition.relation));
        }

        Self { by_actor }
    }

    /// Actor joints referenced anywhere, in stable order
    pub fn actors(&self) -> impl Iterator<Item = JointId> + '_ {
        self.by_actor.keys().copied()
    }

    /// (relative, relation) pairs referenced for one actor
    pub fn relations_for(&self, actor: JointId) -> impl Iterator<Item = &(String, Relation)> {
        self.by_actor.get(&actor).into_iter().flatten()
    }

    /// Every indexed triple
    pub fn keys(&self) -> impl Iterator<Item = RelationshipKey> + '_ {
        self.by_actor.iter().flat_map(|(actor, pairs)| {
            pairs
                .iter()
                .map(move |(relative, relation)| RelationshipKey::new(*actor, relative.clone(), *relation))
        })
    }

    pub fn contains(&self, key: &RelationshipKey) -> bool {
        self.by_actor
            .get(&key.actor)
            .is_some_and(|pairs| pairs.contains(&(key.relative.clone(), key.relation)))
    }

    /// Relative ids that are not joint names (candidates for static references)
    pub fn named_relatives(&self) -> BTreeSet<&str> {
        self.by_actor
            .values()
            .flatten()
            .filter(|(relative, _)| relative.parse::<JointId>().is_err())
            .map(|(relative, _)| relative.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_actor.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_actor.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Condition, Step};
    use pretty_assertions::assert_eq;

    fn gestures() -> Vec<GestureDefinition> {
        let wave = GestureDefinition::new("Wave")
            .with_step(Step {
                success_conditions: vec![
                    Condition::new(JointId::HandLeft, Relation::LeftOf, "ShoulderLeft", 0),
                    Condition::new(JointId::HandLeft, Relation::Below, "ShoulderLeft", 0),
                ],
                failure_conditions: vec![Condition::new(
                    JointId::HandLeft,
                    Relation::RightOf,
                    "ShoulderLeft",
                    0,
                )],
            })
            .with_step(Step {
                success_conditions: vec![
                    Condition::new(JointId::HandLeft, Relation::LeftOf, "ShoulderLeft", 0),
                    Condition::new(JointId::HandLeft, Relation::Above, "Target", 0),
                ],
                failure_conditions: vec![],
            });
        let clap = GestureDefinition::new("Clap").with_step(Step {
            success_conditions: vec![Condition::new(
                JointId::HandRight,
                Relation::Distance,
                "HandLeft",
                -100,
            )],
            failure_conditions: vec![],
        });
        vec![wave, clap]
    }

    #[test]
    fn test_build_deduplicates_triples() {
        let index = UsedRelationships::build(&gestures());

        assert_eq!(index.len(), 5);
        assert_eq!(
            index.actors().collect::<Vec<_>>(),
            vec![JointId::HandLeft, JointId::HandRight]
        );
        assert!(index.contains(&RelationshipKey::new(
            JointId::HandLeft,
            "ShoulderLeft",
            Relation::RightOf
        )));
        assert!(!index.contains(&RelationshipKey::new(
            JointId::HandLeft,
            "ShoulderLeft",
            Relation::Behind
        )));
    }

    #[test]
    fn test_named_relatives() {
        let index = UsedRelationships::build(&gestures());
        assert_eq!(index.named_relatives().into_iter().collect::<Vec<_>>(), vec!["Target"]);
    }

    #[test]
    fn test_empty_gesture_set() {
        let index = UsedRelationships::build(&[]);
        assert!(index.is_empty());
        assert_eq!(index.keys().count(), 0);
        assert_eq!(index.relations_for(JointId::Head).count(), 0);
    }
}
