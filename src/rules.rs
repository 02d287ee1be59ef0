//! Condition rules
//!
//! Decides whether a failure condition fires or a success condition is met for
//! a relationship value. The deviation of a condition is interpreted per
//! relation kind:
//!
//! | relation            | deviation < 0               | deviation >= 0          |
//! |---------------------|-----------------------------|-------------------------|
//! | X/Y/ZChange failure | value < deviation           | value > deviation       |
//! | X/Y/ZChange success | value <= deviation          | value >= deviation      |
//! | Distance failure    | value < abs(deviation)      | value > deviation       |
//! | Distance success    | value <= abs(deviation)     | value >= deviation      |
//! | boolean failure     | value == 1.0 (deviation ignored)                      |
//! | boolean success     | value != 0.0 (deviation ignored)                      |

use crate::evaluator::RelationshipTable;
use crate::types::{Condition, Relation, Step};

/// Whether a failure condition fires for a computed value
pub fn failure_holds(condition: &Condition, value: f32) -> bool {
    let deviation = condition.deviation as f32;
    match condition.relation {
        Relation::XChange | Relation::YChange | Relation::ZChange => {
            if condition.deviation < 0 {
                value < deviation
            } else {
                value > deviation
            }
        }
        Relation::Distance => {
            if condition.deviation < 0 {
                value < deviation.abs()
            } else {
                value > deviation
            }
        }
        _ => value == 1.0,
    }
}

/// Whether a success condition is met for a computed value
pub fn success_met(condition: &Condition, value: f32) -> bool {
    let deviation = condition.deviation as f32;
    match condition.relation {
        Relation::XChange | Relation::YChange | Relation::ZChange => {
            if condition.deviation < 0 {
                value <= deviation
            } else {
                value >= deviation
            }
        }
        Relation::Distance => {
            if condition.deviation < 0 {
                value <= deviation.abs()
            } else {
                value >= deviation
            }
        }
        _ => value != 0.0,
    }
}

fn value_of(table: &RelationshipTable, condition: &Condition) -> Option<f32> {
    table.lookup(
        condition.actor_joint,
        &condition.relative_id,
        condition.relation,
    )
}

/// Outcome of checking one step against a relationship table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// A failure condition fired
    Failed,
    /// Every success condition was present and met
    Succeeded,
    /// Neither
    Pending,
}

/// Check a step: failure first, then success
///
/// Missing failure values are ignored; a missing success value leaves the step
/// pending.
pub fn check_step(step: &Step, table: &RelationshipTable) -> StepOutcome {
    let failed = step
        .failure_conditions
        .iter()
        .any(|c| value_of(table, c).is_some_and(|v| failure_holds(c, v)));
    if failed {
        return StepOutcome::Failed;
    }

    let succeeded = step
        .success_conditions
        .iter()
        .all(|c| value_of(table, c).is_some_and(|v| success_met(c, v)));
    if succeeded {
        StepOutcome::Succeeded
    } else {
        StepOutcome::Pending
    }
}
