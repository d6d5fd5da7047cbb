//! Stage selection
//!
//! Exactly one stage runs per invocation. Every predicate is evaluated, so a
//! definition whose predicates overlap is reported instead of silently
//! running whichever stage happens to be declared first.

use super::errors::SelectionError;
use crate::pipeline::{Stage, TriggerFacts, ValidationError, find_overlap};

/// Picks the single stage eligible for `facts`
///
/// # Errors
///
/// Returns [`SelectionError::NoStage`] when nothing is eligible and
/// [`SelectionError::Ambiguous`] when more than one stage is.
pub fn select<'a>(stages: &'a [Stage], facts: &TriggerFacts) -> Result<&'a Stage, SelectionError> {
    let eligible: Vec<&Stage> = stages.iter().filter(|s| s.is_eligible(facts)).collect();

    match eligible.as_slice() {
        [] => Err(SelectionError::NoStage {
            facts: facts.clone(),
        }),
        [stage] => {
            tracing::debug!(stage = %stage.name, trigger = %facts, "Stage selected");
            Ok(*stage)
        }
        many => Err(SelectionError::Ambiguous {
            facts: facts.clone(),
            stages: many.iter().map(|s| s.name.clone()).collect(),
        }),
    }
}

/// Checks that no two predicates can be true for the same trigger
///
/// # Errors
///
/// Returns [`ValidationError::OverlappingStages`] for the first overlapping
/// pair found.
pub fn check_exclusive(stages: &[Stage]) -> Result<(), ValidationError> {
    match find_overlap(stages) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
