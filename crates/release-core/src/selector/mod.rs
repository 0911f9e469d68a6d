//! Selector matching and diffing.

pub mod condition;
pub mod diff;

use std::collections::BTreeSet;

use release_state::ResourceId;

use crate::domain::Resource;

pub use condition::{
    Condition, DateOperator, NumericOperator, Selectable, StringOperator, MAX_CONDITION_DEPTH,
};
pub use diff::{diff, SelectorDiff};

/// Ids of every resource in `pool` satisfying `condition`.
pub fn select_resources(condition: &Condition, pool: &[Resource]) -> BTreeSet<ResourceId> {
    pool.iter()
        .filter(|r| condition.matches(*r))
        .map(|r| r.id)
        .collect()
}
