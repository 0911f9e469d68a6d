//! Resource-selector diffing.
//!
//! Classifies every resource matched by an old and/or new selector into
//! added, removed or unchanged. Both selectors are evaluated against the same
//! resource slice, so callers pass one consistent snapshot.

use std::collections::BTreeSet;

use release_state::ResourceId;
use serde::{Deserialize, Serialize};

use super::{select_resources, Condition};
use crate::domain::Resource;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorDiff {
    pub added: BTreeSet<ResourceId>,
    pub removed: BTreeSet<ResourceId>,
    pub unchanged: BTreeSet<ResourceId>,
}

impl SelectorDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Diff two selectors over one resource snapshot. An absent selector is the
/// empty match set.
pub fn diff(
    old: Option<&Condition>,
    new: Option<&Condition>,
    resources: &[Resource],
) -> SelectorDiff {
    let before = old.map(|c| select_resources(c, resources)).unwrap_or_default();
    let after = new.map(|c| select_resources(c, resources)).unwrap_or_default();

    SelectorDiff {
        added: after.difference(&before).copied().collect(),
        removed: before.difference(&after).copied().collect(),
        unchanged: before.intersection(&after).copied().collect(),
    }
}
