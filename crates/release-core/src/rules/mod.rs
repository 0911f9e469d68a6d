//! Generic rule engine.
//!
//! Rules are evaluated over a candidate list supplied in preference order
//! (newest first for versions). Pre-validation gates run first and can
//! block every candidate at once; filter rules then fold left to right,
//! each seeing only the survivors of the previous one. The first surviving
//! candidate in input order is chosen.
//!
//! An empty result is a normal outcome, not an error.

pub mod approval;
pub mod deny_window;
pub mod variable;
pub mod version;

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

pub use approval::{evaluate_approvals, ApprovalFilter, ApprovalOutcome};
pub use deny_window::DenyWindowGate;
pub use variable::{
    variable_candidates, ResourceSelectorFilter, VariableCandidate, VariableRule, VariableSource,
};
pub use version::{
    version_rules, ConcurrencyGate, RolloutFilter, VersionRule, VersionRuleInputs,
    VersionSelectorFilter,
};

/// Something the rule engine can choose.
pub trait Candidate {
    type Id: Ord + Clone + fmt::Display;

    fn candidate_id(&self) -> Self::Id;
}

/// Result of a candidate-independent gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gate {
    Open,
    Blocked(String),
}

/// Output of one filter rule.
pub struct Filtered<'c, C: Candidate> {
    pub allowed: Vec<&'c C>,
    pub rejected: Vec<(C::Id, String)>,
}

impl<'c, C: Candidate> Filtered<'c, C> {
    /// Split `candidates` by a per-candidate check returning a rejection
    /// reason.
    pub fn partition(
        candidates: Vec<&'c C>,
        mut reject: impl FnMut(&C) -> Option<String>,
    ) -> Self {
        let mut allowed = Vec::with_capacity(candidates.len());
        let mut rejected = Vec::new();
        for candidate in candidates {
            match reject(candidate) {
                Some(reason) => rejected.push((candidate.candidate_id(), reason)),
                None => allowed.push(candidate),
            }
        }
        Self { allowed, rejected }
    }
}

/// A rule usable by [`evaluate`]. Rules implement one or both hooks.
pub trait Rule<C: Candidate> {
    fn name(&self) -> &'static str;

    fn pre_validate(&self) -> Gate {
        Gate::Open
    }

    fn filter<'c>(&self, candidates: Vec<&'c C>) -> Filtered<'c, C> {
        Filtered {
            allowed: candidates,
            rejected: Vec::new(),
        }
    }
}

/// Why candidates were excluded. The first rejection of a candidate wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RejectionReasons<K: Ord>(BTreeMap<K, String>);

impl<K: Ord> Default for RejectionReasons<K> {
    fn default() -> Self {
        Self(BTreeMap::new())
    }
}

impl<K: Ord> RejectionReasons<K> {
    /// Record a reason unless the candidate already has one.
    pub fn record(&mut self, id: K, reason: impl Into<String>) {
        self.0.entry(id).or_insert_with(|| reason.into());
    }

    pub fn get(&self, id: &K) -> Option<&str> {
        self.0.get(id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &str)> {
        self.0.iter().map(|(k, v)| (k, v.as_str()))
    }
}

/// Outcome of one engine run.
#[derive(Debug)]
pub struct RuleEvaluation<'c, C: Candidate> {
    pub chosen: Option<&'c C>,
    pub rejection_reasons: RejectionReasons<C::Id>,
    /// Reason of the pre-validation gate that blocked everything, if any.
    pub blocked_by: Option<String>,
}

/// Run `rules` over `candidates` (in preference order).
pub fn evaluate<'c, C, R>(rules: &[R], candidates: &'c [C]) -> RuleEvaluation<'c, C>
where
    C: Candidate,
    R: Rule<C>,
{
    let mut reasons = RejectionReasons::default();

    for rule in rules {
        if let Gate::Blocked(reason) = rule.pre_validate() {
            for candidate in candidates {
                reasons.record(candidate.candidate_id(), reason.clone());
            }
            tracing::debug!(rule = rule.name(), %reason, "pre-validation blocked all candidates");
            return RuleEvaluation {
                chosen: None,
                rejection_reasons: reasons,
                blocked_by: Some(reason),
            };
        }
    }

    let mut surviving: Vec<&C> = candidates.iter().collect();
    for rule in rules {
        if surviving.is_empty() {
            break;
        }
        let Filtered { allowed, rejected } = rule.filter(surviving);
        for (id, reason) in rejected {
            reasons.record(id, reason);
        }
        surviving = allowed;
    }

    // Filters never reorder, but pick by input position regardless.
    let chosen = candidates.iter().find(|c| {
        let id = c.candidate_id();
        surviving.iter().any(|s| s.candidate_id() == id)
    });

    RuleEvaluation {
        chosen,
        rejection_reasons: reasons,
        blocked_by: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Num(u32);

    impl Candidate for Num {
        type Id = u32;

        fn candidate_id(&self) -> u32 {
            self.0
        }
    }

    enum TestRule {
        Block(&'static str),
        RejectAbove(u32),
        RejectOdd,
    }

    impl Rule<Num> for TestRule {
        fn name(&self) -> &'static str {
            "test"
        }

        fn pre_validate(&self) -> Gate {
            match self {
                TestRule::Block(reason) => Gate::Blocked(reason.to_string()),
                _ => Gate::Open,
            }
        }

        fn filter<'c>(&self, candidates: Vec<&'c Num>) -> Filtered<'c, Num> {
            match self {
                TestRule::RejectAbove(max) => Filtered::partition(candidates, |n| {
                    (n.0 > *max).then(|| format!("{} is above {}", n.0, max))
                }),
                TestRule::RejectOdd => {
                    Filtered::partition(candidates, |n| (n.0 % 2 == 1).then(|| "odd".to_string()))
                }
                TestRule::Block(_) => Filtered {
                    allowed: candidates,
                    rejected: vec![],
                },
            }
        }
    }

    #[test]
    fn picks_first_survivor_in_input_order() {
        let candidates = [Num(9), Num(7), Num(4), Num(2)];
        let result = evaluate(&[TestRule::RejectAbove(8), TestRule::RejectOdd], &candidates);
        assert_eq!(result.chosen, Some(&Num(4)));
        assert_eq!(result.rejection_reasons.len(), 2);
        assert!(result.blocked_by.is_none());
    }

    #[test]
    fn first_rejection_wins() {
        let candidates = [Num(9)];
        let result = evaluate(&[TestRule::RejectAbove(8), TestRule::RejectOdd], &candidates);
        assert_eq!(result.chosen, None);
        assert_eq!(result.rejection_reasons.get(&9), Some("9 is above 8"));
    }

    #[test]
    fn blocking_gate_short_circuits_filters() {
        let candidates = [Num(2), Num(3)];
        let result = evaluate(
            &[TestRule::RejectOdd, TestRule::Block("frozen")],
            &candidates,
        );
        assert_eq!(result.chosen, None);
        assert_eq!(result.blocked_by.as_deref(), Some("frozen"));
        assert_eq!(result.rejection_reasons.get(&3), Some("frozen"));
        assert_eq!(result.rejection_reasons.get(&2), Some("frozen"));
    }

    #[test]
    fn empty_input_is_no_candidate_not_error() {
        let candidates: [Num; 0] = [];
        let result = evaluate(&[TestRule::RejectOdd], &candidates);
        assert!(result.chosen.is_none());
        assert!(result.rejection_reasons.is_empty());
    }

    #[test]
    fn no_rules_choose_the_first_candidate() {
        let candidates = [Num(5), Num(1)];
        let result = evaluate::<Num, TestRule>(&[], &candidates);
        assert_eq!(result.chosen, Some(&Num(5)));
    }
}
