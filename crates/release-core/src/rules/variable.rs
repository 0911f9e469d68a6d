//! Rules over variable value candidates.
//!
//! Candidates for one variable key are ordered by precedence: the
//! resource's own value, then deployment values by descending priority,
//! then the variable's default. The engine keeps the first survivor.

use std::fmt;

use release_state::VariableValueId;
use serde_json::Value;

use super::{Candidate, Filtered, Rule};
use crate::domain::{DeploymentVariable, Resource, ResourceVariable};
use crate::selector::Condition;

#[derive(Debug, Clone, PartialEq)]
pub enum VariableSource {
    Resource,
    DeploymentValue {
        value_id: VariableValueId,
        priority: i64,
        selector: Option<Condition>,
    },
    Default {
        value_id: VariableValueId,
    },
}

#[derive(Clone, PartialEq)]
pub struct VariableCandidate {
    pub key: String,
    pub value: Value,
    pub sensitive: bool,
    pub source: VariableSource,
}

impl fmt::Debug for VariableCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value: &dyn fmt::Debug = if self.sensitive {
            &"<redacted>"
        } else {
            &self.value
        };
        f.debug_struct("VariableCandidate")
            .field("key", &self.key)
            .field("value", value)
            .field("source", &self.source)
            .finish()
    }
}

impl Candidate for VariableCandidate {
    type Id = String;

    fn candidate_id(&self) -> String {
        match &self.source {
            VariableSource::Resource => format!("resource:{}", self.key),
            VariableSource::DeploymentValue { value_id, .. } => value_id.to_string(),
            VariableSource::Default { value_id } => format!("default:{value_id}"),
        }
    }
}

/// Candidates for one deployment variable, in precedence order.
pub fn variable_candidates(
    variable: &DeploymentVariable,
    resource_value: Option<&ResourceVariable>,
) -> Vec<VariableCandidate> {
    let mut out = Vec::with_capacity(variable.values.len() + 1);

    if let Some(own) = resource_value {
        out.push(VariableCandidate {
            key: variable.key.clone(),
            value: own.value.clone(),
            sensitive: own.sensitive,
            source: VariableSource::Resource,
        });
    }

    let mut values: Vec<_> = variable
        .values
        .iter()
        .filter(|v| Some(v.id) != variable.default_value_id)
        .collect();
    values.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
    out.extend(values.into_iter().map(|v| VariableCandidate {
        key: variable.key.clone(),
        value: v.value.clone(),
        sensitive: v.sensitive,
        source: VariableSource::DeploymentValue {
            value_id: v.id,
            priority: v.priority,
            selector: v.resource_selector.clone(),
        },
    }));

    if let Some(default) = variable.default_value() {
        out.push(VariableCandidate {
            key: variable.key.clone(),
            value: default.value.clone(),
            sensitive: default.sensitive,
            source: VariableSource::Default {
                value_id: default.id,
            },
        });
    }
    out
}

/// Rejects deployment values whose selector does not cover the resource.
#[derive(Debug, Clone)]
pub struct ResourceSelectorFilter {
    pub resource: Resource,
}

impl ResourceSelectorFilter {
    fn reject(&self, candidate: &VariableCandidate) -> Option<String> {
        let VariableSource::DeploymentValue { selector, .. } = &candidate.source else {
            return None;
        };
        match selector {
            None => Some("value has no resource selector".to_string()),
            Some(condition) if !condition.matches(&self.resource) => Some(format!(
                "resource '{}' does not match value selector",
                self.resource.name
            )),
            Some(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum VariableRule {
    ResourceSelector(ResourceSelectorFilter),
}

impl Rule<VariableCandidate> for VariableRule {
    fn name(&self) -> &'static str {
        match self {
            VariableRule::ResourceSelector(_) => "resource_selector",
        }
    }

    fn filter<'c>(&self, candidates: Vec<&'c VariableCandidate>) -> Filtered<'c, VariableCandidate> {
        match self {
            VariableRule::ResourceSelector(filter) => {
                Filtered::partition(candidates, |c| filter.reject(c))
            }
        }
    }
}
