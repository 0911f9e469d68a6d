//! Declarative boolean condition trees over entity metadata.
//!
//! Conditions are JSON-tagged (`{"type": "metadata", ...}`) so they can be
//! stored on environments, deployments, variable values and policies.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, OnceLock, PoisonError};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConditionError;

/// Maximum nesting depth accepted by [`Condition::validate`].
pub const MAX_CONDITION_DEPTH: usize = 16;

/// Compiled patterns are kept until the cache holds this many entries, then
/// the cache starts over.
const REGEX_CACHE_CAPACITY: usize = 256;

static REGEX_CACHE: OnceLock<Mutex<HashMap<String, Regex>>> = OnceLock::new();

/// Compile `pattern` once and share it across evaluations. `None` for an
/// invalid pattern.
fn cached_regex(pattern: &str) -> Option<Regex> {
    let cache = REGEX_CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    let mut cache = cache.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(re) = cache.get(pattern) {
        return Some(re.clone());
    }
    let re = Regex::new(pattern).ok()?;
    if cache.len() >= REGEX_CACHE_CAPACITY {
        cache.clear();
    }
    cache.insert(pattern.to_string(), re.clone());
    Some(re)
}

/// Anything a condition can be evaluated against.
pub trait Selectable {
    fn name(&self) -> &str;

    fn metadata(&self) -> &BTreeMap<String, String>;

    fn kind(&self) -> Option<&str> {
        None
    }

    fn identifier(&self) -> Option<&str> {
        None
    }

    fn tag(&self) -> Option<&str> {
        None
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StringOperator {
    Equals,
    Contains,
    StartsWith,
    EndsWith,
    Regex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericOperator {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateOperator {
    Before,
    After,
    BeforeOrOn,
    AfterOrOn,
}

/// A condition tree node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    And {
        conditions: Vec<Condition>,
    },
    Or {
        conditions: Vec<Condition>,
    },
    Not {
        condition: Box<Condition>,
    },
    Name {
        operator: StringOperator,
        value: String,
    },
    Kind {
        operator: StringOperator,
        value: String,
    },
    Identifier {
        operator: StringOperator,
        value: String,
    },
    Tag {
        operator: StringOperator,
        value: String,
    },
    Metadata {
        key: String,
        operator: StringOperator,
        value: String,
    },
    MetadataExists {
        key: String,
    },
    /// Parses the metadata value as a number; non-numeric values never match.
    MetadataNumber {
        key: String,
        operator: NumericOperator,
        value: f64,
    },
    CreatedAt {
        operator: DateOperator,
        value: DateTime<Utc>,
    },
}

fn compare_str(operator: StringOperator, actual: &str, expected: &str) -> bool {
    match operator {
        StringOperator::Equals => actual == expected,
        StringOperator::Contains => actual.contains(expected),
        StringOperator::StartsWith => actual.starts_with(expected),
        StringOperator::EndsWith => actual.ends_with(expected),
        // Patterns are checked by `validate` at write time.
        StringOperator::Regex => cached_regex(expected).is_some_and(|re| re.is_match(actual)),
    }
}

fn compare_opt(operator: StringOperator, actual: Option<&str>, expected: &str) -> bool {
    actual.is_some_and(|a| compare_str(operator, a, expected))
}

fn compare_num(operator: NumericOperator, actual: f64, expected: f64) -> bool {
    match operator {
        NumericOperator::Eq => actual == expected,
        NumericOperator::Gt => actual > expected,
        NumericOperator::Gte => actual >= expected,
        NumericOperator::Lt => actual < expected,
        NumericOperator::Lte => actual <= expected,
    }
}

fn compare_date(operator: DateOperator, actual: DateTime<Utc>, expected: DateTime<Utc>) -> bool {
    match operator {
        DateOperator::Before => actual < expected,
        DateOperator::After => actual > expected,
        DateOperator::BeforeOrOn => actual <= expected,
        DateOperator::AfterOrOn => actual >= expected,
    }
}

impl Condition {
    /// Convenience constructor for a metadata equality leaf.
    pub fn metadata_equals(key: impl Into<String>, value: impl Into<String>) -> Self {
        Condition::Metadata {
            key: key.into(),
            operator: StringOperator::Equals,
            value: value.into(),
        }
    }

    pub fn and(conditions: Vec<Condition>) -> Self {
        Condition::And { conditions }
    }

    pub fn or(conditions: Vec<Condition>) -> Self {
        Condition::Or { conditions }
    }

    pub fn negate(condition: Condition) -> Self {
        Condition::Not {
            condition: Box::new(condition),
        }
    }

    /// Evaluate the tree against a single entity.
    pub fn matches<T: Selectable + ?Sized>(&self, item: &T) -> bool {
        match self {
            Condition::And { conditions } => conditions.iter().all(|c| c.matches(item)),
            Condition::Or { conditions } => conditions.iter().any(|c| c.matches(item)),
            Condition::Not { condition } => !condition.matches(item),
            Condition::Name { operator, value } => compare_str(*operator, item.name(), value),
            Condition::Kind { operator, value } => compare_opt(*operator, item.kind(), value),
            Condition::Identifier { operator, value } => {
                compare_opt(*operator, item.identifier(), value)
            }
            Condition::Tag { operator, value } => compare_opt(*operator, item.tag(), value),
            Condition::Metadata {
                key,
                operator,
                value,
            } => compare_opt(*operator, item.metadata().get(key).map(String::as_str), value),
            Condition::MetadataExists { key } => item.metadata().contains_key(key),
            Condition::MetadataNumber {
                key,
                operator,
                value,
            } => item
                .metadata()
                .get(key)
                .and_then(|raw| raw.trim().parse::<f64>().ok())
                .is_some_and(|actual| compare_num(*operator, actual, *value)),
            Condition::CreatedAt { operator, value } => item
                .created_at()
                .is_some_and(|actual| compare_date(*operator, actual, *value)),
        }
    }

    /// Reject trees that cannot be evaluated meaningfully.
    pub fn validate(&self) -> Result<(), ConditionError> {
        self.validate_at(1)
    }

    fn validate_at(&self, depth: usize) -> Result<(), ConditionError> {
        if depth > MAX_CONDITION_DEPTH {
            return Err(ConditionError::TooDeep {
                max: MAX_CONDITION_DEPTH,
            });
        }
        match self {
            Condition::And { conditions } | Condition::Or { conditions } => {
                if conditions.is_empty() {
                    let kind = if matches!(self, Condition::And { .. }) {
                        "and"
                    } else {
                        "or"
                    };
                    return Err(ConditionError::EmptyCompound { kind });
                }
                conditions.iter().try_for_each(|c| c.validate_at(depth + 1))
            }
            Condition::Not { condition } => condition.validate_at(depth + 1),
            Condition::Name { operator, value }
            | Condition::Kind { operator, value }
            | Condition::Identifier { operator, value }
            | Condition::Tag { operator, value } => check_pattern(*operator, value),
            Condition::Metadata {
                key,
                operator,
                value,
            } => {
                check_key(key)?;
                check_pattern(*operator, value)
            }
            Condition::MetadataExists { key } => check_key(key),
            Condition::MetadataNumber { key, value, .. } => {
                check_key(key)?;
                if !value.is_finite() {
                    return Err(ConditionError::NonFiniteNumber);
                }
                Ok(())
            }
            Condition::CreatedAt { .. } => Ok(()),
        }
    }
}

fn check_key(key: &str) -> Result<(), ConditionError> {
    if key.trim().is_empty() {
        return Err(ConditionError::EmptyKey);
    }
    Ok(())
}

fn check_pattern(operator: StringOperator, value: &str) -> Result<(), ConditionError> {
    if operator == StringOperator::Regex {
        Regex::new(value).map_err(|e| ConditionError::InvalidRegex {
            pattern: value.to_string(),
            message: e.to_string(),
        })?;
    }
    Ok(())
}
