//! Deployment variables and their candidate values.

use std::fmt;

use release_state::{DeploymentId, DeploymentVariableId, ResourceId, VariableValueId};
use serde::{Deserialize, Serialize};

use crate::selector::Condition;

/// One possible value of a deployment variable.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableValue {
    pub id: VariableValueId,
    pub value: serde_json::Value,
    /// Resources this value applies to. Absent means none, unless the value
    /// is the variable's default.
    #[serde(default)]
    pub resource_selector: Option<Condition>,
    /// Higher wins among matching values.
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub sensitive: bool,
}

impl fmt::Debug for VariableValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("VariableValue");
        s.field("id", &self.id);
        if self.sensitive {
            s.field("value", &"<redacted>");
        } else {
            s.field("value", &self.value);
        }
        s.field("resource_selector", &self.resource_selector)
            .field("priority", &self.priority)
            .field("sensitive", &self.sensitive)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentVariable {
    pub id: DeploymentVariableId,
    pub deployment_id: DeploymentId,
    pub key: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub values: Vec<VariableValue>,
    #[serde(default)]
    pub default_value_id: Option<VariableValueId>,
}

impl DeploymentVariable {
    pub fn default_value(&self) -> Option<&VariableValue> {
        let id = self.default_value_id?;
        self.values.iter().find(|v| v.id == id)
    }
}

/// A value set directly on a resource; it overrides deployment values.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceVariable {
    pub resource_id: ResourceId,
    pub key: String,
    pub value: serde_json::Value,
    #[serde(default)]
    pub sensitive: bool,
}

impl fmt::Debug for ResourceVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value: &dyn fmt::Debug = if self.sensitive {
            &"<redacted>"
        } else {
            &self.value
        };
        f.debug_struct("ResourceVariable")
            .field("resource_id", &self.resource_id)
            .field("key", &self.key)
            .field("value", value)
            .field("sensitive", &self.sensitive)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensitive_values_are_redacted() {
        let value = VariableValue {
            id: VariableValueId::new(),
            value: serde_json::json!("s3cr3t"),
            resource_selector: None,
            priority: 0,
            sensitive: true,
        };
        let rendered = format!("{value:?}");
        assert!(!rendered.contains("s3cr3t"));

        let rv = ResourceVariable {
            resource_id: ResourceId::new(),
            key: "DB_PASSWORD".into(),
            value: serde_json::json!("hunter2"),
            sensitive: true,
        };
        assert!(!format!("{rv:?}").contains("hunter2"));
    }

    #[test]
    fn default_value_is_looked_up_by_id() {
        let default = VariableValue {
            id: VariableValueId::new(),
            value: serde_json::json!(1),
            resource_selector: None,
            priority: 0,
            sensitive: false,
        };
        let var = DeploymentVariable {
            id: DeploymentVariableId::new(),
            deployment_id: DeploymentId::new(),
            key: "replicas".into(),
            description: None,
            default_value_id: Some(default.id),
            values: vec![default.clone()],
        };
        assert_eq!(var.default_value(), Some(&default));
    }
}
