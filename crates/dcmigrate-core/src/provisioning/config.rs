//! Provisioning configuration for infrastructure-as-code submissions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A typed template parameter value.
///
/// Deserializes untagged, so a TOML or JSON parameter table can be read
/// directly: `instanceCount = 2`, `multiAZ = false`, `subnets = ["a", "b"]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    List(Vec<ParameterValue>),
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Bool(value) => write!(f, "{}", value),
            ParameterValue::Number(value) => write!(f, "{}", value),
            ParameterValue::String(value) => f.write_str(value),
            ParameterValue::List(values) => {
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", value)?;
                }
                Ok(())
            }
        }
    }
}

impl From<bool> for ParameterValue {
    fn from(value: bool) -> Self {
        ParameterValue::Bool(value)
    }
}

impl From<&str> for ParameterValue {
    fn from(value: &str) -> Self {
        ParameterValue::String(value.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(value: String) -> Self {
        ParameterValue::String(value)
    }
}

impl From<i64> for ParameterValue {
    fn from(value: i64) -> Self {
        ParameterValue::Number(value.into())
    }
}

impl From<u64> for ParameterValue {
    fn from(value: u64) -> Self {
        ParameterValue::Number(value.into())
    }
}

impl From<i32> for ParameterValue {
    fn from(value: i32) -> Self {
        ParameterValue::Number(value.into())
    }
}

impl<T: Into<ParameterValue>> From<Vec<T>> for ParameterValue {
    fn from(values: Vec<T>) -> Self {
        ParameterValue::List(values.into_iter().map(Into::into).collect())
    }
}

/// Template reference, stack name and parameters for one provisioning
/// attempt.
///
/// Parameter names are not checked against the template; the provisioning
/// backend rejects unknown or malformed ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningConfig {
    template_url: String,
    stack_name: String,
    #[serde(default)]
    params: BTreeMap<String, ParameterValue>,
}

impl ProvisioningConfig {
    pub fn new(
        template_url: impl Into<String>,
        stack_name: impl Into<String>,
        params: BTreeMap<String, ParameterValue>,
    ) -> Self {
        Self {
            template_url: template_url.into(),
            stack_name: stack_name.into(),
            params,
        }
    }

    pub fn template_url(&self) -> &str {
        &self.template_url
    }

    pub fn stack_name(&self) -> &str {
        &self.stack_name
    }

    pub fn params(&self) -> &BTreeMap<String, ParameterValue> {
        &self.params
    }

    /// Flattens every parameter to its string form: booleans as `true` /
    /// `false`, numbers in decimal, lists comma-joined.
    pub fn serialize(&self) -> BTreeMap<String, String> {
        self.params
            .iter()
            .map(|(name, value)| (name.clone(), value.to_string()))
            .collect()
    }
}
