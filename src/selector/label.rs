//! # Label Predicates
//!
//! Compiled form of a Kubernetes `LabelSelector`.
//!
//! `matchLabels` entries become `In` requirements with a single value, so
//! both halves of a selector are evaluated by the same code. Compilation
//! validates operators up front; a malformed selector is an error, never a
//! silent match or mismatch.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Errors produced while compiling a selector
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SelectorError {
    #[error("invalid selector: unknown operator '{operator}' for key '{key}'")]
    UnknownOperator { key: String, operator: String },
    #[error("invalid selector: operator '{operator}' for key '{key}' requires at least one value")]
    MissingValues { key: String, operator: String },
    #[error("invalid selector: operator '{operator}' for key '{key}' takes no values")]
    UnexpectedValues { key: String, operator: String },
    #[error("invalid selector: empty label key")]
    EmptyKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

impl Operator {
    fn as_str(self) -> &'static str {
        match self {
            Operator::In => "In",
            Operator::NotIn => "NotIn",
            Operator::Exists => "Exists",
            Operator::DoesNotExist => "DoesNotExist",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Requirement {
    key: String,
    operator: Operator,
    values: BTreeSet<String>,
}

impl Requirement {
    fn new(key: &str, operator: &str, values: &[String]) -> Result<Self, SelectorError> {
        if key.is_empty() {
            return Err(SelectorError::EmptyKey);
        }
        let operator = match operator {
            "In" => Operator::In,
            "NotIn" => Operator::NotIn,
            "Exists" => Operator::Exists,
            "DoesNotExist" => Operator::DoesNotExist,
            other => {
                return Err(SelectorError::UnknownOperator {
                    key: key.to_string(),
                    operator: other.to_string(),
                })
            }
        };
        match operator {
            Operator::In | Operator::NotIn if values.is_empty() => {
                return Err(SelectorError::MissingValues {
                    key: key.to_string(),
                    operator: operator.as_str().to_string(),
                });
            }
            Operator::Exists | Operator::DoesNotExist if !values.is_empty() => {
                return Err(SelectorError::UnexpectedValues {
                    key: key.to_string(),
                    operator: operator.as_str().to_string(),
                });
            }
            _ => {}
        }
        Ok(Self {
            key: key.to_string(),
            operator,
            values: values.iter().cloned().collect(),
        })
    }

    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let value = labels.get(&self.key);
        match self.operator {
            Operator::In => value.is_some_and(|v| self.values.contains(v)),
            Operator::NotIn => value.is_none_or(|v| !self.values.contains(v)),
            Operator::Exists => value.is_some(),
            Operator::DoesNotExist => value.is_none(),
        }
    }
}

/// A label selector compiled into a list of requirements (all must hold)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelPredicate {
    requirements: Vec<Requirement>,
}

impl LabelPredicate {
    pub fn compile(selector: &LabelSelector) -> Result<Self, SelectorError> {
        let mut requirements = Vec::new();
        if let Some(match_labels) = &selector.match_labels {
            for (key, value) in match_labels {
                requirements.push(Requirement::new(key, "In", std::slice::from_ref(value))?);
            }
        }
        if let Some(expressions) = &selector.match_expressions {
            for expr in expressions {
                let values = expr.values.as_deref().unwrap_or_default();
                requirements.push(Requirement::new(&expr.key, &expr.operator, values)?);
            }
        }
        Ok(Self { requirements })
    }

    /// A predicate without requirements matches every label set.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|req| req.matches(labels))
    }

    pub fn matches_optional(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        match labels {
            Some(labels) => self.matches(labels),
            None => self.matches(&BTreeMap::new()),
        }
    }
}
