//! # Selector Matching
//!
//! Authorization in both directions goes through [`NamespacedSelector`]:
//! a provider's `sops` selectors decide which encrypted secrets it may
//! decrypt, its `providers` selectors decide which key secrets feed it.
//!
//! ## Semantics
//!
//! - A namespace predicate is resolved against the current namespace labels
//!   into a set of names. An empty resolved set is restrictive: nothing
//!   passes.
//! - A label predicate is compiled once per call and tested against the
//!   candidate's labels.
//! - A candidate passes when it satisfies every predicate that is declared.
//! - A selector with neither predicate declared matches nothing. Declare
//!   `labelSelector: {}` to select everything.
//!
//! The single-object matcher ([`NamespacedSelector::matches`]) and the bulk
//! matcher ([`NamespacedSelector::match_all`]) share one compiled form, so a
//! provider's bulk match and a secret's single-object match cannot disagree.

mod label;

pub use label::{LabelPredicate, SelectorError};

use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::Resource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Label predicate plus optional namespace predicate
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NamespacedSelector {
    /// Labels the selected objects must carry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<LabelSelector>,
    /// Labels the namespace of the selected objects must carry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<LabelSelector>,
}

/// Snapshot of namespace labels taken at the start of a pass
#[derive(Debug, Clone, Default)]
pub struct NamespaceIndex {
    labels: BTreeMap<String, BTreeMap<String, String>>,
}

impl NamespaceIndex {
    pub fn from_namespaces(namespaces: &[Namespace]) -> Self {
        let labels = namespaces
            .iter()
            .filter_map(|ns| {
                let name = ns.metadata.name.clone()?;
                Some((name, ns.metadata.labels.clone().unwrap_or_default()))
            })
            .collect();
        Self { labels }
    }

    pub fn insert(&mut self, name: &str, labels: BTreeMap<String, String>) {
        self.labels.insert(name.to_string(), labels);
    }

    fn resolve(&self, predicate: &LabelPredicate) -> BTreeSet<String> {
        self.labels
            .iter()
            .filter(|(_, labels)| predicate.matches(labels))
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// A selector compiled against one namespace snapshot
#[derive(Debug, Clone)]
pub struct CompiledSelector {
    labels: Option<LabelPredicate>,
    namespaces: Option<BTreeSet<String>>,
}

impl CompiledSelector {
    pub fn test(&self, meta: &ObjectMeta) -> bool {
        if let Some(allowed) = &self.namespaces {
            match meta.namespace.as_deref() {
                Some(namespace) if allowed.contains(namespace) => {}
                _ => return false,
            }
        }
        match &self.labels {
            Some(predicate) => predicate.matches_optional(meta.labels.as_ref()),
            None => true,
        }
    }
}

impl NamespacedSelector {
    pub fn is_empty(&self) -> bool {
        self.label_selector.is_none() && self.namespace_selector.is_none()
    }

    /// Compile both predicates; `None` means the selector matches nothing.
    pub fn compile(
        &self,
        namespaces: &NamespaceIndex,
    ) -> Result<Option<CompiledSelector>, SelectorError> {
        if self.is_empty() {
            return Ok(None);
        }
        let labels = self
            .label_selector
            .as_ref()
            .map(LabelPredicate::compile)
            .transpose()?;
        let namespaces = match &self.namespace_selector {
            Some(selector) => Some(namespaces.resolve(&LabelPredicate::compile(selector)?)),
            None => None,
        };
        Ok(Some(CompiledSelector { labels, namespaces }))
    }

    /// Test a single object.
    pub fn matches<K: Resource>(
        &self,
        candidate: &K,
        namespaces: &NamespaceIndex,
    ) -> Result<bool, SelectorError> {
        Ok(self
            .compile(namespaces)?
            .is_some_and(|compiled| compiled.test(candidate.meta())))
    }

    /// Return the subset of candidates the selector matches, in input order.
    pub fn match_all<'a, K: Resource>(
        &self,
        candidates: &'a [K],
        namespaces: &NamespaceIndex,
    ) -> Result<Vec<&'a K>, SelectorError> {
        let Some(compiled) = self.compile(namespaces)? else {
            return Ok(Vec::new());
        };
        Ok(candidates
            .iter()
            .filter(|candidate| compiled.test(candidate.meta()))
            .collect())
    }
}

/// True when any selector in the list matches the candidate.
///
/// Malformed selectors are skipped and returned so the caller can report them;
/// they never grant access.
pub fn any_matches<K: Resource>(
    selectors: &[NamespacedSelector],
    candidate: &K,
    namespaces: &NamespaceIndex,
) -> (bool, Vec<SelectorError>) {
    let mut errors = Vec::new();
    for selector in selectors {
        match selector.matches(candidate, namespaces) {
            Ok(true) => return (true, errors),
            Ok(false) => {}
            Err(e) => errors.push(e),
        }
    }
    (false, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Secret;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn secret(namespace: &str, name: &str, pairs: &[(&str, &str)]) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(labels(pairs)),
                ..ObjectMeta::default()
            },
            ..Secret::default()
        }
    }

    fn selector(label: Option<&[(&str, &str)]>, namespace: Option<&[(&str, &str)]>) -> NamespacedSelector {
        NamespacedSelector {
            label_selector: label.map(|pairs| LabelSelector {
                match_labels: Some(labels(pairs)),
                match_expressions: None,
            }),
            namespace_selector: namespace.map(|pairs| LabelSelector {
                match_labels: Some(labels(pairs)),
                match_expressions: None,
            }),
        }
    }

    fn index() -> NamespaceIndex {
        let mut index = NamespaceIndex::default();
        index.insert("team-a", labels(&[("team", "a")]));
        index.insert("team-b", labels(&[("team", "b")]));
        index
    }

    #[test]
    fn test_empty_selector_matches_nothing() {
        let empty = NamespacedSelector::default();
        let candidate = secret("team-a", "s", &[("app", "x")]);
        assert!(!empty.matches(&candidate, &index()).unwrap());
        assert!(empty
            .match_all(std::slice::from_ref(&candidate), &index())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_declared_empty_label_selector_matches_everything() {
        let all = NamespacedSelector {
            label_selector: Some(LabelSelector::default()),
            namespace_selector: None,
        };
        let candidate = secret("anywhere", "s", &[]);
        assert!(all.matches(&candidate, &index()).unwrap());
    }

    #[test]
    fn test_namespace_and_label_must_both_hold() {
        let sel = selector(Some(&[("app", "x")]), Some(&[("team", "a")]));
        assert!(sel.matches(&secret("team-a", "s", &[("app", "x")]), &index()).unwrap());
        assert!(!sel.matches(&secret("team-b", "s", &[("app", "x")]), &index()).unwrap());
        assert!(!sel.matches(&secret("team-a", "s", &[("app", "y")]), &index()).unwrap());
    }

    #[test]
    fn test_namespace_only_selector() {
        let sel = selector(None, Some(&[("team", "b")]));
        assert!(sel.matches(&secret("team-b", "s", &[]), &index()).unwrap());
        assert!(!sel.matches(&secret("team-a", "s", &[]), &index()).unwrap());
    }

    #[test]
    fn test_empty_resolved_namespace_set_is_restrictive() {
        let sel = selector(Some(&[("app", "x")]), Some(&[("team", "nobody")]));
        assert!(!sel.matches(&secret("team-a", "s", &[("app", "x")]), &index()).unwrap());
    }

    #[test]
    fn test_single_and_bulk_agree() {
        let sel = selector(Some(&[("app", "x")]), Some(&[("team", "a")]));
        let candidates = vec![
            secret("team-a", "one", &[("app", "x")]),
            secret("team-a", "two", &[("app", "y")]),
            secret("team-b", "three", &[("app", "x")]),
            secret("team-c", "four", &[("app", "x")]),
        ];
        let bulk: Vec<String> = sel
            .match_all(&candidates, &index())
            .unwrap()
            .into_iter()
            .filter_map(|s| s.metadata.name.clone())
            .collect();
        let single: Vec<String> = candidates
            .iter()
            .filter(|s| sel.matches(*s, &index()).unwrap())
            .filter_map(|s| s.metadata.name.clone())
            .collect();
        assert_eq!(bulk, single);
        assert_eq!(bulk, vec!["one".to_string()]);
    }

    #[test]
    fn test_any_matches_skips_malformed() {
        let broken = NamespacedSelector {
            label_selector: Some(LabelSelector {
                match_labels: None,
                match_expressions: Some(vec![
                    k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelectorRequirement {
                        key: "app".to_string(),
                        operator: "Bogus".to_string(),
                        values: None,
                    },
                ]),
            }),
            namespace_selector: None,
        };
        let good = selector(Some(&[("app", "x")]), None);
        let candidate = secret("team-a", "s", &[("app", "x")]);

        let (matched, errors) = any_matches(&[broken.clone()], &candidate, &index());
        assert!(!matched);
        assert_eq!(errors.len(), 1);

        let (matched, _) = any_matches(&[broken, good], &candidate, &index());
        assert!(matched);
    }
}
