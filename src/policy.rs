//! Catalog of allocation policies and the algorithms each one supports.
//!
//! Catalogs are usually loaded from a YAML document keyed by policy name:
//!
//! ```yaml
//! ALLOCATION_SCORE:
//!   description: Score-based allocation
//!   algorithms: [NORMAL, PRIORITY]
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PolicyError, Result};

/// Description of one selectable policy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDefinition {
    /// Human-readable summary shown next to the policy.
    #[serde(default)]
    pub description: String,
    /// Algorithms in preference order; the first one is the default.
    pub algorithms: Vec<String>,
}

/// A validated (policy, algorithm) choice.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySelection {
    /// Catalog name of the policy.
    pub policy: String,
    /// Algorithm resolved for the policy.
    pub algorithm: String,
}

/// Named policies, ordered by name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyCatalog {
    policies: BTreeMap<String, PolicyDefinition>,
}

impl PolicyCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self {
            policies: BTreeMap::new(),
        }
    }

    /// Adds or replaces a policy. Policies without algorithms are rejected.
    pub fn insert<S: Into<String>>(&mut self, name: S, definition: PolicyDefinition) -> Result<()> {
        let name = name.into();
        if definition.algorithms.is_empty() {
            return Err(PolicyError::invalid_input(
                "algorithms",
                format!("policy `{name}` declares no algorithms"),
            ));
        }
        self.policies.insert(name, definition);
        Ok(())
    }

    /// Parses a catalog from YAML text.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let parsed: Self = serde_yaml::from_str(yaml)?;
        let mut catalog = Self::new();
        for (name, definition) in parsed.policies {
            catalog.insert(name, definition)?;
        }
        log::debug!("loaded {} policies from catalog", catalog.len());
        Ok(catalog)
    }

    /// Reads and parses a YAML catalog file.
    pub fn from_yaml_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&contents)
    }

    /// Serializes the catalog back to YAML.
    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Looks up a policy by name.
    pub fn get(&self, name: &str) -> Option<&PolicyDefinition> {
        self.policies.get(name)
    }

    /// Policy names in catalog order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(String::as_str)
    }

    /// Number of policies.
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Whether the catalog has no policies.
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Validates a policy choice, defaulting to the policy's first algorithm.
    pub fn select(&self, policy: &str, algorithm: Option<&str>) -> Result<PolicySelection> {
        let definition = self.get(policy).ok_or_else(|| PolicyError::UnknownPolicy {
            name: policy.to_string(),
        })?;

        let algorithm = match algorithm {
            Some(requested) => definition
                .algorithms
                .iter()
                .find(|candidate| candidate.as_str() == requested)
                .ok_or_else(|| PolicyError::UnknownAlgorithm {
                    policy: policy.to_string(),
                    algorithm: requested.to_string(),
                })?,
            None => definition
                .algorithms
                .first()
                .ok_or_else(|| PolicyError::invalid_input("algorithms", "policy declares none"))?,
        };

        Ok(PolicySelection {
            policy: policy.to_string(),
            algorithm: algorithm.clone(),
        })
    }
}

impl Default for PolicyCatalog {
    /// The demonstration catalog shipped with the shells.
    ///
    /// The web form names the survival policy `RISK_ADJUSTED` while the
    /// desktop form names it `RISK_ADJUSTED_BENEFIT`; both are listed.
    fn default() -> Self {
        let mut policies = BTreeMap::new();
        policies.insert(
            "ALLOCATION_SCORE".to_string(),
            PolicyDefinition {
                description: "Score-based allocation".to_string(),
                algorithms: vec!["NORMAL".to_string(), "PRIORITY".to_string()],
            },
        );
        policies.insert(
            "RISK_ADJUSTED".to_string(),
            PolicyDefinition {
                description: "Survival benefit focus".to_string(),
                algorithms: vec!["WEIBULL_ADJUSTED".to_string()],
            },
        );
        policies.insert(
            "RISK_ADJUSTED_BENEFIT".to_string(),
            PolicyDefinition {
                description: "Survival benefit focus".to_string(),
                algorithms: vec!["WEIBULL_ADJUSTED".to_string()],
            },
        );
        Self { policies }
    }
}
