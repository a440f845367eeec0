//! Configuration for a simulation run, with the same builder-style overrides
//! the shells expose as form inputs.

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::error::{PolicyError, Result};
use crate::formulation::GeneratedFormula;
use crate::policy::{PolicyCatalog, PolicySelection};

/// Number of simulated years accepted by a run.
pub const YEARS_RANGE: RangeInclusive<u32> = 1..=50;

/// Parameters handed to a [`SimulationEngine`](crate::simulation::SimulationEngine).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationOptions {
    /// Catalog name of the allocation policy.
    pub policy: String,
    /// Algorithm of the policy; `None` takes the catalog default.
    pub algorithm: Option<String>,
    /// Simulated horizon in years.
    pub years: u32,
    /// Independent replicates whose metrics are averaged.
    pub replicates: usize,
    /// Progress is reported once per batch of replicates.
    pub batches: usize,
    /// Base seed from which replicate seeds are derived.
    pub seed: u64,
    /// Generated allocation function, when the policy is user-built.
    pub policy_formula: Option<String>,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            policy: "ALLOCATION_SCORE".to_string(),
            algorithm: None,
            years: 10,
            replicates: 3,
            batches: 3,
            seed: 0,
            policy_formula: None,
        }
    }
}

impl SimulationOptions {
    /// Select the catalog policy to simulate.
    pub fn with_policy<S: Into<String>>(mut self, policy: S) -> Self {
        self.policy = policy.into();
        self
    }

    /// Pin the policy algorithm instead of taking the catalog default.
    pub fn with_algorithm<S: Into<String>>(mut self, algorithm: S) -> Self {
        self.algorithm = Some(algorithm.into());
        self
    }

    /// Set the simulated horizon in years.
    pub fn with_years(mut self, years: u32) -> Self {
        self.years = years;
        self
    }

    /// Set the number of replicates; at least one always runs.
    pub fn with_replicates(mut self, replicates: usize) -> Self {
        self.replicates = replicates.max(1);
        self
    }

    /// Set the number of progress batches; at least one always runs.
    pub fn with_batches(mut self, batches: usize) -> Self {
        self.batches = batches.max(1);
        self
    }

    /// Set the base seed for replicate seeds.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Attach the formula produced by the policy builder.
    pub fn with_policy_formula(mut self, formula: &GeneratedFormula) -> Self {
        self.policy_formula = Some(formula.source().to_string());
        self
    }

    /// Checks the numeric fields.
    pub fn validate(&self) -> Result<()> {
        if !YEARS_RANGE.contains(&self.years) {
            return Err(PolicyError::invalid_input(
                "years",
                format!(
                    "{} is outside {}..={}",
                    self.years,
                    YEARS_RANGE.start(),
                    YEARS_RANGE.end()
                ),
            ));
        }
        if self.replicates == 0 {
            return Err(PolicyError::invalid_input("replicates", "must be at least 1"));
        }
        if self.batches == 0 {
            return Err(PolicyError::invalid_input("batches", "must be at least 1"));
        }
        Ok(())
    }

    /// Validates the options and resolves the policy against a catalog.
    pub fn resolve(&self, catalog: &PolicyCatalog) -> Result<PolicySelection> {
        self.validate()?;
        catalog.select(&self.policy, self.algorithm.as_deref())
    }
}
