//! Ensemble members and the policy for members whose data cannot be fetched.

use crate::errors::{DroughtError, DroughtResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One realisation of the ensemble: a climate model post-processed by one bias-correction
/// method.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EnsembleMember {
    pub model: String,
    pub bias_correction: String,
}

impl EnsembleMember {
    pub fn new(model: &str, bias_correction: &str) -> Self {
        Self {
            model: model.to_string(),
            bias_correction: bias_correction.to_string(),
        }
    }
}

impl fmt::Display for EnsembleMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bias_correction, self.model)
    }
}

/// Every model paired with every bias-correction method.
///
/// Members vary along two axes but are pooled identically.
pub fn cross_members(models: &[String], bias_corrections: &[String]) -> Vec<EnsembleMember> {
    models
        .iter()
        .flat_map(|model| {
            bias_corrections
                .iter()
                .map(move |bc| EnsembleMember::new(model, bc))
        })
        .collect()
}

/// What to do when a member's dataset cannot be fetched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum MissingMemberPolicy {
    /// Fail every combination that needs the member
    #[default]
    FailCombination,
    /// Drop the member, record it, and continue while at least `min_members` remain
    ExcludeMember { min_members: usize },
}

impl MissingMemberPolicy {
    pub fn validate(&self) -> DroughtResult<()> {
        match self {
            MissingMemberPolicy::ExcludeMember { min_members: 0 } => Err(
                DroughtError::invalid_config("min_members must be at least 1"),
            ),
            _ => Ok(()),
        }
    }
}

/// A member excluded from a combination, with the reason it could not be used.
#[derive(Clone, Debug, PartialEq)]
pub struct DroppedMember {
    pub member: EnsembleMember,
    pub error: DroughtError,
}
