//! Static configuration of a pipeline run.
//!
//! The configuration enumerates every dimension of the run (regions, duration categories,
//! variables, models, bias corrections, windows) and carries the domain constants that
//! would otherwise be hidden literals, such as the stationary baseline percentage of each
//! duration category. It is usually read from TOML:
//!
//! ```toml
//! scenario = "rcp85"
//! models = ["CSIRO-BOM-ACCESS1-0", "MIROC-MIROC5"]
//! bias_corrections = ["QME", "CCAM"]
//!
//! [[regions]]
//! id = { code = 1 }
//! name = "Central Slopes"
//! abbreviation = "CS"
//!
//! [[categories]]
//! name = "1-month"
//! label = "Short-term"
//! baseline_percentage = 16.666666666666668
//!
//! [[variables]]
//! name = "pr"
//! label = "rainfall"
//!
//! [[windows]]
//! start = "1976-01-01"
//! end = "2005-12-31"
//! center_year = 1990
//! ```

use crate::ensemble::{cross_members, EnsembleMember, MissingMemberPolicy};
use crate::errors::{DroughtError, DroughtResult};
use crate::loader::LoadPolicy;
use crate::mask::RegionId;
use crate::statistics::EnsembleStatistics;
use crate::windows::{TemporalWindower, TimeWindow};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::hash::Hash;
use std::path::Path;

/// A region to summarise.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegionSpec {
    pub id: RegionId,
    pub name: String,
    /// Short name used in output identifiers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abbreviation: Option<String>,
}

/// A drought-duration category, e.g. 1-month or 24-month persistence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DurationCategory {
    pub name: String,
    /// Timeline label prefix, e.g. "Short-term"
    pub label: String,
    /// Percentage of time expected in this category under historical stationarity
    pub baseline_percentage: f64,
}

/// A hydrological variable, e.g. precipitation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VariableSpec {
    pub name: String,
    /// Human readable name, e.g. "rainfall"
    pub label: String,
}

/// Quantiles of the uncertainty band.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticsConfig {
    pub lower_quantile: f64,
    pub upper_quantile: f64,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            lower_quantile: 0.1,
            upper_quantile: 0.9,
        }
    }
}

/// Complete description of a pipeline run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub scenario: String,
    pub models: Vec<String>,
    pub bias_corrections: Vec<String>,
    /// Size of the worker pool; the rayon default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    pub regions: Vec<RegionSpec>,
    pub categories: Vec<DurationCategory>,
    pub variables: Vec<VariableSpec>,
    /// Ascending windows, the first being the historical baseline
    pub windows: Vec<TimeWindow>,
    #[serde(default)]
    pub statistics: StatisticsConfig,
    #[serde(default)]
    pub missing_members: MissingMemberPolicy,
    #[serde(default)]
    pub loading: LoadPolicy,
}

/// One (region, category, variable, window) combination of the run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CombinationIndex {
    pub region: usize,
    pub category: usize,
    pub variable: usize,
    pub window: usize,
}

impl PipelineConfig {
    /// Parse and validate a TOML configuration.
    pub fn from_toml_str(source: &str) -> DroughtResult<Self> {
        let config: PipelineConfig = toml::from_str(source)
            .map_err(|e| DroughtError::invalid_config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> DroughtResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            DroughtError::invalid_config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&source)
    }

    pub fn to_toml_string(&self) -> DroughtResult<String> {
        toml::to_string(self).map_err(|e| DroughtError::Error(e.to_string()))
    }

    /// Check the configuration for internal consistency.
    ///
    /// Region codes are checked against the mask later, when the pipeline is built.
    pub fn validate(&self) -> DroughtResult<()> {
        non_empty("models", &self.models)?;
        non_empty("bias_corrections", &self.bias_corrections)?;
        non_empty("regions", &self.regions)?;
        non_empty("categories", &self.categories)?;
        non_empty("variables", &self.variables)?;

        unique("models", self.models.iter())?;
        unique("bias_corrections", self.bias_corrections.iter())?;
        unique("regions", self.regions.iter().map(|r| r.id))?;
        unique("categories", self.categories.iter().map(|c| &c.name))?;
        unique("variables", self.variables.iter().map(|v| &v.name))?;

        for category in &self.categories {
            if !(0.0..=100.0).contains(&category.baseline_percentage) {
                return Err(DroughtError::invalid_config(format!(
                    "baseline percentage of category {} must lie in 0..=100, got {}",
                    category.name, category.baseline_percentage
                )));
            }
        }

        self.windower()?;
        self.statistics_for(&self.categories[0])?;
        self.missing_members.validate()?;
        self.loading.validate()?;
        if self.workers == Some(0) {
            return Err(DroughtError::invalid_config("workers must be at least 1"));
        }
        Ok(())
    }

    pub fn windower(&self) -> DroughtResult<TemporalWindower> {
        TemporalWindower::new(self.windows.clone())
    }

    /// Ensemble statistics for one duration category.
    pub fn statistics_for(&self, category: &DurationCategory) -> DroughtResult<EnsembleStatistics> {
        EnsembleStatistics::new(category.baseline_percentage)
            .with_quantiles(self.statistics.lower_quantile, self.statistics.upper_quantile)
    }

    /// Every configured ensemble member, models outermost.
    pub fn ensemble(&self) -> Vec<EnsembleMember> {
        cross_members(&self.models, &self.bias_corrections)
    }

    /// Every combination in run order: regions, then categories, then variables, then
    /// windows.
    pub fn combinations(&self) -> impl Iterator<Item = CombinationIndex> + '_ {
        let categories = self.categories.len();
        let variables = self.variables.len();
        let windows = self.windows.len();
        (0..self.regions.len()).flat_map(move |region| {
            (0..categories).flat_map(move |category| {
                (0..variables).flat_map(move |variable| {
                    (0..windows).map(move |window| CombinationIndex {
                        region,
                        category,
                        variable,
                        window,
                    })
                })
            })
        })
    }
}

fn non_empty<T>(what: &str, items: &[T]) -> DroughtResult<()> {
    if items.is_empty() {
        return Err(DroughtError::invalid_config(format!("{what} must not be empty")));
    }
    Ok(())
}

fn unique<T>(what: &str, items: impl Iterator<Item = T>) -> DroughtResult<()>
where
    T: Eq + Hash + std::fmt::Debug,
{
    let mut seen = HashSet::new();
    for item in items {
        let label = format!("{item:?}");
        if !seen.insert(item) {
            return Err(DroughtError::invalid_config(format!(
                "duplicate entry {label} in {what}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
scenario = "rcp85"
models = ["ACCESS1-0", "MIROC5"]
bias_corrections = ["QME", "CCAM"]

[[regions]]
id = { code = 1 }
name = "Central Slopes"
abbreviation = "CS"

[[regions]]
id = "all"
name = "Australia"

[[categories]]
name = "1-month"
label = "Short-term"
baseline_percentage = 16.666666666666668

[[categories]]
name = "24-month"
label = "Long-term"
baseline_percentage = 16.666666666666668

[[variables]]
name = "pr"
label = "rainfall"

[[windows]]
start = "1976-01-01"
end = "2005-12-31"
center_year = 1990

[[windows]]
start = "2016-01-01"
end = "2045-12-31"
center_year = 2030

[missing_members]
policy = "exclude_member"
min_members = 3

[loading]
timeout_secs = 30.0
"#;

    #[test]
    fn parse_sample() {
        let config = PipelineConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.regions[0].id, RegionId::Code(1));
        assert_eq!(config.regions[1].id, RegionId::All);
        assert_eq!(config.regions[1].abbreviation, None);
        assert_eq!(config.windows[1].length_months(), 360);
        assert_eq!(
            config.missing_members,
            MissingMemberPolicy::ExcludeMember { min_members: 3 }
        );
        assert_eq!(config.loading.timeout_secs, Some(30.0));
        assert_eq!(config.loading.retries, 0);
        assert_eq!(config.statistics, StatisticsConfig::default());
        assert_eq!(config.workers, None);
    }

    #[test]
    fn toml_round_trip() {
        let config = PipelineConfig::from_toml_str(SAMPLE).unwrap();
        let serialised = config.to_toml_string().unwrap();
        let parsed = PipelineConfig::from_toml_str(&serialised).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn ensemble_is_cross_product() {
        let config = PipelineConfig::from_toml_str(SAMPLE).unwrap();
        let members = config.ensemble();
        assert_eq!(members.len(), 4);
        assert_eq!(members[1], EnsembleMember::new("ACCESS1-0", "CCAM"));
    }

    #[test]
    fn combinations_follow_run_order() {
        let config = PipelineConfig::from_toml_str(SAMPLE).unwrap();
        let combinations: Vec<CombinationIndex> = config.combinations().collect();
        assert_eq!(combinations.len(), 2 * 2 * 1 * 2);
        assert_eq!(
            combinations[0],
            CombinationIndex {
                region: 0,
                category: 0,
                variable: 0,
                window: 0
            }
        );
        assert_eq!(
            combinations[3],
            CombinationIndex {
                region: 0,
                category: 1,
                variable: 0,
                window: 1
            }
        );
        assert_eq!(combinations[4].region, 1);
        let mut sorted = combinations.clone();
        sorted.sort();
        assert_eq!(sorted, combinations);
    }

    #[test]
    fn rejects_duplicates_and_gaps() {
        let duplicated = SAMPLE.replace(
            r#"models = ["ACCESS1-0", "MIROC5"]"#,
            r#"models = ["MIROC5", "MIROC5"]"#,
        );
        assert!(matches!(
            PipelineConfig::from_toml_str(&duplicated),
            Err(DroughtError::InvalidConfig(_))
        ));

        let no_models = SAMPLE.replace(r#"models = ["ACCESS1-0", "MIROC5"]"#, "models = []");
        assert!(PipelineConfig::from_toml_str(&no_models).is_err());
    }

    #[test]
    fn rejects_bad_constants() {
        let bad_baseline = SAMPLE.replacen(
            "baseline_percentage = 16.666666666666668",
            "baseline_percentage = 150.0",
            1,
        );
        assert!(PipelineConfig::from_toml_str(&bad_baseline).is_err());

        let bad_quantiles =
            format!("{SAMPLE}\n[statistics]\nlower_quantile = 0.7\nupper_quantile = 0.9\n");
        assert!(PipelineConfig::from_toml_str(&bad_quantiles).is_err());

        let zero_members = SAMPLE.replace("min_members = 3", "min_members = 0");
        assert!(PipelineConfig::from_toml_str(&zero_members).is_err());
    }

    #[test]
    fn rejects_unordered_windows() {
        let unordered = SAMPLE.replace("start = \"2016-01-01\"", "start = \"1970-01-01\"");
        assert!(matches!(
            PipelineConfig::from_toml_str(&unordered),
            Err(DroughtError::InvalidConfig(_))
        ));
    }
}
