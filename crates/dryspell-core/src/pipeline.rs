//! Orchestration of masking, windowing, reduction and ensemble statistics.
//!
//! [`AggregationPipeline::run`] walks [`PipelineConfig::combinations`] lazily and yields
//! one [`CombinationReport`] per (region, category, variable, window), in that order.
//!
//! ```text
//! for each (region, category, variable) group
//!      │
//!      ├─► fetch every ensemble member's field     (parallel, once per group)
//!      │
//!      └─► for each window
//!               ├─► reduce every member            (parallel)
//!               ├─► barrier
//!               └─► EnsembleStatistics::summarize  → CombinationReport
//! ```
//!
//! Structural errors (see [`DroughtError::is_structural`]) are yielded as `Err` and end the
//! run. Data-availability errors are reported in the [`CombinationOutcome`] of the affected
//! combination and the run carries on with the next one.

use crate::config::{
    CombinationIndex, DurationCategory, PipelineConfig, RegionSpec, VariableSpec,
};
use crate::ensemble::{DroppedMember, EnsembleMember, MissingMemberPolicy};
use crate::errors::{DroughtError, DroughtResult};
use crate::grid::GridField;
use crate::loader::{fetch, DatasetKey, DatasetLoader};
use crate::mask::RegionMask;
use crate::reducer::{ReducedField, SpatialTemporalReducer};
use crate::statistics::{EnsembleStatistics, WindowStatistic};
use crate::windows::TimeWindow;
use rayon::prelude::*;
use std::iter::FusedIterator;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Identifies the combination a report belongs to.
#[derive(Clone, Debug, PartialEq)]
pub struct CombinationKey {
    pub region: RegionSpec,
    pub category: DurationCategory,
    pub variable: VariableSpec,
    pub window_index: usize,
    pub window: TimeWindow,
}

/// Result of one combination.
#[derive(Clone, Debug, PartialEq)]
pub enum CombinationOutcome {
    /// Every configured member contributed
    Complete(WindowStatistic),
    /// Some members were excluded under [`MissingMemberPolicy::ExcludeMember`]
    Partial {
        statistic: WindowStatistic,
        dropped: Vec<DroppedMember>,
    },
    /// No statistic could be produced
    Failed(DroughtError),
}

impl CombinationOutcome {
    pub fn statistic(&self) -> Option<&WindowStatistic> {
        match self {
            CombinationOutcome::Complete(statistic)
            | CombinationOutcome::Partial { statistic, .. } => Some(statistic),
            CombinationOutcome::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&DroughtError> {
        match self {
            CombinationOutcome::Failed(error) => Some(error),
            _ => None,
        }
    }

    pub fn dropped(&self) -> &[DroppedMember] {
        match self {
            CombinationOutcome::Partial { dropped, .. } => dropped,
            _ => &[],
        }
    }
}

/// One entry of the statistic stream.
#[derive(Clone, Debug, PartialEq)]
pub struct CombinationReport {
    pub key: CombinationKey,
    pub outcome: CombinationOutcome,
}

/// Receives the statistic stream, typically to prepare plots.
pub trait StatisticSink {
    fn accept(&mut self, report: &CombinationReport);
}

impl StatisticSink for Vec<CombinationReport> {
    fn accept(&mut self, report: &CombinationReport) {
        self.push(report.clone());
    }
}

/// Counts of the outcomes of a finished run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub complete: usize,
    pub partial: usize,
    pub failed: usize,
}

impl RunSummary {
    fn record(&mut self, outcome: &CombinationOutcome) {
        match outcome {
            CombinationOutcome::Complete(_) => self.complete += 1,
            CombinationOutcome::Partial { .. } => self.partial += 1,
            CombinationOutcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.complete + self.partial + self.failed
    }
}

/// Drives the full aggregation over every configured combination.
pub struct AggregationPipeline {
    config: PipelineConfig,
    mask: Arc<RegionMask>,
    loader: Arc<dyn DatasetLoader>,
    reducer: SpatialTemporalReducer,
    members: Vec<EnsembleMember>,
    statistics: Vec<EnsembleStatistics>,
    pool: rayon::ThreadPool,
}

impl AggregationPipeline {
    /// Build a pipeline.
    ///
    /// # Errors
    ///
    /// * [`DroughtError::InvalidConfig`] if the configuration is inconsistent
    /// * [`DroughtError::UnknownRegion`] if a configured region is not in the mask
    pub fn new(
        config: PipelineConfig,
        mask: Arc<RegionMask>,
        loader: Arc<dyn DatasetLoader>,
    ) -> DroughtResult<Self> {
        config.validate()?;
        for region in &config.regions {
            mask.resolve(region.id)?;
        }
        let reducer = SpatialTemporalReducer::new(config.windower()?);
        let statistics = config
            .categories
            .iter()
            .map(|category| config.statistics_for(category))
            .collect::<DroughtResult<Vec<_>>>()?;
        let members = config.ensemble();
        if let MissingMemberPolicy::ExcludeMember { min_members } = config.missing_members {
            if min_members > members.len() {
                return Err(DroughtError::invalid_config(format!(
                    "min_members is {min_members} but the ensemble only has {} members",
                    members.len()
                )));
            }
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers.unwrap_or(0))
            .thread_name(|i| format!("dryspell-worker-{i}"))
            .build()
            .map_err(|e| DroughtError::Error(format!("cannot start worker pool: {e}")))?;

        Ok(Self {
            config,
            mask,
            loader,
            reducer,
            members,
            statistics,
            pool,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn members(&self) -> &[EnsembleMember] {
        &self.members
    }

    /// Lazily evaluate every combination in configuration order.
    pub fn run(&self) -> PipelineRun<'_> {
        PipelineRun {
            pipeline: self,
            combinations: Box::new(self.config.combinations()),
            group: None,
            finished: false,
        }
    }

    /// Run to completion, handing every report to `sink`.
    ///
    /// Stops at the first structural error.
    pub fn run_into(&self, sink: &mut dyn StatisticSink) -> DroughtResult<RunSummary> {
        let mut summary = RunSummary::default();
        for report in self.run() {
            let report = report?;
            summary.record(&report.outcome);
            sink.accept(&report);
        }
        info!(
            complete = summary.complete,
            partial = summary.partial,
            failed = summary.failed,
            "Aggregation finished"
        );
        Ok(summary)
    }

    /// Fetch every member's field for one (category, variable) pair.
    fn load_group(&self, category: usize, variable: usize) -> DroughtResult<LoadedGroup> {
        let category_name = &self.config.categories[category].name;
        let variable_name = &self.config.variables[variable].name;
        let fail_fast = self.config.missing_members == MissingMemberPolicy::FailCombination;
        let cancelled = AtomicBool::new(false);

        info!(
            category = %category_name,
            variable = %variable_name,
            members = self.members.len(),
            "Loading ensemble"
        );

        let fetched: Vec<(EnsembleMember, Option<DroughtResult<Arc<GridField>>>)> =
            self.pool.install(|| {
                self.members
                    .par_iter()
                    .map(|member| {
                        if cancelled.load(Ordering::Relaxed) {
                            return (member.clone(), None);
                        }
                        let key = DatasetKey::new(
                            category_name,
                            member,
                            variable_name,
                            &self.config.scenario,
                        );
                        let result = fetch(&self.loader, &key, &self.config.loading);
                        if fail_fast && result.is_err() {
                            cancelled.store(true, Ordering::Relaxed);
                        }
                        (member.clone(), Some(result))
                    })
                    .collect()
            });

        let mut group = LoadedGroup {
            category,
            variable,
            fields: Vec::with_capacity(fetched.len()),
            dropped: Vec::new(),
            failure: None,
        };
        for (member, result) in fetched {
            match result {
                Some(Ok(field)) => group.fields.push((member, field)),
                Some(Err(error)) if error.is_structural() => return Err(error),
                Some(Err(error)) => {
                    warn!(member = %member, error = %error, "Ensemble member unavailable");
                    if fail_fast {
                        group.failure.get_or_insert(error);
                    } else {
                        group.dropped.push(DroppedMember { member, error });
                    }
                }
                // Cancelled after a sibling failed
                None => {}
            }
        }
        Ok(group)
    }

    fn evaluate(
        &self,
        index: CombinationIndex,
        group: &mut Option<LoadedGroup>,
    ) -> DroughtResult<CombinationReport> {
        let region = &self.config.regions[index.region];
        let window = &self.reducer.windower().windows()[index.window];
        let key = CombinationKey {
            region: region.clone(),
            category: self.config.categories[index.category].clone(),
            variable: self.config.variables[index.variable].clone(),
            window_index: index.window,
            window: window.clone(),
        };

        let reusable = group
            .as_ref()
            .is_some_and(|g| g.category == index.category && g.variable == index.variable);
        if !reusable {
            *group = Some(self.load_group(index.category, index.variable)?);
        }
        let Some(loaded) = group.as_ref() else {
            return Err(DroughtError::Error("ensemble group was not loaded".to_string()));
        };

        let outcome = self.summarize_group(loaded, index, region, window)?;
        match &outcome {
            CombinationOutcome::Failed(error) => warn!(
                region = %region.name,
                category = %key.category.name,
                variable = %key.variable.name,
                window = index.window,
                error = %error,
                "Combination failed"
            ),
            other => {
                if let Some(statistic) = other.statistic() {
                    debug!(
                        region = %region.name,
                        category = %key.category.name,
                        variable = %key.variable.name,
                        window = index.window,
                        median = statistic.median,
                        lower = statistic.lower,
                        upper = statistic.upper,
                        "Window summarised"
                    );
                }
            }
        }
        Ok(CombinationReport { key, outcome })
    }

    fn summarize_group(
        &self,
        loaded: &LoadedGroup,
        index: CombinationIndex,
        region: &RegionSpec,
        window: &TimeWindow,
    ) -> DroughtResult<CombinationOutcome> {
        if let Some(error) = &loaded.failure {
            return Ok(CombinationOutcome::Failed(error.clone()));
        }
        if let MissingMemberPolicy::ExcludeMember { min_members } = self.config.missing_members {
            if loaded.fields.len() < min_members {
                return Ok(CombinationOutcome::Failed(DroughtError::PartialEnsemble {
                    available: loaded.fields.len(),
                    configured: self.members.len(),
                    required: min_members,
                    dropped: loaded.dropped.iter().map(|d| d.member.to_string()).collect(),
                }));
            }
        }

        let reduced: Vec<ReducedField> = self.pool.install(|| {
            loaded
                .fields
                .par_iter()
                .map(|(_, field)| self.reducer.reduce(field, &self.mask, region.id, window))
                .collect::<DroughtResult<Vec<_>>>()
        })?;

        let statistics = &self.statistics[index.category];
        match statistics.summarize(&reduced, index.window, window, window.length_months() as f64) {
            Ok(statistic) if loaded.dropped.is_empty() => Ok(CombinationOutcome::Complete(statistic)),
            Ok(statistic) => Ok(CombinationOutcome::Partial {
                statistic,
                dropped: loaded.dropped.clone(),
            }),
            Err(error) if error.is_structural() => Err(error),
            Err(error) => Ok(CombinationOutcome::Failed(error)),
        }
    }
}

/// Member fields for one (category, variable) pair, shared by all its windows and regions.
struct LoadedGroup {
    category: usize,
    variable: usize,
    fields: Vec<(EnsembleMember, Arc<GridField>)>,
    dropped: Vec<DroppedMember>,
    failure: Option<DroughtError>,
}

/// Lazy iterator over the reports of a run.
///
/// Yields `Err` at most once, after which it is exhausted.
pub struct PipelineRun<'a> {
    pipeline: &'a AggregationPipeline,
    combinations: Box<dyn Iterator<Item = CombinationIndex> + 'a>,
    group: Option<LoadedGroup>,
    finished: bool,
}

impl Iterator for PipelineRun<'_> {
    type Item = DroughtResult<CombinationReport>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let Some(index) = self.combinations.next() else {
            self.finished = true;
            return None;
        };
        let result = self.pipeline.evaluate(index, &mut self.group);
        if result.is_err() {
            self.finished = true;
            self.group = None;
        }
        Some(result)
    }
}

impl FusedIterator for PipelineRun<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::InMemoryLoader;
    use crate::mask::RegionId;
    use ndarray::{array, Array3};
    use std::sync::atomic::AtomicUsize;

    fn config(missing_members: MissingMemberPolicy) -> PipelineConfig {
        PipelineConfig {
            scenario: "rcp85".to_string(),
            models: vec!["M1".to_string(), "M2".to_string()],
            bias_corrections: vec!["BC".to_string()],
            workers: Some(2),
            regions: vec![
                RegionSpec {
                    id: RegionId::Code(1),
                    name: "North".to_string(),
                    abbreviation: None,
                },
                RegionSpec {
                    id: RegionId::Code(2),
                    name: "South".to_string(),
                    abbreviation: None,
                },
            ],
            categories: vec![DurationCategory {
                name: "1-month".to_string(),
                label: "Short-term".to_string(),
                baseline_percentage: 25.0,
            }],
            variables: vec![VariableSpec {
                name: "pr".to_string(),
                label: "rainfall".to_string(),
            }],
            windows: vec![
                TimeWindow::years(2000, 2001, 2000).unwrap(),
                TimeWindow::years(2002, 2003, 2002).unwrap(),
            ],
            statistics: Default::default(),
            missing_members,
            loading: Default::default(),
        }
    }

    fn mask() -> Arc<RegionMask> {
        Arc::new(RegionMask::from_codes(array![[Some(1), Some(1)], [Some(2), Some(2)]]))
    }

    fn field(months: f64) -> GridField {
        GridField::yearly(2000, Array3::from_elem((4, 2, 2), months)).unwrap()
    }

    fn loader(models: &[&str]) -> InMemoryLoader {
        let mut loader = InMemoryLoader::new();
        for (i, model) in models.iter().enumerate() {
            loader.insert(
                DatasetKey::new("1-month", &EnsembleMember::new(model, "BC"), "pr", "rcp85"),
                field(3.0 + i as f64),
            );
        }
        loader
    }

    /// Counts loads so tests can check that fields are fetched once per group.
    struct CountingLoader {
        inner: InMemoryLoader,
        calls: AtomicUsize,
    }

    impl DatasetLoader for CountingLoader {
        fn load(&self, key: &DatasetKey) -> DroughtResult<Arc<GridField>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.load(key)
        }
    }

    #[test]
    fn reports_follow_configuration_order() {
        let pipeline = AggregationPipeline::new(
            config(MissingMemberPolicy::FailCombination),
            mask(),
            Arc::new(loader(&["M1", "M2"])),
        )
        .unwrap();
        let reports: Vec<CombinationReport> = pipeline.run().collect::<DroughtResult<_>>().unwrap();
        let order: Vec<(String, usize)> = reports
            .iter()
            .map(|r| (r.key.region.name.clone(), r.key.window_index))
            .collect();
        assert_eq!(
            order,
            vec![
                ("North".to_string(), 0),
                ("North".to_string(), 1),
                ("South".to_string(), 0),
                ("South".to_string(), 1),
            ]
        );
        // Pooled totals are 6 (M1) and 8 (M2) months out of 24
        let statistic = reports[0].outcome.statistic().unwrap();
        assert_eq!(statistic.member_count, 2);
        assert_eq!(statistic.sample_count, 4);
        assert!((statistic.median - (7.0 / 24.0 * 100.0 - 25.0)).abs() < 1e-9);
    }

    #[test]
    fn fields_are_loaded_once_per_group() {
        let counting = Arc::new(CountingLoader {
            inner: loader(&["M1", "M2"]),
            calls: AtomicUsize::new(0),
        });
        let pipeline = AggregationPipeline::new(
            config(MissingMemberPolicy::FailCombination),
            mask(),
            counting.clone(),
        )
        .unwrap();
        let summary = pipeline.run_into(&mut Vec::<CombinationReport>::new()).unwrap();
        assert_eq!(summary.complete, 4);
        assert_eq!(counting.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_member_cancels_pending_loads() {
        let mut config = config(MissingMemberPolicy::FailCombination);
        config.models = vec!["M0".to_string(), "M1".to_string(), "M2".to_string()];
        config.regions.truncate(1);
        config.workers = Some(1);
        let counting = Arc::new(CountingLoader {
            inner: loader(&["M1", "M2"]),
            calls: AtomicUsize::new(0),
        });
        let pipeline = AggregationPipeline::new(config, mask(), counting.clone()).unwrap();

        let reports: Vec<CombinationReport> = pipeline.run().collect::<DroughtResult<_>>().unwrap();
        assert_eq!(reports.len(), 2);
        let missing = DroughtError::DatasetNotFound {
            key: "1-month/BC/M0/pr/rcp85".to_string(),
        };
        for report in &reports {
            assert_eq!(report.outcome, CombinationOutcome::Failed(missing.clone()));
        }
        // One worker loads in member order, so M0 fails before its siblings start
        assert!(counting.calls.load(Ordering::SeqCst) < pipeline.members().len());
    }

    #[test]
    fn fail_policy_fails_every_window_of_the_group() {
        let pipeline = AggregationPipeline::new(
            config(MissingMemberPolicy::FailCombination),
            mask(),
            Arc::new(loader(&["M1"])),
        )
        .unwrap();
        let mut reports: Vec<CombinationReport> = Vec::new();
        let summary = pipeline.run_into(&mut reports).unwrap();
        assert_eq!(summary.failed, 4);
        for report in &reports {
            assert!(matches!(
                report.outcome.error(),
                Some(DroughtError::DatasetNotFound { key }) if key.contains("M2")
            ));
        }
    }

    #[test]
    fn exclude_policy_records_dropped_members() {
        let pipeline = AggregationPipeline::new(
            config(MissingMemberPolicy::ExcludeMember { min_members: 1 }),
            mask(),
            Arc::new(loader(&["M1"])),
        )
        .unwrap();
        let reports: Vec<CombinationReport> = pipeline.run().collect::<DroughtResult<_>>().unwrap();
        assert_eq!(reports.len(), 4);
        for report in &reports {
            assert_eq!(report.outcome.dropped().len(), 1);
            assert_eq!(report.outcome.dropped()[0].member, EnsembleMember::new("M2", "BC"));
            assert_eq!(report.outcome.statistic().unwrap().member_count, 1);
        }
    }

    #[test]
    fn exclude_policy_enforces_minimum() {
        let pipeline = AggregationPipeline::new(
            config(MissingMemberPolicy::ExcludeMember { min_members: 2 }),
            mask(),
            Arc::new(loader(&["M1"])),
        )
        .unwrap();
        let reports: Vec<CombinationReport> = pipeline.run().collect::<DroughtResult<_>>().unwrap();
        assert!(reports.iter().all(|r| matches!(
            r.outcome.error(),
            Some(DroughtError::PartialEnsemble {
                available: 1,
                required: 2,
                ..
            })
        )));
    }

    #[test]
    fn minimum_larger_than_ensemble_is_rejected() {
        let result = AggregationPipeline::new(
            config(MissingMemberPolicy::ExcludeMember { min_members: 3 }),
            mask(),
            Arc::new(loader(&["M1", "M2"])),
        );
        assert!(matches!(result, Err(DroughtError::InvalidConfig(_))));
    }

    #[test]
    fn structural_error_ends_the_run() {
        let mut bad = InMemoryLoader::new();
        for model in ["M1", "M2"] {
            bad.insert(
                DatasetKey::new("1-month", &EnsembleMember::new(model, "BC"), "pr", "rcp85"),
                GridField::yearly(2000, Array3::zeros((4, 3, 3))).unwrap(),
            );
        }
        let pipeline = AggregationPipeline::new(
            config(MissingMemberPolicy::FailCombination),
            mask(),
            Arc::new(bad),
        )
        .unwrap();
        let mut run = pipeline.run();
        assert!(matches!(
            run.next(),
            Some(Err(DroughtError::ShapeMismatch { .. }))
        ));
        assert!(run.next().is_none());
        assert!(run.next().is_none());
    }
}
