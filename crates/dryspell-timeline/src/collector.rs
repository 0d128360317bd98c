//! Collects the statistic stream of a run into timelines.

use crate::series::TimelineSeries;
use dryspell_core::config::{DurationCategory, RegionSpec};
use dryspell_core::errors::DroughtError;
use dryspell_core::mask::RegionId;
use dryspell_core::pipeline::{CombinationKey, CombinationOutcome, CombinationReport, StatisticSink};
use tracing::debug;

/// Y axis label of every timeline chart.
pub const Y_AXIS_LABEL: &str = "Change in % of time in extreme dry conditions";

/// A combination that produced no point.
#[derive(Clone, Debug, PartialEq)]
pub struct TimelineFailure {
    pub key: CombinationKey,
    pub error: DroughtError,
}

/// [`StatisticSink`] that groups statistics into [`TimelineSeries`].
///
/// Failed combinations are kept aside in [`Timeline::failures`] and never become points.
#[derive(Clone, Debug, Default)]
pub struct TimelineCollector {
    series: Vec<TimelineSeries>,
    failures: Vec<TimelineFailure>,
}

impl TimelineCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> Timeline {
        Timeline {
            series: self.series,
            failures: self.failures,
        }
    }

    fn series_for(&mut self, key: &CombinationKey) -> &mut TimelineSeries {
        let position = self
            .series
            .iter()
            .rposition(|s| s.matches(&key.region, &key.category.name, &key.variable.name));
        let index = match position {
            Some(index) => index,
            None => {
                debug!(
                    region = %key.region.name,
                    category = %key.category.name,
                    variable = %key.variable.name,
                    "Starting timeline series"
                );
                self.series.push(TimelineSeries::new(
                    key.region.clone(),
                    key.category.clone(),
                    key.variable.clone(),
                ));
                self.series.len() - 1
            }
        };
        &mut self.series[index]
    }
}

impl StatisticSink for TimelineCollector {
    fn accept(&mut self, report: &CombinationReport) {
        match &report.outcome {
            CombinationOutcome::Complete(statistic)
            | CombinationOutcome::Partial { statistic, .. } => {
                self.series_for(&report.key).statistics.push(statistic.clone());
            }
            CombinationOutcome::Failed(error) => {
                // Keep the series so the legend stays stable even without points
                self.series_for(&report.key);
                self.failures.push(TimelineFailure {
                    key: report.key.clone(),
                    error: error.clone(),
                });
            }
        }
    }
}

/// Series of one duration category, drawn together on a side panel.
#[derive(Clone, Debug, PartialEq)]
pub struct Panel<'a> {
    pub category: &'a DurationCategory,
    pub series: Vec<&'a TimelineSeries>,
}

impl Panel<'_> {
    /// Panel title, e.g. "Short-term".
    pub fn title(&self) -> &str {
        &self.category.label
    }
}

/// Every series of a run, ready for charting.
#[derive(Clone, Debug, Default)]
pub struct Timeline {
    series: Vec<TimelineSeries>,
    failures: Vec<TimelineFailure>,
}

impl Timeline {
    pub fn series(&self) -> &[TimelineSeries] {
        &self.series
    }

    pub fn failures(&self) -> &[TimelineFailure] {
        &self.failures
    }

    /// Regions in the order they were reported.
    pub fn regions(&self) -> Vec<&RegionSpec> {
        let mut regions: Vec<&RegionSpec> = Vec::new();
        for series in &self.series {
            if !regions.iter().any(|r| r.id == series.region.id) {
                regions.push(&series.region);
            }
        }
        regions
    }

    /// Every series of `region`, drawn together on the main chart.
    pub fn for_region(&self, region: RegionId) -> impl Iterator<Item = &TimelineSeries> {
        self.series.iter().filter(move |s| s.region.id == region)
    }

    /// Series of `region` split by duration category, in reporting order.
    pub fn panels(&self, region: RegionId) -> Vec<Panel<'_>> {
        let mut panels: Vec<Panel<'_>> = Vec::new();
        for series in self.for_region(region) {
            match panels.iter_mut().find(|p| p.category.name == series.category.name) {
                Some(panel) => panel.series.push(series),
                None => panels.push(Panel {
                    category: &series.category,
                    series: vec![series],
                }),
            }
        }
        panels
    }

    /// Chart title naming the baseline period, e.g.
    /// "Change in % of time in extreme dry conditions from 1976-2005".
    pub fn title(&self) -> Option<String> {
        let baseline = self.series.iter().find_map(|s| s.baseline())?;
        Some(format!(
            "{Y_AXIS_LABEL} from {}-{}",
            baseline.window.start.format("%Y"),
            baseline.window.end.format("%Y")
        ))
    }

    /// Center years of the projection windows, used as x axis ticks.
    pub fn ticks(&self) -> Vec<i32> {
        let mut ticks: Vec<i32> = self.series.iter().flat_map(|s| s.center_years()).collect();
        ticks.sort_unstable();
        ticks.dedup();
        ticks
    }
}
