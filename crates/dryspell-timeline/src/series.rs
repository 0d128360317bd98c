//! Plot-ready series of one (region, category, variable) triple.

use dryspell_core::config::{DurationCategory, RegionSpec, VariableSpec};
use dryspell_core::statistics::WindowStatistic;
use serde::{Deserialize, Serialize};

/// One marker on a timeline, in percentage points relative to the baseline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimelinePoint {
    pub center_year: i32,
    pub median: f64,
    pub lower: f64,
    pub upper: f64,
    /// Members contributing to the statistic, lower than configured for partial outcomes
    pub member_count: usize,
}

impl From<&WindowStatistic> for TimelinePoint {
    fn from(statistic: &WindowStatistic) -> Self {
        Self {
            center_year: statistic.window.center_year,
            median: statistic.median,
            lower: statistic.lower,
            upper: statistic.upper,
            member_count: statistic.member_count,
        }
    }
}

/// Statistics of every window of one (region, category, variable) triple.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimelineSeries {
    pub region: RegionSpec,
    pub category: DurationCategory,
    pub variable: VariableSpec,
    /// In window order, baseline included when it could be computed
    pub statistics: Vec<WindowStatistic>,
}

impl TimelineSeries {
    pub fn new(region: RegionSpec, category: DurationCategory, variable: VariableSpec) -> Self {
        Self {
            region,
            category,
            variable,
            statistics: Vec::new(),
        }
    }

    /// Legend entry, e.g. "Short-term rainfall extreme dry".
    pub fn label(&self) -> String {
        format!("{} {} extreme dry", self.category.label, self.variable.label)
    }

    pub fn matches(&self, region: &RegionSpec, category: &str, variable: &str) -> bool {
        self.region.id == region.id
            && self.category.name == category
            && self.variable.name == variable
    }

    pub fn baseline(&self) -> Option<&WindowStatistic> {
        self.statistics.iter().find(|s| s.is_baseline())
    }

    /// Projection windows only; the baseline is the zero line and is not charted.
    pub fn points(&self) -> Vec<TimelinePoint> {
        self.statistics
            .iter()
            .filter(|s| !s.is_baseline())
            .map(TimelinePoint::from)
            .collect()
    }

    pub fn center_years(&self) -> Vec<i32> {
        self.points().iter().map(|p| p.center_year).collect()
    }

    pub fn medians(&self) -> Vec<f64> {
        self.points().iter().map(|p| p.median).collect()
    }

    /// `(lower, upper)` pairs for the shaded uncertainty band.
    pub fn bands(&self) -> Vec<(f64, f64)> {
        self.points().iter().map(|p| (p.lower, p.upper)).collect()
    }

    /// Medians smoothed with a trailing window of `n` points.
    pub fn smoothed_medians(&self, n: usize) -> Vec<f64> {
        moving_average(&self.medians(), n)
    }
}

/// Mean of every run of `n` consecutive values.
///
/// The result has `values.len() - n + 1` entries, and is empty when `n` is zero or larger
/// than the input.
pub fn moving_average(values: &[f64], n: usize) -> Vec<f64> {
    if n == 0 || n > values.len() {
        return Vec::new();
    }
    values
        .windows(n)
        .map(|run| run.iter().sum::<f64>() / n as f64)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dryspell_core::mask::RegionId;
    use dryspell_core::windows::TimeWindow;
    use is_close::is_close;

    fn statistic(window_index: usize, center_year: i32, median: f64) -> WindowStatistic {
        WindowStatistic {
            window_index,
            window: TimeWindow::years(center_year - 14, center_year + 15, center_year).unwrap(),
            median,
            lower: median - 2.0,
            upper: median + 3.0,
            sample_count: 10,
            member_count: 16,
        }
    }

    fn series() -> TimelineSeries {
        let mut series = TimelineSeries::new(
            RegionSpec {
                id: RegionId::Code(4),
                name: "Murray Basin".to_string(),
                abbreviation: Some("MB".to_string()),
            },
            DurationCategory {
                name: "24-month".to_string(),
                label: "Long-term".to_string(),
                baseline_percentage: 20.0,
            },
            VariableSpec {
                name: "s0".to_string(),
                label: "soil moisture".to_string(),
            },
        );
        series.statistics = vec![
            statistic(0, 1990, 0.5),
            statistic(1, 2030, 4.0),
            statistic(2, 2050, 6.0),
            statistic(3, 2070, 11.0),
        ];
        series
    }

    #[test]
    fn label_joins_category_and_variable() {
        assert_eq!(series().label(), "Long-term soil moisture extreme dry");
    }

    #[test]
    fn baseline_is_not_charted() {
        let series = series();
        assert_eq!(series.center_years(), vec![2030, 2050, 2070]);
        assert_eq!(series.medians(), vec![4.0, 6.0, 11.0]);
        assert_eq!(series.bands()[0], (2.0, 7.0));
        assert_eq!(series.baseline().unwrap().window.center_year, 1990);
    }

    #[test]
    fn smoothing() {
        let smoothed = series().smoothed_medians(2);
        assert_eq!(smoothed.len(), 2);
        assert!(is_close!(smoothed[0], 5.0));
        assert!(is_close!(smoothed[1], 8.5));
    }

    #[test]
    fn moving_average_edges() {
        assert_eq!(moving_average(&[1.0, 2.0, 3.0], 3), vec![2.0]);
        assert!(moving_average(&[1.0, 2.0], 3).is_empty());
        assert!(moving_average(&[1.0, 2.0], 0).is_empty());
    }

    #[test]
    fn series_serialises_to_json() {
        let json = serde_json::to_string(&series()).unwrap();
        let parsed: TimelineSeries = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, series());
    }
}
