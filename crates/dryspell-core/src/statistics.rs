//! Ensemble statistics over pooled reduced fields.
//!
//! Every defined cell value of every ensemble member is pooled into one sample, so the
//! statistic describes "any in-region cell from any member" rather than a per-cell
//! ensemble mean. The pooled median and quantiles are then expressed as the percentage of
//! the window spent in drought, minus the percentage expected under historical
//! stationarity:
//!
//! $$ anomaly = \frac{raw}{months} \times 100 - baseline $$

use crate::errors::{DroughtError, DroughtResult};
use crate::grid::FloatValue;
use crate::reducer::ReducedField;
use crate::windows::TimeWindow;
use serde::{Deserialize, Serialize};

/// Quantile of an ascending, `NaN`-free slice using linear interpolation between order
/// statistics (the default method of `numpy.quantile`).
///
/// Returns `None` for an empty slice.
pub fn quantile_sorted(sorted: &[FloatValue], q: FloatValue) -> Option<FloatValue> {
    if sorted.is_empty() {
        return None;
    }
    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as FloatValue;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as FloatValue;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

/// Quantile of arbitrary values, ignoring `NaN`.
pub fn nan_quantile(values: impl IntoIterator<Item = FloatValue>, q: FloatValue) -> Option<FloatValue> {
    let sorted = sorted_defined(values);
    quantile_sorted(&sorted, q)
}

fn sorted_defined(values: impl IntoIterator<Item = FloatValue>) -> Vec<FloatValue> {
    let mut sorted: Vec<FloatValue> = values.into_iter().filter(|v| !v.is_nan()).collect();
    sorted.sort_by(FloatValue::total_cmp);
    sorted
}

/// Ensemble summary of one window, in percentage points relative to the baseline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WindowStatistic {
    /// Position of the window in the configured sequence (0 is the historical baseline)
    pub window_index: usize,
    pub window: TimeWindow,
    pub median: FloatValue,
    pub lower: FloatValue,
    pub upper: FloatValue,
    /// Number of pooled cell values
    pub sample_count: usize,
    /// Number of ensemble members contributing to the pool
    pub member_count: usize,
}

impl WindowStatistic {
    /// The baseline window is retained as the reference point but is not charted.
    pub fn is_baseline(&self) -> bool {
        self.window_index == 0
    }
}

/// Produces [`WindowStatistic`]s from pooled reduced fields.
///
/// Quantiles can only be changed through [`EnsembleStatistics::with_quantiles`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EnsembleStatistics {
    baseline_percentage: FloatValue,
    lower_quantile: FloatValue,
    upper_quantile: FloatValue,
}

impl EnsembleStatistics {
    /// Statistics with the 10th and 90th percentiles as the uncertainty band.
    pub fn new(baseline_percentage: FloatValue) -> Self {
        Self {
            baseline_percentage,
            lower_quantile: 0.1,
            upper_quantile: 0.9,
        }
    }

    /// Replace the band quantiles.
    ///
    /// # Errors
    ///
    /// [`DroughtError::InvalidConfig`] unless `0 <= lower <= 0.5 <= upper <= 1`.
    pub fn with_quantiles(mut self, lower: FloatValue, upper: FloatValue) -> DroughtResult<Self> {
        if !(0.0..=0.5).contains(&lower) || !(0.5..=1.0).contains(&upper) {
            return Err(DroughtError::invalid_config(format!(
                "quantiles must satisfy 0 <= lower <= 0.5 <= upper <= 1, got {lower} and {upper}"
            )));
        }
        self.lower_quantile = lower;
        self.upper_quantile = upper;
        Ok(self)
    }

    /// Percentage of time expected in the drought category under stationarity.
    pub fn baseline_percentage(&self) -> FloatValue {
        self.baseline_percentage
    }

    pub fn lower_quantile(&self) -> FloatValue {
        self.lower_quantile
    }

    pub fn upper_quantile(&self) -> FloatValue {
        self.upper_quantile
    }

    /// Convert a raw drought-month total to an anomaly in percentage points.
    pub fn normalise(&self, raw: FloatValue, window_length_months: FloatValue) -> FloatValue {
        raw / window_length_months * 100.0 - self.baseline_percentage
    }

    /// Summarise the pooled values of all `fields` for one window.
    ///
    /// # Errors
    ///
    /// * [`DroughtError::EmptyEnsemble`] if no field has a defined cell
    /// * [`DroughtError::InvalidConfig`] if `window_length_months` is not positive
    pub fn summarize(
        &self,
        fields: &[ReducedField],
        window_index: usize,
        window: &TimeWindow,
        window_length_months: FloatValue,
    ) -> DroughtResult<WindowStatistic> {
        if window_length_months <= 0.0 {
            return Err(DroughtError::invalid_config(format!(
                "window length must be positive, got {window_length_months} months"
            )));
        }
        let pooled = sorted_defined(fields.iter().flat_map(|field| field.defined_values()));
        let empty = || DroughtError::EmptyEnsemble {
            window_index,
            members: fields.len(),
        };

        let median = quantile_sorted(&pooled, 0.5).ok_or_else(empty)?;
        let lower = quantile_sorted(&pooled, self.lower_quantile).ok_or_else(empty)?;
        let upper = quantile_sorted(&pooled, self.upper_quantile).ok_or_else(empty)?;

        Ok(WindowStatistic {
            window_index,
            window: window.clone(),
            median: self.normalise(median, window_length_months),
            lower: self.normalise(lower, window_length_months),
            upper: self.normalise(upper, window_length_months),
            sample_count: pooled.len(),
            member_count: fields.len(),
        })
    }
}
