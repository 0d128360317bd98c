//! Fixed calendar windows over the time axis.
//!
//! Windows are defined once, in ascending order of their start date. The first window is
//! the historical baseline; every later window is a projection period. Successive
//! projection windows may share years, which smooths the resulting timeline.

use crate::errors::{DroughtError, DroughtResult};
use crate::grid::GridField;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use tracing::warn;

/// An inclusive calendar period with the year used to label it on a timeline.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub center_year: i32,
}

impl TimeWindow {
    pub fn new(start: NaiveDate, end: NaiveDate, center_year: i32) -> Self {
        Self {
            start,
            end,
            center_year,
        }
    }

    /// Window covering whole calendar years `first_year..=last_year`.
    pub fn years(first_year: i32, last_year: i32, center_year: i32) -> DroughtResult<Self> {
        let start = NaiveDate::from_ymd_opt(first_year, 1, 1);
        let end = NaiveDate::from_ymd_opt(last_year, 12, 31);
        match (start, end) {
            (Some(start), Some(end)) => Ok(Self::new(start, end, center_year)),
            _ => Err(DroughtError::invalid_config(format!(
                "years {first_year}..={last_year} are not representable"
            ))),
        }
    }

    /// Number of calendar months touched by the window, counting both end months.
    ///
    /// A 30-year window from January 1st to December 31st covers 360 months.
    pub fn length_months(&self) -> u32 {
        let months = (self.end.year() - self.start.year()) * 12 + self.end.month() as i32
            - self.start.month() as i32
            + 1;
        months.max(0) as u32
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// Ordered set of windows applied to every field.
#[derive(Clone, Debug, PartialEq)]
pub struct TemporalWindower {
    windows: Vec<TimeWindow>,
}

impl TemporalWindower {
    /// Create a windower.
    ///
    /// # Errors
    ///
    /// [`DroughtError::InvalidConfig`] if no window is given, a window ends before it
    /// starts, or the start dates are not ascending.
    pub fn new(windows: Vec<TimeWindow>) -> DroughtResult<Self> {
        if windows.is_empty() {
            return Err(DroughtError::invalid_config(
                "at least one (baseline) window is required",
            ));
        }
        for window in &windows {
            if window.start > window.end {
                return Err(DroughtError::invalid_config(format!(
                    "window {}..={} ends before it starts",
                    window.start, window.end
                )));
            }
        }
        if let Some(pair) = windows.windows(2).find(|pair| pair[0].start >= pair[1].start) {
            return Err(DroughtError::invalid_config(format!(
                "windows must be in ascending order, {} does not follow {}",
                pair[1].start, pair[0].start
            )));
        }
        Ok(Self { windows })
    }

    pub fn windows(&self) -> &[TimeWindow] {
        &self.windows
    }

    /// The historical reference window (index 0).
    pub fn baseline(&self) -> &TimeWindow {
        &self.windows[0]
    }

    /// Every window after the baseline.
    pub fn projections(&self) -> &[TimeWindow] {
        &self.windows[1..]
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Indices of the timesteps of `field` that fall within `window`.
    ///
    /// # Errors
    ///
    /// [`DroughtError::WindowOutOfRange`] if the window selects no timestep.
    pub fn time_range(&self, field: &GridField, window: &TimeWindow) -> DroughtResult<Range<usize>> {
        let range = field.time_range(window.start, window.end);
        let Some((first, last)) = field.time_bounds() else {
            return Err(out_of_range(window, "empty", "empty"));
        };
        if range.is_empty() {
            return Err(out_of_range(window, &first.to_string(), &last.to_string()));
        }
        if !self.is_fully_covered(field, window) {
            warn!(
                window_start = %window.start,
                window_end = %window.end,
                field_start = %first,
                field_end = %last,
                "Window only partially covered by field; totals will be short"
            );
        }
        Ok(range)
    }

    /// Whether the timesteps of `field` span the whole of `window`.
    ///
    /// The end of the field is [`GridField::coverage_end`], which follows the spacing of the
    /// time axis.
    pub fn is_fully_covered(&self, field: &GridField, window: &TimeWindow) -> bool {
        match (field.time_bounds(), field.coverage_end()) {
            (Some((first, _)), Some(end)) => first <= window.start && window.end <= end,
            _ => false,
        }
    }

    /// Restrict `field` to the timesteps within `window`.
    pub fn slice(&self, field: &GridField, window: &TimeWindow) -> DroughtResult<GridField> {
        let range = self.time_range(field, window)?;
        Ok(field.select_times(range))
    }
}

fn out_of_range(window: &TimeWindow, field_start: &str, field_end: &str) -> DroughtError {
    DroughtError::WindowOutOfRange {
        start: window.start.to_string(),
        end: window.end.to_string(),
        field_start: field_start.to_string(),
        field_end: field_end.to_string(),
    }
}
