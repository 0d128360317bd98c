//! Gridded drought-duration fields.
//!
//! A [`GridField`] holds one value per `(time, y, x)` cell together with the calendar
//! date of every timestep. Values count the months a cell spent in drought during the
//! timestep (for yearly timesteps this lies in `0..=12`); missing cells are `NaN`.

use crate::errors::{DroughtError, DroughtResult};
use chrono::{Datelike, Months, NaiveDate};
use ndarray::{s, Array3, ArrayView3, Axis};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Floating point type used for all cell values.
pub type FloatValue = f64;

/// A time-indexed `(time, y, x)` field of drought-month counts.
///
/// The field is read-only once constructed; the pipeline only ever derives new arrays
/// from it. Deserialisation goes through [`GridField::new`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawGridField")]
pub struct GridField {
    values: Array3<FloatValue>,
    times: Vec<NaiveDate>,
}

/// Unchecked serialised form of a [`GridField`].
#[derive(Deserialize)]
struct RawGridField {
    values: Array3<FloatValue>,
    times: Vec<NaiveDate>,
}

impl TryFrom<RawGridField> for GridField {
    type Error = DroughtError;

    fn try_from(raw: RawGridField) -> DroughtResult<Self> {
        GridField::new(raw.values, raw.times)
    }
}

impl GridField {
    /// Create a new field.
    ///
    /// # Errors
    ///
    /// * [`DroughtError::ShapeMismatch`] if `times` does not have one entry per timestep
    /// * [`DroughtError::InvalidTimeAxis`] if `times` is not strictly ascending
    pub fn new(values: Array3<FloatValue>, times: Vec<NaiveDate>) -> DroughtResult<Self> {
        if values.len_of(Axis(0)) != times.len() {
            return Err(DroughtError::ShapeMismatch {
                what: "time axis".to_string(),
                expected: vec![values.len_of(Axis(0))],
                actual: vec![times.len()],
            });
        }
        if let Some(pair) = times.windows(2).find(|pair| pair[0] >= pair[1]) {
            return Err(DroughtError::InvalidTimeAxis(format!(
                "timestamps must be strictly ascending, found {} followed by {}",
                pair[0], pair[1]
            )));
        }
        Ok(Self { values, times })
    }

    /// Create a field with one timestep per calendar year, stamped on January 1st.
    pub fn yearly(first_year: i32, values: Array3<FloatValue>) -> DroughtResult<Self> {
        let times = (0..values.len_of(Axis(0)))
            .map(|offset| {
                let year = first_year + offset as i32;
                NaiveDate::from_ymd_opt(year, 1, 1).ok_or_else(|| {
                    DroughtError::InvalidTimeAxis(format!("year {year} is not representable"))
                })
            })
            .collect::<DroughtResult<Vec<_>>>()?;
        Self::new(values, times)
    }

    pub fn values(&self) -> ArrayView3<'_, FloatValue> {
        self.values.view()
    }

    pub fn times(&self) -> &[NaiveDate] {
        &self.times
    }

    pub fn n_times(&self) -> usize {
        self.times.len()
    }

    /// Spatial `(y, x)` shape of every timestep.
    pub fn spatial_shape(&self) -> (usize, usize) {
        let (_, ny, nx) = self.values.dim();
        (ny, nx)
    }

    /// First and last timestamp, if the field has any timesteps.
    pub fn time_bounds(&self) -> Option<(NaiveDate, NaiveDate)> {
        Some((*self.times.first()?, *self.times.last()?))
    }

    /// Last date covered by the field.
    ///
    /// Timestamps mark the start of their period and the final period is taken to be as
    /// long as the one before it: whole months when both stamps share a day of the month,
    /// days otherwise. A single timestep is taken to cover the rest of its year.
    pub fn coverage_end(&self) -> Option<NaiveDate> {
        let last = *self.times.last()?;
        let end = match self.times.len() {
            1 => NaiveDate::from_ymd_opt(last.year(), 12, 31),
            n => {
                let previous = self.times[n - 2];
                let months = (last.year() - previous.year()) * 12 + last.month() as i32
                    - previous.month() as i32;
                let next = if previous.day() == last.day() && months > 0 {
                    last.checked_add_months(Months::new(months as u32))
                } else {
                    last.checked_add_signed(last - previous)
                };
                next.and_then(|next| next.pred_opt())
            }
        };
        Some(end.unwrap_or(last))
    }

    /// Index range of the timesteps falling within `[start, end]`, inclusive.
    pub fn time_range(&self, start: NaiveDate, end: NaiveDate) -> Range<usize> {
        let lo = self.times.partition_point(|t| *t < start);
        let hi = self.times.partition_point(|t| *t <= end);
        lo..hi.max(lo)
    }

    /// View of the timesteps within `range`.
    pub fn view_times(&self, range: Range<usize>) -> ArrayView3<'_, FloatValue> {
        self.values.slice(s![range, .., ..])
    }

    /// Owned copy of the timesteps within `range`.
    pub fn select_times(&self, range: Range<usize>) -> GridField {
        Self {
            values: self.view_times(range.clone()).to_owned(),
            times: self.times[range].to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn yearly_axis() {
        let field = GridField::yearly(1976, Array3::zeros((3, 2, 2))).unwrap();
        assert_eq!(
            field.times(),
            &[date(1976, 1, 1), date(1977, 1, 1), date(1978, 1, 1)]
        );
        assert_eq!(field.spatial_shape(), (2, 2));
        assert_eq!(
            field.time_bounds(),
            Some((date(1976, 1, 1), date(1978, 1, 1)))
        );
    }

    #[test]
    fn coverage_follows_time_step() {
        let yearly = GridField::yearly(1976, Array3::zeros((3, 1, 1))).unwrap();
        assert_eq!(yearly.coverage_end(), Some(date(1978, 12, 31)));

        let monthly_times = (1..=6).map(|m| date(2000, m, 1)).collect();
        let monthly = GridField::new(Array3::zeros((6, 1, 1)), monthly_times).unwrap();
        assert_eq!(monthly.coverage_end(), Some(date(2000, 6, 30)));

        let daily_times = vec![date(2000, 2, 27), date(2000, 2, 28), date(2000, 2, 29)];
        let daily = GridField::new(Array3::zeros((3, 1, 1)), daily_times).unwrap();
        assert_eq!(daily.coverage_end(), Some(date(2000, 2, 29)));

        let single = GridField::new(Array3::zeros((1, 1, 1)), vec![date(2000, 6, 1)]).unwrap();
        assert_eq!(single.coverage_end(), Some(date(2000, 12, 31)));

        let empty = GridField::new(Array3::zeros((0, 1, 1)), Vec::new()).unwrap();
        assert_eq!(empty.coverage_end(), None);
    }

    #[test]
    fn rejects_mismatched_time_axis() {
        let result = GridField::new(Array3::zeros((3, 2, 2)), vec![date(2000, 1, 1)]);
        assert!(matches!(result, Err(DroughtError::ShapeMismatch { .. })));
    }

    #[test]
    fn rejects_unordered_time_axis() {
        let result = GridField::new(
            Array3::zeros((2, 1, 1)),
            vec![date(2001, 1, 1), date(2000, 1, 1)],
        );
        assert!(matches!(result, Err(DroughtError::InvalidTimeAxis(_))));
    }

    #[test]
    fn deserialisation_checks_time_axis() {
        let mismatched = r#"{
            "values": {"v": 1, "dim": [1, 1, 1], "data": [1.0]},
            "times": ["2000-01-01", "2001-01-01", "2002-01-01"]
        }"#;
        let err = serde_json::from_str::<GridField>(mismatched).unwrap_err();
        assert!(err.to_string().contains("Shape mismatch for time axis"));

        let raw: RawGridField = serde_json::from_str(mismatched).unwrap();
        assert!(matches!(
            GridField::try_from(raw),
            Err(DroughtError::ShapeMismatch { .. })
        ));

        let unordered = r#"{
            "values": {"v": 1, "dim": [2, 1, 1], "data": [1.0, 2.0]},
            "times": ["2001-01-01", "2000-01-01"]
        }"#;
        assert!(serde_json::from_str::<GridField>(unordered).is_err());
    }

    #[test]
    fn serialised_field_round_trips() {
        let field = GridField::yearly(1990, Array3::from_elem((2, 1, 2), 3.0)).unwrap();
        let json = serde_json::to_string(&field).unwrap();
        assert_eq!(serde_json::from_str::<GridField>(&json).unwrap(), field);
    }

    #[test]
    fn time_range_is_inclusive() {
        let field = GridField::yearly(2000, Array3::zeros((10, 1, 1))).unwrap();
        assert_eq!(field.time_range(date(2002, 1, 1), date(2004, 12, 31)), 2..5);
        assert_eq!(field.time_range(date(2002, 1, 1), date(2004, 1, 1)), 2..5);
        assert_eq!(field.time_range(date(1990, 1, 1), date(1995, 1, 1)), 0..0);
        assert_eq!(field.time_range(date(2020, 1, 1), date(2030, 1, 1)), 10..10);
    }

    #[test]
    fn select_times_copies_values() {
        let values = Array3::from_shape_fn((4, 1, 2), |(t, _, x)| (t * 10 + x) as f64);
        let field = GridField::yearly(2000, values).unwrap();
        let selected = field.select_times(1..3);
        assert_eq!(selected.n_times(), 2);
        assert_eq!(selected.values()[[0, 0, 1]], 11.0);
        assert_eq!(selected.times()[1], date(2002, 1, 1));
    }
}
