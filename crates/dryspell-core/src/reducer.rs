//! Spatial-temporal reduction of one field to one region and one window.
//!
//! The reduction runs in four named steps and the order matters:
//!
//! ```text
//! GridField (t, y, x)
//!      │
//!      ├─► slice to window            (t', y, x)
//!      ├─► mask_stack                 cells outside the region become NaN
//!      ├─► sum_over_time              NaN-skipping sum, collapses t'  → (y, x)
//!      └─► mask_slice                 cells outside the region, or never observed in
//!               │                     the window, become NaN again
//!               ▼
//!          ReducedField (y, x)
//! ```
//!
//! The second mask is required: a NaN-skipping sum yields `0` for a cell that was `NaN` at
//! every timestep, so once the time axis collapses the first mask can no longer be seen.
//! The selector for the second mask is the region's slice selector restricted to the cells
//! of [`observed_over_time`].

use crate::errors::{DroughtError, DroughtResult};
use crate::grid::{FloatValue, GridField};
use crate::mask::{RegionId, RegionMask};
use crate::windows::{TemporalWindower, TimeWindow};
use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis, Zip};

/// Total drought-months per cell for one ensemble member, window and region.
///
/// Cells outside the region are `NaN`.
#[derive(Clone, Debug, PartialEq)]
pub struct ReducedField {
    values: Array2<FloatValue>,
}

impl ReducedField {
    pub fn new(values: Array2<FloatValue>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> ArrayView2<'_, FloatValue> {
        self.values.view()
    }

    /// All defined (non-`NaN`) cell values in row-major order.
    pub fn defined_values(&self) -> impl Iterator<Item = FloatValue> + '_ {
        self.values.iter().copied().filter(|v| !v.is_nan())
    }

    pub fn defined_count(&self) -> usize {
        self.defined_values().count()
    }

    /// Re-apply a slice selector, returning a new field.
    pub fn remask(&self, selector: &Array2<bool>) -> DroughtResult<ReducedField> {
        Ok(ReducedField::new(mask_slice(self.values.view(), selector)?))
    }
}

/// Step 2: set every cell outside the stack selector to `NaN`.
pub fn mask_stack(
    values: ArrayView3<'_, FloatValue>,
    selector: &Array3<bool>,
) -> DroughtResult<Array3<FloatValue>> {
    check_shape("stack selector", values.shape(), selector.shape())?;
    let mut masked = Array3::from_elem(values.dim(), FloatValue::NAN);
    Zip::from(&mut masked)
        .and(&values)
        .and(selector)
        .for_each(|out, &v, &selected| {
            if selected {
                *out = v;
            }
        });
    Ok(masked)
}

/// Step 3: sum over the time axis, skipping `NaN`.
///
/// A cell that is `NaN` at every timestep sums to `0`.
pub fn sum_over_time(values: ArrayView3<'_, FloatValue>) -> Array2<FloatValue> {
    values.fold_axis(Axis(0), 0.0, |acc, &v| if v.is_nan() { *acc } else { acc + v })
}

/// Cells holding at least one defined value along the time axis.
pub fn observed_over_time(values: ArrayView3<'_, FloatValue>) -> Array2<bool> {
    values.map_axis(Axis(0), |lane| lane.iter().any(|v| !v.is_nan()))
}

/// Step 4: set every cell outside the slice selector to `NaN`.
pub fn mask_slice(
    values: ArrayView2<'_, FloatValue>,
    selector: &Array2<bool>,
) -> DroughtResult<Array2<FloatValue>> {
    check_shape("slice selector", values.shape(), selector.shape())?;
    Ok(Zip::from(&values)
        .and(selector)
        .map_collect(|&v, &selected| if selected { v } else { FloatValue::NAN }))
}

fn check_shape(what: &str, expected: &[usize], actual: &[usize]) -> DroughtResult<()> {
    if expected != actual {
        return Err(DroughtError::ShapeMismatch {
            what: what.to_string(),
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        });
    }
    Ok(())
}

/// Reduces fields to per-cell drought-month totals within a region and window.
#[derive(Clone, Debug)]
pub struct SpatialTemporalReducer {
    windower: TemporalWindower,
}

impl SpatialTemporalReducer {
    pub fn new(windower: TemporalWindower) -> Self {
        Self { windower }
    }

    pub fn windower(&self) -> &TemporalWindower {
        &self.windower
    }

    /// Reduce `field` to `region` within `window`.
    ///
    /// # Errors
    ///
    /// * [`DroughtError::ShapeMismatch`] if the field and mask grids differ
    /// * [`DroughtError::WindowOutOfRange`] if the window selects no timestep
    /// * [`DroughtError::UnknownRegion`] if the mask does not know `region`
    ///
    /// In-region cells that are `NaN` at every timestep of the window stay undefined.
    pub fn reduce(
        &self,
        field: &GridField,
        mask: &RegionMask,
        region: RegionId,
        window: &TimeWindow,
    ) -> DroughtResult<ReducedField> {
        let (ny, nx) = field.spatial_shape();
        let (my, mx) = mask.shape();
        if (ny, nx) != (my, mx) {
            return Err(DroughtError::ShapeMismatch {
                what: "field grid against region mask".to_string(),
                expected: vec![my, mx],
                actual: vec![ny, nx],
            });
        }

        let range = self.windower.time_range(field, window)?;
        let windowed = field.view_times(range);

        let stack_selector = mask.selector_for_stack(region, windowed.len_of(Axis(0)))?;
        let masked = mask_stack(windowed, &stack_selector)?;
        let summed = sum_over_time(masked.view());

        let observed = observed_over_time(masked.view());
        let slice_selector = Zip::from(&mask.selector_for_slice(region)?)
            .and(&observed)
            .map_collect(|&inside, &seen| inside && seen);
        Ok(ReducedField::new(mask_slice(summed.view(), &slice_selector)?))
    }
}
