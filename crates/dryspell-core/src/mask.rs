//! Region masks over the spatial grid.
//!
//! A [`RegionMask`] wraps a categorical grid in which every cell holds the code of the
//! region it belongs to (or nothing, e.g. for ocean cells). Selectors are boolean arrays
//! derived from that single source of truth:
//!
//! - [`RegionMask::selector_for_slice`] has the `(y, x)` shape of one timestep
//! - [`RegionMask::selector_for_stack`] is the same selection broadcast to `(time, y, x)`
//!
//! # Examples
//!
//! ```rust
//! use dryspell_core::mask::{RegionId, RegionMask};
//! use ndarray::array;
//!
//! let mask = RegionMask::from_codes(array![[Some(1), Some(1)], [Some(2), None]]);
//! let selector = mask.selector_for_slice(RegionId::Code(1)).unwrap();
//! assert_eq!(selector, array![[true, true], [false, false]]);
//!
//! assert!(mask.selector_for_slice(RegionId::Code(99)).is_err());
//! ```

use crate::errors::{DroughtError, DroughtResult};
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Identifier of the region to select.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionId {
    /// Cells carrying exactly this region code
    Code(i32),
    /// Every cell carrying any region code
    All,
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionId::Code(code) => write!(f, "{code}"),
            RegionId::All => write!(f, "all"),
        }
    }
}

/// Categorical region mask, immutable once loaded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegionMask {
    codes: Array2<Option<i32>>,
    names: BTreeMap<i32, String>,
}

impl RegionMask {
    /// Create a mask from region codes and a code to display-name mapping.
    ///
    /// Names may list codes that cover no cell of the grid; such regions are valid but
    /// select nothing.
    pub fn new(codes: Array2<Option<i32>>, names: BTreeMap<i32, String>) -> Self {
        Self { codes, names }
    }

    /// Create a mask without display names.
    pub fn from_codes(codes: Array2<Option<i32>>) -> Self {
        Self::new(codes, BTreeMap::new())
    }

    /// Create a mask from a floating point code grid, as stored in NetCDF region files.
    ///
    /// `NaN` cells belong to no region. Other values are truncated to integer codes.
    pub fn from_float_codes(codes: &Array2<f64>, names: BTreeMap<i32, String>) -> Self {
        let codes = codes.mapv(|v| if v.is_nan() { None } else { Some(v as i32) });
        Self::new(codes, names)
    }

    /// Spatial `(y, x)` shape of the mask grid.
    pub fn shape(&self) -> (usize, usize) {
        self.codes.dim()
    }

    /// Every region code known to this mask, from the grid or the name mapping.
    pub fn code_set(&self) -> BTreeSet<i32> {
        self.codes
            .iter()
            .flatten()
            .copied()
            .chain(self.names.keys().copied())
            .collect()
    }

    pub fn display_name(&self, code: i32) -> Option<&str> {
        self.names.get(&code).map(String::as_str)
    }

    /// Check that a region identifier refers to this mask.
    ///
    /// A code which appears neither in the grid nor in the name mapping is a configuration
    /// error. A named code covering no cells is accepted.
    pub fn resolve(&self, region: RegionId) -> DroughtResult<()> {
        match region {
            RegionId::All => Ok(()),
            RegionId::Code(code) => {
                let known = self.code_set();
                if known.contains(&code) {
                    Ok(())
                } else {
                    Err(DroughtError::UnknownRegion {
                        region: region.to_string(),
                        known: known.into_iter().collect(),
                    })
                }
            }
        }
    }

    /// Boolean selector for a single `(y, x)` timestep.
    pub fn selector_for_slice(&self, region: RegionId) -> DroughtResult<Array2<bool>> {
        self.resolve(region)?;
        Ok(self.codes.mapv(|cell| match (region, cell) {
            (_, None) => false,
            (RegionId::All, Some(_)) => true,
            (RegionId::Code(code), Some(value)) => value == code,
        }))
    }

    /// Boolean selector for a `(time, y, x)` stack of `n_times` timesteps.
    ///
    /// Every timestep selects exactly the cells of [`selector_for_slice`](Self::selector_for_slice).
    pub fn selector_for_stack(&self, region: RegionId, n_times: usize) -> DroughtResult<Array3<bool>> {
        let slice = self.selector_for_slice(region)?;
        let (ny, nx) = slice.dim();
        Ok(Array3::from_shape_fn((n_times, ny, nx), |(_, y, x)| {
            slice[[y, x]]
        }))
    }

    /// Number of cells selected by `region`.
    pub fn cell_count(&self, region: RegionId) -> DroughtResult<usize> {
        Ok(self
            .selector_for_slice(region)?
            .iter()
            .filter(|selected| **selected)
            .count())
    }
}
