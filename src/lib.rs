//! dryspell
//!
//! Change in the percentage of time spent in extreme dry conditions, summarised across an
//! ensemble of bias-corrected climate models for each natural resource management region.
//!
//! The computation lives in [`dryspell_core`]; [`timeline`] prepares its output for
//! charting.

pub use dryspell_core::*;
pub use dryspell_timeline as timeline;
