//! Core of dryspell
//!
//! Summarises how much of each future climate period is spent in extreme dry conditions,
//! across an ensemble of climate-model and bias-correction combinations, for a set of
//! natural resource management regions.
//!
//! # Module Organisation
//!
//! - `grid`: Gridded per-timestep drought indicators
//! - `mask`: Regional classification of grid cells
//! - `windows`: Climate periods and temporal slicing
//! - `reducer`: Per-member reduction to drought-month totals
//! - `statistics`: Pooled ensemble quantiles and baseline anomalies
//! - `ensemble`: Ensemble members and the missing-member policy
//! - `loader`: Dataset access, with timeouts and retries
//! - `config`: Run configuration
//! - `pipeline`: Orchestration of the whole run

pub mod config;
pub mod ensemble;
pub mod grid;
pub mod loader;
pub mod mask;
pub mod pipeline;
pub mod reducer;
pub mod statistics;
pub mod windows;

pub mod errors;

pub use errors::{DroughtError, DroughtResult};
