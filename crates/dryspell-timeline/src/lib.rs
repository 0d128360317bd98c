//! Timelines of drought statistics
//!
//! Turns the statistic stream of an [`AggregationPipeline`](dryspell_core::pipeline::AggregationPipeline)
//! into plot-ready series without rendering anything. For every region the charts are:
//! - a main chart with the median of every (category, variable) series
//! - one side panel per duration category, with the median line and the band between the
//!   lower and upper quantiles
//!
//! The baseline window is the zero line of every chart and is left out of the points.

pub mod collector;
pub mod series;

pub use collector::{Panel, Timeline, TimelineCollector, TimelineFailure, Y_AXIS_LABEL};
pub use series::{moving_average, TimelinePoint, TimelineSeries};
