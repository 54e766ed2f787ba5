/// Event detection over a single sample series.
///
/// Both the batch grid run and the on-demand point query go through
/// `series_timing`, so a grid cell and a query snapped to that cell always
/// agree.
///
/// Submodules:
/// - `condition`: threshold predicate → breach mask.
/// - `timing`: breach mask + offsets → first/next episode timing.

pub mod condition;
pub mod timing;

use crate::model::{Condition, EngineError, EventTiming, SampleSeries};

/// Evaluates `condition` over `series` and computes its event timing.
pub fn series_timing(
    series: &SampleSeries,
    condition: &Condition,
) -> Result<EventTiming, EngineError> {
    let mask = condition::evaluate(&series.values, condition);
    timing::compute(&mask, &series.offsets)
}
