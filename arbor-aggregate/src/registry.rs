use crate::androidtrace::AndroidTraceAggregator;
use crate::backtrace::BacktraceProfileAggregator;
use crate::error::AggregateError;
use crate::types::Aggregate;
use crate::ProfileRecord;

/// Aggregates profiles one at a time; the final result is retrieved by
/// calling [`result`](Self::result) once all profiles were applied.
pub trait Aggregator {
    /// Caps how many ranked functions the result reports.
    fn set_top_n_functions(&mut self, n: usize);

    /// Applies one profile to the aggregation.
    fn update_from_profile(&mut self, record: &ProfileRecord) -> Result<(), AggregateError>;

    /// Computes the aggregated result.
    fn result(&mut self) -> Result<Aggregate, AggregateError>;
}

/// Returns the aggregator implementation for a platform.
pub fn aggregator_from_platform(platform: &str) -> Result<Box<dyn Aggregator>, AggregateError> {
    match platform {
        "cocoa" => Ok(Box::new(BacktraceProfileAggregator::new())),
        "android" => Ok(Box::new(AndroidTraceAggregator::new())),
        _ => Err(AggregateError::PlatformNotSupported(platform.to_owned())),
    }
}
