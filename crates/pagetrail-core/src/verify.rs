//! Measurements shared by the audit and cross-validation stages.

/// Default allowed relative difference between a fresh sample and the
/// persisted blocks of the same page.
pub const DEFAULT_VARIANCE_TOLERANCE: f64 = 0.10;

/// Content size used for cross-checks: alphanumeric characters only, so
/// CSV separators, quoting and whitespace normalization do not register
/// as drift.
pub fn content_measure(text: &str) -> usize {
    text.chars().filter(|c| c.is_alphanumeric()).count()
}

/// Relative difference of `persisted` against the `fresh` measurement.
pub fn relative_variance(fresh: usize, persisted: usize) -> f64 {
    let diff = fresh.abs_diff(persisted) as f64;
    diff / fresh.max(1) as f64
}

/// True when the variance is outside `±tolerance`.
pub fn exceeds_tolerance(variance: f64, tolerance: f64) -> bool {
    variance > tolerance + f64::EPSILON
}
