//! Comparison of a terminal estimate against a reference constant.

use crate::core::estimators::FinalEstimate;
use num_traits::{Float, FromPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The outcome of comparing a scaled estimate against a reference value.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Report<T> {
    /// The physical value: the combined mean times the scale factor.
    pub value: T,
    /// The scaled combined standard error.
    pub uncertainty: T,
    /// The reference constant compared against.
    pub reference: T,
    /// `(value - reference) / reference`.
    pub relative_deviation: T,
    /// Whether the magnitude of the relative deviation is within the
    /// requested tolerance.
    pub within_tolerance: bool,
}

/// Turns terminal statistics into a physical quantity and compares it
/// against `reference`.
///
/// `scale` converts the dimensionless integral into the physical unit
/// system of the reference constant; `tolerance` bounds the acceptable
/// magnitude of the relative deviation. Pure function, no side effects.
pub fn compare<T>(estimate: &FinalEstimate<T>, scale: T, reference: T, tolerance: T) -> Report<T>
where
    T: Float + FromPrimitive,
{
    let value = estimate.mean() * scale;
    let uncertainty = estimate.std_error() * scale;
    let relative_deviation = (value - reference) / reference;

    Report {
        value,
        uncertainty,
        reference,
        relative_deviation,
        within_tolerance: relative_deviation.abs() <= tolerance,
    }
}

impl<T> fmt::Display for Report<T>
where
    T: Float + FromPrimitive + fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let percent = self.relative_deviation * T::from_f64(100.0).unwrap();
        write!(
            f,
            "{} \u{b1} {} (reference {}, deviation {}%, {})",
            self.value,
            self.uncertainty,
            self.reference,
            percent,
            if self.within_tolerance {
                "within tolerance"
            } else {
                "OUT OF TOLERANCE"
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::estimators::MeanVar;
    use assert_approx_eq::assert_approx_eq;

    const TOLERANCE: f64 = 1e-12;

    #[test]
    fn compare_scales_and_flags() {
        let estimate = FinalEstimate::combine(&[MeanVar::new(2.0, 0.01)], false);
        let report = compare(&estimate, 3.0, 6.3, 0.1);

        assert_approx_eq!(report.value, 6.0, TOLERANCE);
        assert_approx_eq!(report.uncertainty, 0.3, TOLERANCE);
        assert_approx_eq!(report.relative_deviation, (6.0 - 6.3) / 6.3, TOLERANCE);
        assert!(report.within_tolerance);
    }

    #[test]
    fn compare_flags_large_deviations() {
        let estimate = FinalEstimate::combine(&[MeanVar::new(2.0, 0.01)], true);
        let report = compare(&estimate, 1.0, 1.0, 0.05);

        assert!(!report.within_tolerance);
        assert_approx_eq!(report.relative_deviation, 1.0, TOLERANCE);
    }
}
