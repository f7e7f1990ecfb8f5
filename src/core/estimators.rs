//! This module contains everything related to estimators.
use num_traits::{Float, FromPrimitive};
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};

/// Basic estimators, like the mean, variance, and the standard deviation.
pub trait BasicEstimators<T: Float> {
    /// Returns the mean value.
    fn mean(&self) -> T;

    /// Returns the variance, $V$.
    fn var(&self) -> T;

    /// Returns the standard deviation, $\sigma = \sqrt{V}$.
    fn std(&self) -> T {
        self.var().sqrt()
    }
}

/// More estimators.
pub trait Estimators<T: Float>: BasicEstimators<T> {
    /// Returns the number of times $N$, the integrand has been called.
    fn calls(&self) -> usize;

    /// Returns the number of times, $N_\mathrm{nf}$, the integrand has been called
    /// and its return value was non-finite and therefore discarded.
    fn non_finite_calls(&self) -> usize;

    /// Returns the number of times, $N_\mathrm{nz}$, the integrand has been called
    /// and its return value was non-zero.
    fn non_zero_calls(&self) -> usize;
}

/// A struct implementing the `BasicEstimator<T>` trait.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct MeanVar<T> {
    mean: T,
    var: T,
}

impl<T: std::ops::Add<Output = T>> Add for MeanVar<T> {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            mean: self.mean + other.mean,
            var: self.var + other.var,
        }
    }
}

impl<T: std::ops::Add<Output = T> + AddAssign> AddAssign for MeanVar<T> {
    fn add_assign(&mut self, other: Self) {
        self.mean += other.mean;
        self.var += other.var;
    }
}

impl<T> MeanVar<T> {
    /// Constructor.
    pub const fn new(mean: T, var: T) -> Self {
        Self { mean, var }
    }
}

impl<T: Float> BasicEstimators<T> for MeanVar<T> {
    fn mean(&self) -> T {
        self.mean
    }

    fn var(&self) -> T {
        self.var
    }
}

/// The terminal statistics of an integration run.
///
/// Iteration estimates are combined with inverse-variance weights,
///
/// $$ \bar{m} = \frac{\sum_i m_i / V_i}{\sum_i 1 / V_i}, \qquad
///    V(\bar{m}) = \frac{1}{\sum_i 1 / V_i}, $$
///
/// and the consistency of the sequence is summarised by
/// $\chi^2 / \mathrm{dof} = \sum_i (m_i - \bar{m})^2 / V_i / (n - 1)$.
/// A value far above one signals that the iterations disagree beyond
/// their claimed uncertainties and the combined error is unreliable.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct FinalEstimate<T> {
    mean: T,
    std_error: T,
    chi_sq_per_dof: T,
    converged: bool,
    history: Vec<MeanVar<T>>,
}

impl<T> FinalEstimate<T>
where
    T: Float + FromPrimitive,
{
    /// Combines a sequence of per-iteration estimates.
    ///
    /// Iterations with zero variance are exact; when any are present
    /// they dominate the weighted mean and the combined error collapses
    /// to zero.
    pub fn combine(history: &[MeanVar<T>], converged: bool) -> Self {
        debug_assert!(!history.is_empty());

        let exact: Vec<&MeanVar<T>> = history
            .iter()
            .filter(|mv| mv.var() <= T::zero())
            .collect();

        if !exact.is_empty() {
            let n = T::from_usize(exact.len()).unwrap();
            let mean = exact.iter().fold(T::zero(), |acc, mv| acc + mv.mean()) / n;

            return Self {
                mean,
                std_error: T::zero(),
                chi_sq_per_dof: T::zero(),
                converged,
                history: history.to_vec(),
            };
        }

        let mut weight_sum = T::zero();
        let mut weighted_mean_sum = T::zero();

        for mv in history {
            let weight = T::one() / mv.var();
            weight_sum = weight_sum + weight;
            weighted_mean_sum = weighted_mean_sum + weight * mv.mean();
        }

        let mean = weighted_mean_sum / weight_sum;
        let std_error = (T::one() / weight_sum).sqrt();

        let chi_sq_per_dof = if history.len() > 1 {
            let chi_sq = history.iter().fold(T::zero(), |acc, mv| {
                let residual = mv.mean() - mean;
                acc + residual * residual / mv.var()
            });
            chi_sq / T::from_usize(history.len() - 1).unwrap()
        } else {
            T::zero()
        };

        Self {
            mean,
            std_error,
            chi_sq_per_dof,
            converged,
            history: history.to_vec(),
        }
    }

    /// Returns the combined mean.
    pub fn mean(&self) -> T {
        self.mean
    }

    /// Returns the combined standard error.
    pub fn std_error(&self) -> T {
        self.std_error
    }

    /// Returns $\chi^2$ per degree of freedom of the iteration sequence.
    pub fn chi_sq_per_dof(&self) -> T {
        self.chi_sq_per_dof
    }

    /// Returns whether the convergence criteria were met before the
    /// iteration budget ran out. Callers must check this flag rather
    /// than assume convergence.
    pub fn converged(&self) -> bool {
        self.converged
    }

    /// Returns the per-iteration estimates, in iteration order.
    pub fn history(&self) -> &[MeanVar<T>] {
        &self.history
    }

    /// Returns the standard error relative to the mean, or zero for an
    /// exact estimate.
    pub fn relative_std_error(&self) -> T {
        if self.std_error == T::zero() {
            T::zero()
        } else if self.mean == T::zero() {
            T::infinity()
        } else {
            (self.std_error / self.mean).abs()
        }
    }
}
