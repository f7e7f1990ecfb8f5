//! The core module
pub mod estimators;

use crate::core::estimators::Estimators;
use crate::grid::AdaptiveGrid;
use num_traits::{Float, FromPrimitive};
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Integrand trait
pub trait Integrand<T: Copy>: Send + Sync {
    /// Calculates the value of the integrand at the mapped point `x`,
    /// which has one coordinate per integration dimension.
    ///
    /// The engine tolerates isolated non-finite return values by
    /// discarding the sample, but aborts the run when the discard rate
    /// exceeds the configured limit.
    fn call(&self, x: &[T]) -> T;

    /// Returns the number of dimensions of the integration domain.
    fn dim(&self) -> usize;
}

/// A density correction $W(x; \mu, A)$ multiplying the fractional volume
/// element of a [`FractalMeasure`](crate::measure::FractalMeasure).
///
/// Any `Fn(&[T], T, T) -> T` closure implements this trait; the
/// arguments are the mapped point, the topological dimension $\mu$ and
/// the lacunarity $A$.
pub trait DensityFilter<T: Copy> {
    /// Evaluates the filter at the mapped point `x`.
    fn weight(&self, x: &[T], mu: T, lacunarity: T) -> T;
}

impl<T, F> DensityFilter<T> for F
where
    T: Copy,
    F: Fn(&[T], T, T) -> T,
{
    fn weight(&self, x: &[T], mu: T, lacunarity: T) -> T {
        self(x, mu, lacunarity)
    }
}

/// A soft cancellation flag shared with an integration run.
///
/// Cancellation is honoured between iterations only; samples of an
/// in-flight iteration always run to completion. A cancelled run
/// returns its best available combined estimate with the `converged`
/// flag unset.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests termination of the run holding this token.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Returns whether termination has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// A checkpoint saves the state of one iteration: the random number
/// generator before and after, the iteration estimators and the grid as
/// adapted at the end of the iteration.
///
/// Checkpoints can be serialized and used to resume an integration
/// without a difference in the final results.
#[derive(Debug, Deserialize, Serialize)]
pub struct Checkpoint<T, R, E> {
    rng_before: R,
    rng_after: R,
    estimators: E,
    grid: AdaptiveGrid<T>,
}

impl<T, R, E> Checkpoint<T, R, E>
where
    T: AddAssign + Float + FromPrimitive,
    E: Estimators<T>,
{
    /// Constructor
    pub(crate) fn new(rng_before: R, rng_after: R, estimators: E, grid: AdaptiveGrid<T>) -> Self {
        Self {
            rng_before,
            rng_after,
            estimators,
            grid,
        }
    }

    /// Returns the random number generator before generation of this checkpoint.
    pub fn rng_before(&self) -> &R {
        &self.rng_before
    }

    /// Returns the random number generator after generation of this checkpoint
    pub fn rng_after(&self) -> &R {
        &self.rng_after
    }

    /// Returns the estimators of this checkpoint.
    pub fn estimators(&self) -> &E {
        &self.estimators
    }

    /// Returns the grid in the state the adaptation step left it.
    pub fn grid(&self) -> &AdaptiveGrid<T> {
        &self.grid
    }

    /// Destructure the checkpoint and return its components.
    pub fn destructure(self) -> (R, R, E, AdaptiveGrid<T>) {
        (self.rng_before, self.rng_after, self.estimators, self.grid)
    }
}

/// Compute the number of calls on a given worker, given the total number
/// of workers `workers`, the index `worker` (zero-based) of the current
/// thread as well as the total number of calls `total_calls` to perform
/// combined on all workers.
pub(crate) fn calls_for_worker(worker: usize, workers: usize, total_calls: usize) -> usize {
    // make sure passed data is valid
    debug_assert!(worker < workers);
    // naive estimate of the number of calls
    let calls_per_worker = (total_calls as f32 / workers as f32).ceil() as usize;

    // if we are on the last worker, not all of the `calls_per_worker` might be needed to reach
    // `total_calls`
    if workers == worker + 1 {
        total_calls - worker * calls_per_worker
    } else {
        calls_per_worker
    }
}
