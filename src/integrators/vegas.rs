//! Adaptive importance-sampling integrator over a fractal measure.
//!
//! Each iteration draws its samples through the stratification grid,
//! weighs them with the fractional volume element and the optional
//! density filter, and feeds the observed importance signal back into
//! the grid, which is refined between iterations. Iteration estimates
//! are combined into a [`FinalEstimate`] with inverse-variance weights.
use crate::callbacks::Callback;
use crate::core::estimators::*;
use crate::core::*;
use crate::error::{DivergenceKind, IntegrationError};
use crate::grid::{validate_grid, AdaptiveGrid, GridAccumulator};
use crate::measure::FractalMeasure;

use num_traits::{Float, FromPrimitive};
use rand::distributions::{Distribution, Standard};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};

use crossbeam as cb;

/// Tuning knobs of one integration run.
///
/// `new` fills in defaults that work for well-behaved integrands; every
/// field is public, so callers override what they need. All smoothing
/// and damping constants live here rather than inside the algorithm.
#[derive(Clone, Debug)]
pub struct VegasConfig<T> {
    /// Maximum number of iterations to run.
    pub iterations: usize,
    /// Number of integrand evaluations per iteration.
    pub calls_per_iteration: usize,
    /// Number of stratification bins per dimension (at least one).
    pub bins: usize,
    /// Damping exponent in `(0, 1]` applied to the importance signal
    /// before rebinning; smaller values adapt more cautiously.
    pub damping: T,
    /// Relative standard error of the combined estimate below which the
    /// run may converge.
    pub convergence_tolerance: T,
    /// Upper bound on chi-squared per degree of freedom over the
    /// convergence window.
    pub chi_sq_threshold: T,
    /// Number of trailing iterations examined by the convergence check.
    pub convergence_window: usize,
    /// Number of consecutive variance increases treated as divergence.
    pub variance_growth_window: usize,
    /// Fraction of discarded (non-finite) calls per iteration above
    /// which the run is aborted as diverging.
    pub max_discard_ratio: T,
    /// Lower bound on bin widths, as a fraction of the uniform width.
    pub min_width_fraction: T,
    /// Optional soft-cancellation flag, checked between iterations.
    pub cancel: Option<CancelToken>,
}

impl<T> VegasConfig<T>
where
    T: Float + FromPrimitive,
{
    /// Creates a configuration running `iterations` iterations of
    /// `calls_per_iteration` calls each, with default tuning.
    pub fn new(iterations: usize, calls_per_iteration: usize) -> Self {
        Self {
            iterations,
            calls_per_iteration,
            bins: 50,
            damping: T::from_f64(0.5).unwrap(),
            convergence_tolerance: T::from_f64(0.01).unwrap(),
            chi_sq_threshold: T::from_f64(2.0).unwrap(),
            convergence_window: 5,
            variance_growth_window: 4,
            max_discard_ratio: T::from_f64(0.01).unwrap(),
            min_width_fraction: T::from_f64(1e-4).unwrap(),
            cancel: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
/// Estimators for the adaptive integrator.
pub struct VegasEstimators<T> {
    sum: T,
    sumsq: T,
    calls: usize,
    non_finite_calls: usize,
    non_zero_calls: usize,
}

impl<T: Float> Default for VegasEstimators<T> {
    fn default() -> Self {
        Self {
            sum: T::zero(),
            sumsq: T::zero(),
            calls: 0,
            non_finite_calls: 0,
            non_zero_calls: 0,
        }
    }
}

impl<T: Float> Add for VegasEstimators<T> {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            sum: self.sum + other.sum,
            sumsq: self.sumsq + other.sumsq,
            calls: self.calls + other.calls,
            non_finite_calls: self.non_finite_calls + other.non_finite_calls,
            non_zero_calls: self.non_zero_calls + other.non_zero_calls,
        }
    }
}

impl<T> VegasEstimators<T>
where
    T: Float + AddAssign,
{
    /// Feeds one weighted sample value into the running sums. Non-finite
    /// values are counted but excluded from the sums, so an isolated bad
    /// evaluation cannot destroy the iteration.
    fn update(&mut self, value: T) {
        self.calls += 1;

        if value != T::zero() {
            self.non_zero_calls += 1;

            if value.is_finite() {
                self.sum += value;
                self.sumsq += value * value;
            } else {
                self.non_finite_calls += 1;
            }
        }
    }
}

impl<T> BasicEstimators<T> for VegasEstimators<T>
where
    T: Float + FromPrimitive,
{
    fn mean(&self) -> T {
        self.sum / T::from_usize(self.calls).unwrap()
    }

    fn var(&self) -> T {
        let calls = T::from_usize(self.calls).unwrap();
        (self.sumsq - self.sum * self.sum / calls) / calls / (calls - T::one())
    }
}

impl<T> Estimators<T> for VegasEstimators<T>
where
    T: Float + FromPrimitive,
{
    fn calls(&self) -> usize {
        self.calls
    }

    fn non_finite_calls(&self) -> usize {
        self.non_finite_calls
    }

    fn non_zero_calls(&self) -> usize {
        self.non_zero_calls
    }
}

/// Checkpoint type produced by this integrator.
pub type VegasCheckpoint<T, R> = Checkpoint<T, R, VegasEstimators<T>>;

/// A finished (or soft-cancelled) integration run.
#[derive(Debug)]
pub struct VegasResult<T, R> {
    checkpoints: Vec<VegasCheckpoint<T, R>>,
    estimate: FinalEstimate<T>,
}

impl<T, R> VegasResult<T, R> {
    /// Returns the combined terminal statistics.
    pub fn estimate(&self) -> &FinalEstimate<T> {
        &self.estimate
    }

    /// Returns the per-iteration checkpoints.
    pub fn checkpoints(&self) -> &[VegasCheckpoint<T, R>] {
        &self.checkpoints
    }

    /// Consumes the result, returning the checkpoints for a later
    /// [`resume`].
    pub fn into_checkpoints(self) -> Vec<VegasCheckpoint<T, R>> {
        self.checkpoints
    }

    /// Destructures the result into its components.
    pub fn destructure(self) -> (Vec<VegasCheckpoint<T, R>>, FinalEstimate<T>) {
        (self.checkpoints, self.estimate)
    }
}

/// Integrate `integrand` against `measure` using `workers` worker
/// threads.
///
/// The random number generator in its initial state is provided in
/// `rng`; the run only depends on the generator state and the worker
/// count, never on thread scheduling. The `callback` is invoked after
/// every finished iteration with the checkpoint sequence so far.
///
/// The run stops early once the chi-squared of the trailing iterations
/// and the relative error of the combined estimate both fall below
/// their configured thresholds; exhausting the iteration budget instead
/// is *not* an error and is reported through
/// [`FinalEstimate::converged`].
///
/// # Errors
///
/// [`IntegrationError::InvalidParameter`] if the configuration is
/// rejected by eager validation (no samples are drawn), and
/// [`IntegrationError::Diverged`] if an iteration estimate turns
/// non-finite, the discard rate exceeds its limit, or the variance
/// grows monotonically over the configured window.
pub fn integrate<T, R, I>(
    integrand: &I,
    measure: &FractalMeasure<T>,
    config: &VegasConfig<T>,
    rng: &R,
    callback: &impl Callback<T, R, VegasEstimators<T>>,
    workers: usize,
) -> Result<VegasResult<T, R>, IntegrationError<T>>
where
    I: Integrand<T>,
    T: Float + AddAssign + FromPrimitive + Send + Sync + std::fmt::Debug,
    R: Clone + Rng + Send + Sync + Serialize,
    Standard: Distribution<T>,
{
    validate(integrand, measure, config, workers)?;

    let grid = AdaptiveGrid::uniform(measure.domain(), config.bins);

    run(
        integrand,
        measure,
        config,
        callback,
        workers,
        grid,
        rng.clone(),
        Vec::new(),
    )
}

/// Resume an integration from a previously recorded checkpoint
/// sequence, running `config.iterations` further iterations.
///
/// The grid and the random number generator continue from the state of
/// the last checkpoint, so a resumed run reproduces the uninterrupted
/// one exactly. The convergence bookkeeping includes the resumed
/// iterations. `config.bins` is ignored in favour of the resumed grid.
///
/// # Errors
///
/// Like [`integrate`]; additionally, an empty checkpoint sequence or a
/// checkpoint grid inconsistent with the measure's domain is an
/// [`IntegrationError::InvalidParameter`].
pub fn resume<T, R, I>(
    integrand: &I,
    measure: &FractalMeasure<T>,
    config: &VegasConfig<T>,
    checkpoints: Vec<VegasCheckpoint<T, R>>,
    callback: &impl Callback<T, R, VegasEstimators<T>>,
    workers: usize,
) -> Result<VegasResult<T, R>, IntegrationError<T>>
where
    I: Integrand<T>,
    T: Float + AddAssign + FromPrimitive + Send + Sync + std::fmt::Debug,
    R: Clone + Rng + Send + Sync + Serialize,
    Standard: Distribution<T>,
{
    validate(integrand, measure, config, workers)?;

    let last = checkpoints.last().ok_or_else(|| {
        IntegrationError::invalid("cannot resume from an empty checkpoint sequence")
    })?;

    validate_grid(last.grid(), measure.domain())?;

    let rng = last.rng_after().clone();
    let grid = last.grid().clone();

    run(
        integrand, measure, config, callback, workers, grid, rng, checkpoints,
    )
}

/// Eager validation of everything the run depends on. Runs before any
/// sample is drawn.
fn validate<T, I>(
    integrand: &I,
    measure: &FractalMeasure<T>,
    config: &VegasConfig<T>,
    workers: usize,
) -> Result<(), IntegrationError<T>>
where
    I: Integrand<T>,
    T: Float + FromPrimitive + std::fmt::Debug,
{
    if integrand.dim() != measure.dim() {
        return Err(IntegrationError::invalid(format!(
            "integrand has {} dimensions, measure has {}",
            integrand.dim(),
            measure.dim()
        )));
    }

    if config.iterations == 0 {
        return Err(IntegrationError::invalid("iteration count must be positive"));
    }

    if config.calls_per_iteration < 2 {
        return Err(IntegrationError::invalid(
            "at least two calls per iteration are needed to estimate a variance",
        ));
    }

    if config.bins == 0 {
        return Err(IntegrationError::invalid(
            "at least one stratification bin per dimension is required",
        ));
    }

    if !(config.damping > T::zero() && config.damping <= T::one()) {
        return Err(IntegrationError::invalid(format!(
            "damping must lie in (0, 1], got {:?}",
            config.damping
        )));
    }

    if !(config.convergence_tolerance > T::zero() && config.convergence_tolerance.is_finite()) {
        return Err(IntegrationError::invalid(format!(
            "convergence tolerance must be positive, got {:?}",
            config.convergence_tolerance
        )));
    }

    if !(config.chi_sq_threshold > T::zero() && config.chi_sq_threshold.is_finite()) {
        return Err(IntegrationError::invalid(format!(
            "chi-squared threshold must be positive, got {:?}",
            config.chi_sq_threshold
        )));
    }

    if config.convergence_window < 2 {
        return Err(IntegrationError::invalid(
            "the convergence window must span at least two iterations",
        ));
    }

    if config.variance_growth_window == 0 {
        return Err(IntegrationError::invalid(
            "the variance growth window must span at least one iteration",
        ));
    }

    if !(config.max_discard_ratio >= T::zero() && config.max_discard_ratio <= T::one()) {
        return Err(IntegrationError::invalid(format!(
            "the discard ratio limit must lie in [0, 1], got {:?}",
            config.max_discard_ratio
        )));
    }

    if !(config.min_width_fraction > T::zero() && config.min_width_fraction < T::one()) {
        return Err(IntegrationError::invalid(format!(
            "the bin width floor must lie in (0, 1), got {:?}",
            config.min_width_fraction
        )));
    }

    if workers == 0 {
        return Err(IntegrationError::invalid("at least one worker is required"));
    }

    Ok(())
}

/// The iteration loop shared by [`integrate`] and [`resume`].
#[allow(clippy::too_many_arguments)]
fn run<T, R, I>(
    integrand: &I,
    measure: &FractalMeasure<T>,
    config: &VegasConfig<T>,
    callback: &impl Callback<T, R, VegasEstimators<T>>,
    workers: usize,
    mut grid: AdaptiveGrid<T>,
    mut rng: R,
    mut checkpoints: Vec<VegasCheckpoint<T, R>>,
) -> Result<VegasResult<T, R>, IntegrationError<T>>
where
    I: Integrand<T>,
    T: Float + AddAssign + FromPrimitive + Send + Sync + std::fmt::Debug,
    R: Clone + Rng + Send + Sync + Serialize,
    Standard: Distribution<T>,
{
    let mut history: Vec<MeanVar<T>> = checkpoints
        .iter()
        .map(|c| MeanVar::new(c.estimators().mean(), c.estimators().var()))
        .collect();

    let calls = config.calls_per_iteration;
    let dim = integrand.dim();
    let mut converged = false;

    for _ in 0..config.iterations {
        let rng_before = rng.clone();
        let (estimators, accumulator) =
            sample_iteration(integrand, measure, &grid, &rng, workers, calls);

        history.push(MeanVar::new(estimators.mean(), estimators.var()));

        let discard_rate =
            estimators.non_finite_calls() as f64 / estimators.calls() as f64;
        let discard_limit = config.max_discard_ratio.to_f64().unwrap();

        if discard_rate > discard_limit {
            return Err(IntegrationError::Diverged {
                kind: DivergenceKind::ExcessiveDiscards {
                    rate: discard_rate,
                    limit: discard_limit,
                },
                history,
            });
        }

        let latest = history.last().unwrap();
        if !latest.mean().is_finite() || !latest.var().is_finite() {
            return Err(IntegrationError::Diverged {
                kind: DivergenceKind::NonFiniteEstimate,
                history,
            });
        }

        if variance_grew(&history, config.variance_growth_window) {
            return Err(IntegrationError::Diverged {
                kind: DivergenceKind::VarianceGrowth(config.variance_growth_window),
                history,
            });
        }

        grid.adapt(&accumulator, config.damping, config.min_width_fraction);

        // synchronize the generator with the samples the workers consumed
        for _ in 0..calls * dim {
            let _ = rng.gen::<T>();
        }

        checkpoints.push(Checkpoint::new(
            rng_before,
            rng.clone(),
            estimators,
            grid.clone(),
        ));
        callback.print(&checkpoints);

        if history.len() >= config.convergence_window {
            let window = &history[history.len() - config.convergence_window..];
            let tail = FinalEstimate::combine(window, false);
            let combined = FinalEstimate::combine(&history, false);

            log::debug!(
                "iteration {}: chi^2/dof = {:?}, relative error = {:?}",
                history.len() - 1,
                tail.chi_sq_per_dof(),
                combined.relative_std_error()
            );

            if tail.chi_sq_per_dof() <= config.chi_sq_threshold
                && combined.relative_std_error() <= config.convergence_tolerance
            {
                converged = true;
                break;
            }
        }

        if config
            .cancel
            .as_ref()
            .map_or(false, CancelToken::is_cancelled)
        {
            break;
        }
    }

    let estimate = FinalEstimate::combine(&history, converged);

    if !estimate.mean().is_finite() {
        return Err(IntegrationError::Diverged {
            kind: DivergenceKind::NonFiniteEstimate,
            history,
        });
    }

    Ok(VegasResult {
        checkpoints,
        estimate,
    })
}

/// Returns whether the iteration variance increased strictly over the
/// last `window` steps.
fn variance_grew<T: Float>(history: &[MeanVar<T>], window: usize) -> bool {
    if history.len() <= window {
        return false;
    }

    history[history.len() - window - 1..]
        .windows(2)
        .all(|pair| pair[1].var() > pair[0].var())
}

/// Perform a single iteration of `calls` samples on `workers` worker
/// threads, reducing the partial results in worker order.
fn sample_iteration<T, R, I>(
    integrand: &I,
    measure: &FractalMeasure<T>,
    grid: &AdaptiveGrid<T>,
    rng: &R,
    workers: usize,
    calls: usize,
) -> (VegasEstimators<T>, GridAccumulator<T>)
where
    I: Integrand<T>,
    T: Float + AddAssign + FromPrimitive + Send + Sync + std::fmt::Debug,
    R: Clone + Rng + Send + Sync,
    Standard: Distribution<T>,
{
    let calls_per_worker = (calls as f32 / workers as f32).ceil() as usize;

    // distribute the workload evenly across the workers
    let shares = cb::thread::scope(|s| {
        let mut handles = Vec::with_capacity(workers);

        for worker in 0..workers {
            // Needs to be defined before spawning the thread
            let rng_local = rng.clone();

            handles.push(s.spawn(move |_| {
                iteration_share(
                    integrand,
                    measure,
                    grid,
                    rng_local,
                    calls_per_worker,
                    worker,
                    workers,
                    calls,
                )
            }));
        }

        // wait for the threads to finish
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect::<Vec<_>>()
    })
    .unwrap();

    let mut estimators = VegasEstimators::default();
    let mut accumulator = grid.accumulator();

    // worker-order reduction keeps the summation deterministic
    for (share_estimators, share_accumulator) in shares {
        estimators = estimators + share_estimators;
        accumulator += share_accumulator;
    }

    (estimators, accumulator)
}

/// Perform part of an iteration on a specific `worker`.
#[allow(clippy::too_many_arguments)]
fn iteration_share<T, R, I>(
    integrand: &I,
    measure: &FractalMeasure<T>,
    grid: &AdaptiveGrid<T>,
    mut rng: R,
    calls_per_worker: usize,
    worker: usize,
    workers: usize,
    total_calls: usize,
) -> (VegasEstimators<T>, GridAccumulator<T>)
where
    I: Integrand<T>,
    T: Float + AddAssign + FromPrimitive + std::fmt::Debug,
    R: Rng,
    Standard: Distribution<T>,
{
    let dim = integrand.dim();

    // determine how many draws of the random number generator to skip
    let skip = calls_per_worker * worker * dim;
    for _ in 0..skip {
        let _ = rng.gen::<T>();
    }

    // on the last worker, not all calls might be needed
    let share = calls_for_worker(worker, workers, total_calls);

    // buffers reused across calls so the hot loop does not allocate
    let mut x = vec![T::zero(); dim];
    let mut bins = vec![0; dim];

    let mut estimators = VegasEstimators::default();
    let mut accumulator = grid.accumulator();

    for _ in 0..share {
        let mut weight = T::one();

        for (d, (slot, bin)) in x.iter_mut().zip(bins.iter_mut()).enumerate() {
            let point = grid.sample(d, rng.gen());
            *slot = point.x;
            *bin = point.bin;
            weight = weight * point.weight;
        }

        let value = integrand.call(&x) * measure.density(&x) * measure.filter_weight(&x) * weight;

        if value.is_finite() {
            for (d, &bin) in bins.iter().enumerate() {
                accumulator.record(d, bin, value * value);
            }
        } else {
            log::warn!("discarding non-finite integrand value at x = {:?}", x);
        }

        estimators.update(value);
    }

    (estimators, accumulator)
}
