#![warn(clippy::all, clippy::cargo, clippy::nursery, clippy::pedantic)]
#![warn(missing_docs)]

//! The crate `mcfract` provides adaptive [Monte Carlo integration] over
//! fractal measures: definite multi-dimensional [integrals] in which the
//! flat volume element is replaced by the Hausdorff-like density of a
//! support with non-integer topological dimension $\mu \in (0, 1)$,
//!
//! $$ I_\mu = \int_\Omega f(x) J_\mu(x) W(x) \mathrm{d}x, $$
//!
//! where $J_\mu$ is the fractional volume element supplied by a
//! [`FractalMeasure`](measure::FractalMeasure) and $W$ an optional
//! density filter. The integral is estimated with importance sampling
//! on an adaptively refined stratification grid (the classic "VEGAS"
//! scheme), which concentrates samples where the weighted integrand
//! varies most.
//!
//! # Features
//!
//! This library was designed with the following features as essential in mind:
//!
//! - **Generic numeric type**. The numeric type used in this library is not fixed, but instead a
//! generic parameter, so that the integration routines can be used with either `f32`, `f64`, or a
//! custom numeric type that implements the `Float` trait from the `num-traits` crate.
//! - **Generic random number generator**. Every random number generator that implements the `Rng`
//! trait from the `rand` crate can be used with the integrator.
//! - **Reproducibility**. As far as the numeric type allows this, results only depend on the
//! chosen generator, its seed and the worker count; they do not depend on thread scheduling.
//! - **Non-finite number filtering**. The integrator discards values such as `inf` or `nan`,
//! which integrands sometimes produce in extreme regions of their integration domain, counts the
//! discards and logs a warning through the `log` facade. A run whose discard rate exceeds the
//! configured limit is aborted as diverging instead of silently returning garbage.
//! - **Zero tracking**. If your integrand returns zero, another counter keeps track of the
//! efficiency of the integration.
//! - **Convergence diagnostics**. Iteration estimates are combined with inverse-variance
//! weights and the consistency of the sequence is summarised by $\chi^2$ per degree of
//! freedom; the run stops early once both the dispersion and the relative error pass their
//! configured thresholds, and exhausting the iteration budget is reported through a flag
//! rather than an error.
//! - **Checkpoints**. Every iteration records the generator state before and after, the
//! iteration estimators and the adapted grid. Checkpoints can be serialized and used to
//! resume or replay an integration without a difference in the final results.
//!
//! # What is ...?
//!
//! This section is a dictionary of terms that are used in this documentation.
//!
//! - the number of *calls* is $N$, the number of times the integrand is evaluated per
//! iteration. We assume that this is the expensive operation;
//! - the *integrand* is the function $f(x_1, x_2, \ldots, x_d)$ that is being integrated;
//! - the number of *dimensions*, $d$, is the number of dimensions of the integration domain;
//! - the *topological dimension* $\mu$ fixes the fractional volume element
//! $J_\mu(x) = \prod_d \mu t_d^{\mu - 1}$ of the measure; in the limit $\mu \to 1$ it
//! reduces to the flat Lebesgue measure;
//! - the *grid* is the per-dimension partition of the domain that drives importance
//! sampling; bins carrying a large share of the observed variance are narrowed between
//! iterations;
//! - the *damping* exponent limits how aggressively a single adaptation step may move the
//! bin edges, preventing oscillation;
//! - *efficiency* is the percentage of calls in which the integrand evaluated to a value
//! different from zero. If this number is very small, the statistical uncertainties may be
//! underestimated.
//!
//! [Monte Carlo integration]: https://en.wikipedia.org/wiki/Monte_Carlo_integration
//! [integrals]: https://en.wikipedia.org/wiki/Integral

pub mod callbacks;
pub mod core;
pub mod error;
pub mod grid;
pub mod integrators;
pub mod measure;
pub mod report;

pub use crate::core::*;
pub use crate::error::{DivergenceKind, IntegrationError};
