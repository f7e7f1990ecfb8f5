use mcfract::callbacks::{FileWriterCallback, SinkCallback};
use mcfract::core::estimators::{BasicEstimators, Estimators};
use mcfract::core::{CancelToken, Integrand};
use mcfract::error::{DivergenceKind, IntegrationError};
use mcfract::integrators::vegas::{self, VegasCheckpoint, VegasConfig};
use mcfract::measure::{Domain, FractalMeasure};

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use serde::Serialize;
use std::fs::read_to_string;
use tempfile::NamedTempFile;

const MU_FRACTAL: f64 = 0.757;

fn assert_eq_rng<R>(lhs: &R, rhs: &R)
where
    R: Rng + Serialize,
{
    assert_eq!(
        serde_json::to_string(lhs).unwrap(),
        serde_json::to_string(rhs).unwrap()
    );
}

fn reference_rng() -> Pcg64 {
    Pcg64::new(0xcafef00dd15ea5e5, 0xa02bdbf7bb3c0a7ac28fa16a64abf96)
}

fn unit_measure(dim: usize, mu: f64) -> FractalMeasure<f64> {
    FractalMeasure::new(Domain::new(vec![(0.0, 1.0); dim]).unwrap(), mu).unwrap()
}

struct Constant {
    value: f64,
    dim: usize,
}

impl Integrand<f64> for Constant {
    fn call(&self, _: &[f64]) -> f64 {
        self.value
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

struct Folded;

impl Integrand<f64> for Folded {
    // int_0^1 dx |2x - 1| = 0.5
    fn call(&self, x: &[f64]) -> f64 {
        (2.0 * x[0] - 1.0).abs()
    }

    fn dim(&self) -> usize {
        1
    }
}

struct Explosive;

impl Integrand<f64> for Explosive {
    fn call(&self, _: &[f64]) -> f64 {
        f64::INFINITY
    }

    fn dim(&self) -> usize {
        1
    }
}

#[test]
fn constant_integrand_converges_to_the_fractal_mass() {
    // the fractal mass of the unit interval equals its Euclidean volume,
    // so the constant integrand must come out at 1.0
    let mut config = VegasConfig::new(10, 10_000);
    config.chi_sq_threshold = 3.0;

    let result = vegas::integrate(
        &Constant {
            value: 1.0,
            dim: 1,
        },
        &unit_measure(1, MU_FRACTAL),
        &config,
        &reference_rng(),
        &SinkCallback {},
        1,
    )
    .unwrap();

    let estimate = result.estimate();
    assert!(estimate.std_error() > 0.0);
    assert!(
        (estimate.mean() - 1.0).abs() <= 3.0 * estimate.std_error(),
        "mean {} deviates from 1.0 by more than 3 standard errors ({})",
        estimate.mean(),
        estimate.std_error()
    );
    assert!(estimate.converged());
    assert!(estimate.history().len() <= 10);
}

#[test]
fn folded_linear_integrand_near_the_euclidean_limit() {
    let mut config = VegasConfig::new(8, 5_000);
    config.chi_sq_threshold = 3.0;

    let result = vegas::integrate(
        &Folded,
        &unit_measure(1, 1.0 - 1e-9),
        &config,
        &reference_rng(),
        &SinkCallback {},
        1,
    )
    .unwrap();

    let estimate = result.estimate();
    assert!((estimate.mean() - 0.5).abs() <= 4.0 * estimate.std_error());
}

#[test]
fn multidimensional_runs_reduce_over_workers_deterministically() {
    let mut config = VegasConfig::new(6, 4_000);
    config.convergence_window = 100;

    let integrand = Constant {
        value: 1.0,
        dim: 3,
    };
    let measure = unit_measure(3, MU_FRACTAL);

    let first = vegas::integrate(
        &integrand,
        &measure,
        &config,
        &reference_rng(),
        &SinkCallback {},
        3,
    )
    .unwrap();
    let second = vegas::integrate(
        &integrand,
        &measure,
        &config,
        &reference_rng(),
        &SinkCallback {},
        3,
    )
    .unwrap();

    // the determinism law: same seed, same worker count, same bits
    assert_eq!(
        first.estimate().mean().to_bits(),
        second.estimate().mean().to_bits()
    );
    assert_eq!(
        first.estimate().std_error().to_bits(),
        second.estimate().std_error().to_bits()
    );
    assert_eq!(
        serde_json::to_string(first.checkpoints()).unwrap(),
        serde_json::to_string(second.checkpoints()).unwrap()
    );

    // and the estimate itself is sane
    assert!((first.estimate().mean() - 1.0).abs() <= 4.0 * first.estimate().std_error());
}

#[test]
fn constant_integrand_covers_the_truth_across_seeds() {
    let mut covered = 0;
    let seeds: Vec<u64> = (1..=8).collect();
    let total = seeds.len();

    for &seed in &seeds {
        let rng = Pcg64::seed_from_u64(seed);
        let mut config = VegasConfig::new(5, 2_000);
        config.convergence_window = 100;

        let result = vegas::integrate(
            &Constant {
                value: 1.0,
                dim: 1,
            },
            &unit_measure(1, 0.9),
            &config,
            &rng,
            &SinkCallback {},
            1,
        )
        .unwrap();

        let estimate = result.estimate();
        if (estimate.mean() - 1.0).abs() <= 3.0 * estimate.std_error() {
            covered += 1;
        }
    }

    // a statistical property: at least 7 of the 8 fixed seeds must
    // cover the true value within three standard errors
    assert!(covered >= total - 1, "only {} of {} seeds covered", covered, total);
}

#[test]
fn inverted_domain_is_rejected_before_sampling() {
    let result = Domain::new(vec![(0.0, 1.0), (1.0, 0.5)]);
    assert!(matches!(
        result,
        Err(IntegrationError::InvalidParameter { .. })
    ));
}

#[test]
fn mu_outside_the_open_interval_is_rejected() {
    let domain = Domain::new(vec![(0.0, 1.0)]).unwrap();
    assert!(matches!(
        FractalMeasure::new(domain.clone(), 1.0),
        Err(IntegrationError::InvalidParameter { .. })
    ));
    assert!(matches!(
        FractalMeasure::new(domain, -0.5),
        Err(IntegrationError::InvalidParameter { .. })
    ));
}

#[test]
fn everywhere_infinite_integrand_diverges() {
    let config = VegasConfig::new(10, 1_000);

    let result = vegas::integrate(
        &Explosive,
        &unit_measure(1, 0.5),
        &config,
        &reference_rng(),
        &SinkCallback {},
        1,
    );

    match result {
        Err(IntegrationError::Diverged { kind, history }) => {
            assert!(matches!(kind, DivergenceKind::ExcessiveDiscards { .. }));
            // the offending iteration is part of the diagnostic history
            assert_eq!(history.len(), 1);
        }
        other => panic!("expected divergence, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn grid_stays_sound_across_a_whole_run() {
    let mut config = VegasConfig::new(12, 2_000);
    config.convergence_window = 100;

    let result = vegas::integrate(
        &Folded,
        &unit_measure(1, MU_FRACTAL),
        &config,
        &reference_rng(),
        &SinkCallback {},
        1,
    )
    .unwrap();

    for checkpoint in result.checkpoints() {
        let edges = checkpoint.grid().edges(0);
        assert_eq!(edges.len(), config.bins + 1);
        assert_eq!(edges[0], 0.0);
        assert_eq!(edges[config.bins], 1.0);
        assert!(edges.windows(2).all(|w| w[0] < w[1]));
    }
}

#[test]
fn resume_reproduces_the_uninterrupted_run() {
    let integrand = Folded;
    let measure = unit_measure(1, MU_FRACTAL);

    let mut full_config = VegasConfig::new(4, 1_000);
    full_config.convergence_window = 100;
    let mut half_config = full_config.clone();
    half_config.iterations = 2;

    let full = vegas::integrate(
        &integrand,
        &measure,
        &full_config,
        &reference_rng(),
        &SinkCallback {},
        1,
    )
    .unwrap();

    let first_half = vegas::integrate(
        &integrand,
        &measure,
        &half_config,
        &reference_rng(),
        &SinkCallback {},
        1,
    )
    .unwrap();

    let resumed = vegas::resume(
        &integrand,
        &measure,
        &half_config,
        first_half.into_checkpoints(),
        &SinkCallback {},
        1,
    )
    .unwrap();

    assert_eq!(resumed.checkpoints().len(), 4);
    assert_eq_rng(
        full.checkpoints()[3].rng_after(),
        resumed.checkpoints()[3].rng_after(),
    );
    assert_eq!(
        full.estimate().mean().to_bits(),
        resumed.estimate().mean().to_bits()
    );
    assert_eq!(
        full.estimate().std_error().to_bits(),
        resumed.estimate().std_error().to_bits()
    );
}

#[test]
fn checkpoints_round_trip_through_the_file_writer() {
    let file = NamedTempFile::new().unwrap();
    let path = file.path();

    let mut config = VegasConfig::new(3, 500);
    config.convergence_window = 100;

    let original = vegas::integrate(
        &Folded,
        &unit_measure(1, MU_FRACTAL),
        &config,
        &reference_rng(),
        &FileWriterCallback::new(path),
        1,
    )
    .unwrap();

    let contents = read_to_string(path).expect("unable to read the checkpoint file");
    let restored: Vec<VegasCheckpoint<f64, Pcg64>> =
        serde_json::from_str(&contents).expect("unable to deserialize checkpoints");

    assert_eq!(restored.len(), original.checkpoints().len());

    for (restored, original) in restored.iter().zip(original.checkpoints()) {
        assert_eq!(restored.estimators().calls(), original.estimators().calls());
        assert_eq!(
            restored.estimators().mean().to_bits(),
            original.estimators().mean().to_bits()
        );
        assert_eq!(
            restored.estimators().var().to_bits(),
            original.estimators().var().to_bits()
        );
        assert_eq!(restored.grid(), original.grid());
        assert_eq_rng(restored.rng_after(), original.rng_after());
    }
}

#[test]
fn cancellation_stops_between_iterations() {
    let token = CancelToken::new();
    token.cancel();

    let mut config = VegasConfig::new(10, 1_000);
    config.convergence_window = 100;
    config.cancel = Some(token);

    let result = vegas::integrate(
        &Folded,
        &unit_measure(1, MU_FRACTAL),
        &config,
        &reference_rng(),
        &SinkCallback {},
        1,
    )
    .unwrap();

    // the in-flight iteration completes; nothing further runs
    assert_eq!(result.checkpoints().len(), 1);
    assert!(!result.estimate().converged());
    assert_eq!(result.checkpoints()[0].estimators().calls(), 1_000);
}
