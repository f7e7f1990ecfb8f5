use criterion::{criterion_group, criterion_main, Criterion};

use mcfract::callbacks::SinkCallback;
use mcfract::core::Integrand;
use mcfract::integrators::vegas::{self, VegasConfig};
use mcfract::measure::{Domain, FractalMeasure};

use rand_pcg::Pcg64;

struct DampedShell;

/// A radially decaying kernel over the 2-dimensional unit square.
impl Integrand<f64> for DampedShell {
    fn call(&self, x: &[f64]) -> f64 {
        let r = x.iter().map(|v| v * v).sum::<f64>().sqrt();
        (-r).exp()
    }

    fn dim(&self) -> usize {
        2
    }
}

fn benchmark_vegas() {
    let rng = Pcg64::new(0xcafef00dd15ea5e5, 0xa02bdbf7bb3c0a7ac28fa16a64abf96);
    let measure = FractalMeasure::new(Domain::new(vec![(0.0, 1.0); 2]).unwrap(), 0.757).unwrap();

    let mut config = VegasConfig::new(2, 1_000);
    config.convergence_window = 100;

    let _ = vegas::integrate(&DampedShell, &measure, &config, &rng, &SinkCallback {}, 1).unwrap();
}

fn criterion_vegas_benchmark(c: &mut Criterion) {
    c.bench_function("vegas bivariate shell", |b| b.iter(benchmark_vegas));
}

criterion_group!(benches, criterion_vegas_benchmark);
criterion_main!(benches);
