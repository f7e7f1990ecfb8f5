//! The adaptive stratification grid driving importance sampling.
//!
//! Each dimension of the domain is partitioned into `bins` intervals of
//! initially equal width. Samples are drawn uniformly within a bin chosen
//! uniformly among the bins, which makes the sampling density of a point
//! inversely proportional to the width of its bin. Between iterations the
//! bin edges are redistributed so that bins carrying a large share of the
//! observed importance signal become narrower, concentrating samples
//! where the integrand varies most.

use crate::error::IntegrationError;
use crate::measure::Domain;
use num_traits::{Float, FromPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::ops::{Add, AddAssign};

/// A single stratified draw in one dimension.
#[derive(Clone, Copy, Debug)]
pub struct GridPoint<T> {
    /// Index of the selected bin.
    pub bin: usize,
    /// Position within the bin, in `[0, 1)`.
    pub offset: T,
    /// The mapped coordinate in the domain.
    pub x: T,
    /// Sampling weight of the draw: bin count times bin width.
    pub weight: T,
}

/// Per-dimension bin edges, refined between iterations.
///
/// Invariants kept by every operation: edges are strictly increasing,
/// the first and last edge coincide with the domain bounds, and every
/// bin keeps a strictly positive width.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct AdaptiveGrid<T> {
    edges: Vec<Vec<T>>,
    bins: usize,
}

impl<T> AdaptiveGrid<T>
where
    T: Float + FromPrimitive + Debug,
{
    /// Creates a grid of `bins` equal-width bins per dimension of
    /// `domain`.
    pub fn uniform(domain: &Domain<T>, bins: usize) -> Self {
        debug_assert!(bins >= 1);

        let edges = domain
            .bounds()
            .iter()
            .map(|&(low, high)| {
                let width = (high - low) / T::from_usize(bins).unwrap();
                let mut edges: Vec<T> = (0..bins)
                    .map(|i| low + T::from_usize(i).unwrap() * width)
                    .collect();
                edges.push(high);
                edges
            })
            .collect();

        Self { edges, bins }
    }

    /// Returns the number of dimensions.
    pub fn dim(&self) -> usize {
        self.edges.len()
    }

    /// Returns the number of bins per dimension.
    pub fn bins(&self) -> usize {
        self.bins
    }

    /// Returns the bin edges of one dimension (`bins + 1` values).
    pub fn edges(&self, dim: usize) -> &[T] {
        &self.edges[dim]
    }

    /// Draws a stratified sample along `dim` from the uniform variate
    /// `u` in `[0, 1)`.
    pub fn sample(&self, dim: usize, u: T) -> GridPoint<T> {
        let bins = T::from_usize(self.bins).unwrap();
        let z = u * bins;
        let bin = z.to_usize().unwrap().min(self.bins - 1);
        let offset = z - T::from_usize(bin).unwrap();

        let edges = &self.edges[dim];
        let width = edges[bin + 1] - edges[bin];

        GridPoint {
            bin,
            offset,
            x: edges[bin] + offset * width,
            weight: bins * width,
        }
    }

    /// Returns an empty accumulator matching this grid's shape.
    pub fn accumulator(&self) -> GridAccumulator<T> {
        GridAccumulator::empty(self.dim(), self.bins)
    }

    /// Redistributes the bin edges according to the importance signal
    /// recorded in `accumulator`.
    ///
    /// The per-bin signal is smoothed over neighbouring bins and
    /// compressed through the damping exponent before rebinning, so a
    /// single adaptation step cannot overreact to one iteration's noise.
    /// A dimension whose accumulator recorded no contribution is left
    /// unchanged. Every new bin is at least `min_width_fraction` of the
    /// uniform bin width wide.
    pub fn adapt(&mut self, accumulator: &GridAccumulator<T>, damping: T, min_width_fraction: T) {
        debug_assert_eq!(accumulator.dim(), self.dim());
        debug_assert_eq!(accumulator.bins(), self.bins);

        if self.bins < 2 {
            return;
        }

        for dim in 0..self.dim() {
            let damped = match compress(&accumulator.sums[dim], damping) {
                Some(damped) => damped,
                None => continue,
            };

            let edges = &mut self.edges[dim];
            let low = edges[0];
            let high = edges[self.bins];

            let mut new_edges = rebin(edges, &damped);

            // restore the degenerate bins the rebinning may have produced
            let uniform_width = (high - low) / T::from_usize(self.bins).unwrap();
            let min_width = min_width_fraction * uniform_width;

            for i in 1..self.bins {
                let floor = new_edges[i - 1] + min_width;
                if new_edges[i] < floor {
                    new_edges[i] = floor;
                }
            }
            for i in (1..self.bins).rev() {
                let ceiling = new_edges[i + 1] - min_width;
                if new_edges[i] > ceiling {
                    new_edges[i] = ceiling;
                }
            }

            *edges = new_edges;
        }
    }
}

/// Smooths the raw importance sums over neighbouring bins and compresses
/// the normalised signal through the damping exponent. Returns `None`
/// when no contribution was recorded, so the caller can keep the edges
/// untouched.
fn compress<T>(sums: &[T], damping: T) -> Option<Vec<T>>
where
    T: Float + FromPrimitive,
{
    let bins = sums.len();
    let total = sums.iter().fold(T::zero(), |acc, &s| acc + s);

    if total <= T::zero() {
        return None;
    }

    let two = T::from_f64(2.0).unwrap();
    let three = T::from_f64(3.0).unwrap();

    let mut smoothed = vec![T::zero(); bins];
    smoothed[0] = (sums[0] + sums[1]) / two;
    for i in 1..bins - 1 {
        smoothed[i] = (sums[i - 1] + sums[i] + sums[i + 1]) / three;
    }
    smoothed[bins - 1] = (sums[bins - 2] + sums[bins - 1]) / two;

    let smoothed_total = smoothed.iter().fold(T::zero(), |acc, &s| acc + s);

    let damped = smoothed
        .into_iter()
        .map(|s| {
            let share = s / smoothed_total;
            if share >= T::one() {
                T::one()
            } else {
                // ((1 - r) / ln(1/r))^alpha; the share == 0 case falls
                // out of the formula as 1 / inf.
                ((T::one() - share) / -share.ln()).powf(damping)
            }
        })
        .collect();

    Some(damped)
}

/// Places `bins - 1` interior edges so that every new bin holds an equal
/// share of the damped importance signal, interpolating linearly inside
/// the old bins.
fn rebin<T>(edges: &[T], damped: &[T]) -> Vec<T>
where
    T: Float + FromPrimitive,
{
    let bins = damped.len();
    let per_bin = damped.iter().fold(T::zero(), |acc, &d| acc + d)
        / T::from_usize(bins).unwrap();

    let mut new_edges = Vec::with_capacity(bins + 1);
    new_edges.push(edges[0]);

    let mut carried = T::zero();
    let mut source = 0;

    for _ in 1..bins {
        while carried < per_bin && source < bins {
            carried = carried + damped[source];
            source += 1;
        }
        carried = carried - per_bin;

        let prev = source - 1;
        let width = edges[prev + 1] - edges[prev];
        let fraction = if damped[prev] > T::zero() {
            carried / damped[prev]
        } else {
            T::zero()
        };

        new_edges.push(edges[prev + 1] - fraction * width);
    }

    new_edges.push(edges[bins]);
    new_edges
}

/// Per-dimension, per-bin importance signal of one iteration.
///
/// Workers accumulate independently and the partial accumulators are
/// merged in worker order, so the adaptation input is reproducible.
#[derive(Clone, Debug, PartialEq)]
pub struct GridAccumulator<T> {
    sums: Vec<Vec<T>>,
    hits: Vec<Vec<usize>>,
}

impl<T> GridAccumulator<T>
where
    T: Float,
{
    /// Creates an all-zero accumulator.
    pub fn empty(dim: usize, bins: usize) -> Self {
        Self {
            sums: vec![vec![T::zero(); bins]; dim],
            hits: vec![vec![0; bins]; dim],
        }
    }

    /// Returns the number of dimensions.
    pub fn dim(&self) -> usize {
        self.sums.len()
    }

    /// Returns the number of bins per dimension.
    pub fn bins(&self) -> usize {
        self.sums.first().map_or(0, Vec::len)
    }

    /// Adds the squared weighted contribution of one sample to a bin.
    pub fn record(&mut self, dim: usize, bin: usize, contribution: T) {
        self.sums[dim][bin] = self.sums[dim][bin] + contribution;
        self.hits[dim][bin] += 1;
    }

    /// Returns the recorded sums of one dimension.
    pub fn sums(&self, dim: usize) -> &[T] {
        &self.sums[dim]
    }

    /// Returns the hit counts of one dimension.
    pub fn hits(&self, dim: usize) -> &[usize] {
        &self.hits[dim]
    }
}

impl<T: Float> Add for GridAccumulator<T> {
    type Output = Self;

    fn add(mut self, other: Self) -> Self {
        self += other;
        self
    }
}

impl<T: Float> AddAssign for GridAccumulator<T> {
    fn add_assign(&mut self, other: Self) {
        debug_assert_eq!(self.dim(), other.dim());
        debug_assert_eq!(self.bins(), other.bins());

        for (mine, theirs) in self.sums.iter_mut().zip(other.sums) {
            for (m, t) in mine.iter_mut().zip(theirs) {
                *m = *m + t;
            }
        }

        for (mine, theirs) in self.hits.iter_mut().zip(other.hits) {
            for (m, t) in mine.iter_mut().zip(theirs) {
                *m += t;
            }
        }
    }
}

/// Checks that a grid is structurally sound for `domain`: edge count,
/// strict monotonicity and agreement with the domain bounds. Used when
/// accepting externally supplied grids (checkpoint resume).
pub(crate) fn validate_grid<T>(
    grid: &AdaptiveGrid<T>,
    domain: &Domain<T>,
) -> Result<(), IntegrationError<T>>
where
    T: Float + FromPrimitive + Debug,
{
    if grid.dim() != domain.dim() {
        return Err(IntegrationError::invalid(format!(
            "grid has {} dimensions, domain has {}",
            grid.dim(),
            domain.dim()
        )));
    }

    for (dim, (edges, &(low, high))) in grid.edges.iter().zip(domain.bounds()).enumerate() {
        if edges.len() != grid.bins + 1 {
            return Err(IntegrationError::invalid(format!(
                "grid dimension {} has {} edges, expected {}",
                dim,
                edges.len(),
                grid.bins + 1
            )));
        }

        if edges[0] != low || edges[grid.bins] != high {
            return Err(IntegrationError::invalid(format!(
                "grid dimension {} does not span the domain",
                dim
            )));
        }

        if edges.windows(2).any(|w| w[0] >= w[1]) {
            return Err(IntegrationError::invalid(format!(
                "grid dimension {} has non-increasing edges",
                dim
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::Rng;
    use rand_pcg::Pcg64;

    const TOLERANCE: f64 = 1e-12;

    fn unit_domain(dim: usize) -> Domain<f64> {
        Domain::new(vec![(0.0, 1.0); dim]).unwrap()
    }

    fn assert_sound(grid: &AdaptiveGrid<f64>, domain: &Domain<f64>) {
        validate_grid(grid, domain).unwrap();
    }

    #[test]
    fn uniform_grid_has_equal_bins() {
        let domain = Domain::new(vec![(2.0, 4.0)]).unwrap();
        let grid = AdaptiveGrid::uniform(&domain, 4);

        let edges = grid.edges(0);
        assert_eq!(edges.len(), 5);
        assert_approx_eq!(edges[0], 2.0, TOLERANCE);
        assert_approx_eq!(edges[2], 3.0, TOLERANCE);
        assert_approx_eq!(edges[4], 4.0, TOLERANCE);
    }

    #[test]
    fn sample_maps_the_unit_variate_onto_bins() {
        let grid = AdaptiveGrid::uniform(&unit_domain(1), 10);

        let point = grid.sample(0, 0.25);
        assert_eq!(point.bin, 2);
        assert_approx_eq!(point.offset, 0.5, TOLERANCE);
        assert_approx_eq!(point.x, 0.25, TOLERANCE);
        assert_approx_eq!(point.weight, 1.0, TOLERANCE);

        // the variate never reaches 1.0, but guard the last bin anyway
        let point = grid.sample(0, 0.999_999_999);
        assert_eq!(point.bin, 9);
    }

    #[test]
    fn adapt_narrows_high_importance_bins() {
        let domain = unit_domain(1);
        let mut grid = AdaptiveGrid::uniform(&domain, 10);

        let mut acc = grid.accumulator();
        // all the importance sits in the first bin
        acc.record(0, 0, 1000.0);
        for bin in 1..10 {
            acc.record(0, bin, 1e-3);
        }

        grid.adapt(&acc, 1.0, 1e-4);
        assert_sound(&grid, &domain);

        let edges = grid.edges(0);
        let first_width = edges[1] - edges[0];
        let last_width = edges[10] - edges[9];
        assert!(first_width < 0.1);
        assert!(last_width > first_width);
    }

    #[test]
    fn adapt_is_idempotent_without_contributions() {
        let domain = unit_domain(2);
        let mut grid = AdaptiveGrid::uniform(&domain, 8);

        let before = grid.clone();
        let acc = grid.accumulator();
        grid.adapt(&acc, 0.5, 1e-4);

        assert_eq!(grid, before);
    }

    #[test]
    fn adapt_keeps_edges_sound_under_repeated_refinement() {
        let domain = Domain::new(vec![(0.0, 1.0), (-3.0, 7.0)]).unwrap();
        let mut grid = AdaptiveGrid::uniform(&domain, 25);
        let mut rng = Pcg64::new(0xcafef00dd15ea5e5, 0xa02bdbf7bb3c0a7ac28fa16a64abf96);

        for _ in 0..100 {
            let mut acc = grid.accumulator();
            for dim in 0..2 {
                for bin in 0..25 {
                    acc.record(dim, bin, rng.gen::<f64>().powi(4));
                }
            }
            grid.adapt(&acc, 0.5, 1e-4);
            assert_sound(&grid, &domain);
        }
    }

    #[test]
    fn adapt_respects_the_width_floor() {
        let domain = unit_domain(1);
        let mut grid = AdaptiveGrid::uniform(&domain, 10);

        // a pathologically concentrated signal over many steps
        for _ in 0..50 {
            let mut acc = grid.accumulator();
            acc.record(0, 0, 1e12);
            grid.adapt(&acc, 1.0, 1e-3);
            assert_sound(&grid, &domain);
        }

        let min_width = 1e-3 * 0.1;
        for w in grid.edges(0).windows(2) {
            assert!(w[1] - w[0] >= min_width * (1.0 - 1e-9));
        }
    }

    #[test]
    fn single_bin_grids_never_move() {
        let domain = unit_domain(1);
        let mut grid = AdaptiveGrid::uniform(&domain, 1);

        let mut acc = grid.accumulator();
        acc.record(0, 0, 42.0);
        grid.adapt(&acc, 1.0, 1e-4);

        assert_eq!(grid.edges(0), &[0.0, 1.0]);
    }

    #[test]
    fn accumulators_merge_bin_by_bin() {
        let grid = AdaptiveGrid::<f64>::uniform(&unit_domain(1), 4);

        let mut a = grid.accumulator();
        let mut b = grid.accumulator();
        a.record(0, 1, 2.0);
        b.record(0, 1, 3.0);
        b.record(0, 3, 1.0);

        let merged = a + b;
        assert_approx_eq!(merged.sums(0)[1], 5.0, TOLERANCE);
        assert_approx_eq!(merged.sums(0)[3], 1.0, TOLERANCE);
        assert_eq!(merged.hits(0), &[0, 2, 0, 1]);
    }
}
