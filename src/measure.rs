//! Integration domains and the fractional volume element.
//!
//! A [`FractalMeasure`] replaces the flat Lebesgue measure of the
//! integration domain with a Hausdorff-like product measure of
//! non-integer dimension $\mu \in (0, 1)$. The volume element is
//!
//! $$ J_\mu(x) = \prod_{d} \mu \, t_d^{\mu - 1}, \qquad
//!    t_d = \frac{x_d - a_d}{b_d - a_d} $$
//!
//! normalised so that the fractal mass of the whole domain equals its
//! Euclidean volume and $J_\mu \to 1$ in the limit $\mu \to 1$.

use crate::core::DensityFilter;
use crate::error::IntegrationError;
use num_traits::{Float, FromPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Euler's gamma function, $\Gamma(x)$, evaluated in double precision.
pub fn gamma<T: Float + FromPrimitive>(x: T) -> T {
    T::from_f64(libm::tgamma(x.to_f64().unwrap())).unwrap()
}

/// Base admittance of the staircase function, $Z_\mu = 1 / \Gamma(\mu + 1)$.
pub fn staircase_admittance<T: Float + FromPrimitive>(mu: T) -> T {
    T::one() / gamma(mu + T::one())
}

/// Geometric stiffness of the effective fractal Laplacian,
/// $K_\mathrm{geo} = Z_\mu^2 / (\mu^2 \sqrt{A})$, where $A$ is the
/// lacunarity of the support.
pub fn geometric_stiffness<T: Float + FromPrimitive>(mu: T, lacunarity: T) -> T {
    let z = staircase_admittance(mu);
    z * z / (mu * mu * lacunarity.sqrt())
}

/// The integration region: one `(low, high)` bound pair per dimension.
///
/// Bounds are validated eagerly; a `Domain` that exists is valid for the
/// lifetime of the run.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Domain<T> {
    bounds: Vec<(T, T)>,
}

impl<T: Float + fmt::Debug> Domain<T> {
    /// Creates a domain from per-dimension bounds.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrationError::InvalidParameter`] if `bounds` is empty
    /// or any pair is inverted (`low >= high`) or non-finite.
    pub fn new(bounds: Vec<(T, T)>) -> Result<Self, IntegrationError<T>> {
        if bounds.is_empty() {
            return Err(IntegrationError::invalid("domain has zero dimensions"));
        }

        for (dim, &(low, high)) in bounds.iter().enumerate() {
            if !low.is_finite() || !high.is_finite() {
                return Err(IntegrationError::invalid(format!(
                    "domain bounds in dimension {} are not finite",
                    dim
                )));
            }

            if low >= high {
                return Err(IntegrationError::invalid(format!(
                    "domain bounds inverted in dimension {}: {:?} >= {:?}",
                    dim, low, high
                )));
            }
        }

        Ok(Self { bounds })
    }

    /// Returns the number of dimensions.
    pub fn dim(&self) -> usize {
        self.bounds.len()
    }

    /// Returns the per-dimension bound pairs.
    pub fn bounds(&self) -> &[(T, T)] {
        &self.bounds
    }

    /// Returns the Euclidean volume of the region.
    pub fn volume(&self) -> T {
        self.bounds
            .iter()
            .fold(T::one(), |acc, &(low, high)| acc * (high - low))
    }
}

/// A fractal product measure over a [`Domain`].
///
/// The measure is a pure function of `(domain, mu)`; the optional
/// [`DensityFilter`] and the lacunarity parameter extend it with the
/// caller's density correction. It carries no mutable state.
pub struct FractalMeasure<T> {
    domain: Domain<T>,
    mu: T,
    lacunarity: T,
    uv_floor: T,
    filter: Option<Box<dyn DensityFilter<T> + Send + Sync>>,
}

impl<T: fmt::Debug> fmt::Debug for FractalMeasure<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FractalMeasure")
            .field("domain", &self.domain)
            .field("mu", &self.mu)
            .field("lacunarity", &self.lacunarity)
            .field("uv_floor", &self.uv_floor)
            .field("filter", &self.filter.as_ref().map(|_| "<density filter>"))
            .finish()
    }
}

impl<T> FractalMeasure<T>
where
    T: Float + FromPrimitive + fmt::Debug,
{
    /// Creates a measure of topological dimension `mu` over `domain`.
    ///
    /// The lacunarity defaults to one and the UV floor to `1e-16`, the
    /// truncation the integrand kernels use near strict zero.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrationError::InvalidParameter`] unless `mu` lies
    /// strictly inside `(0, 1)`.
    pub fn new(domain: Domain<T>, mu: T) -> Result<Self, IntegrationError<T>> {
        if !mu.is_finite() || mu <= T::zero() || mu >= T::one() {
            return Err(IntegrationError::invalid(format!(
                "topological dimension mu must lie in (0, 1), got {:?}",
                mu
            )));
        }

        Ok(Self {
            domain,
            mu,
            lacunarity: T::one(),
            uv_floor: T::from_f64(1e-16).unwrap(),
            filter: None,
        })
    }

    /// Sets the lacunarity (volumetric porosity) parameter `A` passed to
    /// the density filter.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrationError::InvalidParameter`] unless `lacunarity`
    /// is finite and positive.
    pub fn with_lacunarity(mut self, lacunarity: T) -> Result<Self, IntegrationError<T>> {
        if !lacunarity.is_finite() || lacunarity <= T::zero() {
            return Err(IntegrationError::invalid(format!(
                "lacunarity must be positive, got {:?}",
                lacunarity
            )));
        }

        self.lacunarity = lacunarity;
        Ok(self)
    }

    /// Attaches a density filter $W(x; \mu, A)$ multiplying the volume
    /// element.
    pub fn with_filter(mut self, filter: Box<dyn DensityFilter<T> + Send + Sync>) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Returns the integration domain.
    pub fn domain(&self) -> &Domain<T> {
        &self.domain
    }

    /// Returns the number of dimensions.
    pub fn dim(&self) -> usize {
        self.domain.dim()
    }

    /// Returns the topological dimension of the support.
    pub fn mu(&self) -> T {
        self.mu
    }

    /// Returns the lacunarity parameter.
    pub fn lacunarity(&self) -> T {
        self.lacunarity
    }

    /// Maps a point of the unit hypercube affinely into the domain.
    pub fn map(&self, u: &[T]) -> Vec<T> {
        debug_assert_eq!(u.len(), self.dim());

        u.iter()
            .zip(self.domain.bounds())
            .map(|(&u, &(low, high))| low + u * (high - low))
            .collect()
    }

    /// Evaluates the fractional volume element $J_\mu$ at a point of the
    /// domain.
    ///
    /// The normalised coordinate of each dimension is clamped to the UV
    /// floor, so the endpoint singularity of $t^{\mu - 1}$ stays finite.
    pub fn density(&self, x: &[T]) -> T {
        debug_assert_eq!(x.len(), self.dim());

        let exponent = self.mu - T::one();

        x.iter()
            .zip(self.domain.bounds())
            .fold(T::one(), |acc, (&x, &(low, high))| {
                let t = ((x - low) / (high - low)).max(self.uv_floor).min(T::one());
                acc * self.mu * t.powf(exponent)
            })
    }

    /// Evaluates the attached density filter at `x`, or one if no filter
    /// is configured.
    pub fn filter_weight(&self, x: &[T]) -> T {
        match &self.filter {
            Some(filter) => filter.weight(x, self.mu, self.lacunarity),
            None => T::one(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    const TOLERANCE: f64 = 1e-12;

    #[test]
    fn gamma_at_integers() {
        assert_approx_eq!(gamma(1.0), 1.0, TOLERANCE);
        assert_approx_eq!(gamma(5.0), 24.0, TOLERANCE);
    }

    #[test]
    fn admittance_and_stiffness() {
        // Gamma(1.5) = sqrt(pi) / 2
        let z: f64 = staircase_admittance(0.5);
        assert_approx_eq!(z, 2.0 / std::f64::consts::PI.sqrt(), TOLERANCE);

        let k: f64 = geometric_stiffness(0.5, 1.0);
        assert_approx_eq!(k, z * z / 0.25, TOLERANCE);
    }

    #[test]
    fn domain_rejects_inverted_bounds() {
        let result = Domain::new(vec![(0.0, 1.0), (2.0, -1.0)]);
        assert!(matches!(
            result,
            Err(IntegrationError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn domain_rejects_empty_bounds() {
        let result = Domain::<f64>::new(vec![]);
        assert!(matches!(
            result,
            Err(IntegrationError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn domain_volume() {
        let domain = Domain::new(vec![(0.0, 2.0), (-1.0, 1.0)]).unwrap();
        assert_approx_eq!(domain.volume(), 4.0, TOLERANCE);
    }

    #[test]
    fn measure_rejects_mu_outside_open_interval() {
        let domain = Domain::new(vec![(0.0, 1.0)]).unwrap();
        assert!(FractalMeasure::new(domain.clone(), 0.0).is_err());
        assert!(FractalMeasure::new(domain.clone(), 1.0).is_err());
        assert!(FractalMeasure::new(domain, 0.757).is_ok());
    }

    #[test]
    fn map_is_affine() {
        let domain = Domain::new(vec![(1.0, 3.0), (0.0, 10.0)]).unwrap();
        let measure = FractalMeasure::new(domain, 0.757).unwrap();
        let x = measure.map(&[0.5, 0.1]);
        assert_approx_eq!(x[0], 2.0, TOLERANCE);
        assert_approx_eq!(x[1], 1.0, TOLERANCE);
    }

    #[test]
    fn density_approaches_euclidean_limit() {
        let domain = Domain::new(vec![(0.0, 1.0), (0.0, 1.0)]).unwrap();
        let measure = FractalMeasure::new(domain, 1.0 - 1e-12).unwrap();
        assert_approx_eq!(measure.density(&[0.3, 0.8]), 1.0, 1e-9);
    }

    #[test]
    fn density_is_finite_at_the_lower_bound() {
        let domain = Domain::new(vec![(0.0, 1.0)]).unwrap();
        let measure = FractalMeasure::new(domain, 0.757).unwrap();
        assert!(measure.density(&[0.0]).is_finite());
    }

    #[test]
    fn filter_defaults_to_unity() {
        let domain = Domain::new(vec![(0.0, 1.0)]).unwrap();
        let measure = FractalMeasure::new(domain, 0.757).unwrap();
        assert_approx_eq!(measure.filter_weight(&[0.5]), 1.0, TOLERANCE);
    }

    #[test]
    fn filter_receives_measure_parameters() {
        let domain = Domain::new(vec![(0.0, 1.0)]).unwrap();
        let measure = FractalMeasure::new(domain, 0.757)
            .unwrap()
            .with_lacunarity(0.5)
            .unwrap()
            .with_filter(Box::new(|_: &[f64], mu: f64, a: f64| mu * a));
        assert_approx_eq!(measure.filter_weight(&[0.5]), 0.757 * 0.5, TOLERANCE);
    }
}
