//! Error types shared by all integrators.

use crate::core::estimators::MeanVar;
use thiserror::Error;

/// The reason an integration was aborted as diverging.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum DivergenceKind {
    /// An iteration produced a non-finite mean or variance, or the
    /// combined estimate itself became non-finite.
    #[error("non-finite estimate")]
    NonFiniteEstimate,

    /// Too many integrand evaluations had to be discarded.
    #[error("discard rate {rate} exceeded the configured limit {limit}")]
    ExcessiveDiscards {
        /// Fraction of calls discarded during the offending iteration.
        rate: f64,
        /// The configured `max_discard_ratio`.
        limit: f64,
    },

    /// The iteration variance grew monotonically over the configured
    /// number of consecutive iterations.
    #[error("variance grew over {0} consecutive iterations")]
    VarianceGrowth(usize),
}

/// Errors produced by the integration routines.
///
/// Exhausting the iteration budget is *not* an error; it is reported
/// through [`FinalEstimate::converged`](crate::core::estimators::FinalEstimate::converged),
/// which callers must check before trusting a result.
#[derive(Debug, Error)]
pub enum IntegrationError<T: std::fmt::Debug> {
    /// A configuration, domain or measure parameter failed eager
    /// validation. No samples have been drawn.
    #[error("invalid parameter: {reason}")]
    InvalidParameter {
        /// Human-readable description of the rejected parameter.
        reason: String,
    },

    /// The integration diverged. The iteration history accumulated up to
    /// the point of failure is attached for diagnosis.
    #[error("integration diverged ({kind}) after {} completed iterations", .history.len())]
    Diverged {
        /// What triggered the abort.
        kind: DivergenceKind,
        /// Per-iteration estimates recorded before the abort, the
        /// offending iteration included.
        history: Vec<MeanVar<T>>,
    },
}

impl<T: std::fmt::Debug> IntegrationError<T> {
    /// Shorthand used by the eager validation paths.
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            reason: reason.into(),
        }
    }
}
