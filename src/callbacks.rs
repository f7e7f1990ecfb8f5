//! Implementation of different callback functions.
use crate::core::estimators::{Estimators, FinalEstimate, MeanVar};
use crate::core::Checkpoint;
use num_traits::{Float, FromPrimitive};
use serde::Serialize;
use std::fmt::Display;
use std::ops::AddAssign;
use std::path::{Path, PathBuf};

/// Trait for implementing callbacks for iterative MC algorithms
pub trait Callback<T, R, E>
where
    T: Copy,
{
    /// This method is called after each successfully finished iteration and may print information
    /// about it.
    fn print(&self, chkpts: &[Checkpoint<T, R, E>]);
}

/// A callback function that does nothing
pub struct SinkCallback {}

impl<T, R, E> Callback<T, R, E> for SinkCallback
where
    T: Copy,
{
    fn print(&self, _: &[Checkpoint<T, R, E>]) {}
}

/// A callback function that prints the result of each individual iteration
pub struct SimpleCallback {}

impl<T, R, E> Callback<T, R, E> for SimpleCallback
where
    T: AddAssign + Display + Float + FromPrimitive,
    E: Estimators<T>,
{
    fn print(&self, chkpts: &[Checkpoint<T, R, E>]) {
        let iteration = chkpts.len();
        // Make sure that there is at least one checkpoint
        // otherwise do nothing.
        if let Some(chkpt) = chkpts.last() {
            let estimators = chkpt.estimators();
            println!("iteration {} finished.", iteration - 1);
            println!(
                "this iteration: N={} E={} \u{b1} {}",
                estimators.calls(),
                estimators.mean(),
                estimators.std()
            );
        }
    }
}

/// Simple cumulative callback that shows the result of the individual iteration
/// together with the inverse-variance weighted combination of all iterations
/// so far.
pub struct SimpleCumulativeCallback {}

impl<T, R, E> Callback<T, R, E> for SimpleCumulativeCallback
where
    T: AddAssign + Display + Float + FromPrimitive,
    E: Estimators<T>,
{
    fn print(&self, chkpts: &[Checkpoint<T, R, E>]) {
        let iteration = chkpts.len();

        if iteration == 0 {
            return;
        }

        let estimators = chkpts[iteration - 1].estimators();

        let history = chkpts
            .iter()
            .map(|c| MeanVar::new(c.estimators().mean(), c.estimators().var()))
            .collect::<Vec<_>>();
        let cumulative = FinalEstimate::combine(&history, false);

        println!(
            "[iteration {}: N={} E={} \u{b1} {}] [cumulative: E={} \u{b1} {}, chi^2/dof={}]",
            iteration - 1,
            estimators.calls(),
            estimators.mean(),
            estimators.std(),
            cumulative.mean(),
            cumulative.std_error(),
            cumulative.chi_sq_per_dof()
        );
    }
}

/// A callback that serializes the checkpoint sequence to a JSON file
/// after every iteration, overwriting the previous state. The file can
/// be deserialized into a checkpoint vector to resume or replay the
/// integration.
pub struct FileWriterCallback {
    path: PathBuf,
}

impl FileWriterCallback {
    /// Creates a callback writing to `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl<T, R, E> Callback<T, R, E> for FileWriterCallback
where
    T: Copy + Serialize,
    R: Serialize,
    E: Serialize,
{
    fn print(&self, chkpts: &[Checkpoint<T, R, E>]) {
        let serialized = match serde_json::to_string(chkpts) {
            Ok(serialized) => serialized,
            Err(error) => {
                log::error!("unable to serialize checkpoints: {}", error);
                return;
            }
        };

        if let Err(error) = std::fs::write(&self.path, serialized) {
            log::error!(
                "unable to write checkpoints to {}: {}",
                self.path.display(),
                error
            );
        }
    }
}
