use std::fmt;

/// Diagnostic attached to the result of an iterative solver
///
/// Running out of iterations is not an error: the last iterate is still returned and
/// `converged` is left `false`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Convergence {
    /// Number of iterations performed
    pub iterations: usize,
    /// Value of the stopping criterion at the last check
    pub error: f64,
    /// Whether the stopping criterion was met before the iteration cap
    pub converged: bool,
}

impl Convergence {
    pub(crate) fn new(iterations: usize, error: f64, converged: bool) -> Self {
        Self {
            iterations,
            error,
            converged,
        }
    }

    /// Emits the standard warning when the iteration cap was hit
    pub(crate) fn warn_if_stalled(&self, solver: &str) {
        if !self.converged {
            log::warn!(
                "{}: stopped after {} iterations without reaching the threshold (err = {:e})",
                solver,
                self.iterations,
                self.error
            );
        }
    }
}

impl fmt::Display for Convergence {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.converged {
            write!(f, "converged after {} iterations (err = {:e})", self.iterations, self.error)
        } else {
            write!(f, "max iterations ({}) reached (err = {:e})", self.iterations, self.error)
        }
    }
}

/// Iteration settings shared by the entropic and barycentric solvers
#[derive(Debug, Clone, Copy)]
pub(crate) struct StopCriteria {
    pub max_iter: usize,
    pub threshold: f64,
    pub verbose: bool,
}

impl StopCriteria {
    pub(crate) fn new(max_iter: Option<usize>, threshold: Option<f64>, default_threshold: f64) -> Self {
        Self {
            max_iter: max_iter.unwrap_or(1000),
            threshold: threshold.unwrap_or(default_threshold),
            verbose: false,
        }
    }

    /// Logs one convergence check, at info level when verbose
    pub(crate) fn report(&self, solver: &str, iteration: usize, err: f64) {
        if self.verbose {
            log::info!("{}: {:5}|{:8e}", solver, iteration, err);
        } else {
            log::debug!("{}: {:5}|{:8e}", solver, iteration, err);
        }
    }
}
