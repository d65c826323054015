mod convergence;
mod error;
pub mod barycenter;
pub mod exact;
pub mod metrics;
pub mod ndarray_logical;
pub mod regularized;
pub mod unbalanced;
pub mod utils;
pub mod prelude;

pub use convergence::Convergence;
pub use error::OTError;

/// Common interface of the builder-style solvers
pub trait OTSolver {
    type Solution;

    /// Ensures dimensions of the inputs are consistent with the cost matrix
    fn check_shape(&self) -> Result<(), OTError>;

    fn solve(&self) -> Result<Self::Solution, OTError>;
}
