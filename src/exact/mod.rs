pub mod emd_1d;
mod simplex;
mod utils;

use std::fmt;

use ndarray::prelude::*;

use crate::utils::{check_cost, check_dimensions, check_histogram, check_mass, transport_cost, weights_or_uniform};
use crate::{OTError, OTSolver};
use simplex::network_simplex;

pub use emd_1d::{emd2_1d, emd_1d, EarthMovers1D};
pub use utils::center_ot_dual;

/// Termination state of the network simplex
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimplexStatus {
    /// Every reduced cost is non-negative, the plan and potentials are optimal
    Optimal,
    /// The pivot budget ran out, the plan is feasible but may not be optimal
    MaxIterReached,
}

impl fmt::Display for SimplexStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SimplexStatus::Optimal => write!(f, "Optimal solution found!"),
            SimplexStatus::MaxIterReached => write!(f, "Max iteration reached!"),
        }
    }
}

/// Primal and dual solution of the exact transport problem
#[derive(Debug, Clone)]
pub struct ExactSolution {
    pub plan: Array2<f64>,
    /// ⟨plan, M⟩
    pub cost: f64,
    /// Source dual potential
    pub alpha: Array1<f64>,
    /// Target dual potential
    pub beta: Array1<f64>,
    pub status: SimplexStatus,
    /// Number of pivots performed
    pub iterations: usize,
}

/// Solves the exact optimal transport problem with the network simplex
/// source_weights: Weights on samples from the source distribution (uniform if empty)
/// target_weights: Weights on samples from the target distribution (uniform if empty)
/// cost: Distance between samples in the source and target distributions
/// max_iter: maximum number of pivots (default = 100000)
/// center_dual: If true, centers the dual potentials (default = true)
pub struct EarthMovers<'a> {
    source_weights: &'a Array1<f64>,
    target_weights: &'a Array1<f64>,
    cost: &'a Array2<f64>,
    max_iter: usize,
    center_dual: bool,
}

impl<'a> EarthMovers<'a> {
    pub fn new(source_weights: &'a Array1<f64>, target_weights: &'a Array1<f64>, cost: &'a Array2<f64>) -> Self {
        Self {
            source_weights,
            target_weights,
            cost,
            max_iter: 100000,
            center_dual: true,
        }
    }

    pub fn iterations<'b>(&'b mut self, max_iter: usize) -> &'b mut Self {
        self.max_iter = max_iter;
        self
    }

    pub fn center_dual<'b>(&'b mut self, center: bool) -> &'b mut Self {
        self.center_dual = center;
        self
    }
}

impl<'a> OTSolver for EarthMovers<'a> {
    type Solution = ExactSolution;

    fn check_shape(&self) -> Result<(), OTError> {
        check_dimensions(
            self.source_weights.len(),
            self.target_weights.len(),
            self.cost.shape(),
        )
    }

    fn solve(&self) -> Result<ExactSolution, OTError> {
        let (dim_a, dim_b) = self.cost.dim();
        let a = weights_or_uniform(self.source_weights, dim_a);
        let mut b = weights_or_uniform(self.target_weights, dim_b);

        check_dimensions(a.len(), b.len(), self.cost.shape())?;
        check_cost(self.cost)?;

        let mass_a = check_histogram(&a, "Source weights")?;
        let mass_b = check_histogram(&b, "Target weights")?;
        check_mass(mass_a, mass_b)?;

        b *= mass_a / mass_b;

        let result = network_simplex(&a, &b, self.cost, self.max_iter);

        if result.status == SimplexStatus::MaxIterReached {
            log::warn!(
                "emd: num_iter_max ({}) reached before optimality. Try to increase num_iter_max",
                self.max_iter
            );
        }

        let (alpha, beta) = if self.center_dual {
            center_ot_dual(&result.alpha, &result.beta, Some(&a), Some(&b))
        } else {
            (result.alpha, result.beta)
        };

        let cost = transport_cost(&result.plan, self.cost);

        Ok(ExactSolution {
            plan: result.plan,
            cost,
            alpha,
            beta,
            status: result.status,
            iterations: result.iterations,
        })
    }
}

/// Solves the exact optimal transport problem and returns the OT matrix
/// a: Source sample weights (defaults to uniform weight if empty)
/// b: Target sample weights (defaults to uniform weight if empty)
/// M: Loss matrix (row-major)
/// num_iter_max: maximum number of iterations before stopping the optimization algorithm if it has
/// not converged (default = 100000)
/// center_dual: If True, centers the dual potential using function (default = false)
#[allow(non_snake_case)]
pub fn emd(
    a: &Array1<f64>,
    b: &Array1<f64>,
    M: &Array2<f64>,
    num_iter_max: Option<usize>,
    center_dual: Option<bool>,
) -> Result<Array2<f64>, OTError> {
    Ok(configured(EarthMovers::new(a, b, M), num_iter_max, center_dual).solve()?.plan)
}

/// Solves the exact optimal transport problem and returns the loss ⟨γ, M⟩
#[allow(non_snake_case)]
pub fn emd2(
    a: &Array1<f64>,
    b: &Array1<f64>,
    M: &Array2<f64>,
    num_iter_max: Option<usize>,
    center_dual: Option<bool>,
) -> Result<f64, OTError> {
    Ok(configured(EarthMovers::new(a, b, M), num_iter_max, center_dual).solve()?.cost)
}

fn configured<'a>(
    mut solver: EarthMovers<'a>,
    num_iter_max: Option<usize>,
    center_dual: Option<bool>,
) -> EarthMovers<'a> {
    solver
        .iterations(num_iter_max.unwrap_or(100000))
        .center_dual(center_dual.unwrap_or(false));
    solver
}

#[cfg(test)]
mod tests {

    use ndarray::prelude::*;
    use ndarray_rand::rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::{EarthMovers, SimplexStatus};
    use crate::utils::random_histograms;
    use crate::{OTError, OTSolver};

    #[allow(non_snake_case)]
    #[test]
    fn test_emd() {
        let a = array![0.5, 0.5];
        let b = array![0.5, 0.5];
        let M = array![[0.0, 1.0], [1.0, 0.0]];

        let gamma = match super::emd(&a, &b, &M, None, None) {
            Ok(result) => result,
            Err(error) => panic!("{:?}", error),
        };

        let truth = array![[0.5, 0.0], [0.0, 0.5]];

        assert_eq!(gamma, truth);
    }

    #[allow(non_snake_case)]
    #[test]
    fn test_EarthMovers() {
        let a = array![0.5, 0.5];
        let b = array![0.5, 0.5];
        let M = array![[0.0, 1.0], [1.0, 0.0]];

        let test = match EarthMovers::new(&a, &b, &M).solve() {
            Ok(result) => result,
            Err(error) => panic!("{:?}", error),
        };

        let truth = array![[0.5, 0.0], [0.0, 0.5]];

        assert_eq!(test.plan, truth);
        assert_eq!(test.status, SimplexStatus::Optimal);
        assert_eq!(test.cost, 0.);
    }

    #[allow(non_snake_case)]
    #[test]
    fn test_emd_point_mass_target() {
        let a = array![0.5, 0.2, 0.3];
        let b = array![0., 1.];
        let M = array![[0., 1.], [2., 0.], [0.5, 1.5]];

        let plan = super::emd(&a, &b, &M, None, None).unwrap();
        let truth = array![[0., 0.5], [0., 0.2], [0., 0.3]];
        assert!(plan.abs_diff_eq(&truth, 1E-12));

        let cost = super::emd2(&a, &b, &M, None, None).unwrap();
        assert!((cost - 0.95).abs() < 1E-12);
    }

    #[allow(non_snake_case)]
    #[test]
    fn test_emd_marginals_and_duality() {
        let mut rng = StdRng::seed_from_u64(7);
        let hists = random_histograms(6, 2, &mut rng);
        let a = hists.column(0).to_owned();
        let b = hists.column(1).to_owned();
        let M = Array2::from_shape_fn((6, 6), |(i, j)| ((i as f64) - (j as f64)).powi(2) + 0.1 * ((i * j) % 3) as f64);

        let solution = EarthMovers::new(&a, &b, &M).solve().unwrap();
        assert_eq!(solution.status, SimplexStatus::Optimal);

        let plan = &solution.plan;
        assert!(plan.iter().all(|&g| g >= 0.));
        assert!(plan.sum_axis(Axis(1)).abs_diff_eq(&a, 1E-12));
        assert!(plan.sum_axis(Axis(0)).abs_diff_eq(&b, 1E-12));

        // strong duality
        let dual = a.dot(&solution.alpha) + b.dot(&solution.beta);
        assert!((dual - solution.cost).abs() < 1E-10);

        // centered potentials
        assert!((a.dot(&solution.alpha) - b.dot(&solution.beta)).abs() < 1E-10);
    }

    #[allow(non_snake_case)]
    #[test]
    fn test_emd_rescales_target_mass() {
        let a = array![0.5, 0.5];
        let b = array![0.5 + 1E-8, 0.5];
        let M = array![[0.0, 1.0], [1.0, 0.0]];

        let plan = super::emd(&a, &b, &M, None, None).unwrap();
        assert!((plan.sum() - 1.).abs() < 1E-12);
    }

    #[allow(non_snake_case)]
    #[test]
    fn test_emd_rejects_bad_input() {
        let a = array![0.5, 0.5];
        let M = array![[0.0, 1.0], [1.0, 0.0]];

        let short = array![1.0];
        assert!(matches!(
            super::emd(&a, &short, &M, None, None),
            Err(OTError::WeightDimensionError { .. })
        ));

        let heavy = array![1.0, 1.0];
        assert!(matches!(
            super::emd(&a, &heavy, &M, None, None),
            Err(OTError::HistogramSumError { .. })
        ));

        let negative = array![1.5, -0.5];
        assert!(matches!(
            super::emd(&a, &negative, &M, None, None),
            Err(OTError::ArgError(_))
        ));
    }

    #[allow(non_snake_case)]
    #[test]
    fn test_emd_iteration_cap_is_not_fatal() {
        let a = array![0.25, 0.25, 0.25, 0.25];
        let M = array![
            [4., 3., 2., 0.],
            [3., 2., 0., 2.],
            [2., 0., 2., 3.],
            [0., 2., 3., 4.]
        ];

        let solution = EarthMovers::new(&a, &a, &M).iterations(1).solve().unwrap();

        assert_eq!(solution.status, SimplexStatus::MaxIterReached);
        assert!(solution.plan.sum_axis(Axis(1)).abs_diff_eq(&a, 1E-12));
        assert!(solution.cost > 0.);
    }
}
