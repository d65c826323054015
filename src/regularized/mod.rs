pub mod kernel;
pub mod sinkhorn;
pub mod sinkhorn_log;

use ndarray::prelude::*;

use crate::convergence::StopCriteria;
use crate::utils::{check_cost, check_dimensions, check_histogram, check_mass, check_positive, uniform};
use crate::{Convergence, OTError, OTSolver};
use kernel::LogGibbsKernel;

pub use sinkhorn::sinkhorn_knopp;
pub use sinkhorn_log::sinkhorn_log;

/// Numerical scheme used for the Sinkhorn scaling iterations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkhornMethod {
    /// Scaling on the Gibbs kernel exp(-M/reg). Falls back to SinkhornLog when the kernel
    /// under/overflows.
    Sinkhorn,
    /// Scaling carried out on log(u), log(v) with log-sum-exp reductions
    SinkhornLog,
}

impl Default for SinkhornMethod {
    fn default() -> Self {
        SinkhornMethod::SinkhornLog
    }
}

/// How the scaling loop measures progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StopRule {
    /// l1 violation of the source marginal, for balanced problems
    MarginalViolation,
    /// Change between successive scalings, for unbalanced problems
    IterateChange,
}

/// One scaling problem, possibly batched over the columns of b
pub(crate) struct ScalingProblem<'a> {
    pub name: &'static str,
    pub a: ArrayView1<'a, f64>,
    pub b: ArrayView2<'a, f64>,
    pub cost: &'a Array2<f64>,
    pub reg: f64,
    /// Exponent of the scaling updates: 1 for balanced, reg_m / (reg_m + reg) for unbalanced
    pub fi: f64,
    pub rule: StopRule,
}

/// Scaling vectors (log-domain, one column per target) at the last iterate
pub(crate) struct Scalings {
    pub log_u: Array2<f64>,
    pub log_v: Array2<f64>,
    pub convergence: Convergence,
}

/// Runs the scaling iterations with the requested method
pub(crate) fn run_scaling(
    problem: &ScalingProblem,
    method: SinkhornMethod,
    criteria: &StopCriteria,
) -> Scalings {
    let scalings = match method {
        SinkhornMethod::Sinkhorn => match sinkhorn::plain_scaling(problem, criteria) {
            Some(scalings) => scalings,
            None => {
                log::warn!(
                    "{}: numerical errors in the Gibbs kernel at reg = {:e}, switching to log-domain iterations",
                    problem.name,
                    problem.reg
                );
                sinkhorn_log::log_scaling(problem, criteria)
            }
        },
        SinkhornMethod::SinkhornLog => sinkhorn_log::log_scaling(problem, criteria),
    };

    scalings.convergence.warn_if_stalled(problem.name);

    scalings
}

/// Result of an entropic transport solve
#[derive(Debug, Clone)]
pub struct SinkhornSolution {
    /// Transport plan, only materialized when a single target histogram was given
    pub plan: Option<Array2<f64>>,
    /// ⟨plan_k, M⟩ for each target histogram k
    pub costs: Array1<f64>,
    /// log of the source scalings, one column per target
    pub log_u: Array2<f64>,
    /// log of the target scalings, one column per target
    pub log_v: Array2<f64>,
    pub convergence: Convergence,
}

impl SinkhornSolution {
    #[allow(non_snake_case)]
    pub(crate) fn from_scalings(scalings: Scalings, M: &Array2<f64>, reg: f64) -> Self {
        let kernel = LogGibbsKernel::new(M, reg);
        let costs = kernel.costs(scalings.log_u.view(), scalings.log_v.view(), M);

        let plan = if scalings.log_u.ncols() == 1 {
            Some(kernel.plan(scalings.log_u.column(0), scalings.log_v.column(0)))
        } else {
            None
        };

        Self {
            plan,
            costs,
            log_u: scalings.log_u,
            log_v: scalings.log_v,
            convergence: scalings.convergence,
        }
    }

    /// Cost of the first (or only) target
    pub fn cost(&self) -> f64 {
        self.costs[0]
    }
}

/// Solves the entropic regularization optimal transport problem and returns the OT matrix
/// source_weights: Weights on samples from the source distribution
/// target_weights: Weights on samples from the target distribution, one histogram per column
/// cost: Distance between samples in the source and target distributions
/// reg: Entropy regularization term > 0
/// max_iter: Max number of iterations (default = 1000)
/// threshold: Error convergence threshold (> 0) (default = 1E-9)
/// method: Plain or log-domain scaling (default = SinkhornLog)
/// verbose: Log every convergence check at info level
pub struct SinkhornKnopp<'a> {
    source_weights: &'a Array1<f64>,
    target_weights: ArrayView2<'a, f64>,
    cost: &'a Array2<f64>,
    reg: f64,
    max_iter: usize,
    threshold: f64,
    method: SinkhornMethod,
    verbose: bool,
}

impl<'a> SinkhornKnopp<'a> {
    pub fn new(
        source_weights: &'a Array1<f64>,
        target_weights: &'a Array1<f64>,
        cost: &'a Array2<f64>,
        reg: f64,
    ) -> Self {
        Self::batched_view(source_weights, target_weights.view().insert_axis(Axis(1)), cost, reg)
    }

    /// Solves against every column of target_weights at once
    pub fn batched(
        source_weights: &'a Array1<f64>,
        target_weights: &'a Array2<f64>,
        cost: &'a Array2<f64>,
        reg: f64,
    ) -> Self {
        Self::batched_view(source_weights, target_weights.view(), cost, reg)
    }

    fn batched_view(
        source_weights: &'a Array1<f64>,
        target_weights: ArrayView2<'a, f64>,
        cost: &'a Array2<f64>,
        reg: f64,
    ) -> Self {
        Self {
            source_weights,
            target_weights,
            cost,
            reg,
            max_iter: 1000,
            threshold: 1E-9,
            method: SinkhornMethod::default(),
            verbose: false,
        }
    }

    pub fn iterations<'b>(&'b mut self, max_iter: usize) -> &'b mut Self {
        self.max_iter = max_iter;
        self
    }

    pub fn threshold<'b>(&'b mut self, threshold: f64) -> &'b mut Self {
        self.threshold = threshold;
        self
    }

    pub fn reg<'b>(&'b mut self, reg: f64) -> &'b mut Self {
        self.reg = reg;
        self
    }

    pub fn method<'b>(&'b mut self, method: SinkhornMethod) -> &'b mut Self {
        self.method = method;
        self
    }

    pub fn verbose<'b>(&'b mut self, verbose: bool) -> &'b mut Self {
        self.verbose = verbose;
        self
    }
}

impl<'a> OTSolver for SinkhornKnopp<'a> {
    type Solution = SinkhornSolution;

    fn check_shape(&self) -> Result<(), OTError> {
        check_dimensions(
            self.source_weights.len(),
            self.target_weights.nrows(),
            self.cost.shape(),
        )
    }

    fn solve(&self) -> Result<SinkhornSolution, OTError> {
        let (a, b) = marginals_or_uniform(self.source_weights, self.target_weights, self.cost);
        check_dimensions(a.len(), b.nrows(), self.cost.shape())?;
        check_positive(self.reg, "Regularization term")?;
        check_cost(self.cost)?;

        let mass_a = check_histogram(&a, "Source weights")?;
        for col in b.columns() {
            let mass_b = check_histogram(&col, "Target weights")?;
            check_mass(mass_a, mass_b)?;
        }

        let problem = ScalingProblem {
            name: "sinkhorn",
            a: a.view(),
            b: b.view(),
            cost: self.cost,
            reg: self.reg,
            fi: 1.,
            rule: StopRule::MarginalViolation,
        };

        let mut criteria = StopCriteria::new(Some(self.max_iter), Some(self.threshold), 1E-9);
        criteria.verbose = self.verbose;

        let scalings = run_scaling(&problem, self.method, &criteria);

        Ok(SinkhornSolution::from_scalings(scalings, self.cost, self.reg))
    }
}

/// Substitutes uniform weights for empty source or target histograms
pub(crate) fn marginals_or_uniform(
    a: &Array1<f64>,
    b: ArrayView2<f64>,
    cost: &Array2<f64>,
) -> (Array1<f64>, Array2<f64>) {
    let (dim_a, dim_b) = cost.dim();

    let a = if a.is_empty() { uniform(dim_a) } else { a.clone() };
    let b = if b.is_empty() {
        uniform(dim_b).insert_axis(Axis(1))
    } else {
        b.to_owned()
    };

    (a, b)
}

/// Solves the entropic regularization optimal transport problem and returns the OT matrix
/// a: Source sample weights (defaults to uniform weight if empty)
/// b: Target sample weights (defaults to uniform weight if empty)
/// M: Loss matrix
/// reg: Entropy regularization term > 0
/// method: Plain or log-domain scaling (default = SinkhornLog)
/// num_iter_max: Max number of iterations (default = 1000)
/// stop_threshold: Stop threshold on error (> 0) (default = 1E-9)
#[allow(non_snake_case)]
pub fn sinkhorn(
    a: &Array1<f64>,
    b: &Array1<f64>,
    M: &Array2<f64>,
    reg: f64,
    method: Option<SinkhornMethod>,
    num_iter_max: Option<usize>,
    stop_threshold: Option<f64>,
) -> Result<Array2<f64>, OTError> {
    let solution = configured(SinkhornKnopp::new(a, b, M, reg), method, num_iter_max, stop_threshold)
        .solve()?;

    solution
        .plan
        .ok_or_else(|| OTError::Other(anyhow::anyhow!("single target solve produced no plan")))
}

/// Solves the entropic regularization optimal transport problem and returns the loss ⟨γ, M⟩
#[allow(non_snake_case)]
pub fn sinkhorn2(
    a: &Array1<f64>,
    b: &Array1<f64>,
    M: &Array2<f64>,
    reg: f64,
    method: Option<SinkhornMethod>,
    num_iter_max: Option<usize>,
    stop_threshold: Option<f64>,
) -> Result<f64, OTError> {
    let solution = configured(SinkhornKnopp::new(a, b, M, reg), method, num_iter_max, stop_threshold)
        .solve()?;

    Ok(solution.cost())
}

/// Same as sinkhorn2 for several target histograms (columns of b), returning one loss per column
#[allow(non_snake_case)]
pub fn sinkhorn2_batched(
    a: &Array1<f64>,
    b: &Array2<f64>,
    M: &Array2<f64>,
    reg: f64,
    method: Option<SinkhornMethod>,
    num_iter_max: Option<usize>,
    stop_threshold: Option<f64>,
) -> Result<Array1<f64>, OTError> {
    let solution = configured(SinkhornKnopp::batched(a, b, M, reg), method, num_iter_max, stop_threshold)
        .solve()?;

    Ok(solution.costs)
}

fn configured<'a>(
    mut solver: SinkhornKnopp<'a>,
    method: Option<SinkhornMethod>,
    num_iter_max: Option<usize>,
    stop_threshold: Option<f64>,
) -> SinkhornKnopp<'a> {
    if let Some(method) = method {
        solver.method(method);
    }
    if let Some(iterations) = num_iter_max {
        solver.iterations(iterations);
    }
    if let Some(threshold) = stop_threshold {
        solver.threshold(threshold);
    }
    solver
}

#[cfg(test)]
mod tests {

    use ndarray::prelude::*;

    use super::{SinkhornKnopp, SinkhornMethod};
    use crate::{OTError, OTSolver};

    #[test]
    fn test_sinkhorn_builder() {
        let a = array![0.5, 0.5];
        let b = array![0.5, 0.5];
        let reg = 1.0;
        let m = array![[0.0, 1.0], [1.0, 0.0]];

        let result = match SinkhornKnopp::new(&a, &b, &m, reg).solve() {
            Ok(result) => result,
            Err(error) => panic!("{:?}", error),
        };

        let truth = array![[0.36552929, 0.13447071], [0.13447071, 0.36552929]];

        assert!(result.plan.unwrap().relative_eq(&truth, 1E-6, 1E-2));
        assert!(result.convergence.converged);
    }

    #[test]
    fn test_sinkhorn_methods_agree() {
        let a = array![0.1, 0.4, 0.3, 0.2];
        let b = array![0.25, 0.25, 0.3, 0.2];
        let m = array![
            [0.3, 0.9, 0.2, 0.7],
            [0.6, 0.1, 0.8, 0.4],
            [0.5, 0.7, 0.3, 0.9],
            [0.2, 0.4, 0.6, 0.1]
        ];

        let plain = SinkhornKnopp::new(&a, &b, &m, 0.1)
            .method(SinkhornMethod::Sinkhorn)
            .solve()
            .unwrap();
        let log = SinkhornKnopp::new(&a, &b, &m, 0.1)
            .method(SinkhornMethod::SinkhornLog)
            .solve()
            .unwrap();

        assert!((plain.cost() - 0.253069471486486).abs() < 1E-7);
        assert!(plain.plan.unwrap().abs_diff_eq(&log.plan.unwrap(), 1E-8));
    }

    #[test]
    fn test_sinkhorn_empty_weights_are_uniform() {
        let empty = Array1::<f64>::zeros(0);
        let m = array![[0.0, 1.0], [1.0, 0.0]];

        let plan = super::sinkhorn(&empty, &empty, &m, 1.0, None, None, None).unwrap();

        let truth = array![[0.36552929, 0.13447071], [0.13447071, 0.36552929]];
        assert!(plan.relative_eq(&truth, 1E-6, 1E-2));
    }

    #[test]
    fn test_sinkhorn_rejects_bad_input() {
        let a = array![0.5, 0.5];
        let b = array![0.5, 0.5];
        let m = array![[0.0, 1.0], [1.0, 0.0]];

        let short = array![1.0];
        assert!(matches!(
            SinkhornKnopp::new(&a, &short, &m, 1.0).solve(),
            Err(OTError::WeightDimensionError { .. })
        ));
        assert!(SinkhornKnopp::new(&a, &short, &m, 1.0).check_shape().is_err());

        assert!(matches!(
            SinkhornKnopp::new(&a, &b, &m, 0.0).solve(),
            Err(OTError::ArgError(_))
        ));

        let heavy = array![1.0, 1.0];
        assert!(matches!(
            SinkhornKnopp::new(&a, &heavy, &m, 1.0).solve(),
            Err(OTError::HistogramSumError { .. })
        ));
    }

    #[test]
    fn test_sinkhorn_reports_non_convergence() {
        let a = array![0.1, 0.4, 0.3, 0.2];
        let b = array![0.25, 0.25, 0.3, 0.2];
        let m = array![
            [0.3, 0.9, 0.2, 0.7],
            [0.6, 0.1, 0.8, 0.4],
            [0.5, 0.7, 0.3, 0.9],
            [0.2, 0.4, 0.6, 0.1]
        ];

        let solution = SinkhornKnopp::new(&a, &b, &m, 0.01)
            .iterations(3)
            .solve()
            .unwrap();

        assert!(!solution.convergence.converged);
        assert_eq!(solution.convergence.iterations, 3);
        assert!(solution.plan.is_some());
    }
}
