use ndarray::prelude::*;

use crate::convergence::StopCriteria;
use crate::regularized::{
    marginals_or_uniform, run_scaling, ScalingProblem, SinkhornMethod, SinkhornSolution, StopRule,
};
use crate::utils::{check_cost, check_dimensions, check_histogram, check_positive};
use crate::{OTError, OTSolver};

/// Solves the unbalanced entropic regularization optimal transport problem using the
/// Sinkhorn-Knopp algorithm. The marginal constraints are replaced by KL penalties weighted
/// by reg_m, so source and target masses may differ.
/// source_weights: Weights on samples from the source distribution
/// target_weights: Weights on samples from the target distribution, one histogram per column
/// cost: Distance between samples in the source and target distributions
/// reg: Entropy regularization term > 0
/// reg_m: Marginal relaxation term > 0
/// max_iter: Max number of iterations (default = 1000)
/// threshold: Error convergence threshold (> 0) (default = 1E-9)
/// method: Plain or log-domain scaling (default = SinkhornLog)
pub struct SinkhornKnoppUnbalanced<'a> {
    source_weights: &'a Array1<f64>,
    target_weights: ArrayView2<'a, f64>,
    cost: &'a Array2<f64>,
    reg: f64,
    reg_m: f64,
    max_iter: usize,
    threshold: f64,
    method: SinkhornMethod,
    verbose: bool,
}

impl<'a> SinkhornKnoppUnbalanced<'a> {
    pub fn new(
        source_weights: &'a Array1<f64>,
        target_weights: &'a Array1<f64>,
        cost: &'a Array2<f64>,
        reg: f64,
        reg_m: f64,
    ) -> Self {
        Self::batched_view(
            source_weights,
            target_weights.view().insert_axis(Axis(1)),
            cost,
            reg,
            reg_m,
        )
    }

    /// Solves against every column of target_weights at once
    pub fn batched(
        source_weights: &'a Array1<f64>,
        target_weights: &'a Array2<f64>,
        cost: &'a Array2<f64>,
        reg: f64,
        reg_m: f64,
    ) -> Self {
        Self::batched_view(source_weights, target_weights.view(), cost, reg, reg_m)
    }

    fn batched_view(
        source_weights: &'a Array1<f64>,
        target_weights: ArrayView2<'a, f64>,
        cost: &'a Array2<f64>,
        reg: f64,
        reg_m: f64,
    ) -> Self {
        Self {
            source_weights,
            target_weights,
            cost,
            reg,
            reg_m,
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

    pub fn reg_m<'b>(&'b mut self, reg_m: f64) -> &'b mut Self {
        self.reg_m = reg_m;
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

impl<'a> OTSolver for SinkhornKnoppUnbalanced<'a> {
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
        check_positive(self.reg_m, "Marginal regularization term")?;
        check_cost(self.cost)?;

        check_histogram(&a, "Source weights")?;
        for col in b.columns() {
            check_histogram(&col, "Target weights")?;
        }

        let problem = ScalingProblem {
            name: "sinkhorn_unbalanced",
            a: a.view(),
            b: b.view(),
            cost: self.cost,
            reg: self.reg,
            fi: self.reg_m / (self.reg_m + self.reg),
            rule: StopRule::IterateChange,
        };

        let mut criteria = StopCriteria::new(Some(self.max_iter), Some(self.threshold), 1E-9);
        criteria.verbose = self.verbose;

        let scalings = run_scaling(&problem, self.method, &criteria);

        Ok(SinkhornSolution::from_scalings(scalings, self.cost, self.reg))
    }
}

fn configured<'a>(
    mut solver: SinkhornKnoppUnbalanced<'a>,
    method: Option<SinkhornMethod>,
    num_iter_max: Option<usize>,
    stop_threshold: Option<f64>,
) -> SinkhornKnoppUnbalanced<'a> {
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

/// Solves the unbalanced entropic regularization optimal transport problem and return the OT
/// matrix
/// a: Source sample weights (defaults to uniform weight if empty)
/// b: Target sample weights (defaults to uniform weight if empty)
/// M: Loss matrix
/// reg: Entropy regularization term > 0
/// reg_m: Marginal relaxation term > 0
/// method: Plain or log-domain scaling (default = SinkhornLog)
/// num_iter_max: Max number of iterations (default = 1000)
/// stop_threshold: Stop threshold on error (> 0) (default = 1E-9)
#[allow(non_snake_case)]
#[allow(clippy::too_many_arguments)]
pub fn sinkhorn_unbalanced(
    a: &Array1<f64>,
    b: &Array1<f64>,
    M: &Array2<f64>,
    reg: f64,
    reg_m: f64,
    method: Option<SinkhornMethod>,
    num_iter_max: Option<usize>,
    stop_threshold: Option<f64>,
) -> Result<Array2<f64>, OTError> {
    let solution = configured(
        SinkhornKnoppUnbalanced::new(a, b, M, reg, reg_m),
        method,
        num_iter_max,
        stop_threshold,
    )
    .solve()?;

    solution
        .plan
        .ok_or_else(|| OTError::Other(anyhow::anyhow!("single target solve produced no plan")))
}

/// Plain-kernel unbalanced Sinkhorn-Knopp, returning the OT matrix
#[allow(non_snake_case)]
pub fn sinkhorn_knopp_unbalanced(
    a: &Array1<f64>,
    b: &Array1<f64>,
    M: &Array2<f64>,
    reg: f64,
    reg_m: f64,
    num_iter_max: Option<usize>,
    stop_threshold: Option<f64>,
) -> Result<Array2<f64>, OTError> {
    sinkhorn_unbalanced(
        a,
        b,
        M,
        reg,
        reg_m,
        Some(SinkhornMethod::Sinkhorn),
        num_iter_max,
        stop_threshold,
    )
}

/// Solves the unbalanced entropic regularization optimal transport problem and returns the
/// loss ⟨γ, M⟩
#[allow(non_snake_case)]
#[allow(clippy::too_many_arguments)]
pub fn sinkhorn_unbalanced2(
    a: &Array1<f64>,
    b: &Array1<f64>,
    M: &Array2<f64>,
    reg: f64,
    reg_m: f64,
    method: Option<SinkhornMethod>,
    num_iter_max: Option<usize>,
    stop_threshold: Option<f64>,
) -> Result<f64, OTError> {
    let solution = configured(
        SinkhornKnoppUnbalanced::new(a, b, M, reg, reg_m),
        method,
        num_iter_max,
        stop_threshold,
    )
    .solve()?;

    Ok(solution.cost())
}

/// Same as sinkhorn_unbalanced2 for several target histograms (columns of b)
#[allow(non_snake_case)]
#[allow(clippy::too_many_arguments)]
pub fn sinkhorn_unbalanced2_batched(
    a: &Array1<f64>,
    b: &Array2<f64>,
    M: &Array2<f64>,
    reg: f64,
    reg_m: f64,
    method: Option<SinkhornMethod>,
    num_iter_max: Option<usize>,
    stop_threshold: Option<f64>,
) -> Result<Array1<f64>, OTError> {
    let solution = configured(
        SinkhornKnoppUnbalanced::batched(a, b, M, reg, reg_m),
        method,
        num_iter_max,
        stop_threshold,
    )
    .solve()?;

    Ok(solution.costs)
}
