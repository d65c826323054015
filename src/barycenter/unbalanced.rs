use ndarray::prelude::*;

use super::{barycenter_with_kernel, check_weight_count, BarycenterConfig, BarycenterSolution, Relaxation};
use crate::regularized::kernel::LogGibbsKernel;
use crate::utils::{check_cost, check_dimensions, check_positive, uniform};
use crate::{OTError, OTSolver};

/// Solves the unbalanced entropic Wasserstein barycenter problem. Marginals are KL-penalized
/// with weight reg_m, so histograms may carry different masses and the barycenter does not
/// sum to 1 in general.
/// histograms: One histogram per column
/// cost: Loss matrix between the bins
/// reg: Entropy regularization term > 0
/// reg_m: Marginal relaxation term > 0
/// weights: Weight of each histogram (default = uniform)
/// max_iter: Max number of iterations (default = 1000)
/// threshold: Stop threshold on the relative change of the barycenter (default = 1E-6)
pub struct BarycenterUnbalanced<'a> {
    histograms: &'a Array2<f64>,
    cost: &'a Array2<f64>,
    reg: f64,
    reg_m: f64,
    weights: Option<&'a Array1<f64>>,
    config: BarycenterConfig,
}

impl<'a> BarycenterUnbalanced<'a> {
    pub fn new(histograms: &'a Array2<f64>, cost: &'a Array2<f64>, reg: f64, reg_m: f64) -> Self {
        Self {
            histograms,
            cost,
            reg,
            reg_m,
            weights: None,
            config: BarycenterConfig::default(),
        }
    }

    pub fn weights<'b>(&'b mut self, weights: &'a Array1<f64>) -> &'b mut Self {
        self.weights = Some(weights);
        self
    }

    pub fn reg_m<'b>(&'b mut self, reg_m: f64) -> &'b mut Self {
        self.reg_m = reg_m;
        self
    }

    pub fn iterations<'b>(&'b mut self, max_iter: usize) -> &'b mut Self {
        self.config.max_iter = max_iter;
        self
    }

    pub fn threshold<'b>(&'b mut self, threshold: f64) -> &'b mut Self {
        self.config.threshold = threshold;
        self
    }

    pub fn verbose<'b>(&'b mut self, verbose: bool) -> &'b mut Self {
        self.config.verbose = verbose;
        self
    }
}

impl<'a> OTSolver for BarycenterUnbalanced<'a> {
    type Solution = BarycenterSolution;

    fn check_shape(&self) -> Result<(), OTError> {
        let n_bins = self.histograms.nrows();
        check_dimensions(n_bins, n_bins, self.cost.shape())?;
        if let Some(weights) = self.weights {
            check_weight_count(weights, self.histograms)?;
        }
        Ok(())
    }

    fn solve(&self) -> Result<BarycenterSolution, OTError> {
        self.check_shape()?;
        check_positive(self.reg, "Regularization term")?;
        check_positive(self.reg_m, "Marginal relaxation term")?;
        check_cost(self.cost)?;

        let weights = self
            .weights
            .cloned()
            .unwrap_or_else(|| uniform(self.histograms.ncols()));
        let kernel = LogGibbsKernel::new(self.cost, self.reg);
        let relaxation = Relaxation::kullback_leibler(self.reg, self.reg_m);

        barycenter_with_kernel(&kernel, self.histograms, &weights, relaxation, &self.config)
    }
}

/// Solves the unbalanced entropic Wasserstein barycenter problem and returns the barycenter
/// A: Histograms, one per column
/// M: Loss matrix between the bins
/// reg: Entropy regularization term > 0
/// reg_m: Marginal relaxation term > 0
/// weights: Weight of each histogram (default = uniform)
/// num_iter_max: Max number of iterations (default = 1000)
/// stop_threshold: Stop threshold on the relative change (default = 1E-6)
#[allow(non_snake_case)]
pub fn barycenter_unbalanced(
    A: &Array2<f64>,
    M: &Array2<f64>,
    reg: f64,
    reg_m: f64,
    weights: Option<&Array1<f64>>,
    num_iter_max: Option<usize>,
    stop_threshold: Option<f64>,
) -> Result<Array1<f64>, OTError> {
    let mut solver = BarycenterUnbalanced::new(A, M, reg, reg_m);
    if let Some(weights) = weights {
        solver.weights(weights);
    }
    if let Some(iterations) = num_iter_max {
        solver.iterations(iterations);
    }
    if let Some(threshold) = stop_threshold {
        solver.threshold(threshold);
    }

    Ok(solver.solve()?.barycenter)
}
