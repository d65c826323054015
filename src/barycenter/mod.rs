//! Entropic Wasserstein barycenters
//!
//! The barycenter b of histograms a_1..a_h (columns of A) minimizes Σ_k w_k W_reg(b, a_k),
//! where every W_reg shares the same k x k loss matrix. Each fixed-point step runs one
//! Sinkhorn scaling against every histogram at once and updates b from the Kᵗu_k terms.

pub mod unbalanced;

use ndarray::prelude::*;
use ndarray::Zip;

use crate::convergence::StopCriteria;
use crate::regularized::kernel::{GibbsKernel, LogGibbsKernel};
use crate::utils::{check_cost, check_dimensions, check_histogram, check_mass, check_positive, log_sum_exp, uniform};
use crate::{Convergence, OTError, OTSolver};

pub use unbalanced::{barycenter_unbalanced, BarycenterUnbalanced};

/// How strictly the barycenter marginals are enforced
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Relaxation {
    /// Exact marginals, the barycenter is renormalized to the common histogram mass (1 for
    /// probability histograms) at every step
    Balanced,
    /// KL-penalized marginals. `exponent` is reg_m / (reg_m + reg). The barycenter mass is
    /// left free.
    Unbalanced { exponent: f64 },
}

impl Relaxation {
    /// KL relaxation with marginal weight reg_m for entropic term reg
    pub fn kullback_leibler(reg: f64, reg_m: f64) -> Self {
        Relaxation::Unbalanced {
            exponent: reg_m / (reg_m + reg),
        }
    }
}

/// Iteration settings of the barycenter fixed point
#[derive(Debug, Clone, Copy)]
pub struct BarycenterConfig {
    /// Max number of fixed-point iterations (default = 1000)
    pub max_iter: usize,
    /// Threshold on the relative change of the barycenter (default = 1E-6)
    pub threshold: f64,
    /// Log every iteration at info level
    pub verbose: bool,
}

impl Default for BarycenterConfig {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            threshold: 1E-6,
            verbose: false,
        }
    }
}

impl BarycenterConfig {
    fn criteria(&self) -> StopCriteria {
        let mut criteria = StopCriteria::new(Some(self.max_iter), Some(self.threshold), 1E-6);
        criteria.verbose = self.verbose;
        criteria
    }
}

#[derive(Debug, Clone)]
pub struct BarycenterSolution {
    pub barycenter: Array1<f64>,
    pub convergence: Convergence,
}

/// Solves the entropic Wasserstein barycenter problem
/// histograms: One histogram per column, all with the same total mass
/// cost: Loss matrix between the bins
/// reg: Entropy regularization term > 0
/// weights: Weight of each histogram (default = uniform)
/// max_iter: Max number of iterations (default = 1000)
/// threshold: Stop threshold on the relative change of the barycenter (default = 1E-6)
pub struct Barycenter<'a> {
    histograms: &'a Array2<f64>,
    cost: &'a Array2<f64>,
    reg: f64,
    weights: Option<&'a Array1<f64>>,
    config: BarycenterConfig,
}

impl<'a> Barycenter<'a> {
    pub fn new(histograms: &'a Array2<f64>, cost: &'a Array2<f64>, reg: f64) -> Self {
        Self {
            histograms,
            cost,
            reg,
            weights: None,
            config: BarycenterConfig::default(),
        }
    }

    pub fn weights<'b>(&'b mut self, weights: &'a Array1<f64>) -> &'b mut Self {
        self.weights = Some(weights);
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

impl<'a> OTSolver for Barycenter<'a> {
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
        check_cost(self.cost)?;

        let weights = self
            .weights
            .cloned()
            .unwrap_or_else(|| uniform(self.histograms.ncols()));
        let kernel = LogGibbsKernel::new(self.cost, self.reg);

        barycenter_with_kernel(&kernel, self.histograms, &weights, Relaxation::Balanced, &self.config)
    }
}

/// Fixed-point iteration of the barycenter problem for any Gibbs kernel
/// kernel: Log-domain kernel applications, of shape (k, k)
/// A: Histograms, one per column, of length k
/// weights: Non-negative weight of each histogram, normalized before use
/// relaxation: Balanced or KL-relaxed marginals
/// config: Iteration settings
#[allow(non_snake_case)]
pub fn barycenter_with_kernel<K: GibbsKernel>(
    kernel: &K,
    A: &Array2<f64>,
    weights: &Array1<f64>,
    relaxation: Relaxation,
    config: &BarycenterConfig,
) -> Result<BarycenterSolution, OTError> {
    let (n_bins, n_hists) = A.dim();
    check_dimensions(n_bins, n_bins, &[kernel.shape().0, kernel.shape().1])?;
    check_weight_count(weights, A)?;

    let total_weight = check_histogram(weights, "Barycenter weights")?;
    let weights = weights / total_weight;

    let mut masses = Vec::with_capacity(n_hists);
    for col in A.columns() {
        masses.push(check_histogram(&col, "Histograms")?);
    }
    if relaxation == Relaxation::Balanced {
        for &mass in &masses[1..] {
            check_mass(masses[0], mass)?;
        }
    }

    let criteria = config.criteria();
    let name = match relaxation {
        Relaxation::Balanced => "barycenter",
        Relaxation::Unbalanced { .. } => "barycenter_unbalanced",
    };
    let fi = match relaxation {
        Relaxation::Balanced => 1.,
        Relaxation::Unbalanced { exponent } => exponent,
    };

    let log_a = A.mapv(f64::ln);
    let log_target_mass = masses[0].ln();
    let log_w = weights.mapv(f64::ln);

    let mut log_u = Array2::<f64>::zeros((n_bins, n_hists));
    let mut log_v = Array2::<f64>::zeros((n_bins, n_hists));
    let mut log_kv = Array2::<f64>::zeros((n_bins, n_hists));
    let mut log_ktu = Array2::<f64>::zeros((n_bins, n_hists));
    let mut log_b = Array1::<f64>::zeros(n_bins);
    let mut bary = Array1::<f64>::zeros(n_bins);
    let mut bary_prev = Array1::<f64>::zeros(n_bins);

    let mut err = f64::INFINITY;
    let mut converged = false;
    let mut iterations = 0;

    for count in 0..criteria.max_iter {
        iterations = count + 1;

        // log u_k = fi * (log a_k - log K v_k)
        kernel.log_apply(log_v.view(), log_kv.view_mut());
        azip!((lu in &mut log_u, &la in &log_a, &lkv in &log_kv) *lu = fi * (la - lkv));

        kernel.log_apply_transpose(log_u.view(), log_ktu.view_mut());

        match relaxation {
            Relaxation::Balanced => {
                // weighted geometric mean of the Kᵗu_k, renormalized to the histogram mass
                for (lb, ktu_row) in log_b.iter_mut().zip(log_ktu.rows()) {
                    *lb = weighted_log_mean(&weights, ktu_row);
                }
                let log_mass = log_sum_exp(log_b.iter());
                log_b -= log_mass - log_target_mass;

                Zip::from(log_v.rows_mut())
                    .and(log_ktu.rows())
                    .and(&log_b)
                    .for_each(|mut v_row, ktu_row, &lb| {
                        azip!((lv in &mut v_row, &lktu in &ktu_row) *lv = lb - lktu);
                    });
            }
            Relaxation::Unbalanced { .. } => {
                // q = (Σ_k w_k (Kᵗu_k)^(1 - fi))^(1 / (1 - fi))
                let t = 1. - fi;
                for (lb, ktu_row) in log_b.iter_mut().zip(log_ktu.rows()) {
                    *lb = if t < POWER_MEAN_SERIES_CUTOFF {
                        log_power_mean_small(&weights, ktu_row, t)
                    } else {
                        let terms: Vec<f64> = log_w
                            .iter()
                            .zip(ktu_row.iter())
                            .map(|(&lw, &lktu)| lw + t * lktu)
                            .collect();
                        log_sum_exp(terms.iter()) / t
                    };
                }

                Zip::from(log_v.rows_mut())
                    .and(log_ktu.rows())
                    .and(&log_b)
                    .for_each(|mut v_row, ktu_row, &lb| {
                        azip!((lv in &mut v_row, &lktu in &ktu_row) *lv = fi * (lb - lktu));
                    });
            }
        }

        bary_prev.assign(&bary);
        bary.assign(&log_b.mapv(f64::exp));

        if count > 0 {
            err = relative_change(&bary, &bary_prev);
            criteria.report(name, count, err);

            if err < criteria.threshold {
                converged = true;
                break;
            }
        }
    }

    let convergence = Convergence::new(iterations, err, converged);
    convergence.warn_if_stalled(name);

    Ok(BarycenterSolution {
        barycenter: bary,
        convergence,
    })
}

/// Σ_k w_k log x_k, skipping histograms with zero weight
/// Below this exponent the log power mean goes through expm1 / ln_1p
const POWER_MEAN_SERIES_CUTOFF: f64 = 1E-3;

/// ln(Σ_k w_k x_k^t) / t for normalized weights and a small exponent t
///
/// Σ_k w_k = 1 turns the sum into 1 + Σ_k w_k (x_k^t - 1), which stays accurate as t -> 0.
fn log_power_mean_small(weights: &Array1<f64>, log_x: ArrayView1<f64>, t: f64) -> f64 {
    let excess = Zip::from(weights)
        .and(&log_x)
        .fold(0., |acc, &w, &lx| if w > 0. { acc + w * (t * lx).exp_m1() } else { acc });

    excess.ln_1p() / t
}

fn weighted_log_mean(weights: &Array1<f64>, log_x: ArrayView1<f64>) -> f64 {
    weights
        .iter()
        .zip(log_x.iter())
        .filter(|&(&w, _)| w > 0.)
        .map(|(&w, &lx)| w * lx)
        .sum()
}

/// max|b - b'| / max(max b, max b', 1)
fn relative_change(b: &Array1<f64>, b_prev: &Array1<f64>) -> f64 {
    let mut diff = 0f64;
    let mut scale = 1f64;

    azip!((&x in b, &xp in b_prev) {
        diff = diff.max((x - xp).abs());
        scale = scale.max(x).max(xp);
    });

    diff / scale
}

fn check_weight_count(weights: &Array1<f64>, histograms: &Array2<f64>) -> Result<(), OTError> {
    if weights.len() != histograms.ncols() {
        return Err(OTError::WeightDimensionError {
            dim_a: histograms.nrows(),
            dim_b: weights.len(),
            dim_m_0: histograms.nrows(),
            dim_m_1: histograms.ncols(),
        });
    }
    Ok(())
}

/// Solves the entropic Wasserstein barycenter problem and returns the barycenter
/// A: Histograms, one per column
/// M: Loss matrix between the bins
/// reg: Entropy regularization term > 0
/// weights: Weight of each histogram (default = uniform)
/// num_iter_max: Max number of iterations (default = 1000)
/// stop_threshold: Stop threshold on the relative change (default = 1E-6)
#[allow(non_snake_case)]
pub fn barycenter(
    A: &Array2<f64>,
    M: &Array2<f64>,
    reg: f64,
    weights: Option<&Array1<f64>>,
    num_iter_max: Option<usize>,
    stop_threshold: Option<f64>,
) -> Result<Array1<f64>, OTError> {
    let mut solver = Barycenter::new(A, M, reg);
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

#[cfg(test)]
mod tests {

    use ndarray::prelude::*;

    use super::{log_power_mean_small, Barycenter, BarycenterConfig, Relaxation};
    use crate::regularized::kernel::GibbsKernel;
    use crate::{OTError, OTSolver};

    fn square_cost(n: usize) -> Array2<f64> {
        Array2::from_shape_fn((n, n), |(i, j)| ((i as f64) - (j as f64)).powi(2))
    }

    #[test]
    fn test_log_power_mean_small_exponent() {
        let weights = array![0.5, 0.3, 0.2];
        let log_x = array![-2., 0.5, -7.];

        // direct power mean where it is still accurate
        let t: f64 = 1E-3;
        let direct = (weights.iter().zip(log_x.iter()).map(|(&w, &lx)| w * (t * lx).exp()).sum::<f64>()).ln() / t;
        assert!((log_power_mean_small(&weights, log_x.view(), t) - direct).abs() < 1E-9);

        // the t -> 0 limit is the weighted mean of the logarithms
        let limit = weights.dot(&log_x);
        assert!((log_power_mean_small(&weights, log_x.view(), 1E-14) - limit).abs() < 1E-10);
    }

    struct IdentityKernel(usize);

    impl GibbsKernel for IdentityKernel {
        fn shape(&self) -> (usize, usize) {
            (self.0, self.0)
        }

        fn log_apply(&self, log_x: ArrayView2<f64>, mut out: ArrayViewMut2<f64>) {
            out.assign(&log_x);
        }

        fn log_apply_transpose(&self, log_x: ArrayView2<f64>, mut out: ArrayViewMut2<f64>) {
            out.assign(&log_x);
        }
    }

    #[test]
    fn test_barycenter_with_identity_kernel() {
        // K = I decouples the bins: b is the normalized weighted geometric mean
        let histograms = array![[0.1, 0.4], [0.3, 0.4], [0.6, 0.2]];
        let weights = array![3., 1.];

        let solution = super::barycenter_with_kernel(
            &IdentityKernel(3),
            &histograms,
            &weights,
            Relaxation::Balanced,
            &BarycenterConfig::default(),
        )
        .unwrap();

        let mut truth = histograms.map_axis(Axis(1), |row| row[0].powf(0.75) * row[1].powf(0.25));
        let total = truth.sum();
        truth /= total;

        assert!(solution.barycenter.abs_diff_eq(&truth, 1E-12));
        assert!(solution.convergence.converged);
        assert_eq!(solution.convergence.iterations, 2);
    }

    #[test]
    fn test_barycenter_single_histogram() {
        let a = array![[0.1], [0.2], [0.3], [0.4]];
        let m = square_cost(4);

        let solution = Barycenter::new(&a, &m, 0.05).solve().unwrap();

        assert!(solution.barycenter.abs_diff_eq(&a.column(0), 1E-8));
        assert!(solution.convergence.converged);
    }

    #[test]
    fn test_barycenter_of_two_diracs() {
        // symmetric problem: the barycenter is symmetric and has unit mass
        let mut histograms = Array2::<f64>::from_elem((5, 2), 1E-3);
        histograms[(0, 0)] = 1.;
        histograms[(4, 1)] = 1.;
        histograms /= 1. + 4E-3;
        let m = square_cost(5) / 16.;

        let bary = super::barycenter(&histograms, &m, 0.01, None, None, None).unwrap();

        assert!((bary.sum() - 1.).abs() < 1E-10);
        for i in 0..5 {
            assert!((bary[i] - bary[4 - i]).abs() < 1E-6);
        }
        // mass concentrates in the middle, not at the endpoints
        assert!(bary[2] > bary[0]);
    }

    #[test]
    fn test_barycenter_weights_are_normalized() {
        let histograms = array![[0.2, 0.5], [0.3, 0.1], [0.5, 0.4]];
        let m = square_cost(3) / 4.;

        let unit = array![0.25, 0.75];
        let scaled = array![1., 3.];

        let b1 = super::barycenter(&histograms, &m, 0.1, Some(&unit), None, Some(1E-10)).unwrap();
        let b2 = super::barycenter(&histograms, &m, 0.1, Some(&scaled), None, Some(1E-10)).unwrap();

        assert!(b1.abs_diff_eq(&b2, 1E-12));
    }

    #[test]
    fn test_barycenter_rejects_bad_input() {
        let histograms = array![[0.2, 0.5], [0.3, 0.1], [0.5, 0.4]];
        let m = square_cost(3);

        let negative = array![1., -0.5];
        assert!(matches!(
            super::barycenter(&histograms, &m, 0.1, Some(&negative), None, None),
            Err(OTError::ArgError(_))
        ));

        let short = array![1.];
        assert!(matches!(
            super::barycenter(&histograms, &m, 0.1, Some(&short), None, None),
            Err(OTError::WeightDimensionError { .. })
        ));

        let wrong_cost = square_cost(2);
        assert!(Barycenter::new(&histograms, &wrong_cost, 0.1).check_shape().is_err());

        let uneven = array![[0.2, 1.0], [0.3, 0.1], [0.5, 0.4]];
        assert!(matches!(
            super::barycenter(&uneven, &m, 0.1, None, None, None),
            Err(OTError::HistogramSumError { .. })
        ));
    }
}
