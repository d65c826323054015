//! Log-stabilized Sinkhorn iterations
//!
//! The scalings are kept as log(u), log(v) and every kernel product is a log-sum-exp, so the
//! iterations stay finite for any reg > 0 however small it is relative to the costs.

use ndarray::prelude::*;

use super::kernel::{GibbsKernel, LogGibbsKernel};
use super::{ScalingProblem, Scalings, SinkhornMethod, StopRule};
use crate::convergence::StopCriteria;
use crate::{Convergence, OTError};

/// Solves the entropic regularization optimal transport problem in the log domain and returns
/// the OT matrix
/// a: Source sample weights (defaults to uniform weight if empty)
/// b: Target sample weights (defaults to uniform weight if empty)
/// M: Loss matrix
/// reg: Entropy regularization term > 0
/// num_iter_max: Max number of iterations (default = 1000)
/// stop_threshold: Stop threshold on error (> 0) (default = 1E-9)
#[allow(non_snake_case)]
pub fn sinkhorn_log(
    a: &Array1<f64>,
    b: &Array1<f64>,
    M: &Array2<f64>,
    reg: f64,
    num_iter_max: Option<usize>,
    stop_threshold: Option<f64>,
) -> Result<Array2<f64>, OTError> {
    super::sinkhorn(a, b, M, reg, Some(SinkhornMethod::SinkhornLog), num_iter_max, stop_threshold)
}

pub(crate) fn log_scaling(problem: &ScalingProblem, criteria: &StopCriteria) -> Scalings {
    let kernel = LogGibbsKernel::new(problem.cost, problem.reg);
    log_scaling_with_kernel(&kernel, problem, criteria)
}

pub(crate) fn log_scaling_with_kernel<K: GibbsKernel>(
    kernel: &K,
    problem: &ScalingProblem,
    criteria: &StopCriteria,
) -> Scalings {
    let (dim_a, dim_b) = kernel.shape();
    let n_hists = problem.b.ncols();
    let fi = problem.fi;

    let log_a = problem.a.mapv(f64::ln);
    let log_b = problem.b.mapv(f64::ln);

    let mut log_u = Array2::<f64>::zeros((dim_a, n_hists));
    let mut log_v = Array2::<f64>::zeros((dim_b, n_hists));
    let mut log_kv = Array2::<f64>::zeros((dim_a, n_hists));
    let mut log_ktu = Array2::<f64>::zeros((dim_b, n_hists));
    let mut u_prev = log_u.clone();
    let mut v_prev = log_v.clone();

    let mut err = f64::INFINITY;
    let mut converged = false;
    let mut iterations = 0;

    for count in 0..criteria.max_iter {
        iterations = count + 1;
        let check = count % 10 == 0;

        if check && problem.rule == StopRule::IterateChange {
            u_prev.assign(&log_u);
            v_prev.assign(&log_v);
        }

        // log u = fi * (log a - log Kv)
        kernel.log_apply(log_v.view(), log_kv.view_mut());
        for ((mut u_row, kv_row), &la) in log_u.rows_mut().into_iter().zip(log_kv.rows()).zip(log_a.iter()) {
            azip!((lu in &mut u_row, &lkv in &kv_row) *lu = fi * (la - lkv));
        }

        // log v = fi * (log b - log Ktu)
        kernel.log_apply_transpose(log_u.view(), log_ktu.view_mut());
        azip!((lv in &mut log_v, &lb in &log_b, &lktu in &log_ktu) *lv = fi * (lb - lktu));

        if check {
            err = match problem.rule {
                StopRule::MarginalViolation => {
                    kernel.log_apply(log_v.view(), log_kv.view_mut());
                    let mut violation = 0.;
                    for ((u_row, kv_row), &a) in log_u.rows().into_iter().zip(log_kv.rows()).zip(problem.a.iter()) {
                        azip!((&lu in &u_row, &lkv in &kv_row) violation += ((lu + lkv).exp() - a).abs());
                    }
                    violation
                }
                StopRule::IterateChange => max_log_change(&log_u, &u_prev).max(max_log_change(&log_v, &v_prev)),
            };

            criteria.report(problem.name, count, err);

            if err < criteria.threshold {
                converged = true;
                break;
            }
        }
    }

    Scalings {
        log_u,
        log_v,
        convergence: Convergence::new(iterations, err, converged),
    }
}

/// Largest absolute change between two log-scalings, treating equal entries (including two
/// -inf) as unchanged
fn max_log_change(x: &Array2<f64>, x_prev: &Array2<f64>) -> f64 {
    let mut change = 0f64;

    azip!((&x in x, &xp in x_prev) {
        if x != xp {
            change = change.max((x - xp).abs());
        }
    });

    change
}
