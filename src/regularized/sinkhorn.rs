use ndarray::linalg::general_mat_mul;
use ndarray::prelude::*;

use super::{ScalingProblem, Scalings, SinkhornMethod, StopRule};
use crate::convergence::StopCriteria;
use crate::ndarray_logical::{all_finite, any_zero};
use crate::{Convergence, OTError};

/// Solves the entropic regularization optimal transport problem with the plain Sinkhorn-Knopp
/// iterations and returns the OT matrix. Switches to log-domain iterations if the Gibbs kernel
/// under/overflows.
/// a: Source sample weights (defaults to uniform weight if empty)
/// b: Target sample weights (defaults to uniform weight if empty)
/// M: Loss matrix
/// reg: Entropy regularization term > 0
/// num_iter_max: Max number of iterations (default = 1000)
/// stop_threshold: Stop threshold on error (> 0) (default = 1E-9)
#[allow(non_snake_case)]
pub fn sinkhorn_knopp(
    a: &Array1<f64>,
    b: &Array1<f64>,
    M: &Array2<f64>,
    reg: f64,
    num_iter_max: Option<usize>,
    stop_threshold: Option<f64>,
) -> Result<Array2<f64>, OTError> {
    super::sinkhorn(a, b, M, reg, Some(SinkhornMethod::Sinkhorn), num_iter_max, stop_threshold)
}

/// Plain scaling loop. Returns None when the iterates stop being representable so that the
/// caller can restart in the log domain.
pub(crate) fn plain_scaling(problem: &ScalingProblem, criteria: &StopCriteria) -> Option<Scalings> {
    let ScalingProblem { a, b, cost, reg, fi, rule, name } = *problem;
    let (dim_a, dim_b) = cost.dim();
    let n_hists = b.ncols();

    // K = exp(-M/reg)
    let k = cost.mapv(|m| (-m / reg).exp());
    let k_transpose = k.t();

    let mut u = Array2::<f64>::from_elem((dim_a, n_hists), 1. / (dim_a as f64));
    let mut v = Array2::<f64>::from_elem((dim_b, n_hists), 1. / (dim_b as f64));
    let mut kv = Array2::<f64>::zeros((dim_a, n_hists));
    let mut ktu = Array2::<f64>::zeros((dim_b, n_hists));
    let mut u_prev = u.clone();
    let mut v_prev = v.clone();

    let a_full = Array2::from_shape_fn((dim_a, n_hists), |(i, _)| a[i]);

    let mut err = f64::INFINITY;
    let mut converged = false;
    let mut iterations = 0;

    for count in 0..criteria.max_iter {
        iterations = count + 1;
        let check = count % 10 == 0;

        if check && rule == StopRule::IterateChange {
            u_prev.assign(&u);
            v_prev.assign(&v);
        }

        // u = a / Kv
        general_mat_mul(1., &k, &v, 0., &mut kv);
        if any_zero(&kv) {
            return None;
        }
        azip!((u in &mut u, &kv in &kv, &a in &a_full) *u = (a / kv).powf(fi));

        // v = b / Ktu
        general_mat_mul(1., &k_transpose, &u, 0., &mut ktu);
        if any_zero(&ktu) {
            return None;
        }
        azip!((v in &mut v, &b in &b, &ktu in &ktu) *v = (b / ktu).powf(fi));

        if !all_finite(&u) || !all_finite(&v) {
            return None;
        }

        if check {
            err = match rule {
                StopRule::MarginalViolation => {
                    general_mat_mul(1., &k, &v, 0., &mut kv);
                    let mut violation = 0.;
                    azip!((&u in &u, &kv in &kv, &a in &a_full) violation += (u * kv - a).abs());
                    violation
                }
                StopRule::IterateChange => {
                    0.5 * (relative_change(&u, &u_prev) + relative_change(&v, &v_prev))
                }
            };

            criteria.report(name, count, err);

            if err < criteria.threshold {
                converged = true;
                break;
            }
        }
    }

    Some(Scalings {
        log_u: u.mapv_into(f64::ln),
        log_v: v.mapv_into(f64::ln),
        convergence: Convergence::new(iterations, err, converged),
    })
}

/// max|x - x_prev| / max(max|x|, max|x_prev|, 1)
fn relative_change(x: &Array2<f64>, x_prev: &Array2<f64>) -> f64 {
    let mut diff = 0f64;
    let mut scale = 1f64;

    azip!((&x in x, &xp in x_prev) {
        diff = diff.max((x - xp).abs());
        scale = scale.max(x.abs()).max(xp.abs());
    });

    diff / scale
}

#[cfg(test)]
mod tests {

    use ndarray::prelude::*;

    use super::super::{ScalingProblem, StopRule};
    use crate::convergence::StopCriteria;

    #[test]
    fn test_sinkhorn_knopp() {
        let a = array![0.5, 0.5];
        let b = array![0.5, 0.5];
        let reg = 1.0;
        let m = array![[0.0, 1.0], [1.0, 0.0]];

        let result = match super::sinkhorn_knopp(&a, &b, &m, reg, None, None) {
            Ok(result) => result,
            Err(error) => panic!("{:?}", error),
        };

        let truth = array![[0.36552929, 0.13447071], [0.13447071, 0.36552929]];

        assert!(result.relative_eq(&truth, 1E-6, 1E-2));
    }

    #[test]
    fn test_plain_scaling_detects_underflow() {
        let a = array![0.5, 0.2, 0.3];
        let b = array![[0.], [1.]];
        let m = array![[0., 1.], [2., 0.], [0.5, 1.5]];

        let problem = ScalingProblem {
            name: "sinkhorn",
            a: a.view(),
            b: b.view(),
            cost: &m,
            reg: 1E-4,
            fi: 1.,
            rule: StopRule::MarginalViolation,
        };

        let criteria = StopCriteria::new(None, None, 1E-9);
        assert!(super::plain_scaling(&problem, &criteria).is_none());
    }

    #[test]
    fn test_sinkhorn_knopp_falls_back_to_log_domain() {
        let a = array![0.5, 0.2, 0.3];
        let b = array![0., 1.];
        let m = array![[0., 1.], [2., 0.], [0.5, 1.5]];

        let plan = super::sinkhorn_knopp(&a, &b, &m, 1E-4, None, None).unwrap();

        assert!(plan.iter().all(|g| g.is_finite()));
        let truth = array![[0., 0.5], [0., 0.2], [0., 0.3]];
        assert!(plan.abs_diff_eq(&truth, 1E-9));
    }
}
