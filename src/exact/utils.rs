use ndarray::prelude::*;

use crate::utils::uniform;

/// Finds a unique dual potential such that the same objective value is achieved for both
/// source and target potentials. Helps ensure stability of the linear program solver
/// when calling multiple times with minor changes.
/// alpha0: Source dual potential
/// beta0: Target dual potential
/// a: Source distribution (uniform weights if None)
/// b: Target distribution (uniform weights if None)
pub fn center_ot_dual(
    alpha0: &Array1<f64>,
    beta0: &Array1<f64>,
    a: Option<&Array1<f64>>,
    b: Option<&Array1<f64>>,
) -> (Array1<f64>, Array1<f64>) {
    let a = a.cloned().unwrap_or_else(|| uniform(alpha0.len()));
    let b = b.cloned().unwrap_or_else(|| uniform(beta0.len()));

    let c = (b.dot(beta0) - a.dot(alpha0)) / (a.sum() + b.sum());

    (alpha0 + c, beta0 - c)
}

#[cfg(test)]
mod tests {

    use ndarray::prelude::*;

    #[test]
    fn test_center_ot_dual() {
        let alpha = array![0., -1., 0.5];
        let beta = array![0., 1.];
        let a = array![0.5, 0.2, 0.3];
        let b = array![0., 1.];

        let (alpha_c, beta_c) = super::center_ot_dual(&alpha, &beta, Some(&a), Some(&b));

        assert!((a.dot(&alpha_c) - b.dot(&beta_c)).abs() < 1E-12);
        // alpha_i + beta_j is unchanged
        assert!((alpha_c[1] + beta_c[1] - (alpha[1] + beta[1])).abs() < 1E-12);
    }

    #[test]
    fn test_center_ot_dual_uniform() {
        let alpha = array![1., 3.];
        let beta = array![-1., 0., 2.];

        let (alpha_c, beta_c) = super::center_ot_dual(&alpha, &beta, None, None);

        assert!((alpha_c.mean().unwrap() - beta_c.mean().unwrap()).abs() < 1E-12);
    }
}
