use ndarray::prelude::*;
use ndarray::Data;
use ndarray_rand::rand::Rng;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;

use crate::OTError;

/// Relative tolerance on the difference of total masses for the balanced solvers
pub const MASS_TOLERANCE: f64 = 1E-6;

/// Uniform histogram with n bins
pub fn uniform(n: usize) -> Array1<f64> {
    Array1::from_elem(n, 1. / (n as f64))
}

/// Returns a copy of the weights, or uniform weights over n bins if they are empty
pub(crate) fn weights_or_uniform(weights: &Array1<f64>, n: usize) -> Array1<f64> {
    if weights.is_empty() {
        uniform(n)
    } else {
        weights.clone()
    }
}

/// Ensures the source and target dimensions match the loss matrix dimensions
pub(crate) fn check_dimensions(dim_a: usize, dim_b: usize, cost: &[usize]) -> Result<(), OTError> {
    let m0 = cost[0];
    let m1 = cost[1];

    if dim_a != m0 || dim_b != m1 {
        return Err(OTError::WeightDimensionError {
            dim_a,
            dim_b,
            dim_m_0: m0,
            dim_m_1: m1,
        });
    }

    Ok(())
}

/// Checks that weights are finite and non-negative with a positive total, and returns the total
pub(crate) fn check_histogram<S, D>(weights: &ArrayBase<S, D>, name: &str) -> Result<f64, OTError>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    if weights.iter().any(|w| !w.is_finite() || *w < 0.) {
        return Err(OTError::ArgError(format!(
            "{} must be finite and non-negative",
            name
        )));
    }

    let mass = weights.sum();
    if mass <= 0. {
        return Err(OTError::ArgError(format!("{} has zero total mass", name)));
    }

    Ok(mass)
}

/// Rejects loss matrices with NaN or infinite entries
pub(crate) fn check_cost(cost: &Array2<f64>) -> Result<(), OTError> {
    if cost.iter().any(|c| !c.is_finite()) {
        return Err(OTError::ArgError(
            "Loss matrix contains non-finite entries".to_string(),
        ));
    }

    Ok(())
}

/// Balanced problems require equal source and target mass up to MASS_TOLERANCE
pub(crate) fn check_mass(mass_a: f64, mass_b: f64) -> Result<(), OTError> {
    let scale = mass_a.max(mass_b).max(1.);

    if (mass_a - mass_b).abs() > MASS_TOLERANCE * scale {
        return Err(OTError::HistogramSumError { mass_a, mass_b });
    }

    Ok(())
}

pub(crate) fn check_positive(value: f64, name: &str) -> Result<(), OTError> {
    if !(value > 0.) || !value.is_finite() {
        return Err(OTError::ArgError(format!("{} <= 0", name)));
    }

    Ok(())
}

/// Numerically stable log(sum(exp(x)))
/// Returns -inf when every entry is -inf (or the input is empty)
pub fn log_sum_exp<'a, I>(values: I) -> f64
where
    I: IntoIterator<Item = &'a f64> + Clone,
{
    let max = values
        .clone()
        .into_iter()
        .fold(f64::NEG_INFINITY, |acc, &x| acc.max(x));

    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }

    let sum: f64 = values.into_iter().map(|&x| (x - max).exp()).sum();

    max + sum.ln()
}

/// Frobenius inner product ⟨plan, M⟩
#[allow(non_snake_case)]
pub fn transport_cost(plan: &Array2<f64>, M: &Array2<f64>) -> f64 {
    let mut cost = 0.;
    azip!((&g in plan, &m in M) cost += g * m);
    cost
}

/// Returns a 1D histogram for a gaussian distribution
/// n: number of bins in histogram
/// mean: mean value of distribution
/// std: standard deviation of distribution
#[allow(non_snake_case)]
pub fn get_1D_gauss_histogram(n: usize, mean: f64, std: f64) -> Result<Array1<f64>, OTError> {
    if n == 0 {
        return Err(OTError::ArgError("n is not greater than zero".to_string()));
    }

    check_positive(std, "Standard deviation")?;

    let x = Array1::<f64>::range(0.0, n as f64, 1.0);
    let denom = 2.0 * std.powf(2.0);
    let mut result = x.mapv_into(|val| (-(val - mean).powf(2.0) / denom).exp());

    let summed_val = result.sum();
    if summed_val <= 0. {
        return Err(OTError::ArgError(
            "Gaussian histogram underflows on the requested bins".to_string(),
        ));
    }

    result /= summed_val;

    Ok(result)
}

/// Returns n_hists random histograms with dim bins as the columns of a matrix, each summing to 1
pub fn random_histograms<R: Rng + ?Sized>(dim: usize, n_hists: usize, rng: &mut R) -> Array2<f64> {
    let mut hists = Array2::random_using((dim, n_hists), Uniform::new(0., 1.), rng);

    for mut col in hists.columns_mut() {
        let total = col.sum();
        col /= total;
    }

    hists
}

#[cfg(test)]
mod tests {

    use ndarray::prelude::*;
    use ndarray_rand::rand::rngs::StdRng;
    use ndarray_rand::rand::SeedableRng;

    use crate::OTError;

    #[test]
    fn test_log_sum_exp() {
        let x = array![1000., 1000.];
        let result = super::log_sum_exp(&x);
        assert!((result - (1000. + 2f64.ln())).abs() < 1E-12);

        let empty = array![f64::NEG_INFINITY, f64::NEG_INFINITY];
        assert_eq!(super::log_sum_exp(&empty), f64::NEG_INFINITY);

        let mixed = array![f64::NEG_INFINITY, 0.];
        assert_eq!(super::log_sum_exp(&mixed), 0.);
    }

    #[test]
    fn test_check_dimensions() {
        assert!(super::check_dimensions(2, 3, &[2, 3]).is_ok());

        match super::check_dimensions(2, 2, &[2, 3]) {
            Err(OTError::WeightDimensionError { dim_b, dim_m_1, .. }) => {
                assert_eq!(dim_b, 2);
                assert_eq!(dim_m_1, 3);
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn test_check_histogram() {
        assert!((super::check_histogram(&array![0.25, 0.75], "a").unwrap() - 1.).abs() < 1E-15);
        assert!(super::check_histogram(&array![0.5, -0.5], "a").is_err());
        assert!(super::check_histogram(&array![0., 0.], "a").is_err());
        assert!(super::check_histogram(&array![f64::NAN, 1.], "a").is_err());
    }

    #[test]
    fn test_check_mass() {
        assert!(super::check_mass(1., 1. + 1E-9).is_ok());
        assert!(matches!(
            super::check_mass(1., 1.1),
            Err(OTError::HistogramSumError { .. })
        ));
    }

    #[test]
    #[allow(non_snake_case)]
    fn test_get_1D_gauss_histogram() {
        let result = match super::get_1D_gauss_histogram(50, 20.0, 5.0) {
            Ok(val) => val,
            Err(err) => panic!("{:?}", err),
        };

        assert_eq!(result.len(), 50);
        assert!((result.sum() - 1.).abs() < 1E-12);

        // mode sits on the mean bin
        let argmax = result
            .iter()
            .enumerate()
            .fold((0, 0.), |acc, (i, &v)| if v > acc.1 { (i, v) } else { acc });
        assert_eq!(argmax.0, 20);

        assert!(super::get_1D_gauss_histogram(0, 20.0, 5.0).is_err());
    }

    #[test]
    fn test_random_histograms() {
        let mut rng = StdRng::seed_from_u64(7);
        let hists = super::random_histograms(10, 3, &mut rng);

        assert_eq!(hists.shape(), &[10, 3]);
        for col in hists.columns() {
            assert!((col.sum() - 1.).abs() < 1E-12);
            assert!(col.iter().all(|&x| x >= 0.));
        }
    }
}
