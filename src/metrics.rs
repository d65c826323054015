use ndarray::prelude::*;
use ndarray_einsum_beta::*;

use crate::OTError;

/// Ground metrics used to build loss matrices
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricType {
    SqEuclidean,
    Euclidean,
    /// p-th power of the l_p distance, sum_k |x_k - y_k|^p (no root is taken)
    Minkowski(f64),
}

impl Default for MetricType {
    fn default() -> Self {
        MetricType::SqEuclidean
    }
}

impl MetricType {
    /// Cost of moving unit mass between two points on the real line
    pub fn ground_cost(&self, x: f64, y: f64) -> f64 {
        let d = (x - y).abs();
        match self {
            MetricType::SqEuclidean => d * d,
            MetricType::Euclidean => d,
            MetricType::Minkowski(p) => d.powf(*p),
        }
    }
}

/// Compute distance between samples in x1 and x2
/// x1: matrix with n1 samples of size d
/// x2: matrix with n2 samples of size d
/// metric: choice of distance metric
pub fn dist(x1: &Array2<f64>, x2: &Array2<f64>, metric: MetricType) -> Result<Array2<f64>, OTError> {
    if x1.ncols() != x2.ncols() {
        return Err(OTError::ArgError(format!(
            "Samples have different dimensions: {} and {}",
            x1.ncols(),
            x2.ncols()
        )));
    }

    match metric {
        MetricType::SqEuclidean => euclidean_distances(x1, x2, true),
        MetricType::Euclidean => euclidean_distances(x1, x2, false),
        MetricType::Minkowski(p) => {
            if !(p > 0.) {
                return Err(OTError::ArgError("Minkowski exponent <= 0".to_string()));
            }
            Ok(minkowski_power(x1, x2, p))
        }
    }
}

/// Considering the rows of X (and Y=X) as vectors, compute the distance matrix between each pair
/// of vectors
/// X: matrix of nsamples x nfeatures
/// Y: matrix of nsamples x nfeatures
/// squared: Return squared Euclidean distances
fn euclidean_distances(x: &Array2<f64>, y: &Array2<f64>, squared: bool) -> Result<Array2<f64>, OTError> {

    // einsum('ij,ij->i', X, X)
    // repeated i and j : element-wise product, j omitted in the output : summed
    let a2 = einsum("ij,ij->i", &[x, x]).map_err(|e| anyhow::anyhow!(e))?;
    let b2 = einsum("ij,ij->i", &[y, y]).map_err(|e| anyhow::anyhow!(e))?;

    let mut c = (x.dot(&y.t())) * -2f64;

    // c += a2[:, None]
    for (mut row, a2val) in c.axis_iter_mut(Axis(0)).zip(a2.iter()) {
        row += *a2val;
    }

    // c += b2[None, :]
    for (mut col, b2val) in c.axis_iter_mut(Axis(1)).zip(b2.iter()) {
        col += *b2val;
    }

    // rounding can leave tiny negative values
    c.mapv_inplace(|val| val.max(0f64));

    if !squared {
        c.mapv_inplace(f64::sqrt);
    }

    if x == y {
        c.diag_mut().fill(0f64);
    }

    Ok(c)
}

fn minkowski_power(x: &Array2<f64>, y: &Array2<f64>, p: f64) -> Array2<f64> {
    let mut c = Array2::<f64>::zeros((x.nrows(), y.nrows()));

    for (mut row, xi) in c.rows_mut().into_iter().zip(x.rows()) {
        for (ele, yj) in row.iter_mut().zip(y.rows()) {
            *ele = xi
                .iter()
                .zip(yj.iter())
                .map(|(a, b)| (a - b).abs().powf(p))
                .sum();
        }
    }

    c
}
