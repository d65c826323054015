//! Exact transport between distributions supported on the real line
//!
//! For any ground cost that is a convex function of x - y the monotone (sorted) coupling is
//! optimal, so the plan is built by merging the two sorted supports in O(n log n).

use ndarray::prelude::*;

use crate::metrics::MetricType;
use crate::utils::{check_histogram, check_mass, uniform, weights_or_uniform};
use crate::{OTError, OTSolver};

/// Mass moved from source atom `source` to target atom `target`, indices in the caller's order
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Flow {
    pub source: usize,
    pub target: usize,
    pub mass: f64,
}

/// Sparse monotone coupling between two 1-D distributions
#[derive(Debug, Clone)]
pub struct MonotoneCoupling {
    /// At most n + m - 1 non-zero flows, in the order the merge produced them
    pub flows: Vec<Flow>,
    /// Σ mass · ground_cost(x_a[source], x_b[target])
    pub cost: f64,
    dim_a: usize,
    dim_b: usize,
}

impl MonotoneCoupling {
    /// Dense transport plan of shape (len(x_a), len(x_b))
    pub fn plan(&self) -> Array2<f64> {
        let mut plan = Array2::<f64>::zeros((self.dim_a, self.dim_b));
        for flow in &self.flows {
            plan[(flow.source, flow.target)] += flow.mass;
        }
        plan
    }
}

/// Solves the exact 1-D optimal transport problem
/// x_a: Source samples
/// x_b: Target samples
/// weights: Source and target sample weights (uniform if unset or empty)
/// metric: Ground cost between samples (default = SqEuclidean)
pub struct EarthMovers1D<'a> {
    x_a: &'a Array1<f64>,
    x_b: &'a Array1<f64>,
    source_weights: Option<&'a Array1<f64>>,
    target_weights: Option<&'a Array1<f64>>,
    metric: MetricType,
}

impl<'a> EarthMovers1D<'a> {
    pub fn new(x_a: &'a Array1<f64>, x_b: &'a Array1<f64>) -> Self {
        Self {
            x_a,
            x_b,
            source_weights: None,
            target_weights: None,
            metric: MetricType::default(),
        }
    }

    pub fn weights<'b>(&'b mut self, source_weights: &'a Array1<f64>, target_weights: &'a Array1<f64>) -> &'b mut Self {
        self.source_weights = Some(source_weights);
        self.target_weights = Some(target_weights);
        self
    }

    pub fn metric<'b>(&'b mut self, metric: MetricType) -> &'b mut Self {
        self.metric = metric;
        self
    }

    fn marginals(&self) -> (Array1<f64>, Array1<f64>) {
        let (dim_a, dim_b) = (self.x_a.len(), self.x_b.len());
        let a = self
            .source_weights
            .map_or_else(|| uniform(dim_a), |a| weights_or_uniform(a, dim_a));
        let b = self
            .target_weights
            .map_or_else(|| uniform(dim_b), |b| weights_or_uniform(b, dim_b));
        (a, b)
    }
}

impl<'a> OTSolver for EarthMovers1D<'a> {
    type Solution = MonotoneCoupling;

    fn check_shape(&self) -> Result<(), OTError> {
        let (a, b) = self.marginals();

        if a.len() != self.x_a.len() || b.len() != self.x_b.len() {
            return Err(OTError::WeightDimensionError {
                dim_a: a.len(),
                dim_b: b.len(),
                dim_m_0: self.x_a.len(),
                dim_m_1: self.x_b.len(),
            });
        }

        Ok(())
    }

    fn solve(&self) -> Result<MonotoneCoupling, OTError> {
        self.check_shape()?;

        if self.x_a.iter().chain(self.x_b.iter()).any(|x| !x.is_finite()) {
            return Err(OTError::ArgError("Samples must be finite".to_string()));
        }

        let (a, mut b) = self.marginals();
        let mass_a = check_histogram(&a, "Source weights")?;
        let mass_b = check_histogram(&b, "Target weights")?;
        check_mass(mass_a, mass_b)?;

        b *= mass_a / mass_b;

        let flows = monotone_flows(self.x_a, self.x_b, &a, &b);
        let cost = flows
            .iter()
            .map(|flow| flow.mass * self.metric.ground_cost(self.x_a[flow.source], self.x_b[flow.target]))
            .sum();

        Ok(MonotoneCoupling {
            flows,
            cost,
            dim_a: self.x_a.len(),
            dim_b: self.x_b.len(),
        })
    }
}

/// Indices that stably sort x
fn argsort(x: &Array1<f64>) -> Vec<usize> {
    let mut order: Vec<usize> = (0..x.len()).collect();
    order.sort_by(|&i, &j| x[i].total_cmp(&x[j]));
    order
}

/// North-west corner rule on the sorted supports
fn monotone_flows(x_a: &Array1<f64>, x_b: &Array1<f64>, a: &Array1<f64>, b: &Array1<f64>) -> Vec<Flow> {
    let order_a = argsort(x_a);
    let order_b = argsort(x_b);

    let mut flows = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    let mut rest_a = a[order_a[0]];
    let mut rest_b = b[order_b[0]];

    while i < order_a.len() && j < order_b.len() {
        let mass = rest_a.min(rest_b);
        if mass > 0. {
            flows.push(Flow {
                source: order_a[i],
                target: order_b[j],
                mass,
            });
        }

        rest_a -= mass;
        rest_b -= mass;

        let (exhausted_a, exhausted_b) = (rest_a <= rest_b, rest_b <= rest_a);
        if exhausted_a {
            i += 1;
            if i < order_a.len() {
                rest_a = a[order_a[i]];
            }
        }
        if exhausted_b {
            j += 1;
            if j < order_b.len() {
                rest_b = b[order_b[j]];
            }
        }
    }

    flows
}

/// Solves the exact 1-D optimal transport problem and returns the OT matrix
/// x_a: Source samples
/// x_b: Target samples
/// a: Source sample weights (defaults to uniform weight if empty)
/// b: Target sample weights (defaults to uniform weight if empty)
/// metric: Ground cost between samples
pub fn emd_1d(
    x_a: &Array1<f64>,
    x_b: &Array1<f64>,
    a: &Array1<f64>,
    b: &Array1<f64>,
    metric: MetricType,
) -> Result<Array2<f64>, OTError> {
    let coupling = EarthMovers1D::new(x_a, x_b).weights(a, b).metric(metric).solve()?;
    Ok(coupling.plan())
}

/// Solves the exact 1-D optimal transport problem and returns the loss, without building the
/// dense plan
pub fn emd2_1d(
    x_a: &Array1<f64>,
    x_b: &Array1<f64>,
    a: &Array1<f64>,
    b: &Array1<f64>,
    metric: MetricType,
) -> Result<f64, OTError> {
    let coupling = EarthMovers1D::new(x_a, x_b).weights(a, b).metric(metric).solve()?;
    Ok(coupling.cost)
}

#[cfg(test)]
mod tests {

    use ndarray::prelude::*;

    use super::EarthMovers1D;
    use crate::metrics::{dist, MetricType};
    use crate::{OTError, OTSolver};

    #[test]
    fn test_emd2_1d_uniform() {
        let x_a = array![0.2, 0.5];
        let x_b = array![0.8, 0.3];
        let empty = Array1::<f64>::zeros(0);

        let cost = super::emd2_1d(&x_a, &x_b, &empty, &empty, MetricType::SqEuclidean).unwrap();

        // 0.2 -> 0.3 and 0.5 -> 0.8
        assert!((cost - 0.05).abs() < 1E-12);
    }

    #[test]
    fn test_emd2_1d_weighted() {
        let x_a = array![0.2, 0.5];
        let x_b = array![0.8, 0.3];
        let a = array![0.8, 0.2];
        let b = array![0.7, 0.3];

        let cost = super::emd2_1d(&x_a, &x_b, &a, &b, MetricType::SqEuclidean).unwrap();
        assert!((cost - 0.201).abs() < 1E-12);

        let plan = super::emd_1d(&x_a, &x_b, &a, &b, MetricType::SqEuclidean).unwrap();
        let truth = array![[0.5, 0.3], [0.2, 0.]];
        assert!(plan.abs_diff_eq(&truth, 1E-12));
    }

    #[test]
    fn test_emd_1d_matches_emd() {
        let x_a = array![1.3, -0.4, 2.2, 0.7, 0.7];
        let x_b = array![0.1, 1.9, -1.2, 0.8];
        let a = array![0.1, 0.3, 0.2, 0.15, 0.25];
        let b = array![0.4, 0.1, 0.3, 0.2];

        let xs = x_a.clone().into_shape((5, 1)).unwrap();
        let xt = x_b.clone().into_shape((4, 1)).unwrap();

        for metric in [MetricType::SqEuclidean, MetricType::Euclidean, MetricType::Minkowski(1.5)] {
            let m = dist(&xs, &xt, metric).unwrap();
            let exact = crate::exact::emd2(&a, &b, &m, None, None).unwrap();
            let sorted = super::emd2_1d(&x_a, &x_b, &a, &b, metric).unwrap();

            assert!((exact - sorted).abs() < 1E-10, "{:?}: {} != {}", metric, exact, sorted);
        }
    }

    #[test]
    fn test_emd_1d_plan_matches_emd() {
        let x_a = array![1.3, -0.4, 2.2, 0.7, 0.1];
        let x_b = array![0.2, 1.9, -1.2, 0.8];
        let a = array![0.1, 0.3, 0.2, 0.15, 0.25];
        let b = array![0.4, 0.1, 0.3, 0.2];

        let xs = x_a.clone().into_shape((5, 1)).unwrap();
        let xt = x_b.clone().into_shape((4, 1)).unwrap();

        for metric in [MetricType::SqEuclidean, MetricType::Minkowski(1.5)] {
            let m = dist(&xs, &xt, metric).unwrap();
            let exact = crate::exact::emd(&a, &b, &m, None, None).unwrap();
            let sorted = super::emd_1d(&x_a, &x_b, &a, &b, metric).unwrap();

            assert!(exact.abs_diff_eq(&sorted, 1E-12), "{:?}", metric);
        }
    }

    #[test]
    fn test_emd_1d_marginals() {
        let x_a = array![3., 1., 2.];
        let x_b = array![0.5, 2.5];
        let a = array![0.2, 0.5, 0.3];
        let b = array![0.6, 0.4];

        let coupling = EarthMovers1D::new(&x_a, &x_b).weights(&a, &b).solve().unwrap();

        assert!(coupling.flows.len() <= 4);
        let plan = coupling.plan();
        assert!(plan.sum_axis(Axis(1)).abs_diff_eq(&a, 1E-12));
        assert!(plan.sum_axis(Axis(0)).abs_diff_eq(&b, 1E-12));
    }

    #[test]
    fn test_emd_1d_rejects_bad_input() {
        let x_a = array![0.2, 0.5];
        let x_b = array![0.8, 0.3];

        let short = array![1.0];
        let uniform = array![0.5, 0.5];
        assert!(matches!(
            EarthMovers1D::new(&x_a, &x_b).weights(&short, &uniform).solve(),
            Err(OTError::WeightDimensionError { .. })
        ));

        let heavy = array![1.0, 1.0];
        assert!(matches!(
            super::emd2_1d(&x_a, &x_b, &uniform, &heavy, MetricType::SqEuclidean),
            Err(OTError::HistogramSumError { .. })
        ));

        let nan = array![f64::NAN, 0.3];
        assert!(matches!(
            super::emd2_1d(&x_a, &nan, &uniform, &uniform, MetricType::SqEuclidean),
            Err(OTError::ArgError(_))
        ));
    }
}
