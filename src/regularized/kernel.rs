use ndarray::prelude::*;
use ndarray::Zip;

/// Log-domain application of a Gibbs kernel K = exp(-M/reg) to batches of scaling vectors.
///
/// Scalings are stored column-wise: a batch of h vectors of length n is an (n, h) matrix of
/// logarithms. Implementations must accept -inf entries (zero scalings).
pub trait GibbsKernel: Sync {
    /// (rows, cols) of the underlying kernel
    fn shape(&self) -> (usize, usize);

    /// out[i, k] = log sum_j K[i, j] exp(log_x[j, k])
    fn log_apply(&self, log_x: ArrayView2<f64>, out: ArrayViewMut2<f64>);

    /// out[j, k] = log sum_i K[i, j] exp(log_x[i, k])
    fn log_apply_transpose(&self, log_x: ArrayView2<f64>, out: ArrayViewMut2<f64>);
}

/// Gibbs kernel stored through its logarithm -M/reg
#[derive(Debug, Clone)]
pub struct LogGibbsKernel {
    log_k: Array2<f64>,
}

impl LogGibbsKernel {
    #[allow(non_snake_case)]
    pub fn new(M: &Array2<f64>, reg: f64) -> Self {
        Self {
            log_k: M.mapv(|m| -m / reg),
        }
    }

    /// Transport plan diag(u) K diag(v) for one column of scalings
    pub fn plan(&self, log_u: ArrayView1<f64>, log_v: ArrayView1<f64>) -> Array2<f64> {
        let mut plan = self.log_k.clone();

        Zip::from(plan.rows_mut())
            .and(&log_u)
            .par_for_each(|mut row, &lu| {
                azip!((g in &mut row, &lv in &log_v) *g = (lu + *g + lv).exp());
            });

        plan
    }

    /// ⟨diag(u_k) K diag(v_k), M⟩ for every column k, without materializing the plans
    #[allow(non_snake_case)]
    pub fn costs(&self, log_u: ArrayView2<f64>, log_v: ArrayView2<f64>, M: &Array2<f64>) -> Array1<f64> {
        let n_hists = log_u.ncols();
        let mut costs = Array1::<f64>::zeros(n_hists);

        for (k, cost) in costs.iter_mut().enumerate() {
            let lu = log_u.column(k);
            let lv = log_v.column(k);
            let mut total = 0.;

            for ((row, m_row), &lu_i) in self.log_k.rows().into_iter().zip(M.rows()).zip(lu.iter()) {
                if lu_i == f64::NEG_INFINITY {
                    continue;
                }
                azip!((&lk in &row, &m in &m_row, &lv_j in &lv) total += (lu_i + lk + lv_j).exp() * m);
            }

            *cost = total;
        }

        costs
    }
}

impl GibbsKernel for LogGibbsKernel {
    fn shape(&self) -> (usize, usize) {
        self.log_k.dim()
    }

    fn log_apply(&self, log_x: ArrayView2<f64>, mut out: ArrayViewMut2<f64>) {
        Zip::from(out.rows_mut())
            .and(self.log_k.rows())
            .par_for_each(|out_row, k_row| log_sum_exp_row(out_row, k_row, log_x));
    }

    fn log_apply_transpose(&self, log_x: ArrayView2<f64>, mut out: ArrayViewMut2<f64>) {
        Zip::from(out.rows_mut())
            .and(self.log_k.columns())
            .par_for_each(|out_row, k_col| log_sum_exp_row(out_row, k_col, log_x));
    }
}

/// out[k] = log sum_j exp(log_k[j] + log_x[j, k])
///
/// Two passes over the operands, so the terms are never materialized.
fn log_sum_exp_row(mut out: ArrayViewMut1<f64>, log_k: ArrayView1<f64>, log_x: ArrayView2<f64>) {
    for (o, x_col) in out.iter_mut().zip(log_x.columns()) {
        let max = Zip::from(&log_k)
            .and(&x_col)
            .fold(f64::NEG_INFINITY, |acc, &lk, &lx| acc.max(lk + lx));

        *o = if max == f64::NEG_INFINITY {
            f64::NEG_INFINITY
        } else {
            let sum = Zip::from(&log_k)
                .and(&x_col)
                .fold(0., |acc, &lk, &lx| acc + (lk + lx - max).exp());
            max + sum.ln()
        };
    }
}
