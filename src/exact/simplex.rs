//! Network simplex on the transportation polytope
//!
//! The bipartite flow network has one node per source bin and per target bin. A basis is a
//! spanning tree over these m + n nodes made of m + n - 1 basic cells (degenerate zero flows
//! included). Each pivot prices the non-basic cells with the tree potentials, brings in the most
//! negative reduced cost and pushes flow around the unique cycle that cell closes in the tree.

use ndarray::prelude::*;
use ndarray_stats::QuantileExt;

use super::SimplexStatus;

pub(crate) struct SimplexOutput {
    pub plan: Array2<f64>,
    pub alpha: Array1<f64>,
    pub beta: Array1<f64>,
    pub status: SimplexStatus,
    pub iterations: usize,
}

/// Basic cells of the current spanning tree together with their flows
struct TransportTree {
    dim_a: usize,
    dim_b: usize,
    plan: Array2<f64>,
    is_basic: Array2<bool>,
    basis: Vec<(usize, usize)>,
}

impl TransportTree {
    /// Initial basis from the north-west corner rule. The staircase from (0, 0) to
    /// (m - 1, n - 1) always has exactly m + n - 1 cells, so it is a spanning tree even when
    /// supplies and demands run out simultaneously.
    fn north_west_corner(a: &Array1<f64>, b: &Array1<f64>) -> Self {
        let (dim_a, dim_b) = (a.len(), b.len());
        let mut supply = a.clone();
        let mut demand = b.clone();
        let mut plan = Array2::<f64>::zeros((dim_a, dim_b));
        let mut is_basic = Array2::from_elem((dim_a, dim_b), false);
        let mut basis = Vec::with_capacity(dim_a + dim_b - 1);

        let (mut i, mut j) = (0, 0);
        while i < dim_a && j < dim_b {
            let flow = supply[i].min(demand[j]);
            plan[(i, j)] = flow;
            is_basic[(i, j)] = true;
            basis.push((i, j));
            supply[i] -= flow;
            demand[j] -= flow;

            if i == dim_a - 1 {
                j += 1;
            } else if j == dim_b - 1 || supply[i] <= demand[j] {
                i += 1;
            } else {
                j += 1;
            }
        }

        Self {
            dim_a,
            dim_b,
            plan,
            is_basic,
            basis,
        }
    }

    /// Node ids: source i is i, target j is dim_a + j. Each entry lists the basis indices of the
    /// cells incident to the node.
    fn adjacency(&self) -> Vec<Vec<usize>> {
        let mut adjacency = vec![Vec::new(); self.dim_a + self.dim_b];
        for (idx, &(i, j)) in self.basis.iter().enumerate() {
            adjacency[i].push(idx);
            adjacency[self.dim_a + j].push(idx);
        }
        adjacency
    }

    /// Solves alpha_i + beta_j = C_ij on the basic cells, with alpha_0 = 0
    fn potentials(&self, cost: &Array2<f64>, adjacency: &[Vec<usize>]) -> (Array1<f64>, Array1<f64>) {
        let mut alpha = Array1::<f64>::zeros(self.dim_a);
        let mut beta = Array1::<f64>::zeros(self.dim_b);
        let mut visited = vec![false; self.dim_a + self.dim_b];

        let mut stack = vec![0];
        visited[0] = true;

        while let Some(node) = stack.pop() {
            for &idx in &adjacency[node] {
                let (i, j) = self.basis[idx];
                let (other, value) = if node < self.dim_a {
                    (self.dim_a + j, cost[(i, j)] - alpha[i])
                } else {
                    (i, cost[(i, j)] - beta[j])
                };

                if visited[other] {
                    continue;
                }
                visited[other] = true;

                if other < self.dim_a {
                    alpha[other] = value;
                } else {
                    beta[other - self.dim_a] = value;
                }
                stack.push(other);
            }
        }

        (alpha, beta)
    }

    /// Most negative reduced cost over the non-basic cells, first in row-major order on ties
    fn entering_cell(
        &self,
        cost: &Array2<f64>,
        alpha: &Array1<f64>,
        beta: &Array1<f64>,
        tolerance: f64,
    ) -> Option<(usize, usize)> {
        let mut best = -tolerance;
        let mut entering = None;

        for ((i, j), &c) in cost.indexed_iter() {
            if self.is_basic[(i, j)] {
                continue;
            }

            let reduced = c - alpha[i] - beta[j];
            if reduced < best {
                best = reduced;
                entering = Some((i, j));
            }
        }

        entering
    }

    /// Basis indices along the tree path from source `from` to target `to`, ordered from the
    /// source end
    fn tree_path(&self, from: usize, to: usize, adjacency: &[Vec<usize>]) -> Vec<usize> {
        let target = self.dim_a + to;
        let mut parent: Vec<Option<(usize, usize)>> = vec![None; self.dim_a + self.dim_b];
        let mut visited = vec![false; self.dim_a + self.dim_b];

        let mut stack = vec![from];
        visited[from] = true;

        while let Some(node) = stack.pop() {
            if node == target {
                break;
            }
            for &idx in &adjacency[node] {
                let (i, j) = self.basis[idx];
                let other = if node < self.dim_a { self.dim_a + j } else { i };
                if !visited[other] {
                    visited[other] = true;
                    parent[other] = Some((node, idx));
                    stack.push(other);
                }
            }
        }

        let mut path = Vec::new();
        let mut node = target;
        while let Some((previous, idx)) = parent[node] {
            path.push(idx);
            node = previous;
        }
        path.reverse();

        path
    }

    /// Pushes flow around the cycle closed by the entering cell and swaps it into the basis
    fn pivot(&mut self, entering: (usize, usize), adjacency: &[Vec<usize>]) {
        let (p, q) = entering;
        let path = self.tree_path(p, q, adjacency);

        // along the path, cells alternate between losing and gaining flow, starting with a loss
        // next to the entering source
        let mut theta = f64::INFINITY;
        let mut leaving = path[0];
        for &idx in path.iter().step_by(2) {
            let flow = self.plan[self.basis[idx]];
            if flow < theta {
                theta = flow;
                leaving = idx;
            }
        }

        for (k, &idx) in path.iter().enumerate() {
            let cell = self.basis[idx];
            if k % 2 == 0 {
                self.plan[cell] -= theta;
            } else {
                self.plan[cell] += theta;
            }
        }

        let leaving_cell = self.basis[leaving];
        self.plan[leaving_cell] = 0.;
        self.is_basic[leaving_cell] = false;

        self.plan[entering] = theta;
        self.is_basic[entering] = true;
        self.basis[leaving] = entering;
    }
}

/// Solves min ⟨γ, C⟩ over plans with row sums a and column sums b. Both histograms must carry
/// the same total mass.
pub(crate) fn network_simplex(
    a: &Array1<f64>,
    b: &Array1<f64>,
    cost: &Array2<f64>,
    max_iter: usize,
) -> SimplexOutput {
    let mut tree = TransportTree::north_west_corner(a, b);

    let max_cost = cost.mapv(f64::abs).max().copied().unwrap_or(0.);
    let tolerance = 1E-12 * (1. + max_cost);

    let mut iterations = 0;
    loop {
        let adjacency = tree.adjacency();
        let (alpha, beta) = tree.potentials(cost, &adjacency);

        let entering = match tree.entering_cell(cost, &alpha, &beta, tolerance) {
            Some(cell) => cell,
            None => {
                log::debug!("network simplex: optimal after {} pivots", iterations);
                return SimplexOutput {
                    plan: tree.plan,
                    alpha,
                    beta,
                    status: SimplexStatus::Optimal,
                    iterations,
                };
            }
        };

        if iterations >= max_iter {
            return SimplexOutput {
                plan: tree.plan,
                alpha,
                beta,
                status: SimplexStatus::MaxIterReached,
                iterations,
            };
        }

        tree.pivot(entering, &adjacency);
        iterations += 1;
    }
}
