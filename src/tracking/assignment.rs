// Rectangular linear sum assignment (Hungarian method with potentials,
// shortest augmenting path variant), O(n^2 m) for an n × m matrix, n <= m.

use ndarray::{Array2, ArrayView2};

// Minimum-cost assignment. Returns, for every row, the column it is assigned
// to. When there are more rows than columns some rows stay unassigned.
pub fn min_cost_assignment(cost: ArrayView2<f64>) -> Vec<Option<usize>> {
    let (nrows, ncols) = cost.dim();
    if nrows == 0 || ncols == 0 {
        return vec![None; nrows];
    }

    if nrows > ncols {
        let col_to_row = solve(cost.t());
        let mut row_to_col = vec![None; nrows];
        for (col, row) in col_to_row.into_iter().enumerate() {
            if let Some(row) = row {
                row_to_col[row] = Some(col);
            }
        }
        return row_to_col;
    }

    solve(cost)
}

// Maximum-weight assignment over a weight matrix.
pub fn max_weight_assignment(weights: ArrayView2<f64>) -> Vec<Option<usize>> {
    let wmax = weights.iter().copied().fold(0.0, f64::max);
    let cost: Array2<f64> = weights.mapv(|w| wmax - w);
    min_cost_assignment(cost.view())
}

// Assumes nrows <= ncols. Indices into `u`, `p`, `way` are 1-based with 0 as
// the virtual start column.
fn solve(cost: ArrayView2<f64>) -> Vec<Option<usize>> {
    let (n, m) = cost.dim();
    debug_assert!(n <= m);

    let mut u = vec![0.0; n + 1];
    let mut v = vec![0.0; m + 1];
    let mut p = vec![0usize; m + 1];
    let mut way = vec![0usize; m + 1];

    for i in 1..=n {
        p[0] = i;
        let mut j0 = 0;
        let mut minv = vec![f64::INFINITY; m + 1];
        let mut used = vec![false; m + 1];

        loop {
            used[j0] = true;
            let i0 = p[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0;

            for j in 1..=m {
                if used[j] {
                    continue;
                }
                let cur = cost[[i0 - 1, j - 1]] - u[i0] - v[j];
                if cur < minv[j] {
                    minv[j] = cur;
                    way[j] = j0;
                }
                if minv[j] < delta {
                    delta = minv[j];
                    j1 = j;
                }
            }

            for j in 0..=m {
                if used[j] {
                    u[p[j]] += delta;
                    v[j] -= delta;
                } else {
                    minv[j] -= delta;
                }
            }

            j0 = j1;
            if p[j0] == 0 {
                break;
            }
        }

        // unwind the augmenting path
        loop {
            let j1 = way[j0];
            p[j0] = p[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut row_to_col = vec![None; n];
    for j in 1..=m {
        if p[j] != 0 {
            row_to_col[p[j] - 1] = Some(j - 1);
        }
    }
    row_to_col
}
