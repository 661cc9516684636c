//! Rectangular linear assignment (Hungarian algorithm with potentials).

use crate::{CausalMetaError, Result};
use ndarray::ArrayView2;

/// Solve `min sum cost[r, c]` over one-to-one matchings of size `min(rows, cols)`.
///
/// Returns `(row, col)` pairs sorted by row. Fails on empty or non-finite input.
pub fn linear_sum_assignment(cost: ArrayView2<f64>) -> Result<Vec<(usize, usize)>> {
    let (rows, cols) = cost.dim();
    if rows == 0 || cols == 0 {
        return Err(CausalMetaError::Assignment(format!(
            "cost matrix is empty: {}x{}",
            rows, cols
        )));
    }
    if cost.iter().any(|v| !v.is_finite()) {
        return Err(CausalMetaError::Assignment(
            "matrix contains invalid numeric entries".into(),
        ));
    }

    // The solver needs rows <= cols.
    if rows > cols {
        let mut pairs: Vec<(usize, usize)> = hungarian(cost.t())
            .into_iter()
            .map(|(r, c)| (c, r))
            .collect();
        pairs.sort_unstable();
        return Ok(pairs);
    }

    Ok(hungarian(cost))
}

fn hungarian(cost: ArrayView2<f64>) -> Vec<(usize, usize)> {
    let (n, m) = cost.dim();
    // 1-indexed potentials; column 0 is the virtual start column.
    let mut u = vec![0.0f64; n + 1];
    let mut v = vec![0.0f64; m + 1];
    let mut owner = vec![0usize; m + 1];
    let mut way = vec![0usize; m + 1];

    for i in 1..=n {
        owner[0] = i;
        let mut j0 = 0usize;
        let mut minv = vec![f64::INFINITY; m + 1];
        let mut used = vec![false; m + 1];

        loop {
            used[j0] = true;
            let i0 = owner[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0usize;

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
                    u[owner[j]] += delta;
                    v[j] -= delta;
                } else {
                    minv[j] -= delta;
                }
            }

            j0 = j1;
            if owner[j0] == 0 {
                break;
            }
        }

        // Augment along the alternating path
        loop {
            let j1 = way[j0];
            owner[j0] = owner[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut pairs: Vec<(usize, usize)> = (1..=m)
        .filter(|&j| owner[j] != 0)
        .map(|j| (owner[j] - 1, j - 1))
        .collect();
    pairs.sort_unstable();
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn total(cost: &ndarray::Array2<f64>, pairs: &[(usize, usize)]) -> f64 {
        pairs.iter().map(|&(r, c)| cost[[r, c]]).sum()
    }

    #[test]
    fn test_square_assignment() {
        let cost = array![[4.0, 1.0, 3.0], [2.0, 0.0, 5.0], [3.0, 2.0, 2.0]];
        let pairs = linear_sum_assignment(cost.view()).unwrap();
        assert_eq!(pairs, vec![(0, 1), (1, 0), (2, 2)]);
        assert_eq!(total(&cost, &pairs), 5.0);
    }

    #[test]
    fn test_beats_greedy() {
        // Greedy picks (0,0)=1 first and is forced into (1,1)=100.
        let cost = array![[1.0, 2.0], [2.0, 100.0]];
        let pairs = linear_sum_assignment(cost.view()).unwrap();
        assert_eq!(pairs, vec![(0, 1), (1, 0)]);
    }

    #[test]
    fn test_rectangular_both_ways() {
        let wide = array![[5.0, 1.0, 9.0, 3.0], [2.0, 8.0, 0.5, 7.0]];
        let pairs = linear_sum_assignment(wide.view()).unwrap();
        assert_eq!(pairs, vec![(0, 1), (1, 2)]);

        let tall = wide.t().to_owned();
        let pairs = linear_sum_assignment(tall.view()).unwrap();
        assert_eq!(pairs, vec![(1, 0), (2, 1)]);
    }

    #[test]
    fn test_empty_and_nan_fail() {
        let empty = ndarray::Array2::<f64>::zeros((0, 3));
        assert!(linear_sum_assignment(empty.view()).is_err());

        let nan = array![[1.0, f64::NAN], [0.0, 1.0]];
        assert!(matches!(
            linear_sum_assignment(nan.view()),
            Err(CausalMetaError::Assignment(_))
        ));
    }
}
