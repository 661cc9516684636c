//! Mean correlation coefficient between two sets of latent variables.

use super::assignment::linear_sum_assignment;
use crate::{CausalMetaError, Result};
use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Correlation used to compare latent columns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationMethod {
    /// Pearson's correlation coefficient
    Pearson,
    /// Spearman's rank correlation coefficient
    Spearman,
}

impl FromStr for CorrelationMethod {
    type Err = CausalMetaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pearson" => Ok(Self::Pearson),
            "spearman" => Ok(Self::Spearman),
            other => Err(CausalMetaError::InvalidCorrelationMethod(other.to_string())),
        }
    }
}

/// Matched column pairs, sorted by `rows`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Permutation {
    pub rows: Vec<usize>,
    pub cols: Vec<usize>,
}

/// Result of [`mean_corr_coef`].
#[derive(Clone, Debug)]
pub struct MccScore {
    /// Summed matched |correlation| divided by `max(d1, d2)`
    pub score: f64,
    /// Optimal one-to-one column matching
    pub permutation: Permutation,
    /// Absolute correlation matrix, `d1 x d2`
    pub correlation: Array2<f64>,
}

/// Mean correlation coefficient between `x: [N, d1]` and `y: [N, d2]`.
///
/// `method` must be `"pearson"` or `"spearman"`; anything else fails before
/// any computation happens.
pub fn mean_corr_coef(x: ArrayView2<f64>, y: ArrayView2<f64>, method: &str) -> Result<MccScore> {
    let method = method.parse::<CorrelationMethod>()?;
    mean_corr_coef_with(x, y, method)
}

/// Typed variant of [`mean_corr_coef`].
pub fn mean_corr_coef_with(
    x: ArrayView2<f64>,
    y: ArrayView2<f64>,
    method: CorrelationMethod,
) -> Result<MccScore> {
    let correlation = correlation_matrix(x, y, method)?.mapv(f64::abs);

    let cost = correlation.mapv(|c| -c);
    let pairs = linear_sum_assignment(cost.view())?;

    let matched: f64 = pairs.iter().map(|&(r, c)| correlation[[r, c]]).sum();
    let score = matched / x.ncols().max(y.ncols()) as f64;

    let (rows, cols) = pairs.into_iter().unzip();
    Ok(MccScore {
        score,
        permutation: Permutation { rows, cols },
        correlation,
    })
}

/// Cross-correlation matrix `[d1, d2]` between the columns of `x` and `y`.
///
/// Columns with zero variance produce NaN entries, which the assignment step
/// rejects.
pub fn correlation_matrix(
    x: ArrayView2<f64>,
    y: ArrayView2<f64>,
    method: CorrelationMethod,
) -> Result<Array2<f64>> {
    if x.nrows() != y.nrows() {
        return Err(CausalMetaError::ShapeMismatch {
            expected: vec![x.nrows() as i64, y.ncols() as i64],
            actual: vec![y.nrows() as i64, y.ncols() as i64],
        });
    }
    if x.nrows() < 2 {
        return Err(CausalMetaError::Assignment(format!(
            "need at least two samples, got {}",
            x.nrows()
        )));
    }

    Ok(match method {
        CorrelationMethod::Pearson => pearson(x, y),
        CorrelationMethod::Spearman => pearson(rank_columns(x).view(), rank_columns(y).view()),
    })
}

fn pearson(x: ArrayView2<f64>, y: ArrayView2<f64>) -> Array2<f64> {
    let xc = center(x);
    let yc = center(y);

    let cov = xc.t().dot(&yc);
    let x_norm = xc.map_axis(Axis(0), |c| c.dot(&c).sqrt());
    let y_norm = yc.map_axis(Axis(0), |c| c.dot(&c).sqrt());

    let mut cc = cov;
    for ((i, j), v) in cc.indexed_iter_mut() {
        *v /= x_norm[i] * y_norm[j];
    }
    cc
}

fn center(x: ArrayView2<f64>) -> Array2<f64> {
    let n = x.nrows() as f64;
    let mean = x.sum_axis(Axis(0)) / n;
    &x - &mean
}

/// Rank each column (1-based), ties get their average rank.
fn rank_columns(x: ArrayView2<f64>) -> Array2<f64> {
    let (n, d) = x.dim();
    let mut ranks = Array2::zeros((n, d));

    for j in 0..d {
        let col = x.column(j);
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| col[a].total_cmp(&col[b]));

        let mut start = 0;
        while start < n {
            let mut end = start;
            while end + 1 < n && col[order[end + 1]] == col[order[start]] {
                end += 1;
            }
            let rank = (start + end) as f64 / 2.0 + 1.0;
            for &idx in &order[start..=end] {
                ranks[[idx, j]] = rank;
            }
            start = end + 1;
        }
    }

    ranks
}
