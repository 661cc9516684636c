//! Gaussian mutual information between latent dimensions.

use super::mcc::{correlation_matrix, CorrelationMethod};
use crate::{CausalMetaError, Result};
use ndarray::{Array2, ArrayView2};
use std::str::FromStr;

/// How pairwise estimates are combined.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reduction {
    Mean,
    Sum,
    None,
}

impl FromStr for Reduction {
    type Err = CausalMetaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mean" => Ok(Self::Mean),
            "sum" => Ok(Self::Sum),
            "none" => Ok(Self::None),
            other => Err(CausalMetaError::InvalidReduction(other.to_string())),
        }
    }
}

/// Reduced or full pairwise mutual information.
#[derive(Clone, Debug)]
pub enum MutualInfo {
    Scalar(f64),
    Matrix(Array2<f64>),
}

impl MutualInfo {
    pub fn scalar(&self) -> Option<f64> {
        match self {
            Self::Scalar(v) => Some(*v),
            Self::Matrix(_) => None,
        }
    }
}

/// Estimate `I(x_i; x_j) = -0.5 ln(1 - rho_ij^2)` for every column pair of `x`.
///
/// `Mean` and `Sum` reduce over the strict upper triangle; `None` returns the
/// symmetric matrix with a zero diagonal.
pub fn mutual_info_estimation(x: ArrayView2<f64>, reduction: Reduction) -> Result<MutualInfo> {
    let d = x.ncols();
    let rho = correlation_matrix(x, x, CorrelationMethod::Pearson)?;

    let mut mi = Array2::zeros((d, d));
    for i in 0..d {
        for j in 0..d {
            if i != j {
                let r2 = rho[[i, j]].powi(2).min(1.0 - 1e-12);
                mi[[i, j]] = -0.5 * (1.0 - r2).ln();
            }
        }
    }

    let upper: Vec<f64> = (0..d)
        .flat_map(|i| (i + 1..d).map(move |j| (i, j)))
        .map(|(i, j)| mi[[i, j]])
        .collect();

    Ok(match reduction {
        Reduction::None => MutualInfo::Matrix(mi),
        Reduction::Sum => MutualInfo::Scalar(upper.iter().sum()),
        Reduction::Mean if upper.is_empty() => MutualInfo::Scalar(0.0),
        Reduction::Mean => MutualInfo::Scalar(upper.iter().sum::<f64>() / upper.len() as f64),
    })
}
