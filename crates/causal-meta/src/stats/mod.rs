//! Statistics for evaluating learned contexts.
//!
//! Provides:
//! - `mean_corr_coef` - permutation-invariant correlation score (MCC)
//! - `mutual_info_estimation` - pairwise Gaussian mutual information
//! - `linear_sum_assignment` - optimal bipartite matching used by MCC

mod assignment;
mod mcc;
mod mutual_info;

pub use assignment::linear_sum_assignment;
pub use mcc::{
    correlation_matrix, mean_corr_coef, mean_corr_coef_with, CorrelationMethod, MccScore,
    Permutation,
};
pub use mutual_info::{mutual_info_estimation, MutualInfo, Reduction};
