use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::csr::CsrMatrix;
use crate::error::{RecError, Result};

/// Additive denominator epsilon shared by all similarity kernels.
/// Keeps zero-support item pairs at a finite similarity of zero.
pub(crate) const DENOM_EPS: f32 = 1e-6;

/// Pairwise item-similarity family.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum SimilarityKernel {
    /// `dot / (|a_i| * |a_j| + shrinkage + eps)`; with `normalize` off the
    /// kernel degenerates to the raw dot product.
    Cosine { normalize: bool },
    /// `dot / (n_i^alpha * n_j^(1-alpha) + shrinkage + eps)` where `n` is the
    /// squared L2 norm. `alpha` must lie in `[0, 1]`.
    AsymmetricCosine { alpha: f32 },
    /// Binarized `c / (s_i + s_j - c + shrinkage + eps)`.
    Jaccard,
    /// Binarized `c / (c + alpha*(s_i - c) + beta*(s_j - c) + shrinkage + eps)`.
    Tversky { alpha: f32, beta: f32 },
}

impl SimilarityKernel {
    fn binarized(&self) -> bool {
        matches!(self, SimilarityKernel::Jaccard | SimilarityKernel::Tversky { .. })
    }

    fn validate(&self) -> Result<()> {
        if let SimilarityKernel::AsymmetricCosine { alpha } = self {
            if !(0.0..=1.0).contains(alpha) {
                return Err(RecError::InvalidParameter(format!(
                    "asymmetric cosine alpha must be in [0, 1], got {}",
                    alpha
                )));
            }
        }
        Ok(())
    }
}

/// Keep the `k` largest values of a row. Ties broken by lower item index;
/// surviving entries are returned in ascending index order.
pub(crate) fn prune_row(mut entries: Vec<(i32, f32)>, k: usize) -> (Vec<i32>, Vec<f32>) {
    let take = k.min(entries.len());
    if take == 0 {
        return (vec![], vec![]);
    }
    if take < entries.len() {
        entries.select_nth_unstable_by(take - 1, |a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        entries.truncate(take);
    }
    // Sort by index so it's a valid CSR row
    entries.sort_unstable_by_key(|&(idx, _)| idx);
    (
        entries.iter().map(|&(idx, _)| idx).collect(),
        entries.iter().map(|&(_, val)| val).collect(),
    )
}

/// Compute the item×item similarity matrix of `x` (user-major) under
/// `kernel`, with top-`top_k` pruning per row and a forced zero diagonal.
///
/// Item rows are partitioned across `n_thread` workers; the result does not
/// depend on the thread count.
pub fn compute_similarity(
    x: &CsrMatrix,
    kernel: &SimilarityKernel,
    top_k: usize,
    shrinkage: f32,
    n_thread: usize,
) -> Result<CsrMatrix> {
    kernel.validate()?;
    let pool = crate::thread_pool(n_thread)?;

    let xw = if kernel.binarized() { x.binarize() } else { x.clone() };
    let xt = xw.transpose(); // item-major, I x U
    let n_items = x.n_cols;

    // Per-item statistic entering the denominator
    let stats: Vec<f32> = match kernel {
        SimilarityKernel::Cosine { .. } => (0..n_items)
            .map(|i| {
                let (_, vals) = xt.row(i);
                vals.iter().map(|v| v * v).sum::<f32>().sqrt()
            })
            .collect(),
        SimilarityKernel::AsymmetricCosine { .. } => (0..n_items)
            .map(|i| {
                let (_, vals) = xt.row(i);
                vals.iter().map(|v| v * v).sum::<f32>()
            })
            .collect(),
        SimilarityKernel::Jaccard | SimilarityKernel::Tversky { .. } => {
            (0..n_items).map(|i| xt.row_nnz(i) as f32).collect()
        }
    };

    let rows: Vec<(Vec<i32>, Vec<f32>)> = pool.install(|| {
        (0..n_items)
            .into_par_iter()
            .map(|i| {
                // Row i of X^T * X via a dense accumulator over items
                let mut acc = vec![0.0f32; n_items];
                let (users, vals) = xt.row(i);
                for (&u, &v) in users.iter().zip(vals.iter()) {
                    let (cols, uvals) = xw.row(u as usize);
                    for (&j, &w) in cols.iter().zip(uvals.iter()) {
                        acc[j as usize] += v * w;
                    }
                }

                let entries: Vec<(i32, f32)> = acc
                    .iter()
                    .enumerate()
                    .filter(|&(j, &dot)| j != i && dot != 0.0)
                    .map(|(j, &dot)| {
                        let denom = match kernel {
                            SimilarityKernel::Cosine { normalize: false } => return (j as i32, dot),
                            SimilarityKernel::Cosine { normalize: true } => {
                                stats[i] * stats[j]
                            }
                            SimilarityKernel::AsymmetricCosine { alpha } => {
                                stats[i].powf(*alpha) * stats[j].powf(1.0 - *alpha)
                            }
                            SimilarityKernel::Jaccard => stats[i] + stats[j] - dot,
                            SimilarityKernel::Tversky { alpha, beta } => {
                                dot + alpha * (stats[i] - dot) + beta * (stats[j] - dot)
                            }
                        };
                        (j as i32, dot / (denom + shrinkage + DENOM_EPS))
                    })
                    .collect();

                prune_row(entries, top_k)
            })
            .collect()
    });

    let w = CsrMatrix::from_rows(rows, n_items);
    debug!(
        "similarity matrix computed: {} items, {} nonzeros, top_k={}",
        n_items,
        w.nnz(),
        top_k
    );
    Ok(w)
}
