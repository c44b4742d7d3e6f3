use log::debug;
use rayon::prelude::*;

use crate::csr::CsrMatrix;
use crate::error::{RecError, Result};
use crate::knn::prune_row;

fn check_alpha(alpha: f32) -> Result<()> {
    if alpha <= 0.0 {
        return Err(RecError::InvalidParameter(format!(
            "diffusion alpha must be > 0, got {}",
            alpha
        )));
    }
    Ok(())
}

/// Raise stored values to `alpha`, divide column `c` by `col_scale[c]`, then
/// normalize each row to sum 1. Rows with zero sum are left untouched.
fn row_stochastic(x: &CsrMatrix, alpha: f32, col_scale: Option<&[f32]>) -> CsrMatrix {
    let mut out = x.clone();
    for r in 0..out.n_rows {
        let start = out.indptr[r] as usize;
        let end = out.indptr[r + 1] as usize;
        let mut sum = 0.0f32;
        for idx in start..end {
            let mut v = out.data[idx].powf(alpha);
            if let Some(scale) = col_scale {
                v /= scale[out.indices[idx] as usize];
            }
            out.data[idx] = v;
            sum += v;
        }
        if sum != 0.0 {
            for idx in start..end {
                out.data[idx] /= sum;
            }
        }
    }
    out
}

/// Multiply `p_iu` (I x U) by `p_ui` (U x I) row-wise, keeping the diagonal,
/// with optional top-K pruning and L1 row renormalization.
fn diffuse(
    p_iu: &CsrMatrix,
    p_ui: &CsrMatrix,
    top_k: Option<usize>,
    normalize_weight: bool,
    n_thread: usize,
) -> Result<CsrMatrix> {
    let pool = crate::thread_pool(n_thread)?;
    let n_items = p_iu.n_rows;

    let rows: Vec<(Vec<i32>, Vec<f32>)> = pool.install(|| {
        (0..n_items)
            .into_par_iter()
            .map(|i| {
                let mut acc = vec![0.0f32; n_items];
                let (users, pvals) = p_iu.row(i);
                for (&u, &p) in users.iter().zip(pvals.iter()) {
                    let (cols, qvals) = p_ui.row(u as usize);
                    for (&j, &q) in cols.iter().zip(qvals.iter()) {
                        acc[j as usize] += p * q;
                    }
                }
                let entries: Vec<(i32, f32)> = acc
                    .iter()
                    .enumerate()
                    .filter(|&(_, &v)| v != 0.0)
                    .map(|(j, &v)| (j as i32, v))
                    .collect();

                let (idx, mut val) = match top_k {
                    Some(k) => prune_row(entries, k),
                    None => (
                        entries.iter().map(|&(j, _)| j).collect(),
                        entries.iter().map(|&(_, v)| v).collect(),
                    ),
                };
                if normalize_weight {
                    let sum: f32 = val.iter().map(|v| v.abs()).sum();
                    if sum != 0.0 {
                        for v in val.iter_mut() {
                            *v /= sum;
                        }
                    }
                }
                (idx, val)
            })
            .collect()
    });

    let w = CsrMatrix::from_rows(rows, n_items);
    debug!(
        "diffusion matrix computed: {} items, {} nonzeros",
        n_items,
        w.nnz()
    );
    Ok(w)
}

/// Length-2 random-walk transition matrix `W = P_iu * P_ui` over the
/// user–item bipartite graph, with edge weights raised to `alpha`.
pub fn compute_p3alpha(
    x: &CsrMatrix,
    alpha: f32,
    top_k: Option<usize>,
    normalize_weight: bool,
    n_thread: usize,
) -> Result<CsrMatrix> {
    check_alpha(alpha)?;
    let p_ui = row_stochastic(x, alpha, None);
    let p_iu = row_stochastic(&x.transpose(), alpha, None);
    diffuse(&p_iu, &p_ui, top_k, normalize_weight, n_thread)
}

/// P3alpha with an item-popularity penalty: transposed edge weights are
/// divided by `popularity^beta` (column sums of `x`; zero clamped to 1)
/// before row normalization. Untruncated rows with any nonzero entry sum
/// to 1.
pub fn compute_rp3beta(
    x: &CsrMatrix,
    alpha: f32,
    beta: f32,
    top_k: Option<usize>,
    normalize_weight: bool,
    n_thread: usize,
) -> Result<CsrMatrix> {
    check_alpha(alpha)?;
    let pop: Vec<f32> = x
        .col_sums()
        .into_iter()
        .map(|p| {
            let pb = p.powf(beta);
            if pb == 0.0 {
                1.0
            } else {
                pb
            }
        })
        .collect();
    let p_ui = row_stochastic(x, alpha, Some(&pop));
    // On the transpose the popularity penalty scales whole rows, which
    // cancels in the row normalization.
    let p_iu = row_stochastic(&x.transpose(), alpha, None);
    diffuse(&p_iu, &p_ui, top_k, normalize_weight, n_thread)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn fixture() -> CsrMatrix {
        CsrMatrix::from_dense(&[
            vec![1.0, 1.0, 2.0, 3.0, 4.0],
            vec![0.0, 1.0, 0.0, 1.0, 0.0],
            vec![0.0, 0.0, 1.0, 0.0, 0.0],
            vec![0.0, 0.0, 0.0, 0.0, 0.0],
        ])
    }

    /// Dense f64 reference for both diffusion kernels: `beta = None` gives
    /// P3alpha.
    fn dense_reference(x: &CsrMatrix, alpha: f64, beta: Option<f64>) -> Vec<Vec<f64>> {
        let d = x.to_dense();
        let (n_users, n_items) = (x.n_rows, x.n_cols);
        let pop: Vec<f64> = (0..n_items)
            .map(|i| {
                let p: f64 = (0..n_users).map(|u| d[u][i] as f64).sum();
                match beta {
                    Some(b) => {
                        let pb = p.powf(b);
                        if pb == 0.0 {
                            1.0
                        } else {
                            pb
                        }
                    }
                    None => 1.0,
                }
            })
            .collect();

        let mut p_ui = vec![vec![0.0f64; n_items]; n_users];
        for u in 0..n_users {
            let mut sum = 0.0;
            for i in 0..n_items {
                let v = (d[u][i] as f64).powf(alpha) / pop[i];
                p_ui[u][i] = v;
                sum += v;
            }
            if sum != 0.0 {
                for i in 0..n_items {
                    p_ui[u][i] /= sum;
                }
            }
        }

        let mut p_iu = vec![vec![0.0f64; n_users]; n_items];
        for i in 0..n_items {
            let mut sum = 0.0;
            for u in 0..n_users {
                let v = (d[u][i] as f64).powf(alpha);
                p_iu[i][u] = v;
                sum += v;
            }
            if sum != 0.0 {
                for u in 0..n_users {
                    p_iu[i][u] /= sum;
                }
            }
        }

        let mut w = vec![vec![0.0f64; n_items]; n_items];
        for i in 0..n_items {
            for j in 0..n_items {
                w[i][j] = (0..n_users).map(|u| p_iu[i][u] * p_ui[u][j]).sum();
            }
        }
        w
    }

    #[test]
    fn p3alpha_matches_dense_reference() {
        for &alpha in &[1.0f32, 0.5] {
            let w = compute_p3alpha(&fixture(), alpha, None, false, 3).unwrap();
            let reference = dense_reference(&fixture(), alpha as f64, None);
            let dense = w.to_dense();
            for i in 0..5 {
                for j in 0..5 {
                    assert_abs_diff_eq!(dense[i][j] as f64, reference[i][j], epsilon = 1e-5);
                }
            }
        }
    }

    #[test]
    fn rp3beta_matches_dense_reference() {
        let x = fixture();
        let w = compute_rp3beta(&x, 1.0, 0.5, None, false, 2).unwrap();
        let reference = dense_reference(&x, 1.0, Some(0.5));
        let dense = w.to_dense();
        for i in 0..5 {
            for j in 0..5 {
                assert_abs_diff_eq!(dense[i][j] as f64, reference[i][j], epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn rp3beta_rows_are_stochastic_without_truncation() {
        // Item 2 has no interactions: its row must stay empty
        let x = CsrMatrix::from_dense(&[
            vec![1.0, 1.0, 0.0],
            vec![1.0, 0.0, 0.0],
            vec![0.0, 2.0, 0.0],
        ]);
        let w = compute_rp3beta(&x, 1.0, 2.0, None, false, 1).unwrap();
        for i in 0..3 {
            let (_, vals) = w.row(i);
            let sum: f32 = vals.iter().sum();
            if i == 2 {
                assert_eq!(vals.len(), 0);
            } else {
                assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn l1_normalization_preserves_row_sums_after_truncation() {
        let w = compute_p3alpha(&fixture(), 1.0, Some(2), true, 1).unwrap();
        for i in 0..5 {
            let (_, vals) = w.row(i);
            assert!(w.row_nnz(i) <= 2);
            if !vals.is_empty() {
                let sum: f32 = vals.iter().sum();
                assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn alpha_domain_is_enforced() {
        let x = fixture();
        assert!(matches!(
            compute_p3alpha(&x, -1.0, None, false, 1),
            Err(RecError::InvalidParameter(_))
        ));
        assert!(matches!(
            compute_p3alpha(&x, 0.0, None, false, 1),
            Err(RecError::InvalidParameter(_))
        ));
        assert!(matches!(
            compute_rp3beta(&x, -0.5, 1.0, None, false, 1),
            Err(RecError::InvalidParameter(_))
        ));
        assert!(matches!(
            compute_p3alpha(&x, 1.0, None, false, 0),
            Err(RecError::InvalidParameter(_))
        ));
        assert!(compute_p3alpha(&x, 1e-4, None, false, 1).is_ok());
    }

    #[test]
    fn result_is_independent_of_thread_count() {
        let x = fixture();
        let w1 = compute_rp3beta(&x, 0.8, 1.2, Some(3), false, 1).unwrap();
        let w4 = compute_rp3beta(&x, 0.8, 1.2, Some(3), false, 4).unwrap();
        assert_eq!(w1, w4);
    }
}
