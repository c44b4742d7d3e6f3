use serde::{Deserialize, Serialize};

use crate::error::{RecError, Result};

/// Sparse matrix in compressed-sparse-row form.
///
/// Rows are users and columns are items for interaction matrices; the same
/// type also holds item×item relevance matrices. Column indices within a row
/// are kept sorted ascending.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CsrMatrix {
    pub n_rows: usize,
    pub n_cols: usize,
    pub indptr: Vec<i64>,
    pub indices: Vec<i32>,
    pub data: Vec<f32>,
}

impl CsrMatrix {
    /// Build a CSR matrix from COO (rows, cols, values) triples.
    /// Duplicate coordinates are summed.
    pub fn from_coo(
        rows: &[i32],
        cols: &[i32],
        values: &[f32],
        n_rows: usize,
        n_cols: usize,
    ) -> Result<Self> {
        if rows.len() != cols.len() || rows.len() != values.len() {
            return Err(RecError::ShapeMismatch(format!(
                "coo arrays disagree in length: {} / {} / {}",
                rows.len(),
                cols.len(),
                values.len()
            )));
        }
        for (&r, &c) in rows.iter().zip(cols.iter()) {
            if r < 0 || r as usize >= n_rows || c < 0 || c as usize >= n_cols {
                return Err(RecError::ShapeMismatch(format!(
                    "coo entry ({}, {}) outside declared shape {}x{}",
                    r, c, n_rows, n_cols
                )));
            }
        }

        // Count nnz per row
        let mut counts = vec![0i64; n_rows];
        for &r in rows {
            counts[r as usize] += 1;
        }
        let mut indptr = vec![0i64; n_rows + 1];
        for i in 0..n_rows {
            indptr[i + 1] = indptr[i] + counts[i];
        }
        let nnz = rows.len();
        let mut indices = vec![0i32; nnz];
        let mut data = vec![0.0f32; nnz];
        let mut pos = indptr[..n_rows].to_vec();
        for idx in 0..nnz {
            let r = rows[idx] as usize;
            let p = pos[r] as usize;
            indices[p] = cols[idx];
            data[p] = values[idx];
            pos[r] += 1;
        }

        // Sort each row by column (insertion sort, rows are usually short)
        for r in 0..n_rows {
            let start = indptr[r] as usize;
            let end = indptr[r + 1] as usize;
            let row_indices = &mut indices[start..end];
            let row_data = &mut data[start..end];
            for i in 1..row_indices.len() {
                let mut j = i;
                while j > 0 && row_indices[j - 1] > row_indices[j] {
                    row_indices.swap(j - 1, j);
                    row_data.swap(j - 1, j);
                    j -= 1;
                }
            }
        }

        // Merge duplicate coordinates in place
        let mut out_indptr = vec![0i64; n_rows + 1];
        let mut out_indices = Vec::with_capacity(nnz);
        let mut out_data = Vec::with_capacity(nnz);
        for r in 0..n_rows {
            let start = indptr[r] as usize;
            let end = indptr[r + 1] as usize;
            let mut idx = start;
            while idx < end {
                let col = indices[idx];
                let mut v = data[idx];
                idx += 1;
                while idx < end && indices[idx] == col {
                    v += data[idx];
                    idx += 1;
                }
                out_indices.push(col);
                out_data.push(v);
            }
            out_indptr[r + 1] = out_indices.len() as i64;
        }

        Ok(Self {
            n_rows,
            n_cols,
            indptr: out_indptr,
            indices: out_indices,
            data: out_data,
        })
    }

    /// Build from dense rows, keeping nonzero entries. Intended for tests
    /// and small fixtures.
    pub fn from_dense(rows: &[Vec<f32>]) -> Self {
        let n_rows = rows.len();
        let n_cols = rows.first().map_or(0, |r| r.len());
        let mut indptr = Vec::with_capacity(n_rows + 1);
        indptr.push(0i64);
        let mut indices = Vec::new();
        let mut data = Vec::new();
        for row in rows {
            for (c, &v) in row.iter().enumerate() {
                if v != 0.0 {
                    indices.push(c as i32);
                    data.push(v);
                }
            }
            indptr.push(indices.len() as i64);
        }
        Self {
            n_rows,
            n_cols,
            indptr,
            indices,
            data,
        }
    }

    /// Assemble a matrix from per-row (indices, values) pairs, already sorted
    /// by column index.
    pub(crate) fn from_rows(rows: Vec<(Vec<i32>, Vec<f32>)>, n_cols: usize) -> Self {
        let n_rows = rows.len();
        let mut indptr = Vec::with_capacity(n_rows + 1);
        indptr.push(0i64);
        let mut total_nnz = 0i64;
        for (idx, _) in &rows {
            total_nnz += idx.len() as i64;
            indptr.push(total_nnz);
        }
        let mut indices = Vec::with_capacity(total_nnz as usize);
        let mut data = Vec::with_capacity(total_nnz as usize);
        for (idx, val) in rows {
            indices.extend(idx);
            data.extend(val);
        }
        Self {
            n_rows,
            n_cols,
            indptr,
            indices,
            data,
        }
    }

    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    /// Column indices and values of row `r`.
    #[inline]
    pub fn row(&self, r: usize) -> (&[i32], &[f32]) {
        let start = self.indptr[r] as usize;
        let end = self.indptr[r + 1] as usize;
        (&self.indices[start..end], &self.data[start..end])
    }

    #[inline]
    pub fn row_nnz(&self, r: usize) -> usize {
        (self.indptr[r + 1] - self.indptr[r]) as usize
    }

    /// Transposed copy (CSC-to-CSR flip via counting sort).
    pub fn transpose(&self) -> CsrMatrix {
        let nnz = self.indices.len();
        let mut cc = vec![0i64; self.n_cols];
        for &c in &self.indices {
            cc[c as usize] += 1;
        }
        let mut ti = vec![0i64; self.n_cols + 1];
        for i in 0..self.n_cols {
            ti[i + 1] = ti[i] + cc[i];
        }
        let mut tv = vec![0i32; nnz];
        let mut td = vec![0.0f32; nnz];
        let mut pos = ti[..self.n_cols].to_vec();
        for row in 0..self.n_rows {
            let s = self.indptr[row] as usize;
            let e = self.indptr[row + 1] as usize;
            for idx in s..e {
                let col = self.indices[idx] as usize;
                let p = pos[col] as usize;
                tv[p] = row as i32;
                td[p] = self.data[idx];
                pos[col] += 1;
            }
        }
        CsrMatrix {
            n_rows: self.n_cols,
            n_cols: self.n_rows,
            indptr: ti,
            indices: tv,
            data: td,
        }
    }

    /// Copy with every stored value replaced by 1.0.
    pub fn binarize(&self) -> CsrMatrix {
        let mut out = self.clone();
        for v in out.data.iter_mut() {
            *v = 1.0;
        }
        out
    }

    /// Per-row sums of stored values.
    pub fn row_sums(&self) -> Vec<f32> {
        let mut out = vec![0.0f32; self.n_rows];
        for r in 0..self.n_rows {
            let (_, vals) = self.row(r);
            out[r] = vals.iter().sum();
        }
        out
    }

    /// Per-column sums of stored values.
    pub fn col_sums(&self) -> Vec<f32> {
        let mut out = vec![0.0f32; self.n_cols];
        for (&c, &v) in self.indices.iter().zip(self.data.iter()) {
            out[c as usize] += v;
        }
        out
    }

    /// Dense row-major copy. Intended for tests and small matrices.
    pub fn to_dense(&self) -> Vec<Vec<f32>> {
        let mut out = vec![vec![0.0f32; self.n_cols]; self.n_rows];
        for r in 0..self.n_rows {
            let (cols, vals) = self.row(r);
            for (&c, &v) in cols.iter().zip(vals.iter()) {
                out[r][c as usize] = v;
            }
        }
        out
    }
}
