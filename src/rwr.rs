use log::debug;
use rayon::prelude::*;

use crate::csr::CsrMatrix;
use crate::error::{RecError, Result};

// ── RNG (same generator as the SGD-based trainers) ─────────────────

struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 0xdeadbeef } else { seed },
        }
    }

    #[inline(always)]
    fn next(&mut self) -> u64 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        self.state
    }

    #[inline(always)]
    fn next_f32(&mut self) -> f32 {
        (self.next() & 0xFFFFFF) as f32 / 0xFFFFFF_u64 as f32
    }
}

/// Stream derivation for per-origin sub-sequences.
fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E3779B97F4A7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// CSR matrix with per-row cumulative weights for O(log nnz) weighted
/// neighbor sampling.
struct WalkTable {
    m: CsrMatrix,
    cum: Vec<f32>,
}

impl WalkTable {
    fn new(m: CsrMatrix) -> Self {
        let mut cum = vec![0.0f32; m.data.len()];
        for r in 0..m.n_rows {
            let start = m.indptr[r] as usize;
            let end = m.indptr[r + 1] as usize;
            let mut acc = 0.0f32;
            for idx in start..end {
                acc += m.data[idx];
                cum[idx] = acc;
            }
        }
        Self { m, cum }
    }

    /// Draw a neighbor of `r` proportionally to edge weight.
    #[inline]
    fn sample(&self, r: usize, rng: &mut XorShift64) -> Option<i32> {
        let start = self.m.indptr[r] as usize;
        let end = self.m.indptr[r + 1] as usize;
        if start == end {
            return None;
        }
        let total = self.cum[end - 1];
        if total <= 0.0 {
            return None;
        }
        let t = rng.next_f32() * total;
        let k = self.cum[start..end].partition_point(|&c| c < t);
        let k = k.min(end - start - 1);
        Some(self.m.indices[start + k])
    }
}

/// Monte-Carlo estimate of item-to-item transition weights via random walks
/// with restart on the user–item bipartite graph.
///
/// For each origin item, `n_samples` walks alternate item→user→item steps
/// following edge weights; each step continues with probability `decay` and
/// is capped at `cutoff` steps. Every visited item increments its count in
/// the origin's row. The returned matrix holds raw visit counts; divide by
/// `n_samples` for expected-visit-rate weights.
///
/// Each origin item draws from its own sub-stream (splitmix64 of
/// `random_seed` and the origin index feeding a XorShift64 generator), and
/// accumulation is partitioned by origin row, so the output is reproducible
/// for a fixed seed and identical for every thread count.
pub fn run_with_restart(
    x: &CsrMatrix,
    decay: f32,
    cutoff: usize,
    n_samples: usize,
    n_thread: usize,
    random_seed: u64,
) -> Result<CsrMatrix> {
    if !(0.0..=1.0).contains(&decay) {
        return Err(RecError::InvalidParameter(format!(
            "decay must be in [0, 1], got {}",
            decay
        )));
    }
    if cutoff < 1 || n_samples < 1 {
        return Err(RecError::InvalidParameter(format!(
            "cutoff and n_samples must be >= 1, got {} and {}",
            cutoff, n_samples
        )));
    }
    let pool = crate::thread_pool(n_thread)?;

    let user_table = WalkTable::new(x.clone()); // user -> item edges
    let item_table = WalkTable::new(x.transpose()); // item -> user edges
    let n_items = x.n_cols;

    let rows: Vec<(Vec<i32>, Vec<f32>)> = pool.install(|| {
        (0..n_items)
            .into_par_iter()
            .map(|i| {
                if item_table.m.row_nnz(i) == 0 {
                    return (vec![], vec![]);
                }
                let mut rng =
                    XorShift64::new(splitmix64(random_seed.wrapping_add(i as u64)));
                let mut acc = vec![0.0f32; n_items];
                for _ in 0..n_samples {
                    let mut cur = i;
                    for _ in 0..cutoff {
                        if rng.next_f32() >= decay {
                            break;
                        }
                        let Some(u) = item_table.sample(cur, &mut rng) else {
                            break;
                        };
                        let Some(j) = user_table.sample(u as usize, &mut rng) else {
                            break;
                        };
                        acc[j as usize] += 1.0;
                        cur = j as usize;
                    }
                }
                let idx: Vec<i32> = (0..n_items as i32)
                    .filter(|&j| acc[j as usize] != 0.0)
                    .collect();
                let val: Vec<f32> = idx.iter().map(|&j| acc[j as usize]).collect();
                (idx, val)
            })
            .collect()
    });

    let w = CsrMatrix::from_rows(rows, n_items);
    debug!(
        "random walk counts computed: {} items, {} nonzeros, {} samples/item",
        n_items,
        w.nnz(),
        n_samples
    );
    Ok(w)
}
