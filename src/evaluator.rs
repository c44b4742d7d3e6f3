use ahash::{AHashMap, AHashSet};
use log::debug;
use rayon::prelude::*;

use crate::csr::CsrMatrix;
use crate::error::{check_n_thread, RecError, Result};
use crate::recommender::Recommender;

/// Users are chunked at a fixed size (not by thread count) so metric sums
/// are accumulated in the same order regardless of parallelism.
const USER_CHUNK: usize = 64;

/// Ranking-quality evaluator over a held-out ground-truth matrix.
///
/// Ground-truth row `k` corresponds to global user id `offset + k`. Users
/// with no ground-truth positives are excluded from every aggregate metric.
pub struct Evaluator {
    gt: CsrMatrix,
    offset: usize,
    cutoff: usize,
    n_thread: usize,
}

/// Per-cutoff running sums, merged across user chunks.
struct CutoffAccum {
    n_valid: usize,
    hit: f64,
    precision: f64,
    recall: f64,
    ndcg: f64,
    map: f64,
    counts: Vec<f64>,
}

impl CutoffAccum {
    fn new(n_items: usize) -> Self {
        Self {
            n_valid: 0,
            hit: 0.0,
            precision: 0.0,
            recall: 0.0,
            ndcg: 0.0,
            map: 0.0,
            counts: vec![0.0; n_items],
        }
    }

    fn merge(&mut self, other: &CutoffAccum) {
        self.n_valid += other.n_valid;
        self.hit += other.hit;
        self.precision += other.precision;
        self.recall += other.recall;
        self.ndcg += other.ndcg;
        self.map += other.map;
        for (a, b) in self.counts.iter_mut().zip(other.counts.iter()) {
            *a += b;
        }
    }
}

/// Item indices of the `k` highest scores, descending, lower index winning
/// ties.
fn rank_top_k(scores: &[f32], k: usize) -> Vec<u32> {
    let cmp = |a: &u32, b: &u32| {
        scores[*b as usize]
            .partial_cmp(&scores[*a as usize])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(b))
    };
    let mut idx: Vec<u32> = (0..scores.len() as u32).collect();
    if k < idx.len() {
        idx.select_nth_unstable_by(k - 1, cmp);
        idx.truncate(k);
    }
    idx.sort_unstable_by(cmp);
    idx
}

impl Evaluator {
    pub fn new(ground_truth: CsrMatrix, offset: usize, cutoff: usize, n_thread: usize) -> Result<Self> {
        check_n_thread(n_thread)?;
        if cutoff < 1 {
            return Err(RecError::InvalidParameter(
                "cutoff must be >= 1".to_string(),
            ));
        }
        Ok(Self {
            gt: ground_truth,
            offset,
            cutoff,
            n_thread,
        })
    }

    /// Metrics for the configured cutoff, keyed by plain metric name.
    pub fn get_score<R>(&self, rec: &R) -> Result<AHashMap<String, f64>>
    where
        R: Recommender + Sync + ?Sized,
    {
        let mut maps = self.compute(rec, &[self.cutoff])?;
        Ok(maps.pop().expect("one cutoff produces one metric map"))
    }

    /// Metrics for several cutoffs at once, keyed `"<metric>@<cutoff>"`.
    pub fn get_scores<R>(&self, rec: &R, cutoffs: &[usize]) -> Result<AHashMap<String, f64>>
    where
        R: Recommender + Sync + ?Sized,
    {
        let maps = self.compute(rec, cutoffs)?;
        let mut out = AHashMap::new();
        for (&c, map) in cutoffs.iter().zip(maps.into_iter()) {
            for (name, value) in map {
                out.insert(format!("{}@{}", name, c), value);
            }
        }
        Ok(out)
    }

    fn compute<R>(&self, rec: &R, cutoffs: &[usize]) -> Result<Vec<AHashMap<String, f64>>>
    where
        R: Recommender + Sync + ?Sized,
    {
        let n_items = self.gt.n_cols;
        if rec.n_items() != n_items {
            return Err(RecError::ShapeMismatch(format!(
                "recommender scores {} items but ground truth has {}",
                rec.n_items(),
                n_items
            )));
        }
        if self.offset + self.gt.n_rows > rec.n_users() {
            return Err(RecError::ShapeMismatch(format!(
                "ground truth rows {}..{} exceed the recommender's {} users",
                self.offset,
                self.offset + self.gt.n_rows,
                rec.n_users()
            )));
        }
        if cutoffs.is_empty() {
            return Err(RecError::InvalidParameter("no cutoffs supplied".to_string()));
        }
        for &c in cutoffs {
            if c < 1 || c > n_items {
                return Err(RecError::InvalidParameter(format!(
                    "cutoff {} outside valid range 1..={}",
                    c, n_items
                )));
            }
        }

        let pool = crate::thread_pool(self.n_thread)?;
        let max_cutoff = *cutoffs.iter().max().expect("cutoffs are nonempty");
        let user_rows: Vec<usize> = (0..self.gt.n_rows).collect();

        let chunk_accums: Vec<Vec<CutoffAccum>> = pool.install(|| {
            user_rows
                .par_chunks(USER_CHUNK)
                .map(|chunk| {
                    let mut locals: Vec<CutoffAccum> =
                        cutoffs.iter().map(|_| CutoffAccum::new(n_items)).collect();

                    let valid: Vec<usize> = chunk
                        .iter()
                        .copied()
                        .filter(|&k| self.gt.row_nnz(k) > 0)
                        .collect();
                    if valid.is_empty() {
                        return locals;
                    }
                    let global: Vec<usize> = valid.iter().map(|&k| k + self.offset).collect();
                    let score_rows = rec.get_score_remove_seen(&global);

                    for (&k, scores) in valid.iter().zip(score_rows.iter()) {
                        let (gt_cols, _) = self.gt.row(k);
                        let gt_set: AHashSet<i32> = gt_cols.iter().copied().collect();
                        let gt_len = gt_set.len();
                        let ranked = rank_top_k(scores, max_cutoff);

                        for (acc, &c) in locals.iter_mut().zip(cutoffs.iter()) {
                            let denom = c.min(gt_len) as f64;
                            let mut hits = 0usize;
                            let mut ap = 0.0f64;
                            let mut dcg = 0.0f64;
                            for (pos, &item) in ranked[..c].iter().enumerate() {
                                acc.counts[item as usize] += 1.0;
                                if gt_set.contains(&(item as i32)) {
                                    hits += 1;
                                    ap += hits as f64 / (pos + 1) as f64;
                                    dcg += 1.0 / ((pos + 2) as f64).log2();
                                }
                            }
                            let idcg: f64 = (0..c.min(gt_len))
                                .map(|i| 1.0 / ((i + 2) as f64).log2())
                                .sum();
                            acc.n_valid += 1;
                            acc.hit += if hits > 0 { 1.0 } else { 0.0 };
                            acc.precision += hits as f64 / c as f64;
                            acc.recall += hits as f64 / denom;
                            acc.map += ap / denom;
                            acc.ndcg += dcg / idcg;
                        }
                    }
                    locals
                })
                .collect()
        });

        // Ordered sequential merge keeps sums identical for any thread count
        let mut totals: Vec<CutoffAccum> =
            cutoffs.iter().map(|_| CutoffAccum::new(n_items)).collect();
        for locals in &chunk_accums {
            for (total, local) in totals.iter_mut().zip(locals.iter()) {
                total.merge(local);
            }
        }

        debug!(
            "evaluated {} users against {} cutoffs",
            totals.first().map_or(0, |t| t.n_valid),
            cutoffs.len()
        );

        Ok(totals.iter().map(|t| finalize(t, n_items)).collect())
    }
}

fn finalize(acc: &CutoffAccum, n_items: usize) -> AHashMap<String, f64> {
    let mut out = AHashMap::new();
    let n = acc.n_valid as f64;
    let mean = |v: f64| if acc.n_valid > 0 { v / n } else { 0.0 };
    out.insert("hit".to_string(), mean(acc.hit));
    out.insert("precision".to_string(), mean(acc.precision));
    out.insert("recall".to_string(), mean(acc.recall));
    out.insert("ndcg".to_string(), mean(acc.ndcg));
    out.insert("map".to_string(), mean(acc.map));

    let total: f64 = acc.counts.iter().sum();
    let appeared = acc.counts.iter().filter(|&&c| c > 0.0).count() as f64;
    let (entropy, gini) = if total > 0.0 {
        let entropy = -acc
            .counts
            .iter()
            .filter(|&&c| c > 0.0)
            .map(|&c| {
                let p = c / total;
                p * p.ln()
            })
            .sum::<f64>();

        // Gini via the Lorenz curve over ascending normalized frequencies
        let mut sorted = acc.counts.clone();
        sorted.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let delta = 1.0 / n_items as f64;
        let mut lorenz = 0.0f64;
        let mut gini = 0.0f64;
        for (i, &c) in sorted.iter().enumerate() {
            lorenz += c / total;
            gini += delta * 2.0 * ((i + 1) as f64 / n_items as f64 - lorenz);
        }
        (entropy, gini)
    } else {
        (0.0, 0.0)
    };
    out.insert("entropy".to_string(), entropy);
    out.insert("gini_index".to_string(), gini);
    out.insert("appeared_item".to_string(), appeared);
    out
}
