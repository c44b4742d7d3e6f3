use ahash::AHashSet;
use log::info;
use serde::{Deserialize, Serialize};

use crate::csr::CsrMatrix;
use crate::error::Result;
use crate::knn::{compute_similarity, SimilarityKernel};
use crate::p3::{compute_p3alpha, compute_rp3beta};
use crate::rwr::run_with_restart;

/// Train-once/score-many contract shared by every recommender family.
///
/// Implementors are trained by construction: configs produce a trained
/// scorer from `learn`, so scoring an untrained model is unrepresentable.
pub trait Recommender {
    /// The interaction matrix the model was trained on.
    fn train_matrix(&self) -> &CsrMatrix;

    fn n_users(&self) -> usize {
        self.train_matrix().n_rows
    }

    fn n_items(&self) -> usize {
        self.train_matrix().n_cols
    }

    /// One dense relevance row per requested user. Higher is more
    /// recommended; values are un-normalized. `user_indices` must be within
    /// `0..n_users`.
    fn get_score(&self, user_indices: &[usize]) -> Vec<Vec<f32>>;

    /// Like [`get_score`](Recommender::get_score), with every item the user
    /// already interacted with masked to negative infinity.
    fn get_score_remove_seen(&self, user_indices: &[usize]) -> Vec<Vec<f32>> {
        let mut rows = self.get_score(user_indices);
        for (row, &u) in rows.iter_mut().zip(user_indices.iter()) {
            let (seen, _) = self.train_matrix().row(u);
            for &c in seen {
                row[c as usize] = f32::NEG_INFINITY;
            }
        }
        rows
    }
}

// ── W-based scorer ─────────────────────────────────────────────────

/// Trained recommender holding the interaction matrix and a learned
/// item×item relevance matrix. Scores are `X[u,:] · W`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimilarityScorer {
    x: CsrMatrix,
    w: CsrMatrix,
}

impl SimilarityScorer {
    pub(crate) fn new(x: CsrMatrix, w: CsrMatrix) -> Self {
        Self { x, w }
    }

    /// The learned item relevance matrix.
    pub fn weight(&self) -> &CsrMatrix {
        &self.w
    }

    /// Top-`n` items for one user, ordered by descending score (ties broken
    /// by lower item index). Items with non-positive score never appear;
    /// with `exclude_seen` the user's training items are skipped as well.
    pub fn recommend_top_n(&self, user: usize, n: usize, exclude_seen: bool) -> (Vec<i32>, Vec<f32>) {
        let excluded: AHashSet<i32> = if exclude_seen {
            self.x.row(user).0.iter().copied().collect()
        } else {
            AHashSet::new()
        };

        let scores = self.score_user(user);
        let mut scored: Vec<(f32, i32)> = scores
            .into_iter()
            .enumerate()
            .filter_map(|(i, score)| {
                if score > 0.0 && !excluded.contains(&(i as i32)) {
                    Some((score, i as i32))
                } else {
                    None
                }
            })
            .collect();

        let take = n.min(scored.len());
        if take == 0 {
            return (vec![], vec![]);
        }
        scored.select_nth_unstable_by(take.saturating_sub(1), |a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });
        scored.truncate(take);
        scored.sort_unstable_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });
        (
            scored.iter().map(|&(_, i)| i).collect(),
            scored.iter().map(|&(s, _)| s).collect(),
        )
    }

    /// Persist the trained state (interaction matrix, learned W).
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    fn score_user(&self, u: usize) -> Vec<f32> {
        // score_i = sum over the user's items j of X[u,j] * W[j,i]
        let mut scores = vec![0.0f32; self.w.n_cols];
        let (cols, vals) = self.x.row(u);
        for (&j, &v) in cols.iter().zip(vals.iter()) {
            let (w_idx, w_val) = self.w.row(j as usize);
            for (&i, &wv) in w_idx.iter().zip(w_val.iter()) {
                scores[i as usize] += wv * v;
            }
        }
        scores
    }
}

impl Recommender for SimilarityScorer {
    fn train_matrix(&self) -> &CsrMatrix {
        &self.x
    }

    fn get_score(&self, user_indices: &[usize]) -> Vec<Vec<f32>> {
        user_indices.iter().map(|&u| self.score_user(u)).collect()
    }
}

// ── Untrained configurations, one per family ───────────────────────

/// Item-kNN similarity recommender configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemKnnConfig {
    pub kernel: SimilarityKernel,
    pub top_k: usize,
    pub shrinkage: f32,
    pub n_thread: usize,
}

impl Default for ItemKnnConfig {
    fn default() -> Self {
        Self {
            kernel: SimilarityKernel::Cosine { normalize: true },
            top_k: 100,
            shrinkage: 0.0,
            n_thread: 1,
        }
    }
}

impl ItemKnnConfig {
    pub fn learn(&self, x: &CsrMatrix) -> Result<SimilarityScorer> {
        let w = compute_similarity(x, &self.kernel, self.top_k, self.shrinkage, self.n_thread)?;
        info!("item-knn trained: {} items, {} nonzeros in W", x.n_cols, w.nnz());
        Ok(SimilarityScorer::new(x.clone(), w))
    }
}

/// P3alpha diffusion recommender configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct P3alphaConfig {
    pub alpha: f32,
    pub top_k: Option<usize>,
    pub normalize_weight: bool,
    pub n_thread: usize,
}

impl Default for P3alphaConfig {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            top_k: None,
            normalize_weight: false,
            n_thread: 1,
        }
    }
}

impl P3alphaConfig {
    pub fn learn(&self, x: &CsrMatrix) -> Result<SimilarityScorer> {
        let w = compute_p3alpha(x, self.alpha, self.top_k, self.normalize_weight, self.n_thread)?;
        info!("p3alpha trained: {} items, {} nonzeros in W", x.n_cols, w.nnz());
        Ok(SimilarityScorer::new(x.clone(), w))
    }
}

/// RP3beta diffusion recommender configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RP3betaConfig {
    pub alpha: f32,
    pub beta: f32,
    pub top_k: Option<usize>,
    pub normalize_weight: bool,
    pub n_thread: usize,
}

impl Default for RP3betaConfig {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 0.6,
            top_k: None,
            normalize_weight: false,
            n_thread: 1,
        }
    }
}

impl RP3betaConfig {
    pub fn learn(&self, x: &CsrMatrix) -> Result<SimilarityScorer> {
        let w = compute_rp3beta(
            x,
            self.alpha,
            self.beta,
            self.top_k,
            self.normalize_weight,
            self.n_thread,
        )?;
        info!("rp3beta trained: {} items, {} nonzeros in W", x.n_cols, w.nnz());
        Ok(SimilarityScorer::new(x.clone(), w))
    }
}

/// Random-walk-with-restart recommender configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RandomWalkConfig {
    pub decay: f32,
    pub cutoff: usize,
    pub n_samples: usize,
    pub random_seed: u64,
    pub n_thread: usize,
}

impl Default for RandomWalkConfig {
    fn default() -> Self {
        Self {
            decay: 0.3,
            cutoff: 1000,
            n_samples: 1000,
            random_seed: 42,
            n_thread: 4,
        }
    }
}

impl RandomWalkConfig {
    pub fn learn(&self, x: &CsrMatrix) -> Result<SimilarityScorer> {
        let mut w = run_with_restart(
            x,
            self.decay,
            self.cutoff,
            self.n_samples,
            self.n_thread,
            self.random_seed,
        )?;
        // Visit counts -> expected visit rates
        let scale = 1.0 / self.n_samples as f32;
        for v in w.data.iter_mut() {
            *v *= scale;
        }
        info!("random walk trained: {} items, {} nonzeros in W", x.n_cols, w.nnz());
        Ok(SimilarityScorer::new(x.clone(), w))
    }
}

// ── Popularity baseline ────────────────────────────────────────────

/// Recommends every user the globally most popular items.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TopPopConfig {}

impl TopPopConfig {
    pub fn learn(&self, x: &CsrMatrix) -> Result<TopPopScorer> {
        Ok(TopPopScorer {
            score: x.col_sums(),
            x: x.clone(),
        })
    }
}

/// Trained popularity baseline: the same item-popularity row for every user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TopPopScorer {
    x: CsrMatrix,
    score: Vec<f32>,
}

impl TopPopScorer {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

impl Recommender for TopPopScorer {
    fn train_matrix(&self) -> &CsrMatrix {
        &self.x
    }

    fn get_score(&self, user_indices: &[usize]) -> Vec<Vec<f32>> {
        user_indices.iter().map(|_| self.score.clone()).collect()
    }
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

    fn cosine_config() -> ItemKnnConfig {
        ItemKnnConfig {
            kernel: SimilarityKernel::Cosine { normalize: true },
            top_k: 5,
            shrinkage: 0.0,
            n_thread: 2,
        }
    }

    #[test]
    fn get_score_is_sparse_row_times_w() {
        let x = fixture();
        let rec = cosine_config().learn(&x).unwrap();
        let xd = x.to_dense();
        let wd = rec.weight().to_dense();
        let scores = rec.get_score(&[0, 1, 2, 3]);
        for u in 0..4 {
            for i in 0..5 {
                let manual: f32 = (0..5).map(|j| xd[u][j] * wd[j][i]).sum();
                assert_abs_diff_eq!(scores[u][i], manual, epsilon = 1e-5);
            }
        }
        // Empty user row scores zero everywhere
        assert!(scores[3].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn scores_are_finite_for_every_family() {
        let x = fixture();
        let users = [0usize, 1, 2, 3];
        let recs: Vec<SimilarityScorer> = vec![
            cosine_config().learn(&x).unwrap(),
            P3alphaConfig::default().learn(&x).unwrap(),
            RP3betaConfig::default().learn(&x).unwrap(),
            RandomWalkConfig {
                cutoff: 20,
                n_samples: 50,
                ..Default::default()
            }
            .learn(&x)
            .unwrap(),
        ];
        for rec in &recs {
            for row in rec.get_score(&users) {
                assert!(row.iter().all(|v| v.is_finite()));
            }
        }
    }

    #[test]
    fn remove_seen_masks_training_items() {
        let x = fixture();
        let rec = cosine_config().learn(&x).unwrap();
        let rows = rec.get_score_remove_seen(&[0, 1]);
        // User 0 interacted with every item
        assert!(rows[0].iter().all(|&v| v == f32::NEG_INFINITY));
        assert_eq!(rows[1][1], f32::NEG_INFINITY);
        assert_eq!(rows[1][3], f32::NEG_INFINITY);
        assert!(rows[1][0].is_finite());
    }

    #[test]
    fn round_trip_reproduces_scores_exactly() {
        let x = fixture();
        let rec = RP3betaConfig::default().learn(&x).unwrap();
        let bytes = rec.to_bytes().unwrap();
        let restored = SimilarityScorer::from_bytes(&bytes).unwrap();
        assert_eq!(rec, restored);
        assert_eq!(rec.get_score(&[0, 1, 2, 3]), restored.get_score(&[0, 1, 2, 3]));
    }

    #[test]
    fn random_walk_scorer_scales_counts_by_sample_count() {
        let x = fixture();
        let config = RandomWalkConfig {
            decay: 0.5,
            cutoff: 10,
            n_samples: 100,
            random_seed: 7,
            n_thread: 2,
        };
        let rec = config.learn(&x).unwrap();
        let counts = run_with_restart(&x, 0.5, 10, 100, 2, 7).unwrap();
        for (a, b) in rec.weight().data.iter().zip(counts.data.iter()) {
            assert_abs_diff_eq!(*a, b / 100.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn recommend_top_n_orders_and_excludes() {
        let x = fixture();
        let rec = cosine_config().learn(&x).unwrap();
        let (ids, scores) = rec.recommend_top_n(1, 3, true);
        // User 1 has seen items 1 and 3
        assert!(!ids.contains(&1));
        assert!(!ids.contains(&3));
        for w in scores.windows(2) {
            assert!(w[0] >= w[1]);
        }
        let (all_ids, _) = rec.recommend_top_n(1, 5, false);
        assert!(all_ids.len() <= 5);
    }

    #[test]
    fn toppop_scores_by_item_popularity() {
        let x = fixture();
        let rec = TopPopConfig::default().learn(&x).unwrap();
        let rows = rec.get_score(&[0, 2]);
        assert_eq!(rows[0], x.col_sums());
        assert_eq!(rows[0], rows[1]);
        let restored = TopPopScorer::from_bytes(&rec.to_bytes().unwrap()).unwrap();
        assert_eq!(rec.get_score(&[0]), restored.get_score(&[0]));
    }

    #[test]
    fn failed_learn_produces_no_model() {
        let x = fixture();
        let bad = ItemKnnConfig {
            kernel: SimilarityKernel::AsymmetricCosine { alpha: 2.0 },
            ..Default::default()
        };
        assert!(bad.learn(&x).is_err());
    }
}
