//! Implicit-feedback collaborative filtering kernels and ranking evaluation.
//!
//! The crate derives item–item relevance matrices from a sparse user–item
//! interaction matrix (similarity kernels, bipartite graph diffusion, or
//! Monte-Carlo random walks), wraps them behind a train-once/score-many
//! recommender contract, and scores recommenders against held-out ground
//! truth with accuracy and distributional-fairness metrics.
//!
//! # Quick start
//!
//! ```
//! use recrank::{CsrMatrix, ItemKnnConfig, Recommender, SimilarityKernel};
//!
//! let x = CsrMatrix::from_dense(&[
//!     vec![1.0, 1.0, 2.0, 3.0, 4.0],
//!     vec![0.0, 1.0, 0.0, 1.0, 0.0],
//!     vec![0.0, 0.0, 1.0, 0.0, 0.0],
//!     vec![0.0, 0.0, 0.0, 0.0, 0.0],
//! ]);
//!
//! let rec = ItemKnnConfig {
//!     kernel: SimilarityKernel::Cosine { normalize: true },
//!     top_k: 5,
//!     shrinkage: 0.0,
//!     n_thread: 2,
//! }
//! .learn(&x)
//! .unwrap();
//!
//! let scores = rec.get_score(&[0, 1]);
//! assert_eq!(scores.len(), 2);
//! assert_eq!(scores[0].len(), 5);
//! ```

mod csr;
mod error;
mod evaluator;
mod knn;
mod p3;
mod recommender;
mod rwr;

pub use csr::CsrMatrix;
pub use error::{RecError, Result};
pub use evaluator::Evaluator;
pub use knn::{compute_similarity, SimilarityKernel};
pub use p3::{compute_p3alpha, compute_rp3beta};
pub use recommender::{
    ItemKnnConfig, P3alphaConfig, RP3betaConfig, RandomWalkConfig, Recommender,
    SimilarityScorer, TopPopConfig, TopPopScorer,
};
pub use rwr::run_with_restart;

/// Build a rayon pool with an explicit worker count.
pub(crate) fn thread_pool(n_thread: usize) -> Result<rayon::ThreadPool> {
    error::check_n_thread(n_thread)?;
    rayon::ThreadPoolBuilder::new()
        .num_threads(n_thread)
        .build()
        .map_err(|e| RecError::InvalidParameter(format!("failed to build thread pool: {}", e)))
}
