//! Reciprocal Rank Fusion algorithm for combining ranked lists

use ahash::{HashMap, HashMapExt};
use thiserror::Error;

/// Standard RRF smoothing constant
pub const DEFAULT_RRF_K: f64 = 60.0;

#[derive(Error, Debug)]
pub enum FusionError {
    #[error("Invalid RRF k: {0} (must be finite and non-negative)")]
    InvalidK(f64),
}

/// Configuration for fusion algorithm
#[derive(Debug, Clone, Copy)]
pub struct FusionConfig {
    /// RRF K constant (typically 60)
    pub rrf_k: f64,
}

impl FusionConfig {
    pub fn new(rrf_k: f64) -> Result<Self, FusionError> {
        if !rrf_k.is_finite() || rrf_k < 0.0 {
            return Err(FusionError::InvalidK(rrf_k));
        }

        Ok(Self { rrf_k })
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            rrf_k: DEFAULT_RRF_K,
        }
    }
}

/// An id with its accumulated RRF score
#[derive(Debug, Clone, PartialEq)]
pub struct FusedHit {
    pub id: String,
    pub score: f64,
}

/// Apply Reciprocal Rank Fusion to any number of ranked id lists
///
/// RRF formula: score(id) = sum over every list containing id of 1 / (k + rank),
/// with rank 1-based. Lists that do not contain an id contribute nothing.
///
/// Ties keep the order in which ids were first seen: earlier lists first,
/// then by rank within a list.
///
/// # Returns
/// Every distinct id with its fused score, sorted by score descending
pub fn reciprocal_rank_fusion<L, S>(lists: &[L], config: &FusionConfig) -> Vec<FusedHit>
where
    L: AsRef<[S]>,
    S: AsRef<str>,
{
    let mut slots: HashMap<&str, usize> = HashMap::new();
    let mut fused: Vec<FusedHit> = Vec::new();

    for list in lists {
        for (rank, id) in list.as_ref().iter().enumerate() {
            let id = id.as_ref();
            let contribution = 1.0 / (config.rrf_k + rank as f64 + 1.0);

            match slots.get(id) {
                Some(&slot) => fused[slot].score += contribution,
                None => {
                    slots.insert(id, fused.len());
                    fused.push(FusedHit {
                        id: id.to_string(),
                        score: contribution,
                    });
                }
            }
        }
    }

    // Stable sort over first-seen order gives the documented tie-break
    fused.sort_by(|a, b| b.score.total_cmp(&a.score));

    fused
}

/// Fuse ranked id lists with smoothing constant `k`, returning ids best first
///
/// `k` goes through the same validation as [`FusionConfig::new`].
pub fn fuse<L, S>(lists: &[L], k: f64) -> Result<Vec<String>, FusionError>
where
    L: AsRef<[S]>,
    S: AsRef<str>,
{
    let config = FusionConfig::new(k)?;

    Ok(reciprocal_rank_fusion(lists, &config)
        .into_iter()
        .map(|hit| hit.id)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rrf_closed_form() {
        let lists = [vec!["a", "b", "c"], vec!["b", "c", "a"]];
        let fused = reciprocal_rank_fusion(&lists, &FusionConfig::default());

        let ids: Vec<&str> = fused.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);

        let expected_a = 1.0 / 61.0 + 1.0 / 63.0;
        let expected_b = 1.0 / 62.0 + 1.0 / 61.0;
        let expected_c = 1.0 / 63.0 + 1.0 / 62.0;
        assert!((fused[0].score - expected_b).abs() < 1e-12);
        assert!((fused[1].score - expected_c).abs() < 1e-12);
        assert!((fused[2].score - expected_a).abs() < 1e-12);
    }

    #[test]
    fn test_fuse_returns_ids() {
        assert_eq!(
            fuse(&[vec!["a", "b", "c"], vec!["b", "c", "a"]], DEFAULT_RRF_K).unwrap(),
            vec!["b", "c", "a"]
        );
    }

    #[test]
    fn test_absent_ids_not_penalized() {
        let fused = reciprocal_rank_fusion(&[vec!["x"], vec!["y", "x"]], &FusionConfig::default());

        assert_eq!(fused[0].id, "x");
        assert!((fused[1].score - 1.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn test_ties_follow_first_seen_order() {
        // Mirrored ranks give identical scores
        let fused = fuse(&[vec!["p", "q"], vec!["q", "p"]], DEFAULT_RRF_K).unwrap();
        assert_eq!(fused, vec!["p", "q"]);

        let fused = fuse(&[vec!["q", "p"], vec!["p", "q"]], DEFAULT_RRF_K).unwrap();
        assert_eq!(fused, vec!["q", "p"]);

        // Disjoint lists: rank 1 of each list ties, first list wins
        let fused = fuse(&[vec!["a", "b"], vec!["c", "d"]], DEFAULT_RRF_K).unwrap();
        assert_eq!(fused, vec!["a", "c", "b", "d"]);
    }

    #[test]
    fn test_k_controls_top_rank_dominance() {
        // "solo" is rank 1 in one list; "both" is rank 3 in two lists
        let lists = [vec!["solo", "x", "both"], vec!["y", "z", "both"]];

        let small_k = fuse(&lists, 0.0).unwrap();
        assert_eq!(small_k[0], "solo");

        let large_k = fuse(&lists, 60.0).unwrap();
        assert_eq!(large_k[0], "both");
    }

    #[test]
    fn test_empty_inputs() {
        let lists: [Vec<&str>; 2] = [vec![], vec![]];
        assert!(fuse(&lists, DEFAULT_RRF_K).unwrap().is_empty());

        let none: [Vec<String>; 0] = [];
        assert!(fuse(&none, DEFAULT_RRF_K).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_k() {
        assert!(FusionConfig::new(-1.0).is_err());
        assert!(FusionConfig::new(f64::INFINITY).is_err());
        assert!(FusionConfig::new(0.0).is_ok());
    }

    #[test]
    fn test_fuse_rejects_invalid_k() {
        let lists = [vec!["a", "b"], vec!["b", "a"]];

        assert!(matches!(fuse(&lists, -1.0), Err(FusionError::InvalidK(k)) if k == -1.0));
        assert!(fuse(&lists, f64::NAN).is_err());
        assert!(fuse(&lists, f64::INFINITY).is_err());
    }
}
