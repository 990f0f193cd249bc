//! Brute-force cosine similarity ranking.
//!
//! Every query scans all candidates, O(n·d). An index can replace this later
//! as long as it keeps the `rank` contract.

use serde::{Deserialize, Serialize};

use cinematch_core::types::ItemId;

/// One ranked candidate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredItem {
    pub id: ItemId,
    /// Cosine similarity in [-1, 1].
    pub score: f64,
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();

    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

/// Score every candidate that has a vector and sort by descending similarity.
///
/// Candidates without a vector are dropped. Equal scores keep their input
/// order. The full ordering is returned; truncation is up to the caller.
pub fn rank<'a, I>(query: &[f32], candidates: I) -> Vec<ScoredItem>
where
    I: IntoIterator<Item = (ItemId, Option<&'a [f32]>)>,
{
    let mut scored: Vec<ScoredItem> = candidates
        .into_iter()
        .filter_map(|(id, vector)| {
            vector.map(|v| ScoredItem {
                id,
                score: cosine_similarity(query, v),
            })
        })
        .collect();

    // sort_by is stable, so ties stay in input order.
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn ids(n: usize) -> Vec<ItemId> {
        (0..n).map(|_| Uuid::new_v4()).collect()
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![1.0f32; 100];
        let b = vec![1.0f32; 100];
        let sim = cosine_similarity(&a, &b);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_symmetric() {
        let a = [0.3f32, -1.2, 4.0, 0.0];
        let b = [2.0f32, 0.5, -0.25, 9.0];
        assert_eq!(cosine_similarity(&a, &b), cosine_similarity(&b, &a));
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let mut a = vec![0.0f32; 100];
        let mut b = vec![0.0f32; 100];
        a[0] = 1.0;
        b[1] = 1.0;
        let sim = cosine_similarity(&a, &b);
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let sim = cosine_similarity(&[1.0, 2.0], &[-1.0, -2.0]);
        assert!((sim + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = vec![0.0f32; 100];
        let b = vec![1.0f32; 100];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
        assert_eq!(cosine_similarity(&b, &a), 0.0);
        assert_eq!(cosine_similarity(&a, &a), 0.0);
    }

    #[test]
    fn test_cosine_similarity_length_mismatch() {
        let a = vec![1.0f32; 10];
        let b = vec![1.0f32; 20];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn test_rank_excludes_missing_vectors() {
        let ids = ids(4);
        let v = vec![1.0f32, 0.0];
        let candidates = vec![
            (ids[0], Some(v.as_slice())),
            (ids[1], None),
            (ids[2], Some(v.as_slice())),
            (ids[3], None),
        ];
        let ranked = rank(&[1.0, 0.0], candidates);
        assert_eq!(ranked.len(), 2);
        assert!(ranked.iter().all(|s| s.id != ids[1] && s.id != ids[3]));
    }

    #[test]
    fn test_rank_descending() {
        let ids = ids(3);
        let far = vec![-1.0f32, 0.0];
        let mid = vec![1.0f32, 1.0];
        let near = vec![1.0f32, 0.0];
        let ranked = rank(
            &[1.0, 0.0],
            vec![
                (ids[0], Some(far.as_slice())),
                (ids[1], Some(mid.as_slice())),
                (ids[2], Some(near.as_slice())),
            ],
        );
        let order: Vec<ItemId> = ranked.iter().map(|s| s.id).collect();
        assert_eq!(order, vec![ids[2], ids[1], ids[0]]);
        assert!(ranked.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_rank_ties_keep_input_order() {
        let ids = ids(5);
        let v = vec![0.5f32, 0.5];
        let candidates: Vec<_> = ids.iter().map(|id| (*id, Some(v.as_slice()))).collect();
        let ranked = rank(&[1.0, 1.0], candidates);
        let order: Vec<ItemId> = ranked.iter().map(|s| s.id).collect();
        assert_eq!(order, ids);
    }

    #[test]
    fn test_rank_identical_vector_first() {
        let ids = ids(3);
        let query = vec![0.2f32, 0.9, -0.4];
        let other_a = vec![0.9f32, 0.1, 0.0];
        let other_b = vec![-0.2f32, 0.3, 0.8];
        let ranked = rank(
            &query,
            vec![
                (ids[0], Some(other_a.as_slice())),
                (ids[1], Some(query.as_slice())),
                (ids[2], Some(other_b.as_slice())),
            ],
        );
        assert_eq!(ranked[0].id, ids[1]);
        assert!((ranked[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_rank_keeps_mismatched_lengths_at_zero() {
        let ids = ids(2);
        let short = vec![1.0f32];
        let negative = vec![-1.0f32, 0.0];
        let ranked = rank(
            &[1.0, 0.0],
            vec![(ids[0], Some(negative.as_slice())), (ids[1], Some(short.as_slice()))],
        );
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].id, ids[1]);
        assert_eq!(ranked[0].score, 0.0);
    }

    #[test]
    fn test_rank_empty() {
        let ranked = rank(&[1.0], Vec::<(ItemId, Option<&[f32]>)>::new());
        assert!(ranked.is_empty());
    }
}
