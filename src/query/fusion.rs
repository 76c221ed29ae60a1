//! Score fusion strategies for the hybrid query engine (spec §4.H).

use std::collections::HashMap;
use uuid::Uuid;

pub const DEFAULT_RRF_K: f32 = 60.0;

/// Candidates above this size from any single component trigger RRF under
/// the `adaptive` strategy instead of linear weighting.
pub const ADAPTIVE_RRF_THRESHOLD: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FusionStrategy {
    Linear,
    ReciprocalRank,
    #[default]
    Adaptive,
}

#[derive(Debug, Clone, Copy)]
pub struct FusionWeights {
    pub vector: f32,
    pub metadata: f32,
    pub graph: f32,
    pub text: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self { vector: 0.4, metadata: 0.2, graph: 0.2, text: 0.2 }
    }
}

/// `score = Σ 1/(k + rank_i)` across every component's ranked candidate list.
pub fn reciprocal_rank_fusion(component_results: &[&[(Uuid, f32)]], k: f32) -> Vec<(Uuid, f32)> {
    let mut scores: HashMap<Uuid, f32> = HashMap::new();
    for results in component_results {
        for (rank, (id, _)) in results.iter().enumerate() {
            *scores.entry(*id).or_default() += 1.0 / (k + rank as f32);
        }
    }
    let mut out: Vec<(Uuid, f32)> = scores.into_iter().collect();
    out.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    out
}

/// `score = Σ w_i · s_i / Σ w_i`, each component's scores normalised to
/// [0,1] by its own max before weighting.
pub fn linear_combination(component_results: &[(&[(Uuid, f32)], f32)]) -> Vec<(Uuid, f32)> {
    let mut scores: HashMap<Uuid, f32> = HashMap::new();
    let total_weight: f32 = component_results.iter().map(|(_, w)| w).sum::<f32>().max(f32::EPSILON);
    for (results, weight) in component_results {
        let max = results.iter().map(|(_, s)| *s).fold(0.0_f32, f32::max).max(0.001);
        for (id, score) in *results {
            *scores.entry(*id).or_default() += (score / max) * weight;
        }
    }
    let mut out: Vec<(Uuid, f32)> =
        scores.into_iter().map(|(id, s)| (id, s / total_weight)).collect();
    out.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    out
}

/// Apply the chosen strategy, picking RRF under `Adaptive` when any input
/// component returned more than [`ADAPTIVE_RRF_THRESHOLD`] candidates.
pub fn fuse(
    strategy: FusionStrategy,
    weights: FusionWeights,
    vector: &[(Uuid, f32)],
    metadata: &[(Uuid, f32)],
    graph: &[(Uuid, f32)],
    text: &[(Uuid, f32)],
) -> Vec<(Uuid, f32)> {
    let lists: [&[(Uuid, f32)]; 4] = [vector, metadata, graph, text];
    let effective = match strategy {
        FusionStrategy::Adaptive => {
            if lists.iter().any(|l| l.len() > ADAPTIVE_RRF_THRESHOLD) {
                FusionStrategy::ReciprocalRank
            } else {
                FusionStrategy::Linear
            }
        }
        other => other,
    };
    match effective {
        FusionStrategy::ReciprocalRank => reciprocal_rank_fusion(&lists, DEFAULT_RRF_K),
        _ => linear_combination(&[
            (vector, weights.vector),
            (metadata, weights.metadata),
            (graph, weights.graph),
            (text, weights.text),
        ]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    #[test]
    fn rrf_rewards_candidates_in_multiple_lists() {
        let a = [(id(1), 0.9), (id(2), 0.8), (id(3), 0.7)];
        let b = [(id(2), 0.95), (id(1), 0.85), (id(4), 0.75)];
        let results = reciprocal_rank_fusion(&[&a, &b], 60.0);
        assert!(results.iter().any(|(k, _)| *k == id(1)));
        assert!(results.iter().any(|(k, _)| *k == id(2)));
        for i in 1..results.len() {
            assert!(results[i - 1].1 >= results[i].1);
        }
    }

    #[test]
    fn adaptive_uses_rrf_when_a_component_exceeds_threshold() {
        let huge: Vec<(Uuid, f32)> = (0..201).map(|i| (id(i), 1.0)).collect();
        let small = [(id(0), 1.0)];
        let result = fuse(FusionStrategy::Adaptive, FusionWeights::default(), &huge, &small, &[], &[]);
        assert!(!result.is_empty());
    }

    #[test]
    fn linear_combination_weights_heavier_component_higher() {
        let a = [(id(1), 1.0)];
        let b = [(id(2), 1.0)];
        let results = linear_combination(&[(&a, 0.9), (&b, 0.1)]);
        let s1 = results.iter().find(|(k, _)| *k == id(1)).unwrap().1;
        let s2 = results.iter().find(|(k, _)| *k == id(2)).unwrap().1;
        assert!(s1 > s2);
    }
}
