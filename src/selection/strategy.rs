use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::models::Candidate;

/// Shared selection interface. Both concrete strategies keep per-model
/// state keyed by `requested_model`, protected by a lock scoped to that
/// key rather than the whole map.
pub trait Strategy: Send + Sync {
    /// First pick for a request.
    fn select(&self, candidates: &[Candidate], model: &str) -> Option<Candidate>;

    /// Pick the next candidate not already in `tried` (by binding id).
    /// Returns `None` once every candidate has been tried.
    fn next(&self, candidates: &[Candidate], model: &str, tried: &HashSet<i64>) -> Option<Candidate>;
}

/// `target = round mod total_weight`; walk cumulative weights and take the
/// first candidate whose cumulative sum exceeds `target`. Degrades to plain
/// cyclic advance when every weight is non-positive.
fn weighted_pick(candidates: &[&Candidate], round: u64) -> Option<usize> {
    if candidates.is_empty() {
        return None;
    }
    if candidates.len() == 1 {
        return Some(0);
    }

    let total_weight: i64 = candidates.iter().map(|c| c.weight.max(0)).sum();
    if total_weight <= 0 {
        return Some((round % candidates.len() as u64) as usize);
    }

    let target = (round % total_weight as u64) as i64;
    let mut cumulative = 0i64;
    for (idx, c) in candidates.iter().enumerate() {
        cumulative += c.weight.max(0);
        if target < cumulative {
            return Some(idx);
        }
    }
    Some(candidates.len() - 1)
}

/// Weighted round-robin over the full candidate set, with state keyed by
/// `requested_model`.
#[derive(Default)]
pub struct RoundRobinStrategy {
    rounds: DashMap<String, AtomicU64>,
}

impl RoundRobinStrategy {
    pub fn new() -> Self {
        Self { rounds: DashMap::new() }
    }

    fn next_round(&self, model: &str) -> u64 {
        let counter = self.rounds.entry(model.to_string()).or_insert_with(|| AtomicU64::new(0));
        counter.fetch_add(1, Ordering::Relaxed)
    }
}

impl Strategy for RoundRobinStrategy {
    fn select(&self, candidates: &[Candidate], model: &str) -> Option<Candidate> {
        self.next(candidates, model, &HashSet::new())
    }

    fn next(&self, candidates: &[Candidate], model: &str, tried: &HashSet<i64>) -> Option<Candidate> {
        let remaining: Vec<&Candidate> = candidates.iter().filter(|c| !tried.contains(&c.binding_id)).collect();
        if remaining.is_empty() {
            return None;
        }
        let round = self.next_round(model);
        weighted_pick(&remaining, round).map(|idx| remaining[idx].clone())
    }
}

/// Buckets candidates by `priority` (lowest first); within the lowest
/// non-exhausted bucket, applies the same weighted pick as
/// [`RoundRobinStrategy`]. A bucket is exhausted once every member of it
/// is in `tried` — at that point the next bucket is consulted.
#[derive(Default)]
pub struct PriorityStrategy {
    rounds: DashMap<String, AtomicU64>,
}

impl PriorityStrategy {
    pub fn new() -> Self {
        Self { rounds: DashMap::new() }
    }

    fn next_round(&self, model: &str) -> u64 {
        let counter = self.rounds.entry(model.to_string()).or_insert_with(|| AtomicU64::new(0));
        counter.fetch_add(1, Ordering::Relaxed)
    }
}

impl Strategy for PriorityStrategy {
    fn select(&self, candidates: &[Candidate], model: &str) -> Option<Candidate> {
        self.next(candidates, model, &HashSet::new())
    }

    fn next(&self, candidates: &[Candidate], model: &str, tried: &HashSet<i64>) -> Option<Candidate> {
        let mut priorities: Vec<i32> = candidates.iter().map(|c| c.priority).collect();
        priorities.sort_unstable();
        priorities.dedup();

        for priority in priorities {
            let bucket: Vec<&Candidate> = candidates
                .iter()
                .filter(|c| c.priority == priority && !tried.contains(&c.binding_id))
                .collect();
            if bucket.is_empty() {
                continue;
            }
            let round = self.next_round(model);
            return weighted_pick(&bucket, round).map(|idx| bucket[idx].clone());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Protocol;

    fn candidate(binding_id: i64, priority: i32, weight: i64) -> Candidate {
        Candidate {
            binding_id,
            provider_id: binding_id,
            provider_name: format!("p{binding_id}"),
            base_url: "https://example.com".into(),
            protocol: Protocol::OpenAi,
            api_key: None,
            target_model: "m".into(),
            priority,
            weight,
        }
    }

    #[test]
    fn weighted_round_robin_matches_literal_scenario() {
        // Bindings A(w=3), B(w=1): 8 sequential picks route A,A,A,B,A,A,A,B.
        let a = candidate(1, 0, 3);
        let b = candidate(2, 0, 1);
        let candidates = vec![a, b];
        let strategy = RoundRobinStrategy::new();
        let picks: Vec<i64> = (0..8)
            .map(|_| strategy.select(&candidates, "gpt-4").unwrap().binding_id)
            .collect();
        assert_eq!(picks, vec![1, 1, 1, 2, 1, 1, 1, 2]);
    }

    #[test]
    fn equal_weights_alternate() {
        let candidates = vec![candidate(1, 0, 1), candidate(2, 0, 1)];
        let strategy = RoundRobinStrategy::new();
        let picks: Vec<i64> = (0..4)
            .map(|_| strategy.select(&candidates, "m").unwrap().binding_id)
            .collect();
        assert_eq!(picks, vec![1, 2, 1, 2]);
    }

    #[test]
    fn non_positive_weights_fall_back_to_cyclic() {
        let candidates = vec![candidate(1, 0, 0), candidate(2, 0, -1)];
        let strategy = RoundRobinStrategy::new();
        let picks: Vec<i64> = (0..4)
            .map(|_| strategy.select(&candidates, "m").unwrap().binding_id)
            .collect();
        assert_eq!(picks, vec![1, 2, 1, 2]);
    }

    #[test]
    fn model_keys_are_isolated() {
        let candidates = vec![candidate(1, 0, 1), candidate(2, 0, 1)];
        let strategy = RoundRobinStrategy::new();
        assert_eq!(strategy.select(&candidates, "a").unwrap().binding_id, 1);
        assert_eq!(strategy.select(&candidates, "b").unwrap().binding_id, 1);
        assert_eq!(strategy.select(&candidates, "a").unwrap().binding_id, 2);
    }

    #[test]
    fn next_skips_tried_candidates() {
        let candidates = vec![candidate(1, 0, 1), candidate(2, 0, 1), candidate(3, 0, 1)];
        let strategy = RoundRobinStrategy::new();
        let mut tried = HashSet::new();
        tried.insert(1);
        tried.insert(2);
        let picked = strategy.next(&candidates, "m", &tried).unwrap();
        assert_eq!(picked.binding_id, 3);
    }

    #[test]
    fn priority_strategy_exhausts_lowest_bucket_before_next() {
        // priority 0: A, B; priority 1: C.
        let candidates = vec![candidate(1, 0, 1), candidate(2, 0, 1), candidate(3, 1, 1)];
        let strategy = PriorityStrategy::new();
        let mut tried = HashSet::new();
        assert_eq!(strategy.select(&candidates, "m").unwrap().binding_id, 1);
        tried.insert(1);
        assert_eq!(strategy.next(&candidates, "m", &tried).unwrap().binding_id, 2);
        tried.insert(2);
        // Both priority-0 candidates tried: falls through to priority 1.
        assert_eq!(strategy.next(&candidates, "m", &tried).unwrap().binding_id, 3);
    }

    #[test]
    fn returns_none_when_all_tried() {
        let candidates = vec![candidate(1, 0, 1)];
        let strategy = RoundRobinStrategy::new();
        let mut tried = HashSet::new();
        tried.insert(1);
        assert!(strategy.next(&candidates, "m", &tried).is_none());
    }
}
