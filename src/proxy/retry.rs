//! Retry/Failover Engine (C6): drives same-provider retries and
//! provider-switch failover over an ordered candidate list.
//!
//! The engine is transport-agnostic — it knows nothing about HTTP. Callers
//! supply a `forward` closure that performs one attempt against a
//! [`Candidate`] and classifies the outcome; [`super::orchestrator`] is the
//! only caller, wiring this to [`super::upstream`] and [`super::translate`].

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

use crate::models::Candidate;
use crate::selection::Strategy;

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 3, delay_ms: 1000 }
    }
}

/// How the caller classifies a single attempt's result.
pub enum AttemptOutcome<T> {
    Success(T),
    /// `status == 0` or 5xx: retried against the same provider before
    /// switching.
    Transient(T),
    /// Non-5xx 4xx: switches provider immediately, no same-provider retry.
    NonTransient(T),
}

pub enum RunResult<T> {
    Completed { result: T, candidate: Candidate, retry_count: u32 },
    /// Every candidate was tried and failed; carries the last outcome.
    Exhausted { result: T, candidate: Candidate, retry_count: u32 },
    /// The caller disconnected before a further upstream call was made.
    Cancelled { retry_count: u32 },
    /// The candidate list was empty to begin with.
    NoCandidates,
}

/// Drive the state machine in §4.6: PICK → (retry same provider on
/// transient failure, up to `max_attempts`) → ADVANCE to the next untried
/// candidate on exhaustion or non-transient failure → DONE.
pub async fn run<T, F, Fut>(candidates: &[Candidate], model: &str, strategy: &dyn Strategy, config: &RetryConfig, is_cancelled: impl Fn() -> bool, mut forward: F) -> RunResult<T>
where
    F: FnMut(Candidate) -> Fut,
    Fut: Future<Output = AttemptOutcome<T>>,
{
    let mut tried: HashSet<i64> = HashSet::new();
    let mut retry_count = 0u32;

    let Some(mut current) = strategy.select(candidates, model) else {
        return RunResult::NoCandidates;
    };

    loop {
        let mut attempts = 0u32;
        loop {
            if is_cancelled() {
                return RunResult::Cancelled { retry_count };
            }

            attempts += 1;
            match forward(current.clone()).await {
                AttemptOutcome::Success(result) => {
                    return RunResult::Completed { result, candidate: current, retry_count };
                }
                AttemptOutcome::Transient(result) => {
                    retry_count += 1;
                    if attempts < config.max_attempts {
                        sleep(Duration::from_millis(config.delay_ms)).await;
                        continue;
                    }
                    tried.insert(current.binding_id);
                    match strategy.next(candidates, model, &tried) {
                        Some(next) => {
                            current = next;
                            break;
                        }
                        None => return RunResult::Exhausted { result, candidate: current, retry_count },
                    }
                }
                AttemptOutcome::NonTransient(result) => {
                    retry_count += 1;
                    tried.insert(current.binding_id);
                    match strategy.next(candidates, model, &tried) {
                        Some(next) => {
                            current = next;
                            break;
                        }
                        None => return RunResult::Exhausted { result, candidate: current, retry_count },
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Protocol;
    use crate::selection::RoundRobinStrategy;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn candidate(binding_id: i64, weight: i64) -> Candidate {
        Candidate {
            binding_id,
            provider_id: binding_id,
            provider_name: format!("p{binding_id}"),
            base_url: "https://example.com".into(),
            protocol: Protocol::OpenAi,
            api_key: None,
            target_model: "m".into(),
            priority: 0,
            weight,
        }
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let candidates = vec![candidate(1, 1), candidate(2, 1)];
        let strategy = RoundRobinStrategy::new();
        let config = RetryConfig { max_attempts: 3, delay_ms: 0 };

        let result = run(&candidates, "m", &strategy, &config, || false, |c| async move { AttemptOutcome::Success(c.binding_id) }).await;

        match result {
            RunResult::Completed { result, retry_count, .. } => {
                assert_eq!(result, 1);
                assert_eq!(retry_count, 0);
            }
            _ => panic!("expected Completed"),
        }
    }

    #[tokio::test]
    async fn retries_same_provider_on_transient_then_succeeds() {
        let candidates = vec![candidate(1, 1)];
        let strategy = RoundRobinStrategy::new();
        let config = RetryConfig { max_attempts: 3, delay_ms: 0 };
        let call_count = Arc::new(AtomicU32::new(0));
        let counter = call_count.clone();

        let result = run(&candidates, "m", &strategy, &config, || false, move |c| {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    AttemptOutcome::Transient(c.binding_id)
                } else {
                    AttemptOutcome::Success(c.binding_id)
                }
            }
        })
        .await;

        assert_eq!(call_count.load(Ordering::SeqCst), 3);
        match result {
            RunResult::Completed { retry_count, .. } => assert_eq!(retry_count, 2),
            _ => panic!("expected Completed"),
        }
    }

    #[tokio::test]
    async fn switches_provider_on_non_transient_without_delay() {
        let candidates = vec![candidate(1, 1), candidate(2, 1)];
        let strategy = RoundRobinStrategy::new();
        let config = RetryConfig { max_attempts: 3, delay_ms: 0 };

        let result = run(&candidates, "m", &strategy, &config, || false, |c| async move {
            if c.binding_id == 1 {
                AttemptOutcome::NonTransient(c.binding_id)
            } else {
                AttemptOutcome::Success(c.binding_id)
            }
        })
        .await;

        match result {
            RunResult::Completed { result, retry_count, candidate } => {
                assert_eq!(result, 2);
                assert_eq!(retry_count, 1);
                assert_eq!(candidate.binding_id, 2);
            }
            _ => panic!("expected Completed"),
        }
    }

    #[tokio::test]
    async fn exhausts_all_candidates_and_returns_last_response() {
        let candidates = vec![candidate(1, 1), candidate(2, 1)];
        let strategy = RoundRobinStrategy::new();
        let config = RetryConfig { max_attempts: 1, delay_ms: 0 };

        let result = run(&candidates, "m", &strategy, &config, || false, |c| async move { AttemptOutcome::Transient(c.binding_id) }).await;

        match result {
            RunResult::Exhausted { retry_count, .. } => assert_eq!(retry_count, 2),
            _ => panic!("expected Exhausted"),
        }
    }

    #[tokio::test]
    async fn cancellation_aborts_before_further_calls() {
        let candidates = vec![candidate(1, 1)];
        let strategy = RoundRobinStrategy::new();
        let config = RetryConfig { max_attempts: 3, delay_ms: 0 };

        let result = run(&candidates, "m", &strategy, &config, || true, |_c| async move { AttemptOutcome::Success(1) }).await;

        match result {
            RunResult::Cancelled { retry_count } => assert_eq!(retry_count, 0),
            _ => panic!("expected Cancelled"),
        }
    }

    #[tokio::test]
    async fn no_candidates_returns_no_candidates() {
        let candidates: Vec<Candidate> = vec![];
        let strategy = RoundRobinStrategy::new();
        let config = RetryConfig::default();

        let result: RunResult<i64> = run(&candidates, "m", &strategy, &config, || false, |c| async move { AttemptOutcome::Success(c.binding_id) }).await;
        assert!(matches!(result, RunResult::NoCandidates));
    }
}
