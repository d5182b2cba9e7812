use std::sync::{Mutex, PoisonError};

use futures::future::join_all;
use futures::stream::{self, StreamExt};

use crate::models::{PredictionMap, Row};
use crate::scoring::{PredictionError, ScoreResult, ScoringClient};
use crate::session::{BatchTicket, BatchVerdict, Session};

/// Settled results of one batch, keyed by row position.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub dispatched: usize,
    pub scores: PredictionMap,
    pub failures: Vec<(usize, PredictionError)>,
}

/// Score every row concurrently and wait for all of them to settle.
///
/// With `max_in_flight` of `None` every request is in flight at once, one per
/// row. Individual failures are logged and left out of `scores`; they never
/// fail the batch.
pub async fn dispatch<C>(client: &C, rows: &[Row], max_in_flight: Option<usize>) -> BatchOutcome
where
    C: ScoringClient + ?Sized,
{
    let calls = rows.iter().enumerate().map(|(pos, row)| async move {
        tracing::debug!(pos, endpoint = client.endpoint(), "requesting prediction");
        (pos, client.score(row.fields()).await)
    });

    let settled: Vec<(usize, ScoreResult)> = match max_in_flight {
        None => join_all(calls).await,
        Some(limit) => stream::iter(calls).buffer_unordered(limit.max(1)).collect().await,
    };

    let mut outcome = BatchOutcome {
        dispatched: rows.len(),
        ..BatchOutcome::default()
    };
    for (pos, result) in settled {
        match result {
            Ok(prediction) => {
                outcome.scores.insert(pos, prediction);
            }
            Err(e) => {
                tracing::warn!(pos, error = %e, "prediction failed");
                outcome.failures.push((pos, e));
            }
        }
    }
    outcome.failures.sort_by_key(|(pos, _)| *pos);
    outcome
}

/// Predict the session's current match set.
///
/// The session lock is only held to start and to settle the batch, so
/// lookups can run while requests are in flight. Results are committed only
/// if no lookup, file load or newer batch happened in between. Returns
/// `None` when the match set is empty.
pub async fn predict<C>(
    session: &Mutex<Session>,
    client: &C,
    max_in_flight: Option<usize>,
) -> Option<(BatchVerdict, BatchOutcome)>
where
    C: ScoringClient + ?Sized,
{
    let ticket = session
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .begin_batch()?;
    Some(run_batch(session, client, ticket, max_in_flight).await)
}

/// Dispatch an already started batch and settle it against the session.
pub async fn run_batch<C>(
    session: &Mutex<Session>,
    client: &C,
    ticket: BatchTicket,
    max_in_flight: Option<usize>,
) -> (BatchVerdict, BatchOutcome)
where
    C: ScoringClient + ?Sized,
{
    let outcome = dispatch(client, &ticket.rows, max_in_flight).await;
    let summary = outcome.clone();

    let verdict = session
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .settle(ticket.generation, outcome);
    tracing::info!(
        generation = ticket.generation,
        dispatched = summary.dispatched,
        scored = summary.scores.len(),
        verdict = ?verdict,
        "prediction batch settled"
    );
    (verdict, summary)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::Semaphore;

    use super::*;
    use crate::index::{Index, IngestReport};
    use crate::models::Prediction;
    use crate::session::PredictionState;

    /// Scores a row by its amount column; fails rows whose merchant is listed.
    /// Every call waits on `gate` and records peak concurrency.
    struct FakeClient {
        failing: HashSet<String>,
        gate: Arc<Semaphore>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl FakeClient {
        fn new(failing: &[&str]) -> Self {
            Self {
                failing: failing.iter().map(|s| s.to_string()).collect(),
                gate: Arc::new(Semaphore::new(Semaphore::MAX_PERMITS)),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }

        fn gated(failing: &[&str]) -> Self {
            Self {
                gate: Arc::new(Semaphore::new(0)),
                ..Self::new(failing)
            }
        }
    }

    #[async_trait]
    impl ScoringClient for FakeClient {
        async fn score(&self, fields: &[String]) -> ScoreResult {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let permit = self.gate.acquire().await;
            drop(permit);
            tokio::task::yield_now().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let merchant = fields.get(2).cloned().unwrap_or_default();
            if self.failing.contains(&merchant) {
                return Err(PredictionError::Transport(format!("{merchant} unreachable")));
            }
            let score = fields
                .last()
                .and_then(|a| a.parse::<f64>().ok())
                .unwrap_or_default();
            Ok(Prediction { score, confidence: Some(0.9) })
        }

        fn endpoint(&self) -> &str {
            "fake://scoring"
        }
    }

    fn rows(n: usize) -> Vec<Row> {
        (0..n)
            .map(|i| {
                Row::from(vec![
                    "1".to_string(),
                    format!("2024-01-{:02}", i + 1),
                    format!("M{i}"),
                    "cat".to_string(),
                    "fisica".to_string(),
                    format!("{i}"),
                ])
            })
            .collect()
    }

    fn session_with(rows: Vec<Row>) -> Mutex<Session> {
        let mut input = vec![Ok(Row::from(&["id"][..]))];
        input.extend(rows.into_iter().map(Ok));
        let (index, _) = Index::build(input, true).unwrap();
        let mut session = Session::new();
        session.load(index, IngestReport::default());
        Mutex::new(session)
    }

    #[tokio::test]
    async fn test_dispatch_all_in_flight_at_once() {
        let client = FakeClient::new(&[]);
        let outcome = dispatch(&client, &rows(8), None).await;
        assert_eq!(outcome.dispatched, 8);
        assert_eq!(outcome.scores.len(), 8);
        assert_eq!(client.peak.load(Ordering::SeqCst), 8);
        assert_eq!(outcome.scores[&3].score, 3.0);
    }

    #[tokio::test]
    async fn test_dispatch_respects_cap() {
        let client = FakeClient::new(&[]);
        let outcome = dispatch(&client, &rows(8), Some(3)).await;
        assert_eq!(outcome.scores.len(), 8);
        assert!(client.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_one_failure_is_isolated() {
        let client = FakeClient::new(&["M2"]);
        let outcome = dispatch(&client, &rows(5), None).await;
        assert_eq!(outcome.scores.len(), 4);
        assert!(!outcome.scores.contains_key(&2));
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].0, 2);
    }

    #[tokio::test]
    async fn test_dispatch_empty() {
        let client = FakeClient::new(&[]);
        let outcome = dispatch(&client, &[], None).await;
        assert_eq!(outcome.dispatched, 0);
        assert!(outcome.scores.is_empty());
    }

    #[tokio::test]
    async fn test_predict_commits_partial_results() {
        let session = session_with(rows(5));
        session.lock().unwrap().lookup("1");
        let client = FakeClient::new(&["M0"]);

        let (verdict, outcome) = predict(&session, &client, None).await.unwrap();
        assert_eq!(verdict, BatchVerdict::PartiallyCommitted { scored: 4, failed: 1 });
        assert_eq!(outcome.failures.len(), 1);

        let session = session.lock().unwrap();
        assert_eq!(session.predictions().len(), 4);
        assert_eq!(session.state(), PredictionState::PartiallyCommitted { failed: 1 });
    }

    #[tokio::test]
    async fn test_lookup_while_in_flight_discards_batch() {
        let mut all = rows(3);
        all.push(Row::from(&["2", "2024-02-01", "Z", "cat", "digital", "99"][..]));
        let session = session_with(all);
        session.lock().unwrap().lookup("1");
        let client = FakeClient::gated(&[]);

        let batch = predict(&session, &client, None);
        let interleave = async {
            let matched = session.lock().unwrap().lookup("2").len();
            client.gate.add_permits(Semaphore::MAX_PERMITS >> 1);
            matched
        };
        let (result, matched) = tokio::join!(batch, interleave);

        assert_eq!(matched, 1);
        let (verdict, outcome) = result.unwrap();
        assert_eq!(verdict, BatchVerdict::Discarded);
        assert_eq!(outcome.scores.len(), 3);

        let session = session.lock().unwrap();
        assert_eq!(session.key(), Some("2"));
        assert!(session.predictions().is_empty());
        assert_eq!(session.state(), PredictionState::Idle);
    }

    #[tokio::test]
    async fn test_predict_without_matches_is_none() {
        let session = session_with(rows(2));
        session.lock().unwrap().lookup("nobody");
        let client = FakeClient::new(&[]);
        assert!(predict(&session, &client, None).await.is_none());
    }
}
