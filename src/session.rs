use crate::dispatch::BatchOutcome;
use crate::index::{Index, IngestReport};
use crate::models::{MatchSet, PredictionMap, Row};

/// Prediction lifecycle for the current match set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictionState {
    Idle,
    Predicting { generation: u64 },
    Committed,
    PartiallyCommitted { failed: usize },
}

/// What happened to a settled batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchVerdict {
    Committed { scored: usize },
    PartiallyCommitted { scored: usize, failed: usize },
    /// The session moved on before the batch settled.
    Discarded,
}

/// Everything that mutates a [`Session`].
#[derive(Debug)]
pub enum Event {
    FileLoaded { index: Index, report: IngestReport },
    LookupChanged { key: String },
    BatchStarted,
    BatchSettled { generation: u64, outcome: BatchOutcome },
}

/// What a transition hands back to its caller.
#[derive(Debug)]
pub enum Applied {
    Nothing,
    Started(BatchTicket),
    Settled(BatchVerdict),
}

/// Handed out when a batch starts; the generation is fixed for its lifetime.
#[derive(Debug, Clone)]
pub struct BatchTicket {
    pub generation: u64,
    pub rows: MatchSet,
}

/// The whole application state: loaded index, current lookup, committed
/// predictions and the live generation.
///
/// Every transition that changes what the match set or its predictions refer
/// to bumps the generation, so a batch started earlier fails the equality
/// check at commit time.
#[derive(Debug)]
pub struct Session {
    index: Option<Index>,
    report: Option<IngestReport>,
    key: Option<String>,
    matches: MatchSet,
    predictions: PredictionMap,
    state: PredictionState,
    generation: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            index: None,
            report: None,
            key: None,
            matches: Vec::new(),
            predictions: PredictionMap::new(),
            state: PredictionState::Idle,
            generation: 0,
        }
    }
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one transition. `BatchStarted` yields a ticket (unless the match
    /// set is empty) and `BatchSettled` yields a verdict.
    pub fn apply(&mut self, event: Event) -> Applied {
        match event {
            Event::FileLoaded { index, report } => {
                self.index = Some(index);
                self.report = Some(report);
                self.key = None;
                self.reset_matches(Vec::new());
                Applied::Nothing
            }
            Event::LookupChanged { key } => {
                let matches = self
                    .index
                    .as_ref()
                    .map(|index| index.get(&key).to_vec())
                    .unwrap_or_default();
                self.key = Some(key);
                self.reset_matches(matches);
                Applied::Nothing
            }
            Event::BatchStarted => match self.start() {
                Some(ticket) => Applied::Started(ticket),
                None => Applied::Nothing,
            },
            Event::BatchSettled { generation, outcome } => {
                Applied::Settled(self.commit(generation, outcome))
            }
        }
    }

    pub fn load(&mut self, index: Index, report: IngestReport) {
        self.apply(Event::FileLoaded { index, report });
    }

    /// Replace the match set with the rows for `key`. Never waits on
    /// in-flight batches; they are invalidated instead.
    pub fn lookup(&mut self, key: &str) -> &[Row] {
        self.apply(Event::LookupChanged {
            key: key.to_string(),
        });
        &self.matches
    }

    /// Start a prediction batch over the current match set. Clears committed
    /// predictions and supersedes any earlier batch. `None` when there is
    /// nothing to score.
    pub fn begin_batch(&mut self) -> Option<BatchTicket> {
        match self.apply(Event::BatchStarted) {
            Applied::Started(ticket) => Some(ticket),
            _ => None,
        }
    }

    pub fn settle(&mut self, generation: u64, outcome: BatchOutcome) -> BatchVerdict {
        match self.apply(Event::BatchSettled { generation, outcome }) {
            Applied::Settled(verdict) => verdict,
            _ => BatchVerdict::Discarded,
        }
    }

    fn start(&mut self) -> Option<BatchTicket> {
        if self.matches.is_empty() {
            return None;
        }
        self.generation += 1;
        self.predictions.clear();
        self.state = PredictionState::Predicting {
            generation: self.generation,
        };
        tracing::debug!(generation = self.generation, rows = self.matches.len(), "batch started");
        Some(BatchTicket {
            generation: self.generation,
            rows: self.matches.clone(),
        })
    }

    fn commit(&mut self, generation: u64, outcome: BatchOutcome) -> BatchVerdict {
        let live = self.state == PredictionState::Predicting { generation }
            && generation == self.generation;
        if !live {
            tracing::debug!(
                generation,
                live = self.generation,
                "discarding stale prediction batch"
            );
            return BatchVerdict::Discarded;
        }

        let limit = self.matches.len();
        self.predictions = outcome
            .scores
            .into_iter()
            .filter(|(pos, _)| *pos < limit)
            .collect();
        let scored = self.predictions.len();
        let failed = limit - scored;
        if failed == 0 {
            self.state = PredictionState::Committed;
            BatchVerdict::Committed { scored }
        } else {
            self.state = PredictionState::PartiallyCommitted { failed };
            BatchVerdict::PartiallyCommitted { scored, failed }
        }
    }

    fn reset_matches(&mut self, matches: MatchSet) {
        self.generation += 1;
        self.matches = matches;
        self.predictions.clear();
        self.state = PredictionState::Idle;
    }

    pub fn index(&self) -> Option<&Index> {
        self.index.as_ref()
    }

    pub fn report(&self) -> Option<&IngestReport> {
        self.report.as_ref()
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn matches(&self) -> &[Row] {
        &self.matches
    }

    pub fn predictions(&self) -> &PredictionMap {
        &self.predictions
    }

    pub fn state(&self) -> PredictionState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Prediction;

    fn loaded() -> Session {
        let rows = vec![
            Ok(Row::from(&["id", "date", "merchant", "cat", "type", "amount"][..])),
            Ok(Row::from(&["1", "2024-01-01", "A", "cat1", "fisica", "10.5"][..])),
            Ok(Row::from(&["1", "2024-01-02", "B", "cat2", "digital", "5"][..])),
            Ok(Row::from(&["2", "2024-01-03", "C", "cat1", "fisica", "7"][..])),
        ];
        let (index, _) = Index::build(rows, true).unwrap();
        let mut session = Session::new();
        session.load(index, IngestReport::default());
        session
    }

    fn outcome(positions: &[usize]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for &pos in positions {
            outcome.scores.insert(pos, Prediction { score: pos as f64, confidence: None });
        }
        outcome.dispatched = positions.len();
        outcome
    }

    #[test]
    fn test_lookup_returns_group_in_order() {
        let mut session = loaded();
        let merchants: Vec<&str> = session
            .lookup("1")
            .iter()
            .filter_map(Row::merchant)
            .collect();
        assert_eq!(merchants, vec!["A", "B"]);
        assert_eq!(session.key(), Some("1"));
    }

    #[test]
    fn test_lookup_without_file_is_empty() {
        let mut session = Session::new();
        assert!(session.lookup("1").is_empty());
    }

    #[test]
    fn test_full_commit() {
        let mut session = loaded();
        session.lookup("1");
        let ticket = session.begin_batch().unwrap();
        assert_eq!(session.state(), PredictionState::Predicting { generation: ticket.generation });
        let verdict = session.settle(ticket.generation, outcome(&[0, 1]));
        assert_eq!(verdict, BatchVerdict::Committed { scored: 2 });
        assert_eq!(session.state(), PredictionState::Committed);
        assert_eq!(session.predictions().len(), 2);
    }

    #[test]
    fn test_partial_commit() {
        let mut session = loaded();
        session.lookup("1");
        let ticket = session.begin_batch().unwrap();
        let verdict = session.settle(ticket.generation, outcome(&[1]));
        assert_eq!(verdict, BatchVerdict::PartiallyCommitted { scored: 1, failed: 1 });
        assert_eq!(session.state(), PredictionState::PartiallyCommitted { failed: 1 });
        assert!(session.predictions().contains_key(&1));
    }

    #[test]
    fn test_lookup_discards_in_flight_batch() {
        let mut session = loaded();
        session.lookup("1");
        let ticket = session.begin_batch().unwrap();
        session.lookup("2");
        let verdict = session.settle(ticket.generation, outcome(&[0, 1]));
        assert_eq!(verdict, BatchVerdict::Discarded);
        assert!(session.predictions().is_empty());
        assert_eq!(session.state(), PredictionState::Idle);
    }

    #[test]
    fn test_same_key_lookup_also_invalidates() {
        let mut session = loaded();
        session.lookup("1");
        let ticket = session.begin_batch().unwrap();
        session.lookup("1");
        assert_eq!(session.settle(ticket.generation, outcome(&[0])), BatchVerdict::Discarded);
    }

    #[test]
    fn test_newer_batch_supersedes_older() {
        let mut session = loaded();
        session.lookup("1");
        let first = session.begin_batch().unwrap();
        let second = session.begin_batch().unwrap();
        assert_eq!(session.settle(first.generation, outcome(&[0, 1])), BatchVerdict::Discarded);
        assert_eq!(
            session.settle(second.generation, outcome(&[0, 1])),
            BatchVerdict::Committed { scored: 2 }
        );
    }

    #[test]
    fn test_file_load_clears_state() {
        let mut session = loaded();
        session.lookup("1");
        let ticket = session.begin_batch().unwrap();
        session.settle(ticket.generation, outcome(&[0, 1]));
        let before = session.generation();

        let (index, _) = Index::build(Vec::<crate::error::Result<Row>>::new(), true).unwrap();
        session.load(index, IngestReport::default());
        assert!(session.generation() > before);
        assert!(session.matches().is_empty());
        assert!(session.predictions().is_empty());
        assert_eq!(session.key(), None);
        assert_eq!(session.state(), PredictionState::Idle);
    }

    #[test]
    fn test_settling_twice_is_discarded() {
        let mut session = loaded();
        session.lookup("1");
        let ticket = session.begin_batch().unwrap();
        session.settle(ticket.generation, outcome(&[0, 1]));
        assert_eq!(session.settle(ticket.generation, outcome(&[0])), BatchVerdict::Discarded);
        assert_eq!(session.predictions().len(), 2);
    }

    #[test]
    fn test_out_of_range_positions_are_dropped() {
        let mut session = loaded();
        session.lookup("2");
        let ticket = session.begin_batch().unwrap();
        session.settle(ticket.generation, outcome(&[0, 5]));
        assert!(session.predictions().len() <= session.matches().len());
    }

    #[test]
    fn test_batch_transitions_through_apply() {
        let mut session = loaded();
        session.lookup("2");
        let before = session.generation();
        let Applied::Started(ticket) = session.apply(Event::BatchStarted) else {
            panic!("expected a ticket");
        };
        assert_eq!(ticket.generation, before + 1);
        assert_eq!(ticket.rows.len(), 1);
        assert_eq!(session.state(), PredictionState::Predicting { generation: ticket.generation });

        let applied = session.apply(Event::BatchSettled {
            generation: ticket.generation,
            outcome: outcome(&[0]),
        });
        assert!(matches!(applied, Applied::Settled(BatchVerdict::Committed { scored: 1 })));
    }

    #[test]
    fn test_batch_started_on_empty_match_set_changes_nothing() {
        let mut session = loaded();
        let before = session.generation();
        assert!(matches!(session.apply(Event::BatchStarted), Applied::Nothing));
        assert_eq!(session.generation(), before);
        assert_eq!(session.state(), PredictionState::Idle);
    }

    #[test]
    fn test_no_batch_for_empty_match_set() {
        let mut session = loaded();
        session.lookup("missing");
        assert!(session.begin_batch().is_none());
    }
}
