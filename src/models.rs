use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One parsed line of the input file.
///
/// Columns are positional: `[id, date, merchant, merchant_category, sale_type, amount]`.
/// Arity is not enforced, so the accessors return `None` when a row is too short.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(Vec<String>);

impl Row {
    pub fn new(fields: Vec<String>) -> Self {
        Self(fields)
    }

    pub fn fields(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, idx: usize) -> Option<&str> {
        self.0.get(idx).map(String::as_str)
    }

    /// Grouping key. An empty first field counts as missing.
    pub fn id(&self) -> Option<&str> {
        self.get(0).filter(|k| !k.is_empty())
    }

    pub fn date(&self) -> Option<&str> {
        self.get(1)
    }

    pub fn merchant(&self) -> Option<&str> {
        self.get(2)
    }

    /// Second-to-last column.
    pub fn sale_type(&self) -> Option<&str> {
        self.len().checked_sub(2).and_then(|i| self.get(i))
    }

    /// Last column.
    pub fn amount(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// True when every field is blank after trimming.
    pub fn is_blank(&self) -> bool {
        self.0.iter().all(|f| f.trim().is_empty())
    }
}

impl From<Vec<String>> for Row {
    fn from(fields: Vec<String>) -> Self {
        Self(fields)
    }
}

impl From<&[&str]> for Row {
    fn from(fields: &[&str]) -> Self {
        Self(fields.iter().map(|f| f.to_string()).collect())
    }
}

/// Rows returned by the most recent lookup.
pub type MatchSet = Vec<Row>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub score: f64,
    pub confidence: Option<f64>,
}

/// Row position within the current match set -> score.
pub type PredictionMap = BTreeMap<usize, Prediction>;
