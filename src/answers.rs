use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{FormError, Result};

/// Question to answer pairs collected during the interview.
///
/// Each distinct question text holds one answer; recording the same question
/// again replaces the answer in place. Entries keep the order in which their
/// question was first answered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnswerStore {
    turns: IndexMap<String, String>,
}

impl AnswerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        self.turns.insert(question.into(), answer.into());
    }

    pub fn get(&self, question: &str) -> Option<&str> {
        self.turns.get(question).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.turns.iter().map(|(q, a)| (q.as_str(), a.as_str()))
    }

    /// Write every turn to `path` as pretty JSON, replacing whatever was there.
    pub fn persist(&self, path: &Path) -> Result<()> {
        let persistence_error = |source: std::io::Error| FormError::Persistence {
            path: path.to_path_buf(),
            source,
        };
        let mut json = serde_json::to_string_pretty(self)
            .map_err(|e| persistence_error(std::io::Error::other(e)))?;
        json.push('\n');
        std::fs::write(path, json).map_err(persistence_error)?;
        info!(path = %path.display(), answers = self.len(), "Saved answers");
        Ok(())
    }

    /// Read a result written by [`AnswerStore::persist`].
    pub fn load(path: &Path) -> Result<Self> {
        let persistence_error = |source: std::io::Error| FormError::Persistence {
            path: path.to_path_buf(),
            source,
        };
        let raw = std::fs::read_to_string(path).map_err(persistence_error)?;
        serde_json::from_str(&raw).map_err(|e| persistence_error(e.into()))
    }
}
