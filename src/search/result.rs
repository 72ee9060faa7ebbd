//! Result items and batches produced by searchers
//!
//! Every item carries its variant tag from the moment it leaves the
//! computation unit. Units that can only emit untyped JSON go through
//! [`RawBatch::into_batch`], which classifies each payload once by shape.

use crate::error::StepError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Boot-time parameters that produce a wanted initial seed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedMatch {
    pub instant: u64,
    pub combination: u64,
    pub initial_seed: u64,
}

/// An individual generated at some advance of a seed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Individual {
    pub initial_seed: u64,
    pub advance: u32,
    pub pid: u32,
    pub nature: u8,
    pub ivs: [u8; 6],
    pub shiny: bool,
}

/// An egg generated at some advance of a seed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Egg {
    pub initial_seed: u64,
    pub advance: u32,
    pub pid: u32,
    pub nature: u8,
    pub ivs: [u8; 6],
    /// Per-stat parent the value was inherited from (0 = none, 1 = first, 2 = second)
    pub inheritance: [u8; 6],
    pub shiny: bool,
}

/// A seed whose early output reproduces an observed pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub initial_seed: u64,
    pub advance: u32,
    pub pattern: String,
}

/// Trainer identifiers produced by a seed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainerInfo {
    pub initial_seed: u64,
    pub advance: u32,
    pub trainer_id: u16,
    pub secret_id: u16,
}

/// Variant tag of a [`ResultItem`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResultKind {
    SeedMatch,
    Individual,
    Egg,
    PatternMatch,
    TrainerInfo,
}

impl std::fmt::Display for ResultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResultKind::SeedMatch => write!(f, "seed-match"),
            ResultKind::Individual => write!(f, "individual"),
            ResultKind::Egg => write!(f, "egg"),
            ResultKind::PatternMatch => write!(f, "pattern-match"),
            ResultKind::TrainerInfo => write!(f, "trainer-info"),
        }
    }
}

/// One result produced by a searcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ResultItem {
    SeedMatch(SeedMatch),
    Individual(Individual),
    Egg(Egg),
    PatternMatch(PatternMatch),
    TrainerInfo(TrainerInfo),
}

impl ResultItem {
    pub fn kind(&self) -> ResultKind {
        match self {
            ResultItem::SeedMatch(_) => ResultKind::SeedMatch,
            ResultItem::Individual(_) => ResultKind::Individual,
            ResultItem::Egg(_) => ResultKind::Egg,
            ResultItem::PatternMatch(_) => ResultKind::PatternMatch,
            ResultItem::TrainerInfo(_) => ResultKind::TrainerInfo,
        }
    }

    /// Classify an untagged payload by the fields it carries.
    ///
    /// Shapes are tested from the most distinguishing field set to the
    /// least, so an egg (which also has `ivs` and `nature`) is never taken
    /// for an individual.
    pub fn from_untagged(payload: Value) -> Result<Self, StepError> {
        let Some(object) = payload.as_object() else {
            return Err(StepError::UnrecognizedPayload(format!(
                "expected an object, got {}",
                payload
            )));
        };
        let has = |field: &str| object.contains_key(field);

        let decoded = if has("trainer_id") && has("secret_id") {
            serde_json::from_value(payload).map(ResultItem::TrainerInfo)
        } else if has("inheritance") {
            serde_json::from_value(payload).map(ResultItem::Egg)
        } else if has("ivs") && has("nature") {
            serde_json::from_value(payload).map(ResultItem::Individual)
        } else if has("pattern") {
            serde_json::from_value(payload).map(ResultItem::PatternMatch)
        } else if has("initial_seed") {
            serde_json::from_value(payload).map(ResultItem::SeedMatch)
        } else {
            let fields: Vec<_> = object.keys().map(String::as_str).collect();
            return Err(StepError::UnrecognizedPayload(format!(
                "no result shape has fields [{}]",
                fields.join(", ")
            )));
        };

        decoded.map_err(|e| StepError::UnrecognizedPayload(e.to_string()))
    }
}

/// One bounded increment of work returned by a searcher step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub results: Vec<ResultItem>,
    /// Units processed by the task so far, cumulative
    pub processed_count: u64,
    pub is_done: bool,
}

impl Batch {
    pub fn new(results: Vec<ResultItem>, processed_count: u64, is_done: bool) -> Self {
        Self {
            results,
            processed_count,
            is_done,
        }
    }
}

/// Batch as emitted by a computation unit without variant tags
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawBatch {
    pub results: Vec<Value>,
    pub processed_count: u64,
    pub is_done: bool,
}

impl RawBatch {
    /// Attach variant tags to every payload. One bad payload fails the
    /// whole batch so no item is silently dropped.
    pub fn into_batch(self) -> Result<Batch, StepError> {
        let results = self
            .results
            .into_iter()
            .map(ResultItem::from_untagged)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Batch::new(results, self.processed_count, self.is_done))
    }
}
