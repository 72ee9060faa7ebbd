//! Search definitions and the tasks planned from them

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Which family of outcomes a search enumerates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SearchKind {
    /// Boot-time parameters to initial generator seeds
    BootSeed,
    /// Individuals generated from a seed at an advance
    Individual,
    /// Eggs generated from a seed at an advance
    Egg,
    /// Seeds whose early output matches an observed pattern
    Pattern,
    /// Trainer ID / secret ID pairs produced by a seed
    TrainerInfo,
}

impl SearchKind {
    pub const ALL: [SearchKind; 5] = [
        SearchKind::BootSeed,
        SearchKind::Individual,
        SearchKind::Egg,
        SearchKind::Pattern,
        SearchKind::TrainerInfo,
    ];
}

impl std::fmt::Display for SearchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchKind::BootSeed => write!(f, "boot-seed"),
            SearchKind::Individual => write!(f, "individual"),
            SearchKind::Egg => write!(f, "egg"),
            SearchKind::Pattern => write!(f, "pattern"),
            SearchKind::TrainerInfo => write!(f, "trainer-info"),
        }
    }
}

impl std::str::FromStr for SearchKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "boot-seed" | "seed" | "mt-seed" => Ok(SearchKind::BootSeed),
            "individual" | "encounter" => Ok(SearchKind::Individual),
            "egg" | "eggs" => Ok(SearchKind::Egg),
            "pattern" | "needle" => Ok(SearchKind::Pattern),
            "trainer-info" | "trainer" | "id" => Ok(SearchKind::TrainerInfo),
            _ => Err(format!(
                "Unknown search kind: '{}'. Valid options: boot-seed, individual, egg, pattern, trainer-info",
                s
            )),
        }
    }
}

/// Half-open interval of instants, each paired with `combinations`
/// parameter combinations (key inputs, timer values, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRange {
    pub start: u64,
    pub end: u64,
    #[serde(default = "default_combinations")]
    pub combinations: u64,
}

fn default_combinations() -> u64 {
    1
}

impl TargetRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end,
            combinations: 1,
        }
    }

    pub fn with_combinations(mut self, combinations: u64) -> Self {
        self.combinations = combinations;
        self
    }

    /// Number of candidates in the flattened domain, `None` if it
    /// underflows or overflows.
    pub fn domain_size(&self) -> Option<u64> {
        self.end
            .checked_sub(self.start)
            .and_then(|instants| instants.checked_mul(self.combinations))
    }

    /// Map a flattened domain index back to `(instant, combination)`.
    pub fn locate(&self, index: u64) -> (u64, u64) {
        let combinations = self.combinations.max(1);
        (self.start + index / combinations, index % combinations)
    }
}

/// Immutable description of one user-initiated search.
///
/// `kind` stays a plain string so definitions can be loaded from JSON
/// written by other tools; it is resolved when the search is planned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchDefinition {
    pub kind: String,
    #[serde(default)]
    pub params: serde_json::Value,
    pub range: TargetRange,
}

impl SearchDefinition {
    pub fn new(kind: SearchKind, range: TargetRange) -> Self {
        Self {
            kind: kind.to_string(),
            params: serde_json::Value::Null,
            range,
        }
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Identifier of a planned task, stable within one plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub usize);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Contiguous slice `[offset, offset + len)` of the flattened domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubRange {
    pub offset: u64,
    pub len: u64,
}

impl SubRange {
    pub fn end(&self) -> u64 {
        self.offset + self.len
    }
}

/// One unit of parallel work
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub kind: SearchKind,
    pub range: TargetRange,
    pub sub_range: SubRange,
    pub params: Arc<serde_json::Value>,
    pub target_count: u64,
}
