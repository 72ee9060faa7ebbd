//! Merging of batches from concurrently running tasks into typed buckets.

use crate::search::result::{
    Batch, Egg, Individual, PatternMatch, ResultItem, ResultKind, SeedMatch, TrainerInfo,
};
use serde::Serialize;
use std::collections::BTreeMap;

/// Results of one execution, one bucket per variant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregatedResults {
    pub seed_matches: Vec<SeedMatch>,
    pub individuals: Vec<Individual>,
    pub eggs: Vec<Egg>,
    pub pattern_matches: Vec<PatternMatch>,
    pub trainer_infos: Vec<TrainerInfo>,
}

impl AggregatedResults {
    /// Items across all buckets.
    pub fn total(&self) -> usize {
        self.seed_matches.len()
            + self.individuals.len()
            + self.eggs.len()
            + self.pattern_matches.len()
            + self.trainer_infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Non-empty buckets with their sizes.
    pub fn counts(&self) -> BTreeMap<ResultKind, usize> {
        [
            (ResultKind::SeedMatch, self.seed_matches.len()),
            (ResultKind::Individual, self.individuals.len()),
            (ResultKind::Egg, self.eggs.len()),
            (ResultKind::PatternMatch, self.pattern_matches.len()),
            (ResultKind::TrainerInfo, self.trainer_infos.len()),
        ]
        .into_iter()
        .filter(|&(_, n)| n > 0)
        .collect()
    }
}

/// Accumulates batches as they arrive.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    results: AggregatedResults,
    batches: u64,
    received: u64,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a whole stream of batches at once.
    pub fn merge<I>(batches: I) -> AggregatedResults
    where
        I: IntoIterator<Item = Batch>,
    {
        let mut aggregator = Self::new();
        for batch in batches {
            aggregator.push(batch);
        }
        aggregator.finish()
    }

    /// Append the items of one batch, preserving their order.
    pub fn push(&mut self, batch: Batch) {
        self.batches += 1;
        self.received += batch.results.len() as u64;
        for item in batch.results {
            self.insert(item);
        }
    }

    fn insert(&mut self, item: ResultItem) {
        match item {
            ResultItem::SeedMatch(m) => self.results.seed_matches.push(m),
            ResultItem::Individual(i) => self.results.individuals.push(i),
            ResultItem::Egg(e) => self.results.eggs.push(e),
            ResultItem::PatternMatch(p) => self.results.pattern_matches.push(p),
            ResultItem::TrainerInfo(t) => self.results.trainer_infos.push(t),
        }
    }

    /// Batches pushed so far.
    pub fn batches(&self) -> u64 {
        self.batches
    }

    /// Items received so far, summed over batch lengths.
    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn results(&self) -> &AggregatedResults {
        &self.results
    }

    pub fn finish(self) -> AggregatedResults {
        self.results
    }
}
