//! Reference computation unit
//!
//! A compact stand-in for the real seed arithmetic so every search kind
//! can run end to end. Each candidate `(instant, combination)` is hashed
//! into a 64-bit initial seed; outcomes are then drawn from a 64-bit LCG
//! started at that seed, one advance at a time:
//!
//! - boot-seed: the seed's leading `prefix_bits` equal `seed_prefix`
//! - individual / egg: PID, nature and IVs within the requested bounds
//! - pattern: the first draws, read as L/R, spell `pattern`
//! - trainer-info: trainer and secret IDs matching the requested filters

use crate::error::StepError;
use crate::search::definition::{SearchKind, SubRange, TargetRange, Task};
use crate::search::parallel::backend::Backend;
use crate::search::parallel::channel::CancellationToken;
use crate::search::result::{Batch, Egg, Individual, PatternMatch, ResultItem, SeedMatch, TrainerInfo};
use crate::search::searcher::{Searcher, SearcherFactory};
use serde::Deserialize;
use tracing::debug;

const LCG_MUL: u64 = 0x5D58_8B65_6C07_8965;
const LCG_ADD: u64 = 0x0026_9EC3;
const GOLDEN: u64 = 0x9E37_79B9_7F4A_7C15;
const NATURES: u64 = 25;
const MAX_IV: u8 = 31;
const MAX_PATTERN_LEN: usize = 32;

#[derive(Debug, Clone, Copy)]
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(LCG_MUL).wrapping_add(LCG_ADD);
        self.0
    }

    fn next_u32(&mut self) -> u32 {
        (self.next() >> 32) as u32
    }

    /// Top `bits` bits of the next state.
    fn next_bits(&mut self, bits: u32) -> u64 {
        self.next() >> (64 - bits)
    }

    /// Uniform draw in `[0, n)` from the high 32 bits.
    fn next_below(&mut self, n: u64) -> u64 {
        (self.next_u32() as u64 * n) >> 32
    }
}

/// Initial seed for a boot instant and parameter combination.
pub fn boot_seed(instant: u64, combination: u64) -> u64 {
    let mut z = instant
        .wrapping_add(combination.wrapping_mul(GOLDEN))
        .wrapping_add(GOLDEN);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn is_shiny(pid: u32, trainer_id: u16, secret_id: u16) -> bool {
    let pid_hi = (pid >> 16) as u16;
    let pid_lo = pid as u16;
    (trainer_id ^ secret_id ^ pid_hi ^ pid_lo) < 8
}

/// Per-kind filters, read from a task's opaque parameters.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReferenceParams {
    pub prefix_bits: u32,
    pub seed_prefix: u64,
    /// Advances examined per initial seed.
    pub advances: u32,
    pub min_ivs: [u8; 6],
    pub max_ivs: [u8; 6],
    pub nature: Option<u8>,
    pub shiny_only: bool,
    /// Player IDs used for shininess of individuals and eggs.
    pub trainer_id: u16,
    pub secret_id: u16,
    /// IVs of the two parents, inherited by eggs.
    pub parent_ivs: [[u8; 6]; 2],
    pub pattern: String,
    pub target_trainer_id: Option<u16>,
    pub target_secret_id: Option<u16>,
    /// PID that the generated IDs must make shiny.
    pub shiny_pid: Option<u32>,
}

impl Default for ReferenceParams {
    fn default() -> Self {
        Self {
            prefix_bits: 12,
            seed_prefix: 0,
            advances: 1,
            min_ivs: [0; 6],
            max_ivs: [MAX_IV; 6],
            nature: None,
            shiny_only: false,
            trainer_id: 0,
            secret_id: 0,
            parent_ivs: [[MAX_IV; 6]; 2],
            pattern: "LRRLRLLR".into(),
            target_trainer_id: None,
            target_secret_id: None,
            shiny_pid: None,
        }
    }
}

impl ReferenceParams {
    pub fn from_task(task: &Task) -> Result<Self, StepError> {
        let params = if task.params.is_null() {
            Self::default()
        } else {
            serde_json::from_value(task.params.as_ref().clone())
                .map_err(|e| StepError::Create(format!("invalid {} parameters: {}", task.kind, e)))?
        };
        params.validate(task.kind)?;
        Ok(params)
    }

    fn validate(&self, kind: SearchKind) -> Result<(), StepError> {
        let invalid = |msg: String| -> Result<(), StepError> { Err(StepError::Create(msg)) };

        if self.prefix_bits > 64 {
            return invalid(format!("prefix_bits {} exceeds 64", self.prefix_bits));
        }
        if self.advances == 0 {
            return invalid("advances must be at least 1".into());
        }
        if let Some(nature) = self.nature
            && u64::from(nature) >= NATURES
        {
            return invalid(format!("nature {} out of range", nature));
        }
        for stat in 0..6 {
            if self.min_ivs[stat] > self.max_ivs[stat] || self.max_ivs[stat] > MAX_IV {
                return invalid(format!(
                    "IV bounds {}..={} invalid for stat {}",
                    self.min_ivs[stat], self.max_ivs[stat], stat
                ));
            }
        }
        if let Some((parent, stat)) = (0..2)
            .flat_map(|parent| (0..6).map(move |stat| (parent, stat)))
            .find(|&(parent, stat)| self.parent_ivs[parent][stat] > MAX_IV)
        {
            return invalid(format!(
                "parent {} IV {} exceeds {} for stat {}",
                parent + 1,
                self.parent_ivs[parent][stat],
                MAX_IV,
                stat
            ));
        }
        if kind == SearchKind::Pattern
            && (self.pattern.is_empty()
                || self.pattern.len() > MAX_PATTERN_LEN
                || !self.pattern.chars().all(|c| c == 'L' || c == 'R'))
        {
            return invalid(format!(
                "pattern '{}' must be 1-{} characters of L and R",
                self.pattern, MAX_PATTERN_LEN
            ));
        }
        if kind == SearchKind::TrainerInfo
            && self.target_trainer_id.is_none()
            && self.target_secret_id.is_none()
            && self.shiny_pid.is_none()
        {
            return invalid(
                "trainer-info search needs target_trainer_id, target_secret_id or shiny_pid".into(),
            );
        }
        Ok(())
    }

    fn seed_matches(&self, seed: u64) -> bool {
        match self.prefix_bits {
            0 => true,
            bits => seed >> (64 - bits) == self.seed_prefix,
        }
    }

    fn ivs_match(&self, ivs: &[u8; 6]) -> bool {
        ivs.iter()
            .zip(self.min_ivs.iter().zip(self.max_ivs.iter()))
            .all(|(iv, (lo, hi))| lo <= iv && iv <= hi)
    }
}

/// Searcher walking one task's sub-range with the reference unit
pub struct ReferenceSearcher {
    kind: SearchKind,
    range: TargetRange,
    sub_range: SubRange,
    params: ReferenceParams,
    processed: u64,
}

impl ReferenceSearcher {
    pub fn new(task: &Task, params: ReferenceParams) -> Self {
        Self {
            kind: task.kind,
            range: task.range,
            sub_range: task.sub_range,
            params,
            processed: 0,
        }
    }

    fn evaluate(&self, instant: u64, combination: u64, out: &mut Vec<ResultItem>) {
        let seed = boot_seed(instant, combination);

        if self.kind == SearchKind::BootSeed {
            if self.params.seed_matches(seed) {
                out.push(ResultItem::SeedMatch(SeedMatch {
                    instant,
                    combination,
                    initial_seed: seed,
                }));
            }
            return;
        }

        let mut base = Lcg(seed);
        for advance in 0..self.params.advances {
            let rng = base;
            let item = match self.kind {
                SearchKind::Individual => self.individual(seed, advance, rng).map(ResultItem::Individual),
                SearchKind::Egg => self.egg(seed, advance, rng).map(ResultItem::Egg),
                SearchKind::Pattern => self.pattern(seed, advance, rng).map(ResultItem::PatternMatch),
                SearchKind::TrainerInfo => self.trainer(seed, advance, rng).map(ResultItem::TrainerInfo),
                SearchKind::BootSeed => None,
            };
            out.extend(item);
            base.next();
        }
    }

    fn draw_core(&self, rng: &mut Lcg) -> (u32, u8, [u8; 6]) {
        let pid = rng.next_u32();
        let nature = rng.next_below(NATURES) as u8;
        let mut ivs = [0u8; 6];
        for iv in &mut ivs {
            *iv = rng.next_bits(5) as u8;
        }
        (pid, nature, ivs)
    }

    fn core_matches(&self, pid: u32, nature: u8, ivs: &[u8; 6]) -> Option<bool> {
        let shiny = is_shiny(pid, self.params.trainer_id, self.params.secret_id);
        let wanted = self.params.nature.is_none_or(|n| n == nature)
            && (!self.params.shiny_only || shiny)
            && self.params.ivs_match(ivs);
        wanted.then_some(shiny)
    }

    fn individual(&self, seed: u64, advance: u32, mut rng: Lcg) -> Option<Individual> {
        let (pid, nature, ivs) = self.draw_core(&mut rng);
        let shiny = self.core_matches(pid, nature, &ivs)?;
        Some(Individual {
            initial_seed: seed,
            advance,
            pid,
            nature,
            ivs,
            shiny,
        })
    }

    fn egg(&self, seed: u64, advance: u32, mut rng: Lcg) -> Option<Egg> {
        let (pid, nature, mut ivs) = self.draw_core(&mut rng);
        let mut inheritance = [0u8; 6];
        for _ in 0..3 {
            let stat = rng.next_below(6) as usize;
            let parent = rng.next_bits(1) as usize;
            if inheritance[stat] == 0 {
                inheritance[stat] = parent as u8 + 1;
                ivs[stat] = self.params.parent_ivs[parent][stat];
            }
        }
        let shiny = self.core_matches(pid, nature, &ivs)?;
        Some(Egg {
            initial_seed: seed,
            advance,
            pid,
            nature,
            ivs,
            inheritance,
            shiny,
        })
    }

    fn pattern(&self, seed: u64, advance: u32, mut rng: Lcg) -> Option<PatternMatch> {
        let matches = self.params.pattern.chars().all(|expected| {
            let drawn = if rng.next_bits(1) == 0 { 'L' } else { 'R' };
            drawn == expected
        });
        matches.then(|| PatternMatch {
            initial_seed: seed,
            advance,
            pattern: self.params.pattern.clone(),
        })
    }

    fn trainer(&self, seed: u64, advance: u32, mut rng: Lcg) -> Option<TrainerInfo> {
        let value = rng.next_u32();
        let trainer_id = value as u16;
        let secret_id = (value >> 16) as u16;

        let wanted = self.params.target_trainer_id.is_none_or(|t| t == trainer_id)
            && self.params.target_secret_id.is_none_or(|s| s == secret_id)
            && self
                .params
                .shiny_pid
                .is_none_or(|pid| is_shiny(pid, trainer_id, secret_id));
        wanted.then_some(TrainerInfo {
            initial_seed: seed,
            advance,
            trainer_id,
            secret_id,
        })
    }
}

impl Searcher for ReferenceSearcher {
    fn step(&mut self, max_units: u64, _token: &CancellationToken) -> Result<Batch, StepError> {
        let target = self.sub_range.len;
        let end = self.processed.saturating_add(max_units).min(target);

        let mut results = Vec::new();
        for i in self.processed..end {
            let (instant, combination) = self.range.locate(self.sub_range.offset + i);
            self.evaluate(instant, combination, &mut results);
        }
        self.processed = end;

        Ok(Batch::new(results, end, end == target))
    }
}

/// Factory producing [`ReferenceSearcher`]s. The accelerator backend runs
/// the same unit with a larger step size.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceFactory;

impl SearcherFactory for ReferenceFactory {
    fn create(&self, task: &Task, backend: Backend) -> Result<Box<dyn Searcher>, StepError> {
        let params = ReferenceParams::from_task(task)?;
        debug!(task = %task.id, kind = %task.kind, %backend, "Creating reference searcher");
        Ok(Box::new(ReferenceSearcher::new(task, params)))
    }
}
