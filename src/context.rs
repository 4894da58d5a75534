//! Per-invocation state shared by providers and the patch engine.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::path::PathBuf;

/// The directive that first registered a metric name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricClaim {
    pub kind: &'static str,
    pub path: PathBuf,
    pub line: usize,
}

/// Run-scoped token and randomness.
///
/// The token tags every generated region of one invocation. Randomness
/// feeds default metric names and collision renames; tests seed it to get
/// reproducible output.
#[derive(Debug)]
pub struct RunContext {
    token: String,
    rng: StdRng,
    renames: usize,
    metrics: HashMap<String, MetricClaim>,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            token: uuid::Uuid::new_v4().to_string(),
            rng: StdRng::from_entropy(),
            renames: 0,
            metrics: HashMap::new(),
        }
    }

    /// Deterministic context for tests and reproducible runs.
    pub fn with_seed(token: impl Into<String>, seed: u64) -> Self {
        Self {
            token: token.into(),
            rng: StdRng::seed_from_u64(seed),
            renames: 0,
            metrics: HashMap::new(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// `count` random decimal digits.
    pub fn random_digits(&mut self, count: usize) -> String {
        (0..count)
            .map(|_| char::from(b'0' + self.rng.gen_range(0..10u8)))
            .collect()
    }

    /// Number appended to an alias that collides with an existing import.
    pub fn rename_suffix(&mut self) -> u32 {
        self.renames += 1;
        self.rng.gen_range(0..10_000)
    }

    /// How many collision renames happened so far.
    pub fn renames(&self) -> usize {
        self.renames
    }

    /// Record `claim` for metric `name`. Returns the earlier claim and
    /// keeps it when the name is already taken.
    pub fn claim_metric(&mut self, name: &str, claim: MetricClaim) -> Option<MetricClaim> {
        match self.metrics.get(name) {
            Some(first) => Some(first.clone()),
            None => {
                self.metrics.insert(name.to_string(), claim);
                None
            }
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}
