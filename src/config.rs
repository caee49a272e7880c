//! Session configuration
//!
//! A [`SessionConfig`] is fixed for the duration of a generation session. It is
//! normally produced by an external configuration loader; the JSON helpers here
//! exist for embedders and tests.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::fitness::FitnessPolicy;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Inclusive size range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeBounds {
    pub min: usize,
    pub max: usize,
}

impl SizeBounds {
    pub const fn new(min: usize, max: usize) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, n: usize) -> bool {
        n >= self.min && n <= self.max
    }
}

/// Parent selection scheme
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SelectionStrategy {
    Tournament,
    Rank,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Random seed for deterministic generation
    pub seed: u64,

    /// Number of test cases per generation
    pub population_size: usize,

    /// Parents carried unchanged into the next generation
    pub elitism: usize,

    /// Iteration (generation) budget
    pub max_iterations: Option<u64>,

    /// Wall-clock budget for the whole search, in milliseconds
    pub search_time_budget_ms: Option<u64>,

    /// Hard timeout for a single test case execution, in milliseconds
    pub execution_timeout_ms: u64,

    pub crossover_rate: f64,
    pub mutation_rate: f64,

    /// Probability of each further statement insertion during mutation
    pub statement_insertion_probability: f64,
    pub test_delete_probability: f64,
    pub test_change_probability: f64,
    pub test_insert_probability: f64,

    pub selection: SelectionStrategy,
    pub tournament_size: usize,
    /// Bias for rank selection, in [1.0, 2.0]
    pub rank_bias: f64,

    /// Hard cap on statements per test case
    pub max_test_length: usize,
    /// Statement count of seed test cases
    pub initial_test_length: SizeBounds,

    /// Recursion limit when satisfying constructor parameters
    pub max_recursion: usize,
    /// Attempts before giving up on synthesizing a statement
    pub max_attempts: usize,

    pub object_reuse_probability: f64,
    /// Probability of drawing a pooled constant instead of a random value
    pub constant_probability: f64,

    pub max_int: i64,
    pub max_string_length: usize,
    pub max_list_length: usize,
    pub max_delta: i64,

    pub table_rows: SizeBounds,
    pub table_columns: SizeBounds,
    pub tensor_max_rank: usize,
    pub tensor_dim_size: SizeBounds,

    /// Size of the evaluation worker pool
    pub workers: usize,

    pub fitness: FitnessPolicy,

    /// Run the first seed tests twice and compare traces before searching
    pub isolation_probe: bool,

    pub max_failures_recorded: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            population_size: 50,
            elitism: 1,
            max_iterations: Some(100),
            search_time_budget_ms: Some(60_000),
            execution_timeout_ms: 1_000,
            crossover_rate: 0.75,
            mutation_rate: 0.8,
            statement_insertion_probability: 0.5,
            test_delete_probability: 1.0 / 3.0,
            test_change_probability: 1.0 / 3.0,
            test_insert_probability: 1.0 / 3.0,
            selection: SelectionStrategy::Tournament,
            tournament_size: 5,
            rank_bias: 1.7,
            max_test_length: 40,
            initial_test_length: SizeBounds::new(1, 2),
            max_recursion: 10,
            max_attempts: 10,
            object_reuse_probability: 0.9,
            constant_probability: 0.25,
            max_int: 256,
            max_string_length: 20,
            max_list_length: 8,
            max_delta: 20,
            table_rows: SizeBounds::new(0, 8),
            table_columns: SizeBounds::new(1, 5),
            tensor_max_rank: 4,
            tensor_dim_size: SizeBounds::new(1, 6),
            workers: 4,
            fitness: FitnessPolicy::default(),
            isolation_probe: true,
            max_failures_recorded: 100,
        }
    }
}

impl SessionConfig {
    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        let config: SessionConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_population_size(mut self, size: usize) -> Self {
        self.population_size = size;
        self
    }

    pub fn with_max_iterations(mut self, iterations: Option<u64>) -> Self {
        self.max_iterations = iterations;
        self
    }

    pub fn with_search_time_budget(mut self, budget: Option<Duration>) -> Self {
        self.search_time_budget_ms = budget.map(|d| d.as_millis() as u64);
        self
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_fitness(mut self, fitness: FitnessPolicy) -> Self {
        self.fitness = fitness;
        self
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }

    pub fn search_time_budget(&self) -> Option<Duration> {
        self.search_time_budget_ms.map(Duration::from_millis)
    }

    /// Reject inconsistent settings before a session starts
    pub fn validate(&self) -> ConfigResult<()> {
        if self.population_size < 2 {
            return Err(invalid("population_size must be at least 2"));
        }
        if self.elitism >= self.population_size {
            return Err(invalid("elitism must be smaller than population_size"));
        }
        if self.max_iterations.is_none() && self.search_time_budget_ms.is_none() {
            return Err(invalid("either max_iterations or search_time_budget_ms must be set"));
        }
        if self.execution_timeout_ms == 0 {
            return Err(invalid("execution_timeout_ms must be positive"));
        }
        for (name, p) in [
            ("crossover_rate", self.crossover_rate),
            ("mutation_rate", self.mutation_rate),
            ("statement_insertion_probability", self.statement_insertion_probability),
            ("test_delete_probability", self.test_delete_probability),
            ("test_change_probability", self.test_change_probability),
            ("test_insert_probability", self.test_insert_probability),
            ("object_reuse_probability", self.object_reuse_probability),
            ("constant_probability", self.constant_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(invalid(&format!("{} must be within [0, 1], got {}", name, p)));
            }
        }
        if self.tournament_size == 0 {
            return Err(invalid("tournament_size must be positive"));
        }
        if !(1.0..=2.0).contains(&self.rank_bias) {
            return Err(invalid("rank_bias must be within [1, 2]"));
        }
        if self.initial_test_length.min == 0 || self.initial_test_length.min > self.initial_test_length.max {
            return Err(invalid("initial_test_length must be a non-empty range starting at 1 or more"));
        }
        if self.max_test_length < self.initial_test_length.max {
            return Err(invalid("max_test_length must cover initial_test_length"));
        }
        if self.max_int <= 0 || self.max_delta <= 0 {
            return Err(invalid("max_int and max_delta must be positive"));
        }
        if self.table_rows.min > self.table_rows.max {
            return Err(invalid("table_rows.min exceeds table_rows.max"));
        }
        if self.table_columns.min == 0 || self.table_columns.min > self.table_columns.max {
            return Err(invalid("table_columns must be a non-empty range starting at 1 or more"));
        }
        if !(1..=4).contains(&self.tensor_max_rank) {
            return Err(invalid("tensor_max_rank must be within 1..=4"));
        }
        if self.tensor_dim_size.min == 0 || self.tensor_dim_size.min > self.tensor_dim_size.max {
            return Err(invalid("tensor_dim_size must be a non-empty range starting at 1 or more"));
        }
        if self.workers == 0 {
            return Err(invalid("workers must be positive"));
        }
        self.fitness.validate().map_err(|reason| invalid(&reason))?;
        Ok(())
    }
}

fn invalid(reason: &str) -> ConfigError {
    ConfigError::Invalid(reason.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_is_valid() {
        assert!(SessionConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = SessionConfig::from_json_str(r#"{"population_size": 12, "seed": 7}"#).unwrap();
        assert_eq!(config.population_size, 12);
        assert_eq!(config.seed, 7);
        assert_eq!(config.tournament_size, SessionConfig::default().tournament_size);
    }

    #[test]
    fn test_rejects_bad_probability() {
        let err = SessionConfig::from_json_str(r#"{"crossover_rate": 1.5}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_missing_budget() {
        let config = SessionConfig::default()
            .with_max_iterations(None)
            .with_search_time_budget(None);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_rank_five_tensors() {
        let mut config = SessionConfig::default();
        config.tensor_max_rank = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"workers": 2, "execution_timeout_ms": 250}}"#).unwrap();
        let config = SessionConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.execution_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_malformed_json() {
        let err = SessionConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
