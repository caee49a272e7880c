use serde::{Deserialize, Serialize};

/// Counters collected over a search session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchStatistics {
    /// Committed generations, the initial population included
    pub generations: u64,
    pub executions: u64,
    pub timeouts: u64,
    pub crashes: u64,
    pub synthesis_failures: u64,
    pub discarded_generations: u64,
    pub archive_improvements: u64,
    pub elapsed_ms: u64,
    /// Coverage after each committed generation
    pub coverage_history: Vec<f64>,
}

impl SearchStatistics {
    pub fn mean_executions_per_generation(&self) -> f64 {
        if self.generations == 0 {
            0.0
        } else {
            self.executions as f64 / self.generations as f64
        }
    }
}
