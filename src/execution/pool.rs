//! Bounded worker pool evaluating a generation's batch of test cases

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{ExecutionResult, Sandbox};
use crate::testcase::TestCase;

/// Session-wide wall-clock limit
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    budget: Option<Duration>,
}

impl Deadline {
    pub fn new(budget: Option<Duration>) -> Self {
        Self {
            start: Instant::now(),
            budget,
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None)
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.budget.map(|b| b.saturating_sub(self.start.elapsed()))
    }

    pub fn expired(&self) -> bool {
        self.remaining().map_or(false, |r| r.is_zero())
    }
}

/// Results of one batch, in submission order. `None` marks a run skipped
/// because the deadline had passed.
#[derive(Debug)]
pub struct Batch {
    pub results: Vec<Option<ExecutionResult>>,
}

impl Batch {
    pub fn is_complete(&self) -> bool {
        self.results.iter().all(Option::is_some)
    }

    pub fn skipped(&self) -> usize {
        self.results.iter().filter(|r| r.is_none()).count()
    }

    /// All results, or `None` if any run was skipped
    pub fn into_complete(self) -> Option<Vec<ExecutionResult>> {
        self.results.into_iter().collect()
    }
}

#[derive(Debug)]
pub struct WorkerPool {
    pool: ThreadPool,
    sandbox: Arc<Sandbox>,
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize, sandbox: Arc<Sandbox>) -> Result<Self, ThreadPoolBuildError> {
        let workers = workers.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("searchgen-worker-{}", i))
            .build()?;
        Ok(Self { pool, sandbox, workers })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    /// Run every test once. A worker checks the deadline before starting
    /// each run and skips it once the deadline has passed.
    pub fn evaluate(&self, tests: &[TestCase], deadline: &Deadline) -> Batch {
        let sandbox = &self.sandbox;
        let results = self.pool.install(|| {
            tests
                .par_iter()
                .map(|test| if deadline.expired() { None } else { Some(sandbox.run(test)) })
                .collect()
        });
        let batch = Batch { results };
        if !batch.is_complete() {
            log::warn!("Deadline passed mid-batch, {} of {} runs skipped", batch.skipped(), tests.len());
        }
        batch
    }
}
