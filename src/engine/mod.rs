//! Evolutionary search engine
//!
//! The engine is an explicit state machine:
//!
//! ```text
//! Empty -> Initialize -> Evaluate -> ArchiveUpdate -> TerminateCheck -> Select -> Vary -> Evaluate -> ...
//!                                                          |
//!                                                          v
//!                                                         Done
//! ```
//!
//! Evaluation fans a generation out over the worker pool. The archive is only
//! written in `ArchiveUpdate`, after the whole batch has returned; a batch cut
//! short by the session deadline is discarded and the archive keeps the state
//! of the last committed generation.

pub mod operators;
pub mod selection;
pub mod statistics;
pub mod stopping;

pub use self::selection::{SelectionKey, Selector};
pub use self::statistics::SearchStatistics;
pub use self::stopping::{StoppingConditions, TerminationReason};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use self::operators::MutationSettings;
use crate::archive::Archive;
use crate::assertion::{AssertionGenerator, SimpleAssertionGenerator};
use crate::config::{ConfigError, SessionConfig};
use crate::execution::{Deadline, ExecutionResult, IsolationError, Sandbox, WorkerPool};
use crate::fitness::{FitnessEvaluator, FitnessVector};
use crate::result::{FailureLog, GeneratedTest, GenerationResult};
use crate::subject::{CallableId, Isolation, Subject, TargetId};
use crate::testcase::{FactorySettings, TestCase, TestFactory};
use crate::value::ValuePool;

/// Seed tests run twice by the isolation probe
const PROBE_TESTS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Fatal: {0}")]
    Fatal(String),

    #[error("Isolation failure: {0}")]
    Isolation(#[from] IsolationError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Empty,
    Initialize,
    Evaluate,
    ArchiveUpdate,
    TerminateCheck,
    Select,
    Vary,
    Done,
}

#[derive(Debug, Clone)]
struct Individual {
    test: TestCase,
    fitness: FitnessVector,
}

pub struct SearchEngine {
    config: SessionConfig,
    subject: Arc<dyn Subject>,
    factory: TestFactory,
    evaluator: FitnessEvaluator,
    selector: Selector,
    mutation: MutationSettings,
    workers: WorkerPool,
    assertions: Box<dyn AssertionGenerator>,
    stopping: StoppingConditions,
    rng: ChaCha8Rng,

    phase: Phase,
    generation: u64,
    population: Vec<Individual>,
    candidates: Vec<TestCase>,
    scored: Vec<(Individual, ExecutionResult)>,
    parents: Vec<(usize, usize)>,
    archive: Archive,
    failures: FailureLog,
    statistics: SearchStatistics,
    termination: Option<TerminationReason>,
    owners: BTreeMap<CallableId, Vec<TargetId>>,
    /// Execution of each covering test in the archive, by fingerprint
    archived_runs: BTreeMap<String, ExecutionResult>,
}

impl SearchEngine {
    /// Validate the configuration and the subject, and set up the session
    pub fn new(subject: Arc<dyn Subject>, config: SessionConfig) -> SessionResult<Self> {
        config.validate()?;
        if subject.targets().is_empty() {
            return Err(SessionError::Fatal(format!("subject {} has no coverage targets", subject.name())));
        }
        if subject.cluster().is_empty() {
            return Err(SessionError::Fatal(format!("subject {} has no accessible callables", subject.name())));
        }

        let sandbox = Arc::new(Sandbox::new(Arc::clone(&subject), config.execution_timeout()));
        sandbox.check_isolation()?;

        let workers = if subject.isolation() == Isolation::ResetHook && config.workers > 1 {
            log::info!("Subject {} resets shared state, evaluating serially", subject.name());
            1
        } else {
            config.workers
        };
        let workers = WorkerPool::new(workers, sandbox).map_err(|e| SessionError::Fatal(e.to_string()))?;

        let mut pool = ValuePool::from_config(&config);
        pool.seed_constants(&subject.constants());
        let factory = TestFactory::new(subject.cluster().clone(), pool, FactorySettings::from(&config));

        Ok(Self {
            evaluator: FitnessEvaluator::new(config.fitness.clone()),
            selector: Selector {
                strategy: config.selection,
                tournament_size: config.tournament_size,
                rank_bias: config.rank_bias,
            },
            mutation: MutationSettings::from(&config),
            stopping: StoppingConditions {
                max_iterations: config.max_iterations,
                deadline: Deadline::new(config.search_time_budget()),
            },
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            assertions: Box::new(SimpleAssertionGenerator),
            failures: FailureLog::new(config.max_failures_recorded),
            owners: subject.targets().by_owner(),
            factory,
            workers,
            subject,
            config,
            phase: Phase::Empty,
            generation: 0,
            population: Vec::new(),
            candidates: Vec::new(),
            scored: Vec::new(),
            parents: Vec::new(),
            archive: Archive::new(),
            statistics: SearchStatistics::default(),
            termination: None,
            archived_runs: BTreeMap::new(),
        })
    }

    pub fn with_assertion_generator(mut self, generator: Box<dyn AssertionGenerator>) -> Self {
        self.assertions = generator;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    pub fn statistics(&self) -> &SearchStatistics {
        &self.statistics
    }

    /// Run the search to completion
    pub fn run(mut self) -> SessionResult<GenerationResult> {
        self.stopping.deadline = Deadline::new(self.config.search_time_budget());
        log::info!(
            "Starting search on {}: {} targets, {} callables",
            self.subject.name(),
            self.subject.targets().len(),
            self.subject.cluster().len()
        );
        self.phase = Phase::Initialize;
        while self.phase != Phase::Done {
            self.step()?;
        }
        Ok(self.finish())
    }

    /// Advance the state machine by one phase
    pub fn step(&mut self) -> SessionResult<()> {
        self.phase = match self.phase {
            Phase::Empty => Phase::Initialize,
            Phase::Initialize => self.initialize()?,
            Phase::Evaluate => self.evaluate()?,
            Phase::ArchiveUpdate => self.update_archive(),
            Phase::TerminateCheck => self.check_termination(),
            Phase::Select => self.select(),
            Phase::Vary => self.vary(),
            Phase::Done => Phase::Done,
        };
        Ok(())
    }

    fn initialize(&mut self) -> SessionResult<Phase> {
        self.candidates = (0..self.config.population_size)
            .map(|_| self.factory.random_test(&mut self.rng))
            .collect();
        if self.config.isolation_probe {
            let probe = &self.candidates[..PROBE_TESTS.min(self.candidates.len())];
            self.statistics.executions += 2 * probe.len() as u64;
            self.workers.sandbox().probe(probe)?;
        }
        Ok(Phase::Evaluate)
    }

    fn evaluate(&mut self) -> SessionResult<Phase> {
        let tests = std::mem::take(&mut self.candidates);
        let batch = self.workers.evaluate(&tests, &self.stopping.deadline);
        self.statistics.executions += (tests.len() - batch.skipped()) as u64;
        self.workers.sandbox().ensure_isolated()?;
        let results = match batch.into_complete() {
            Some(results) => results,
            None => {
                log::warn!(
                    "Discarding incomplete generation {}, keeping the archive of generation {}",
                    self.generation,
                    self.generation.saturating_sub(1)
                );
                self.statistics.discarded_generations += 1;
                self.termination = Some(TerminationReason::TimeBudget);
                return Ok(Phase::Done);
            }
        };
        let targets = self.subject.targets();
        self.scored = tests
            .into_iter()
            .zip(results)
            .map(|(mut test, result)| {
                if result.is_timeout() {
                    self.statistics.timeouts += 1;
                } else if result.is_crash() {
                    self.statistics.crashes += 1;
                }
                let fitness = self.evaluator.assign(&mut test, targets, &result);
                (Individual { test, fitness }, result)
            })
            .collect();
        Ok(Phase::ArchiveUpdate)
    }

    fn update_archive(&mut self) -> Phase {
        let improved = self
            .archive
            .commit(self.scored.iter().map(|(i, _)| (&i.test, &i.fitness)), self.generation);
        self.statistics.archive_improvements += improved as u64;
        if improved > 0 {
            self.record_archived_runs();
        }

        for (individual, result) in &self.scored {
            if let Some((position, failure)) = result.failure() {
                let callable = individual
                    .test
                    .statement(position)
                    .and_then(|s| s.callable())
                    .and_then(|id| self.subject.cluster().callable(id))
                    .map(|c| c.qualified_name())
                    .unwrap_or_else(|| format!("statement {}", position));
                self.failures.record(&callable, &failure.to_string(), &individual.test);
            }
        }

        let offspring: Vec<Individual> = std::mem::take(&mut self.scored).into_iter().map(|(i, _)| i).collect();
        if self.population.is_empty() {
            self.population = offspring;
        } else {
            let keys = self.keys(&self.population);
            let elites: Vec<Individual> = selection::ranking(&keys)
                .into_iter()
                .take(self.config.elitism)
                .map(|i| self.population[i].clone())
                .collect();
            self.population = elites;
            self.population.extend(offspring);
        }

        let covered = self.archive.covered();
        let dormant: BTreeSet<CallableId> = self
            .owners
            .iter()
            .filter(|(_, targets)| targets.iter().all(|t| covered.contains(t)))
            .map(|(callable, _)| *callable)
            .collect();
        self.factory.set_dormant(dormant);

        let coverage = self.archive.coverage(self.subject.targets());
        self.generation += 1;
        self.statistics.generations = self.generation;
        self.statistics.synthesis_failures += self.factory.take_failures() as u64;
        self.statistics.coverage_history.push(coverage);
        log::info!(
            "Generation {}: coverage {:.1}%, {} archive improvements",
            self.generation,
            coverage * 100.0,
            improved
        );
        Phase::TerminateCheck
    }

    fn record_archived_runs(&mut self) {
        let live: BTreeSet<String> = self
            .archive
            .iter()
            .filter(|entry| entry.is_covered())
            .map(|entry| entry.test.fingerprint())
            .collect();
        self.archived_runs.retain(|fingerprint, _| live.contains(fingerprint));
        for (individual, result) in &self.scored {
            let fingerprint = individual.test.fingerprint();
            if live.contains(&fingerprint) {
                self.archived_runs.entry(fingerprint).or_insert_with(|| result.clone());
            }
        }
    }

    fn check_termination(&mut self) -> Phase {
        let outstanding = self.archive.outstanding(self.subject.targets()).len();
        // the initial population does not count as an iteration
        let iterations = self.generation.saturating_sub(1);
        match self.stopping.check(iterations, outstanding) {
            Some(reason) => {
                log::info!("Stopping after generation {}: {:?}", self.generation, reason);
                self.termination = Some(reason);
                Phase::Done
            }
            None => Phase::Select,
        }
    }

    fn keys(&self, individuals: &[Individual]) -> Vec<SelectionKey> {
        let outstanding = self.archive.outstanding(self.subject.targets());
        let vectors: Vec<&FitnessVector> = individuals.iter().map(|i| &i.fitness).collect();
        self.evaluator
            .selection_keys(&vectors, &outstanding)
            .into_iter()
            .zip(individuals)
            .map(|(fitness, individual)| SelectionKey {
                fitness,
                length: individual.test.len(),
            })
            .collect()
    }

    fn offspring_count(&self) -> usize {
        self.config.population_size - self.config.elitism.min(self.config.population_size)
    }

    fn select(&mut self) -> Phase {
        let keys = self.keys(&self.population);
        let pairs = (self.offspring_count() + 1) / 2;
        self.parents = (0..pairs)
            .map(|_| {
                let a = self.selector.select(&keys, &mut self.rng);
                let b = self.selector.select(&keys, &mut self.rng);
                (a, b)
            })
            .collect();
        Phase::Vary
    }

    fn vary(&mut self) -> Phase {
        let wanted = self.offspring_count();
        let mut offspring = Vec::with_capacity(wanted + 1);
        for (a, b) in std::mem::take(&mut self.parents) {
            let (first, second) = (&self.population[a].test, &self.population[b].test);
            let (mut x, mut y) = if self.rng.gen_bool(self.config.crossover_rate) {
                operators::crossover(first, second, &mut self.rng)
            } else {
                (first.clone(), second.clone())
            };
            for child in [&mut x, &mut y] {
                if self.rng.gen_bool(self.config.mutation_rate) {
                    operators::mutate(&self.factory, child, &self.mutation, &mut self.rng);
                }
                child.truncate(self.config.max_test_length);
            }
            offspring.push(x);
            offspring.push(y);
        }
        offspring.truncate(wanted);
        self.candidates = offspring;
        Phase::Evaluate
    }

    fn finish(mut self) -> GenerationResult {
        self.statistics.elapsed_ms = self.stopping.deadline.elapsed().as_millis() as u64;
        let targets = self.subject.targets();
        let covered_targets = self.archive.covered_count();
        let total_targets = targets.len();

        let mut seen = BTreeSet::new();
        let mut tests = Vec::new();
        for entry in self.archive.snapshot().into_iter().filter(|e| e.is_covered()) {
            let fingerprint = entry.test.fingerprint();
            if !seen.insert(fingerprint.clone()) {
                continue;
            }
            let assertions = match self.archived_runs.remove(&fingerprint) {
                Some(result) => self.assertions.generate(&entry.test, &result),
                None if !self.stopping.deadline.expired() => {
                    let result = self.workers.sandbox().run(&entry.test);
                    self.assertions.generate(&entry.test, &result)
                }
                None => {
                    log::warn!("No recorded run for archived test {}, emitting it without assertions", fingerprint);
                    Vec::new()
                }
            };
            tests.push(GeneratedTest {
                fingerprint,
                assertions,
                test: entry.test,
            });
        }

        let termination = self.termination.unwrap_or(TerminationReason::TimeBudget);
        log::info!(
            "Search on {} finished ({:?}): {}/{} targets covered, {} distinct tests",
            self.subject.name(),
            termination,
            covered_targets,
            total_targets,
            tests.len()
        );
        GenerationResult {
            subject: self.subject.name().to_string(),
            archive: self.archive.snapshot(),
            covered_targets,
            total_targets,
            coverage: 100.0 * self.archive.coverage(targets),
            statistics: self.statistics,
            termination,
            failures: self.failures.into_findings(),
            tests,
        }
    }
}
