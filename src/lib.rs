//! # searchgen
//!
//! A search-based unit test generation engine.
//!
//! Candidate test cases are evolved against a [`Subject`]: each generation is
//! executed in a sandbox with coverage instrumentation, scored per coverage
//! target, and folded into an archive holding the best test found for every
//! target. Values for arguments come from a seeded pool of primitives with a
//! pluggable strategy seam, which also hosts the structured table and tensor
//! generators.
//!
//! ```no_run
//! use std::sync::Arc;
//! use searchgen::{generate, SessionConfig, Subject};
//!
//! fn search(subject: Arc<dyn Subject>) {
//!     let result = generate(subject, SessionConfig::default().with_seed(42)).unwrap();
//!     println!("{:.1}% of targets covered", result.coverage);
//! }
//! ```

pub mod archive;
pub mod assertion;
pub mod config;
pub mod engine;
pub mod execution;
pub mod fitness;
pub mod result;
pub mod structured;
pub mod subject;
pub mod testcase;
pub mod types;
pub mod value;

pub use archive::{Archive, ArchiveEntry};
pub use assertion::{Assertion, AssertionGenerator, SimpleAssertionGenerator};
pub use config::{ConfigError, SelectionStrategy, SessionConfig, SizeBounds};
pub use engine::{Phase, SearchEngine, SearchStatistics, SessionError, SessionResult, TerminationReason};
pub use execution::{ExecutionResult, IsolationError, Sandbox, StatementOutcome, Termination, WorkerPool};
pub use fitness::{Aggregation, FitnessEvaluator, FitnessPolicy, FitnessVector};
pub use result::{FailureFinding, GeneratedTest, GenerationResult};
pub use structured::{ElementType, Table, Tensor};
pub use subject::{
    Callable, CallableId, ExecutionTrace, ExecutionTracer, Invocation, Isolation, Parameter, PredicateId, Subject,
    SubjectFailure, TargetId, TargetSet, TargetSetBuilder, TestCluster,
};
pub use testcase::{Statement, StatementKind, TestCase, TestFactory, VarRef};
pub use types::TypeDescriptor;
pub use value::{Object, SynthesisError, Value, ValuePool, ValueStrategy};

use std::sync::Arc;

/// Run a complete search session against `subject`
pub fn generate(subject: Arc<dyn Subject>, config: SessionConfig) -> SessionResult<GenerationResult> {
    SearchEngine::new(subject, config)?.run()
}
