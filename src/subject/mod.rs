//! The code under test, as seen by the generator
//!
//! A [`Subject`] enumerates its coverage targets and accessible callables up
//! front and executes invocations on request, reporting coverage through the
//! tracer it is handed. The generator never inspects the subject beyond this
//! trait.

pub mod cluster;
pub mod targets;
pub mod tracer;

pub use self::cluster::{Callable, CallableId, CallableKind, Parameter, TestCluster};
pub use self::targets::{
    BranchTargets, CoverageTarget, Location, PredicateId, TargetId, TargetKind, TargetSet, TargetSetBuilder,
};
pub use self::tracer::{ExecutionTrace, ExecutionTracer};

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Failure raised by the subject while executing a statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct SubjectFailure {
    pub kind: String,
    pub message: String,
}

impl SubjectFailure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn panic(message: impl Into<String>) -> Self {
        Self::new("panic", message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }
}

/// How a subject keeps one execution from observing state left by another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Isolation {
    /// No state survives an invocation
    Stateless,
    /// Global state exists; `Subject::reset` restores it
    ResetHook,
    /// Global state exists and cannot be restored in-process
    Unresettable,
}

/// One call with materialized arguments
#[derive(Debug)]
pub struct Invocation<'a> {
    pub callable: &'a Callable,
    /// Receiver for method calls
    pub receiver: Option<&'a mut Value>,
    pub args: &'a [Value],
}

impl<'a> Invocation<'a> {
    pub fn arg(&self, index: usize) -> Result<&'a Value, SubjectFailure> {
        self.args.get(index).ok_or_else(|| {
            SubjectFailure::type_error(format!(
                "{} expects at least {} arguments, got {}",
                self.callable.qualified_name(),
                index + 1,
                self.args.len()
            ))
        })
    }
}

pub trait Subject: Send + Sync {
    fn name(&self) -> &str;

    /// Full target set, fixed for the session
    fn targets(&self) -> &TargetSet;

    fn cluster(&self) -> &TestCluster;

    fn invoke(&self, invocation: Invocation<'_>, tracer: &ExecutionTracer) -> Result<Value, SubjectFailure>;

    /// Literals found in the subject, used to seed the constant pool
    fn constants(&self) -> Vec<Value> {
        Vec::new()
    }

    fn isolation(&self) -> Isolation {
        Isolation::Stateless
    }

    /// Restore global state before an execution
    fn reset(&self) {}
}
