//! Execution sandbox
//!
//! Each test case runs on its own thread against the shared subject. The
//! calling thread waits with a hard timeout; a run that overstays it is
//! abandoned, its trace sealed, and a `TimedOut` result returned with whatever
//! coverage was recorded so far. Failures raised by the subject, including
//! panics, stop the run and are reported as data, never propagated.
//!
//! An abandoned thread keeps running. For subjects with state, the next run
//! waits for it to finish before resetting; one that outlives the grace
//! period marks the sandbox as no longer isolated.

pub mod pool;

pub use self::pool::{Batch, Deadline, WorkerPool};

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::subject::{ExecutionTrace, ExecutionTracer, Invocation, Isolation, Subject, SubjectFailure};
use crate::testcase::{Statement, StatementKind, TestCase, VarRef};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StatementOutcome {
    Returned(Value),
    Raised(SubjectFailure),
    NotExecuted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    Completed,
    /// A statement raised; later statements did not run
    Crashed,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub outcomes: Vec<StatementOutcome>,
    pub trace: ExecutionTrace,
    pub duration: Duration,
    pub termination: Termination,
}

impl ExecutionResult {
    pub fn is_timeout(&self) -> bool {
        self.termination == Termination::TimedOut
    }

    pub fn is_crash(&self) -> bool {
        self.termination == Termination::Crashed
    }

    /// Position and failure of the statement that raised, if any
    pub fn failure(&self) -> Option<(usize, &SubjectFailure)> {
        self.outcomes.iter().enumerate().find_map(|(i, outcome)| match outcome {
            StatementOutcome::Raised(failure) => Some((i, failure)),
            _ => None,
        })
    }

    pub fn returned(&self, position: usize) -> Option<&Value> {
        match self.outcomes.get(position) {
            Some(StatementOutcome::Returned(value)) => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IsolationError {
    #[error("Subject {0} keeps global state that cannot be reset between executions")]
    Unresettable(String),

    #[error("Subject {subject} produced different traces for two runs of seed test {test}")]
    Contamination { subject: String, test: usize },

    #[error("Subject {0} kept running long after an execution timeout")]
    Runaway(String),
}

/// Multiple of the run budget an abandoned run gets to finish
const RUNAWAY_GRACE: u32 = 10;

/// Abandoned run of a stateful subject
#[derive(Debug)]
struct Lingering {
    done: Receiver<()>,
    grace: Duration,
}

pub struct Sandbox {
    subject: Arc<dyn Subject>,
    timeout: Duration,
    lingering: Mutex<Vec<Lingering>>,
    runaway: AtomicBool,
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("subject", &self.subject.name())
            .field("timeout", &self.timeout)
            .field("runaway", &self.runaway.load(Ordering::Relaxed))
            .finish()
    }
}

impl Sandbox {
    pub fn new(subject: Arc<dyn Subject>, timeout: Duration) -> Self {
        Self {
            subject,
            timeout,
            lingering: Mutex::new(Vec::new()),
            runaway: AtomicBool::new(false),
        }
    }

    pub fn subject(&self) -> &dyn Subject {
        self.subject.as_ref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Reject subjects whose state cannot be isolated between runs
    pub fn check_isolation(&self) -> Result<(), IsolationError> {
        match self.subject.isolation() {
            Isolation::Unresettable => Err(IsolationError::Unresettable(self.subject.name().to_string())),
            Isolation::Stateless | Isolation::ResetHook => Ok(()),
        }
    }

    /// Wait for abandoned runs to finish. Errs if one outlived its grace
    /// period, after which the subject state can no longer be trusted.
    pub fn settle(&self) -> Result<(), IsolationError> {
        let lingering = std::mem::take(&mut *self.lingering.lock().unwrap_or_else(|p| p.into_inner()));
        for run in lingering {
            if let Err(RecvTimeoutError::Timeout) = run.done.recv_timeout(run.grace) {
                log::error!("Abandoned run of {} still active after {:?}", self.subject.name(), run.grace);
                self.runaway.store(true, Ordering::Relaxed);
            }
        }
        self.ensure_isolated()
    }

    pub fn ensure_isolated(&self) -> Result<(), IsolationError> {
        if self.runaway.load(Ordering::Relaxed) {
            return Err(IsolationError::Runaway(self.subject.name().to_string()));
        }
        Ok(())
    }

    /// Run every test twice and require identical traces
    pub fn probe(&self, tests: &[TestCase]) -> Result<(), IsolationError> {
        for (index, test) in tests.iter().enumerate() {
            self.settle()?;
            let first = self.run(test);
            let second = self.run(test);
            if first.is_timeout() || second.is_timeout() {
                log::debug!("Isolation probe skipping seed test {} after a timeout", index);
                continue;
            }
            if first.trace != second.trace {
                log::warn!("Isolation probe saw diverging traces for seed test {}", index);
                return Err(IsolationError::Contamination {
                    subject: self.subject.name().to_string(),
                    test: index,
                });
            }
        }
        Ok(())
    }

    pub fn run(&self, test: &TestCase) -> ExecutionResult {
        self.run_with_budget(test, self.timeout)
    }

    pub fn run_with_budget(&self, test: &TestCase, budget: Duration) -> ExecutionResult {
        let stateful = self.subject.isolation() != Isolation::Stateless;
        if stateful {
            // recorded by the flag; callers check `ensure_isolated`
            let _ = self.settle();
        }
        let start = Instant::now();
        self.subject.reset();

        let tracer = ExecutionTracer::new();
        let outcomes: Arc<Mutex<Vec<StatementOutcome>>> = Arc::new(Mutex::new(Vec::with_capacity(test.len())));
        let (done_tx, done_rx) = mpsc::channel();

        let subject = Arc::clone(&self.subject);
        let statements = test.statements().to_vec();
        let thread_tracer = tracer.clone();
        let thread_outcomes = Arc::clone(&outcomes);
        let spawned = thread::Builder::new()
            .name(format!("sandbox-{}", self.subject.name()))
            .spawn(move || {
                execute(subject.as_ref(), &statements, &thread_tracer, &thread_outcomes);
                let _ = done_tx.send(());
            });
        if let Err(err) = spawned {
            log::warn!("Could not start sandbox thread: {}", err);
            let mut outcomes = vec![StatementOutcome::NotExecuted; test.len()];
            if let Some(first) = outcomes.first_mut() {
                *first = StatementOutcome::Raised(SubjectFailure::new("SandboxError", err.to_string()));
            }
            return ExecutionResult {
                outcomes,
                trace: tracer.seal(),
                duration: start.elapsed(),
                termination: Termination::Crashed,
            };
        }

        let termination = match done_rx.recv_timeout(budget) {
            Ok(()) => Termination::Completed,
            Err(RecvTimeoutError::Timeout) => {
                log::warn!("Execution exceeded {:?}, abandoning run", budget);
                Termination::TimedOut
            }
            Err(RecvTimeoutError::Disconnected) => Termination::Crashed,
        };
        if stateful && termination == Termination::TimedOut {
            self.lingering
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .push(Lingering {
                    done: done_rx,
                    grace: budget * RUNAWAY_GRACE,
                });
        }
        let trace = tracer.seal();
        let mut outcomes = outcomes.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone();
        let termination = match termination {
            Termination::Completed if outcomes.iter().any(|o| matches!(o, StatementOutcome::Raised(_))) => {
                Termination::Crashed
            }
            Termination::Crashed if outcomes.len() < test.len() => {
                outcomes.push(StatementOutcome::Raised(SubjectFailure::panic("sandbox thread died")));
                Termination::Crashed
            }
            other => other,
        };
        outcomes.resize(test.len(), StatementOutcome::NotExecuted);
        ExecutionResult {
            outcomes,
            trace,
            duration: start.elapsed(),
            termination,
        }
    }
}

fn execute(
    subject: &dyn Subject,
    statements: &[Statement],
    tracer: &ExecutionTracer,
    outcomes: &Mutex<Vec<StatementOutcome>>,
) {
    let mut values: Vec<Value> = Vec::with_capacity(statements.len());
    for statement in statements {
        let outcome = match evaluate(subject, statement, &mut values, tracer) {
            Ok(value) => {
                values.push(value.clone());
                StatementOutcome::Returned(value)
            }
            Err(failure) => StatementOutcome::Raised(failure),
        };
        let raised = matches!(outcome, StatementOutcome::Raised(_));
        outcomes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(outcome);
        if raised {
            return;
        }
    }
}

fn fetch(values: &[Value], var: VarRef) -> Result<Value, SubjectFailure> {
    values
        .get(var.0)
        .cloned()
        .ok_or_else(|| SubjectFailure::type_error(format!("unresolved reference {}", var)))
}

fn fetch_all(values: &[Value], vars: &[VarRef]) -> Result<Vec<Value>, SubjectFailure> {
    vars.iter().map(|v| fetch(values, *v)).collect()
}

fn evaluate(
    subject: &dyn Subject,
    statement: &Statement,
    values: &mut [Value],
    tracer: &ExecutionTracer,
) -> Result<Value, SubjectFailure> {
    match &statement.kind {
        StatementKind::Primitive(value) => Ok(value.clone()),
        StatementKind::Enum { type_name, variant } => Ok(Value::Enum {
            type_name: type_name.clone(),
            variant: variant.clone(),
        }),
        StatementKind::Tensor(tensor) => Ok(Value::Tensor(tensor.clone())),
        StatementKind::Table(table) => Ok(Value::Table(table.clone())),
        StatementKind::Collection { items, .. } => Ok(Value::List(fetch_all(values, items)?)),
        StatementKind::Constructor { callable, args } | StatementKind::Function { callable, args } => {
            let args = fetch_all(values, args)?;
            invoke(subject, *callable, None, &args, tracer)
        }
        StatementKind::Method { callable, receiver, args } => {
            let args = fetch_all(values, args)?;
            let receiver = values
                .get_mut(receiver.0)
                .ok_or_else(|| SubjectFailure::type_error(format!("unresolved receiver {}", receiver)))?;
            invoke(subject, *callable, Some(receiver), &args, tracer)
        }
        StatementKind::FieldAssign { receiver, field, value } => {
            let value = fetch(values, *value)?;
            let object = values
                .get_mut(receiver.0)
                .and_then(Value::as_object_mut)
                .ok_or_else(|| SubjectFailure::type_error(format!("{} has no field {}", receiver, field)))?;
            object.set_field(field.clone(), value);
            Ok(Value::None)
        }
    }
}

fn invoke(
    subject: &dyn Subject,
    callable: crate::subject::CallableId,
    receiver: Option<&mut Value>,
    args: &[Value],
    tracer: &ExecutionTracer,
) -> Result<Value, SubjectFailure> {
    let callable = subject
        .cluster()
        .callable(callable)
        .ok_or_else(|| SubjectFailure::type_error(format!("unknown {}", callable)))?;
    let invocation = Invocation {
        callable,
        receiver,
        args,
    };
    match panic::catch_unwind(AssertUnwindSafe(|| subject.invoke(invocation, tracer))) {
        Ok(result) => result,
        Err(payload) => Err(SubjectFailure::panic(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subject::{CallableId, Parameter, PredicateId, TargetSet, TargetSetBuilder, TestCluster};
    use crate::types::TypeDescriptor;

    struct Divider {
        cluster: TestCluster,
        targets: TargetSet,
    }

    impl Divider {
        fn new() -> Self {
            let mut cluster = TestCluster::new();
            let id = cluster.add_function(
                "divide",
                vec![Parameter::new("a", TypeDescriptor::Int), Parameter::new("b", TypeDescriptor::Int)],
                TypeDescriptor::Int,
            );
            let mut builder = TargetSetBuilder::new("divider");
            let entry = builder.entry(id, 1);
            builder.branch(2, Some(entry));
            Self {
                cluster,
                targets: builder.build(),
            }
        }
    }

    impl Subject for Divider {
        fn name(&self) -> &str {
            "divider"
        }

        fn targets(&self) -> &TargetSet {
            &self.targets
        }

        fn cluster(&self) -> &TestCluster {
            &self.cluster
        }

        fn invoke(&self, invocation: Invocation<'_>, tracer: &ExecutionTracer) -> Result<Value, SubjectFailure> {
            tracer.enter(crate::subject::TargetId(0));
            let a = invocation.arg(0)?.as_int().unwrap_or(0);
            let b = invocation.arg(1)?.as_int().unwrap_or(0);
            if tracer.eq(PredicateId(0), b as f64, 0.0) {
                panic!("division by zero");
            }
            if b < 0 {
                return Err(SubjectFailure::new("ValueError", "negative divisor"));
            }
            Ok(Value::Int(a / b))
        }
    }

    fn divide(a: i64, b: i64) -> TestCase {
        let mut test = TestCase::new();
        test.push(Statement::new(StatementKind::Primitive(Value::Int(a)), TypeDescriptor::Int));
        test.push(Statement::new(StatementKind::Primitive(Value::Int(b)), TypeDescriptor::Int));
        test.push(Statement::new(
            StatementKind::Function {
                callable: CallableId(0),
                args: vec![VarRef(0), VarRef(1)],
            },
            TypeDescriptor::Int,
        ));
        test.push(Statement::new(StatementKind::Primitive(Value::Bool(true)), TypeDescriptor::Bool));
        test
    }

    fn sandbox() -> Sandbox {
        Sandbox::new(Arc::new(Divider::new()), Duration::from_secs(5))
    }

    #[test]
    fn test_completed_run() {
        let result = sandbox().run(&divide(9, 3));
        assert_eq!(result.termination, Termination::Completed);
        assert_eq!(result.returned(2), Some(&Value::Int(3)));
        assert_eq!(result.trace.distance(PredicateId(0), true), Some(3.0));
    }

    #[test]
    fn test_raised_failure_stops_run() {
        let result = sandbox().run(&divide(9, -1));
        assert!(result.is_crash());
        let (position, failure) = result.failure().unwrap();
        assert_eq!(position, 2);
        assert_eq!(failure.kind, "ValueError");
        assert_eq!(result.outcomes[3], StatementOutcome::NotExecuted);
    }

    #[test]
    fn test_panic_is_captured() {
        let result = sandbox().run(&divide(1, 0));
        assert!(result.is_crash());
        let (_, failure) = result.failure().unwrap();
        assert_eq!(failure.kind, "panic");
        assert!(failure.message.contains("division by zero"));
        assert_eq!(result.trace.distance(PredicateId(0), true), Some(0.0));
    }

    #[test]
    fn test_repeated_runs_agree() {
        let sandbox = sandbox();
        let test = divide(7, 2);
        assert_eq!(sandbox.run(&test).trace, sandbox.run(&test).trace);
        assert!(sandbox.probe(&[test]).is_ok());
    }
}
