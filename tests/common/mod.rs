//! Fixture subjects shared by the integration tests
#![allow(dead_code)]

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use searchgen::subject::{BranchTargets, Isolation};
use searchgen::{
    CallableId, ExecutionTracer, Invocation, Parameter, Subject, SubjectFailure, TargetId, TargetSet, TargetSetBuilder,
    TestCluster, TypeDescriptor, Value,
};

/// `classify(x: int)`: returns 1 when `x > 10`, else 0
pub struct Threshold {
    cluster: TestCluster,
    targets: TargetSet,
    pub entry: TargetId,
    pub branch: BranchTargets,
}

impl Threshold {
    pub fn new() -> Self {
        let mut cluster = TestCluster::new();
        let classify = cluster.add_function("classify", vec![Parameter::new("x", TypeDescriptor::Int)], TypeDescriptor::Int);
        let mut builder = TargetSetBuilder::new("threshold");
        let entry = builder.entry(classify, 1);
        let branch = builder.branch(2, Some(entry));
        Self {
            cluster,
            targets: builder.build(),
            entry,
            branch,
        }
    }
}

impl Subject for Threshold {
    fn name(&self) -> &str {
        "threshold"
    }

    fn targets(&self) -> &TargetSet {
        &self.targets
    }

    fn cluster(&self) -> &TestCluster {
        &self.cluster
    }

    fn invoke(&self, invocation: Invocation<'_>, tracer: &ExecutionTracer) -> Result<Value, SubjectFailure> {
        tracer.enter(self.entry);
        let x = invocation.arg(0)?.as_int().unwrap_or(0);
        if tracer.gt(self.branch.predicate, x as f64, 10.0) {
            Ok(Value::Int(1))
        } else {
            Ok(Value::Int(0))
        }
    }
}

/// `total(t: table)`: needs exactly three columns whose numeric sum exceeds 100
pub struct TableSum {
    cluster: TestCluster,
    targets: TargetSet,
    pub entry: TargetId,
    pub shape: BranchTargets,
    pub large: BranchTargets,
}

impl TableSum {
    pub fn new() -> Self {
        let mut cluster = TestCluster::new();
        let total = cluster.add_function("total", vec![Parameter::new("t", TypeDescriptor::Table)], TypeDescriptor::Float);
        let mut builder = TargetSetBuilder::new("table_sum");
        let entry = builder.entry(total, 1);
        let shape = builder.branch(2, Some(entry));
        let large = builder.branch(3, Some(shape.on_true));
        Self {
            cluster,
            targets: builder.build(),
            entry,
            shape,
            large,
        }
    }
}

impl Subject for TableSum {
    fn name(&self) -> &str {
        "table_sum"
    }

    fn targets(&self) -> &TargetSet {
        &self.targets
    }

    fn cluster(&self) -> &TestCluster {
        &self.cluster
    }

    fn invoke(&self, invocation: Invocation<'_>, tracer: &ExecutionTracer) -> Result<Value, SubjectFailure> {
        tracer.enter(self.entry);
        let table = invocation
            .arg(0)?
            .as_table()
            .ok_or_else(|| SubjectFailure::type_error("expected a table"))?;
        if !tracer.eq(self.shape.predicate, table.num_columns() as f64, 3.0) {
            return Ok(Value::None);
        }
        let sum: f64 = table
            .numeric_columns()
            .filter_map(|c| table.column_sum(&c.name))
            .sum();
        if tracer.gt(self.large.predicate, sum, 100.0) {
            Ok(Value::Float(sum))
        } else {
            Ok(Value::Float(0.0))
        }
    }
}

/// `first_row(t: table)` raises on an empty table
pub struct RaiseOnEmpty {
    cluster: TestCluster,
    targets: TargetSet,
    pub entry: TargetId,
    pub empty: BranchTargets,
}

impl RaiseOnEmpty {
    pub fn new() -> Self {
        let mut cluster = TestCluster::new();
        let first_row = cluster.add_function("first_row", vec![Parameter::new("t", TypeDescriptor::Table)], TypeDescriptor::Int);
        let mut builder = TargetSetBuilder::new("raise_on_empty");
        let entry = builder.entry(first_row, 1);
        let empty = builder.branch(2, Some(entry));
        Self {
            cluster,
            targets: builder.build(),
            entry,
            empty,
        }
    }
}

impl Subject for RaiseOnEmpty {
    fn name(&self) -> &str {
        "raise_on_empty"
    }

    fn targets(&self) -> &TargetSet {
        &self.targets
    }

    fn cluster(&self) -> &TestCluster {
        &self.cluster
    }

    fn invoke(&self, invocation: Invocation<'_>, tracer: &ExecutionTracer) -> Result<Value, SubjectFailure> {
        tracer.enter(self.entry);
        let table = invocation
            .arg(0)?
            .as_table()
            .ok_or_else(|| SubjectFailure::type_error("expected a table"))?;
        if tracer.eq(self.empty.predicate, table.rows() as f64, 0.0) {
            return Err(SubjectFailure::new("IndexError", "table is empty"));
        }
        Ok(Value::Int(table.rows() as i64))
    }
}

/// `Stack()` with `push(x)` and a `pop()` that raises when empty
pub struct Stack {
    cluster: TestCluster,
    targets: TargetSet,
    pub construct: TargetId,
    pub push: TargetId,
    pub pop: TargetId,
    pub empty: BranchTargets,
}

impl Stack {
    pub fn new() -> Self {
        let mut cluster = TestCluster::new();
        let construct = cluster.add_constructor("Stack", vec![]);
        let push = cluster.add_method("Stack", "push", vec![Parameter::new("x", TypeDescriptor::Int)], TypeDescriptor::None);
        let pop = cluster.add_method("Stack", "pop", vec![], TypeDescriptor::Int);
        let mut builder = TargetSetBuilder::new("stack");
        let construct = builder.entry(construct, 1);
        let push = builder.entry(push, 5);
        let pop = builder.entry(pop, 9);
        let empty = builder.branch(10, Some(pop));
        Self {
            cluster,
            targets: builder.build(),
            construct,
            push,
            pop,
            empty,
        }
    }
}

impl Subject for Stack {
    fn name(&self) -> &str {
        "stack"
    }

    fn targets(&self) -> &TargetSet {
        &self.targets
    }

    fn cluster(&self) -> &TestCluster {
        &self.cluster
    }

    fn invoke(&self, invocation: Invocation<'_>, tracer: &ExecutionTracer) -> Result<Value, SubjectFailure> {
        match invocation.callable.name.as_str() {
            "Stack" => {
                tracer.enter(self.construct);
                Ok(Value::Object(searchgen::Object::new("Stack").with_field("items", Value::List(vec![]))))
            }
            "push" => {
                tracer.enter(self.push);
                let x = invocation.arg(0)?.clone();
                let receiver = invocation
                    .receiver
                    .and_then(Value::as_object_mut)
                    .ok_or_else(|| SubjectFailure::type_error("push needs a Stack"))?;
                let mut items = match receiver.field("items") {
                    Some(Value::List(items)) => items.clone(),
                    _ => Vec::new(),
                };
                items.push(x);
                receiver.set_field("items", Value::List(items));
                Ok(Value::None)
            }
            "pop" => {
                tracer.enter(self.pop);
                let receiver = invocation
                    .receiver
                    .and_then(Value::as_object_mut)
                    .ok_or_else(|| SubjectFailure::type_error("pop needs a Stack"))?;
                let mut items = match receiver.field("items") {
                    Some(Value::List(items)) => items.clone(),
                    _ => Vec::new(),
                };
                if tracer.is_true(self.empty.predicate, items.is_empty()) {
                    return Err(SubjectFailure::new("IndexError", "pop from empty stack"));
                }
                let top = items.pop().unwrap_or(Value::None);
                receiver.set_field("items", Value::List(items));
                Ok(top)
            }
            other => Err(SubjectFailure::type_error(format!("unknown callable {}", other))),
        }
    }
}

/// `bump()` increments a global counter and branches on its value
pub struct Counter {
    cluster: TestCluster,
    targets: TargetSet,
    count: AtomicI64,
    resets: AtomicU64,
    isolation: Isolation,
    pub entry: TargetId,
    pub first: BranchTargets,
}

impl Counter {
    fn with_isolation(isolation: Isolation) -> Self {
        let mut cluster = TestCluster::new();
        let bump = cluster.add_function("bump", vec![], TypeDescriptor::Int);
        let mut builder = TargetSetBuilder::new("counter");
        let entry = builder.entry(bump, 1);
        let first = builder.branch(2, Some(entry));
        Self {
            cluster,
            targets: builder.build(),
            count: AtomicI64::new(0),
            resets: AtomicU64::new(0),
            isolation,
            entry,
            first,
        }
    }

    /// Declares and implements a reset hook
    pub fn resettable() -> Self {
        Self::with_isolation(Isolation::ResetHook)
    }

    /// Claims to be stateless but keeps its count between runs
    pub fn leaky() -> Self {
        Self::with_isolation(Isolation::Stateless)
    }

    /// Admits its state cannot be reset
    pub fn unresettable() -> Self {
        Self::with_isolation(Isolation::Unresettable)
    }

    /// Number of runs the sandbox has started
    pub fn resets(&self) -> u64 {
        self.resets.load(Ordering::SeqCst)
    }
}

impl Subject for Counter {
    fn name(&self) -> &str {
        "counter"
    }

    fn targets(&self) -> &TargetSet {
        &self.targets
    }

    fn cluster(&self) -> &TestCluster {
        &self.cluster
    }

    fn invoke(&self, _invocation: Invocation<'_>, tracer: &ExecutionTracer) -> Result<Value, SubjectFailure> {
        tracer.enter(self.entry);
        let count = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        tracer.eq(self.first.predicate, count as f64, 1.0);
        Ok(Value::Int(count))
    }

    fn isolation(&self) -> Isolation {
        self.isolation
    }

    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
        if self.isolation == Isolation::ResetHook {
            self.count.store(0, Ordering::SeqCst);
        }
    }
}

/// `wait()` sleeps for a fixed delay before reporting its only branch
pub struct Slow {
    cluster: TestCluster,
    targets: TargetSet,
    delay: Duration,
    pub entry: TargetId,
    pub after: TargetId,
}

impl Slow {
    pub fn new(delay: Duration) -> Self {
        let mut cluster = TestCluster::new();
        let wait = cluster.add_function("wait", vec![], TypeDescriptor::None);
        let mut builder = TargetSetBuilder::new("slow");
        let entry = builder.entry(wait, 1);
        let after = builder.line(2, Some(entry));
        Self {
            cluster,
            targets: builder.build(),
            delay,
            entry,
            after,
        }
    }
}

impl Subject for Slow {
    fn name(&self) -> &str {
        "slow"
    }

    fn targets(&self) -> &TargetSet {
        &self.targets
    }

    fn cluster(&self) -> &TestCluster {
        &self.cluster
    }

    fn invoke(&self, _invocation: Invocation<'_>, tracer: &ExecutionTracer) -> Result<Value, SubjectFailure> {
        tracer.enter(self.entry);
        thread::sleep(self.delay);
        tracer.line(self.after);
        Ok(Value::None)
    }
}

/// Resettable counter whose `slow_bump()` sleeps before incrementing;
/// `read()` branches on the count being zero
pub struct LaggingCounter {
    cluster: TestCluster,
    targets: TargetSet,
    count: AtomicI64,
    delay: Duration,
    bump: CallableId,
    pub read: TargetId,
    pub zero: BranchTargets,
}

impl LaggingCounter {
    pub fn new(delay: Duration) -> Self {
        let mut cluster = TestCluster::new();
        let bump = cluster.add_function("slow_bump", vec![], TypeDescriptor::None);
        let read = cluster.add_function("read", vec![], TypeDescriptor::Int);
        let mut builder = TargetSetBuilder::new("lagging");
        builder.entry(bump, 1);
        let read_entry = builder.entry(read, 5);
        let zero = builder.branch(6, Some(read_entry));
        Self {
            cluster,
            targets: builder.build(),
            count: AtomicI64::new(0),
            delay,
            bump,
            read: read_entry,
            zero,
        }
    }
}

impl Subject for LaggingCounter {
    fn name(&self) -> &str {
        "lagging"
    }

    fn targets(&self) -> &TargetSet {
        &self.targets
    }

    fn cluster(&self) -> &TestCluster {
        &self.cluster
    }

    fn invoke(&self, invocation: Invocation<'_>, tracer: &ExecutionTracer) -> Result<Value, SubjectFailure> {
        if invocation.callable.id == self.bump {
            thread::sleep(self.delay);
            self.count.fetch_add(1, Ordering::SeqCst);
            return Ok(Value::None);
        }
        tracer.enter(self.read);
        let count = self.count.load(Ordering::SeqCst);
        tracer.eq(self.zero.predicate, count as f64, 0.0);
        Ok(Value::Int(count))
    }

    fn isolation(&self) -> Isolation {
        Isolation::ResetHook
    }

    fn reset(&self) {
        self.count.store(0, Ordering::SeqCst);
    }
}

/// `volume(t: tensor)` wants a tensor of rank three or more
pub struct TensorRank {
    cluster: TestCluster,
    targets: TargetSet,
    pub entry: TargetId,
    pub deep: BranchTargets,
}

impl TensorRank {
    pub fn new() -> Self {
        let mut cluster = TestCluster::new();
        let volume = cluster.add_function("volume", vec![Parameter::new("t", TypeDescriptor::tensor())], TypeDescriptor::Int);
        let mut builder = TargetSetBuilder::new("tensor_rank");
        let entry = builder.entry(volume, 1);
        let deep = builder.branch(2, Some(entry));
        Self {
            cluster,
            targets: builder.build(),
            entry,
            deep,
        }
    }
}

impl Subject for TensorRank {
    fn name(&self) -> &str {
        "tensor_rank"
    }

    fn targets(&self) -> &TargetSet {
        &self.targets
    }

    fn cluster(&self) -> &TestCluster {
        &self.cluster
    }

    fn invoke(&self, invocation: Invocation<'_>, tracer: &ExecutionTracer) -> Result<Value, SubjectFailure> {
        tracer.enter(self.entry);
        let tensor = invocation
            .arg(0)?
            .as_tensor()
            .ok_or_else(|| SubjectFailure::type_error("expected a tensor"))?;
        tracer.ge(self.deep.predicate, tensor.rank() as f64, 3.0);
        Ok(Value::Int(tensor.len() as i64))
    }
}
