//! Demo of a complete search session
//!
//! The subject under test has one function, `classify(x: int)`, which
//! branches on `x > 10`. The search finds inputs for both outcomes and
//! prints the archived tests with their regression assertions.

use std::sync::Arc;

use searchgen::{
    generate, ExecutionTracer, Invocation, Parameter, SessionConfig, Subject, SubjectFailure, TargetId, TargetSet,
    TargetSetBuilder, TestCluster, TypeDescriptor, Value,
};
use searchgen::subject::BranchTargets;

struct Classifier {
    cluster: TestCluster,
    targets: TargetSet,
    entry: TargetId,
    branch: BranchTargets,
}

impl Classifier {
    fn new() -> Self {
        let mut cluster = TestCluster::new();
        let classify = cluster.add_function("classify", vec![Parameter::new("x", TypeDescriptor::Int)], TypeDescriptor::Str);
        let mut builder = TargetSetBuilder::new("classifier");
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

impl Subject for Classifier {
    fn name(&self) -> &str {
        "classifier"
    }

    fn targets(&self) -> &TargetSet {
        &self.targets
    }

    fn cluster(&self) -> &TestCluster {
        &self.cluster
    }

    fn invoke(&self, invocation: Invocation<'_>, tracer: &ExecutionTracer) -> Result<Value, SubjectFailure> {
        tracer.enter(self.entry);
        let x = invocation
            .arg(0)?
            .as_int()
            .ok_or_else(|| SubjectFailure::type_error("x must be an int"))?;
        if tracer.gt(self.branch.predicate, x as f64, 10.0) {
            Ok(Value::Str("large".into()))
        } else {
            Ok(Value::Str("small".into()))
        }
    }

    fn constants(&self) -> Vec<Value> {
        vec![Value::Int(10)]
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Threshold Search Demo ===\n");

    let config = SessionConfig::default()
        .with_seed(42)
        .with_population_size(10)
        .with_max_iterations(Some(20));
    let result = generate(Arc::new(Classifier::new()), config)?;

    println!(
        "Covered {}/{} targets ({:.1}%) in {} generations, stopped by {:?}\n",
        result.covered_targets,
        result.total_targets,
        result.coverage,
        result.statistics.generations,
        result.termination
    );
    for (i, generated) in result.tests.iter().enumerate() {
        println!("Test {} ({}):", i, &generated.fingerprint[..12]);
        println!("{}", generated.test);
        for assertion in &generated.assertions {
            println!("    assert {:?}", assertion);
        }
        println!();
    }
    Ok(())
}
