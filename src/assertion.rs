//! Regression assertions for generated tests
//!
//! Assertions record what the subject did when the test was generated, so the
//! emitted test fails if that behaviour changes later.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::execution::{ExecutionResult, StatementOutcome};
use crate::testcase::{TestCase, VarRef};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Assertion {
    /// The call at `var` returned `value`
    Equals { var: VarRef, value: Value },
    /// The statement at `statement` raised
    Raises { statement: usize, kind: String, message: String },
}

pub trait AssertionGenerator: fmt::Debug + Send + Sync {
    fn generate(&self, test: &TestCase, result: &ExecutionResult) -> Vec<Assertion>;
}

/// Equality on primitive call results, plus the raised failure, if any
#[derive(Debug, Default)]
pub struct SimpleAssertionGenerator;

impl AssertionGenerator for SimpleAssertionGenerator {
    fn generate(&self, test: &TestCase, result: &ExecutionResult) -> Vec<Assertion> {
        if result.is_timeout() {
            return Vec::new();
        }
        let mut assertions = Vec::new();
        for (position, outcome) in result.outcomes.iter().enumerate() {
            let is_call = test.statement(position).map_or(false, |s| s.is_call());
            match outcome {
                StatementOutcome::Returned(value) if is_call && assertable(value) => {
                    assertions.push(Assertion::Equals {
                        var: VarRef(position),
                        value: value.clone(),
                    });
                }
                StatementOutcome::Raised(failure) => {
                    assertions.push(Assertion::Raises {
                        statement: position,
                        kind: failure.kind.clone(),
                        message: failure.message.clone(),
                    });
                }
                _ => {}
            }
        }
        assertions
    }
}

fn assertable(value: &Value) -> bool {
    match value {
        Value::None => false,
        Value::Float(f) => f.is_finite(),
        other => other.is_primitive(),
    }
}
