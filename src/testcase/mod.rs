//! Test cases: the chromosome of the search
//!
//! A [`TestCase`] is an ordered list of statements. Statement `i` may only
//! read the outputs of statements `0..i`, so insertion order is evaluation
//! order and the reference graph is a DAG by construction. Every structural
//! edit below keeps that property: inserts shift later references, removals
//! rewire or drop dependents, and crossover remaps the spliced tail.

pub mod factory;
pub mod statement;

pub use self::factory::{FactorySettings, TestFactory};
pub use self::statement::{Statement, StatementKind, VarRef};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::fitness::FitnessVector;
use crate::subject::cluster::CallableId;
use crate::types::TypeDescriptor;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TestCaseError {
    #[error("Statement {statement} references {reference}, which is not an earlier statement")]
    DanglingReference { statement: usize, reference: usize },
}

pub type TestCaseResult<T> = Result<T, TestCaseError>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestCase {
    statements: Vec<Statement>,
    #[serde(skip)]
    fitness: Option<FitnessVector>,
}

impl PartialEq for TestCase {
    fn eq(&self, other: &Self) -> bool {
        self.statements == other.statements
    }
}

impl TestCase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_statements(statements: Vec<Statement>) -> TestCaseResult<Self> {
        let test = Self {
            statements,
            fitness: None,
        };
        test.validate()?;
        Ok(test)
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn statement(&self, position: usize) -> Option<&Statement> {
        self.statements.get(position)
    }

    /// Mutable access to one statement. The caller keeps its references earlier than `position`.
    pub fn statement_mut(&mut self, position: usize) -> Option<&mut Statement> {
        self.fitness = None;
        self.statements.get_mut(position)
    }

    pub fn fitness(&self) -> Option<&FitnessVector> {
        self.fitness.as_ref()
    }

    pub fn set_fitness(&mut self, fitness: FitnessVector) {
        self.fitness = Some(fitness);
    }

    pub fn push(&mut self, statement: Statement) -> VarRef {
        self.fitness = None;
        self.statements.push(statement);
        VarRef(self.statements.len() - 1)
    }

    /// Insert at `position`, shifting references of later statements
    pub fn insert(&mut self, position: usize, statement: Statement) -> VarRef {
        self.fitness = None;
        let position = position.min(self.statements.len());
        for later in &mut self.statements[position..] {
            for reference in later.references_mut() {
                if reference.0 >= position {
                    reference.0 += 1;
                }
            }
        }
        self.statements.insert(position, statement);
        VarRef(position)
    }

    /// Remove the statement at `position`.
    ///
    /// References to a removed variable are rewired to the closest earlier
    /// variable of a compatible type; statements left without one are removed
    /// as well. Returns the number of statements removed.
    pub fn remove(&mut self, position: usize) -> usize {
        if position >= self.statements.len() {
            return 0;
        }
        self.fitness = None;
        let mut removed = vec![false; self.statements.len()];
        removed[position] = true;
        for j in position + 1..self.statements.len() {
            let mut rewired = self.statements[j].clone();
            let mut orphaned = false;
            for reference in rewired.references_mut() {
                if !removed[reference.0] {
                    continue;
                }
                let ty = &self.statements[reference.0].ret_type;
                match (0..j)
                    .rev()
                    .find(|i| !removed[*i] && self.statements[*i].ret_type.is_assignable_to(ty))
                {
                    Some(replacement) => reference.0 = replacement,
                    None => {
                        orphaned = true;
                        break;
                    }
                }
            }
            if orphaned {
                removed[j] = true;
            } else {
                self.statements[j] = rewired;
            }
        }
        self.compact(&removed)
    }

    /// Drop every flagged statement and renumber the survivors
    fn compact(&mut self, removed: &[bool]) -> usize {
        let mut mapping = vec![None; self.statements.len()];
        let mut next = 0;
        for (old, gone) in removed.iter().enumerate() {
            if !gone {
                mapping[old] = Some(next);
                next += 1;
            }
        }
        let statements = std::mem::take(&mut self.statements);
        let count = statements.len() - next;
        for (old, mut statement) in statements.into_iter().enumerate() {
            if removed[old] {
                continue;
            }
            for reference in statement.references_mut() {
                if let Some(new) = mapping[reference.0] {
                    reference.0 = new;
                }
            }
            self.statements.push(statement);
        }
        count
    }

    pub fn truncate(&mut self, len: usize) {
        if len < self.statements.len() {
            self.fitness = None;
            self.statements.truncate(len);
        }
    }

    /// Variables before `position` whose type can fill a slot of type `ty`
    pub fn variables_for(&self, ty: &TypeDescriptor, position: usize) -> Vec<VarRef> {
        self.statements
            .iter()
            .take(position)
            .enumerate()
            .filter(|(_, s)| s.ret_type != TypeDescriptor::None && s.ret_type.is_assignable_to(ty))
            .map(|(i, _)| VarRef(i))
            .collect()
    }

    /// Object-typed variables before `position`
    pub fn objects_before(&self, position: usize) -> Vec<VarRef> {
        self.statements
            .iter()
            .take(position)
            .enumerate()
            .filter(|(_, s)| s.ret_type.is_object())
            .map(|(i, _)| VarRef(i))
            .collect()
    }

    pub fn callables(&self) -> impl Iterator<Item = CallableId> + '_ {
        self.statements.iter().filter_map(Statement::callable)
    }

    /// `front[..split_front]` followed by `back[split_back..]`.
    ///
    /// References from the tail into the part of `back` that was cut off are
    /// remapped to the closest compatible variable already in the child;
    /// statements that cannot be remapped are dropped with their dependents.
    pub fn splice(front: &TestCase, split_front: usize, back: &TestCase, split_back: usize) -> TestCase {
        let split_front = split_front.min(front.len());
        let split_back = split_back.min(back.len());
        let mut child = TestCase {
            statements: front.statements[..split_front].to_vec(),
            fitness: None,
        };
        // position in `child` of each statement of `back`'s tail
        let mut placed: Vec<Option<usize>> = vec![None; back.len()];
        for (offset, statement) in back.statements[split_back..].iter().enumerate() {
            let old = split_back + offset;
            let mut moved = statement.clone();
            let mut dropped = false;
            for reference in moved.references_mut() {
                if reference.0 >= split_back {
                    match placed[reference.0] {
                        Some(new) => reference.0 = new,
                        None => {
                            dropped = true;
                            break;
                        }
                    }
                } else {
                    let ty = &back.statements[reference.0].ret_type;
                    match child.variables_for(ty, child.len()).last() {
                        Some(var) => reference.0 = var.0,
                        None => {
                            dropped = true;
                            break;
                        }
                    }
                }
            }
            if !dropped {
                placed[old] = Some(child.len());
                child.statements.push(moved);
            }
        }
        child
    }

    pub fn validate(&self) -> TestCaseResult<()> {
        for (position, statement) in self.statements.iter().enumerate() {
            if let Some(reference) = statement.references().iter().find(|r| r.0 >= position) {
                return Err(TestCaseError::DanglingReference {
                    statement: position,
                    reference: reference.0,
                });
            }
        }
        Ok(())
    }

    /// SHA-256 of the canonical serialized statements, hex encoded.
    /// Non-finite floats serialize by name, so NaN and the infinities stay distinct.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_vec(&self.statements).unwrap_or_default();
        let digest = Sha256::digest(&canonical);
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Display for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, statement) in self.statements.iter().enumerate() {
            writeln!(f, "v{}: {} = {}", i, statement.ret_type, statement)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn int(i: i64) -> Statement {
        Statement::new(StatementKind::Primitive(Value::Int(i)), TypeDescriptor::Int)
    }

    fn call(args: &[usize]) -> Statement {
        Statement::new(
            StatementKind::Function {
                callable: CallableId(0),
                args: args.iter().map(|a| VarRef(*a)).collect(),
            },
            TypeDescriptor::Str,
        )
    }

    fn sample() -> TestCase {
        let mut test = TestCase::new();
        test.push(int(1));
        test.push(int(2));
        test.push(call(&[0, 1]));
        test
    }

    #[test]
    fn test_insert_shifts_references() {
        let mut test = sample();
        test.insert(1, int(9));
        assert_eq!(test.statement(3).unwrap().references(), vec![VarRef(0), VarRef(2)]);
        assert!(test.validate().is_ok());
    }

    #[test]
    fn test_remove_rewires_to_compatible_variable() {
        let mut test = sample();
        assert_eq!(test.remove(1), 1);
        assert_eq!(test.len(), 2);
        assert_eq!(test.statement(1).unwrap().references(), vec![VarRef(0), VarRef(0)]);
        assert!(test.validate().is_ok());
    }

    #[test]
    fn test_remove_drops_orphans() {
        let mut test = sample();
        test.remove(1);
        assert_eq!(test.remove(0), 2);
        assert!(test.is_empty());
    }

    #[test]
    fn test_validate_rejects_forward_reference() {
        let err = TestCase::from_statements(vec![call(&[0])]).unwrap_err();
        assert_eq!(err, TestCaseError::DanglingReference { statement: 0, reference: 0 });
    }

    #[test]
    fn test_splice_remaps_tail() {
        let front = {
            let mut t = TestCase::new();
            t.push(int(5));
            t
        };
        let back = sample();
        let child = TestCase::splice(&front, 1, &back, 2);
        assert_eq!(child.len(), 2);
        assert_eq!(child.statement(1).unwrap().references(), vec![VarRef(0), VarRef(0)]);
        assert!(child.validate().is_ok());

        let empty = TestCase::new();
        assert!(TestCase::splice(&empty, 0, &back, 2).is_empty());
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let a = sample();
        let mut b = sample();
        assert_eq!(a.fingerprint(), b.fingerprint());
        b.push(int(3));
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn test_fingerprint_distinguishes_non_finite_floats() {
        let float = |x: f64| {
            let mut test = TestCase::new();
            test.push(Statement::new(StatementKind::Primitive(Value::Float(x)), TypeDescriptor::Float));
            test.fingerprint()
        };
        let fingerprints: std::collections::BTreeSet<String> =
            [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, 0.0, 1.0].into_iter().map(float).collect();
        assert_eq!(fingerprints.len(), 5);
        assert_eq!(float(f64::NAN), float(f64::NAN));
    }

    #[test]
    fn test_json_round_trip_keeps_non_finite_literals() {
        let mut test = sample();
        test.push(Statement::new(StatementKind::Primitive(Value::Float(f64::NAN)), TypeDescriptor::Float));
        test.push(Statement::new(
            StatementKind::Primitive(Value::Float(f64::NEG_INFINITY)),
            TypeDescriptor::Float,
        ));
        let json = serde_json::to_string(&test).unwrap();
        let back: TestCase = serde_json::from_str(&json).unwrap();
        assert_eq!(back.fingerprint(), test.fingerprint());
        assert!(matches!(back.statement(3).unwrap().kind, StatementKind::Primitive(Value::Float(x)) if x.is_nan()));
        assert_eq!(back.statement(4), test.statement(4));
    }

    #[test]
    fn test_mutation_clears_cached_fitness() {
        let mut test = sample();
        test.set_fitness(FitnessVector::default());
        assert!(test.fitness().is_some());
        test.insert(0, int(0));
        assert!(test.fitness().is_none());
    }
}
