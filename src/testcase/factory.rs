//! Test factory: building and editing statements against the test cluster
//!
//! Calls are inserted together with whatever statements their parameters
//! need: a parameter is filled by reusing a compatible earlier variable, by a
//! literal drawn from the value pool, or, for object types, by a generator call
//! whose own parameters are satisfied recursively up to `max_recursion`.

use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::statement::{Statement, StatementKind, VarRef};
use super::TestCase;
use crate::config::{SessionConfig, SizeBounds};
use crate::subject::cluster::{Callable, CallableId, CallableKind, TestCluster};
use crate::types::TypeDescriptor;
use crate::value::pool::{SynthesisError, SynthesisResult};
use crate::value::ValuePool;

/// Probability of calling an accessible object under test rather than
/// modifying an object already in the test
const INSERT_CALL_PROBABILITY: f64 = 0.5;

/// Upper bound on items in a collection of constructed objects
const MAX_OBJECT_COLLECTION: usize = 3;

#[derive(Debug, Clone)]
pub struct FactorySettings {
    pub max_recursion: usize,
    pub max_attempts: usize,
    pub object_reuse_probability: f64,
    pub initial_test_length: SizeBounds,
    pub max_test_length: usize,
    pub max_list_length: usize,
}

impl From<&SessionConfig> for FactorySettings {
    fn from(config: &SessionConfig) -> Self {
        Self {
            max_recursion: config.max_recursion,
            max_attempts: config.max_attempts.max(1),
            object_reuse_probability: config.object_reuse_probability,
            initial_test_length: config.initial_test_length,
            max_test_length: config.max_test_length,
            max_list_length: config.max_list_length,
        }
    }
}

impl Default for FactorySettings {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

#[derive(Debug)]
pub struct TestFactory {
    cluster: TestCluster,
    pool: ValuePool,
    settings: FactorySettings,
    dormant: BTreeSet<CallableId>,
    failures: AtomicUsize,
}

impl TestFactory {
    pub fn new(cluster: TestCluster, pool: ValuePool, settings: FactorySettings) -> Self {
        Self {
            cluster,
            pool,
            settings,
            dormant: BTreeSet::new(),
            failures: AtomicUsize::new(0),
        }
    }

    pub fn cluster(&self) -> &TestCluster {
        &self.cluster
    }

    pub fn pool(&self) -> &ValuePool {
        &self.pool
    }

    pub fn settings(&self) -> &FactorySettings {
        &self.settings
    }

    /// Callables whose targets are all covered; they are picked less often
    pub fn set_dormant(&mut self, dormant: BTreeSet<CallableId>) {
        if dormant.len() != self.dormant.len() {
            log::debug!("{} of {} callables fully covered", dormant.len(), self.cluster.len());
        }
        self.dormant = dormant;
    }

    /// Number of synthesis failures since the last call
    pub fn take_failures(&self) -> usize {
        self.failures.swap(0, Ordering::Relaxed)
    }

    fn record_failure(&self, err: &SynthesisError) {
        log::debug!("Abandoning statement: {}", err);
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Fresh test of `initial_test_length` statements
    pub fn random_test(&self, rng: &mut ChaCha8Rng) -> TestCase {
        let bounds = self.settings.initial_test_length;
        let target = rng.gen_range(bounds.min..=bounds.max);
        let mut test = TestCase::new();
        let mut attempts = 0;
        while test.len() < target && attempts < self.settings.max_attempts * target {
            attempts += 1;
            let last = test.len();
            let _ = self.insert_random_statement(&mut test, last, rng);
        }
        test.truncate(self.settings.max_test_length);
        test
    }

    /// Insert a call to an object under test, or a modifier on an existing
    /// object, somewhere in `0..=last_position`. Returns the position of the
    /// new call; argument statements land just before it.
    pub fn insert_random_statement(
        &self,
        test: &mut TestCase,
        last_position: usize,
        rng: &mut ChaCha8Rng,
    ) -> SynthesisResult<usize> {
        let mut last_error = SynthesisError::NothingToCall;
        for _ in 0..self.settings.max_attempts {
            let mut candidate = test.clone();
            let position = rng.gen_range(0..=last_position.min(candidate.len()));
            let objects = candidate.objects_before(position);
            let attempt = if objects.is_empty() || rng.gen_bool(INSERT_CALL_PROBABILITY) {
                self.insert_random_call(&mut candidate, position, rng)
            } else {
                self.insert_call_on_object(&mut candidate, &objects, position, rng)
            };
            match attempt {
                Ok(var) => {
                    *test = candidate;
                    return Ok(var.0);
                }
                Err(err) => last_error = err,
            }
        }
        let err = match last_error {
            SynthesisError::NothingToCall => last_error,
            other => SynthesisError::AttemptsExhausted {
                ty: other.to_string(),
                attempts: self.settings.max_attempts,
            },
        };
        self.record_failure(&err);
        Err(err)
    }

    fn insert_random_call(&self, test: &mut TestCase, position: usize, rng: &mut ChaCha8Rng) -> SynthesisResult<VarRef> {
        let callable = self
            .cluster
            .random_accessible(rng, &self.dormant)
            .ok_or(SynthesisError::NothingToCall)?;
        let mut position = position;
        self.append_call(test, callable, &mut position, 0, rng)
    }

    fn insert_call_on_object(
        &self,
        test: &mut TestCase,
        objects: &[VarRef],
        position: usize,
        rng: &mut ChaCha8Rng,
    ) -> SynthesisResult<VarRef> {
        let receiver = *objects.choose(rng).ok_or(SynthesisError::NothingToCall)?;
        let owner = match test.statement(receiver.0).map(|s| &s.ret_type) {
            Some(TypeDescriptor::Object(owner)) => owner.clone(),
            _ => return Err(SynthesisError::NothingToCall),
        };
        let modifiers = self.cluster.modifiers_for(&owner);
        let fields = self.cluster.fields_of(&owner);
        let total = modifiers.len() + fields.len();
        if total == 0 {
            return Err(SynthesisError::NothingToCall);
        }
        let mut position = position;
        let pick = rng.gen_range(0..total);
        if pick < modifiers.len() {
            self.append_method(test, modifiers[pick], receiver, &mut position, 0, rng)
        } else {
            let field = &fields[pick - modifiers.len()];
            let value = self.create_variable(test, &field.ty, &mut position, 1, rng)?;
            let statement = Statement::new(
                StatementKind::FieldAssign {
                    receiver,
                    field: field.name.clone(),
                    value,
                },
                TypeDescriptor::None,
            );
            Ok(test.insert(position, statement))
        }
    }

    /// Insert `callable` at `*position`, preceded by the statements its
    /// receiver and parameters need. `*position` ends up just past the call.
    pub fn append_call(
        &self,
        test: &mut TestCase,
        callable: &Callable,
        position: &mut usize,
        depth: usize,
        rng: &mut ChaCha8Rng,
    ) -> SynthesisResult<VarRef> {
        match &callable.kind {
            CallableKind::Method { owner } => {
                let receiver = self.create_variable(test, &TypeDescriptor::object(owner), position, depth + 1, rng)?;
                self.append_method(test, callable, receiver, position, depth, rng)
            }
            CallableKind::Constructor { .. } | CallableKind::Function => {
                let args = self.satisfy_parameters(test, callable, position, depth, rng)?;
                let kind = if matches!(callable.kind, CallableKind::Function) {
                    StatementKind::Function { callable: callable.id, args }
                } else {
                    StatementKind::Constructor { callable: callable.id, args }
                };
                let var = test.insert(*position, Statement::new(kind, callable.returns.clone()));
                *position += 1;
                Ok(var)
            }
        }
    }

    fn append_method(
        &self,
        test: &mut TestCase,
        callable: &Callable,
        receiver: VarRef,
        position: &mut usize,
        depth: usize,
        rng: &mut ChaCha8Rng,
    ) -> SynthesisResult<VarRef> {
        let args = self.satisfy_parameters(test, callable, position, depth, rng)?;
        let kind = StatementKind::Method {
            callable: callable.id,
            receiver,
            args,
        };
        let var = test.insert(*position, Statement::new(kind, callable.returns.clone()));
        *position += 1;
        Ok(var)
    }

    /// One variable per parameter, reused or created before `*position`
    pub fn satisfy_parameters(
        &self,
        test: &mut TestCase,
        callable: &Callable,
        position: &mut usize,
        depth: usize,
        rng: &mut ChaCha8Rng,
    ) -> SynthesisResult<Vec<VarRef>> {
        callable
            .parameters
            .iter()
            .map(|parameter| self.create_variable(test, &parameter.ty, position, depth + 1, rng))
            .collect()
    }

    /// Variable of type `ty` available before `*position`.
    ///
    /// Objects are reused with `object_reuse_probability` when a compatible
    /// one exists; otherwise a generator is called. Other kinds get a fresh
    /// literal.
    pub fn create_variable(
        &self,
        test: &mut TestCase,
        ty: &TypeDescriptor,
        position: &mut usize,
        depth: usize,
        rng: &mut ChaCha8Rng,
    ) -> SynthesisResult<VarRef> {
        if depth > self.settings.max_recursion {
            return Err(SynthesisError::RecursionLimit {
                ty: ty.to_string(),
                depth,
            });
        }
        match ty {
            TypeDescriptor::Object(_) => {
                let candidates = test.variables_for(ty, *position);
                if !candidates.is_empty() && rng.gen_bool(self.settings.object_reuse_probability) {
                    return candidates.choose(rng).copied().ok_or(SynthesisError::NothingToCall);
                }
                match self.cluster.random_call_for(ty, rng) {
                    Some(generator) => self.append_call(test, generator, position, depth, rng),
                    None => candidates
                        .choose(rng)
                        .copied()
                        .ok_or_else(|| SynthesisError::NoStrategy(ty.to_string())),
                }
            }
            TypeDescriptor::Enum { name, variants } if variants.is_empty() => match self.cluster.enum_type(name) {
                Some(full) => self.insert_literal(test, full, position, rng),
                None => Err(SynthesisError::NoStrategy(ty.to_string())),
            },
            TypeDescriptor::List(element) if !self.pool.can_generate(element) => {
                let count = rng.gen_range(0..=self.settings.max_list_length.min(MAX_OBJECT_COLLECTION));
                let items = (0..count)
                    .map(|_| self.create_variable(test, element, position, depth + 1, rng))
                    .collect::<SynthesisResult<Vec<_>>>()?;
                let statement = Statement::new(
                    StatementKind::Collection {
                        element: (**element).clone(),
                        items,
                    },
                    ty.clone(),
                );
                let var = test.insert(*position, statement);
                *position += 1;
                Ok(var)
            }
            _ => self.insert_literal(test, ty, position, rng),
        }
    }

    fn insert_literal(
        &self,
        test: &mut TestCase,
        ty: &TypeDescriptor,
        position: &mut usize,
        rng: &mut ChaCha8Rng,
    ) -> SynthesisResult<VarRef> {
        let value = self.pool.draw(ty, rng)?;
        let var = test.insert(*position, Statement::literal(value, ty));
        *position += 1;
        Ok(var)
    }

    /// Change the statement at `position`. Returns whether anything changed;
    /// `test` is left untouched otherwise.
    pub fn change_statement(&self, test: &mut TestCase, position: usize, rng: &mut ChaCha8Rng) -> bool {
        let statement = match test.statement(position) {
            Some(statement) => statement.clone(),
            None => return false,
        };
        let mut candidate = test.clone();
        let outcome = match &statement.kind {
            StatementKind::Primitive(_)
            | StatementKind::Enum { .. }
            | StatementKind::Tensor(_)
            | StatementKind::Table(_) => self.mutate_literal(&mut candidate, position, &statement, rng),
            StatementKind::Collection { element, items } => {
                Ok(self.change_collection_item(&mut candidate, position, element, items, rng))
            }
            StatementKind::FieldAssign { .. } => self.change_field_value(&mut candidate, position, rng),
            _ => self.change_call_argument(&mut candidate, position, rng),
        };
        match outcome {
            Ok(true) => {
                *test = candidate;
                true
            }
            Ok(false) => false,
            Err(err) => {
                self.record_failure(&err);
                false
            }
        }
    }

    fn mutate_literal(
        &self,
        test: &mut TestCase,
        position: usize,
        statement: &Statement,
        rng: &mut ChaCha8Rng,
    ) -> SynthesisResult<bool> {
        let value = match statement.literal_value() {
            Some(value) => value,
            None => return Ok(false),
        };
        let mutated = self.pool.mutate(&value, &statement.ret_type, rng)?;
        if mutated == value {
            return Ok(false);
        }
        if let Some(slot) = test.statement_mut(position) {
            *slot = Statement::literal(mutated, &statement.ret_type);
        }
        Ok(true)
    }

    fn change_collection_item(
        &self,
        test: &mut TestCase,
        position: usize,
        element: &TypeDescriptor,
        items: &[VarRef],
        rng: &mut ChaCha8Rng,
    ) -> bool {
        if items.is_empty() {
            return false;
        }
        let index = rng.gen_range(0..items.len());
        let alternatives: Vec<VarRef> = test
            .variables_for(element, position)
            .into_iter()
            .filter(|v| *v != items[index])
            .collect();
        let replacement = match alternatives.choose(rng) {
            Some(var) => *var,
            None => return false,
        };
        if let Some(Statement {
            kind: StatementKind::Collection { items, .. },
            ..
        }) = test.statement_mut(position)
        {
            items[index] = replacement;
        }
        true
    }

    fn change_field_value(&self, test: &mut TestCase, position: usize, rng: &mut ChaCha8Rng) -> SynthesisResult<bool> {
        let (receiver, field) = match test.statement(position).map(|s| &s.kind) {
            Some(StatementKind::FieldAssign { receiver, field, .. }) => (*receiver, field.clone()),
            _ => return Ok(false),
        };
        let owner = match test.statement(receiver.0).map(|s| &s.ret_type) {
            Some(TypeDescriptor::Object(owner)) => owner.clone(),
            _ => return Ok(false),
        };
        let ty = match self.cluster.fields_of(&owner).iter().find(|f| f.name == field) {
            Some(parameter) => parameter.ty.clone(),
            None => return Ok(false),
        };
        let mut call_position = position;
        let value = self.replacement_for(test, &ty, &mut call_position, rng)?;
        if let Some(Statement {
            kind: StatementKind::FieldAssign { value: slot, .. },
            ..
        }) = test.statement_mut(call_position)
        {
            *slot = value;
        }
        Ok(true)
    }

    /// Replace one argument of the call at `position` with another compatible
    /// variable or a freshly created one. On error `test` may hold statements
    /// created for the abandoned argument.
    fn change_call_argument(
        &self,
        test: &mut TestCase,
        position: usize,
        rng: &mut ChaCha8Rng,
    ) -> SynthesisResult<bool> {
        let callable = match test
            .statement(position)
            .and_then(Statement::callable)
            .and_then(|id| self.cluster.callable(id))
        {
            Some(callable) => callable,
            None => return Ok(false),
        };
        if callable.parameters.is_empty() {
            return Ok(false);
        }
        let index = rng.gen_range(0..callable.parameters.len());
        let ty = callable.parameters[index].ty.clone();
        let mut call_position = position;
        let replacement = self.replacement_for(test, &ty, &mut call_position, rng)?;
        let args = match test.statement_mut(call_position).map(|s| &mut s.kind) {
            Some(StatementKind::Constructor { args, .. })
            | Some(StatementKind::Function { args, .. })
            | Some(StatementKind::Method { args, .. }) => args,
            _ => return Ok(false),
        };
        match args.get_mut(index) {
            Some(arg) if *arg != replacement => {
                *arg = replacement;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Earlier compatible variable, or a new one inserted before `*position`
    fn replacement_for(
        &self,
        test: &mut TestCase,
        ty: &TypeDescriptor,
        position: &mut usize,
        rng: &mut ChaCha8Rng,
    ) -> SynthesisResult<VarRef> {
        let candidates = test.variables_for(ty, *position);
        if !candidates.is_empty() && rng.gen_bool(0.5) {
            return candidates.choose(rng).copied().ok_or(SynthesisError::NothingToCall);
        }
        self.create_variable(test, ty, position, 1, rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subject::cluster::Parameter;
    use crate::value::pool::PoolSettings;
    use rand::SeedableRng;

    fn factory(cluster: TestCluster) -> TestFactory {
        TestFactory::new(cluster, ValuePool::new(PoolSettings::default()), FactorySettings::default())
    }

    fn account_cluster() -> TestCluster {
        let mut cluster = TestCluster::new();
        cluster.add_constructor("Account", vec![Parameter::new("owner", TypeDescriptor::Str)]);
        cluster.add_method(
            "Account",
            "deposit",
            vec![Parameter::new("amount", TypeDescriptor::Int)],
            TypeDescriptor::Int,
        );
        cluster.add_field("Account", "frozen", TypeDescriptor::Bool);
        cluster.add_function(
            "transfer",
            vec![
                Parameter::new("from", TypeDescriptor::object("Account")),
                Parameter::new("to", TypeDescriptor::object("Account")),
            ],
            TypeDescriptor::Bool,
        );
        cluster
    }

    #[test]
    fn test_random_tests_are_valid() {
        let factory = factory(account_cluster());
        let mut rng = ChaCha8Rng::seed_from_u64(17);
        for _ in 0..200 {
            let test = factory.random_test(&mut rng);
            assert!(!test.is_empty());
            assert!(test.validate().is_ok(), "{}", test);
        }
    }

    #[test]
    fn test_method_call_gets_receiver() {
        let cluster = account_cluster();
        let factory = factory(cluster.clone());
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut test = TestCase::new();
        let mut position = 0;
        let deposit = cluster.callable(CallableId(1)).unwrap();
        let var = factory.append_call(&mut test, deposit, &mut position, 0, &mut rng).unwrap();
        assert_eq!(var.0, test.len() - 1);
        assert_eq!(position, test.len());
        match &test.statement(var.0).unwrap().kind {
            StatementKind::Method { receiver, .. } => {
                assert_eq!(test.statement(receiver.0).unwrap().ret_type, TypeDescriptor::object("Account"));
            }
            other => panic!("expected method call, got {:?}", other),
        }
    }

    #[test]
    fn test_recursion_limit() {
        let mut cluster = TestCluster::new();
        cluster.add_constructor("Node", vec![Parameter::new("next", TypeDescriptor::object("Node"))]);
        let factory = factory(cluster.clone());
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut test = TestCase::new();
        let mut position = 0;
        let node = cluster.callable(CallableId(0)).unwrap();
        let err = factory.append_call(&mut test, node, &mut position, 0, &mut rng).unwrap_err();
        assert!(matches!(err, SynthesisError::RecursionLimit { .. }));

        let mut test = TestCase::new();
        assert!(factory.insert_random_statement(&mut test, 0, &mut rng).is_err());
        assert!(test.is_empty());
        assert!(factory.take_failures() > 0);
    }

    #[test]
    fn test_change_statement_keeps_dag() {
        let factory = factory(account_cluster());
        let mut rng = ChaCha8Rng::seed_from_u64(23);
        let mut test = factory.random_test(&mut rng);
        for _ in 0..300 {
            let position = rng.gen_range(0..test.len());
            factory.change_statement(&mut test, position, &mut rng);
            assert!(test.validate().is_ok(), "{}", test);
        }
    }

    #[test]
    fn test_failed_change_leaves_test_untouched() {
        // an Account needs a Ledger, and a Ledger can never be built
        let mut cluster = TestCluster::new();
        cluster.add_constructor(
            "Ledger",
            vec![
                Parameter::new("entries", TypeDescriptor::Int),
                Parameter::new("parent", TypeDescriptor::object("Ledger")),
            ],
        );
        let open = cluster.add_function(
            "open_account",
            vec![
                Parameter::new("id", TypeDescriptor::Int),
                Parameter::new("ledger", TypeDescriptor::object("Ledger")),
            ],
            TypeDescriptor::object("Account"),
        );
        let audit = cluster.add_function(
            "audit",
            vec![Parameter::new("account", TypeDescriptor::object("Account"))],
            TypeDescriptor::Bool,
        );
        let factory = factory(cluster);
        let original = TestCase::from_statements(vec![
            Statement::new(
                StatementKind::Function { callable: open, args: vec![] },
                TypeDescriptor::object("Account"),
            ),
            Statement::new(
                StatementKind::Function {
                    callable: audit,
                    args: vec![VarRef(0)],
                },
                TypeDescriptor::Bool,
            ),
        ])
        .unwrap();

        let mut failures = 0;
        for seed in 0..200 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let mut test = original.clone();
            assert!(!factory.change_statement(&mut test, 1, &mut rng));
            assert_eq!(test, original);
            failures += factory.take_failures();
        }
        assert!(failures > 0);
    }

    #[test]
    fn test_empty_cluster_has_nothing_to_call() {
        let factory = factory(TestCluster::new());
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let mut test = TestCase::new();
        assert_eq!(
            factory.insert_random_statement(&mut test, 0, &mut rng),
            Err(SynthesisError::NothingToCall)
        );
    }
}
