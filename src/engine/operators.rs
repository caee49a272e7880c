//! Variation operators: relative single-point crossover and statement mutation

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::config::SessionConfig;
use crate::testcase::{TestCase, TestFactory};

/// Splice both parents at the same relative point. Parents shorter than two
/// statements are returned unchanged.
pub fn crossover(a: &TestCase, b: &TestCase, rng: &mut ChaCha8Rng) -> (TestCase, TestCase) {
    if a.len() < 2 || b.len() < 2 {
        return (a.clone(), b.clone());
    }
    let alpha: f64 = rng.gen();
    let split_a = ((a.len() as f64 * alpha).floor() as usize).clamp(1, a.len() - 1);
    let split_b = ((b.len() as f64 * alpha).floor() as usize).clamp(1, b.len() - 1);
    (
        TestCase::splice(a, split_a, b, split_b),
        TestCase::splice(b, split_b, a, split_a),
    )
}

#[derive(Debug, Clone)]
pub struct MutationSettings {
    pub delete_probability: f64,
    pub change_probability: f64,
    pub insert_probability: f64,
    pub statement_insertion_probability: f64,
    pub max_test_length: usize,
}

impl From<&SessionConfig> for MutationSettings {
    fn from(config: &SessionConfig) -> Self {
        Self {
            delete_probability: config.test_delete_probability,
            change_probability: config.test_change_probability,
            insert_probability: config.test_insert_probability,
            statement_insertion_probability: config.statement_insertion_probability,
            max_test_length: config.max_test_length,
        }
    }
}

/// Delete, change and insert statements. Returns whether the test changed.
pub fn mutate(factory: &TestFactory, test: &mut TestCase, settings: &MutationSettings, rng: &mut ChaCha8Rng) -> bool {
    let mut changed = false;
    if !test.is_empty() && rng.gen_bool(settings.delete_probability) {
        changed |= delete_statements(test, rng);
    }
    if !test.is_empty() && rng.gen_bool(settings.change_probability) {
        changed |= change_statements(factory, test, rng);
    }
    if test.is_empty() || rng.gen_bool(settings.insert_probability) {
        changed |= insert_statements(factory, test, settings, rng);
    }
    test.truncate(settings.max_test_length);
    changed
}

fn delete_statements(test: &mut TestCase, rng: &mut ChaCha8Rng) -> bool {
    let p = 1.0 / test.len() as f64;
    let mut changed = false;
    for position in (0..test.len()).rev() {
        if position < test.len() && rng.gen_bool(p) {
            changed |= test.remove(position) > 0;
        }
    }
    changed
}

fn change_statements(factory: &TestFactory, test: &mut TestCase, rng: &mut ChaCha8Rng) -> bool {
    let p = 1.0 / test.len() as f64;
    let mut changed = false;
    let mut position = 0;
    while position < test.len() {
        if rng.gen_bool(p) {
            let before = test.len();
            changed |= factory.change_statement(test, position, rng);
            // statements inserted for a new argument land before the changed one
            position += test.len() - before;
        }
        position += 1;
    }
    changed
}

fn insert_statements(
    factory: &TestFactory,
    test: &mut TestCase,
    settings: &MutationSettings,
    rng: &mut ChaCha8Rng,
) -> bool {
    let alpha = settings.statement_insertion_probability;
    let mut exponent = 1;
    let mut changed = false;
    while test.len() < settings.max_test_length && rng.gen_bool(alpha.powi(exponent)) {
        let last = test.len();
        if factory.insert_random_statement(test, last, rng).is_ok() {
            changed = true;
        }
        exponent += 1;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subject::cluster::{Parameter, TestCluster};
    use crate::testcase::FactorySettings;
    use crate::types::TypeDescriptor;
    use crate::value::pool::PoolSettings;
    use crate::value::ValuePool;
    use rand::SeedableRng;

    fn factory() -> TestFactory {
        let mut cluster = TestCluster::new();
        cluster.add_constructor("Queue", vec![Parameter::new("capacity", TypeDescriptor::Int)]);
        cluster.add_method(
            "Queue",
            "push",
            vec![Parameter::new("item", TypeDescriptor::Str)],
            TypeDescriptor::Bool,
        );
        cluster.add_function("score", vec![Parameter::new("t", TypeDescriptor::Table)], TypeDescriptor::Float);
        TestFactory::new(cluster, ValuePool::new(PoolSettings::default()), FactorySettings::default())
    }

    #[test]
    fn test_variation_keeps_references_valid() {
        let factory = factory();
        let settings = MutationSettings::from(&SessionConfig::default());
        let mut rng = ChaCha8Rng::seed_from_u64(99);
        let mut population: Vec<TestCase> = (0..10).map(|_| factory.random_test(&mut rng)).collect();
        for round in 0..50 {
            let i = round % population.len();
            let j = (round * 7 + 3) % population.len();
            let (mut a, mut b) = crossover(&population[i], &population[j], &mut rng);
            mutate(&factory, &mut a, &settings, &mut rng);
            mutate(&factory, &mut b, &settings, &mut rng);
            for child in [&a, &b] {
                assert!(child.validate().is_ok(), "{}", child);
                assert!(child.len() <= settings.max_test_length);
            }
            population[i] = a;
            population[j] = b;
        }
    }

    #[test]
    fn test_short_parents_pass_through() {
        let factory = factory();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let a = TestCase::new();
        let b = factory.random_test(&mut rng);
        let (c, d) = crossover(&a, &b, &mut rng);
        assert_eq!(c, a);
        assert_eq!(d, b);
    }
}
