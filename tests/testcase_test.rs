//! Test case structure under variation: crossover and mutation must keep
//! every reference pointing at an earlier statement.

mod common;

use proptest::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use common::{Stack, TableSum};
use searchgen::engine::operators::{crossover, mutate, MutationSettings};
use searchgen::testcase::{FactorySettings, TestFactory};
use searchgen::value::pool::PoolSettings;
use searchgen::{SessionConfig, Subject, TestCase, ValuePool};

fn factory(subject: &dyn Subject) -> TestFactory {
    TestFactory::new(
        subject.cluster().clone(),
        ValuePool::new(PoolSettings::default()),
        FactorySettings::default(),
    )
}

fn assert_well_typed(test: &TestCase) {
    assert!(test.validate().is_ok(), "invalid test:\n{}", test);
    for (position, statement) in test.statements().iter().enumerate() {
        for reference in statement.references() {
            assert!(reference.0 < position, "{} used at {}:\n{}", reference, position, test);
        }
    }
}

#[test]
fn test_random_tests_respect_length_bounds() {
    let stack = Stack::new();
    let factory = factory(&stack);
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    for _ in 0..100 {
        let test = factory.random_test(&mut rng);
        assert!(!test.is_empty());
        assert!(test.len() <= factory.settings().max_test_length);
        assert_well_typed(&test);
    }
}

#[test]
fn test_removal_keeps_dependents_valid() {
    let stack = Stack::new();
    let factory = factory(&stack);
    let mut rng = ChaCha8Rng::seed_from_u64(5);
    for _ in 0..100 {
        let mut test = factory.random_test(&mut rng);
        while !test.is_empty() {
            let before = test.len();
            let removed = test.remove(0);
            assert!(removed >= 1);
            assert_eq!(test.len(), before - removed);
            assert_well_typed(&test);
        }
    }
}

#[test]
fn test_fingerprint_ignores_cached_fitness() {
    let table = TableSum::new();
    let factory = factory(&table);
    let mut rng = ChaCha8Rng::seed_from_u64(9);
    let test = factory.random_test(&mut rng);
    let mut scored = test.clone();
    scored.set_fitness(Default::default());
    assert_eq!(test.fingerprint(), scored.fingerprint());
    assert_eq!(test, scored);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_variation_preserves_references(seed in any::<u64>(), rounds in 1usize..20) {
        let stack = Stack::new();
        let factory = factory(&stack);
        let settings = MutationSettings::from(&SessionConfig::default());
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let mut a = factory.random_test(&mut rng);
        let mut b = factory.random_test(&mut rng);
        for _ in 0..rounds {
            let (x, y) = crossover(&a, &b, &mut rng);
            a = x;
            b = y;
            mutate(&factory, &mut a, &settings, &mut rng);
            mutate(&factory, &mut b, &settings, &mut rng);
            prop_assert!(a.validate().is_ok());
            prop_assert!(b.validate().is_ok());
            prop_assert!(a.len() <= settings.max_test_length);
            prop_assert!(b.len() <= settings.max_test_length);
        }
    }

    #[test]
    fn prop_crossover_keeps_parents_prefix(seed in any::<u64>()) {
        let table = TableSum::new();
        let factory = factory(&table);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let a = factory.random_test(&mut rng);
        let b = factory.random_test(&mut rng);
        let (x, _) = crossover(&a, &b, &mut rng);
        prop_assert!(x.validate().is_ok());
        if a.len() >= 2 && b.len() >= 2 {
            prop_assert_eq!(x.statement(0), a.statement(0));
        } else {
            prop_assert_eq!(&x, &a);
        }
    }
}
