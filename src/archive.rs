//! Per-target archive of the best known test cases
//!
//! An entry is only ever replaced by a candidate that strictly dominates it:
//! lower fitness, or equal fitness with fewer statements. Entries are never
//! removed, so coverage reported from the archive can only grow.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::fitness::FitnessVector;
use crate::subject::targets::{TargetId, TargetSet};
use crate::testcase::TestCase;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub target: TargetId,
    #[serde(with = "crate::value::float_repr")]
    pub fitness: f64,
    pub test: TestCase,
    /// Generation in which this entry was committed
    pub generation: u64,
}

impl ArchiveEntry {
    pub fn is_covered(&self) -> bool {
        self.fitness == 0.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct Archive {
    entries: BTreeMap<TargetId, ArchiveEntry>,
}

impl Archive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, target: TargetId) -> Option<&ArchiveEntry> {
        self.entries.get(&target)
    }

    /// Offer `test` for `target`; returns whether the archive changed
    pub fn offer(&mut self, target: TargetId, fitness: f64, test: &TestCase, generation: u64) -> bool {
        if fitness.is_nan() {
            return false;
        }
        let replace = match self.entries.get(&target) {
            None => true,
            Some(current) => {
                fitness < current.fitness || (fitness == current.fitness && test.len() < current.test.len())
            }
        };
        if replace {
            if fitness == 0.0 && self.entries.get(&target).map_or(true, |e| !e.is_covered()) {
                log::debug!("Covered {} in generation {}", target, generation);
            }
            self.entries.insert(
                target,
                ArchiveEntry {
                    target,
                    fitness,
                    test: test.clone(),
                    generation,
                },
            );
        }
        replace
    }

    /// Single-writer aggregation of one generation's scored candidates.
    /// Returns the number of entries improved.
    pub fn commit<'a>(
        &mut self,
        candidates: impl IntoIterator<Item = (&'a TestCase, &'a FitnessVector)>,
        generation: u64,
    ) -> usize {
        let mut improved = 0;
        for (test, vector) in candidates {
            for (target, fitness) in vector.iter() {
                if self.offer(target, fitness, test, generation) {
                    improved += 1;
                }
            }
        }
        improved
    }

    pub fn is_covered(&self, target: TargetId) -> bool {
        self.entries.get(&target).map_or(false, ArchiveEntry::is_covered)
    }

    pub fn covered(&self) -> BTreeSet<TargetId> {
        self.entries.values().filter(|e| e.is_covered()).map(|e| e.target).collect()
    }

    pub fn covered_count(&self) -> usize {
        self.entries.values().filter(|e| e.is_covered()).count()
    }

    /// Targets of `targets` not yet archived at zero
    pub fn outstanding(&self, targets: &TargetSet) -> BTreeSet<TargetId> {
        targets.ids().filter(|id| !self.is_covered(*id)).collect()
    }

    /// Covered fraction of `targets`, in `[0, 1]`
    pub fn coverage(&self, targets: &TargetSet) -> f64 {
        if targets.is_empty() {
            return 0.0;
        }
        let covered = targets.ids().filter(|id| self.is_covered(*id)).count();
        covered as f64 / targets.len() as f64
    }

    pub fn iter(&self) -> impl Iterator<Item = &ArchiveEntry> {
        self.entries.values()
    }

    /// Entries ordered by target id
    pub fn snapshot(&self) -> Vec<ArchiveEntry> {
        self.entries.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testcase::{Statement, StatementKind};
    use crate::types::TypeDescriptor;
    use crate::value::Value;

    fn test_of(len: usize) -> TestCase {
        let mut test = TestCase::new();
        for i in 0..len {
            test.push(Statement::new(StatementKind::Primitive(Value::Int(i as i64)), TypeDescriptor::Int));
        }
        test
    }

    #[test]
    fn test_strict_dominance() {
        let mut archive = Archive::new();
        let t = TargetId(0);
        assert!(archive.offer(t, 0.5, &test_of(3), 0));
        assert!(!archive.offer(t, 0.7, &test_of(1), 1));
        assert!(!archive.offer(t, 0.5, &test_of(3), 1));
        assert!(archive.offer(t, 0.5, &test_of(2), 1));
        assert!(archive.offer(t, 0.0, &test_of(5), 2));
        assert!(!archive.offer(t, f64::NAN, &test_of(1), 3));
        let entry = archive.get(t).unwrap();
        assert_eq!(entry.test.len(), 5);
        assert_eq!(entry.generation, 2);
        assert!(archive.is_covered(t));
    }

    #[test]
    fn test_commit_and_coverage() {
        let mut archive = Archive::new();
        let a = test_of(1);
        let mut va = FitnessVector::default();
        va.insert(TargetId(0), 0.0);
        va.insert(TargetId(1), 2.0);
        let b = test_of(2);
        let mut vb = FitnessVector::default();
        vb.insert(TargetId(0), 0.0);
        vb.insert(TargetId(1), 0.0);
        assert_eq!(archive.commit([(&a, &va), (&b, &vb)], 0), 3);
        assert_eq!(archive.covered_count(), 2);
        assert_eq!(archive.get(TargetId(0)).unwrap().test, a);
    }
}
