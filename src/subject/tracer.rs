//! Execution tracing: coverage and branch distances reported by the subject
//!
//! A subject reports progress through an [`ExecutionTracer`] handed to every
//! invocation. Entry and line targets are recorded as covered; predicates
//! report the distance to their true and false outcomes, and the trace keeps
//! the minimum seen per predicate. The comparison helpers compute those
//! distances for the common relational operators and return the outcome, so
//! instrumenting `if a > b` reads as `if tracer.gt(pred, a, b)`.
//!
//! The trace lives behind a shared lock. When a run times out the sandbox seals
//! the trace, and any write the runaway thread makes afterwards is dropped.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use super::targets::{CoverageTarget, PredicateId, TargetId, TargetKind};

/// Distance constant added when a strict comparison is off by exactly zero
pub const K: f64 = 1.0;

/// Distance of the outcome not taken; it must stay positive
fn failing(distance: f64) -> f64 {
    if distance > 0.0 {
        distance
    } else {
        K
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTrace {
    covered: BTreeSet<TargetId>,
    true_distances: BTreeMap<PredicateId, f64>,
    false_distances: BTreeMap<PredicateId, f64>,
    evaluations: BTreeMap<PredicateId, usize>,
    #[serde(skip)]
    sealed: bool,
}

impl ExecutionTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn mark(&mut self, target: TargetId) {
        if !self.sealed {
            self.covered.insert(target);
        }
    }

    pub fn record_branch(&mut self, predicate: PredicateId, d_true: f64, d_false: f64) {
        if self.sealed {
            return;
        }
        let t = self.true_distances.entry(predicate).or_insert(f64::INFINITY);
        *t = t.min(d_true);
        let f = self.false_distances.entry(predicate).or_insert(f64::INFINITY);
        *f = f.min(d_false);
        *self.evaluations.entry(predicate).or_insert(0) += 1;
    }

    /// Minimum distance to `outcome`, if the predicate was evaluated at all
    pub fn distance(&self, predicate: PredicateId, outcome: bool) -> Option<f64> {
        let map = if outcome { &self.true_distances } else { &self.false_distances };
        map.get(&predicate).copied()
    }

    pub fn evaluations(&self, predicate: PredicateId) -> usize {
        self.evaluations.get(&predicate).copied().unwrap_or(0)
    }

    pub fn covered_ids(&self) -> &BTreeSet<TargetId> {
        &self.covered
    }

    pub fn is_covered(&self, target: &CoverageTarget) -> bool {
        match target.kind {
            TargetKind::Branch { predicate, outcome } => self.distance(predicate, outcome) == Some(0.0),
            TargetKind::Entry { .. } | TargetKind::Line { .. } => self.covered.contains(&target.id),
        }
    }
}

/// Handle through which a subject reports coverage during one run
#[derive(Debug, Clone, Default)]
pub struct ExecutionTracer {
    trace: Arc<Mutex<ExecutionTrace>>,
}

impl ExecutionTracer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ExecutionTrace> {
        self.trace.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn enter(&self, target: TargetId) {
        self.lock().mark(target);
    }

    pub fn line(&self, target: TargetId) {
        self.lock().mark(target);
    }

    /// Record a predicate evaluation and return its outcome
    pub fn branch(&self, predicate: PredicateId, outcome: bool, d_true: f64, d_false: f64) -> bool {
        let (d_true, d_false) = if outcome { (0.0, failing(d_false)) } else { (failing(d_true), 0.0) };
        self.lock().record_branch(predicate, d_true, d_false);
        outcome
    }

    pub fn lt(&self, predicate: PredicateId, a: f64, b: f64) -> bool {
        self.branch(predicate, a < b, a - b + K, b - a)
    }

    pub fn le(&self, predicate: PredicateId, a: f64, b: f64) -> bool {
        self.branch(predicate, a <= b, a - b, b - a + K)
    }

    pub fn gt(&self, predicate: PredicateId, a: f64, b: f64) -> bool {
        self.lt(predicate, b, a)
    }

    pub fn ge(&self, predicate: PredicateId, a: f64, b: f64) -> bool {
        self.le(predicate, b, a)
    }

    pub fn eq(&self, predicate: PredicateId, a: f64, b: f64) -> bool {
        self.branch(predicate, a == b, (a - b).abs(), K)
    }

    pub fn ne(&self, predicate: PredicateId, a: f64, b: f64) -> bool {
        self.branch(predicate, a != b, K, (a - b).abs())
    }

    pub fn str_eq(&self, predicate: PredicateId, a: &str, b: &str) -> bool {
        self.branch(predicate, a == b, levenshtein(a, b) as f64, K)
    }

    pub fn is_true(&self, predicate: PredicateId, value: bool) -> bool {
        self.branch(predicate, value, K, K)
    }

    /// Copy of the trace as it stands
    pub fn snapshot(&self) -> ExecutionTrace {
        self.lock().clone()
    }

    /// Stop accepting writes and return the final trace
    pub fn seal(&self) -> ExecutionTrace {
        let mut trace = self.lock();
        trace.seal();
        trace.clone()
    }
}

/// Edit distance between two strings, counted in chars
pub fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];
    for (i, ca) in a.chars().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != *cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    const P: PredicateId = PredicateId(0);

    #[test]
    fn test_gt_distances() {
        let tracer = ExecutionTracer::new();
        assert!(!tracer.gt(P, 3.0, 10.0));
        let trace = tracer.snapshot();
        assert_eq!(trace.distance(P, true), Some(8.0));
        assert_eq!(trace.distance(P, false), Some(0.0));

        assert!(tracer.gt(P, 10.5, 10.0));
        let trace = tracer.snapshot();
        assert_eq!(trace.distance(P, true), Some(0.0));
        assert_eq!(trace.evaluations(P), 2);
    }

    #[test]
    fn test_boundary_gets_constant() {
        let tracer = ExecutionTracer::new();
        tracer.gt(P, 10.0, 10.0);
        assert_eq!(tracer.snapshot().distance(P, true), Some(K));
    }

    #[test]
    fn test_fractional_distances_keep_their_gradient() {
        let tracer = ExecutionTracer::new();
        assert!(!tracer.eq(P, 0.25, 0.5));
        assert_eq!(tracer.snapshot().distance(P, true), Some(0.25));
        tracer.eq(P, 0.4, 0.5);
        assert!((tracer.snapshot().distance(P, true).unwrap() - 0.1).abs() < 1e-12);

        let tracer = ExecutionTracer::new();
        assert!(tracer.ne(P, 0.5, 0.75));
        assert_eq!(tracer.snapshot().distance(P, false), Some(0.25));

        let tracer = ExecutionTracer::new();
        assert!(!tracer.ne(P, 2.0, 2.0));
        assert_eq!(tracer.snapshot().distance(P, true), Some(K));
    }

    #[test]
    fn test_minimum_distance_is_kept() {
        let tracer = ExecutionTracer::new();
        tracer.eq(P, 1.0, 9.0);
        tracer.eq(P, 7.0, 9.0);
        tracer.eq(P, 0.0, 9.0);
        assert_eq!(tracer.snapshot().distance(P, true), Some(2.0));
    }

    #[test]
    fn test_string_equality() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        let tracer = ExecutionTracer::new();
        assert!(!tracer.str_eq(P, "abd", "abc"));
        assert_eq!(tracer.snapshot().distance(P, true), Some(1.0));
    }

    #[test]
    fn test_sealed_trace_ignores_writes() {
        let tracer = ExecutionTracer::new();
        tracer.enter(TargetId(0));
        let sealed = tracer.seal();
        tracer.enter(TargetId(1));
        tracer.is_true(P, true);
        let after = tracer.snapshot();
        assert_eq!(sealed.covered_ids().len(), 1);
        assert_eq!(after.covered_ids().len(), 1);
        assert_eq!(after.distance(P, true), None);
    }
}
