//! Fitness evaluation
//!
//! Every target gets a fitness in `[0, ∞]` where 0 means covered. For an
//! uncovered target the value combines the approach level (how many control
//! dependencies away from the target the run stayed) with the normalized
//! branch distance at the point where it diverged:
//!
//! ```text
//! fitness = approach_weight * approach_level + branch_weight * norm(branch_distance)
//! norm(x) = x / (x + 1),  norm(∞) = 1
//! ```
//!
//! A timed-out run scores `∞` on every target its partial trace did not cover.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use crate::execution::ExecutionResult;
use crate::subject::targets::{CoverageTarget, TargetId, TargetKind, TargetSet};
use crate::subject::tracer::ExecutionTrace;
use crate::testcase::TestCase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Aggregation {
    /// Sum over outstanding targets
    Sum,
    /// Non-dominated sorting; the front index is the selection key
    Pareto,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitnessPolicy {
    pub approach_weight: f64,
    pub branch_weight: f64,
    pub aggregation: Aggregation,
}

impl Default for FitnessPolicy {
    fn default() -> Self {
        Self {
            approach_weight: 1.0,
            branch_weight: 1.0,
            aggregation: Aggregation::Sum,
        }
    }
}

impl FitnessPolicy {
    pub fn validate(&self) -> Result<(), String> {
        for (name, weight) in [("approach_weight", self.approach_weight), ("branch_weight", self.branch_weight)] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(format!("{} must be finite and non-negative, got {}", name, weight));
            }
        }
        if self.approach_weight == 0.0 && self.branch_weight == 0.0 {
            return Err("approach_weight and branch_weight cannot both be zero".to_string());
        }
        Ok(())
    }
}

pub fn normalize(distance: f64) -> f64 {
    if distance.is_infinite() {
        1.0
    } else {
        distance / (distance + 1.0)
    }
}

/// Fitness of one test case per target
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitnessVector {
    values: BTreeMap<TargetId, f64>,
}

impl FitnessVector {
    pub fn get(&self, target: TargetId) -> f64 {
        self.values.get(&target).copied().unwrap_or(f64::INFINITY)
    }

    pub fn insert(&mut self, target: TargetId, fitness: f64) {
        self.values.insert(target, fitness);
    }

    pub fn iter(&self) -> impl Iterator<Item = (TargetId, f64)> + '_ {
        self.values.iter().map(|(id, f)| (*id, *f))
    }

    pub fn covered(&self) -> impl Iterator<Item = TargetId> + '_ {
        self.values.iter().filter(|(_, f)| **f == 0.0).map(|(id, _)| *id)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Sum over `outstanding`
    pub fn sum_over(&self, outstanding: &BTreeSet<TargetId>) -> f64 {
        outstanding.iter().map(|id| self.get(*id)).sum()
    }

    /// At least as good on every outstanding target and better on one
    pub fn dominates(&self, other: &FitnessVector, outstanding: &BTreeSet<TargetId>) -> bool {
        let mut better = false;
        for id in outstanding {
            let (mine, theirs) = (self.get(*id), other.get(*id));
            if mine > theirs {
                return false;
            }
            if mine < theirs {
                better = true;
            }
        }
        better
    }
}

#[derive(Debug, Clone)]
pub struct FitnessEvaluator {
    policy: FitnessPolicy,
}

impl FitnessEvaluator {
    pub fn new(policy: FitnessPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &FitnessPolicy {
        &self.policy
    }

    pub fn score(&self, targets: &TargetSet, result: &ExecutionResult) -> FitnessVector {
        let mut vector = FitnessVector::default();
        for target in targets.iter() {
            let fitness = if result.is_timeout() && !result.trace.is_covered(target) {
                f64::INFINITY
            } else {
                let (approach, distance) = self.distance(targets, target, &result.trace);
                self.combine(approach, distance)
            };
            vector.insert(target.id, fitness);
        }
        vector
    }

    /// Score `result` and cache the vector on `test`
    pub fn assign(&self, test: &mut TestCase, targets: &TargetSet, result: &ExecutionResult) -> FitnessVector {
        let vector = self.score(targets, result);
        test.set_fitness(vector.clone());
        vector
    }

    fn combine(&self, approach: usize, distance: f64) -> f64 {
        if approach == 0 && distance == 0.0 {
            return 0.0;
        }
        self.policy.approach_weight * approach as f64 + self.policy.branch_weight * normalize(distance)
    }

    /// Approach level and branch distance for `target`
    pub fn distance(&self, targets: &TargetSet, target: &CoverageTarget, trace: &ExecutionTrace) -> (usize, f64) {
        let mut approach = 0;
        let mut current = target;
        loop {
            if trace.is_covered(current) {
                return (approach, 0.0);
            }
            if let TargetKind::Branch { predicate, outcome } = current.kind {
                if let Some(distance) = trace.distance(predicate, outcome) {
                    return (approach, distance);
                }
            }
            match current.control_dependency.and_then(|id| targets.get(id)) {
                Some(dependency) => {
                    approach += 1;
                    current = dependency;
                }
                None => return (approach + 1, f64::INFINITY),
            }
        }
    }

    /// Selection key per individual: the outstanding sum, or the Pareto front index
    pub fn selection_keys(&self, vectors: &[&FitnessVector], outstanding: &BTreeSet<TargetId>) -> Vec<f64> {
        match self.policy.aggregation {
            Aggregation::Sum => vectors.iter().map(|v| v.sum_over(outstanding)).collect(),
            Aggregation::Pareto => nondominated_sort(vectors, outstanding)
                .into_iter()
                .map(|front| front as f64)
                .collect(),
        }
    }
}

/// Front index of each vector, 0 for the non-dominated front
pub fn nondominated_sort(vectors: &[&FitnessVector], outstanding: &BTreeSet<TargetId>) -> Vec<usize> {
    let n = vectors.len();
    let mut dominated_by = vec![0usize; n];
    let mut dominates: Vec<Vec<usize>> = vec![Vec::new(); n];
    for i in 0..n {
        for j in 0..n {
            if i != j && vectors[i].dominates(vectors[j], outstanding) {
                dominates[i].push(j);
                dominated_by[j] += 1;
            }
        }
    }
    let mut fronts = vec![0usize; n];
    let mut current: Vec<usize> = (0..n).filter(|i| dominated_by[*i] == 0).collect();
    let mut level = 0;
    while !current.is_empty() {
        let mut next = Vec::new();
        for &i in &current {
            fronts[i] = level;
            for &j in &dominates[i] {
                dominated_by[j] -= 1;
                if dominated_by[j] == 0 {
                    next.push(j);
                }
            }
        }
        level += 1;
        current = next;
    }
    fronts
}

/// Order on (key, length), lower first
pub fn compare_keys(a: (f64, usize), b: (f64, usize)) -> Ordering {
    a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal).then(a.1.cmp(&b.1))
}
