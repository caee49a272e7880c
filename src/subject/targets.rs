//! Coverage targets and the static target set of a subject

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::cluster::CallableId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetId(pub usize);

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "target#{}", self.0)
    }
}

/// Identifies one instrumented predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PredicateId(pub usize);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub module: String,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetKind {
    /// The callable was invoked
    Entry { callable: CallableId },
    /// The predicate evaluated to `outcome`
    Branch { predicate: PredicateId, outcome: bool },
    Line { line: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageTarget {
    pub id: TargetId,
    pub kind: TargetKind,
    pub location: Location,
    /// Target that must be covered before this one becomes reachable
    pub control_dependency: Option<TargetId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchTargets {
    pub predicate: PredicateId,
    pub on_true: TargetId,
    pub on_false: TargetId,
}

/// Immutable set of targets, fixed for a session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetSet {
    targets: Vec<CoverageTarget>,
    branches: BTreeMap<(PredicateId, bool), TargetId>,
}

impl TargetSet {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn get(&self, id: TargetId) -> Option<&CoverageTarget> {
        self.targets.get(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CoverageTarget> {
        self.targets.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = TargetId> + '_ {
        self.targets.iter().map(|t| t.id)
    }

    pub fn branch(&self, predicate: PredicateId, outcome: bool) -> Option<TargetId> {
        self.branches.get(&(predicate, outcome)).copied()
    }

    /// Callable whose entry target roots the dependency chain of `id`
    pub fn owner(&self, id: TargetId) -> Option<CallableId> {
        let mut current = self.get(id)?;
        loop {
            if let TargetKind::Entry { callable } = current.kind {
                return Some(callable);
            }
            current = self.get(current.control_dependency?)?;
        }
    }

    /// Targets attributed to each callable
    pub fn by_owner(&self) -> BTreeMap<CallableId, Vec<TargetId>> {
        let mut owners: BTreeMap<CallableId, Vec<TargetId>> = BTreeMap::new();
        for target in &self.targets {
            if let Some(callable) = self.owner(target.id) {
                owners.entry(callable).or_default().push(target.id);
            }
        }
        owners
    }
}

/// Assigns target ids in creation order.
///
/// A dependency must name a target created earlier, which keeps the
/// dependency graph acyclic.
#[derive(Debug, Default)]
pub struct TargetSetBuilder {
    module: String,
    set: TargetSet,
    next_predicate: usize,
}

impl TargetSetBuilder {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            ..Self::default()
        }
    }

    fn push(&mut self, kind: TargetKind, line: u32, dependency: Option<TargetId>) -> TargetId {
        let id = TargetId(self.set.targets.len());
        let control_dependency = dependency.filter(|d| d.0 < id.0);
        if control_dependency != dependency {
            log::warn!("Ignoring forward control dependency of {}", id);
        }
        self.set.targets.push(CoverageTarget {
            id,
            kind,
            location: Location {
                module: self.module.clone(),
                line,
            },
            control_dependency,
        });
        id
    }

    pub fn entry(&mut self, callable: CallableId, line: u32) -> TargetId {
        self.push(TargetKind::Entry { callable }, line, None)
    }

    /// Register a predicate with one target per outcome
    pub fn branch(&mut self, line: u32, dependency: Option<TargetId>) -> BranchTargets {
        let predicate = PredicateId(self.next_predicate);
        self.next_predicate += 1;
        let on_true = self.push(TargetKind::Branch { predicate, outcome: true }, line, dependency);
        let on_false = self.push(TargetKind::Branch { predicate, outcome: false }, line, dependency);
        self.set.branches.insert((predicate, true), on_true);
        self.set.branches.insert((predicate, false), on_false);
        BranchTargets {
            predicate,
            on_true,
            on_false,
        }
    }

    pub fn line(&mut self, line: u32, dependency: Option<TargetId>) -> TargetId {
        self.push(TargetKind::Line { line }, line, dependency)
    }

    pub fn build(self) -> TargetSet {
        self.set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_follow_creation_order() {
        let mut builder = TargetSetBuilder::new("demo");
        let entry = builder.entry(CallableId(0), 1);
        let branch = builder.branch(2, Some(entry));
        let line = builder.line(3, Some(branch.on_true));
        let set = builder.build();
        assert_eq!(set.len(), 4);
        assert_eq!(entry, TargetId(0));
        assert_eq!(branch.on_false, TargetId(2));
        assert_eq!(set.branch(branch.predicate, true), Some(branch.on_true));
        assert_eq!(set.get(line).and_then(|t| t.control_dependency), Some(branch.on_true));
    }

    #[test]
    fn test_owner_follows_dependency_chain() {
        let mut builder = TargetSetBuilder::new("demo");
        let first = builder.entry(CallableId(4), 1);
        let branch = builder.branch(2, Some(first));
        let nested = builder.line(3, Some(branch.on_false));
        let orphan = builder.line(9, None);
        let set = builder.build();
        assert_eq!(set.owner(nested), Some(CallableId(4)));
        assert_eq!(set.owner(orphan), None);
        assert_eq!(set.by_owner()[&CallableId(4)].len(), 4);
    }

    #[test]
    fn test_forward_dependency_dropped() {
        let mut builder = TargetSetBuilder::new("demo");
        let id = builder.line(1, Some(TargetId(5)));
        let set = builder.build();
        assert_eq!(set.get(id).unwrap().control_dependency, None);
    }
}
