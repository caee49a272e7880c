//! Test cluster: the accessible objects of a subject
//!
//! The cluster lists every callable a generated test may invoke, together with
//! the fields and enum types the test factory needs to build arguments and
//! modify objects. Generators (callables producing a type) and modifiers
//! (methods of a type) are derived from it on demand.

use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::types::TypeDescriptor;

/// Selection weight of a callable whose targets are all covered
pub const DORMANT_WEIGHT: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallableId(pub usize);

impl fmt::Display for CallableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "callable#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallableKind {
    Function,
    /// Produces an instance of `owner`
    Constructor { owner: String },
    /// Called on a receiver of type `owner`
    Method { owner: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub ty: TypeDescriptor,
}

impl Parameter {
    pub fn new(name: impl Into<String>, ty: TypeDescriptor) -> Self {
        Self { name: name.into(), ty }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Callable {
    pub id: CallableId,
    pub name: String,
    pub kind: CallableKind,
    pub parameters: Vec<Parameter>,
    pub returns: TypeDescriptor,
}

impl Callable {
    pub fn is_method(&self) -> bool {
        matches!(self.kind, CallableKind::Method { .. })
    }

    pub fn owner(&self) -> Option<&str> {
        match &self.kind {
            CallableKind::Function => None,
            CallableKind::Constructor { owner } | CallableKind::Method { owner } => Some(owner),
        }
    }

    /// Qualified name, `Owner.name` for methods
    pub fn qualified_name(&self) -> String {
        match &self.kind {
            CallableKind::Method { owner } => format!("{}.{}", owner, self.name),
            _ => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestCluster {
    callables: Vec<Callable>,
    fields: BTreeMap<String, Vec<Parameter>>,
    enums: Vec<TypeDescriptor>,
}

impl TestCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, name: &str, kind: CallableKind, parameters: Vec<Parameter>, returns: TypeDescriptor) -> CallableId {
        let id = CallableId(self.callables.len());
        self.callables.push(Callable {
            id,
            name: name.to_string(),
            kind,
            parameters,
            returns,
        });
        id
    }

    pub fn add_function(&mut self, name: &str, parameters: Vec<Parameter>, returns: TypeDescriptor) -> CallableId {
        self.push(name, CallableKind::Function, parameters, returns)
    }

    pub fn add_constructor(&mut self, owner: &str, parameters: Vec<Parameter>) -> CallableId {
        let kind = CallableKind::Constructor { owner: owner.to_string() };
        self.push(owner, kind, parameters, TypeDescriptor::object(owner))
    }

    pub fn add_method(
        &mut self,
        owner: &str,
        name: &str,
        parameters: Vec<Parameter>,
        returns: TypeDescriptor,
    ) -> CallableId {
        let kind = CallableKind::Method { owner: owner.to_string() };
        self.push(name, kind, parameters, returns)
    }

    pub fn add_field(&mut self, owner: &str, name: &str, ty: TypeDescriptor) {
        self.fields
            .entry(owner.to_string())
            .or_default()
            .push(Parameter::new(name, ty));
    }

    pub fn add_enum(&mut self, name: &str, variants: &[&str]) -> TypeDescriptor {
        let ty = TypeDescriptor::Enum {
            name: name.to_string(),
            variants: variants.iter().map(|v| v.to_string()).collect(),
        };
        self.enums.push(ty.clone());
        ty
    }

    pub fn is_empty(&self) -> bool {
        self.callables.is_empty()
    }

    pub fn len(&self) -> usize {
        self.callables.len()
    }

    pub fn callables(&self) -> &[Callable] {
        &self.callables
    }

    pub fn callable(&self, id: CallableId) -> Option<&Callable> {
        self.callables.get(id.0)
    }

    pub fn enums(&self) -> &[TypeDescriptor] {
        &self.enums
    }

    /// Full enum descriptor for a type name, including its variants
    pub fn enum_type(&self, name: &str) -> Option<&TypeDescriptor> {
        self.enums
            .iter()
            .find(|ty| matches!(ty, TypeDescriptor::Enum { name: n, .. } if n == name))
    }

    pub fn fields_of(&self, owner: &str) -> &[Parameter] {
        self.fields.get(owner).map(|f| f.as_slice()).unwrap_or(&[])
    }

    /// Callables whose return value can fill a slot of type `ty`
    pub fn generators_for(&self, ty: &TypeDescriptor) -> Vec<&Callable> {
        self.callables
            .iter()
            .filter(|c| c.returns != TypeDescriptor::None && c.returns.is_assignable_to(ty))
            .collect()
    }

    /// Methods callable on a receiver of type `owner`
    pub fn modifiers_for(&self, owner: &str) -> Vec<&Callable> {
        self.callables
            .iter()
            .filter(|c| matches!(&c.kind, CallableKind::Method { owner: o } if o == owner))
            .collect()
    }

    /// Pick a callable under test, weighting down the ones in `dormant`
    pub fn random_accessible(&self, rng: &mut ChaCha8Rng, dormant: &BTreeSet<CallableId>) -> Option<&Callable> {
        if dormant.is_empty() {
            return self.callables.choose(rng);
        }
        let weights: Vec<f64> = self
            .callables
            .iter()
            .map(|c| if dormant.contains(&c.id) { DORMANT_WEIGHT } else { 1.0 })
            .collect();
        let index = WeightedIndex::new(&weights).ok()?;
        self.callables.get(index.sample(rng))
    }

    pub fn random_call_for(&self, ty: &TypeDescriptor, rng: &mut ChaCha8Rng) -> Option<&Callable> {
        self.generators_for(ty).choose(rng).copied()
    }
}
