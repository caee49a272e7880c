use serde::{Deserialize, Serialize};
use std::fmt;

use crate::structured::table::Table;
use crate::structured::tensor::Tensor;
use crate::subject::cluster::CallableId;
use crate::types::TypeDescriptor;
use crate::value::Value;

/// Reference to the output of an earlier statement, by position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VarRef(pub usize);

impl fmt::Display for VarRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StatementKind {
    /// Literal primitive value, including primitive lists
    Primitive(Value),
    Enum { type_name: String, variant: String },
    /// List assembled from earlier variables
    Collection { element: TypeDescriptor, items: Vec<VarRef> },
    Constructor { callable: CallableId, args: Vec<VarRef> },
    Function { callable: CallableId, args: Vec<VarRef> },
    Method { callable: CallableId, receiver: VarRef, args: Vec<VarRef> },
    FieldAssign { receiver: VarRef, field: String, value: VarRef },
    Tensor(Tensor),
    Table(Table),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub kind: StatementKind,
    pub ret_type: TypeDescriptor,
}

impl Statement {
    pub fn new(kind: StatementKind, ret_type: TypeDescriptor) -> Self {
        Self { kind, ret_type }
    }

    /// Literal statement for a value produced by the pool for a slot of type `ty`
    pub fn literal(value: Value, ty: &TypeDescriptor) -> Self {
        match value {
            Value::Table(table) => Self::new(StatementKind::Table(table), TypeDescriptor::Table),
            Value::Tensor(tensor) => Self::new(StatementKind::Tensor(tensor), ty.clone()),
            Value::Enum { type_name, variant } => Self::new(StatementKind::Enum { type_name, variant }, ty.clone()),
            value => Self::new(StatementKind::Primitive(value), ty.clone()),
        }
    }

    pub fn references(&self) -> Vec<VarRef> {
        match &self.kind {
            StatementKind::Collection { items, .. } => items.clone(),
            StatementKind::Constructor { args, .. } | StatementKind::Function { args, .. } => args.clone(),
            StatementKind::Method { receiver, args, .. } => {
                let mut refs = vec![*receiver];
                refs.extend(args.iter().copied());
                refs
            }
            StatementKind::FieldAssign { receiver, value, .. } => vec![*receiver, *value],
            _ => Vec::new(),
        }
    }

    pub fn references_mut(&mut self) -> Vec<&mut VarRef> {
        match &mut self.kind {
            StatementKind::Collection { items, .. } => items.iter_mut().collect(),
            StatementKind::Constructor { args, .. } | StatementKind::Function { args, .. } => {
                args.iter_mut().collect()
            }
            StatementKind::Method { receiver, args, .. } => {
                let mut refs = vec![receiver];
                refs.extend(args.iter_mut());
                refs
            }
            StatementKind::FieldAssign { receiver, value, .. } => vec![receiver, value],
            _ => Vec::new(),
        }
    }

    pub fn references_var(&self, var: VarRef) -> bool {
        self.references().contains(&var)
    }

    pub fn callable(&self) -> Option<CallableId> {
        match &self.kind {
            StatementKind::Constructor { callable, .. }
            | StatementKind::Function { callable, .. }
            | StatementKind::Method { callable, .. } => Some(*callable),
            _ => None,
        }
    }

    pub fn is_call(&self) -> bool {
        self.callable().is_some()
    }

    /// Embedded literal, for statements that carry one
    pub fn literal_value(&self) -> Option<Value> {
        match &self.kind {
            StatementKind::Primitive(value) => Some(value.clone()),
            StatementKind::Enum { type_name, variant } => Some(Value::Enum {
                type_name: type_name.clone(),
                variant: variant.clone(),
            }),
            StatementKind::Tensor(tensor) => Some(Value::Tensor(tensor.clone())),
            StatementKind::Table(table) => Some(Value::Table(table.clone())),
            _ => None,
        }
    }
}

fn join(refs: &[VarRef]) -> String {
    refs.iter().map(|r| r.to_string()).collect::<Vec<_>>().join(", ")
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            StatementKind::Primitive(value) => write!(f, "{}", value),
            StatementKind::Enum { type_name, variant } => write!(f, "{}.{}", type_name, variant),
            StatementKind::Collection { items, .. } => write!(f, "[{}]", join(items)),
            StatementKind::Constructor { callable, args } | StatementKind::Function { callable, args } => {
                write!(f, "{}({})", callable, join(args))
            }
            StatementKind::Method { callable, receiver, args } => {
                write!(f, "{}.{}({})", receiver, callable, join(args))
            }
            StatementKind::FieldAssign { receiver, field, value } => write!(f, "{}.{} = {}", receiver, field, value),
            StatementKind::Tensor(tensor) => write!(f, "{}", tensor),
            StatementKind::Table(table) => write!(f, "{}", table),
        }
    }
}
