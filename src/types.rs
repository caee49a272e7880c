//! Type descriptors for generated values
//!
//! Subjects describe their parameters and return values with a tagged-variant
//! [`TypeDescriptor`] rather than runtime reflection. The value pool answers the
//! capability query "can a compatible value be produced for this descriptor".

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::structured::tensor::ElementType;

/// Declared or inferred type of a parameter, field or return slot
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeDescriptor {
    /// Unit / no value
    None,
    Bool,
    Int,
    Float,
    Str,
    Bytes,
    /// Homogeneous collection of a primitive element type
    List(Box<TypeDescriptor>),
    /// Enumeration with a fixed set of named variants
    Enum { name: String, variants: Vec<String> },
    /// Tabular row/column value
    Table,
    /// Multi-dimensional numeric array, optionally pinned to an element type
    Tensor { dtype: Option<ElementType> },
    /// Instance of a subject-defined type, constructed through the test cluster
    Object(String),
    /// Accepts any value
    Any,
}

impl TypeDescriptor {
    pub fn list_of(element: TypeDescriptor) -> Self {
        TypeDescriptor::List(Box::new(element))
    }

    pub fn object(name: impl Into<String>) -> Self {
        TypeDescriptor::Object(name.into())
    }

    pub fn tensor() -> Self {
        TypeDescriptor::Tensor { dtype: None }
    }

    /// True for kinds the value pool draws directly, without a constructor call
    pub fn is_primitive(&self) -> bool {
        match self {
            TypeDescriptor::Bool
            | TypeDescriptor::Int
            | TypeDescriptor::Float
            | TypeDescriptor::Str
            | TypeDescriptor::Bytes
            | TypeDescriptor::None => true,
            TypeDescriptor::List(element) => element.is_primitive(),
            _ => false,
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, TypeDescriptor::Table | TypeDescriptor::Tensor { .. })
    }

    pub fn is_object(&self) -> bool {
        matches!(self, TypeDescriptor::Object(_))
    }

    /// Whether a value produced with type `self` may be passed where `required` is expected.
    ///
    /// Integers widen to floats, `Any` accepts everything, and an untyped tensor
    /// slot accepts tensors of any element type.
    pub fn is_assignable_to(&self, required: &TypeDescriptor) -> bool {
        if self == required {
            return true;
        }
        match (self, required) {
            (_, TypeDescriptor::Any) => !matches!(self, TypeDescriptor::None),
            (TypeDescriptor::Int, TypeDescriptor::Float) => true,
            (TypeDescriptor::Tensor { .. }, TypeDescriptor::Tensor { dtype: None }) => true,
            // an empty list carries no element type
            (TypeDescriptor::List(have), TypeDescriptor::List(_)) if **have == TypeDescriptor::Any => true,
            (TypeDescriptor::List(have), TypeDescriptor::List(want)) => have.is_assignable_to(want),
            (TypeDescriptor::Enum { name: a, .. }, TypeDescriptor::Enum { name: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescriptor::None => write!(f, "none"),
            TypeDescriptor::Bool => write!(f, "bool"),
            TypeDescriptor::Int => write!(f, "int"),
            TypeDescriptor::Float => write!(f, "float"),
            TypeDescriptor::Str => write!(f, "str"),
            TypeDescriptor::Bytes => write!(f, "bytes"),
            TypeDescriptor::List(element) => write!(f, "list[{}]", element),
            TypeDescriptor::Enum { name, .. } => write!(f, "enum {}", name),
            TypeDescriptor::Table => write!(f, "table"),
            TypeDescriptor::Tensor { dtype: Some(dtype) } => write!(f, "tensor[{}]", dtype),
            TypeDescriptor::Tensor { dtype: None } => write!(f, "tensor"),
            TypeDescriptor::Object(name) => write!(f, "{}", name),
            TypeDescriptor::Any => write!(f, "any"),
        }
    }
}
