//! Concrete values flowing through generated test cases
//!
//! Values are materialized by primitive statements, returned by subject calls
//! and passed as arguments. Structured values (tables and tensors) carry their
//! own descriptors and well-formedness checks in [`crate::structured`].

pub mod constants;
pub mod float_repr;
pub mod pool;

pub use self::constants::ConstantPool;
pub use self::pool::{SynthesisError, SynthesisResult, ValuePool, ValueStrategy};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::structured::table::Table;
use crate::structured::tensor::Tensor;
use crate::types::TypeDescriptor;

/// Instance of a subject-defined type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Object {
    pub type_name: String,
    pub fields: BTreeMap<String, Value>,
}

impl Object {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }
}

/// A concrete runtime value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(#[serde(with = "crate::value::float_repr")] f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Enum { type_name: String, variant: String },
    Table(Table),
    Tensor(Tensor),
    Object(Object),
}

impl Value {
    /// Descriptor of the type this value inhabits
    pub fn type_descriptor(&self) -> TypeDescriptor {
        match self {
            Value::None => TypeDescriptor::None,
            Value::Bool(_) => TypeDescriptor::Bool,
            Value::Int(_) => TypeDescriptor::Int,
            Value::Float(_) => TypeDescriptor::Float,
            Value::Str(_) => TypeDescriptor::Str,
            Value::Bytes(_) => TypeDescriptor::Bytes,
            Value::List(items) => {
                let element = items
                    .first()
                    .map(Value::type_descriptor)
                    .unwrap_or(TypeDescriptor::Any);
                TypeDescriptor::List(Box::new(element))
            }
            Value::Enum { type_name, .. } => TypeDescriptor::Enum {
                name: type_name.clone(),
                variants: Vec::new(),
            },
            Value::Table(_) => TypeDescriptor::Table,
            Value::Tensor(tensor) => TypeDescriptor::Tensor { dtype: Some(tensor.dtype()) },
            Value::Object(object) => TypeDescriptor::Object(object.type_name.clone()),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    /// Numeric view, widening integers and booleans
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Value::Table(table) => Some(table),
            _ => None,
        }
    }

    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            Value::Tensor(tensor) => Some(tensor),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut Object> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    /// Primitive values can be asserted on directly in generated tests
    pub fn is_primitive(&self) -> bool {
        match self {
            Value::None
            | Value::Bool(_)
            | Value::Int(_)
            | Value::Float(_)
            | Value::Str(_)
            | Value::Bytes(_)
            | Value::Enum { .. } => true,
            Value::List(items) => items.iter().all(Value::is_primitive),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Bytes(b) => write!(f, "b{:?}", b),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Enum { type_name, variant } => write!(f, "{}.{}", type_name, variant),
            Value::Table(table) => write!(f, "{}", table),
            Value::Tensor(tensor) => write!(f, "{}", tensor),
            Value::Object(object) => write!(f, "<{}>", object.type_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_views() {
        assert_eq!(Value::Int(3).as_float(), Some(3.0));
        assert_eq!(Value::Bool(true).as_int(), Some(1));
        assert_eq!(Value::Str("x".into()).as_float(), None);
    }

    #[test]
    fn test_object_fields() {
        let mut object = Object::new("Account").with_field("balance", Value::Int(10));
        object.set_field("owner", Value::Str("ann".into()));
        assert_eq!(object.field("balance"), Some(&Value::Int(10)));
        assert_eq!(
            Value::Object(object).type_descriptor(),
            TypeDescriptor::object("Account")
        );
    }

    #[test]
    fn test_primitive_classification() {
        assert!(Value::List(vec![Value::Int(1), Value::Int(2)]).is_primitive());
        assert!(!Value::Object(Object::new("A")).is_primitive());
    }

    #[test]
    fn test_display_list() {
        let list = Value::List(vec![Value::Int(1), Value::Str("a".into())]);
        assert_eq!(format!("{}", list), "[1, \"a\"]");
    }
}
