//! Value pool: drawing and mutating concrete values
//!
//! The pool draws primitive values from a seeded distribution biased toward
//! boundary constants, and dispatches structured kinds to pluggable
//! [`ValueStrategy`] implementations. Object types are not drawn here: they
//! require constructor statements and object reuse, which the test factory
//! handles with the test case as context.

use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::fmt;

use super::{ConstantPool, Value};
use crate::config::{SessionConfig, SizeBounds};
use crate::structured::table::TableStrategy;
use crate::structured::tensor::TensorStrategy;
use crate::types::TypeDescriptor;

pub type SynthesisResult<T> = Result<T, SynthesisError>;

/// A value or statement could not be produced for a required type
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SynthesisError {
    #[error("No generation strategy for type {0}")]
    NoStrategy(String),

    #[error("Type {0} must be constructed through a statement")]
    RequiresConstruction(String),

    #[error("Recursion limit {depth} reached while constructing {ty}")]
    RecursionLimit { ty: String, depth: usize },

    #[error("Gave up on {ty} after {attempts} attempts")]
    AttemptsExhausted { ty: String, attempts: usize },

    #[error("No accessible object to call")]
    NothingToCall,
}

/// Pluggable generation strategy for a family of types
pub trait ValueStrategy: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    fn handles(&self, ty: &TypeDescriptor) -> bool;

    fn draw(&self, pool: &ValuePool, ty: &TypeDescriptor, rng: &mut ChaCha8Rng) -> SynthesisResult<Value>;

    /// Produce a well-formed variant of `value`
    fn mutate(
        &self,
        pool: &ValuePool,
        value: &Value,
        ty: &TypeDescriptor,
        rng: &mut ChaCha8Rng,
    ) -> SynthesisResult<Value>;
}

/// Generation bounds copied out of the session configuration
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub constant_probability: f64,
    pub max_int: i64,
    pub max_string_length: usize,
    pub max_list_length: usize,
    pub max_delta: i64,
    pub table_rows: SizeBounds,
    pub table_columns: SizeBounds,
    pub tensor_max_rank: usize,
    pub tensor_dim_size: SizeBounds,
}

impl From<&SessionConfig> for PoolSettings {
    fn from(config: &SessionConfig) -> Self {
        Self {
            constant_probability: config.constant_probability,
            max_int: config.max_int,
            max_string_length: config.max_string_length,
            max_list_length: config.max_list_length,
            max_delta: config.max_delta,
            table_rows: config.table_rows,
            table_columns: config.table_columns,
            tensor_max_rank: config.tensor_max_rank.clamp(1, 4),
            tensor_dim_size: config.tensor_dim_size,
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

/// Probability of inserting one more character during string mutation
const STRING_INSERT_PROBABILITY: f64 = 0.5;

#[derive(Debug)]
pub struct ValuePool {
    settings: PoolSettings,
    constants: ConstantPool,
    strategies: Vec<Box<dyn ValueStrategy>>,
}

impl ValuePool {
    /// Pool with the table and tensor strategies registered
    pub fn new(settings: PoolSettings) -> Self {
        let mut pool = Self::primitive_only(settings);
        pool.register(Box::new(TableStrategy::new()));
        pool.register(Box::new(TensorStrategy::new()));
        pool
    }

    pub fn primitive_only(settings: PoolSettings) -> Self {
        Self {
            settings,
            constants: ConstantPool::new(),
            strategies: Vec::new(),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(PoolSettings::from(config))
    }

    pub fn register(&mut self, strategy: Box<dyn ValueStrategy>) {
        log::debug!("Registering value strategy {}", strategy.name());
        self.strategies.push(strategy);
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    pub fn constants(&self) -> &ConstantPool {
        &self.constants
    }

    pub fn seed_constants(&mut self, constants: &[Value]) {
        self.constants.seed(constants);
    }

    fn strategy_for(&self, ty: &TypeDescriptor) -> Option<&dyn ValueStrategy> {
        self.strategies.iter().find(|s| s.handles(ty)).map(|s| s.as_ref())
    }

    /// Capability query: can this pool produce a value of `ty` without a constructor call
    pub fn can_generate(&self, ty: &TypeDescriptor) -> bool {
        match ty {
            TypeDescriptor::Object(_) => false,
            TypeDescriptor::Enum { variants, .. } => !variants.is_empty(),
            TypeDescriptor::List(element) => self.can_generate(element),
            TypeDescriptor::Table | TypeDescriptor::Tensor { .. } => self.strategy_for(ty).is_some(),
            _ => true,
        }
    }

    pub fn draw(&self, ty: &TypeDescriptor, rng: &mut ChaCha8Rng) -> SynthesisResult<Value> {
        match ty {
            TypeDescriptor::None => Ok(Value::None),
            TypeDescriptor::Bool => Ok(Value::Bool(rng.gen_bool(0.5))),
            TypeDescriptor::Int => Ok(Value::Int(self.draw_int(rng))),
            TypeDescriptor::Float => Ok(Value::Float(self.draw_float(rng))),
            TypeDescriptor::Str => Ok(Value::Str(self.draw_string(rng))),
            TypeDescriptor::Bytes => Ok(Value::Bytes(self.draw_bytes(rng))),
            TypeDescriptor::List(element) => {
                let len = rng.gen_range(0..=self.settings.max_list_length);
                let items = (0..len)
                    .map(|_| self.draw(element, rng))
                    .collect::<SynthesisResult<Vec<_>>>()?;
                Ok(Value::List(items))
            }
            TypeDescriptor::Enum { name, variants } => {
                let variant = variants
                    .choose(rng)
                    .ok_or_else(|| SynthesisError::NoStrategy(ty.to_string()))?;
                Ok(Value::Enum {
                    type_name: name.clone(),
                    variant: variant.clone(),
                })
            }
            TypeDescriptor::Any => {
                let kind = [TypeDescriptor::Int, TypeDescriptor::Float, TypeDescriptor::Str, TypeDescriptor::Bool]
                    .choose(rng)
                    .cloned()
                    .unwrap_or(TypeDescriptor::Int);
                self.draw(&kind, rng)
            }
            TypeDescriptor::Table | TypeDescriptor::Tensor { .. } => match self.strategy_for(ty) {
                Some(strategy) => strategy.draw(self, ty, rng),
                None => Err(SynthesisError::NoStrategy(ty.to_string())),
            },
            TypeDescriptor::Object(name) => Err(SynthesisError::RequiresConstruction(name.clone())),
        }
    }

    pub fn draw_int(&self, rng: &mut ChaCha8Rng) -> i64 {
        if rng.gen_bool(self.settings.constant_probability) {
            self.constants.integer(rng)
        } else {
            rng.gen_range(-self.settings.max_int..=self.settings.max_int)
        }
    }

    pub fn draw_float(&self, rng: &mut ChaCha8Rng) -> f64 {
        if rng.gen_bool(self.settings.constant_probability) {
            self.constants.float(rng)
        } else {
            let bound = self.settings.max_int as f64;
            rng.gen_range(-bound..=bound)
        }
    }

    pub fn draw_string(&self, rng: &mut ChaCha8Rng) -> String {
        if rng.gen_bool(self.settings.constant_probability) {
            self.constants.string(rng)
        } else {
            let len = rng.gen_range(0..=self.settings.max_string_length);
            (0..len).map(|_| random_char(rng)).collect()
        }
    }

    pub fn draw_bytes(&self, rng: &mut ChaCha8Rng) -> Vec<u8> {
        if rng.gen_bool(self.settings.constant_probability) {
            self.constants.byte_string(rng)
        } else {
            let len = rng.gen_range(0..=self.settings.max_string_length);
            (0..len).map(|_| rng.gen()).collect()
        }
    }

    /// Produce a variant of `value` that still inhabits `ty`.
    ///
    /// A value whose kind does not match `ty` is replaced by a fresh draw.
    pub fn mutate(&self, value: &Value, ty: &TypeDescriptor, rng: &mut ChaCha8Rng) -> SynthesisResult<Value> {
        if !value.type_descriptor().is_assignable_to(ty) {
            return self.draw(ty, rng);
        }
        match (value, ty) {
            (Value::Bool(b), _) => Ok(Value::Bool(!b)),
            (Value::Int(i), TypeDescriptor::Float) => Ok(Value::Float(self.mutate_float(*i as f64, rng))),
            (Value::Int(i), _) => Ok(Value::Int(self.mutate_int(*i, rng))),
            (Value::Float(f), _) => Ok(Value::Float(self.mutate_float(*f, rng))),
            (Value::Str(s), _) => Ok(Value::Str(self.mutate_string(s, rng))),
            (Value::Bytes(b), _) => Ok(Value::Bytes(self.mutate_bytes(b, rng))),
            (Value::List(items), TypeDescriptor::List(element)) => {
                Ok(Value::List(self.mutate_list(items, element, rng)?))
            }
            (Value::Enum { type_name, variant }, TypeDescriptor::Enum { variants, .. }) => {
                let others: Vec<&String> = variants.iter().filter(|v| *v != variant).collect();
                match others.choose(rng) {
                    Some(other) => Ok(Value::Enum {
                        type_name: type_name.clone(),
                        variant: (*other).clone(),
                    }),
                    None => Ok(value.clone()),
                }
            }
            (Value::Table(_), _) | (Value::Tensor(_), _) => match self.strategy_for(ty) {
                Some(strategy) => strategy.mutate(self, value, ty, rng),
                None => Err(SynthesisError::NoStrategy(ty.to_string())),
            },
            (Value::None, _) => Ok(Value::None),
            _ => self.draw(ty, rng),
        }
    }

    pub fn mutate_int(&self, value: i64, rng: &mut ChaCha8Rng) -> i64 {
        let max_delta = self.settings.max_delta;
        let mut delta = rng.gen_range(-max_delta..=max_delta);
        if delta == 0 {
            delta = 1;
        }
        value.saturating_add(delta)
    }

    pub fn mutate_float(&self, value: f64, rng: &mut ChaCha8Rng) -> f64 {
        if !value.is_finite() {
            return self.draw_float(rng);
        }
        let mutated = match rng.gen_range(0..3) {
            0 => value + rng.gen_range(-1.0..=1.0) * self.settings.max_delta as f64,
            1 => value * rng.gen_range(-2.0..=2.0),
            _ => {
                let digits = rng.gen_range(0..7);
                let scale = 10f64.powi(digits);
                (value * scale).round() / scale
            }
        };
        if mutated == value {
            value + 1.0
        } else {
            mutated
        }
    }

    pub fn mutate_string(&self, value: &str, rng: &mut ChaCha8Rng) -> String {
        let chars: Vec<char> = value.chars().collect();
        let mutated: String = mutate_sequence(&chars, rng, |rng| random_char(rng)).into_iter().collect();
        if mutated == value {
            let mut extended = mutated;
            extended.push(random_char(rng));
            extended
        } else {
            mutated
        }
    }

    pub fn mutate_bytes(&self, value: &[u8], rng: &mut ChaCha8Rng) -> Vec<u8> {
        let mutated = mutate_sequence(value, rng, |rng| rng.gen());
        if mutated == value {
            let mut extended = mutated;
            extended.push(rng.gen());
            extended
        } else {
            mutated
        }
    }

    fn mutate_list(
        &self,
        items: &[Value],
        element: &TypeDescriptor,
        rng: &mut ChaCha8Rng,
    ) -> SynthesisResult<Vec<Value>> {
        let mut result = Vec::with_capacity(items.len() + 1);
        let p = 1.0 / items.len().max(1) as f64;
        for item in items {
            if rng.gen_bool(p) {
                continue;
            }
            if rng.gen_bool(p) {
                result.push(self.mutate(item, element, rng)?);
            } else {
                result.push(item.clone());
            }
        }
        while result.len() < self.settings.max_list_length && rng.gen_bool(STRING_INSERT_PROBABILITY) {
            let position = rng.gen_range(0..=result.len());
            result.insert(position, self.draw(element, rng)?);
        }
        Ok(result)
    }
}

/// Delete, replace and insert elements, each position with probability 1/len
fn mutate_sequence<T: Clone>(
    items: &[T],
    rng: &mut ChaCha8Rng,
    mut fresh: impl FnMut(&mut ChaCha8Rng) -> T,
) -> Vec<T> {
    let p = 1.0 / items.len().max(1) as f64;
    let mut result: Vec<T> = Vec::with_capacity(items.len() + 1);
    for item in items {
        if rng.gen_bool(p) {
            continue;
        }
        if rng.gen_bool(p) {
            result.push(fresh(rng));
        } else {
            result.push(item.clone());
        }
    }
    let mut insert_probability = STRING_INSERT_PROBABILITY;
    while rng.gen_bool(insert_probability) {
        let position = rng.gen_range(0..=result.len());
        result.insert(position, fresh(rng));
        insert_probability *= STRING_INSERT_PROBABILITY;
    }
    result
}

fn random_char(rng: &mut ChaCha8Rng) -> char {
    rng.gen_range(32u8..127) as char
}
