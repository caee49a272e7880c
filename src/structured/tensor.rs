//! Multi-dimensional numeric arrays
//!
//! Elements are stored flat in row-major order as `f64` and quantized to the
//! declared [`ElementType`] on every write, so the invariant
//! `data.len() == shape.iter().product()` and per-element representability can
//! be checked at any time.

use half::f16;
use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{StructureError, StructureResult};
use crate::types::TypeDescriptor;
use crate::value::pool::{SynthesisError, SynthesisResult, ValuePool, ValueStrategy};
use crate::value::Value;

pub const MAX_RANK: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    Bool,
    Int32,
    Int64,
    Float16,
    Float32,
    Float64,
}

impl ElementType {
    pub const ALL: [ElementType; 6] = [
        ElementType::Bool,
        ElementType::Int32,
        ElementType::Int64,
        ElementType::Float16,
        ElementType::Float32,
        ElementType::Float64,
    ];

    pub fn is_integral(&self) -> bool {
        matches!(self, ElementType::Bool | ElementType::Int32 | ElementType::Int64)
    }

    /// Round `x` to the nearest value this element type can hold
    pub fn quantize(&self, x: f64) -> f64 {
        match self {
            ElementType::Bool => {
                if x != 0.0 && !x.is_nan() {
                    1.0
                } else {
                    0.0
                }
            }
            ElementType::Int32 => {
                if x.is_nan() {
                    0.0
                } else {
                    x.round().clamp(i32::MIN as f64, i32::MAX as f64)
                }
            }
            ElementType::Int64 => {
                if x.is_nan() {
                    0.0
                } else {
                    x.round().clamp(i64::MIN as f64, i64::MAX as f64)
                }
            }
            ElementType::Float16 => f16::from_f64(x).to_f64(),
            ElementType::Float32 => x as f32 as f64,
            ElementType::Float64 => x,
        }
    }

    pub fn represents(&self, x: f64) -> bool {
        let q = self.quantize(x);
        q == x || (q.is_nan() && x.is_nan())
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementType::Bool => "bool",
            ElementType::Int32 => "int32",
            ElementType::Int64 => "int64",
            ElementType::Float16 => "float16",
            ElementType::Float32 => "float32",
            ElementType::Float64 => "float64",
        };
        write!(f, "{}", name)
    }
}

/// Element type and shape vector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorDescriptor {
    pub dtype: ElementType,
    pub shape: Vec<usize>,
}

impl TensorDescriptor {
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    dtype: ElementType,
    shape: Vec<usize>,
    #[serde(with = "crate::value::float_repr::seq")]
    data: Vec<f64>,
}

impl Tensor {
    /// Build a tensor, quantizing `data` to `dtype`
    pub fn new(dtype: ElementType, shape: Vec<usize>, data: Vec<f64>) -> StructureResult<Self> {
        let data = data.into_iter().map(|x| dtype.quantize(x)).collect();
        let tensor = Self { dtype, shape, data };
        tensor.check()?;
        Ok(tensor)
    }

    pub fn zeros(dtype: ElementType, shape: Vec<usize>) -> StructureResult<Self> {
        let len = shape.iter().product();
        Self::new(dtype, shape, vec![0.0; len])
    }

    pub fn descriptor(&self) -> TensorDescriptor {
        TensorDescriptor {
            dtype: self.dtype,
            shape: self.shape.clone(),
        }
    }

    pub fn dtype(&self) -> ElementType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    pub fn get(&self, index: &[usize]) -> Option<f64> {
        offset(&self.shape, index).map(|i| self.data[i])
    }

    pub fn is_consistent(&self) -> bool {
        self.check().is_ok()
    }

    pub fn check(&self) -> StructureResult<()> {
        if self.shape.is_empty() || self.shape.len() > MAX_RANK {
            return Err(StructureError::Rank(self.shape.len()));
        }
        let expected: usize = self.shape.iter().product();
        if expected != self.data.len() {
            return Err(StructureError::ShapeMismatch {
                shape: self.shape.clone(),
                expected,
                found: self.data.len(),
            });
        }
        if let Some(index) = self.data.iter().position(|x| !self.dtype.represents(*x)) {
            return Err(StructureError::Unrepresentable {
                index,
                dtype: self.dtype,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tensor[{}]{:?}", self.dtype, self.shape)
    }
}

fn strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

fn offset(shape: &[usize], index: &[usize]) -> Option<usize> {
    if index.len() != shape.len() || index.iter().zip(shape).any(|(i, d)| i >= d) {
        return None;
    }
    Some(strides(shape).iter().zip(index).map(|(s, i)| s * i).sum())
}

fn unravel(flat: usize, shape: &[usize]) -> Vec<usize> {
    strides(shape)
        .iter()
        .zip(shape)
        .map(|(stride, dim)| (flat / stride) % dim)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorMutation {
    /// Same element count, different factorization
    Reshape,
    /// Perturb a contiguous flat range
    PerturbRegion,
    /// New element type, all elements regenerated
    Retype,
    /// Grow or shrink one dimension
    Resize,
}

impl TensorMutation {
    pub const ALL: [TensorMutation; 4] = [
        TensorMutation::Reshape,
        TensorMutation::PerturbRegion,
        TensorMutation::Retype,
        TensorMutation::Resize,
    ];
}

/// Shape-factorization attempts before giving up on a reshape
const RESHAPE_ATTEMPTS: usize = 16;

/// Tensor synthesis plugged into the value pool
#[derive(Debug, Default)]
pub struct TensorStrategy;

impl TensorStrategy {
    pub fn new() -> Self {
        Self
    }

    pub fn draw_element(pool: &ValuePool, dtype: ElementType, rng: &mut ChaCha8Rng) -> f64 {
        let raw = match dtype {
            ElementType::Bool => {
                if rng.gen_bool(0.5) {
                    1.0
                } else {
                    0.0
                }
            }
            ElementType::Int32 | ElementType::Int64 => pool.draw_int(rng) as f64,
            ElementType::Float16 | ElementType::Float32 | ElementType::Float64 => pool.draw_float(rng),
        };
        dtype.quantize(raw)
    }

    fn boundary_element(pool: &ValuePool, dtype: ElementType, rng: &mut ChaCha8Rng) -> f64 {
        let raw = if dtype.is_integral() {
            pool.constants().integer(rng) as f64
        } else {
            pool.constants().float(rng)
        };
        dtype.quantize(raw)
    }

    pub fn synthesize(
        &self,
        pool: &ValuePool,
        dtype: Option<ElementType>,
        rng: &mut ChaCha8Rng,
    ) -> SynthesisResult<Tensor> {
        let settings = pool.settings();
        let dtype = dtype.unwrap_or_else(|| *ElementType::ALL.choose(rng).unwrap_or(&ElementType::Float64));
        let rank = rng.gen_range(1..=settings.tensor_max_rank.clamp(1, MAX_RANK));
        let shape: Vec<usize> = (0..rank)
            .map(|_| rng.gen_range(settings.tensor_dim_size.min..=settings.tensor_dim_size.max))
            .collect();
        let len = shape.iter().product();
        let data = (0..len).map(|_| Self::draw_element(pool, dtype, rng)).collect();
        Tensor::new(dtype, shape, data).map_err(|e| SynthesisError::NoStrategy(e.to_string()))
    }

    /// Random factorization of `len` into dimensions within bounds
    fn factorize(&self, len: usize, pool: &ValuePool, current: &[usize], rng: &mut ChaCha8Rng) -> Option<Vec<usize>> {
        let settings = pool.settings();
        let (min_dim, max_dim) = (settings.tensor_dim_size.min, settings.tensor_dim_size.max);
        let max_rank = settings.tensor_max_rank.clamp(1, MAX_RANK);
        for _ in 0..RESHAPE_ATTEMPTS {
            let rank = rng.gen_range(1..=max_rank);
            let mut remaining = len;
            let mut shape = Vec::with_capacity(rank);
            for _ in 0..rank - 1 {
                let divisors: Vec<usize> = (min_dim..=max_dim.min(remaining))
                    .filter(|d| *d > 0 && remaining % d == 0)
                    .collect();
                match divisors.choose(rng) {
                    Some(d) => {
                        shape.push(*d);
                        remaining /= d;
                    }
                    None => break,
                }
            }
            shape.push(remaining);
            let in_bounds = shape.len() == rank && shape.iter().all(|d| *d >= min_dim && *d <= max_dim);
            if in_bounds && shape.as_slice() != current {
                return Some(shape);
            }
        }
        None
    }

    fn is_applicable(&self, op: TensorMutation, tensor: &Tensor, pinned: bool, pool: &ValuePool) -> bool {
        let bounds = pool.settings().tensor_dim_size;
        match op {
            TensorMutation::Reshape => tensor.len() > 1,
            TensorMutation::PerturbRegion => !tensor.is_empty(),
            TensorMutation::Retype => !pinned,
            TensorMutation::Resize => tensor.shape.iter().any(|d| *d < bounds.max || *d > bounds.min),
        }
    }

    /// Apply one operator, returning `false` when it does not apply to this tensor
    pub fn apply(
        &self,
        op: TensorMutation,
        tensor: &mut Tensor,
        pool: &ValuePool,
        rng: &mut ChaCha8Rng,
    ) -> bool {
        match op {
            TensorMutation::Reshape => match self.factorize(tensor.len(), pool, &tensor.shape, rng) {
                Some(shape) => {
                    tensor.shape = shape;
                    true
                }
                None => false,
            },
            TensorMutation::PerturbRegion => {
                if tensor.is_empty() {
                    return false;
                }
                let start = rng.gen_range(0..tensor.len());
                let end = rng.gen_range(start + 1..=tensor.len());
                let max_delta = pool.settings().max_delta as f64;
                for i in start..end {
                    let x = tensor.data[i];
                    let perturbed = if rng.gen_bool(0.5) && x.is_finite() {
                        x + rng.gen_range(-max_delta..=max_delta)
                    } else {
                        Self::draw_element(pool, tensor.dtype, rng)
                    };
                    tensor.data[i] = tensor.dtype.quantize(perturbed);
                }
                true
            }
            TensorMutation::Retype => {
                let others: Vec<ElementType> =
                    ElementType::ALL.iter().copied().filter(|t| *t != tensor.dtype).collect();
                let dtype = match others.choose(rng) {
                    Some(dtype) => *dtype,
                    None => return false,
                };
                tensor.dtype = dtype;
                for i in 0..tensor.data.len() {
                    tensor.data[i] = Self::draw_element(pool, dtype, rng);
                }
                true
            }
            TensorMutation::Resize => {
                let bounds = pool.settings().tensor_dim_size;
                let axes: Vec<usize> = (0..tensor.rank())
                    .filter(|a| tensor.shape[*a] < bounds.max || tensor.shape[*a] > bounds.min)
                    .collect();
                let axis = match axes.choose(rng) {
                    Some(axis) => *axis,
                    None => return false,
                };
                let dim = tensor.shape[axis];
                let grow = if dim >= bounds.max {
                    false
                } else if dim <= bounds.min {
                    true
                } else {
                    rng.gen_bool(0.5)
                };
                let mut shape = tensor.shape.clone();
                shape[axis] = if grow { dim + 1 } else { dim - 1 };
                let len: usize = shape.iter().product();
                let mut data = Vec::with_capacity(len);
                for flat in 0..len {
                    let index = unravel(flat, &shape);
                    match offset(&tensor.shape, &index) {
                        Some(old) => data.push(tensor.data[old]),
                        None if rng.gen_bool(0.5) => data.push(Self::draw_element(pool, tensor.dtype, rng)),
                        None => data.push(Self::boundary_element(pool, tensor.dtype, rng)),
                    }
                }
                tensor.shape = shape;
                tensor.data = data;
                true
            }
        }
    }

    pub fn mutate_tensor(&self, tensor: &Tensor, pinned: bool, pool: &ValuePool, rng: &mut ChaCha8Rng) -> Tensor {
        let mut candidates: Vec<TensorMutation> = TensorMutation::ALL
            .iter()
            .copied()
            .filter(|op| self.is_applicable(*op, tensor, pinned, pool))
            .collect();
        candidates.shuffle(rng);
        for op in candidates {
            let mut mutated = tensor.clone();
            if self.apply(op, &mut mutated, pool, rng) {
                debug_assert!(mutated.is_consistent());
                return mutated;
            }
        }
        tensor.clone()
    }
}

impl ValueStrategy for TensorStrategy {
    fn name(&self) -> &str {
        "tensor"
    }

    fn handles(&self, ty: &TypeDescriptor) -> bool {
        matches!(ty, TypeDescriptor::Tensor { .. })
    }

    fn draw(&self, pool: &ValuePool, ty: &TypeDescriptor, rng: &mut ChaCha8Rng) -> SynthesisResult<Value> {
        let dtype = match ty {
            TypeDescriptor::Tensor { dtype } => *dtype,
            _ => None,
        };
        self.synthesize(pool, dtype, rng).map(Value::Tensor)
    }

    fn mutate(
        &self,
        pool: &ValuePool,
        value: &Value,
        ty: &TypeDescriptor,
        rng: &mut ChaCha8Rng,
    ) -> SynthesisResult<Value> {
        let pinned = matches!(ty, TypeDescriptor::Tensor { dtype: Some(_) });
        match value {
            Value::Tensor(tensor) if tensor.is_consistent() => {
                Ok(Value::Tensor(self.mutate_tensor(tensor, pinned, pool, rng)))
            }
            Value::Tensor(_) => self.draw(pool, ty, rng),
            other => Err(SynthesisError::NoStrategy(other.type_descriptor().to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::pool::PoolSettings;
    use rand::SeedableRng;

    fn pool() -> ValuePool {
        ValuePool::new(PoolSettings::default())
    }

    #[test]
    fn test_new_rejects_mismatch() {
        let err = Tensor::new(ElementType::Float64, vec![2, 3], vec![0.0; 5]).unwrap_err();
        assert!(matches!(err, StructureError::ShapeMismatch { expected: 6, found: 5, .. }));
        assert!(matches!(
            Tensor::zeros(ElementType::Int32, vec![1, 1, 1, 1, 1]),
            Err(StructureError::Rank(5))
        ));
    }

    #[test]
    fn test_quantization() {
        assert_eq!(ElementType::Int32.quantize(2.6), 3.0);
        assert_eq!(ElementType::Bool.quantize(-4.0), 1.0);
        assert_eq!(ElementType::Int32.quantize(f64::MAX), i32::MAX as f64);
        assert!(ElementType::Float16.represents(0.5));
        assert!(!ElementType::Float16.represents(0.1));
        let t = Tensor::new(ElementType::Float16, vec![1], vec![0.1]).unwrap();
        assert!(t.is_consistent());
    }

    #[test]
    fn test_indexing() {
        let t = Tensor::new(ElementType::Int64, vec![2, 3], (0..6).map(|x| x as f64).collect()).unwrap();
        assert_eq!(t.get(&[1, 2]), Some(5.0));
        assert_eq!(t.get(&[0, 1]), Some(1.0));
        assert_eq!(t.get(&[2, 0]), None);
        assert_eq!(unravel(4, &[2, 3]), vec![1, 1]);
    }

    #[test]
    fn test_reshape_preserves_count() {
        let pool = pool();
        let strategy = TensorStrategy::new();
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let mut t = Tensor::zeros(ElementType::Float32, vec![2, 6]).unwrap();
        if strategy.apply(TensorMutation::Reshape, &mut t, &pool, &mut rng) {
            assert_eq!(t.len(), 12);
            assert_ne!(t.shape(), &[2, 6]);
            assert!(t.is_consistent());
        }
    }

    #[test]
    fn test_resize_keeps_existing_elements() {
        let pool = pool();
        let strategy = TensorStrategy::new();
        let mut rng = ChaCha8Rng::seed_from_u64(6);
        let original = Tensor::new(ElementType::Int64, vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let mut t = original.clone();
        assert!(strategy.apply(TensorMutation::Resize, &mut t, &pool, &mut rng));
        assert!(t.is_consistent());
        let kept = [[0, 0], [0, 1], [1, 0], [1, 1]]
            .iter()
            .filter(|idx| t.get(&idx[..]).is_some())
            .all(|idx| t.get(&idx[..]) == original.get(&idx[..]));
        assert!(kept);
    }

    #[test]
    fn test_pinned_dtype_survives_mutation() {
        let pool = pool();
        let strategy = TensorStrategy::new();
        let mut rng = ChaCha8Rng::seed_from_u64(12);
        let ty = TypeDescriptor::Tensor { dtype: Some(ElementType::Int32) };
        let mut value = strategy.draw(&pool, &ty, &mut rng).unwrap();
        for _ in 0..200 {
            value = strategy.mutate(&pool, &value, &ty, &mut rng).unwrap();
            assert_eq!(value.as_tensor().unwrap().dtype(), ElementType::Int32);
        }
    }
}
