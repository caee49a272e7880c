//! Structured-value extension: tabular and tensor values
//!
//! Generic random mutation of structured representations tends to produce
//! ragged tables or shape/element-count mismatches, which crash every
//! downstream execution instead of yielding search signal. The strategies
//! here only ever produce well-formed values: every mutation operator is
//! followed by a structural check.

pub mod table;
pub mod tensor;

pub use self::table::{Column, ColumnType, Table, TableDescriptor, TableMutation, TableStrategy};
pub use self::tensor::{ElementType, Tensor, TensorDescriptor, TensorMutation, TensorStrategy};

/// Structural violation in a table or tensor
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StructureError {
    #[error("Column {column} has {found} cells, expected {expected}")]
    Ragged { column: String, expected: usize, found: usize },

    #[error("Cell {row} of column {column} does not match the declared type")]
    CellType { column: String, row: usize },

    #[error("Duplicate column name {0}")]
    DuplicateColumn(String),

    #[error("Shape {shape:?} holds {expected} elements, data has {found}")]
    ShapeMismatch { shape: Vec<usize>, expected: usize, found: usize },

    #[error("Tensor rank {0} outside 1..=4")]
    Rank(usize),

    #[error("Element {index} is not representable as {dtype}")]
    Unrepresentable { index: usize, dtype: ElementType },
}

pub type StructureResult<T> = Result<T, StructureError>;
