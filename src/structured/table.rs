//! Tabular values
//!
//! A [`Table`] is stored column-major: every column carries its declared
//! [`ColumnType`] and exactly `rows` cells. The fields are private so that the
//! only way to change a table is through operations that keep it rectangular.

use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{StructureError, StructureResult};
use crate::types::TypeDescriptor;
use crate::value::pool::{SynthesisError, SynthesisResult, ValuePool, ValueStrategy};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Int,
    Float,
    Bool,
    Str,
}

impl ColumnType {
    pub const ALL: [ColumnType; 4] = [ColumnType::Int, ColumnType::Float, ColumnType::Bool, ColumnType::Str];

    pub fn descriptor(&self) -> TypeDescriptor {
        match self {
            ColumnType::Int => TypeDescriptor::Int,
            ColumnType::Float => TypeDescriptor::Float,
            ColumnType::Bool => TypeDescriptor::Bool,
            ColumnType::Str => TypeDescriptor::Str,
        }
    }

    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (ColumnType::Int, Value::Int(_))
                | (ColumnType::Float, Value::Float(_))
                | (ColumnType::Bool, Value::Bool(_))
                | (ColumnType::Str, Value::Str(_))
        )
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Int | ColumnType::Float)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Int => write!(f, "int"),
            ColumnType::Float => write!(f, "float"),
            ColumnType::Bool => write!(f, "bool"),
            ColumnType::Str => write!(f, "str"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub dtype: ColumnType,
    pub values: Vec<Value>,
}

impl Column {
    pub fn new(name: impl Into<String>, dtype: ColumnType, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            dtype,
            values,
        }
    }
}

/// Column names and declared types plus the row count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub columns: Vec<(String, ColumnType)>,
    pub rows: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<Column>,
    rows: usize,
}

impl Table {
    /// Table with no columns and the given row count
    pub fn empty(rows: usize) -> Self {
        Self {
            columns: Vec::new(),
            rows,
        }
    }

    pub fn from_columns(columns: Vec<Column>) -> StructureResult<Self> {
        let rows = columns.first().map(|c| c.values.len()).unwrap_or(0);
        let table = Self { columns, rows };
        table.check()?;
        Ok(table)
    }

    pub fn descriptor(&self) -> TableDescriptor {
        TableDescriptor {
            columns: self.columns.iter().map(|c| (c.name.clone(), c.dtype)).collect(),
            rows: self.rows,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.columns.is_empty()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn cell(&self, row: usize, column: usize) -> Option<&Value> {
        self.columns.get(column).and_then(|c| c.values.get(row))
    }

    pub fn row(&self, row: usize) -> Option<Vec<&Value>> {
        if row >= self.rows {
            return None;
        }
        Some(self.columns.iter().map(|c| &c.values[row]).collect())
    }

    /// Sum of a numeric column
    pub fn column_sum(&self, name: &str) -> Option<f64> {
        let column = self.column(name)?;
        if !column.dtype.is_numeric() {
            return None;
        }
        Some(column.values.iter().filter_map(Value::as_float).sum())
    }

    pub fn numeric_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.dtype.is_numeric())
    }

    /// Every column holds exactly `rows` cells of its declared type
    pub fn is_rectangular(&self) -> bool {
        self.check().is_ok()
    }

    pub fn check(&self) -> StructureResult<()> {
        for (i, column) in self.columns.iter().enumerate() {
            if column.values.len() != self.rows {
                return Err(StructureError::Ragged {
                    column: column.name.clone(),
                    expected: self.rows,
                    found: column.values.len(),
                });
            }
            if let Some(row) = column.values.iter().position(|v| !column.dtype.accepts(v)) {
                return Err(StructureError::CellType {
                    column: column.name.clone(),
                    row,
                });
            }
            if self.columns[..i].iter().any(|c| c.name == column.name) {
                return Err(StructureError::DuplicateColumn(column.name.clone()));
            }
        }
        Ok(())
    }

    fn fresh_column_name(&self) -> String {
        (0..)
            .map(|i| format!("col{}", i))
            .find(|name| self.column(name).is_none())
            .unwrap_or_else(|| format!("col{}", self.columns.len()))
    }

    fn push_row(&mut self, position: usize, cells: Vec<Value>) {
        for (column, cell) in self.columns.iter_mut().zip(cells) {
            column.values.insert(position, cell);
        }
        self.rows += 1;
    }

    fn remove_row(&mut self, position: usize) {
        for column in &mut self.columns {
            column.values.remove(position);
        }
        self.rows -= 1;
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table[{}x{}](", self.rows, self.columns.len())?;
        for (i, column) in self.columns.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", column.name, column.dtype)?;
        }
        write!(f, ")")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableMutation {
    AddRow,
    RemoveRow,
    AddColumn,
    RemoveColumn,
    PerturbCell,
    RetypeColumn,
}

impl TableMutation {
    pub const ALL: [TableMutation; 6] = [
        TableMutation::AddRow,
        TableMutation::RemoveRow,
        TableMutation::AddColumn,
        TableMutation::RemoveColumn,
        TableMutation::PerturbCell,
        TableMutation::RetypeColumn,
    ];
}

/// Tabular synthesis plugged into the value pool
#[derive(Debug, Default)]
pub struct TableStrategy;

impl TableStrategy {
    pub fn new() -> Self {
        Self
    }

    fn draw_column(
        pool: &ValuePool,
        name: String,
        dtype: ColumnType,
        rows: usize,
        rng: &mut ChaCha8Rng,
    ) -> SynthesisResult<Column> {
        let values = (0..rows)
            .map(|_| Self::draw_cell(pool, dtype, rng))
            .collect::<SynthesisResult<Vec<_>>>()?;
        Ok(Column::new(name, dtype, values))
    }

    fn draw_cell(pool: &ValuePool, dtype: ColumnType, rng: &mut ChaCha8Rng) -> SynthesisResult<Value> {
        pool.draw(&dtype.descriptor(), rng)
    }

    pub fn synthesize(&self, pool: &ValuePool, rng: &mut ChaCha8Rng) -> SynthesisResult<Table> {
        let bounds = pool.settings();
        let num_columns = rng.gen_range(bounds.table_columns.min..=bounds.table_columns.max);
        let rows = rng.gen_range(bounds.table_rows.min..=bounds.table_rows.max);
        let mut table = Table::empty(rows);
        for _ in 0..num_columns {
            let dtype = *ColumnType::ALL.choose(rng).unwrap_or(&ColumnType::Int);
            let name = table.fresh_column_name();
            table.columns.push(Self::draw_column(pool, name, dtype, rows, rng)?);
        }
        Ok(table)
    }

    fn is_applicable(op: TableMutation, table: &Table, pool: &ValuePool) -> bool {
        let bounds = pool.settings();
        match op {
            TableMutation::AddRow => table.rows < bounds.table_rows.max,
            TableMutation::RemoveRow => table.rows > bounds.table_rows.min && table.rows > 0,
            TableMutation::AddColumn => table.columns.len() < bounds.table_columns.max,
            TableMutation::RemoveColumn => table.columns.len() > bounds.table_columns.min,
            TableMutation::PerturbCell => table.rows > 0 && !table.columns.is_empty(),
            TableMutation::RetypeColumn => !table.columns.is_empty(),
        }
    }

    /// Apply one operator in place; the table stays rectangular on every path.
    /// Returns false, leaving the table as is, when there is no row or column
    /// for the operator to act on.
    pub fn apply(
        &self,
        op: TableMutation,
        table: &mut Table,
        pool: &ValuePool,
        rng: &mut ChaCha8Rng,
    ) -> SynthesisResult<bool> {
        let has_rows = table.rows > 0;
        let has_columns = !table.columns.is_empty();
        let possible = match op {
            TableMutation::AddRow | TableMutation::AddColumn => true,
            TableMutation::RemoveRow => has_rows,
            TableMutation::RemoveColumn | TableMutation::RetypeColumn => has_columns,
            TableMutation::PerturbCell => has_rows && has_columns,
        };
        if !possible {
            return Ok(false);
        }
        match op {
            TableMutation::AddRow => {
                let cells = table
                    .columns
                    .iter()
                    .map(|c| Self::draw_cell(pool, c.dtype, rng))
                    .collect::<SynthesisResult<Vec<_>>>()?;
                let position = rng.gen_range(0..=table.rows);
                table.push_row(position, cells);
            }
            TableMutation::RemoveRow => {
                let position = rng.gen_range(0..table.rows);
                table.remove_row(position);
            }
            TableMutation::AddColumn => {
                let dtype = *ColumnType::ALL.choose(rng).unwrap_or(&ColumnType::Int);
                let name = table.fresh_column_name();
                let column = Self::draw_column(pool, name, dtype, table.rows, rng)?;
                let position = rng.gen_range(0..=table.columns.len());
                table.columns.insert(position, column);
            }
            TableMutation::RemoveColumn => {
                let position = rng.gen_range(0..table.columns.len());
                table.columns.remove(position);
            }
            TableMutation::PerturbCell => {
                let column = rng.gen_range(0..table.columns.len());
                let row = rng.gen_range(0..table.rows);
                let dtype = table.columns[column].dtype;
                let mutated = pool.mutate(&table.columns[column].values[row], &dtype.descriptor(), rng)?;
                table.columns[column].values[row] = mutated;
            }
            TableMutation::RetypeColumn => {
                let position = rng.gen_range(0..table.columns.len());
                let current = table.columns[position].dtype;
                let others: Vec<ColumnType> = ColumnType::ALL.iter().copied().filter(|t| *t != current).collect();
                let dtype = *others.choose(rng).unwrap_or(&current);
                let name = table.columns[position].name.clone();
                table.columns[position] = Self::draw_column(pool, name, dtype, table.rows, rng)?;
            }
        }
        Ok(true)
    }

    /// Pick an applicable operator at random and apply it
    pub fn mutate_table(&self, table: &Table, pool: &ValuePool, rng: &mut ChaCha8Rng) -> SynthesisResult<Table> {
        let applicable: Vec<TableMutation> = TableMutation::ALL
            .iter()
            .copied()
            .filter(|op| Self::is_applicable(*op, table, pool))
            .collect();
        let op = match applicable.choose(rng) {
            Some(op) => *op,
            None => return self.synthesize(pool, rng),
        };
        let mut mutated = table.clone();
        if !self.apply(op, &mut mutated, pool, rng)? {
            return self.synthesize(pool, rng);
        }
        debug_assert!(mutated.is_rectangular());
        Ok(mutated)
    }
}

impl ValueStrategy for TableStrategy {
    fn name(&self) -> &str {
        "table"
    }

    fn handles(&self, ty: &TypeDescriptor) -> bool {
        matches!(ty, TypeDescriptor::Table)
    }

    fn draw(&self, pool: &ValuePool, _ty: &TypeDescriptor, rng: &mut ChaCha8Rng) -> SynthesisResult<Value> {
        self.synthesize(pool, rng).map(Value::Table)
    }

    fn mutate(
        &self,
        pool: &ValuePool,
        value: &Value,
        _ty: &TypeDescriptor,
        rng: &mut ChaCha8Rng,
    ) -> SynthesisResult<Value> {
        match value {
            Value::Table(table) if table.is_rectangular() => self.mutate_table(table, pool, rng).map(Value::Table),
            Value::Table(_) => self.synthesize(pool, rng).map(Value::Table),
            other => Err(SynthesisError::NoStrategy(other.type_descriptor().to_string())),
        }
    }
}
