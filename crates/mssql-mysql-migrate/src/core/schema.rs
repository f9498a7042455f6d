//! Schema metadata types for tables, columns and foreign keys.
//!
//! These are read once from the source catalog and never mutated afterwards;
//! the planner and DDL synthesizer only borrow them.

use serde::{Deserialize, Serialize};

/// Character/binary length descriptor of a column.
///
/// SQL Server reports `-1` for `(max)` types and `NULL` for types without a
/// length; both are lifted into explicit variants here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MaxLength {
    /// The type carries no length (int, date, ...).
    NotApplicable,
    /// A positive declared bound.
    Bounded(u32),
    /// `varchar(max)` and friends.
    Unbounded,
}

impl MaxLength {
    /// Build from the raw `CHARACTER_MAXIMUM_LENGTH` catalog value.
    pub fn from_catalog(raw: Option<i32>) -> Self {
        match raw {
            Some(-1) => MaxLength::Unbounded,
            Some(n) if n > 0 => MaxLength::Bounded(n as u32),
            _ => MaxLength::NotApplicable,
        }
    }
}

/// Declared precision and scale of an exact numeric column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NumericPrecision {
    pub precision: u8,
    pub scale: u8,
}

impl NumericPrecision {
    pub fn new(precision: u8, scale: u8) -> Self {
        Self { precision, scale }
    }
}

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,

    /// Source data type (e.g. "int", "nvarchar", "datetime2").
    pub source_type: String,

    /// Declared length for string/binary types.
    pub max_length: MaxLength,

    /// Declared precision for decimal/numeric types.
    pub numeric: Option<NumericPrecision>,

    /// Whether the column allows NULL.
    pub is_nullable: bool,

    /// Ordinal position (1-based).
    pub ordinal_pos: i32,
}

impl ColumnDef {
    /// Convenience constructor for a nullable column without precision.
    pub fn new(name: impl Into<String>, source_type: impl Into<String>, max_length: MaxLength) -> Self {
        Self {
            name: name.into(),
            source_type: source_type.into(),
            max_length,
            numeric: None,
            is_nullable: true,
            ordinal_pos: 0,
        }
    }
}

/// One column of a foreign key constraint.
///
/// Composite keys produce several entries sharing the same `constraint`,
/// ordered by `ordinal`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForeignKeyRef {
    /// Source constraint name.
    pub constraint: String,

    /// Referencing column in the owning table.
    pub column: String,

    /// Referenced table name.
    pub referenced_table: String,

    /// Referenced column name.
    pub referenced_column: String,

    /// Position of this column within the constraint (1-based).
    pub ordinal: i32,
}

/// Table metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    /// Source schema name.
    pub schema: String,

    /// Table name.
    pub name: String,

    /// Columns in physical (ordinal) order.
    pub columns: Vec<ColumnDef>,

    /// Primary key columns in key order; empty when none is declared.
    pub primary_key: Vec<String>,

    /// Foreign key column references.
    pub foreign_keys: Vec<ForeignKeyRef>,
}

impl TableDef {
    /// Create an empty table definition.
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    /// Get the fully qualified source table name.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Check if the table has a primary key.
    pub fn has_pk(&self) -> bool {
        !self.primary_key.is_empty()
    }

    /// Column names in physical order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Names of the other tables this table references, deduplicated.
    pub fn referenced_tables(&self) -> Vec<&str> {
        let mut refs: Vec<&str> = self
            .foreign_keys
            .iter()
            .map(|fk| fk.referenced_table.as_str())
            .filter(|r| *r != self.name)
            .collect();
        refs.sort_unstable();
        refs.dedup();
        refs
    }

    /// Foreign key columns grouped by constraint, in first-seen order with
    /// columns sorted by ordinal.
    pub fn foreign_key_groups(&self) -> Vec<Vec<&ForeignKeyRef>> {
        let mut groups: Vec<Vec<&ForeignKeyRef>> = Vec::new();
        for fk in &self.foreign_keys {
            match groups
                .iter_mut()
                .find(|g| g[0].constraint == fk.constraint && g[0].referenced_table == fk.referenced_table)
            {
                Some(group) => group.push(fk),
                None => groups.push(vec![fk]),
            }
        }
        for group in &mut groups {
            group.sort_by_key(|fk| fk.ordinal);
        }
        groups
    }
}
