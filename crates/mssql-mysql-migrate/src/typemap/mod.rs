//! Type mapping between SQL Server and MySQL.
//!
//! The mapping is a lookup table from lowercased source type name to a
//! [`TypeRule`]. Supporting another dialect pair means supplying another
//! table, not another code path; callers only see the [`TypeMapper`] trait.

use std::borrow::Cow;
use std::collections::HashMap;

use crate::core::schema::{MaxLength, NumericPrecision};
use crate::core::traits::{TypeMapper, TypeMapping};

/// Generic text type used for any source type without a rule.
pub const FALLBACK_TYPE: &str = "LONGTEXT";

/// Precision/scale used when a decimal column does not declare one.
pub const DEFAULT_DECIMAL: NumericPrecision = NumericPrecision {
    precision: 10,
    scale: 2,
};

/// MySQL's `DECIMAL` limits.
const MYSQL_MAX_PRECISION: u8 = 65;
const MYSQL_MAX_SCALE: u8 = 30;

/// Widest `VARCHAR` that fits a utf8mb4 row.
const MYSQL_MAX_VARCHAR: u32 = 16_383;

/// How one source type maps to the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeRule {
    /// Always the same target type.
    Fixed(Cow<'static, str>),

    /// Always the same target type, with a precision/semantics loss warning.
    Lossy {
        target: Cow<'static, str>,
        warning: Cow<'static, str>,
    },

    /// Length-parameterized type: `name(n)` while `n <= max`, otherwise
    /// (unbounded, missing or too wide) `overflow`.
    Sized {
        name: Cow<'static, str>,
        max: u32,
        overflow: Cow<'static, str>,
    },

    /// Exact numeric `name(p,s)`; [`DEFAULT_DECIMAL`] when not declared.
    Decimal { name: Cow<'static, str> },
}

impl TypeRule {
    /// Rule mapping to a fixed owned target type (used for config overrides).
    pub fn fixed(target: impl Into<String>) -> Self {
        TypeRule::Fixed(Cow::Owned(target.into()))
    }

    fn apply(&self, max_length: MaxLength, numeric: Option<NumericPrecision>) -> TypeMapping {
        match self {
            TypeRule::Fixed(target) => TypeMapping::lossless(target.as_ref()),
            TypeRule::Lossy { target, warning } => {
                TypeMapping::lossy(target.as_ref(), warning.as_ref())
            }
            TypeRule::Sized {
                name,
                max,
                overflow,
            } => match max_length {
                MaxLength::Bounded(n) if n <= *max => {
                    TypeMapping::lossless(format!("{}({})", name, n))
                }
                _ => TypeMapping::lossless(overflow.as_ref()),
            },
            TypeRule::Decimal { name } => match numeric {
                Some(p) if p.precision > MYSQL_MAX_PRECISION => TypeMapping::lossy(
                    format!(
                        "{}({},{})",
                        name,
                        MYSQL_MAX_PRECISION,
                        p.scale.min(MYSQL_MAX_SCALE)
                    ),
                    format!(
                        "Precision {} exceeds MySQL max of {}. Truncated.",
                        p.precision, MYSQL_MAX_PRECISION
                    ),
                ),
                Some(p) if p.precision > 0 => TypeMapping::lossless(format!(
                    "{}({},{})",
                    name,
                    p.precision,
                    p.scale.min(MYSQL_MAX_SCALE)
                )),
                _ => TypeMapping::lossless(format!(
                    "{}({},{})",
                    name, DEFAULT_DECIMAL.precision, DEFAULT_DECIMAL.scale
                )),
            },
        }
    }
}

const fn fixed(target: &'static str) -> TypeRule {
    TypeRule::Fixed(Cow::Borrowed(target))
}

const fn sized(name: &'static str, max: u32, overflow: &'static str) -> TypeRule {
    TypeRule::Sized {
        name: Cow::Borrowed(name),
        max,
        overflow: Cow::Borrowed(overflow),
    }
}

const fn lossy(target: &'static str, warning: &'static str) -> TypeRule {
    TypeRule::Lossy {
        target: Cow::Borrowed(target),
        warning: Cow::Borrowed(warning),
    }
}

/// SQL Server → MySQL rules.
const MSSQL_TO_MYSQL: &[(&str, TypeRule)] = &[
    // Integers
    ("tinyint", fixed("TINYINT UNSIGNED")),
    ("smallint", fixed("SMALLINT")),
    ("int", fixed("INT")),
    ("bigint", fixed("BIGINT")),
    // Boolean
    ("bit", fixed("BOOLEAN")),
    // Exact numerics
    ("decimal", TypeRule::Decimal { name: Cow::Borrowed("DECIMAL") }),
    ("numeric", TypeRule::Decimal { name: Cow::Borrowed("DECIMAL") }),
    ("money", fixed("DECIMAL(19,4)")),
    ("smallmoney", fixed("DECIMAL(10,4)")),
    // Floating point
    ("float", fixed("DOUBLE")),
    ("real", fixed("FLOAT")),
    // Character
    ("char", sized("CHAR", 255, "LONGTEXT")),
    ("nchar", sized("CHAR", 255, "LONGTEXT")),
    ("varchar", sized("VARCHAR", MYSQL_MAX_VARCHAR, "LONGTEXT")),
    ("nvarchar", sized("VARCHAR", MYSQL_MAX_VARCHAR, "LONGTEXT")),
    ("text", fixed("LONGTEXT")),
    ("ntext", fixed("LONGTEXT")),
    ("xml", lossy("LONGTEXT", "XML stored as text. XML functions unavailable.")),
    // Binary
    ("binary", sized("BINARY", 255, "LONGBLOB")),
    ("varbinary", sized("VARBINARY", 65_535, "LONGBLOB")),
    ("image", fixed("LONGBLOB")),
    ("timestamp", fixed("BINARY(8)")),
    ("rowversion", fixed("BINARY(8)")),
    // Date/time
    ("date", fixed("DATE")),
    (
        "time",
        lossy(
            "TIME(6)",
            "time keeps 100ns precision; MySQL stores microseconds. The 7th fractional digit is truncated.",
        ),
    ),
    ("datetime", fixed("DATETIME(3)")),
    ("smalldatetime", fixed("DATETIME")),
    (
        "datetime2",
        lossy(
            "DATETIME(6)",
            "datetime2 keeps 100ns precision; MySQL stores microseconds. The 7th fractional digit is truncated.",
        ),
    ),
    (
        "datetimeoffset",
        lossy(
            "DATETIME(6)",
            "datetimeoffset loses timezone info in MySQL. Values stored as UTC.",
        ),
    ),
    // GUID
    ("uniqueidentifier", fixed("CHAR(36)")),
];

/// A data-driven type mapper.
#[derive(Debug, Clone)]
pub struct TypeMap {
    source: String,
    target: String,
    rules: HashMap<String, TypeRule>,
}

impl TypeMap {
    /// Build a mapper from a rule table.
    pub fn from_rules(
        source: impl Into<String>,
        target: impl Into<String>,
        rules: &[(&str, TypeRule)],
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            rules: rules
                .iter()
                .map(|(k, v)| (k.to_lowercase(), v.clone()))
                .collect(),
        }
    }

    /// The built-in SQL Server → MySQL mapper.
    pub fn mssql_to_mysql() -> Self {
        Self::from_rules("mssql", "mysql", MSSQL_TO_MYSQL)
    }

    /// Add or replace the rule for one source type.
    pub fn with_rule(mut self, source_type: &str, rule: TypeRule) -> Self {
        self.rules.insert(normalize(source_type), rule);
        self
    }

    /// Apply `source type → fixed target type` overrides.
    pub fn with_overrides(mut self, overrides: &HashMap<String, String>) -> Self {
        for (source_type, target) in overrides {
            self.rules
                .insert(normalize(source_type), TypeRule::fixed(target.clone()));
        }
        self
    }

    /// Look up the rule for a source type.
    pub fn rule(&self, source_type: &str) -> Option<&TypeRule> {
        self.rules.get(&normalize(source_type))
    }
}

impl Default for TypeMap {
    fn default() -> Self {
        Self::mssql_to_mysql()
    }
}

impl TypeMapper for TypeMap {
    fn source_dialect(&self) -> &str {
        &self.source
    }

    fn target_dialect(&self) -> &str {
        &self.target
    }

    fn map_type(
        &self,
        source_type: &str,
        max_length: MaxLength,
        numeric: Option<NumericPrecision>,
    ) -> TypeMapping {
        match self.rule(source_type) {
            Some(rule) => rule.apply(max_length, numeric),
            None => TypeMapping::lossy(
                FALLBACK_TYPE,
                format!(
                    "Unmapped {} type '{}' stored as {}.",
                    self.source, source_type, FALLBACK_TYPE
                ),
            ),
        }
    }
}

fn normalize(source_type: &str) -> String {
    source_type.trim().to_lowercase()
}
