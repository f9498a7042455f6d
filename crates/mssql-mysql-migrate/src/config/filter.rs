//! Table include/exclude filtering.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use crate::error::{MigrateError, Result};

/// Compiled include/exclude glob patterns over table names.
///
/// Matching is case-insensitive, like SQL Server's default collation.
#[derive(Debug, Clone)]
pub struct TableFilter {
    include: GlobSet,
    exclude: GlobSet,
    include_all: bool,
}

impl TableFilter {
    /// Compile the include and exclude patterns.
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        Ok(Self {
            include: build_globset(include)?,
            exclude: build_globset(exclude)?,
            include_all: include.is_empty(),
        })
    }

    /// A filter that accepts every table.
    pub fn allow_all() -> Self {
        Self {
            include: GlobSet::empty(),
            exclude: GlobSet::empty(),
            include_all: true,
        }
    }

    /// Whether a table with this name should be migrated.
    pub fn matches(&self, table: &str) -> bool {
        (self.include_all || self.include.is_match(table)) && !self.exclude.is_match(table)
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| MigrateError::Config(format!("invalid table pattern '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| MigrateError::Config(format!("invalid table patterns: {}", e)))
}
