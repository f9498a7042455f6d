//! Dependency ordering of tables.
//!
//! A [`MigrationPlan`] orders the migrated tables so that, for every foreign
//! key T → R that can be satisfied, R is created and loaded before T. The
//! order comes from Kahn's algorithm over the foreign key graph with ties
//! broken by table name, so the same input always yields the same plan.
//!
//! Cycles cannot be ordered. When the queue drains with tables still
//! pending, those tables are appended sorted by name and flagged as
//! cycle-broken; the DDL synthesizer defers every foreign key that points
//! forward in the plan.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use tracing::{debug, warn};

use crate::core::schema::TableDef;

/// A foreign key dropped because its referenced table is not migrated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedReference {
    /// Table that owns the foreign key.
    pub table: String,
    /// Source constraint name.
    pub constraint: String,
    /// Referenced table that is missing from the migrated set.
    pub referenced_table: String,
}

impl fmt::Display for DroppedReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Foreign key {} on {} references {}, which is not migrated; constraint dropped",
            self.constraint, self.table, self.referenced_table
        )
    }
}

/// Tables in creation/load order.
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    tables: Vec<TableDef>,
    position: HashMap<String, usize>,
    cycle_broken: BTreeSet<String>,
    dropped: Vec<DroppedReference>,
}

impl MigrationPlan {
    /// Order `tables` by their foreign key dependencies.
    ///
    /// Foreign keys that reference tables outside the set are removed from
    /// the returned definitions and reported by
    /// [`MigrationPlan::dropped_references`].
    pub fn build(tables: Vec<TableDef>) -> Self {
        let names: HashSet<String> = tables.iter().map(|t| t.name.clone()).collect();

        let mut dropped = Vec::new();
        let mut by_name: HashMap<String, TableDef> = HashMap::with_capacity(tables.len());
        for mut table in tables {
            let mut kept = Vec::with_capacity(table.foreign_keys.len());
            for fk in std::mem::take(&mut table.foreign_keys) {
                if names.contains(&fk.referenced_table) {
                    kept.push(fk);
                    continue;
                }
                let reference = DroppedReference {
                    table: table.name.clone(),
                    constraint: fk.constraint.clone(),
                    referenced_table: fk.referenced_table.clone(),
                };
                if !dropped.contains(&reference) {
                    warn!("{}", reference);
                    dropped.push(reference);
                }
            }
            table.foreign_keys = kept;
            by_name.insert(table.name.clone(), table);
        }

        // Edges R -> [T...] for every T that references R (self excluded).
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        for (name, table) in &by_name {
            in_degree.entry(name.as_str()).or_insert(0);
            for referenced in table.referenced_tables() {
                dependents
                    .entry(referenced)
                    .or_default()
                    .push(name.as_str());
                *in_degree.entry(name.as_str()).or_insert(0) += 1;
            }
        }

        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|&(_, &deg)| deg == 0)
            .map(|(&name, _)| name)
            .collect();

        let mut order: Vec<String> = Vec::with_capacity(by_name.len());
        while let Some(current) = ready.pop_first() {
            order.push(current.to_string());
            if let Some(downstream) = dependents.get(current) {
                for &dep in downstream {
                    if let Some(degree) = in_degree.get_mut(dep) {
                        *degree -= 1;
                        if *degree == 0 {
                            ready.insert(dep);
                        }
                    }
                }
            }
        }

        let emitted: HashSet<&str> = order.iter().map(String::as_str).collect();
        let cycle_broken: BTreeSet<String> = by_name
            .keys()
            .filter(|name| !emitted.contains(name.as_str()))
            .cloned()
            .collect();
        if !cycle_broken.is_empty() {
            warn!(
                "Foreign key cycle among {} table(s): {}; their forward references are deferred",
                cycle_broken.len(),
                cycle_broken.iter().cloned().collect::<Vec<_>>().join(", ")
            );
            order.extend(cycle_broken.iter().cloned());
        }

        let mut tables = Vec::with_capacity(order.len());
        let mut position = HashMap::with_capacity(order.len());
        for (i, name) in order.into_iter().enumerate() {
            if let Some(table) = by_name.remove(&name) {
                position.insert(name, i);
                tables.push(table);
            }
        }

        debug!(
            "Migration plan: {}",
            tables
                .iter()
                .map(|t| t.name.as_str())
                .collect::<Vec<_>>()
                .join(" -> ")
        );

        Self {
            tables,
            position,
            cycle_broken,
            dropped,
        }
    }

    /// Tables in plan order.
    pub fn tables(&self) -> &[TableDef] {
        &self.tables
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Index of a table in the plan.
    pub fn position(&self, table: &str) -> Option<usize> {
        self.position.get(table).copied()
    }

    /// Whether `a` is strictly before `b` in the plan.
    pub fn is_before(&self, a: &str, b: &str) -> bool {
        match (self.position(a), self.position(b)) {
            (Some(pa), Some(pb)) => pa < pb,
            _ => false,
        }
    }

    /// Tables that were part of (or blocked behind) a foreign key cycle.
    pub fn cycle_broken(&self) -> &BTreeSet<String> {
        &self.cycle_broken
    }

    pub fn is_cycle_broken(&self, table: &str) -> bool {
        self.cycle_broken.contains(table)
    }

    /// Foreign keys removed because their target is not migrated.
    pub fn dropped_references(&self) -> &[DroppedReference] {
        &self.dropped
    }

    /// Group the plan into dependency levels.
    ///
    /// A table's level is one more than the highest level among the tables it
    /// references earlier in the plan. Tables in one level share no inline
    /// foreign key, so a level can be loaded concurrently once every earlier
    /// level is done. Levels keep plan order internally.
    pub fn levels(&self) -> Vec<Vec<&TableDef>> {
        let mut level_of: Vec<usize> = Vec::with_capacity(self.tables.len());
        for (i, table) in self.tables.iter().enumerate() {
            let level = table
                .referenced_tables()
                .into_iter()
                .filter_map(|r| self.position(r))
                .filter(|&p| p < i)
                .map(|p| level_of[p] + 1)
                .max()
                .unwrap_or(0);
            level_of.push(level);
        }

        let depth = level_of.iter().max().map(|m| m + 1).unwrap_or(0);
        let mut levels: Vec<Vec<&TableDef>> = vec![Vec::new(); depth];
        for (table, level) in self.tables.iter().zip(level_of) {
            levels[level].push(table);
        }
        levels
    }
}
