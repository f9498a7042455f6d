//! MySQL DDL synthesis.
//!
//! Turns a source [`TableDef`] into one `CREATE TABLE IF NOT EXISTS`
//! statement plus any foreign keys that have to wait until every table is
//! loaded. A foreign key group goes inline when its referenced table comes
//! earlier in the [`MigrationPlan`]; self-references and edges broken out of
//! a cycle become [`DeferredConstraint`]s applied with `ALTER TABLE`.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::core::identifier::{foreign_key_name, qualify_mysql, quote_mysql};
use crate::core::schema::TableDef;
use crate::core::traits::TypeMapper;
use crate::error::{MigrateError, Result};
use crate::plan::MigrationPlan;

/// Table options appended to every `CREATE TABLE`.
const TABLE_OPTIONS: &str = "ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci";

/// `CREATE DATABASE IF NOT EXISTS` with the utf8mb4 defaults every table uses.
pub fn create_database_sql(database: &str) -> Result<String> {
    Ok(format!(
        "CREATE DATABASE IF NOT EXISTS {} CHARACTER SET utf8mb4 COLLATE utf8mb4_unicode_ci",
        quote_mysql(database)?
    ))
}

/// DDL for one table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDdl {
    /// Table name.
    pub table: String,
    /// The `CREATE TABLE IF NOT EXISTS` statement.
    pub create_sql: String,
    /// Foreign keys to add after all data is loaded.
    pub deferred: Vec<DeferredConstraint>,
    /// Lossy or fallback type mapping warnings.
    pub warnings: Vec<String>,
}

/// A foreign key applied after the data load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredConstraint {
    pub database: String,
    pub table: String,
    pub name: String,
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
}

impl DeferredConstraint {
    /// Render as `ALTER TABLE ... ADD CONSTRAINT ... FOREIGN KEY ...`.
    pub fn to_sql(&self) -> Result<String> {
        let wrap = |e: MigrateError| MigrateError::ddl(&self.table, e);
        Ok(format!(
            "ALTER TABLE {} ADD {}",
            qualify_mysql(&self.database, &self.table).map_err(wrap)?,
            foreign_key_clause(
                &self.database,
                &self.name,
                &self.columns,
                &self.referenced_table,
                &self.referenced_columns
            )
            .map_err(wrap)?
        ))
    }
}

/// Builds MySQL DDL for source tables.
#[derive(Clone)]
pub struct DdlSynthesizer {
    mapper: Arc<dyn TypeMapper>,
    database: String,
    create_foreign_keys: bool,
}

impl DdlSynthesizer {
    pub fn new(mapper: Arc<dyn TypeMapper>, database: impl Into<String>) -> Self {
        Self {
            mapper,
            database: database.into(),
            create_foreign_keys: true,
        }
    }

    /// Enable or disable foreign key generation.
    pub fn with_foreign_keys(mut self, enabled: bool) -> Self {
        self.create_foreign_keys = enabled;
        self
    }

    /// Target database the DDL is qualified with.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// `CREATE DATABASE IF NOT EXISTS` for the target database.
    pub fn create_database_sql(&self) -> Result<String> {
        create_database_sql(&self.database)
    }

    /// Build the DDL for `table`, placing foreign keys by `plan` order.
    pub fn build_create_table(&self, table: &TableDef, plan: &MigrationPlan) -> Result<TableDdl> {
        let wrap = |e: MigrateError| MigrateError::ddl(&table.name, e);
        let mut lines = Vec::with_capacity(table.columns.len() + 2);
        let mut warnings = Vec::new();

        for col in &table.columns {
            let mapping = self.mapper.map_column(col);
            if let Some(warning) = &mapping.warning {
                let message = format!("Column {}.{}: {}", table.name, col.name, warning);
                warn!("{}", message);
                warnings.push(message);
            }
            let null_clause = if mapping.is_nullable { "" } else { " NOT NULL" };
            lines.push(format!(
                "{} {}{}",
                quote_mysql(&col.name).map_err(wrap)?,
                mapping.target_type,
                null_clause
            ));
        }

        if table.has_pk() {
            lines.push(format!(
                "PRIMARY KEY ({})",
                quote_list(&table.primary_key).map_err(wrap)?
            ));
        }

        let mut deferred = Vec::new();
        if self.create_foreign_keys {
            let mut used_names = HashSet::new();
            for group in table.foreign_key_groups() {
                let referenced_table = group[0].referenced_table.clone();
                if plan.position(&referenced_table).is_none() {
                    continue;
                }
                let columns: Vec<String> = group.iter().map(|fk| fk.column.clone()).collect();
                let referenced_columns: Vec<String> = group
                    .iter()
                    .map(|fk| fk.referenced_column.clone())
                    .collect();

                let col_refs: Vec<&str> = columns.iter().map(String::as_str).collect();
                let mut name = foreign_key_name(&table.name, &col_refs);
                if !used_names.insert(name.clone()) {
                    let mut parts = col_refs.clone();
                    parts.push(&referenced_table);
                    name = foreign_key_name(&table.name, &parts);
                    used_names.insert(name.clone());
                }

                if plan.is_before(&referenced_table, &table.name) {
                    lines.push(
                        foreign_key_clause(
                            &self.database,
                            &name,
                            &columns,
                            &referenced_table,
                            &referenced_columns,
                        )
                        .map_err(wrap)?,
                    );
                } else {
                    debug!(
                        "Deferring foreign key {} on {} -> {}",
                        name, table.name, referenced_table
                    );
                    deferred.push(DeferredConstraint {
                        database: self.database.clone(),
                        table: table.name.clone(),
                        name,
                        columns,
                        referenced_table,
                        referenced_columns,
                    });
                }
            }
        }

        let create_sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n) {}",
            qualify_mysql(&self.database, &table.name).map_err(wrap)?,
            lines.join(",\n    "),
            TABLE_OPTIONS
        );

        Ok(TableDdl {
            table: table.name.clone(),
            create_sql,
            deferred,
            warnings,
        })
    }
}

fn quote_list(names: &[String]) -> Result<String> {
    let quoted = names
        .iter()
        .map(|n| quote_mysql(n))
        .collect::<Result<Vec<_>>>()?;
    Ok(quoted.join(", "))
}

fn foreign_key_clause(
    database: &str,
    name: &str,
    columns: &[String],
    referenced_table: &str,
    referenced_columns: &[String],
) -> Result<String> {
    Ok(format!(
        "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
        quote_mysql(name)?,
        quote_list(columns)?,
        qualify_mysql(database, referenced_table)?,
        quote_list(referenced_columns)?
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{ColumnDef, ForeignKeyRef, MaxLength};
    use crate::typemap::TypeMap;

    fn synth() -> DdlSynthesizer {
        DdlSynthesizer::new(Arc::new(TypeMap::mssql_to_mysql()), "shop")
    }

    fn col(name: &str, ty: &str, len: MaxLength, nullable: bool) -> ColumnDef {
        let mut c = ColumnDef::new(name, ty, len);
        c.is_nullable = nullable;
        c
    }

    fn fk(constraint: &str, column: &str, table: &str, ref_col: &str, ordinal: i32) -> ForeignKeyRef {
        ForeignKeyRef {
            constraint: constraint.to_string(),
            column: column.to_string(),
            referenced_table: table.to_string(),
            referenced_column: ref_col.to_string(),
            ordinal,
        }
    }

    fn customers() -> TableDef {
        let mut t = TableDef::new("dbo", "customers");
        t.columns = vec![
            col("id", "int", MaxLength::NotApplicable, false),
            col("name", "nvarchar", MaxLength::Bounded(50), true),
        ];
        t.primary_key = vec!["id".into()];
        t
    }

    fn orders() -> TableDef {
        let mut t = TableDef::new("dbo", "orders");
        t.columns = vec![
            col("id", "int", MaxLength::NotApplicable, false),
            col("customer_id", "int", MaxLength::NotApplicable, true),
            col("amount", "decimal", MaxLength::NotApplicable, true),
        ];
        t.primary_key = vec!["id".into()];
        t.foreign_keys = vec![fk("FK_orders_customers", "customer_id", "customers", "id", 1)];
        t
    }

    #[test]
    fn test_customers_orders_example() {
        let plan = MigrationPlan::build(vec![orders(), customers()]);
        let s = synth();

        let c = s.build_create_table(&plan.tables()[0], &plan).unwrap();
        assert_eq!(c.table, "customers");
        assert!(c.create_sql.starts_with("CREATE TABLE IF NOT EXISTS `shop`.`customers` ("));
        assert!(c.create_sql.contains("`id` INT NOT NULL"));
        assert!(c.create_sql.contains("`name` VARCHAR(50)"));
        assert!(c.create_sql.contains("PRIMARY KEY (`id`)"));
        assert!(c.create_sql.ends_with("ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci"));

        let o = s.build_create_table(&plan.tables()[1], &plan).unwrap();
        assert!(o.create_sql.contains("`amount` DECIMAL(10,2)"));
        assert!(o.create_sql.contains(
            "CONSTRAINT `fk_orders_customer_id` FOREIGN KEY (`customer_id`) REFERENCES `shop`.`customers` (`id`)"
        ));
        assert!(o.deferred.is_empty());
        assert!(o.warnings.is_empty());
    }

    #[test]
    fn test_composite_primary_key_single_clause() {
        let mut t = TableDef::new("dbo", "order_lines");
        t.columns = vec![
            col("order_id", "int", MaxLength::NotApplicable, false),
            col("line_no", "int", MaxLength::NotApplicable, false),
        ];
        t.primary_key = vec!["order_id".into(), "line_no".into()];
        let plan = MigrationPlan::build(vec![t.clone()]);

        let ddl = synth().build_create_table(&t, &plan).unwrap();
        assert_eq!(ddl.create_sql.matches("PRIMARY KEY").count(), 1);
        assert!(ddl.create_sql.contains("PRIMARY KEY (`order_id`, `line_no`)"));
    }

    #[test]
    fn test_composite_foreign_key_kept_together() {
        let mut parent = TableDef::new("dbo", "orders");
        parent.columns = vec![
            col("region", "char", MaxLength::Bounded(2), false),
            col("order_no", "int", MaxLength::NotApplicable, false),
        ];
        parent.primary_key = vec!["region".into(), "order_no".into()];

        let mut child = TableDef::new("dbo", "order_lines");
        child.columns = parent.columns.clone();
        child.foreign_keys = vec![
            fk("FK_lines", "order_no", "orders", "order_no", 2),
            fk("FK_lines", "region", "orders", "region", 1),
        ];

        let plan = MigrationPlan::build(vec![child.clone(), parent]);
        let ddl = synth().build_create_table(&child, &plan).unwrap();
        assert!(ddl.create_sql.contains(
            "FOREIGN KEY (`region`, `order_no`) REFERENCES `shop`.`orders` (`region`, `order_no`)"
        ));
        assert_eq!(ddl.create_sql.matches("FOREIGN KEY").count(), 1);
    }

    #[test]
    fn test_self_reference_is_deferred() {
        let mut t = TableDef::new("dbo", "employees");
        t.columns = vec![
            col("id", "int", MaxLength::NotApplicable, false),
            col("manager_id", "int", MaxLength::NotApplicable, true),
        ];
        t.primary_key = vec!["id".into()];
        t.foreign_keys = vec![fk("FK_mgr", "manager_id", "employees", "id", 1)];
        let plan = MigrationPlan::build(vec![t.clone()]);

        let ddl = synth().build_create_table(&t, &plan).unwrap();
        assert!(!ddl.create_sql.contains("FOREIGN KEY"));
        assert_eq!(ddl.deferred.len(), 1);
        assert_eq!(
            ddl.deferred[0].to_sql().unwrap(),
            "ALTER TABLE `shop`.`employees` ADD CONSTRAINT `fk_employees_manager_id` \
             FOREIGN KEY (`manager_id`) REFERENCES `shop`.`employees` (`id`)"
        );
    }

    #[test]
    fn test_cycle_defers_forward_edge_only() {
        let mut a = TableDef::new("dbo", "a");
        a.columns = vec![col("b_id", "int", MaxLength::NotApplicable, true)];
        a.foreign_keys = vec![fk("FK_a_b", "b_id", "b", "id", 1)];
        let mut b = TableDef::new("dbo", "b");
        b.columns = vec![col("a_id", "int", MaxLength::NotApplicable, true)];
        b.foreign_keys = vec![fk("FK_b_a", "a_id", "a", "id", 1)];

        let plan = MigrationPlan::build(vec![a.clone(), b.clone()]);
        let s = synth();
        let ddl_a = s.build_create_table(&a, &plan).unwrap();
        let ddl_b = s.build_create_table(&b, &plan).unwrap();

        assert_eq!(ddl_a.deferred.len(), 1);
        assert!(ddl_b.deferred.is_empty());
        assert!(ddl_b.create_sql.contains("REFERENCES `shop`.`a`"));
    }

    #[test]
    fn test_identifiers_are_quoted() {
        let mut t = TableDef::new("dbo", "odd`name");
        t.columns = vec![col("we`ird", "int", MaxLength::NotApplicable, true)];
        let plan = MigrationPlan::build(vec![t.clone()]);
        let ddl = synth().build_create_table(&t, &plan).unwrap();
        assert!(ddl.create_sql.contains("`shop`.`odd``name`"));
        assert!(ddl.create_sql.contains("`we``ird` INT"));
    }

    #[test]
    fn test_invalid_identifier_is_ddl_error() {
        let mut t = TableDef::new("dbo", "t");
        t.columns = vec![col(&"c".repeat(65), "int", MaxLength::NotApplicable, true)];
        let plan = MigrationPlan::build(vec![t.clone()]);
        let err = synth().build_create_table(&t, &plan).unwrap_err();
        assert!(matches!(err, MigrateError::Ddl { .. }));
    }

    #[test]
    fn test_unmapped_type_warning_and_no_foreign_keys() {
        let mut t = orders();
        t.columns.push(col("location", "geography", MaxLength::NotApplicable, true));
        let plan = MigrationPlan::build(vec![customers(), t.clone()]);
        let ddl = synth()
            .with_foreign_keys(false)
            .build_create_table(&t, &plan)
            .unwrap();
        assert!(ddl.create_sql.contains("`location` LONGTEXT"));
        assert_eq!(ddl.warnings.len(), 1);
        assert!(!ddl.create_sql.contains("FOREIGN KEY"));
    }

    #[test]
    fn test_create_database_sql() {
        assert_eq!(
            synth().create_database_sql().unwrap(),
            "CREATE DATABASE IF NOT EXISTS `shop` CHARACTER SET utf8mb4 COLLATE utf8mb4_unicode_ci"
        );
    }
}
