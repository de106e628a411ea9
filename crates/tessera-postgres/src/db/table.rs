//! Static table metadata.
//!
//! Tables carry just enough of the database schema to type attributes, infer
//! join conditions from foreign keys and resolve relationship linkage.

use std::sync::Arc;

use super::helpers::{quote_column, quote_identifier, validate_identifier, validate_identifier_part};
use crate::{DataType, Result, TesseraError};

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
}

/// `column` references `ref_table`.`ref_column`.
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKey {
    pub column: String,
    pub ref_table: String,
    pub ref_column: String,
}

/// A database table, optionally aliased.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    name: String,
    alias: Option<String>,
    columns: Vec<Column>,
    primary_key: Option<String>,
    foreign_keys: Vec<ForeignKey>,
}

impl Table {
    /// Starts declaring a table.
    pub fn builder(name: &str) -> TableBuilder {
        TableBuilder {
            name: name.to_string(),
            columns: Vec::new(),
            primary_key: None,
            foreign_keys: Vec::new(),
            unknown_types: Vec::new(),
        }
    }

    /// Underlying table name (ignores the alias).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name used to reference the table inside a query: the alias if any.
    pub fn reference_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn alias_name(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn primary_key(&self) -> Option<&str> {
        self.primary_key.as_deref()
    }

    pub fn foreign_keys(&self) -> &[ForeignKey] {
        &self.foreign_keys
    }

    /// Returns a copy of this table referenced under another name.
    pub fn alias(&self, alias: &str) -> Result<Arc<Table>> {
        validate_identifier_part(alias)?;
        Ok(Arc::new(Table {
            alias: Some(alias.to_string()),
            ..self.clone()
        }))
    }

    /// SQL for the FROM/JOIN position: `"name"` or `"name" AS "alias"`.
    pub fn to_sql(&self) -> String {
        match &self.alias {
            Some(alias) => format!("{} AS {}", quote_identifier(&self.name), quote_identifier(alias)),
            None => quote_identifier(&self.name),
        }
    }

    /// Typed reference to one of this table's columns.
    pub fn col(self: &Arc<Self>, name: &str) -> Result<ColumnRef> {
        if self.column(name).is_none() {
            return Err(TesseraError::configuration(format!(
                "Table '{}' has no column '{}'",
                self.name, name
            )));
        }
        Ok(ColumnRef {
            table: Arc::clone(self),
            column: name.to_string(),
        })
    }

    /// Reference to the primary key column.
    pub fn pk(self: &Arc<Self>) -> Result<ColumnRef> {
        let pk = self.primary_key.as_deref().ok_or_else(|| {
            TesseraError::configuration(format!("Table '{}' has no primary key", self.name))
        })?;
        self.col(pk)
    }
}

/// Builder for [`Table`]; validation happens once in [`TableBuilder::build`].
#[derive(Debug)]
pub struct TableBuilder {
    name: String,
    columns: Vec<Column>,
    primary_key: Option<String>,
    foreign_keys: Vec<ForeignKey>,
    unknown_types: Vec<(String, String)>,
}

impl TableBuilder {
    pub fn column(mut self, name: &str, data_type: DataType) -> Self {
        self.columns.push(Column {
            name: name.to_string(),
            data_type,
        });
        self
    }

    /// Declares a column by its PostgreSQL type name, as reported by
    /// `information_schema.columns.data_type` or `pg_type.typname`.
    ///
    /// A length or precision suffix such as `varchar(64)` is ignored.
    /// Unmapped types fail in [`TableBuilder::build`].
    pub fn pg_column(mut self, name: &str, pg_type: &str) -> Self {
        let base = pg_type.split('(').next().unwrap_or(pg_type).trim();
        match DataType::from_pg_name(base) {
            Some(data_type) => self.column(name, data_type),
            None => {
                self.unknown_types.push((name.to_string(), pg_type.to_string()));
                self
            }
        }
    }

    pub fn primary_key(mut self, column: &str) -> Self {
        self.primary_key = Some(column.to_string());
        self
    }

    pub fn foreign_key(mut self, column: &str, ref_table: &str, ref_column: &str) -> Self {
        self.foreign_keys.push(ForeignKey {
            column: column.to_string(),
            ref_table: ref_table.to_string(),
            ref_column: ref_column.to_string(),
        });
        self
    }

    pub fn build(self) -> Result<Arc<Table>> {
        validate_identifier(&self.name)?;
        if let Some((column, pg_type)) = self.unknown_types.first() {
            return Err(TesseraError::configuration(format!(
                "Column '{}' of table '{}' has unsupported type '{}'",
                column, self.name, pg_type
            )));
        }
        for (i, column) in self.columns.iter().enumerate() {
            validate_identifier_part(&column.name)?;
            if self.columns[..i].iter().any(|c| c.name == column.name) {
                return Err(TesseraError::configuration(format!(
                    "Duplicate column '{}' in table '{}'",
                    column.name, self.name
                )));
            }
        }
        if let Some(pk) = &self.primary_key {
            if !self.columns.iter().any(|c| &c.name == pk) {
                return Err(TesseraError::configuration(format!(
                    "Primary key '{}' is not a column of table '{}'",
                    pk, self.name
                )));
            }
        }
        for fk in &self.foreign_keys {
            if !self.columns.iter().any(|c| c.name == fk.column) {
                return Err(TesseraError::configuration(format!(
                    "Foreign key column '{}' is not a column of table '{}'",
                    fk.column, self.name
                )));
            }
            validate_identifier(&fk.ref_table)?;
            validate_identifier_part(&fk.ref_column)?;
        }

        Ok(Arc::new(Table {
            name: self.name,
            alias: None,
            columns: self.columns,
            primary_key: self.primary_key,
            foreign_keys: self.foreign_keys,
        }))
    }
}

/// A column of a specific (possibly aliased) table.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    table: Arc<Table>,
    column: String,
}

impl ColumnRef {
    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn data_type(&self) -> DataType {
        self.table
            .column(&self.column)
            .map(|c| c.data_type)
            .unwrap_or(DataType::String)
    }

    /// `"table"."column"` using the table's reference name.
    pub fn to_sql(&self) -> String {
        quote_column(self.table.reference_name(), &self.column)
    }

    /// Same column qualified by another table reference (used for aliased joins).
    pub fn to_sql_as(&self, qualifier: &str) -> String {
        quote_column(qualifier, &self.column)
    }
}
