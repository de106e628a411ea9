//! Resource models.
//!
//! A [`Model`] declares one resource type over a base table and its
//! auxiliary joins: attributes, derived values, aggregates, relationships, an
//! optional row-level access rule and an optional full-text search vector.
//! Models are immutable once built and shared through a [`Registry`]; all
//! per-request state lives in a [`Schema`].
//!
//! ```ignore
//! let users = Model::builder("users", users_table.clone())
//!     .attribute("name")?
//!     .excluded_attribute("password_hash")?
//!     .aggregate(
//!         "article_count",
//!         AggregateFunction::CountColumn(articles_table.pk()?),
//!         vec![FromItem::new(articles_table.clone()).left()],
//!     )
//!     .relationship("articles", "articles", Cardinality::OneToMany, articles_table.col("author_id")?)
//!     .build()?;
//! ```

mod field;
mod registry;
mod schema;

pub use field::{
    Aggregate, Attribute, Cardinality, DeriveFn, Derived, Field, Relationship,
};
pub use registry::{Link, Registry, RegistryBuilder};
pub use schema::{FieldState, Schema};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use crate::args::FilterSpec;
use crate::db::{
    validate_identifier_part, validate_sql_snippet, AggregateFunction, ColumnRef, FromClause,
    FromItem, Query, Table,
};
use crate::{DataType, Record, Result, SqlValue, TesseraError};

/// Custom predicate for a filter name, taking precedence over the generic
/// attribute filter.
pub type FilterOverride = Arc<dyn Fn(&FilterSpec) -> Result<Query> + Send + Sync>;

const RESERVED: &[&str] = &["id", "type"];

/// A statically declared resource type.
pub struct Model {
    type_name: String,
    from: FromClause,
    pk: ColumnRef,
    fields: IndexMap<String, Field>,
    access: Option<String>,
    search: Option<String>,
    filter_overrides: HashMap<String, FilterOverride>,
}

impl Model {
    pub fn builder(type_name: &str, base: Arc<Table>) -> ModelBuilder {
        ModelBuilder {
            type_name: type_name.to_string(),
            from: FromClause::new(FromItem::new(base)),
            fields: Vec::new(),
            access: None,
            search: None,
            filter_overrides: HashMap::new(),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn from_clause(&self) -> &FromClause {
        &self.from
    }

    /// The base table, first item of the FROM clause.
    pub fn base(&self) -> &Arc<Table> {
        self.pk.table()
    }

    /// Primary key column of the base table.
    pub fn pk(&self) -> &ColumnRef {
        &self.pk
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    /// Fields in declaration order, `id` first.
    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.values()
    }

    pub fn relationship(&self, name: &str) -> Option<&Relationship> {
        self.fields.get(name).and_then(Field::as_relationship)
    }

    pub fn relationships(&self) -> impl Iterator<Item = &Relationship> {
        self.fields.values().filter_map(Field::as_relationship)
    }

    /// Row-level access predicate; `$1` is the current user id.
    pub fn access(&self) -> Option<&str> {
        self.access.as_deref()
    }

    /// Full-text search vector expression.
    pub fn search(&self) -> Option<&str> {
        self.search.as_deref()
    }

    pub fn filter_override(&self, name: &str) -> Option<&FilterOverride> {
        self.filter_overrides.get(name)
    }

    /// Decodes a textual resource id into the primary key's type.
    pub fn decode_id(&self, id: &str) -> Option<SqlValue> {
        match self.pk.data_type().decode(id) {
            Ok(SqlValue::Null) | Err(_) => None,
            Ok(value) => Some(value),
        }
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("type_name", &self.type_name)
            .field("from", &self.from)
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .field("access", &self.access)
            .field("search", &self.search)
            .field(
                "filter_overrides",
                &self.filter_overrides.keys().collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Builder for [`Model`]. Names and expressions are validated in
/// [`ModelBuilder::build`] unless noted.
pub struct ModelBuilder {
    type_name: String,
    from: FromClause,
    fields: Vec<Field>,
    access: Option<String>,
    search: Option<String>,
    filter_overrides: HashMap<String, FilterOverride>,
}

impl ModelBuilder {
    fn base(&self) -> Result<&Arc<Table>> {
        self.from
            .base()
            .map(|item| &item.table)
            .ok_or_else(|| TesseraError::configuration("model has no base table"))
    }

    /// Joins an auxiliary table whose columns back direct attributes.
    pub fn join(mut self, item: FromItem) -> Self {
        self.from.push(item);
        self
    }

    /// Attribute backed by the base table column of the same name.
    pub fn attribute(self, name: &str) -> Result<Self> {
        let column = self.base()?.col(name)?;
        Ok(self.column(name, column))
    }

    /// Base table column selectable for filters and derived fields but
    /// never serialized.
    pub fn excluded_attribute(mut self, name: &str) -> Result<Self> {
        let column = self.base()?.col(name)?;
        self.fields.push(Field::Attribute(Attribute {
            name: name.to_string(),
            expr: column.to_sql(),
            data_type: column.data_type(),
            column: Some(column),
            exclude: true,
        }));
        Ok(self)
    }

    /// Attribute backed by any column of the FROM clause.
    pub fn column(mut self, name: &str, column: ColumnRef) -> Self {
        self.fields.push(Field::Attribute(Attribute {
            name: name.to_string(),
            expr: column.to_sql(),
            data_type: column.data_type(),
            column: Some(column),
            exclude: false,
        }));
        self
    }

    /// Attribute computed by a SQL expression over the FROM clause.
    pub fn expression(mut self, name: &str, sql: &str, data_type: DataType) -> Result<Self> {
        validate_sql_snippet("attribute expression", sql)?;
        self.fields.push(Field::Attribute(Attribute {
            name: name.to_string(),
            expr: sql.to_string(),
            data_type,
            column: None,
            exclude: false,
        }));
        Ok(self)
    }

    pub fn derived<F>(mut self, name: &str, depends_on: &[&str], func: F) -> Self
    where
        F: Fn(&Record) -> JsonValue + Send + Sync + 'static,
    {
        self.fields.push(Field::Derived(Derived {
            name: name.to_string(),
            depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
            func: Arc::new(func),
        }));
        self
    }

    pub fn aggregate(mut self, name: &str, function: AggregateFunction, from_items: Vec<FromItem>) -> Self {
        self.fields.push(Field::Aggregate(Aggregate {
            name: name.to_string(),
            function,
            from_items,
        }));
        self
    }

    pub fn relationship(
        mut self,
        name: &str,
        target: &str,
        cardinality: Cardinality,
        foreign_key: ColumnRef,
    ) -> Self {
        self.fields.push(Field::Relationship(Relationship::new(
            name,
            target,
            cardinality,
            foreign_key,
        )));
        self
    }

    /// Row-level access predicate over the FROM clause; `$1` is bound to the
    /// current user id, or replaced by `NULL` for anonymous requests.
    pub fn access(mut self, predicate: &str) -> Result<Self> {
        validate_sql_snippet("access rule", predicate)?;
        self.access = Some(predicate.to_string());
        Ok(self)
    }

    /// Full-text search over a `tsvector` expression.
    pub fn search(mut self, tsvector: &str) -> Result<Self> {
        validate_sql_snippet("search vector", tsvector)?;
        self.search = Some(tsvector.to_string());
        Ok(self)
    }

    pub fn filter_override<F>(mut self, name: &str, predicate: F) -> Self
    where
        F: Fn(&FilterSpec) -> Result<Query> + Send + Sync + 'static,
    {
        self.filter_overrides
            .insert(name.to_string(), Arc::new(predicate));
        self
    }

    pub fn build(self) -> Result<Model> {
        validate_type_name(&self.type_name)?;
        let pk = self.base()?.pk()?;

        let mut fields = IndexMap::with_capacity(self.fields.len() + 1);
        fields.insert(
            "id".to_string(),
            Field::Attribute(Attribute {
                name: "id".to_string(),
                expr: pk.to_sql(),
                data_type: pk.data_type(),
                column: Some(pk.clone()),
                exclude: false,
            }),
        );

        for field in self.fields {
            let name = field.name().to_string();
            if RESERVED.contains(&name.as_str()) {
                return Err(TesseraError::configuration(format!(
                    "'{}' is a reserved field name in model '{}'",
                    name, self.type_name
                )));
            }
            validate_identifier_part(&name)?;
            if let Field::Attribute(Attribute { column: Some(column), .. }) = &field {
                if !self.from.contains(column.table().reference_name()) {
                    return Err(TesseraError::configuration(format!(
                        "Attribute '{}' of model '{}' reads table '{}' outside its FROM clause",
                        name,
                        self.type_name,
                        column.table().reference_name()
                    )));
                }
            }
            if fields.insert(name.clone(), field).is_some() {
                return Err(TesseraError::configuration(format!(
                    "Duplicate field '{}' in model '{}'",
                    name, self.type_name
                )));
            }
        }

        for field in fields.values() {
            if let Field::Derived(derived) = field {
                for dependency in &derived.depends_on {
                    if !matches!(fields.get(dependency), Some(Field::Attribute(_))) {
                        return Err(TesseraError::configuration(format!(
                            "Derived field '{}' of model '{}' depends on unknown attribute '{}'",
                            derived.name, self.type_name, dependency
                        )));
                    }
                }
            }
        }

        Ok(Model {
            type_name: self.type_name,
            from: self.from,
            pk,
            fields,
            access: self.access,
            search: self.search,
            filter_overrides: self.filter_overrides,
        })
    }
}

/// Type names may be kebab-case (`blog-posts`) since they never reach SQL.
fn validate_type_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(TesseraError::configuration(format!(
            "Invalid resource type name '{}'",
            name
        )))
    }
}
