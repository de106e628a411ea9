//! Resource fields.
//!
//! A model's fields share one namespace but come in four closed variants:
//! SQL-backed [`Attribute`]s, [`Derived`] values computed from a fetched
//! record, lazily joined [`Aggregate`]s and [`Relationship`]s to other models.

use std::fmt;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::db::{build_aggregate_sql, AggregateFunction, ColumnRef, FromItem};
use crate::{DataType, Record};

/// Function computing a derived field from its record.
pub type DeriveFn = Arc<dyn Fn(&Record) -> JsonValue + Send + Sync>;

/// Column or SQL expression selected under the field name.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    /// SQL expression, e.g. `"users"."name"` or `lower("users"."email")`
    pub expr: String,
    pub data_type: DataType,
    /// Backing column, `None` for computed expressions
    pub column: Option<ColumnRef>,
    /// Selectable for filters and derived fields, never serialized
    pub exclude: bool,
}

#[derive(Clone)]
pub struct Derived {
    pub name: String,
    /// Attributes read by `func`; selected whenever the field is visible
    pub depends_on: Vec<String>,
    pub func: DeriveFn,
}

impl fmt::Debug for Derived {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Derived")
            .field("name", &self.name)
            .field("depends_on", &self.depends_on)
            .finish_non_exhaustive()
    }
}

/// Aggregate over joined rows, e.g. the number of articles of a user.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub name: String,
    pub function: AggregateFunction,
    /// Tables joined only when the aggregate is materialized
    pub from_items: Vec<FromItem>,
}

impl Aggregate {
    pub fn expr(&self) -> String {
        build_aggregate_sql(&self.function)
    }

    pub fn data_type(&self) -> DataType {
        self.function.data_type()
    }
}

/// Relationship cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    OneToOne,
    ManyToOne,
    OneToMany,
    ManyToMany,
}

impl Cardinality {
    pub fn is_to_one(&self) -> bool {
        matches!(self, Cardinality::OneToOne | Cardinality::ManyToOne)
    }
}

/// Relationship to another model, referenced by type name.
#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    pub name: String,
    pub target: String,
    pub cardinality: Cardinality,
    /// Foreign key linking the two sides: on the owning model's base table
    /// for to-one relationships, on the target's base table for one-to-many,
    /// and the parent-side column of the association table for many-to-many.
    pub foreign_key: ColumnRef,
}

impl Relationship {
    pub fn new(name: &str, target: &str, cardinality: Cardinality, foreign_key: ColumnRef) -> Self {
        Self {
            name: name.to_string(),
            target: target.to_string(),
            cardinality,
            foreign_key,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Field {
    Attribute(Attribute),
    Derived(Derived),
    Aggregate(Aggregate),
    Relationship(Relationship),
}

impl Field {
    pub fn name(&self) -> &str {
        match self {
            Field::Attribute(f) => &f.name,
            Field::Derived(f) => &f.name,
            Field::Aggregate(f) => &f.name,
            Field::Relationship(f) => &f.name,
        }
    }

    /// Whether the field can appear under `attributes` in a resource object.
    pub fn is_attribute_like(&self) -> bool {
        match self {
            Field::Attribute(a) => !a.exclude,
            Field::Derived(_) | Field::Aggregate(_) => true,
            Field::Relationship(_) => false,
        }
    }

    pub fn as_relationship(&self) -> Option<&Relationship> {
        match self {
            Field::Relationship(rel) => Some(rel),
            _ => None,
        }
    }
}
