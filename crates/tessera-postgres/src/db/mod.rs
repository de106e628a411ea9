//! SQL construction.
//!
//! Low-level pieces (table metadata, join resolution, parameterized
//! fragments, filter predicates) and the resource-level query constructors
//! built on them.
//!
//! # Examples
//!
//! ```ignore
//! use tessera_postgres::db::{FromClause, FromItem, Query, QueryBuilder, ColumnKind};
//!
//! let mut from = FromClause::new(FromItem::new(users.clone()));
//! from.push(FromItem::new(articles.clone()).left());
//!
//! let query = QueryBuilder::new(from)
//!     .column(Query::new(users.pk()?.to_sql()), "id", ColumnKind::Plain)
//!     .column(Query::new("COUNT(\"articles\".\"id\")"), "article_count", ColumnKind::Aggregate)
//!     .limit(10)
//!     .build_select()?;
//! // SELECT "users"."id" AS "id", COUNT("articles"."id") AS "article_count"
//! // FROM "users" LEFT OUTER JOIN "articles" ON "articles"."author_id" = "users"."id"
//! // GROUP BY "users"."id" LIMIT $1
//! ```

mod builder;
mod filter;
mod from_clause;
mod helpers;
mod query;
mod table;
mod types;


pub use builder::{ColumnKind, Query, QueryBuilder};
pub use filter::{Filter, FilterClause, FilterOp};
pub use from_clause::{FromClause, FromItem};
pub use helpers::{
    adjust_param_indices, build_aggregate_sql, inline_null_param, quote_column, quote_identifier,
    validate_identifier, validate_identifier_part, validate_sql_snippet,
};
pub use query::{
    exists, search, select_by_ids, select_included, select_many, select_one, select_related,
    CollectionQuery, Restriction, PARENT_ID, RANK,
};
pub use table::{Column, ColumnRef, ForeignKey, Table, TableBuilder};
pub use types::{AggregateFunction, OrderDirection};
