//! JSON:API reads over PostgreSQL.
//!
//! Resource types are declared once as [`Model`]s over table metadata and
//! collected into a [`Registry`]. Each request's query string becomes
//! [`RequestArguments`], which decide per field what is serialized and what
//! is only selected for sorting and filtering. Resource-level SQL is built
//! from that, executed through a [`Backend`], and assembled into a compound
//! [`Document`] with deduplicated `included` resources and count metadata.
//!
//! # Architecture
//!
//! ```text
//! query string ──> RequestArguments ──> Schema (visibility per field)
//!                                          |
//!                        db::select_* (FromClause, FilterClause, QueryBuilder)
//!                                          |
//!                               Backend (sqlx PgPool)
//!                                          |
//!                          Engine ──> DocumentBuilder ──> Document
//! ```
//!
//! # Declaring models
//!
//! ```rust,ignore
//! use tessera_postgres::{Cardinality, DataType, Model, Registry, Table};
//!
//! # fn example() -> tessera_postgres::Result<()> {
//! let users = Table::builder("users")
//!     .column("id", DataType::Integer)
//!     .column("name", DataType::String)
//!     .primary_key("id")
//!     .build()?;
//! let articles = Table::builder("articles")
//!     .column("id", DataType::Integer)
//!     .column("title", DataType::String)
//!     .column("author_id", DataType::Integer)
//!     .primary_key("id")
//!     .foreign_key("author_id", "users", "id")
//!     .build()?;
//!
//! let registry = Registry::builder()
//!     .model(
//!         Model::builder("users", users.clone())
//!             .attribute("name")?
//!             .relationship("articles", "articles", Cardinality::OneToMany, articles.col("author_id")?)
//!             .build()?,
//!     )
//!     .model(
//!         Model::builder("articles", articles.clone())
//!             .attribute("title")?
//!             .relationship("author", "users", Cardinality::ManyToOne, articles.col("author_id")?)
//!             .build()?,
//!     )
//!     .build()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Serving requests
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tessera_postgres::{Anonymous, Engine, PgBackend, RequestArguments};
//!
//! # async fn example(pool: sqlx::PgPool, registry: tessera_postgres::Registry) -> tessera_postgres::Result<()> {
//! let engine = Engine::new(Arc::new(registry), PgBackend::new(pool));
//! let args = RequestArguments::from_query_string("include=author&page[size]=10&sort=-title")?;
//! let document = engine.get_collection("articles", &args, &Anonymous).await?;
//! println!("{}", document.to_json());
//! # Ok(())
//! # }
//! ```
//!
//! # Safety
//!
//! Request values are always bound as parameters. Table, column and alias
//! names are validated when tables are built, and SQL snippets supplied by
//! models (expressions, access rules, join conditions) are checked to be a
//! single expression.

/// Query-string parsing into request arguments.
pub mod args;

/// Query execution backends.
pub mod backend;

/// Engine configuration.
pub mod config;

/// SQL construction: table metadata, joins, filters and resource queries.
pub mod db;

/// Request orchestration.
pub mod engine;

/// Resource models, the registry and per-request schemas.
pub mod model;

/// Fetched rows.
pub mod record;

/// Compound document assembly.
pub mod response;

/// Value and data type mapping.
pub mod types;

pub use args::{FilterSpec, IncludeTree, RequestArguments, SortSpec};
pub use backend::{Backend, ExecutorConfig, PgBackend};
pub use config::{EngineConfig, MemberCase, DEFAULT_CHUNK_SIZE};
pub use db::{
    AggregateFunction, ColumnRef, FilterOp, FromClause, FromItem, Query, Table, TableBuilder,
};
pub use engine::{Anonymous, CurrentUser, Engine};
pub use model::{Cardinality, Field, Model, ModelBuilder, Registry, Schema};
pub use record::{Record, Related};
pub use response::{Document, DocumentBuilder};
pub use types::{DataType, DecodeError, SqlValue};

pub use tessera_common::{Result, TesseraError};
