//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tessera_postgres::{
    AggregateFunction, Backend, Cardinality, DataType, FromItem, Model, Query, Record, Registry,
    Result, SqlValue, Table, TesseraError,
};

/// Canned answer for queries whose SQL contains a pattern.
#[derive(Debug, Clone)]
pub enum Reply {
    Value(SqlValue),
    Rows(Vec<Record>),
}

/// In-memory [`Backend`] answering from rules, first match wins.
#[derive(Default)]
pub struct ScriptedBackend {
    rules: Vec<(String, Reply)>,
    log: Arc<Mutex<Vec<Query>>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, pattern: &str, reply: Reply) -> Self {
        self.rules.push((pattern.to_string(), reply));
        self
    }

    pub fn rows(self, pattern: &str, rows: Vec<Record>) -> Self {
        self.on(pattern, Reply::Rows(rows))
    }

    pub fn value(self, pattern: &str, value: SqlValue) -> Self {
        self.on(pattern, Reply::Value(value))
    }

    /// Executed queries, shared with the test after the backend moves into an engine.
    pub fn log(&self) -> Arc<Mutex<Vec<Query>>> {
        Arc::clone(&self.log)
    }

    fn reply(&self, query: &Query) -> Result<Reply> {
        self.log.lock().unwrap().push(query.clone());
        self.rules
            .iter()
            .find(|(pattern, _)| query.sql.contains(pattern.as_str()))
            .map(|(_, reply)| reply.clone())
            .ok_or_else(|| TesseraError::Database(format!("unexpected query: {}", query.sql)))
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn fetch_value(&self, query: &Query) -> Result<SqlValue> {
        match self.reply(query)? {
            Reply::Value(value) => Ok(value),
            Reply::Rows(_) => Err(TesseraError::Internal("expected a value".to_string())),
        }
    }

    async fn fetch_row(&self, query: &Query) -> Result<Option<Record>> {
        match self.reply(query)? {
            Reply::Rows(rows) => Ok(rows.into_iter().next()),
            Reply::Value(_) => Err(TesseraError::Internal("expected rows".to_string())),
        }
    }

    async fn fetch_rows(&self, query: &Query) -> Result<Vec<Record>> {
        match self.reply(query)? {
            Reply::Rows(rows) => Ok(rows),
            Reply::Value(_) => Err(TesseraError::Internal("expected rows".to_string())),
        }
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn int(v: i64) -> SqlValue {
    SqlValue::BigInt(v)
}

pub fn text(v: &str) -> SqlValue {
    SqlValue::String(v.to_string())
}

pub fn user(id: i64, name: &str) -> Record {
    Record::from_pairs([("id", int(id)), ("name", text(name))])
}

pub fn article(id: i64, title: &str) -> Record {
    Record::from_pairs([("id", int(id)), ("title", text(title)), ("published", SqlValue::Bool(true))])
}

pub fn comment(id: i64, body: &str) -> Record {
    Record::from_pairs([("id", int(id)), ("body", text(body))])
}

/// Adds the parent id column of a batched related row.
pub fn child_of(record: Record, parent: i64) -> Record {
    let mut values = record.values().clone();
    values.insert("__parent_id".to_string(), int(parent));
    Record::new(values)
}

/// Blog registry: users write articles, articles have comments and tags.
pub fn blog_registry() -> Arc<Registry> {
    let users = Table::builder("users")
        .column("id", DataType::Integer)
        .column("name", DataType::String)
        .primary_key("id")
        .build()
        .unwrap();
    let articles = Table::builder("articles")
        .column("id", DataType::Integer)
        .column("title", DataType::String)
        .column("published", DataType::Bool)
        .column("author_id", DataType::Integer)
        .primary_key("id")
        .foreign_key("author_id", "users", "id")
        .build()
        .unwrap();
    let comments = Table::builder("comments")
        .column("id", DataType::Integer)
        .column("body", DataType::String)
        .column("article_id", DataType::Integer)
        .column("author_id", DataType::Integer)
        .primary_key("id")
        .foreign_key("article_id", "articles", "id")
        .foreign_key("author_id", "users", "id")
        .build()
        .unwrap();
    let tags = Table::builder("tags")
        .column("id", DataType::Integer)
        .column("label", DataType::String)
        .primary_key("id")
        .build()
        .unwrap();
    let article_tags = Table::builder("article_tags")
        .column("article_id", DataType::Integer)
        .column("tag_id", DataType::Integer)
        .foreign_key("article_id", "articles", "id")
        .foreign_key("tag_id", "tags", "id")
        .build()
        .unwrap();

    let registry = Registry::builder()
        .model(
            Model::builder("users", users.clone())
                .attribute("name")
                .unwrap()
                .aggregate(
                    "article_count",
                    AggregateFunction::CountColumn(articles.pk().unwrap()),
                    vec![FromItem::new(articles.clone()).left()],
                )
                .relationship("articles", "articles", Cardinality::OneToMany, articles.col("author_id").unwrap())
                .build()
                .unwrap(),
        )
        .model(
            Model::builder("articles", articles.clone())
                .attribute("title")
                .unwrap()
                .attribute("published")
                .unwrap()
                .relationship("author", "users", Cardinality::ManyToOne, articles.col("author_id").unwrap())
                .relationship("comments", "comments", Cardinality::OneToMany, comments.col("article_id").unwrap())
                .relationship("tags", "tags", Cardinality::ManyToMany, article_tags.col("article_id").unwrap())
                .access("\"articles\".\"published\" OR \"articles\".\"author_id\" = $1")
                .unwrap()
                .search("\"articles\".\"search_vector\"")
                .unwrap()
                .build()
                .unwrap(),
        )
        .model(
            Model::builder("comments", comments.clone())
                .attribute("body")
                .unwrap()
                .relationship("article", "articles", Cardinality::ManyToOne, comments.col("article_id").unwrap())
                .relationship("author", "users", Cardinality::ManyToOne, comments.col("author_id").unwrap())
                .search("to_tsvector('english', \"comments\".\"body\")")
                .unwrap()
                .build()
                .unwrap(),
        )
        .model(
            Model::builder("tags", tags.clone())
                .attribute("label")
                .unwrap()
                .build()
                .unwrap(),
        )
        .build()
        .unwrap();
    Arc::new(registry)
}
