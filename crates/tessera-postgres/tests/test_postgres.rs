//! End-to-end tests against a live PostgreSQL server.
//!
//! Run with `DATABASE_URL=postgres://... cargo test -- --ignored`.

mod common;

use std::sync::Arc;

use common::init_tracing;
use sqlx::PgPool;
use tessera_postgres::{
    Anonymous, Cardinality, DataType, Engine, Model, PgBackend, Registry, RequestArguments,
    Table,
};

async fn pool() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    PgPool::connect(&url).await.unwrap()
}

async fn seed(pool: &PgPool) {
    for statement in [
        "DROP TABLE IF EXISTS tessera_posts",
        "DROP TABLE IF EXISTS tessera_people",
        "CREATE TABLE tessera_people (id BIGINT PRIMARY KEY, name TEXT NOT NULL)",
        "CREATE TABLE tessera_posts (id BIGINT PRIMARY KEY, title TEXT NOT NULL, \
         author_id BIGINT REFERENCES tessera_people (id))",
        "INSERT INTO tessera_people SELECT n, 'person ' || n FROM generate_series(1, 1000) AS n",
        "INSERT INTO tessera_posts SELECT n, 'post ' || n, (n % 3) + 1 FROM generate_series(1, 15) AS n",
    ] {
        sqlx::query(statement).execute(pool).await.unwrap();
    }
}

fn registry() -> Arc<Registry> {
    let people = Table::builder("tessera_people")
        .pg_column("id", "bigint")
        .pg_column("name", "text")
        .primary_key("id")
        .build()
        .unwrap();
    let posts = Table::builder("tessera_posts")
        .column("id", DataType::Integer)
        .column("title", DataType::String)
        .column("author_id", DataType::Integer)
        .primary_key("id")
        .foreign_key("author_id", "tessera_people", "id")
        .build()
        .unwrap();

    let registry = Registry::builder()
        .model(
            Model::builder("people", people.clone())
                .attribute("name")
                .unwrap()
                .relationship("posts", "posts", Cardinality::OneToMany, posts.col("author_id").unwrap())
                .build()
                .unwrap(),
        )
        .model(
            Model::builder("posts", posts.clone())
                .attribute("title")
                .unwrap()
                .relationship("author", "people", Cardinality::ManyToOne, posts.col("author_id").unwrap())
                .build()
                .unwrap(),
        )
        .build()
        .unwrap();
    Arc::new(registry)
}

fn ids(data: &serde_json::Value) -> Vec<String> {
    data.as_array()
        .unwrap()
        .iter()
        .map(|o| o["id"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_live_round_trip() {
    init_tracing();
    let pool = pool().await;
    seed(&pool).await;
    let engine = Engine::new(registry(), PgBackend::new(pool));

    // pagination with a total count
    let args = RequestArguments::parse([
        ("page[size]", "3"),
        ("page[number]", "2"),
        ("sort", "+id"),
    ])
    .unwrap();
    let doc = engine.get_collection("people", &args, &Anonymous).await.unwrap();
    assert_eq!(ids(&doc.data), vec!["4", "5", "6"]);
    assert_eq!(doc.meta["total"], serde_json::json!(1000));

    // modifier filter: below 4, exactly 6, or in [9, 12)
    let args = RequestArguments::parse([("filter[id]", "<4,6,>=9,<12")]).unwrap();
    let doc = engine.get_collection("posts", &args, &Anonymous).await.unwrap();
    assert_eq!(ids(&doc.data), vec!["1", "2", "3", "6", "9", "10", "11"]);
    assert_eq!(doc.meta["totalFiltered"], serde_json::json!(7));

    // a single modifier
    let args = RequestArguments::parse([("filter[id]", "<4")]).unwrap();
    let doc = engine.get_collection("posts", &args, &Anonymous).await.unwrap();
    assert_eq!(ids(&doc.data), vec!["1", "2", "3"]);

    // included authors, batched
    let args = RequestArguments::parse([("include", "author"), ("filter[id]", "1,2,3")]).unwrap();
    let doc = engine.get_collection("posts", &args, &Anonymous).await.unwrap();
    let mut included = ids(&serde_json::Value::Array(doc.included.clone()));
    included.sort();
    assert_eq!(included, vec!["1", "2", "3"]);

    // related collection of one person
    let doc = engine
        .get_related("people", "2", "posts", &RequestArguments::default(), &Anonymous)
        .await
        .unwrap();
    assert_eq!(ids(&doc.data), vec!["1", "4", "7", "10", "13"]);

    let err = engine
        .get_object("people", "5000", &RequestArguments::default(), &Anonymous)
        .await
        .unwrap_err();
    assert_eq!(err.status(), 404);
}
