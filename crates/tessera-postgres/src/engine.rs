//! Request orchestration.
//!
//! [`Engine`] answers the JSON:API read endpoints: it builds the request's
//! [`Schema`], runs the queries on a [`Backend`], fetches included resources
//! level by level and assembles the [`Document`]. All per-request state
//! (schemas, records, the document accumulator) lives on the stack of one
//! call, so an engine is shared freely between concurrent requests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, instrument};

use crate::args::RequestArguments;
use crate::backend::Backend;
use crate::config::EngineConfig;
use crate::db::{
    self, exists, select_by_ids, select_included, select_many, select_one, select_related,
    CollectionQuery, Restriction, PARENT_ID, RANK,
};
use crate::model::{Model, Registry, Relationship, Schema};
use crate::record::{Record, Related};
use crate::response::{identifier, Document, DocumentBuilder};
use crate::{Result, SqlValue, TesseraError};

/// Identity used to parameterize access rules.
pub trait CurrentUser: Send + Sync {
    /// `None` for anonymous requests.
    fn id(&self) -> Option<SqlValue>;
}

/// An unauthenticated request.
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

impl CurrentUser for Anonymous {
    fn id(&self) -> Option<SqlValue> {
        None
    }
}

impl CurrentUser for SqlValue {
    fn id(&self) -> Option<SqlValue> {
        (!self.is_null()).then(|| self.clone())
    }
}

impl CurrentUser for Option<SqlValue> {
    fn id(&self) -> Option<SqlValue> {
        self.as_ref().and_then(CurrentUser::id)
    }
}

fn user_id(user: &dyn CurrentUser) -> SqlValue {
    user.id().unwrap_or(SqlValue::Null)
}

/// JSON:API read engine over a model registry.
pub struct Engine<B> {
    registry: Arc<Registry>,
    backend: B,
    config: EngineConfig,
}

impl<B: Backend> Engine<B> {
    pub fn new(registry: Arc<Registry>, backend: B) -> Self {
        Self::with_config(registry, backend, EngineConfig::default())
    }

    pub fn with_config(registry: Arc<Registry>, backend: B, config: EngineConfig) -> Self {
        Self {
            registry,
            backend,
            config,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// A requested type name; unknown types are not found.
    fn model(&self, type_name: &str) -> Result<&Arc<Model>> {
        self.registry
            .get(type_name)
            .ok_or_else(|| TesseraError::NotFound(format!("Unknown resource type '{}'", type_name)))
    }

    fn relationship<'m>(&self, model: &'m Model, name: &str) -> Result<&'m Relationship> {
        model.relationship(name).ok_or_else(|| {
            TesseraError::NotFound(format!(
                "Unknown relationship '{}' on type '{}'",
                name,
                model.type_name()
            ))
        })
    }

    /// `GET /{type}/{id}`
    #[instrument(skip(self, args, user))]
    pub async fn get_object(
        &self,
        type_name: &str,
        id: &str,
        args: &RequestArguments,
        user: &dyn CurrentUser,
    ) -> Result<Document> {
        let user = user_id(user);
        let model = self.model(type_name)?;
        let schema = Schema::init(&self.registry, model, args)?;

        let (_, record) = self.fetch_object(&schema, id, &user).await?;
        let mut records = vec![record];
        self.fetch_included(&schema, &mut records, &user).await?;

        let mut document = DocumentBuilder::new(self.config.member_case);
        let data = document
            .resource(&schema, &records[0])?
            .unwrap_or(JsonValue::Null);
        Ok(document.finish(data))
    }

    /// `GET /{type}`
    #[instrument(skip(self, args, user))]
    pub async fn get_collection(
        &self,
        type_name: &str,
        args: &RequestArguments,
        user: &dyn CurrentUser,
    ) -> Result<Document> {
        let user = user_id(user);
        let model = self.model(type_name)?;
        let schema = Schema::init(&self.registry, model, args)?;
        let query = select_many(&self.registry, &schema, args, &user, None)?;
        self.collection(&schema, query, &user).await
    }

    /// `GET /{type}/{id}/{relationship}`
    ///
    /// To-one relationships answer a single resource or null; to-many
    /// relationships are a full collection restricted to the parent.
    #[instrument(skip(self, args, user))]
    pub async fn get_related(
        &self,
        type_name: &str,
        id: &str,
        relationship: &str,
        args: &RequestArguments,
        user: &dyn CurrentUser,
    ) -> Result<Document> {
        let user = user_id(user);
        let parent = self.model(type_name)?;
        let rel = self.relationship(parent, relationship)?;
        let target = self.registry.model(&rel.target)?;
        let parent_id = self.check_parent(parent, id, &user).await?;
        let schema = Schema::init(&self.registry, target, args)?;

        if rel.cardinality.is_to_one() {
            let query = select_related(&self.registry, parent, relationship, &schema, &parent_id, &user)?;
            let mut records: Vec<Record> = self.backend.fetch_row(&query).await?.into_iter().collect();
            self.fetch_included(&schema, &mut records, &user).await?;

            let mut document = DocumentBuilder::new(self.config.member_case);
            let data = match records.first() {
                Some(record) => document.resource(&schema, record)?.unwrap_or(JsonValue::Null),
                None => JsonValue::Null,
            };
            return Ok(document.finish(data));
        }

        let restriction = Restriction::new(&self.registry, parent, relationship)?;
        let query = select_many(
            &self.registry,
            &schema,
            args,
            &user,
            Some((&restriction, &parent_id)),
        )?;
        self.collection(&schema, query, &user).await
    }

    /// `GET /{type}/{id}/relationships/{relationship}`: resource identifiers only.
    #[instrument(skip(self, user))]
    pub async fn get_relationship(
        &self,
        type_name: &str,
        id: &str,
        relationship: &str,
        user: &dyn CurrentUser,
    ) -> Result<Document> {
        let user = user_id(user);
        let parent = self.model(type_name)?;
        let rel = self.relationship(parent, relationship)?;
        let target = self.registry.model(&rel.target)?;
        let parent_id = self.check_parent(parent, id, &user).await?;

        let mut args = RequestArguments::default();
        args.fields.insert(
            target.type_name().to_string(),
            HashSet::from(["id".to_string()]),
        );
        let schema = Schema::unsorted(&self.registry, target, &args)?;

        let records = if rel.cardinality.is_to_one() {
            let query = select_related(&self.registry, parent, relationship, &schema, &parent_id, &user)?;
            self.backend.fetch_row(&query).await?.into_iter().collect()
        } else {
            let restriction = Restriction::new(&self.registry, parent, relationship)?;
            let query = select_many(
                &self.registry,
                &schema,
                &args,
                &user,
                Some((&restriction, &parent_id)),
            )?;
            self.backend.fetch_rows(&query.rows).await?
        };

        let mut identifiers = Vec::with_capacity(records.len());
        for record in &records {
            identifiers.push(identifier(target.type_name(), &record.id()?));
        }
        let data = if rel.cardinality.is_to_one() {
            identifiers.into_iter().next().unwrap_or(JsonValue::Null)
        } else {
            JsonValue::Array(identifiers)
        };
        Ok(DocumentBuilder::new(self.config.member_case).finish(data))
    }

    /// Full-text search across resource types, ordered by descending rank.
    ///
    /// Every type must declare a search vector. Pagination applies to the
    /// merged hits; `meta.total` counts all of them.
    #[instrument(skip(self, types, args, user))]
    pub async fn search(
        &self,
        term: &str,
        types: &[&str],
        args: &RequestArguments,
        user: &dyn CurrentUser,
    ) -> Result<Document> {
        if args.has_filters() {
            return Err(TesseraError::invalid_argument(
                "search",
                "cannot filter and search simultaneously",
            ));
        }
        let user = user_id(user);

        let mut hits: Vec<(f64, usize, SqlValue)> = Vec::new();
        let mut models = Vec::with_capacity(types.len());
        for (index, type_name) in types.iter().enumerate() {
            let model = self.model(type_name)?;
            let rows = self
                .backend
                .fetch_rows(&db::search(model, term, &user)?)
                .await?;
            for mut row in rows {
                let rank = match row.take(RANK) {
                    Some(SqlValue::Double(rank)) => rank,
                    _ => 0.0,
                };
                hits.push((rank, index, row.require("id")?.clone()));
            }
            models.push(model);
        }

        // stable: equal ranks keep type order, then each query's order
        hits.sort_by(|a, b| b.0.total_cmp(&a.0));
        let total = hits.len();
        let offset = args.offset.unwrap_or(0).max(0) as usize;
        let limit = args.limit.map_or(usize::MAX, |l| l.max(0) as usize);
        let page: Vec<(f64, usize, SqlValue)> = hits.into_iter().skip(offset).take(limit).collect();
        debug!(term, total, page = page.len(), "Search hits merged");

        let mut schemas = Vec::with_capacity(models.len());
        let mut fetched: HashMap<(usize, String), Record> = HashMap::new();
        for (index, model) in models.iter().enumerate() {
            let schema = Schema::unsorted(&self.registry, model, args)?;
            let ids: Vec<SqlValue> = page
                .iter()
                .filter(|(_, i, _)| *i == index)
                .map(|(_, _, id)| id.clone())
                .collect();
            if !ids.is_empty() {
                let mut records = Vec::with_capacity(ids.len());
                for chunk in ids.chunks(self.config.effective_chunk_size()) {
                    let query = select_by_ids(&schema, chunk, &user)?;
                    records.extend(self.backend.fetch_rows(&query).await?);
                }
                self.fetch_included(&schema, &mut records, &user).await?;
                for record in records {
                    fetched.insert((index, record.id()?), record);
                }
            }
            schemas.push(schema);
        }

        let mut document = DocumentBuilder::new(self.config.member_case);
        let mut data = Vec::with_capacity(page.len());
        for (rank, index, id) in page {
            // rows hidden by the access rule between the two queries are skipped
            let Some(mut record) = fetched.remove(&(index, id.key())) else {
                continue;
            };
            record.values.insert(RANK.to_string(), SqlValue::Double(rank));
            if let Some(object) = document.resource(&schemas[index], &record)? {
                data.push(object);
            }
        }
        document.meta("total", json!(total));
        Ok(document.finish(JsonValue::Array(data)))
    }

    /// Fetches one resource, telling a missing row from an inaccessible one.
    async fn fetch_object(&self, schema: &Schema, id: &str, user: &SqlValue) -> Result<(SqlValue, Record)> {
        let model = schema.model();
        let not_found = || TesseraError::NotFound(format!("{} '{}'", model.type_name(), id));
        let key = model.decode_id(id).ok_or_else(not_found)?;

        if let Some(record) = self.backend.fetch_row(&select_one(schema, &key, user)?).await? {
            return Ok((key, record));
        }
        match self.backend.fetch_value(&exists(model, &key)).await? {
            SqlValue::Bool(true) => Err(TesseraError::Forbidden(format!(
                "{} '{}'",
                model.type_name(),
                id
            ))),
            _ => Err(not_found()),
        }
    }

    /// Checks that the parent of a relationship endpoint is readable.
    async fn check_parent(&self, parent: &Arc<Model>, id: &str, user: &SqlValue) -> Result<SqlValue> {
        let mut args = RequestArguments::default();
        args.fields.insert(
            parent.type_name().to_string(),
            HashSet::from(["id".to_string()]),
        );
        let schema = Schema::unsorted(&self.registry, parent, &args)?;
        let (key, _) = self.fetch_object(&schema, id, user).await?;
        Ok(key)
    }

    async fn collection(&self, schema: &Schema, query: CollectionQuery, user: &SqlValue) -> Result<Document> {
        let mut records = self.backend.fetch_rows(&query.rows).await?;

        let mut document = DocumentBuilder::new(self.config.member_case);
        if let Some(total) = &query.total {
            document.meta("total", self.backend.fetch_value(total).await?.to_json());
        }
        if let Some(filtered) = &query.filtered {
            document.meta("totalFiltered", self.backend.fetch_value(filtered).await?.to_json());
        }

        self.fetch_included(schema, &mut records, user).await?;
        let data = document.resources(schema, &records)?;
        Ok(document.finish(data))
    }

    /// Attaches the visible relationships of `records`, one batched query per
    /// relationship and chunk, then recurses into the fetched children.
    fn fetch_included<'a>(
        &'a self,
        schema: &'a Schema,
        records: &'a mut [Record],
        user: &'a SqlValue,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            if records.is_empty() {
                return Ok(());
            }

            for (rel, target) in schema.visible_relationships() {
                let mut seen = HashSet::new();
                let mut parent_ids = Vec::new();
                for record in records.iter() {
                    let id = record.require("id")?;
                    if seen.insert(id.key()) {
                        parent_ids.push(id.clone());
                    }
                }

                let queries = select_included(
                    &self.registry,
                    schema.model(),
                    &rel.name,
                    target,
                    &parent_ids,
                    user,
                    self.config.effective_chunk_size(),
                )?;
                let mut children = if self.config.parallel_chunks {
                    try_join_all(queries.iter().map(|q| self.backend.fetch_rows(q)))
                        .await?
                        .into_iter()
                        .flatten()
                        .collect()
                } else {
                    let mut rows = Vec::new();
                    for query in &queries {
                        rows.extend(self.backend.fetch_rows(query).await?);
                    }
                    rows
                };
                debug!(
                    model = schema.model().type_name(),
                    relationship = %rel.name,
                    parents = parent_ids.len(),
                    chunks = queries.len(),
                    rows = children.len(),
                    "Fetched included resources"
                );

                self.fetch_included(target, &mut children, user).await?;

                let mut grouped: HashMap<String, Vec<Record>> = HashMap::new();
                for mut child in children {
                    let parent = child.take(PARENT_ID).ok_or_else(|| {
                        TesseraError::Internal(format!("Column '{}' not found in result set", PARENT_ID))
                    })?;
                    grouped.entry(parent.key()).or_default().push(child);
                }

                for record in records.iter_mut() {
                    let key = record.require("id")?.key();
                    let related = grouped.get(&key).cloned().unwrap_or_default();
                    let related = if rel.cardinality.is_to_one() {
                        Related::ToOne(related.into_iter().next().map(Box::new))
                    } else {
                        Related::ToMany(related)
                    };
                    record.set_related(&rel.name, related);
                }
            }

            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_user() {
        assert_eq!(Anonymous.id(), None);
        assert_eq!(SqlValue::Null.id(), None);
        assert_eq!(SqlValue::BigInt(3).id(), Some(SqlValue::BigInt(3)));
        assert_eq!(Some(SqlValue::BigInt(3)).id(), Some(SqlValue::BigInt(3)));
        assert_eq!(Option::<SqlValue>::None.id(), None);
        assert_eq!(user_id(&Anonymous), SqlValue::Null);
    }
}
