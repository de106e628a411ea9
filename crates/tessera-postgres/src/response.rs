//! Compound document assembly.
//!
//! Records fetched for a [`Schema`] serialize into JSON:API resource objects.
//! Related records attached to them become resource identifiers under
//! `relationships`, and their full bodies are accumulated once per
//! `(type, id)` into `included`.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashSet;

use crate::config::MemberCase;
use crate::db::RANK;
use crate::model::{Field, Schema};
use crate::record::{Record, Related};
use crate::Result;

type ResourceKey = (String, String);

/// Top-level response document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Document {
    pub data: JsonValue,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub included: Vec<JsonValue>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, JsonValue>,
}

impl Document {
    pub fn to_json(&self) -> JsonValue {
        let mut out = Map::new();
        out.insert("data".to_string(), self.data.clone());
        if !self.included.is_empty() {
            out.insert("included".to_string(), JsonValue::Array(self.included.clone()));
        }
        if !self.meta.is_empty() {
            out.insert("meta".to_string(), JsonValue::Object(self.meta.clone()));
        }
        JsonValue::Object(out)
    }
}

/// Request-scoped accumulator for one [`Document`].
#[derive(Debug)]
pub struct DocumentBuilder {
    member_case: MemberCase,
    primary: HashSet<ResourceKey>,
    included: IndexMap<ResourceKey, JsonValue>,
    meta: Map<String, JsonValue>,
}

impl DocumentBuilder {
    pub fn new(member_case: MemberCase) -> Self {
        Self {
            member_case,
            primary: HashSet::new(),
            included: IndexMap::new(),
            meta: Map::new(),
        }
    }

    /// Serializes a primary resource; `None` for an empty record.
    pub fn resource(&mut self, schema: &Schema, record: &Record) -> Result<Option<JsonValue>> {
        match self.serialize(schema, record)? {
            Some((key, object)) => {
                self.primary.insert(key);
                Ok(Some(object))
            }
            None => Ok(None),
        }
    }

    /// Serializes a list of primary resources, skipping empty records.
    pub fn resources(&mut self, schema: &Schema, records: &[Record]) -> Result<JsonValue> {
        let mut data = Vec::with_capacity(records.len());
        for record in records {
            if let Some(object) = self.resource(schema, record)? {
                data.push(object);
            }
        }
        Ok(JsonValue::Array(data))
    }

    pub fn meta(&mut self, key: &str, value: JsonValue) {
        self.meta.insert(key.to_string(), value);
    }

    /// Completes the document; primary resources are not repeated in `included`.
    pub fn finish(self, data: JsonValue) -> Document {
        let primary = self.primary;
        let included = self
            .included
            .into_iter()
            .filter(|(key, _)| !primary.contains(key))
            .map(|(_, object)| object)
            .collect();
        Document {
            data,
            included,
            meta: self.meta,
        }
    }

    fn serialize(&mut self, schema: &Schema, record: &Record) -> Result<Option<(ResourceKey, JsonValue)>> {
        if record.is_empty() {
            return Ok(None);
        }
        let type_name = schema.model().type_name().to_string();
        let id = record.id()?;

        let mut attributes = Map::new();
        for field in schema.visible_attributes() {
            let value = match field {
                Field::Derived(derived) => (derived.func)(record),
                other => record
                    .get(other.name())
                    .map(|v| v.to_json())
                    .unwrap_or(JsonValue::Null),
            };
            attributes.insert(self.member_case.apply(field.name()), value);
        }

        let mut relationships = Map::new();
        for (rel, target) in schema.visible_relationships() {
            let related = record.related(&rel.name);
            let mut identifiers = Vec::new();
            for child in related.map(Related::records).unwrap_or_default() {
                if let Some(((child_type, child_id), object)) = self.serialize(target, child)? {
                    identifiers.push(identifier(&child_type, &child_id));
                    self.include((child_type, child_id), object);
                }
            }
            let data = if rel.cardinality.is_to_one() {
                identifiers.into_iter().next().unwrap_or(JsonValue::Null)
            } else {
                JsonValue::Array(identifiers)
            };
            let mut linkage = Map::new();
            linkage.insert("data".to_string(), data);
            relationships.insert(self.member_case.apply(&rel.name), JsonValue::Object(linkage));
        }

        let mut object = Map::new();
        object.insert("type".to_string(), JsonValue::String(type_name.clone()));
        object.insert("id".to_string(), JsonValue::String(id.clone()));
        object.insert("attributes".to_string(), JsonValue::Object(attributes));
        if !relationships.is_empty() {
            object.insert("relationships".to_string(), JsonValue::Object(relationships));
        }
        if let Some(rank) = record.get(RANK).filter(|v| !v.is_null()) {
            let mut meta = Map::new();
            meta.insert("rank".to_string(), rank.to_json());
            object.insert("meta".to_string(), JsonValue::Object(meta));
        }

        Ok(Some(((type_name, id), JsonValue::Object(object))))
    }

    /// Adds an included resource, merging relationship linkage into an
    /// earlier copy reached through another path.
    fn include(&mut self, key: ResourceKey, object: JsonValue) {
        let Some(existing) = self.included.get_mut(&key) else {
            self.included.insert(key, object);
            return;
        };
        let Some(incoming) = object.get("relationships").and_then(JsonValue::as_object) else {
            return;
        };
        if let JsonValue::Object(existing) = existing {
            let target = existing
                .entry("relationships")
                .or_insert_with(|| JsonValue::Object(Map::new()));
            if let JsonValue::Object(target) = target {
                for (name, linkage) in incoming {
                    target.entry(name.clone()).or_insert_with(|| linkage.clone());
                }
            }
        }
    }
}

/// `{"type": ..., "id": ...}`
pub fn identifier(type_name: &str, id: &str) -> JsonValue {
    let mut object = Map::new();
    object.insert("type".to_string(), JsonValue::String(type_name.to_string()));
    object.insert("id".to_string(), JsonValue::String(id.to_string()));
    JsonValue::Object(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::RequestArguments;
    use crate::db::Table;
    use crate::model::{Cardinality, Model, Registry};
    use crate::{DataType, SqlValue};
    use serde_json::json;

    fn registry() -> Registry {
        let users = Table::builder("users")
            .column("id", DataType::Integer)
            .column("first_name", DataType::String)
            .column("last_name", DataType::String)
            .primary_key("id")
            .build()
            .unwrap();
        let articles = Table::builder("articles")
            .column("id", DataType::Integer)
            .column("title", DataType::String)
            .column("author_id", DataType::Integer)
            .primary_key("id")
            .foreign_key("author_id", "users", "id")
            .build()
            .unwrap();
        Registry::builder()
            .model(
                Model::builder("users", users.clone())
                    .attribute("first_name")
                    .unwrap()
                    .attribute("last_name")
                    .unwrap()
                    .derived("full_name", &["first_name", "last_name"], |r| {
                        let part = |name| r.get(name).map(|v: &SqlValue| v.to_string()).unwrap_or_default();
                        json!(format!("{} {}", part("first_name"), part("last_name")))
                    })
                    .relationship("articles", "articles", Cardinality::OneToMany, articles.col("author_id").unwrap())
                    .build()
                    .unwrap(),
            )
            .model(
                Model::builder("articles", articles.clone())
                    .attribute("title")
                    .unwrap()
                    .relationship("author", "users", Cardinality::ManyToOne, articles.col("author_id").unwrap())
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap()
    }

    fn schema(registry: &Registry, type_name: &str, query: &str) -> Schema {
        let args = RequestArguments::from_query_string(query).unwrap();
        Schema::init(registry, registry.model(type_name).unwrap(), &args).unwrap()
    }

    fn user(id: i64) -> Record {
        Record::from_pairs([
            ("id", SqlValue::BigInt(id)),
            ("first_name", SqlValue::String("Ann".to_string())),
            ("last_name", SqlValue::String("Lee".to_string())),
        ])
    }

    fn article(id: i64, title: &str) -> Record {
        Record::from_pairs([
            ("id", SqlValue::BigInt(id)),
            ("title", SqlValue::String(title.to_string())),
        ])
    }

    #[test]
    fn test_resource_object() {
        let registry = registry();
        let schema = schema(&registry, "users", "");
        let mut builder = DocumentBuilder::new(MemberCase::Snake);
        let object = builder.resource(&schema, &user(1)).unwrap().unwrap();
        assert_eq!(
            object,
            json!({
                "type": "users",
                "id": "1",
                "attributes": {"first_name": "Ann", "last_name": "Lee", "full_name": "Ann Lee"}
            })
        );
        let document = builder.finish(object);
        assert_eq!(document.to_json().as_object().unwrap().len(), 1);
    }

    #[test]
    fn test_empty_record_is_absent() {
        let registry = registry();
        let schema = schema(&registry, "users", "");
        let mut builder = DocumentBuilder::new(MemberCase::Snake);
        assert!(builder.resource(&schema, &Record::default()).unwrap().is_none());
        let data = builder.resources(&schema, &[Record::default(), user(2)]).unwrap();
        assert_eq!(data.as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_member_case() {
        let registry = registry();
        let schema = schema(&registry, "users", "fields[users]=first-name");
        let mut builder = DocumentBuilder::new(MemberCase::Camel);
        let object = builder.resource(&schema, &user(1)).unwrap().unwrap();
        assert_eq!(object["attributes"], json!({"firstName": "Ann"}));
    }

    #[test]
    fn test_relationships_and_included() {
        let registry = registry();
        let schema = schema(&registry, "users", "include=articles.author&fields[users]=last_name");

        let mut first = article(10, "One");
        first.set_related("author", Related::ToOne(Some(Box::new(user(1)))));
        let mut second = article(11, "Two");
        second.set_related("author", Related::ToOne(Some(Box::new(user(1)))));
        let mut record = user(1);
        record.set_related("articles", Related::ToMany(vec![first, second]));

        let mut builder = DocumentBuilder::new(MemberCase::Snake);
        let data = builder.resource(&schema, &record).unwrap().unwrap();
        assert_eq!(
            data["relationships"],
            json!({"articles": {"data": [
                {"type": "articles", "id": "10"},
                {"type": "articles", "id": "11"}
            ]}})
        );

        let document = builder.finish(data);
        // the author is the primary resource and is not repeated
        assert_eq!(document.included.len(), 2);
        assert_eq!(
            document.included[0]["relationships"],
            json!({"author": {"data": {"type": "users", "id": "1"}}})
        );
        assert!(document.meta.is_empty());
    }

    #[test]
    fn test_missing_to_one_is_null() {
        let registry = registry();
        let schema = schema(&registry, "articles", "include=author");
        let mut record = article(3, "Orphan");
        record.set_related("author", Related::ToOne(None));
        let mut builder = DocumentBuilder::new(MemberCase::Snake);
        let data = builder.resource(&schema, &record).unwrap().unwrap();
        assert_eq!(data["relationships"], json!({"author": {"data": null}}));
        assert!(builder.finish(data).included.is_empty());
    }

    #[test]
    fn test_included_duplicates_merge_linkage() {
        let mut builder = DocumentBuilder::new(MemberCase::Snake);
        let key = ("users".to_string(), "1".to_string());
        builder.include(key.clone(), json!({"type": "users", "id": "1", "attributes": {}}));
        builder.include(
            key,
            json!({
                "type": "users",
                "id": "1",
                "attributes": {},
                "relationships": {"articles": {"data": []}}
            }),
        );
        let document = builder.finish(JsonValue::Null);
        assert_eq!(document.included.len(), 1);
        assert_eq!(document.included[0]["relationships"], json!({"articles": {"data": []}}));
    }

    #[test]
    fn test_rank_meta() {
        let registry = registry();
        let schema = schema(&registry, "articles", "");
        let mut record = article(4, "Ranked");
        record.values.insert(RANK.to_string(), SqlValue::Double(0.5));
        let mut builder = DocumentBuilder::new(MemberCase::Snake);
        let data = builder.resource(&schema, &record).unwrap().unwrap();
        assert_eq!(data["meta"], json!({"rank": 0.5}));
        assert!(data["attributes"].get("__rank").is_none());
    }

    #[test]
    fn test_document_serialization_omits_empty_members() {
        let mut builder = DocumentBuilder::new(MemberCase::Snake);
        builder.meta("total", json!(3));
        let document = builder.finish(json!([]));
        assert_eq!(
            serde_json::to_value(&document).unwrap(),
            json!({"data": [], "meta": {"total": 3}})
        );
        assert_eq!(serde_json::to_value(&document).unwrap(), document.to_json());
    }
}
