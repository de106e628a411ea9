//! Per-request field visibility.
//!
//! A [`Schema`] pairs a model with two independent flags per field:
//! `visible` (serialized in the response) and `materialized` (selected,
//! joined or fetched). Sorting by an aggregate materializes it without making
//! it visible; a derived field materializes the attributes it reads.
//!
//! | field        | visible                                 | materialized                     |
//! |--------------|-----------------------------------------|----------------------------------|
//! | attribute    | not excluded, in fieldset (if given)    | visible, or read by visible derived |
//! | derived      | in fieldset (if given)                  | visible                          |
//! | aggregate    | named in fieldset                       | visible, sorted or filtered on   |
//! | relationship | named in include tree                   | visible, sorted or filtered on   |

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::{Field, Model, Registry, Relationship};
use crate::args::{IncludeTree, RequestArguments};
use crate::{Result, TesseraError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldState {
    pub visible: bool,
    pub materialized: bool,
}

/// Visibility of one model's fields for one request, recursively for the
/// materialized relationships.
#[derive(Debug, Clone)]
pub struct Schema {
    model: Arc<Model>,
    states: HashMap<String, FieldState>,
    related: BTreeMap<String, Schema>,
}

impl Schema {
    /// Visibility of the primary model of a request.
    pub fn init(registry: &Registry, model: &Arc<Model>, args: &RequestArguments) -> Result<Schema> {
        let mut references: Vec<Vec<String>> = args.sort.iter().map(|s| s.path.clone()).collect();
        for filter in &args.filters {
            let mut path = Vec::with_capacity(filter.path.len() + 1);
            path.push(filter.field.clone());
            path.extend(filter.path.iter().cloned());
            references.push(path);
        }
        let references: Vec<&[String]> = references.iter().map(Vec::as_slice).collect();
        Self::build(registry, model, args, &args.include, &references)
    }

    /// Visibility of a related model whose sort and filter references do not
    /// apply, e.g. resources fetched by id after a search.
    pub fn unsorted(
        registry: &Registry,
        model: &Arc<Model>,
        args: &RequestArguments,
    ) -> Result<Schema> {
        Self::build(registry, model, args, &args.include, &[])
    }

    fn build(
        registry: &Registry,
        model: &Arc<Model>,
        args: &RequestArguments,
        include: &IncludeTree,
        references: &[&[String]],
    ) -> Result<Schema> {
        let type_name = model.type_name();

        for name in include.names() {
            if model.relationship(name).is_none() {
                return Err(TesseraError::invalid_argument(
                    "include",
                    format!("unknown relationship '{}' on type '{}'", name, type_name),
                ));
            }
        }

        let fieldset = args.fieldset(type_name);
        if let Some(fieldset) = fieldset {
            let mut names: Vec<&String> = fieldset.iter().collect();
            names.sort();
            if let Some(unknown) = names.into_iter().find(|n| model.field(n).is_none()) {
                return Err(TesseraError::invalid_argument(
                    format!("fields[{}]", type_name),
                    format!("unknown field '{}' on type '{}'", unknown, type_name),
                ));
            }
        }
        let in_fieldset = |name: &str| fieldset.map_or(true, |fs| fs.contains(name));
        let referenced = |name: &str| references.iter().any(|path| path.first().map(String::as_str) == Some(name));

        let mut states = HashMap::new();
        let mut related = BTreeMap::new();
        for field in model.fields() {
            let name = field.name();
            let state = match field {
                Field::Attribute(attr) => {
                    let visible = name == "id" || (!attr.exclude && in_fieldset(name));
                    FieldState { visible, materialized: visible }
                }
                Field::Derived(_) => {
                    let visible = in_fieldset(name);
                    FieldState { visible, materialized: visible }
                }
                Field::Aggregate(_) => {
                    let visible = fieldset.is_some_and(|fs| fs.contains(name));
                    FieldState { visible, materialized: visible || referenced(name) }
                }
                Field::Relationship(rel) => {
                    let visible = include.contains(name);
                    let materialized = visible || referenced(name);
                    if materialized {
                        let target = registry.model(&rel.target)?;
                        let empty = IncludeTree::default();
                        let sub_include = include.get(name).unwrap_or(&empty);
                        let tails: Vec<&[String]> = references
                            .iter()
                            .filter(|path| path.len() > 1 && path[0] == name)
                            .map(|path| &path[1..])
                            .collect();
                        related.insert(
                            name.to_string(),
                            Self::build(registry, target, args, sub_include, &tails)?,
                        );
                    }
                    FieldState { visible, materialized }
                }
            };
            states.insert(name.to_string(), state);
        }

        for field in model.fields() {
            if let Field::Derived(derived) = field {
                if states.get(&derived.name).is_some_and(|s| s.visible) {
                    for dependency in &derived.depends_on {
                        if let Some(state) = states.get_mut(dependency) {
                            state.materialized = true;
                        }
                    }
                }
            }
        }

        Ok(Schema {
            model: Arc::clone(model),
            states,
            related,
        })
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn state(&self, name: &str) -> FieldState {
        self.states.get(name).copied().unwrap_or_default()
    }

    pub fn is_visible(&self, name: &str) -> bool {
        self.state(name).visible
    }

    pub fn is_materialized(&self, name: &str) -> bool {
        self.state(name).materialized
    }

    /// Schema of a materialized relationship's target.
    pub fn related(&self, name: &str) -> Option<&Schema> {
        self.related.get(name)
    }

    /// Fields selected in SQL, in declaration order.
    pub fn materialized_fields(&self) -> impl Iterator<Item = &Field> + '_ {
        self.model
            .fields()
            .filter(move |f| self.is_materialized(f.name()))
    }

    /// Fields serialized under `attributes`, in declaration order, without `id`.
    pub fn visible_attributes(&self) -> impl Iterator<Item = &Field> + '_ {
        self.model
            .fields()
            .filter(move |f| f.name() != "id" && f.is_attribute_like() && self.is_visible(f.name()))
    }

    /// Relationships to include, with their target schemas.
    pub fn visible_relationships(&self) -> impl Iterator<Item = (&Relationship, &Schema)> + '_ {
        self.model.relationships().filter_map(move |rel| {
            if !self.is_visible(&rel.name) {
                return None;
            }
            self.related.get(&rel.name).map(|schema| (rel, schema))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{AggregateFunction, FromItem, Table};
    use crate::model::Cardinality;
    use crate::DataType;
    use serde_json::json;

    fn registry() -> Registry {
        let users = Table::builder("users")
            .column("id", DataType::Integer)
            .column("first_name", DataType::String)
            .column("last_name", DataType::String)
            .column("password_hash", DataType::String)
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

        let user_model = Model::builder("users", users.clone())
            .attribute("first_name")
            .unwrap()
            .attribute("last_name")
            .unwrap()
            .excluded_attribute("password_hash")
            .unwrap()
            .derived("full_name", &["first_name", "last_name"], |_| json!("x"))
            .aggregate(
                "article_count",
                AggregateFunction::CountColumn(articles.pk().unwrap()),
                vec![FromItem::new(articles.clone()).left()],
            )
            .relationship("articles", "articles", Cardinality::OneToMany, articles.col("author_id").unwrap())
            .build()
            .unwrap();
        let article_model = Model::builder("articles", articles.clone())
            .attribute("title")
            .unwrap()
            .relationship("author", "users", Cardinality::ManyToOne, articles.col("author_id").unwrap())
            .relationship("comments", "comments", Cardinality::OneToMany, comments.col("article_id").unwrap())
            .build()
            .unwrap();
        let comment_model = Model::builder("comments", comments.clone())
            .attribute("body")
            .unwrap()
            .relationship("author", "users", Cardinality::ManyToOne, comments.col("author_id").unwrap())
            .build()
            .unwrap();

        Registry::builder()
            .model(user_model)
            .model(article_model)
            .model(comment_model)
            .build()
            .unwrap()
    }

    fn schema(registry: &Registry, type_name: &str, query: &str) -> Result<Schema> {
        let args = RequestArguments::from_query_string(query).unwrap();
        Schema::init(registry, registry.model(type_name).unwrap(), &args)
    }

    #[test]
    fn test_default_visibility() {
        let registry = registry();
        let schema = schema(&registry, "users", "").unwrap();
        assert!(schema.is_visible("id"));
        assert!(schema.is_visible("first_name"));
        assert!(schema.is_visible("full_name"));
        assert!(!schema.is_visible("password_hash"));
        assert!(!schema.is_materialized("password_hash"));
        assert!(!schema.is_visible("article_count"));
        assert!(!schema.is_materialized("article_count"));
        assert!(!schema.is_visible("articles"));
        assert!(schema.related("articles").is_none());

        let names: Vec<&str> = schema.visible_attributes().map(Field::name).collect();
        assert_eq!(names, vec!["first_name", "last_name", "full_name"]);
    }

    #[test]
    fn test_fieldset_restricts_attributes() {
        let registry = registry();
        let schema = schema(&registry, "users", "fields[users]=last_name,article_count").unwrap();
        assert!(schema.is_visible("id"));
        assert!(schema.is_visible("last_name"));
        assert!(!schema.is_visible("first_name"));
        assert!(!schema.is_visible("full_name"));
        assert!(schema.is_visible("article_count"));
        assert!(schema.is_materialized("article_count"));
    }

    #[test]
    fn test_derived_materializes_dependencies() {
        let registry = registry();
        let schema = schema(&registry, "users", "fields[users]=full_name").unwrap();
        assert!(schema.is_visible("full_name"));
        assert!(!schema.is_visible("first_name"));
        assert!(schema.is_materialized("first_name"));
        assert!(schema.is_materialized("last_name"));
        let names: Vec<&str> = schema.visible_attributes().map(Field::name).collect();
        assert_eq!(names, vec!["full_name"]);
    }

    #[test]
    fn test_sorted_aggregate_is_materialized_not_visible() {
        let registry = registry();
        let schema = schema(&registry, "users", "sort=-article-count").unwrap();
        let state = schema.state("article_count");
        assert!(state.materialized);
        assert!(!state.visible);
    }

    #[test]
    fn test_include_tree_recursion() {
        let registry = registry();
        let schema = schema(&registry, "articles", "include=comments.author").unwrap();
        assert!(schema.is_visible("comments"));
        assert!(!schema.is_visible("author"));

        let comments = schema.related("comments").unwrap();
        assert_eq!(comments.model().type_name(), "comments");
        assert!(comments.is_visible("author"));
        let users = comments.related("author").unwrap();
        assert!(!users.is_visible("articles"));

        let included: Vec<&str> = schema.visible_relationships().map(|(r, _)| r.name.as_str()).collect();
        assert_eq!(included, vec!["comments"]);
    }

    #[test]
    fn test_filtered_relationship_is_materialized_not_visible() {
        let registry = registry();
        let schema = schema(&registry, "articles", "filter[author.last_name]=Smith").unwrap();
        assert!(!schema.is_visible("author"));
        assert!(schema.is_materialized("author"));
        assert!(schema.related("author").is_some());
        assert_eq!(schema.visible_relationships().count(), 0);
    }

    #[test]
    fn test_unknown_include_and_fieldset() {
        let registry = registry();
        let err = schema(&registry, "articles", "include=author.friends").unwrap_err();
        assert_eq!(
            err,
            TesseraError::invalid_argument("include", "unknown relationship 'friends' on type 'users'")
        );

        let err = schema(&registry, "articles", "fields[articles]=title,body").unwrap_err();
        match err {
            TesseraError::InvalidArgument { parameter, message } => {
                assert_eq!(parameter, "fields[articles]");
                assert!(message.contains("body"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_fieldset_of_included_type() {
        let registry = registry();
        let schema = schema(&registry, "articles", "include=author&fields[users]=first_name").unwrap();
        let author = schema.related("author").unwrap();
        assert!(author.is_visible("first_name"));
        assert!(!author.is_visible("last_name"));
        assert!(schema.is_visible("title"));
    }
}
