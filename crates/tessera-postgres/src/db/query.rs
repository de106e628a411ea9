//! Resource-level query constructors.
//!
//! Every constructor starts from [`select_base`]: the materialized fields of a
//! [`Schema`], the aggregate joins they need and the model's access rule.
//! Collections add filters, full-text search, sorting and pagination; related
//! and included selections add the relationship's linkage restriction.

use std::sync::Arc;

use super::builder::{ColumnKind, Query, QueryBuilder};
use super::filter::{Filter, FilterClause};
use super::from_clause::FromItem;
use super::helpers::{inline_null_param, quote_identifier};
use super::types::OrderDirection;
use crate::args::{FilterSpec, RequestArguments};
use crate::model::{Field, Link, Model, Registry, Schema};
use crate::{DataType, Result, SqlValue, TesseraError};

/// Column carrying the parent id of batched related rows.
pub const PARENT_ID: &str = "__parent_id";
/// Column carrying the full-text search rank.
pub const RANK: &str = "__rank";

const PARENT_ALIAS: &str = "__parent";
const PATH_ALIAS_PREFIX: &str = "__via_";

/// Queries of one collection request.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionQuery {
    pub rows: Query,
    /// Count without filters; present when a page size was requested
    pub total: Option<Query>,
    /// Count under the active filters; present when filters were given
    pub filtered: Option<Query>,
}

/// Restricts a relationship's target rows to given parent ids.
#[derive(Debug, Clone, PartialEq)]
pub struct Restriction {
    from_items: Vec<FromItem>,
    parent_expr: String,
}

impl Restriction {
    pub fn new(registry: &Registry, parent: &Model, relationship: &str) -> Result<Self> {
        let rel = parent.relationship(relationship).ok_or_else(|| {
            TesseraError::invalid_argument(
                "relationship",
                format!(
                    "unknown relationship '{}' on type '{}'",
                    relationship,
                    parent.type_name()
                ),
            )
        })?;
        let target = registry.model(&rel.target)?;

        match registry.link(parent.type_name(), relationship)? {
            Link::Child { foreign_key } => Ok(Self {
                from_items: Vec::new(),
                parent_expr: foreign_key.to_sql(),
            }),
            Link::Association {
                parent: parent_key,
                target: target_key,
            } => {
                let on = format!("{} = {}", target_key.to_sql(), target.pk().to_sql());
                Ok(Self {
                    from_items: vec![FromItem::new(Arc::clone(parent_key.table())).on(&on)?],
                    parent_expr: parent_key.to_sql(),
                })
            }
            Link::Owner { foreign_key } => {
                let on = format!(
                    "{} = {}",
                    foreign_key.to_sql_as(PARENT_ALIAS),
                    target.pk().to_sql()
                );
                Ok(Self {
                    from_items: vec![FromItem::new(parent.base().alias(PARENT_ALIAS)?).on(&on)?],
                    parent_expr: parent.pk().to_sql_as(PARENT_ALIAS),
                })
            }
        }
    }

    /// Expression holding the parent id on each target row.
    pub fn parent_expr(&self) -> &str {
        &self.parent_expr
    }

    fn apply(&self, builder: QueryBuilder, parent_ids: &[SqlValue]) -> QueryBuilder {
        builder
            .joins(self.from_items.iter().cloned())
            .where_clause(in_list(&self.parent_expr, parent_ids))
    }
}

/// `expr = $1` for one value, `expr IN ($1, ...)` for several.
fn in_list(expr: &str, values: &[SqlValue]) -> Query {
    if values.len() == 1 {
        return Query::bind(format!("{} = $1", expr), values[0].clone());
    }
    let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("${}", i)).collect();
    Query {
        sql: format!("{} IN ({})", expr, placeholders.join(", ")),
        params: values.to_vec(),
    }
}

/// The access rule with the current user id bound to `$1`, parenthesized so
/// it composes with the other WHERE conditions.
fn access_predicate(access: &str, user: &SqlValue) -> Query {
    let access = format!("({})", access);
    if user.is_null() || !access.contains("$1") {
        Query::new(inline_null_param(&access))
    } else {
        Query::bind(access, user.clone())
    }
}

fn select_base(schema: &Schema, user: &SqlValue) -> Result<QueryBuilder> {
    let model = schema.model();
    let mut builder = QueryBuilder::new(model.from_clause().clone());

    for field in schema.materialized_fields() {
        builder = match field {
            Field::Attribute(attr) => {
                builder.column(Query::new(attr.expr.clone()), &attr.name, ColumnKind::Plain)
            }
            Field::Aggregate(agg) => builder
                .joins(agg.from_items.iter().cloned())
                .column(Query::new(agg.expr()), &agg.name, ColumnKind::Aggregate),
            Field::Derived(_) | Field::Relationship(_) => builder,
        };
    }

    if let Some(access) = model.access() {
        builder = builder.where_clause(access_predicate(access, user));
    }
    Ok(builder)
}

/// `SELECT EXISTS(...)` on the base table, ignoring the access rule.
pub fn exists(model: &Model, id: &SqlValue) -> Query {
    let pk = model.pk().to_sql();
    Query::bind(
        format!(
            "SELECT EXISTS(SELECT {} FROM {} WHERE {} = $1)",
            pk,
            model.base().to_sql(),
            pk
        ),
        id.clone(),
    )
}

/// Single resource by primary key, access rule applied.
pub fn select_one(schema: &Schema, id: &SqlValue, user: &SqlValue) -> Result<Query> {
    let pk = schema.model().pk().to_sql();
    select_base(schema, user)?
        .where_clause(Query::bind(format!("{} = $1", pk), id.clone()))
        .build_select()
}

/// Resources by primary key, in key order.
pub fn select_by_ids(schema: &Schema, ids: &[SqlValue], user: &SqlValue) -> Result<Query> {
    let pk = schema.model().pk().to_sql();
    select_base(schema, user)?
        .where_clause(in_list(&pk, ids))
        .order_by(Query::new(format!("{} ASC", pk)))
        .build_select()
}

/// Collection with filters, search, sorting and pagination.
///
/// `restriction` limits the collection to the targets of one parent, for
/// to-many related resource endpoints.
pub fn select_many(
    registry: &Registry,
    schema: &Schema,
    args: &RequestArguments,
    user: &SqlValue,
    restriction: Option<(&Restriction, &SqlValue)>,
) -> Result<CollectionQuery> {
    if args.has_filters() && args.search.is_some() {
        return Err(TesseraError::invalid_argument(
            "search",
            "cannot filter and search simultaneously",
        ));
    }

    let model = schema.model();
    let mut builder = select_base(schema, user)?;
    if let Some((restriction, parent_id)) = restriction {
        builder = restriction.apply(builder, std::slice::from_ref(parent_id));
    }
    let unfiltered = builder.clone();

    let filter = build_filter(registry, model, &args.filters)?;
    builder = builder.joins(filter.from_items.iter().cloned());
    for condition in filter.where_ {
        builder = builder.where_clause(condition);
    }
    for condition in filter.having {
        builder = builder.having(condition);
    }

    let total = match args.limit {
        Some(_) => Some(unfiltered.build_count()?),
        None => None,
    };
    let filtered = if args.has_filters() {
        Some(builder.build_count()?)
    } else {
        None
    };

    let pk = model.pk().to_sql();
    if let Some(term) = &args.search {
        let vector = model.search().ok_or_else(|| {
            TesseraError::invalid_argument(
                "search",
                format!("type '{}' does not support search", model.type_name()),
            )
        })?;
        builder = builder
            .column(
                Query::bind(format!("ts_rank_cd({}, plainto_tsquery($1))", vector), term.as_str().into()),
                RANK,
                ColumnKind::Ungrouped,
            )
            .where_clause(Query::bind(
                format!("{} @@ plainto_tsquery($1)", vector),
                term.as_str().into(),
            ))
            .order_by(Query::new(format!("{} DESC", quote_identifier(RANK))));
    } else {
        for spec in &args.sort {
            let target = resolve_path(registry, model, &spec.path, "sort", "sort by")?;
            builder = builder.joins(target.from_items);
            if !target.aggregate {
                builder = builder.group_by(Query::new(target.expr.clone()));
            }
            builder = builder.order_by(Query::new(format!(
                "{} {}",
                target.expr,
                OrderDirection::from_descending(spec.descending).to_sql()
            )));
        }
    }

    let sorted_by_pk = args.search.is_none()
        && args.sort.last().is_some_and(|s| s.path.len() == 1 && s.field() == "id");
    if !sorted_by_pk {
        builder = builder.order_by(Query::new(format!("{} ASC", pk)));
    }

    if let Some(limit) = args.limit {
        builder = builder.limit(limit);
    }
    if let Some(offset) = args.offset {
        builder = builder.offset(offset);
    }

    Ok(CollectionQuery {
        rows: builder.build_select()?,
        total,
        filtered,
    })
}

/// To-one related resource of a single parent.
pub fn select_related(
    registry: &Registry,
    parent: &Model,
    relationship: &str,
    schema: &Schema,
    parent_id: &SqlValue,
    user: &SqlValue,
) -> Result<Query> {
    let restriction = Restriction::new(registry, parent, relationship)?;
    restriction
        .apply(select_base(schema, user)?, std::slice::from_ref(parent_id))
        .build_select()
}

/// Related resources of many parents, one query per chunk of at most
/// `chunk_size` parent ids. Rows carry their parent id in [`PARENT_ID`].
pub fn select_included(
    registry: &Registry,
    parent: &Model,
    relationship: &str,
    schema: &Schema,
    parent_ids: &[SqlValue],
    user: &SqlValue,
    chunk_size: usize,
) -> Result<Vec<Query>> {
    let restriction = Restriction::new(registry, parent, relationship)?;
    let base = select_base(schema, user)?.column(
        Query::new(restriction.parent_expr.clone()),
        PARENT_ID,
        ColumnKind::Plain,
    );
    let pk = schema.model().pk().to_sql();

    parent_ids
        .chunks(chunk_size.max(1))
        .map(|chunk| {
            restriction
                .apply(base.clone(), chunk)
                .order_by(Query::new(format!("{} ASC", pk)))
                .build_select()
        })
        .collect()
}

/// Primary keys and ranks of the resources matching a full-text search.
pub fn search(model: &Model, term: &str, user: &SqlValue) -> Result<Query> {
    let vector = model.search().ok_or_else(|| {
        TesseraError::invalid_argument(
            "search",
            format!("type '{}' does not support search", model.type_name()),
        )
    })?;

    let mut builder = QueryBuilder::new(model.from_clause().clone())
        .column(Query::new(model.pk().to_sql()), "id", ColumnKind::Plain)
        .column(
            Query::bind(format!("ts_rank_cd({}, plainto_tsquery($1))", vector), term.into()),
            RANK,
            ColumnKind::Ungrouped,
        )
        .where_clause(Query::bind(
            format!("{} @@ plainto_tsquery($1)", vector),
            term.into(),
        ));
    if let Some(access) = model.access() {
        builder = builder.where_clause(access_predicate(access, user));
    }
    builder
        .order_by(Query::new(format!("{} DESC", quote_identifier(RANK))))
        .build_select()
}

fn build_filter(registry: &Registry, model: &Arc<Model>, filters: &[FilterSpec]) -> Result<Filter> {
    let mut filter = Filter::default();

    for spec in filters {
        if spec.path.is_empty() {
            if let Some(custom) = model.filter_override(&spec.field) {
                filter.where_.push(custom(spec)?);
                continue;
            }
        }

        let mut path = Vec::with_capacity(spec.path.len() + 1);
        path.push(spec.field.clone());
        path.extend(spec.path.iter().cloned());

        let target = resolve_path(registry, model, &path, spec.parameter(), "filter by")?;
        let predicate = FilterClause::for_type(target.data_type).predicate(
            &target.expr,
            spec.op,
            &spec.value,
            spec.parameter(),
        )?;
        filter.from_items.extend(target.from_items);
        if target.aggregate {
            filter.having.push(predicate);
        } else {
            filter.where_.push(predicate);
        }
    }

    Ok(filter)
}

/// SQL expression a sort or filter path resolves to.
struct PathTarget {
    expr: String,
    data_type: DataType,
    from_items: Vec<FromItem>,
    aggregate: bool,
}

/// Resolves `field` or `rel.rel.field` on `model`.
///
/// Relationship segments must be to-one; each is joined as a LEFT OUTER JOIN
/// of the target's base table under an alias named after the path. A path
/// ending on a relationship addresses the related `id`.
fn resolve_path(
    registry: &Registry,
    model: &Arc<Model>,
    path: &[String],
    parameter: &str,
    purpose: &str,
) -> Result<PathTarget> {
    let mut segments: Vec<&str> = path.iter().map(String::as_str).collect();
    let mut current = Arc::clone(model);
    let mut qualifier: Option<String> = None;
    let mut from_items = Vec::new();

    let mut i = 0;
    while i < segments.len() {
        let name = segments[i];
        let last = i + 1 == segments.len();

        match current.field(name) {
            None => {
                return Err(TesseraError::invalid_argument(
                    parameter,
                    format!("unknown field '{}' on type '{}'", name, current.type_name()),
                ))
            }
            Some(Field::Attribute(attr)) if last => {
                let expr = match (&qualifier, &attr.column) {
                    (None, _) => attr.expr.clone(),
                    (Some(alias), Some(column))
                        if column.table().name() == current.base().name()
                            && column.table().alias_name().is_none() =>
                    {
                        column.to_sql_as(alias)
                    }
                    _ => {
                        return Err(TesseraError::invalid_argument(
                            parameter,
                            format!(
                                "'{}' of type '{}' cannot be reached through a relationship",
                                name,
                                current.type_name()
                            ),
                        ))
                    }
                };
                return Ok(PathTarget {
                    expr,
                    data_type: attr.data_type,
                    from_items,
                    aggregate: false,
                });
            }
            Some(Field::Aggregate(agg)) if last && qualifier.is_none() => {
                return Ok(PathTarget {
                    expr: agg.expr(),
                    data_type: agg.data_type(),
                    from_items: agg.from_items.clone(),
                    aggregate: true,
                });
            }
            Some(Field::Relationship(rel)) => {
                if !rel.cardinality.is_to_one() {
                    return Err(TesseraError::invalid_argument(
                        parameter,
                        format!("cannot {} to-many relationship '{}'", purpose, name),
                    ));
                }
                let target = Arc::clone(registry.model(&rel.target)?);
                let alias = format!("{}{}", PATH_ALIAS_PREFIX, segments[..=i].join("__"));
                let source = qualifier
                    .clone()
                    .unwrap_or_else(|| current.base().reference_name().to_string());

                let on = match registry.link(current.type_name(), name)? {
                    Link::Owner { foreign_key } => format!(
                        "{} = {}",
                        target.pk().to_sql_as(&alias),
                        foreign_key.to_sql_as(&source)
                    ),
                    Link::Child { foreign_key } => format!(
                        "{} = {}",
                        foreign_key.to_sql_as(&alias),
                        current.pk().to_sql_as(&source)
                    ),
                    Link::Association { .. } => {
                        return Err(TesseraError::configuration(format!(
                            "to-one relationship '{}' cannot use an association table",
                            name
                        )))
                    }
                };
                from_items.push(FromItem::new(target.base().alias(&alias)?).on(&on)?.left());

                if last {
                    segments.push("id");
                }
                qualifier = Some(alias);
                current = target;
            }
            Some(_) => {
                return Err(TesseraError::invalid_argument(
                    parameter,
                    format!("cannot {} '{}'", purpose, name),
                ))
            }
        }
        i += 1;
    }

    Err(TesseraError::invalid_argument(parameter, "empty field path"))
}
