//! SQL fragments with bound parameters, and the SELECT builder.

use super::from_clause::{FromClause, FromItem};
use super::helpers::{adjust_param_indices, quote_identifier};
use crate::{Result, SqlValue, TesseraError};

/// A SQL fragment and its parameters.
///
/// Placeholders are local: a fragment always numbers its own parameters from
/// `$1`, and [`Query::push`] renumbers them when fragments are combined.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Query {
    /// Fragment without parameters.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Fragment with a single `$1` parameter.
    pub fn bind(sql: impl Into<String>, value: SqlValue) -> Self {
        Self {
            sql: sql.into(),
            params: vec![value],
        }
    }

    pub fn push_str(&mut self, sql: &str) {
        self.sql.push_str(sql);
    }

    /// Appends another fragment, shifting its placeholders past ours.
    pub fn push(&mut self, other: &Query) {
        self.sql
            .push_str(&adjust_param_indices(&other.sql, self.params.len()));
        self.params.extend(other.params.iter().cloned());
    }

    /// Joins fragments with a separator.
    pub fn join<'a, I>(parts: I, separator: &str) -> Query
    where
        I: IntoIterator<Item = &'a Query>,
    {
        let mut out = Query::default();
        for (i, part) in parts.into_iter().enumerate() {
            if i > 0 {
                out.push_str(separator);
            }
            out.push(part);
        }
        out
    }

    /// Wraps the fragment: `prefix <sql> suffix`.
    pub fn wrap(mut self, prefix: &str, suffix: &str) -> Query {
        self.sql = format!("{}{}{}", prefix, self.sql, suffix);
        self
    }
}

/// Role of a selected column in grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Grouped when the query aggregates.
    Plain,
    /// An aggregate expression.
    Aggregate,
    /// Neither grouped nor aggregated (e.g. a full-text rank over grouped columns).
    Ungrouped,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SelectColumn {
    pub(crate) expr: Query,
    pub(crate) alias: String,
    pub(crate) kind: ColumnKind,
}

/// SELECT query builder over a [`FromClause`].
///
/// When any aggregate column is selected, every plain column is added to
/// GROUP BY.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    pub(crate) from: FromClause,
    pub(crate) columns: Vec<SelectColumn>,
    pub(crate) where_conditions: Vec<Query>,
    pub(crate) having_conditions: Vec<Query>,
    /// Extra GROUP BY terms, used only when the query aggregates
    pub(crate) group_by: Vec<Query>,
    pub(crate) order_by: Vec<Query>,
    pub(crate) limit_value: Option<i64>,
    pub(crate) offset_value: Option<i64>,
}

impl QueryBuilder {
    pub fn new(from: FromClause) -> Self {
        Self {
            from,
            columns: Vec::new(),
            where_conditions: Vec::new(),
            having_conditions: Vec::new(),
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit_value: None,
            offset_value: None,
        }
    }

    /// Selects `expr AS "alias"`.
    pub fn column(mut self, expr: Query, alias: &str, kind: ColumnKind) -> Self {
        self.columns.push(SelectColumn {
            expr,
            alias: alias.to_string(),
            kind,
        });
        self
    }

    pub fn join(mut self, item: FromItem) -> Self {
        self.from.push(item);
        self
    }

    pub fn joins<I: IntoIterator<Item = FromItem>>(mut self, items: I) -> Self {
        self.from.extend(items);
        self
    }

    pub fn where_clause(mut self, condition: Query) -> Self {
        self.where_conditions.push(condition);
        self
    }

    pub fn having(mut self, condition: Query) -> Self {
        self.having_conditions.push(condition);
        self
    }

    /// Groups by an expression that is not selected (e.g. a joined sort key).
    pub fn group_by(mut self, expr: Query) -> Self {
        if !self.group_by.contains(&expr) {
            self.group_by.push(expr);
        }
        self
    }

    /// Adds an ORDER BY term, e.g. `"users"."name" DESC NULLS LAST`.
    pub fn order_by(mut self, term: Query) -> Self {
        self.order_by.push(term);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit_value = Some(limit);
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.offset_value = Some(offset);
        self
    }

    pub fn from_clause(&self) -> &FromClause {
        &self.from
    }

    fn is_aggregated(&self) -> bool {
        self.columns.iter().any(|c| c.kind == ColumnKind::Aggregate)
    }

    /// Builds SELECT ... FROM ... WHERE ... GROUP BY ... HAVING without ordering
    /// or pagination.
    fn build_body(&self) -> Result<Query> {
        if self.columns.is_empty() {
            return Err(TesseraError::Internal("SELECT without columns".to_string()));
        }

        let mut query = Query::new("SELECT ");
        for (i, column) in self.columns.iter().enumerate() {
            if i > 0 {
                query.push_str(", ");
            }
            query.push(&column.expr);
            query.push_str(&format!(" AS {}", quote_identifier(&column.alias)));
        }

        query.push_str(" FROM ");
        query.push_str(&self.from.to_sql()?);

        if !self.where_conditions.is_empty() {
            query.push_str(" WHERE ");
            query.push(&Query::join(&self.where_conditions, " AND "));
        }

        if self.is_aggregated() {
            let mut grouped: Vec<&Query> = self
                .columns
                .iter()
                .filter(|c| c.kind == ColumnKind::Plain)
                .map(|c| &c.expr)
                .collect();
            for extra in &self.group_by {
                if !grouped.contains(&extra) {
                    grouped.push(extra);
                }
            }
            if !grouped.is_empty() {
                query.push_str(" GROUP BY ");
                query.push(&Query::join(grouped, ", "));
            }
        }

        if !self.having_conditions.is_empty() {
            query.push_str(" HAVING ");
            query.push(&Query::join(&self.having_conditions, " AND "));
        }

        Ok(query)
    }

    /// Builds the full SELECT.
    pub fn build_select(&self) -> Result<Query> {
        let mut query = self.build_body()?;

        if !self.order_by.is_empty() {
            query.push_str(" ORDER BY ");
            query.push(&Query::join(&self.order_by, ", "));
        }

        if let Some(limit) = self.limit_value {
            query.params.push(SqlValue::BigInt(limit));
            query.push_str(&format!(" LIMIT ${}", query.params.len()));
        }

        if let Some(offset) = self.offset_value {
            query.params.push(SqlValue::BigInt(offset));
            query.push_str(&format!(" OFFSET ${}", query.params.len()));
        }

        Ok(query)
    }

    /// Builds `SELECT count(*) FROM (<select without order and paging>) AS count`.
    pub fn build_count(&self) -> Result<Query> {
        Ok(self.build_body()?.wrap("SELECT count(*) FROM (", ") AS count"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_push_renumbers() {
        let mut query = Query::bind("a = $1", SqlValue::BigInt(1));
        query.push_str(" AND ");
        query.push(&Query::bind("b = $1", SqlValue::BigInt(2)));
        assert_eq!(query.sql, "a = $1 AND b = $2");
        assert_eq!(query.params, vec![SqlValue::BigInt(1), SqlValue::BigInt(2)]);
    }

    #[test]
    fn test_query_join_and_wrap() {
        let parts = vec![
            Query::bind("x = $1", SqlValue::Bool(true)),
            Query::new("y IS NULL"),
            Query::bind("z > $1", SqlValue::BigInt(3)),
        ];
        let joined = Query::join(&parts, " OR ").wrap("(", ")");
        assert_eq!(joined.sql, "(x = $1 OR y IS NULL OR z > $2)");
        assert_eq!(joined.params.len(), 2);
    }
}
