//! Ordered, deduplicated join descriptors.
//!
//! A [`FromClause`] resolves to a single joined table expression. Join
//! conditions come from an explicit on-clause or are inferred from foreign
//! keys between the item and the tables already joined.

use std::sync::Arc;

use tracing::debug;

use super::helpers::{quote_column, validate_sql_snippet};
use super::table::Table;
use crate::{Result, TesseraError};

/// One table (or alias) of a FROM clause.
#[derive(Debug, Clone, PartialEq)]
pub struct FromItem {
    pub table: Arc<Table>,
    pub onclause: Option<String>,
    pub left: bool,
}

impl FromItem {
    pub fn new(table: Arc<Table>) -> Self {
        Self {
            table,
            onclause: None,
            left: false,
        }
    }

    /// Sets an explicit boolean join condition.
    pub fn on(mut self, condition: &str) -> Result<Self> {
        validate_sql_snippet("on-clause", condition)?;
        self.onclause = Some(condition.to_string());
        Ok(self)
    }

    /// Makes this a LEFT OUTER JOIN.
    pub fn left(mut self) -> Self {
        self.left = true;
        self
    }

    /// Reference name (alias or table name); the deduplication key.
    pub fn name(&self) -> &str {
        self.table.reference_name()
    }
}

/// Ordered sequence of [`FromItem`]s; the first one is the base table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FromClause {
    items: Vec<FromItem>,
}

impl FromClause {
    pub fn new(base: FromItem) -> Self {
        Self { items: vec![base] }
    }

    /// Appends an item unless one with the same reference name is present.
    pub fn push(&mut self, item: FromItem) {
        if !self.contains(item.name()) {
            self.items.push(item);
        }
    }

    pub fn extend<I: IntoIterator<Item = FromItem>>(&mut self, items: I) {
        for item in items {
            self.push(item);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.items.iter().any(|i| i.name() == name)
    }

    pub fn items(&self) -> &[FromItem] {
        &self.items
    }

    pub fn base(&self) -> Option<&FromItem> {
        self.items.first()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Renders the joined table expression.
    ///
    /// Items are joined in declaration order while possible. An item whose
    /// join condition cannot be inferred yet is deferred and retried after the
    /// others; this scan is quadratic in the number of items.
    pub fn to_sql(&self) -> Result<String> {
        let (base, rest) = self
            .items
            .split_first()
            .ok_or_else(|| TesseraError::configuration("FROM clause is empty"))?;

        let mut sql = base.table.to_sql();
        let mut joined: Vec<&FromItem> = vec![base];
        let mut pending: Vec<&FromItem> = rest.iter().collect();

        while !pending.is_empty() {
            let mut next = None;
            for (idx, item) in pending.iter().enumerate() {
                if let Some(condition) = join_condition(&joined, item)? {
                    next = Some((idx, condition));
                    break;
                }
            }

            let (idx, condition) = next.ok_or_else(|| {
                let names: Vec<&str> = pending.iter().map(|i| i.name()).collect();
                TesseraError::configuration(format!(
                    "Cannot infer a join condition for {} from '{}'",
                    names.join(", "),
                    base.name()
                ))
            })?;
            if idx > 0 {
                debug!(
                    deferred = pending[0].name(),
                    joined = pending[idx].name(),
                    "Reordered FROM clause"
                );
            }

            let item = pending.remove(idx);
            let join = if item.left { "LEFT OUTER JOIN" } else { "JOIN" };
            sql.push_str(&format!(" {} {} ON {}", join, item.table.to_sql(), condition));
            joined.push(item);
        }

        Ok(sql)
    }
}

/// Join condition of `item` against the already joined items.
///
/// Returns `Ok(None)` when no foreign key links them yet, and an error when
/// more than one does.
fn join_condition(joined: &[&FromItem], item: &FromItem) -> Result<Option<String>> {
    if let Some(onclause) = &item.onclause {
        return Ok(Some(onclause.clone()));
    }

    let mut candidates = Vec::new();
    for other in joined {
        for fk in item.table.foreign_keys() {
            if fk.ref_table == other.table.name() {
                candidates.push(format!(
                    "{} = {}",
                    quote_column(item.name(), &fk.column),
                    quote_column(other.name(), &fk.ref_column)
                ));
            }
        }
        for fk in other.table.foreign_keys() {
            if fk.ref_table == item.table.name() {
                candidates.push(format!(
                    "{} = {}",
                    quote_column(other.name(), &fk.column),
                    quote_column(item.name(), &fk.ref_column)
                ));
            }
        }
    }

    match candidates.len() {
        0 => Ok(None),
        1 => Ok(candidates.pop()),
        _ => Err(TesseraError::configuration(format!(
            "Ambiguous join condition for '{}': {}",
            item.name(),
            candidates.join(" | ")
        ))),
    }
}
