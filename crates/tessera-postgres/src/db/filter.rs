//! Filter predicates.
//!
//! A [`FilterClause`] turns an operator and raw request text into a typed SQL
//! predicate. What it accepts depends on the attribute's [`DataType`]:
//!
//! | data type                             | operators               | multiple values | modifiers |
//! |---------------------------------------|-------------------------|-----------------|-----------|
//! | bool                                  | eq, ne                  | no              | no        |
//! | string, uuid                          | eq, ne                  | IN / NOT IN     | no        |
//! | integer, float, date, datetime, time  | eq, ne, gt, ge, lt, le  | IN / NOT IN     | yes       |
//!
//! Boolean and null values always compare with `IS` / `IS NOT`.

use super::builder::Query;
use super::from_clause::FromItem;
use crate::{DataType, Result, SqlValue, TesseraError};

/// Comparison operator named in `filter[field:op]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl FilterOp {
    pub fn parse(op: &str) -> Option<Self> {
        Some(match op {
            "eq" => FilterOp::Eq,
            "ne" => FilterOp::Ne,
            "gt" => FilterOp::Gt,
            "ge" => FilterOp::Ge,
            "lt" => FilterOp::Lt,
            "le" => FilterOp::Le,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Ne => "ne",
            FilterOp::Gt => "gt",
            FilterOp::Ge => "ge",
            FilterOp::Lt => "lt",
            FilterOp::Le => "le",
        }
    }

    pub fn to_sql(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Ne => "<>",
            FilterOp::Gt => ">",
            FilterOp::Ge => ">=",
            FilterOp::Lt => "<",
            FilterOp::Le => "<=",
        }
    }

    fn from_modifier(modifier: &str) -> Option<Self> {
        Some(match modifier {
            "=" => FilterOp::Eq,
            "<>" | "!=" => FilterOp::Ne,
            ">" => FilterOp::Gt,
            ">=" => FilterOp::Ge,
            "<" => FilterOp::Lt,
            "<=" => FilterOp::Le,
            _ => return None,
        })
    }
}

// Longest first so ">=" is not read as ">"
const MODIFIERS: &[&str] = &["<>", "!=", ">=", "<=", "=", ">", "<"];

const EQUALITY_OPS: &[FilterOp] = &[FilterOp::Eq, FilterOp::Ne];
const ORDERED_OPS: &[FilterOp] = &[
    FilterOp::Eq,
    FilterOp::Ne,
    FilterOp::Gt,
    FilterOp::Ge,
    FilterOp::Lt,
    FilterOp::Le,
];

/// Predicate builder for one attribute data type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterClause {
    data_type: DataType,
    operators: &'static [FilterOp],
    multiple: bool,
    modifiers: bool,
}

impl FilterClause {
    pub fn for_type(data_type: DataType) -> Self {
        let (operators, multiple, modifiers) = match data_type {
            DataType::Bool => (EQUALITY_OPS, false, false),
            DataType::String | DataType::Uuid => (EQUALITY_OPS, true, false),
            DataType::Integer
            | DataType::Float
            | DataType::Date
            | DataType::DateTime
            | DataType::Time => (ORDERED_OPS, true, true),
        };
        Self {
            data_type,
            operators,
            multiple,
            modifiers,
        }
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Builds the predicate for `expr` from an optional operator and raw text.
    ///
    /// `parameter` is the originating query-string key, reported in errors.
    pub fn predicate(
        &self,
        expr: &str,
        op: Option<FilterOp>,
        raw: &str,
        parameter: &str,
    ) -> Result<Query> {
        if self.multiple && raw.contains(',') {
            let tokens: Vec<&str> = raw.split(',').map(str::trim).collect();
            if self.modifiers && tokens.iter().any(|t| split_modifier(t).0.is_some()) {
                return self.modified(expr, op, &tokens, parameter);
            }
            return self.membership(expr, op, &tokens, parameter);
        }

        // A lone `<4` reads like the same token inside a list
        let (op, raw) = match split_modifier(raw.trim()) {
            (Some(modifier), rest) if self.modifiers => {
                if !matches!(op, None | Some(FilterOp::Eq)) {
                    return Err(TesseraError::invalid_argument(
                        parameter,
                        "comparison modifiers cannot be combined with an operator",
                    ));
                }
                (FilterOp::from_modifier(modifier).or(op), rest)
            }
            _ => (op, raw),
        };

        let op = op.unwrap_or(FilterOp::Eq);
        if !self.operators.contains(&op) {
            return Err(TesseraError::invalid_argument(
                parameter,
                format!(
                    "operator '{}' is not supported for {} values",
                    op.name(),
                    self.data_type.name()
                ),
            ));
        }
        let value = self.decode(raw, parameter)?;
        compare(expr, op, value, parameter)
    }

    fn decode(&self, raw: &str, parameter: &str) -> Result<SqlValue> {
        self.data_type
            .decode(raw)
            .map_err(|e| TesseraError::invalid_argument(parameter, e.to_string()))
    }

    /// `expr IN (...)` / `expr NOT IN (...)`; null tokens become IS [NOT] NULL.
    fn membership(
        &self,
        expr: &str,
        op: Option<FilterOp>,
        tokens: &[&str],
        parameter: &str,
    ) -> Result<Query> {
        let negate = match op {
            None | Some(FilterOp::Eq) => false,
            Some(FilterOp::Ne) => true,
            Some(other) => {
                return Err(TesseraError::invalid_argument(
                    parameter,
                    format!("operator '{}' does not accept multiple values", other.name()),
                ))
            }
        };

        let mut values = Vec::with_capacity(tokens.len());
        let mut has_null = false;
        for token in tokens {
            match self.decode(token, parameter)? {
                SqlValue::Null => has_null = true,
                value => values.push(value),
            }
        }

        let mut parts = Vec::new();
        if !values.is_empty() {
            let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("${}", i)).collect();
            parts.push(Query {
                sql: format!(
                    "{} {} ({})",
                    expr,
                    if negate { "NOT IN" } else { "IN" },
                    placeholders.join(", ")
                ),
                params: values,
            });
        }
        if has_null {
            parts.push(Query::new(format!(
                "{} {}",
                expr,
                if negate { "IS NOT NULL" } else { "IS NULL" }
            )));
        }

        Ok(match parts.len() {
            1 => parts.remove(0),
            _ => Query::join(&parts, if negate { " AND " } else { " OR " }).wrap("(", ")"),
        })
    }

    /// Comma list with inline comparison modifiers, e.g. `<4,6,>=9,<12`.
    fn modified(
        &self,
        expr: &str,
        op: Option<FilterOp>,
        tokens: &[&str],
        parameter: &str,
    ) -> Result<Query> {
        let pairs: Vec<(FilterOp, &str)> = tokens
            .iter()
            .map(|t| {
                let (modifier, rest) = split_modifier(t);
                let op = modifier.and_then(FilterOp::from_modifier).unwrap_or(FilterOp::Eq);
                (op, rest)
            })
            .collect();

        if pairs.iter().all(|(op, _)| *op == FilterOp::Eq) {
            let values: Vec<&str> = pairs.iter().map(|(_, v)| *v).collect();
            return self.membership(expr, op, &values, parameter);
        }

        if !matches!(op, None | Some(FilterOp::Eq)) {
            return Err(TesseraError::invalid_argument(
                parameter,
                "comparison modifiers cannot be combined with an operator",
            ));
        }
        if pairs.iter().any(|(op, _)| *op == FilterOp::Ne) {
            return Err(TesseraError::invalid_argument(
                parameter,
                "'!=' and '<>' are not valid in a list of alternatives",
            ));
        }

        let mut comparisons = Vec::with_capacity(pairs.len());
        for (op, raw) in &pairs {
            comparisons.push((*op, compare(expr, *op, self.decode(raw, parameter)?, parameter)?));
        }

        // A lower bound directly followed by an upper bound is one range
        let mut groups = Vec::new();
        let mut iter = comparisons.into_iter().peekable();
        while let Some((op, query)) = iter.next() {
            let is_lower = matches!(op, FilterOp::Gt | FilterOp::Ge);
            let closes_range = matches!(iter.peek(), Some((FilterOp::Lt | FilterOp::Le, _)));
            match iter.next_if(|_| is_lower && closes_range) {
                Some((_, upper)) => groups.push(Query::join([&query, &upper], " AND ").wrap("(", ")")),
                None => groups.push(query),
            }
        }

        Ok(Query::join(&groups, " OR ").wrap("(", ")"))
    }
}

fn split_modifier(token: &str) -> (Option<&'static str>, &str) {
    for modifier in MODIFIERS {
        if let Some(rest) = token.strip_prefix(modifier) {
            return (Some(modifier), rest.trim());
        }
    }
    (None, token)
}

/// Single comparison; boolean and null values use IS / IS NOT.
fn compare(expr: &str, op: FilterOp, value: SqlValue, parameter: &str) -> Result<Query> {
    let literal = match &value {
        SqlValue::Null => Some("NULL"),
        SqlValue::Bool(true) => Some("TRUE"),
        SqlValue::Bool(false) => Some("FALSE"),
        _ => None,
    };

    match (literal, op) {
        (Some(literal), FilterOp::Eq) => Ok(Query::new(format!("{} IS {}", expr, literal))),
        (Some(literal), FilterOp::Ne) => Ok(Query::new(format!("{} IS NOT {}", expr, literal))),
        (Some(literal), other) => Err(TesseraError::invalid_argument(
            parameter,
            format!("operator '{}' cannot compare with {}", other.name(), literal),
        )),
        (None, op) => Ok(Query::bind(format!("{} {} $1", expr, op.to_sql()), value)),
    }
}

/// Accumulated predicates of a request.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub where_: Vec<Query>,
    pub having: Vec<Query>,
    pub from_items: Vec<FromItem>,
}

impl Filter {
    pub fn is_empty(&self) -> bool {
        self.where_.is_empty() && self.having.is_empty()
    }
}
