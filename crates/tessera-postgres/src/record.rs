//! Fetched resource rows.
//!
//! A [`Record`] is one result row keyed by column alias, plus the related
//! records attached to it while included resources are fetched.

use std::collections::HashMap;

use crate::{Result, SqlValue, TesseraError};

/// Related records attached under a relationship name.
#[derive(Debug, Clone, PartialEq)]
pub enum Related {
    ToOne(Option<Box<Record>>),
    ToMany(Vec<Record>),
}

impl Related {
    pub fn records(&self) -> Vec<&Record> {
        match self {
            Related::ToOne(record) => record.iter().map(|r| r.as_ref()).collect(),
            Related::ToMany(records) => records.iter().collect(),
        }
    }
}

/// One fetched row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    pub(crate) values: HashMap<String, SqlValue>,
    pub(crate) related: HashMap<String, Related>,
}

impl Record {
    pub fn new(values: HashMap<String, SqlValue>) -> Self {
        Self {
            values,
            related: HashMap::new(),
        }
    }

    /// Builds a record from `(column, value)` pairs.
    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, SqlValue)>,
        K: Into<String>,
    {
        Self::new(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Converts from SQLx row.
    pub fn from_sqlx(row: &sqlx::postgres::PgRow) -> Result<Self> {
        Ok(Self::new(crate::types::row_to_values(row)?))
    }

    /// Gets a value by column name.
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.values.get(column)
    }

    /// Gets a value that the query is known to select.
    pub fn require(&self, column: &str) -> Result<&SqlValue> {
        self.values.get(column).ok_or_else(|| {
            TesseraError::Internal(format!("Column '{}' not found in result set", column))
        })
    }

    /// Textual id of the record.
    pub fn id(&self) -> Result<String> {
        Ok(self.require("id")?.key())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &HashMap<String, SqlValue> {
        &self.values
    }

    pub fn related(&self, name: &str) -> Option<&Related> {
        self.related.get(name)
    }

    pub fn set_related(&mut self, name: &str, related: Related) {
        self.related.insert(name.to_string(), related);
    }

    /// Removes and returns a bookkeeping column such as the parent id.
    pub(crate) fn take(&mut self, column: &str) -> Option<SqlValue> {
        self.values.remove(column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_accessors() {
        let mut record = Record::from_pairs([
            ("id", SqlValue::BigInt(7)),
            ("name", SqlValue::String("Ann".to_string())),
        ]);
        assert_eq!(record.id().unwrap(), "7");
        assert_eq!(record.get("name"), Some(&SqlValue::String("Ann".to_string())));
        assert!(record.get("email").is_none());
        assert!(matches!(record.require("email"), Err(TesseraError::Internal(_))));

        record.set_related("manager", Related::ToOne(None));
        assert!(record.related("manager").unwrap().records().is_empty());
        assert_eq!(record.take("name"), Some(SqlValue::String("Ann".to_string())));
        assert!(record.get("name").is_none());
    }

    #[test]
    fn test_empty_record() {
        assert!(Record::default().is_empty());
        assert!(Record::default().id().is_err());
    }
}
