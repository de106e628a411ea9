//! Query building types.

use super::table::ColumnRef;
use crate::DataType;

/// SQL aggregate functions for aggregate fields.
///
/// The argument column usually lives on a to-many table joined through the
/// aggregate field's extra from-items.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateFunction {
    /// COUNT(column) - count non-null values in column
    CountColumn(ColumnRef),
    /// COUNT(DISTINCT column) - count distinct values
    CountDistinct(ColumnRef),
    /// SUM(column) - sum of values
    Sum(ColumnRef),
    /// AVG(column) - average of values
    Avg(ColumnRef),
    /// MIN(column) - minimum value
    Min(ColumnRef),
    /// MAX(column) - maximum value
    Max(ColumnRef),
}

impl AggregateFunction {
    /// Data type of the aggregate result, used to decode filter values.
    pub fn data_type(&self) -> DataType {
        match self {
            AggregateFunction::CountColumn(_) | AggregateFunction::CountDistinct(_) => {
                DataType::Integer
            }
            AggregateFunction::Avg(_) => DataType::Float,
            AggregateFunction::Sum(col) | AggregateFunction::Min(col) | AggregateFunction::Max(col) => {
                col.data_type()
            }
        }
    }
}

/// Sort order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    /// Ascending order
    Asc,
    /// Descending order
    Desc,
}

impl OrderDirection {
    pub fn from_descending(descending: bool) -> Self {
        if descending {
            OrderDirection::Desc
        } else {
            OrderDirection::Asc
        }
    }

    /// Returns the SQL order direction. Nulls sort last in both directions.
    pub fn to_sql(&self) -> &'static str {
        match self {
            OrderDirection::Asc => "ASC NULLS LAST",
            OrderDirection::Desc => "DESC NULLS LAST",
        }
    }
}
