use serde::Serialize;
use thiserror::Error;

/// Failure of a whole normalization call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("no timestamp column found: tried {candidates:?}, export has {available:?}")]
    ColumnNotFound {
        candidates: Vec<String>,
        available: Vec<String>,
    },
}

/// Row-scoped failure. The row is dropped, the call continues.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowError {
    #[error("cannot parse timestamp '{raw_value}' from column '{column}'")]
    TimestampParse { raw_value: String, column: String },

    #[error("missing or malformed price {raw_value:?} (column {column:?})")]
    PriceParse {
        raw_value: Option<String>,
        column: Option<String>,
    },
}
