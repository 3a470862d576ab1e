//! Error types for metadata store operations.

use thiserror::Error;

/// Errors that can occur during metadata store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("metadata database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A record could not be serialized for storage.
    #[error("failed to encode record {record_id}: {message}")]
    Encode {
        /// Id of the offending record.
        record_id: String,
        /// Serializer message.
        message: String,
    },

    /// A stored row did not decode back into a record.
    #[error("stored record {record_id} is corrupt: {message}")]
    Corrupt {
        /// Id of the offending row.
        record_id: String,
        /// Decoder message.
        message: String,
    },

    /// A query named a field that cannot be addressed.
    #[error(
        "invalid field name '{0}'\n  Suggestion: Field names may contain letters, digits, '_' and '-'"
    )]
    InvalidField(String),

    /// A query condition string could not be parsed.
    #[error(
        "invalid condition '{0}'\n  Suggestion: Use name=value, name!=value, name>value, name>=value, name<value, name<=value or name=low..high"
    )]
    InvalidCondition(String),
}
