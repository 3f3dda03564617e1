//! Error types for the data layer.
//!
//! All errors are propagated via [`StoreError`] which wraps the
//! underlying [`sqlx`] and [`fred`] errors with additional context about
//! which operation failed. A failed CAS predicate is **not** an error --
//! it is a normal branch reported through
//! [`CasOutcome`](crate::store::CasOutcome).

/// Errors that can occur in the data layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A `Dragonfly`/Redis operation failed.
    #[error("Dragonfly error: {0}")]
    Dragonfly(#[from] fred::error::Error),

    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A `PostgreSQL` migration failed.
    #[error("PostgreSQL migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A CAS retry loop exhausted its attempt budget without the
    /// predicate ever failing. Indicates pathological write contention
    /// on one document, not a logic conflict.
    #[error("CAS contention exhausted on key {key}")]
    Contention {
        /// The document key under contention.
        key: String,
    },

    /// A stored value could not be decoded into its expected shape.
    #[error("Corrupt stored value: {context}")]
    Decode {
        /// Description of what failed to decode.
        context: String,
    },

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}
