//! The `DocumentStore` port and the typed CAS helpers built on it.
//!
//! The store exposes exactly one synchronization primitive: a versioned
//! compare-and-swap on a single document. Every document is paired with
//! a monotonically increasing `u64` version; a write commits only if the
//! version it read is still current at write time. The typed helpers
//! here turn that into the predicate CAS the engine components speak:
//! "apply this mutation only if this predicate still holds at the moment
//! of the write".
//!
//! A failing predicate is a normal branch ("another caller already won"),
//! surfaced as [`CasOutcome::Rejected`]. A version conflict while the
//! predicate still holds means an unrelated writer got in between; the
//! helper re-reads and retries up to [`MAX_CAS_ATTEMPTS`] times before
//! reporting [`StoreError::Contention`].

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StoreError;

/// Upper bound on optimistic retries for one CAS call.
///
/// Retries happen only when the predicate holds but a concurrent writer
/// bumped the version first; under sane load a handful of attempts is
/// plenty, and exhausting the budget signals pathological contention.
pub const MAX_CAS_ATTEMPTS: u32 = 16;

/// A raw versioned document as the store holds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDoc {
    /// Version counter, bumped on every committed write.
    pub version: u64,
    /// The document body.
    pub body: serde_json::Value,
}

/// The single-document-atomic store port.
///
/// Implementations guarantee that each method is one atomic store
/// round trip: there is no observable intermediate state, and two
/// conflicting conditional writes to the same key serialize so that at
/// most one succeeds against any given version.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Load the document at `key`, with its current version.
    async fn load(&self, key: &str) -> Result<Option<RawDoc>, StoreError>;

    /// Insert a fresh document at `key` (version 1) if absent.
    ///
    /// Returns `false` without writing when the key already exists.
    async fn create(&self, key: &str, body: &serde_json::Value) -> Result<bool, StoreError>;

    /// Replace the document at `key` only if its version equals
    /// `expected`. Returns `false` without writing otherwise.
    async fn replace_if_version(
        &self,
        key: &str,
        expected: u64,
        body: &serde_json::Value,
    ) -> Result<bool, StoreError>;

    /// Delete the document at `key` only if its version equals
    /// `expected`. Returns `false` without deleting otherwise.
    async fn remove_if_version(&self, key: &str, expected: u64) -> Result<bool, StoreError>;
}

/// Result of a predicate-guarded update CAS.
///
/// `Rejected` is not a failure: it means another caller already won the
/// transition this CAS was racing for, and the caller should branch,
/// not retry blindly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome<T> {
    /// The predicate held and the mutation committed.
    Applied {
        /// Snapshot the predicate was evaluated against.
        before: T,
        /// The document as written.
        after: T,
    },
    /// The predicate did not hold at write time.
    Rejected {
        /// The document that defeated the predicate.
        current: T,
    },
    /// No document exists under the key.
    Missing,
}

/// Result of a predicate-guarded removal CAS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveOutcome<T> {
    /// The predicate held and the document was deleted.
    Removed {
        /// The final state of the document before deletion.
        last: T,
    },
    /// The predicate did not hold at write time.
    Rejected {
        /// The document that defeated the predicate.
        current: T,
    },
    /// No document exists under the key.
    Missing,
}

/// Load and decode the document at `key`.
///
/// # Errors
///
/// Returns [`StoreError`] if the read or deserialization fails.
pub async fn fetch<T, S>(store: &S, key: &str) -> Result<Option<T>, StoreError>
where
    T: DeserializeOwned,
    S: DocumentStore + ?Sized,
{
    match store.load(key).await? {
        Some(raw) => Ok(Some(serde_json::from_value(raw.body)?)),
        None => Ok(None),
    }
}

/// Insert a fresh typed document at `key` if absent.
///
/// Returns `false` when the key already exists (losing a creation race
/// is a normal branch).
///
/// # Errors
///
/// Returns [`StoreError`] if serialization or the write fails.
pub async fn create<T, S>(store: &S, key: &str, doc: &T) -> Result<bool, StoreError>
where
    T: Serialize + Sync,
    S: DocumentStore + ?Sized,
{
    let body = serde_json::to_value(doc)?;
    store.create(key, &body).await
}

/// Predicate-guarded update: apply `mutate` to the document at `key`
/// only if `predicate` holds at the moment of the write.
///
/// The loop re-reads the document on every attempt, so both the
/// predicate and the mutation always see a fresh snapshot; stale local
/// state can never be committed. The predicate failing returns
/// [`CasOutcome::Rejected`] immediately -- that is the "another caller
/// already won" branch, never an error.
///
/// # Errors
///
/// Returns [`StoreError::Contention`] if [`MAX_CAS_ATTEMPTS`] version
/// conflicts occur with the predicate still holding, or [`StoreError`]
/// for backend and serialization failures.
pub async fn update_if<T, S, P, M>(
    store: &S,
    key: &str,
    predicate: P,
    mutate: M,
) -> Result<CasOutcome<T>, StoreError>
where
    T: Serialize + DeserializeOwned + Clone,
    S: DocumentStore + ?Sized,
    P: Fn(&T) -> bool,
    M: Fn(&mut T),
{
    for _ in 0..MAX_CAS_ATTEMPTS {
        let Some(raw) = store.load(key).await? else {
            return Ok(CasOutcome::Missing);
        };
        let before: T = serde_json::from_value(raw.body)?;
        if !predicate(&before) {
            return Ok(CasOutcome::Rejected { current: before });
        }
        let mut after = before.clone();
        mutate(&mut after);
        let body = serde_json::to_value(&after)?;
        if store.replace_if_version(key, raw.version, &body).await? {
            return Ok(CasOutcome::Applied { before, after });
        }
        // Version race with an unrelated writer; re-read and retry.
    }
    Err(StoreError::Contention {
        key: key.to_owned(),
    })
}

/// Predicate-guarded removal: delete the document at `key` only if
/// `predicate` holds at the moment of the delete.
///
/// # Errors
///
/// Same contract as [`update_if`].
pub async fn remove_if<T, S, P>(
    store: &S,
    key: &str,
    predicate: P,
) -> Result<RemoveOutcome<T>, StoreError>
where
    T: DeserializeOwned,
    S: DocumentStore + ?Sized,
    P: Fn(&T) -> bool,
{
    for _ in 0..MAX_CAS_ATTEMPTS {
        let Some(raw) = store.load(key).await? else {
            return Ok(RemoveOutcome::Missing);
        };
        let current: T = serde_json::from_value(raw.body)?;
        if !predicate(&current) {
            return Ok(RemoveOutcome::Rejected { current });
        }
        if store.remove_if_version(key, raw.version).await? {
            return Ok(RemoveOutcome::Removed { last: current });
        }
        // Version race; re-read and retry.
    }
    Err(StoreError::Contention {
        key: key.to_owned(),
    })
}
