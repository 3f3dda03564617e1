//! Error types for the engine crate.
//!
//! Only infrastructure problems surface as [`EngineError`]. Everything
//! the concurrency design treats as a normal branch -- a CAS losing to a
//! concurrent caller, insufficient funds, a busy hireling -- is encoded
//! in the outcome enums of the individual operations instead.

use ironhold_db::StoreError;
use ironhold_ledger::LedgerError;

/// Errors that can occur during engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The underlying document store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A coin movement failed at the infrastructure level.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// An arithmetic overflow occurred while computing a bill or reward.
    #[error("arithmetic overflow: {context}")]
    Arithmetic {
        /// Description of what was being computed.
        context: String,
    },

    /// A caller-supplied value violated a basic contract (for example a
    /// non-positive damage figure from the combat collaborator).
    #[error("invalid input: {reason}")]
    Validation {
        /// Description of the violated contract.
        reason: String,
    },
}
