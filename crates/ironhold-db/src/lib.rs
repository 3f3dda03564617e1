//! Data layer for the Ironhold game server engine (`Dragonfly` + `PostgreSQL`).
//!
//! `Dragonfly` holds the live game documents (accounts, the world boss,
//! the hireling pool) as versioned records; every mutation goes through
//! a compare-and-swap against the record's version, so two logical steps
//! ("check X holds" and "mutate based on X") commit as one atomic store
//! operation. `PostgreSQL` holds the append-only audit history (duels,
//! bankruptcies, boss kills) used for cooldown-window range scans.
//!
//! # Architecture
//!
//! ```text
//! Request handlers
//!     |
//!     +-- CAS-guarded documents --> DocumentStore
//!     |       |-- DragonflyStore   (production, Lua version CAS)
//!     |       +-- MemoryStore      (tests, embedded runs)
//!     |
//!     +-- Append-only history ----> AuditLog
//!             |-- PostgresAuditLog (production)
//!             +-- MemoryAuditLog   (tests, embedded runs)
//! ```
//!
//! # Modules
//!
//! - [`store`] -- the `DocumentStore` port and the typed CAS helpers
//! - [`memory`] -- in-process backend for tests and embedded runs
//! - [`dragonfly`] -- `Dragonfly` (Redis-compatible) backend
//! - [`postgres`] -- `PostgreSQL` connection pool and configuration
//! - [`audit`] -- the `AuditLog` port and its backends
//! - [`keys`] -- document key patterns
//! - [`error`] -- shared error types

pub mod audit;
pub mod dragonfly;
pub mod error;
pub mod keys;
pub mod memory;
pub mod postgres;
pub mod store;

// Re-export primary types for convenience.
pub use audit::{AuditLog, MemoryAuditLog, PostgresAuditLog};
pub use dragonfly::DragonflyStore;
pub use error::StoreError;
pub use memory::MemoryStore;
pub use postgres::{PostgresConfig, PostgresPool};
pub use store::{CasOutcome, DocumentStore, RawDoc, RemoveOutcome};
