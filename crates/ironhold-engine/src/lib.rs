//! The concurrency-safe deferred-resolution engine for the Ironhold
//! game server.
//!
//! Many stateless request handlers concurrently mutate shared,
//! long-lived records -- player accounts, a server-wide boss fight, the
//! public hireling pool -- in a store that offers single-document
//! atomicity and nothing else. This crate is the machinery that makes
//! time-delayed effects (rent billing, dispatched missions, multi-hour
//! expeditions, the boss fight) compute and commit **exactly once**
//! under unbounded concurrency, using only compare-and-swap as the
//! synchronization primitive.
//!
//! # Protocol shape
//!
//! Every component follows the same discipline:
//!
//! 1. read (optional, for planning),
//! 2. compute locally, purely,
//! 3. one atomic CAS that both checks and commits the critical
//!    transition,
//! 4. branch explicitly on success or failure -- a failed predicate
//!    means "another caller already won" and is never an error.
//!
//! Nothing holds a lock across an await point; the CAS *is* the lock,
//! and it has zero duration from the caller's perspective. Irreversible
//! effects (coin grants, hireling releases, record deletion) run only
//! after a CAS has durably claimed the work.
//!
//! # Modules
//!
//! - [`engine`] -- the facade handlers call
//! - [`rent`] -- the settlement clock with bounded catch-up
//! - [`ventures`] -- mission/expedition/training lifecycle
//! - [`boss`] -- the shared-encounter resolver
//! - [`termination`] -- ordered, idempotent account teardown
//! - [`rules`] -- collaborator ports for dice and reward content
//! - [`clock`] -- injectable game time
//! - [`config`] -- YAML configuration
//! - [`error`] -- the engine error type

pub mod boss;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod rent;
pub mod rules;
pub mod termination;
pub mod ventures;

// Re-export the facade surface at the crate root.
pub use boss::{AttackOutcome, BossPayout, BossStrike};
pub use clock::{GameClock, ManualClock, SystemClock};
pub use config::{BossConfig, ConfigError, EngineConfig, SettlementConfig, VentureConfig};
pub use engine::{Engine, Prepared, RecruitOutcome};
pub use error::EngineError;
pub use rent::{RentOutcome, RentReport};
pub use rules::{FateRoller, RewardTable, VentureRoll};
pub use termination::Termination;
pub use ventures::{
    StartOutcome, StartRejection, TrainingOutcome, VentureReport, VentureTicket,
};
