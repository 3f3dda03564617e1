//! CAS-guarded coin movement for the Ironhold game server engine.
//!
//! Every coin that moves on or off an account balance moves through this
//! crate, and every movement is one compare-and-swap against the account
//! document: a debit's sufficient-balance check and its deduction commit
//! in the same atomic store write, so no interleaving of concurrent
//! callers can overdraw a balance or lose an increment.
//!
//! # Design
//!
//! - **One CAS per movement**: no read-then-write gaps, ever.
//! - **Rider mutations**: a movement that must commit atomically with a
//!   coupled document change (a rent payment advancing the billing
//!   schedule, a venture dispatch locking a hireling) passes the coupled
//!   change as a rider applied in the same write.
//! - **Insufficient funds is a branch, not an error**: debits report
//!   [`DebitOutcome::Insufficient`] with the observed balance.
//! - **Checked arithmetic**: balances never overflow silently.

pub mod coins;

pub use coins::{
    CreditOutcome, DebitOutcome, GuardedDebitOutcome, LedgerError, credit, credit_and, debit,
    debit_and, debit_guarded,
};
