//! Account teardown.
//!
//! Termination is an ordered, best-effort sequence: write the immutable
//! audit record *before* any destructive change (so history survives a
//! partial teardown), release the roster back to the public hireling
//! pool, then delete the account document. Partial failure is logged and
//! the sequence continues; callers that find the account already missing
//! treat it as already terminated rather than erroring.
//!
//! Invoked by rent settlement (sustained default), the world-boss
//! resolver (lethal backlash), and venture resolution (fatal mishap).

use chrono::{DateTime, Utc};
use ironhold_db::store::{self, CasOutcome, RemoveOutcome};
use ironhold_db::{AuditLog, DocumentStore, keys};
use ironhold_types::{
    Account, AccountId, AuditEvent, AuditKind, HirelingPool, TerminationCause,
};

use crate::error::EngineError;

/// Result of a termination call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The account was torn down by this call.
    Completed {
        /// Number of hirelings released to the public pool.
        hirelings_released: u32,
    },
    /// The account was already gone -- terminated by a concurrent
    /// caller, or never existed. A safe no-op.
    AlreadyClosed,
}

/// Tear down an account.
///
/// # Errors
///
/// Returns [`EngineError::Store`] only for infrastructure failure on the
/// final delete; earlier partial failures (audit append, pool release)
/// are logged and the teardown continues.
pub async fn terminate_account<S, A>(
    store: &S,
    audit: &A,
    now: DateTime<Utc>,
    account_id: AccountId,
    cause: TerminationCause,
) -> Result<Termination, EngineError>
where
    S: DocumentStore + ?Sized,
    A: AuditLog + ?Sized,
{
    let key = keys::account(account_id);
    let Some(account) = store::fetch::<Account, _>(store, &key).await? else {
        return Ok(Termination::AlreadyClosed);
    };

    tracing::info!(account = %account_id, ?cause, "terminating account");

    // 1. History first, so it survives even if later steps fail.
    let record = AuditEvent::new(
        AuditKind::from(cause),
        Some(account_id),
        serde_json::json!({
            "name": account.name,
            "balance": account.balance,
            "hirelings": account.hirelings.len(),
        }),
        now,
    );
    if let Err(err) = audit.append(&record).await {
        tracing::error!(account = %account_id, %err, "failed to append termination record");
    }

    // 2. Release the roster to the public pool. Entries are deduplicated
    // by id so a concurrent terminator cannot double-release.
    let released = release_to_pool(store, &account).await;

    // 3. Delete the account document. Any final state is acceptable; the
    // account cannot continue regardless of what raced in since our read.
    let removed = store::remove_if::<Account, _, _>(store, &key, |_| true).await?;
    match removed {
        RemoveOutcome::Removed { last } => {
            if last.hirelings.len() != account.hirelings.len() {
                tracing::warn!(
                    account = %account_id,
                    released_from = account.hirelings.len(),
                    final_roster = last.hirelings.len(),
                    "roster changed during teardown; pool release used the earlier snapshot"
                );
            }
            Ok(Termination::Completed {
                hirelings_released: released,
            })
        }
        RemoveOutcome::Rejected { .. } | RemoveOutcome::Missing => {
            Ok(Termination::AlreadyClosed)
        }
    }
}

/// Push the account's hirelings into the public pool, activities
/// cleared. Best-effort: failure is logged, never propagated.
async fn release_to_pool<S>(store: &S, account: &Account) -> u32
where
    S: DocumentStore + ?Sized,
{
    if account.hirelings.is_empty() {
        return 0;
    }

    // Ensure the singleton exists; losing the creation race is fine.
    if let Err(err) = store::create(store, keys::HIRELING_POOL, &HirelingPool::default()).await {
        tracing::error!(%err, "failed to ensure hireling pool exists");
        return 0;
    }

    let roster = account.hirelings.clone();
    let outcome = store::update_if::<HirelingPool, _, _, _>(
        store,
        keys::HIRELING_POOL,
        |_| true,
        |pool| {
            for hireling in &roster {
                if pool.idle.iter().any(|idle| idle.id == hireling.id) {
                    continue;
                }
                let mut freed = hireling.clone();
                freed.activity = None;
                pool.idle.push(freed);
            }
        },
    )
    .await;

    match outcome {
        Ok(CasOutcome::Applied { before, after }) => {
            let released = after.idle.len().saturating_sub(before.idle.len());
            u32::try_from(released).unwrap_or(u32::MAX)
        }
        Ok(CasOutcome::Rejected { .. } | CasOutcome::Missing) => 0,
        Err(err) => {
            tracing::error!(%err, "failed to release hirelings to the pool");
            0
        }
    }
}
