//! Coin credit and debit, expressed as CAS-guarded increments.

use ironhold_db::store::{self, CasOutcome};
use ironhold_db::{DocumentStore, StoreError, keys};
use ironhold_types::{Account, AccountId};

/// Errors that can occur during a coin movement.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The underlying store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The requested amount was zero or negative.
    #[error("coin amount must be positive, got {amount}")]
    NonPositiveAmount {
        /// The rejected amount.
        amount: i64,
    },

    /// Crediting would overflow the balance.
    #[error("crediting {amount} to account {account} would overflow its balance")]
    BalanceOverflow {
        /// The account whose balance would overflow.
        account: AccountId,
        /// The credit amount.
        amount: i64,
    },
}

/// Result of a credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditOutcome {
    /// The credit landed.
    Applied {
        /// The balance after the credit.
        balance: i64,
    },
    /// The account document no longer exists (terminated concurrently).
    /// The credit is dropped -- there is nobody to pay.
    AccountMissing,
}

/// Result of a debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    /// The debit landed.
    Applied {
        /// The balance after the debit.
        balance: i64,
    },
    /// The balance could not cover the amount at write time.
    /// Nothing was mutated.
    Insufficient {
        /// The balance observed by the failing CAS.
        balance: i64,
        /// The amount that was requested.
        required: i64,
    },
    /// The account document no longer exists.
    AccountMissing,
}

/// Credit `amount` coins to the account.
///
/// # Errors
///
/// Returns [`LedgerError::NonPositiveAmount`] for `amount <= 0`,
/// [`LedgerError::BalanceOverflow`] if the balance cannot hold the
/// credit, or a store error.
pub async fn credit<S>(
    store: &S,
    account_id: AccountId,
    amount: i64,
) -> Result<CreditOutcome, LedgerError>
where
    S: DocumentStore + ?Sized,
{
    credit_and(store, account_id, amount, |_| {}).await
}

/// Credit `amount` coins and apply `rider` in the same atomic write.
///
/// The rider is for document changes that must commit together with the
/// coin movement; it must be pure (it may run several times under
/// optimistic retry, always against a fresh snapshot).
///
/// # Errors
///
/// Same contract as [`credit`].
pub async fn credit_and<S, F>(
    store: &S,
    account_id: AccountId,
    amount: i64,
    rider: F,
) -> Result<CreditOutcome, LedgerError>
where
    S: DocumentStore + ?Sized,
    F: Fn(&mut Account),
{
    if amount <= 0 {
        return Err(LedgerError::NonPositiveAmount { amount });
    }

    let key = keys::account(account_id);
    let outcome = store::update_if::<Account, _, _, _>(
        store,
        &key,
        |account| account.balance.checked_add(amount).is_some(),
        |account| {
            account.balance = account.balance.saturating_add(amount);
            rider(account);
        },
    )
    .await?;

    match outcome {
        CasOutcome::Applied { after, .. } => {
            tracing::debug!(account = %account_id, amount, balance = after.balance, "credit");
            Ok(CreditOutcome::Applied {
                balance: after.balance,
            })
        }
        // The only predicate on a credit is the overflow guard.
        CasOutcome::Rejected { .. } => Err(LedgerError::BalanceOverflow {
            account: account_id,
            amount,
        }),
        CasOutcome::Missing => Ok(CreditOutcome::AccountMissing),
    }
}

/// Result of a guarded debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardedDebitOutcome {
    /// The guard held, the balance covered the amount, and the debit
    /// landed together with its rider.
    Applied {
        /// The balance after the debit.
        balance: i64,
    },
    /// The guard held but the balance could not cover the amount.
    /// Nothing was mutated.
    Insufficient {
        /// The balance observed by the failing CAS.
        balance: i64,
        /// The amount that was requested.
        required: i64,
    },
    /// The caller-supplied guard did not hold at write time -- another
    /// caller already won whatever transition the guard was protecting.
    /// Nothing was mutated.
    GuardFailed,
    /// The account document no longer exists.
    AccountMissing,
}

/// Debit with an additional caller-supplied precondition.
///
/// The guard, the sufficient-balance check, the deduction, and the
/// rider all commit in one store write. Used where a payment must be
/// exactly-once with respect to some other document state -- a rent
/// payment guarded by its billing-cycle lock token, for instance.
///
/// # Errors
///
/// Returns [`LedgerError::NonPositiveAmount`] for `amount <= 0`, or a
/// store error.
pub async fn debit_guarded<S, G, F>(
    store: &S,
    account_id: AccountId,
    amount: i64,
    guard: G,
    rider: F,
) -> Result<GuardedDebitOutcome, LedgerError>
where
    S: DocumentStore + ?Sized,
    G: Fn(&Account) -> bool,
    F: Fn(&mut Account),
{
    if amount <= 0 {
        return Err(LedgerError::NonPositiveAmount { amount });
    }

    let key = keys::account(account_id);
    let outcome = store::update_if::<Account, _, _, _>(
        store,
        &key,
        |account| guard(account) && account.balance >= amount,
        |account| {
            account.balance = account.balance.saturating_sub(amount);
            rider(account);
        },
    )
    .await?;

    match outcome {
        CasOutcome::Applied { after, .. } => {
            tracing::debug!(account = %account_id, amount, balance = after.balance, "guarded debit");
            Ok(GuardedDebitOutcome::Applied {
                balance: after.balance,
            })
        }
        CasOutcome::Rejected { current } => {
            if guard(&current) {
                Ok(GuardedDebitOutcome::Insufficient {
                    balance: current.balance,
                    required: amount,
                })
            } else {
                Ok(GuardedDebitOutcome::GuardFailed)
            }
        }
        CasOutcome::Missing => Ok(GuardedDebitOutcome::AccountMissing),
    }
}

/// Debit `amount` coins from the account, only if the balance covers it.
///
/// # Errors
///
/// Returns [`LedgerError::NonPositiveAmount`] for `amount <= 0`, or a
/// store error. Insufficient funds is **not** an error: it is reported
/// as [`DebitOutcome::Insufficient`] with nothing mutated.
pub async fn debit<S>(
    store: &S,
    account_id: AccountId,
    amount: i64,
) -> Result<DebitOutcome, LedgerError>
where
    S: DocumentStore + ?Sized,
{
    debit_and(store, account_id, amount, |_| {}).await
}

/// Debit `amount` coins and apply `rider` in the same atomic write.
///
/// The sufficient-balance check, the deduction, and the rider commit as
/// one store write; a concurrent spender either sees the whole movement
/// or none of it.
///
/// # Errors
///
/// Same contract as [`debit`].
pub async fn debit_and<S, F>(
    store: &S,
    account_id: AccountId,
    amount: i64,
    rider: F,
) -> Result<DebitOutcome, LedgerError>
where
    S: DocumentStore + ?Sized,
    F: Fn(&mut Account),
{
    if amount <= 0 {
        return Err(LedgerError::NonPositiveAmount { amount });
    }

    let key = keys::account(account_id);
    let outcome = store::update_if::<Account, _, _, _>(
        store,
        &key,
        |account| account.balance >= amount,
        |account| {
            account.balance = account.balance.saturating_sub(amount);
            rider(account);
        },
    )
    .await?;

    match outcome {
        CasOutcome::Applied { after, .. } => {
            tracing::debug!(account = %account_id, amount, balance = after.balance, "debit");
            Ok(DebitOutcome::Applied {
                balance: after.balance,
            })
        }
        CasOutcome::Rejected { current } => Ok(DebitOutcome::Insufficient {
            balance: current.balance,
            required: amount,
        }),
        CasOutcome::Missing => Ok(DebitOutcome::AccountMissing),
    }
}
