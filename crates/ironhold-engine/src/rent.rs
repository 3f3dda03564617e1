//! Rent settlement: the deferred billing clock.
//!
//! Every account owes rent plus hireling upkeep once per billing cycle.
//! Nothing runs on a background scheduler -- request handlers call
//! [`settle_rent`] before dispatching any player action, and the clock
//! catches up lazily, including over long offline gaps (bounded by the
//! configured cap).
//!
//! # Concurrency protocol
//!
//! The account's `next_due_at` token doubles as the cycle lock: the CAS
//! that swings it to a far-future horizon is the lock acquisition, and
//! only the one caller whose CAS lands proceeds to bill the cycle.
//! Each caught-up cycle then commits with its own single CAS (payment
//! or debt accrual, coupled with the schedule advance), so a crash
//! mid-loop leaves `next_due_at` reflecting exactly how many cycles were
//! actually committed -- the next caller resumes from there.

use chrono::{DateTime, Duration, Utc};
use ironhold_db::store::{self, CasOutcome};
use ironhold_db::{AuditLog, DocumentStore, keys};
use ironhold_ledger::{GuardedDebitOutcome, debit_guarded};
use ironhold_types::{Account, AccountId, Debt, TerminationCause};

use crate::config::SettlementConfig;
use crate::error::EngineError;
use crate::termination;

/// What one settlement pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RentReport {
    /// Cycles committed by this pass (paid or accrued as debt).
    pub cycles_billed: u32,
    /// Coins actually deducted by this pass.
    pub coins_charged: i64,
    /// Debt state after the last committed cycle.
    pub debt: Option<Debt>,
}

/// Result of a settlement call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RentOutcome {
    /// No cycle was due -- or a concurrent caller already owns the due
    /// cycle, which is indistinguishable and equally fine.
    NotDue,
    /// The account is paused. No charges; the clock advanced past `now`
    /// so unpausing never back-bills.
    OnHold,
    /// One or more cycles were committed by this pass.
    Settled(RentReport),
    /// Sustained default: the account was terminated by this pass.
    Bankrupt(RentReport),
    /// The account does not exist (terminated before or during the pass).
    AccountClosed,
}

/// Settle any due rent cycles on an account.
///
/// Call before dispatching any player action. Safe under arbitrary
/// concurrency: for N simultaneous callers on one overdue account,
/// exactly one commits each due cycle and the rest observe
/// [`RentOutcome::NotDue`].
///
/// # Errors
///
/// Returns [`EngineError`] only for infrastructure failures; every
/// contention case is a normal outcome.
pub async fn settle_rent<S, A>(
    store: &S,
    audit: &A,
    config: &SettlementConfig,
    now: DateTime<Utc>,
    account_id: AccountId,
) -> Result<RentOutcome, EngineError>
where
    S: DocumentStore + ?Sized,
    A: AuditLog + ?Sized,
{
    let key = keys::account(account_id);
    let Some(account) = store::fetch::<Account, _>(store, &key).await? else {
        return Ok(RentOutcome::AccountClosed);
    };

    let cycle = config.cycle();

    // Paused accounts accrue nothing, but their clock still advances so
    // they do not owe a burst of back-billing when unpaused.
    if account.paused {
        if account.next_due_at <= now {
            let _ = store::update_if::<Account, _, _, _>(
                store,
                &key,
                |a| a.paused && a.next_due_at <= now,
                |a| a.next_due_at = first_future_boundary(a.next_due_at, cycle, now),
            )
            .await?;
        }
        return Ok(RentOutcome::OnHold);
    }

    if account.next_due_at > now {
        return Ok(RentOutcome::NotDue);
    }

    // Cycle lock: swing the schedule token to a far-future horizon.
    // Exactly one concurrent caller proceeds past this point.
    let horizon = cycle_lock_horizon(now);
    let lock = store::update_if::<Account, _, _, _>(
        store,
        &key,
        |a| !a.paused && a.next_due_at <= now,
        |a| a.next_due_at = horizon,
    )
    .await?;
    let (mut snapshot, mut due) = match lock {
        CasOutcome::Applied { before, after } => {
            let due = before.next_due_at;
            (after, due)
        }
        // Another caller owns this cycle (or the account got paused):
        // an idempotent no-op from this caller's perspective.
        CasOutcome::Rejected { .. } => return Ok(RentOutcome::NotDue),
        CasOutcome::Missing => return Ok(RentOutcome::AccountClosed),
    };

    let mut report = RentReport::default();
    for _ in 0..config.catch_up_cap.max(1) {
        let bill = compute_bill(&snapshot, config)?;
        let next_due = due
            .checked_add_signed(cycle)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        // Payment: deduction, debt clear, and schedule advance commit in
        // one write, guarded by the lock token.
        let payment = debit_guarded(
            store,
            account_id,
            bill,
            |a| a.next_due_at == horizon,
            |a| {
                a.debt = None;
                a.next_due_at = next_due;
            },
        )
        .await?;

        match payment {
            GuardedDebitOutcome::Applied { balance } => {
                report.cycles_billed = report.cycles_billed.saturating_add(1);
                report.coins_charged = report.coins_charged.saturating_add(bill);
                report.debt = None;
                tracing::info!(account = %account_id, bill, balance, "rent settled");
            }
            GuardedDebitOutcome::Insufficient { balance, .. } => {
                // Unpayable: the whole bill (which already includes any
                // prior debt) becomes the new debt, and the schedule
                // still advances.
                let accrual = store::update_if::<Account, _, _, _>(
                    store,
                    &key,
                    |a| a.next_due_at == horizon,
                    |a| {
                        a.debt = Some(a.debt.as_ref().map_or_else(
                            || Debt::new(bill, now),
                            |d| Debt {
                                amount: bill,
                                missed_cycles: d.missed_cycles.saturating_add(1),
                                started_at: d.started_at,
                            },
                        ));
                        a.next_due_at = next_due;
                    },
                )
                .await?;

                match accrual {
                    CasOutcome::Applied { after, .. } => {
                        report.cycles_billed = report.cycles_billed.saturating_add(1);
                        report.debt.clone_from(&after.debt);
                        let missed =
                            after.debt.as_ref().map_or(0, |d| d.missed_cycles);
                        tracing::warn!(
                            account = %account_id,
                            bill,
                            balance,
                            missed_cycles = missed,
                            "rent unpayable; accrued as debt"
                        );
                        if missed > config.max_missed_cycles {
                            let _ = termination::terminate_account(
                                store,
                                audit,
                                now,
                                account_id,
                                TerminationCause::Bankruptcy,
                            )
                            .await?;
                            return Ok(RentOutcome::Bankrupt(report));
                        }
                    }
                    // Another caller took over the schedule mid-loop.
                    CasOutcome::Rejected { .. } => break,
                    CasOutcome::Missing => return Ok(RentOutcome::AccountClosed),
                }
            }
            GuardedDebitOutcome::GuardFailed => break,
            GuardedDebitOutcome::AccountMissing => {
                // Deleted mid-loop by a concurrent termination: report
                // that rather than erroring.
                return Ok(RentOutcome::AccountClosed);
            }
        }

        due = next_due;
        if due > now {
            break;
        }

        // A further cycle is already due (long offline gap): re-read the
        // account and re-acquire the cycle lock for it.
        let relock = store::update_if::<Account, _, _, _>(
            store,
            &key,
            |a| !a.paused && a.next_due_at <= now,
            |a| a.next_due_at = horizon,
        )
        .await?;
        match relock {
            CasOutcome::Applied { before, after } => {
                due = before.next_due_at;
                snapshot = after;
            }
            CasOutcome::Rejected { .. } => break,
            CasOutcome::Missing => return Ok(RentOutcome::AccountClosed),
        }
    }

    if report.cycles_billed == 0 {
        return Ok(RentOutcome::NotDue);
    }
    Ok(RentOutcome::Settled(report))
}

/// The bill for one cycle: base rent, per-hireling upkeep, and any
/// outstanding debt. Pure.
fn compute_bill(account: &Account, config: &SettlementConfig) -> Result<i64, EngineError> {
    let headcount = i64::try_from(account.hirelings.len()).unwrap_or(i64::MAX);
    let upkeep = config
        .upkeep_per_hireling
        .checked_mul(headcount)
        .ok_or_else(|| EngineError::Arithmetic {
            context: "hireling upkeep overflow".to_owned(),
        })?;
    let base = config
        .base_rent
        .checked_add(upkeep)
        .ok_or_else(|| EngineError::Arithmetic {
            context: "rent bill overflow".to_owned(),
        })?;
    let owed = account.debt.as_ref().map_or(0, |d| d.amount);
    base.checked_add(owed).ok_or_else(|| EngineError::Arithmetic {
        context: "rent bill with debt overflow".to_owned(),
    })
}

/// The far-future schedule token used as the cycle lock.
fn cycle_lock_horizon(now: DateTime<Utc>) -> DateTime<Utc> {
    now.checked_add_signed(Duration::days(36_500))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Advance `due` by whole cycles until it lies strictly past `now`.
fn first_future_boundary(
    due: DateTime<Utc>,
    cycle: Duration,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    if due > now {
        return due;
    }
    let cycle_secs = cycle.num_seconds().max(1);
    let behind = now.signed_duration_since(due).num_seconds();
    let missed = behind.checked_div(cycle_secs).unwrap_or(0).saturating_add(1);
    due.checked_add_signed(Duration::seconds(missed.saturating_mul(cycle_secs)))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic, clippy::arithmetic_side_effects)]
mod tests {
    use chrono::TimeZone;
    use ironhold_db::{MemoryAuditLog, MemoryStore};

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
    }

    fn test_config() -> SettlementConfig {
        SettlementConfig {
            cycle_hours: 1,
            base_rent: 80,
            upkeep_per_hireling: 25,
            max_missed_cycles: 3,
            catch_up_cap: 10,
            starting_balance: 250,
        }
    }

    async fn seed(store: &MemoryStore, balance: i64, due_at: DateTime<Utc>) -> AccountId {
        let account = Account::new(
            AccountId::new(),
            "Tennant".to_owned(),
            balance,
            due_at,
            at(0),
        );
        assert!(
            store::create(store, &keys::account(account.id), &account)
                .await
                .unwrap()
        );
        account.id
    }

    #[tokio::test]
    async fn not_due_before_boundary() {
        let store = MemoryStore::new();
        let audit = MemoryAuditLog::new();
        let id = seed(&store, 100, at(3_600)).await;

        let outcome = settle_rent(&store, &audit, &test_config(), at(100), id)
            .await
            .unwrap();
        assert_eq!(outcome, RentOutcome::NotDue);
    }

    #[tokio::test]
    async fn due_cycle_pays_and_advances() {
        let store = MemoryStore::new();
        let audit = MemoryAuditLog::new();
        let id = seed(&store, 100, at(3_600)).await;

        let outcome = settle_rent(&store, &audit, &test_config(), at(3_600), id)
            .await
            .unwrap();
        match outcome {
            RentOutcome::Settled(report) => {
                assert_eq!(report.cycles_billed, 1);
                assert_eq!(report.coins_charged, 80);
                assert!(report.debt.is_none());
            }
            other => panic!("expected Settled, got {other:?}"),
        }

        let account: Account = store::fetch(&store, &keys::account(id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(account.balance, 20);
        assert_eq!(account.next_due_at, at(7_200));
    }

    #[tokio::test]
    async fn unpayable_bill_becomes_debt() {
        // balance=50, bill=80: debt {amount: 80, missed_cycles: 1} and
        // the balance is untouched.
        let store = MemoryStore::new();
        let audit = MemoryAuditLog::new();
        let id = seed(&store, 50, at(3_600)).await;

        let outcome = settle_rent(&store, &audit, &test_config(), at(3_600), id)
            .await
            .unwrap();
        match outcome {
            RentOutcome::Settled(report) => {
                assert_eq!(report.cycles_billed, 1);
                assert_eq!(report.coins_charged, 0);
                assert_eq!(report.debt.as_ref().map(|d| d.amount), Some(80));
                assert_eq!(report.debt.as_ref().map(|d| d.missed_cycles), Some(1));
            }
            other => panic!("expected Settled, got {other:?}"),
        }

        let account: Account = store::fetch(&store, &keys::account(id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(account.balance, 50);
        assert_eq!(account.debt.as_ref().map(|d| d.amount), Some(80));
    }

    #[tokio::test]
    async fn debt_is_cleared_by_a_covering_payment() {
        let store = MemoryStore::new();
        let audit = MemoryAuditLog::new();
        let config = test_config();
        let id = seed(&store, 50, at(3_600)).await;

        // First cycle: unpayable, 80 into debt.
        let _ = settle_rent(&store, &audit, &config, at(3_600), id).await.unwrap();

        // Player earns coins; second cycle bills 80 + 80 debt = 160.
        let _ = ironhold_ledger::credit(&store, id, 200).await.unwrap();
        let outcome = settle_rent(&store, &audit, &config, at(7_200), id)
            .await
            .unwrap();
        match outcome {
            RentOutcome::Settled(report) => {
                assert_eq!(report.coins_charged, 160);
                assert!(report.debt.is_none());
            }
            other => panic!("expected Settled, got {other:?}"),
        }

        let account: Account = store::fetch(&store, &keys::account(id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(account.balance, 90);
        assert!(account.debt.is_none());
    }

    #[tokio::test]
    async fn sustained_default_terminates() {
        let store = MemoryStore::new();
        let audit = MemoryAuditLog::new();
        let config = SettlementConfig {
            max_missed_cycles: 3,
            ..test_config()
        };
        let id = seed(&store, 0, at(3_600)).await;

        // Four consecutive unpayable cycles in one catch-up pass: the
        // fourth pushes missed_cycles past the limit.
        let outcome = settle_rent(&store, &audit, &config, at(4 * 3_600), id)
            .await
            .unwrap();
        assert!(matches!(outcome, RentOutcome::Bankrupt(_)));

        let account: Option<Account> =
            store::fetch(&store, &keys::account(id)).await.unwrap();
        assert!(account.is_none());
        assert_eq!(audit.all().await.len(), 1);
    }

    #[tokio::test]
    async fn paused_account_skips_but_clock_advances() {
        let store = MemoryStore::new();
        let audit = MemoryAuditLog::new();
        let id = seed(&store, 100, at(3_600)).await;

        let key = keys::account(id);
        let _ = store::update_if::<Account, _, _, _>(&store, &key, |_| true, |a| {
            a.paused = true;
        })
        .await
        .unwrap();

        // Five cycles pass while paused.
        let outcome = settle_rent(&store, &audit, &test_config(), at(6 * 3_600), id)
            .await
            .unwrap();
        assert_eq!(outcome, RentOutcome::OnHold);

        let account: Account = store::fetch(&store, &key).await.unwrap().unwrap();
        assert_eq!(account.balance, 100);
        assert!(account.debt.is_none());
        // The clock advanced past "now" on a whole-cycle boundary.
        assert_eq!(account.next_due_at, at(7 * 3_600));
    }

    #[tokio::test]
    async fn bounded_catch_up_bills_cap_cycles() {
        let store = MemoryStore::new();
        let audit = MemoryAuditLog::new();
        let config = SettlementConfig {
            catch_up_cap: 4,
            base_rent: 10,
            ..test_config()
        };
        let id = seed(&store, 1_000, at(3_600)).await;

        // Twenty cycles overdue, cap is 4: exactly 4 cycles commit.
        let outcome = settle_rent(&store, &audit, &config, at(20 * 3_600), id)
            .await
            .unwrap();
        match outcome {
            RentOutcome::Settled(report) => {
                assert_eq!(report.cycles_billed, 4);
                assert_eq!(report.coins_charged, 40);
            }
            other => panic!("expected Settled, got {other:?}"),
        }

        // The schedule reflects exactly the committed cycles, so the
        // next pass resumes from cycle five.
        let account: Account = store::fetch(&store, &keys::account(id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(account.next_due_at, at(5 * 3_600));
    }

    #[test]
    fn bill_includes_upkeep_and_debt() {
        let mut account = Account::new(
            AccountId::new(),
            "Bill".to_owned(),
            0,
            at(0),
            at(0),
        );
        let config = test_config();
        assert_eq!(compute_bill(&account, &config).unwrap(), 80);

        account.hirelings.push(ironhold_types::Hireling::new(
            ironhold_types::HirelingId::new(),
            "a".to_owned(),
        ));
        account.hirelings.push(ironhold_types::Hireling::new(
            ironhold_types::HirelingId::new(),
            "b".to_owned(),
        ));
        assert_eq!(compute_bill(&account, &config).unwrap(), 130);

        account.debt = Some(Debt::new(70, at(0)));
        assert_eq!(compute_bill(&account, &config).unwrap(), 200);
    }

    #[test]
    fn future_boundary_lands_on_cycle_grid() {
        let cycle = Duration::hours(1);
        // 10 cycles behind: lands on the 11th boundary.
        assert_eq!(
            first_future_boundary(at(0), cycle, at(10 * 3_600)),
            at(11 * 3_600)
        );
        // Exactly on a boundary counts as due, so it advances one.
        assert_eq!(first_future_boundary(at(0), cycle, at(0)), at(3_600));
        // Already in the future: untouched.
        assert_eq!(first_future_boundary(at(9_999), cycle, at(0)), at(9_999));
    }
}
