//! The venture lifecycle: dispatch, lazy resolution, training.
//!
//! State machine per slot: `None -> Some(active) -> (resolving) -> None`.
//! A venture is never "done" anywhere except in the CAS that clears its
//! slot: that clearing write is the single source of truth for "has this
//! venture been resolved", and the non-idempotent effects (coin rewards,
//! audit records) run strictly after it. A concurrent resolver whose
//! clearing CAS is rejected discards its computed effects and reports
//! nothing -- never a duplicate grant.
//!
//! Resolution is lazy: there is no background scheduler, callers invoke
//! [`resolve_due_ventures`] whenever an account is read.

use chrono::{DateTime, Utc};
use ironhold_db::store::{self, CasOutcome};
use ironhold_db::{AuditLog, DocumentStore, keys};
use ironhold_ledger::CreditOutcome;
use ironhold_types::{
    Account, AccountId, Activity, ActivityKind, AuditEvent, AuditKind, CONDITION_MAX, Hireling,
    HirelingId, TerminationCause, Venture, VentureKind,
};

use crate::config::VentureConfig;
use crate::error::EngineError;
use crate::rules::{FateRoller, RewardTable};
use crate::termination;

/// Receipt for a successfully dispatched venture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VentureTicket {
    /// Mission or expedition.
    pub kind: VentureKind,
    /// When the venture falls due.
    pub due_at: DateTime<Utc>,
    /// The dispatched party.
    pub party: Vec<HirelingId>,
    /// Provisioning coins deducted at dispatch.
    pub supply_cost: i64,
}

/// Why a dispatch was refused. No state is mutated in any of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartRejection {
    /// The account is on vacation; nothing may be scheduled.
    AccountPaused,
    /// A venture of this kind is already out.
    SlotOccupied {
        /// The occupied slot.
        kind: VentureKind,
    },
    /// No party members were supplied.
    EmptyParty,
    /// The party exceeds the limit for this venture kind.
    PartyTooLarge {
        /// The applicable party limit.
        limit: u32,
    },
    /// The same hireling appears twice in the party.
    DuplicatePartyMember {
        /// The repeated hireling.
        hireling: HirelingId,
    },
    /// A party member is not on this account's roster.
    UnknownHireling {
        /// The unknown id.
        hireling: HirelingId,
    },
    /// A party member already holds an activity lock.
    HirelingBusy {
        /// The busy hireling.
        hireling: HirelingId,
    },
    /// A party member's condition is below the dispatch floor.
    HirelingUnfit {
        /// The unfit hireling.
        hireling: HirelingId,
        /// Its current condition.
        condition: u8,
    },
    /// The balance cannot cover the provisioning cost.
    InsufficientFunds {
        /// The provisioning cost.
        required: i64,
        /// The observed balance.
        balance: i64,
    },
    /// The dispatch CAS lost to a concurrent writer and the fresh
    /// snapshot offers no more specific reason. Capacity changed; retry.
    RosterContended,
}

/// Result of a dispatch call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// The venture is out.
    Started(VentureTicket),
    /// The dispatch was refused; nothing was mutated.
    Rejected(StartRejection),
    /// The account does not exist.
    AccountClosed,
}

/// Result of a training call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrainingOutcome {
    /// The hireling is in training.
    Started {
        /// When the stint completes.
        ends_at: DateTime<Utc>,
    },
    /// The request was refused; nothing was mutated.
    Rejected(StartRejection),
    /// The account does not exist.
    AccountClosed,
}

/// What one resolved venture did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VentureReport {
    /// Mission or expedition.
    pub kind: VentureKind,
    /// Whether the venture succeeded.
    pub success: bool,
    /// Coins actually credited (0 on failure or if the account closed
    /// before the grant landed).
    pub reward_paid: i64,
    /// Party members that did not come back.
    pub casualties: Vec<HirelingId>,
    /// Condition lost by each surviving party member.
    pub condition_loss: u8,
    /// Whether the mishap terminated the account.
    pub fatal: bool,
}

/// Dispatch a venture.
///
/// Validation runs twice: once against the current read to refuse
/// obviously bad requests without a write, and once inside the CAS
/// predicate so the slot, every party member's idleness, and the balance
/// are all re-asserted at the moment of the write. Losing that race
/// reports the freshest reason (or [`StartRejection::RosterContended`]).
///
/// # Errors
///
/// Returns [`EngineError`] only for infrastructure failures.
pub async fn start_venture<S>(
    store: &S,
    config: &VentureConfig,
    now: DateTime<Utc>,
    account_id: AccountId,
    kind: VentureKind,
    party: &[HirelingId],
) -> Result<StartOutcome, EngineError>
where
    S: DocumentStore + ?Sized,
{
    if let Some(rejection) = validate_party_shape(config, kind, party) {
        return Ok(StartOutcome::Rejected(rejection));
    }

    let key = keys::account(account_id);
    let Some(account) = store::fetch::<Account, _>(store, &key).await? else {
        return Ok(StartOutcome::AccountClosed);
    };

    let cost = supply_cost(config, kind, party.len())?;
    if let Some(rejection) = validate_dispatch(&account, config, kind, party, cost) {
        return Ok(StartOutcome::Rejected(rejection));
    }

    let due_at = now
        .checked_add_signed(match kind {
            VentureKind::Mission => config.mission_duration(),
            VentureKind::Expedition => config.expedition_duration(),
        })
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    let venture = Venture {
        kind,
        started_at: now,
        due_at,
        party: party.to_vec(),
    };

    let outcome = store::update_if::<Account, _, _, _>(
        store,
        &key,
        |a| validate_dispatch(a, config, kind, party, cost).is_none(),
        |a| {
            *a.venture_slot_mut(kind) = Some(venture.clone());
            for id in party {
                if let Some(hireling) = a.hireling_mut(*id) {
                    hireling.activity = Some(Activity {
                        kind: ActivityKind::from(kind),
                        ends_at: due_at,
                    });
                }
            }
            a.balance = a.balance.saturating_sub(cost);
        },
    )
    .await?;

    match outcome {
        CasOutcome::Applied { .. } => {
            tracing::info!(
                account = %account_id,
                kind = kind.as_str(),
                party = party.len(),
                cost,
                "venture dispatched"
            );
            Ok(StartOutcome::Started(VentureTicket {
                kind,
                due_at,
                party: party.to_vec(),
                supply_cost: cost,
            }))
        }
        CasOutcome::Rejected { current } => Ok(StartOutcome::Rejected(
            validate_dispatch(&current, config, kind, party, cost)
                .unwrap_or(StartRejection::RosterContended),
        )),
        CasOutcome::Missing => Ok(StartOutcome::AccountClosed),
    }
}

/// Put an idle hireling into training. Training shares the activity
/// lock with ventures, so a hireling can never train and adventure at
/// the same time; the lock releases lazily in the resolution scan once
/// the stint's end time passes.
///
/// # Errors
///
/// Returns [`EngineError`] only for infrastructure failures.
pub async fn start_training<S>(
    store: &S,
    config: &VentureConfig,
    now: DateTime<Utc>,
    account_id: AccountId,
    hireling_id: HirelingId,
) -> Result<TrainingOutcome, EngineError>
where
    S: DocumentStore + ?Sized,
{
    let key = keys::account(account_id);
    let ends_at = now
        .checked_add_signed(config.training_duration())
        .unwrap_or(DateTime::<Utc>::MAX_UTC);

    let ready = |a: &Account| {
        !a.paused && a.hireling(hireling_id).is_some_and(Hireling::is_idle)
    };
    let outcome = store::update_if::<Account, _, _, _>(store, &key, ready, |a| {
        if let Some(hireling) = a.hireling_mut(hireling_id) {
            hireling.activity = Some(Activity {
                kind: ActivityKind::Training,
                ends_at,
            });
        }
    })
    .await?;

    match outcome {
        CasOutcome::Applied { .. } => Ok(TrainingOutcome::Started { ends_at }),
        CasOutcome::Rejected { current } => {
            let rejection = if current.paused {
                StartRejection::AccountPaused
            } else {
                match current.hireling(hireling_id) {
                    None => StartRejection::UnknownHireling {
                        hireling: hireling_id,
                    },
                    Some(_) => StartRejection::HirelingBusy {
                        hireling: hireling_id,
                    },
                }
            };
            Ok(TrainingOutcome::Rejected(rejection))
        }
        CasOutcome::Missing => Ok(TrainingOutcome::AccountClosed),
    }
}

/// Resolve everything due on an account: finished training stints, then
/// each venture slot in reverse dispatch order.
///
/// A failure resolving one slot is isolated -- the offending venture is
/// defensively cleared (so it cannot wedge forever), the error logged,
/// and the scan continues. A fatal mishap terminates the account and
/// stops the scan.
///
/// # Errors
///
/// Returns [`EngineError`] only for infrastructure failures outside the
/// per-slot isolation boundary.
pub async fn resolve_due_ventures<S, A>(
    store: &S,
    audit: &A,
    config: &VentureConfig,
    roller: &dyn FateRoller,
    rewards: &dyn RewardTable,
    now: DateTime<Utc>,
    account_id: AccountId,
) -> Result<Vec<VentureReport>, EngineError>
where
    S: DocumentStore + ?Sized,
    A: AuditLog + ?Sized,
{
    let key = keys::account(account_id);
    let mut reports = Vec::new();

    release_finished_training(store, config, now, &key).await?;

    for kind in [VentureKind::Expedition, VentureKind::Mission] {
        // Fresh read per slot: earlier resolutions may have changed the
        // roster, and the account may be gone entirely.
        let Some(account) = store::fetch::<Account, _>(store, &key).await? else {
            break;
        };
        let Some(venture) = account.venture(kind).cloned() else {
            continue;
        };
        if !venture.is_due(now) {
            continue;
        }

        match resolve_one(store, audit, roller, rewards, now, &account, &venture).await {
            Ok(Some(report)) => {
                let fatal = report.fatal;
                reports.push(report);
                if fatal {
                    let _ = termination::terminate_account(
                        store,
                        audit,
                        now,
                        account_id,
                        TerminationCause::FatalMishap,
                    )
                    .await?;
                    break;
                }
            }
            // A concurrent caller resolved it first; effects discarded.
            Ok(None) => {}
            Err(err) => {
                tracing::error!(
                    account = %account_id,
                    kind = kind.as_str(),
                    %err,
                    "venture resolution failed; clearing the slot defensively"
                );
                clear_slot_defensively(store, &key, &venture).await;
            }
        }
    }

    Ok(reports)
}

/// Resolve one due venture. Returns `None` if a concurrent caller got
/// there first.
async fn resolve_one<S, A>(
    store: &S,
    audit: &A,
    roller: &dyn FateRoller,
    rewards: &dyn RewardTable,
    now: DateTime<Utc>,
    account: &Account,
    venture: &Venture,
) -> Result<Option<VentureReport>, EngineError>
where
    S: DocumentStore + ?Sized,
    A: AuditLog + ?Sized,
{
    let kind = venture.kind;
    let party: Vec<Hireling> = venture
        .party
        .iter()
        .filter_map(|id| account.hireling(*id).cloned())
        .collect();

    // Every effect is computed pure, before anything touches the store.
    let roll = roller.venture_roll(venture, &party);
    let reward = if roll.success {
        rewards.venture_reward(venture, &roll).max(0)
    } else {
        0
    };

    // The resolving CAS: clear the slot and commit the pure-computed
    // roster effects in one write. `started_at` identifies the venture
    // so a slot that was concurrently cleared and re-dispatched cannot
    // be resolved by us.
    let started_at = venture.started_at;
    let outcome = store::update_if::<Account, _, _, _>(
        store,
        &keys::account(account.id),
        |a| {
            a.venture(kind)
                .is_some_and(|v| v.started_at == started_at)
        },
        |a| {
            *a.venture_slot_mut(kind) = None;
            for id in &venture.party {
                if roll.casualties.contains(id) {
                    a.hirelings.retain(|h| h.id != *id);
                } else if let Some(hireling) = a.hireling_mut(*id) {
                    hireling.activity = None;
                    hireling.condition = hireling.condition.saturating_sub(roll.condition_loss);
                }
            }
        },
    )
    .await?;

    match outcome {
        CasOutcome::Rejected { .. } | CasOutcome::Missing => Ok(None),
        CasOutcome::Applied { .. } => {
            // The claim is durable; non-idempotent effects follow
            // strictly after it. Two resolvers can never both get here
            // for the same venture.
            let mut reward_paid = 0;
            if reward > 0 {
                match ironhold_ledger::credit(store, account.id, reward).await? {
                    CreditOutcome::Applied { .. } => reward_paid = reward,
                    CreditOutcome::AccountMissing => {
                        tracing::warn!(
                            account = %account.id,
                            reward,
                            "venture reward dropped; account closed during resolution"
                        );
                    }
                }
            }

            for casualty in &roll.casualties {
                let record = AuditEvent::new(
                    AuditKind::HirelingLost,
                    Some(account.id),
                    serde_json::json!({
                        "hireling": casualty.to_string(),
                        "venture": kind.as_str(),
                    }),
                    now,
                );
                if let Err(err) = audit.append(&record).await {
                    tracing::error!(account = %account.id, %err, "failed to record casualty");
                }
            }

            tracing::info!(
                account = %account.id,
                kind = kind.as_str(),
                success = roll.success,
                reward_paid,
                casualties = roll.casualties.len(),
                "venture resolved"
            );

            Ok(Some(VentureReport {
                kind,
                success: roll.success,
                reward_paid,
                casualties: roll.casualties,
                condition_loss: roll.condition_loss,
                fatal: roll.fatal,
            }))
        }
    }
}

/// Release hirelings whose training stint has ended, restoring
/// condition. Lazy, like all resolution.
async fn release_finished_training<S>(
    store: &S,
    config: &VentureConfig,
    now: DateTime<Utc>,
    key: &str,
) -> Result<(), EngineError>
where
    S: DocumentStore + ?Sized,
{
    let gain = config.training_condition_gain;
    let _ = store::update_if::<Account, _, _, _>(
        store,
        key,
        |a| a.hirelings.iter().any(|h| training_done(h, now)),
        |a| {
            for hireling in &mut a.hirelings {
                if training_done(hireling, now) {
                    hireling.activity = None;
                    hireling.condition =
                        hireling.condition.saturating_add(gain).min(CONDITION_MAX);
                }
            }
        },
    )
    .await?;
    // Rejected means nothing was due; Missing means the account is gone.
    // Both are fine here.
    Ok(())
}

/// Whether a hireling holds a training lock that has expired.
fn training_done(hireling: &Hireling, now: DateTime<Utc>) -> bool {
    matches!(
        &hireling.activity,
        Some(activity) if activity.kind == ActivityKind::Training && activity.ends_at <= now
    )
}

/// Last-resort clear for a venture whose resolution keeps failing: drop
/// the slot and unlock the party without applying any outcome. Errors
/// here are logged and swallowed -- this is already the failure path.
async fn clear_slot_defensively<S>(store: &S, key: &str, venture: &Venture)
where
    S: DocumentStore + ?Sized,
{
    let kind = venture.kind;
    let started_at = venture.started_at;
    let result = store::update_if::<Account, _, _, _>(
        store,
        key,
        |a| {
            a.venture(kind)
                .is_some_and(|v| v.started_at == started_at)
        },
        |a| {
            *a.venture_slot_mut(kind) = None;
            for id in &venture.party {
                if let Some(hireling) = a.hireling_mut(*id) {
                    hireling.activity = None;
                }
            }
        },
    )
    .await;
    if let Err(err) = result {
        tracing::error!(%err, kind = kind.as_str(), "defensive clear failed");
    }
}

/// Shape checks that need no account read.
fn validate_party_shape(
    config: &VentureConfig,
    kind: VentureKind,
    party: &[HirelingId],
) -> Option<StartRejection> {
    if party.is_empty() {
        return Some(StartRejection::EmptyParty);
    }
    let limit = match kind {
        VentureKind::Mission => 1,
        VentureKind::Expedition => config.max_expedition_party.max(1),
    };
    if party.len() > usize::try_from(limit).unwrap_or(usize::MAX) {
        return Some(StartRejection::PartyTooLarge { limit });
    }
    let mut seen: Vec<HirelingId> = Vec::with_capacity(party.len());
    for id in party {
        if seen.contains(id) {
            return Some(StartRejection::DuplicatePartyMember { hireling: *id });
        }
        seen.push(*id);
    }
    None
}

/// Full dispatch validation against one account snapshot. Doubles as
/// the CAS predicate (a `None` return means "go").
fn validate_dispatch(
    account: &Account,
    config: &VentureConfig,
    kind: VentureKind,
    party: &[HirelingId],
    cost: i64,
) -> Option<StartRejection> {
    if account.paused {
        return Some(StartRejection::AccountPaused);
    }
    if account.venture(kind).is_some() {
        return Some(StartRejection::SlotOccupied { kind });
    }
    for id in party {
        let Some(hireling) = account.hireling(*id) else {
            return Some(StartRejection::UnknownHireling { hireling: *id });
        };
        if !hireling.is_idle() {
            return Some(StartRejection::HirelingBusy { hireling: *id });
        }
        if hireling.condition < config.min_condition {
            return Some(StartRejection::HirelingUnfit {
                hireling: *id,
                condition: hireling.condition,
            });
        }
    }
    if account.balance < cost {
        return Some(StartRejection::InsufficientFunds {
            required: cost,
            balance: account.balance,
        });
    }
    None
}

/// Provisioning cost for a dispatch.
fn supply_cost(
    config: &VentureConfig,
    kind: VentureKind,
    members: usize,
) -> Result<i64, EngineError> {
    match kind {
        VentureKind::Mission => Ok(config.mission_supply_cost.max(0)),
        VentureKind::Expedition => {
            let headcount = i64::try_from(members).unwrap_or(i64::MAX);
            config
                .expedition_supply_cost_per_member
                .max(0)
                .checked_mul(headcount)
                .ok_or_else(|| EngineError::Arithmetic {
                    context: "expedition supply cost overflow".to_owned(),
                })
        }
    }
}
