//! The world boss: one shared, finite health pool under unbounded
//! concurrent attack.
//!
//! Everything here is a bare single-document CAS on the singleton boss
//! record; no lock is ever held across two store calls. The dangerous
//! transition -- "the pool just hit zero, somebody must pay out the
//! bounty exactly once" -- is a race among every attacker whose local
//! view shows a depleted pool, and the store lets exactly one
//! deactivation CAS win. Only that winner runs the reward phase; every
//! other finisher gets a non-error "already handled" result.

use chrono::{DateTime, Utc};
use ironhold_db::store::{self, CasOutcome};
use ironhold_db::{AuditLog, DocumentStore, keys};
use ironhold_ledger::CreditOutcome;
use ironhold_types::{
    AccountId, AuditEvent, AuditKind, TerminationCause, WorldBoss,
};

use crate::config::BossConfig;
use crate::error::EngineError;
use crate::rules::RewardTable;
use crate::termination;

/// One attack, as computed by the external combat collaborator.
///
/// The engine does not roll dice; it is handed the finished numbers and
/// commits them safely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BossStrike {
    /// Damage dealt to the pool. Must be positive.
    pub damage: i64,
    /// Whether the boss's counterattack killed the attacker outright.
    pub lethal_backlash: bool,
}

/// The bounty distribution run by the one winning finisher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BossPayout {
    /// Which generation fell.
    pub generation: u32,
    /// Total damage accumulated across all participants.
    pub total_damage: i64,
    /// Coins credited per participant (participants whose accounts
    /// closed mid-fight are skipped and keep a zero here).
    pub shares: Vec<(AccountId, i64)>,
}

/// Result of an attack call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttackOutcome {
    /// The strike landed.
    Struck {
        /// Pool remaining after this strike (may be negative).
        remaining_hp: i64,
        /// Whether this strike observed the pool at or below zero.
        defeated: bool,
        /// The bounty distribution -- present only for the one caller
        /// whose deactivation CAS won. Every other simultaneous "last
        /// hit" sees `defeated: true` with no payout.
        payout: Option<BossPayout>,
        /// Whether the attacker's account was terminated by backlash.
        backlash: bool,
    },
    /// The fight was already over when this strike arrived.
    AlreadyFelled,
    /// This generation expired undefeated; no strike landed.
    Expired,
}

/// Attack the world boss.
///
/// Safe under arbitrary concurrency: the decrement, the contribution
/// upsert, the one-time activation, and the one-time deactivation are
/// each independently CAS-guarded, and reward distribution runs exactly
/// once per generation by construction.
///
/// # Errors
///
/// Returns [`EngineError::Validation`] for a non-positive damage figure,
/// otherwise only infrastructure failures.
pub async fn attack_boss<S, A>(
    store: &S,
    audit: &A,
    config: &BossConfig,
    rewards: &dyn RewardTable,
    now: DateTime<Utc>,
    account_id: AccountId,
    strike: BossStrike,
) -> Result<AttackOutcome, EngineError>
where
    S: DocumentStore + ?Sized,
    A: AuditLog + ?Sized,
{
    if strike.damage <= 0 {
        return Err(EngineError::Validation {
            reason: format!("boss strike damage must be positive, got {}", strike.damage),
        });
    }

    let boss = ensure_boss(store, config, now).await?;

    // Expiry beats everything else: an undefeated generation past its
    // end is closed out (exactly once) and succeeded.
    if boss.active && boss.expires_at <= now {
        let closed = store::update_if::<WorldBoss, _, _, _>(
            store,
            keys::BOSS,
            |b| b.active && b.expires_at <= now,
            |b| b.active = false,
        )
        .await?;
        if matches!(closed, CasOutcome::Applied { .. }) {
            tracing::info!(generation = boss.generation, "world boss expired undefeated");
            seed_next_generation(store, config, now, boss.generation).await?;
        }
        return Ok(AttackOutcome::Expired);
    }

    // Lazy activation: the first attacker of a generation wakes it.
    // Losing this CAS just means it is already awake.
    if !boss.active && boss.remaining_hp > 0 {
        let _ = store::update_if::<WorldBoss, _, _, _>(
            store,
            keys::BOSS,
            |b| !b.active && b.remaining_hp > 0,
            |b| b.active = true,
        )
        .await?;
    }

    // The decrement and the attacker's accumulator upsert commit in one
    // write, guarded by the fight still being live. The store serializes
    // concurrent decrements; no read-modify-write race exists on the
    // counter.
    let struck = store::update_if::<WorldBoss, _, _, _>(
        store,
        keys::BOSS,
        |b| b.active,
        |b| b.record_damage(account_id, strike.damage),
    )
    .await?;

    let after = match struck {
        CasOutcome::Applied { after, .. } => after,
        CasOutcome::Rejected { current } => {
            // The fight ended between our read and our write. If the
            // winner crashed before seeding the next generation, repair
            // that here so a spent boss cannot wedge the encounter.
            if current.remaining_hp <= 0 {
                seed_next_generation(store, config, now, current.generation).await?;
            }
            return Ok(AttackOutcome::AlreadyFelled);
        }
        CasOutcome::Missing => return Ok(AttackOutcome::AlreadyFelled),
    };

    // Backlash kills commit after the damage has landed: the dead
    // account's contribution stays in the accumulator, but its share is
    // dropped at payout time (the account is gone).
    let mut backlash = false;
    if strike.lethal_backlash {
        let _ = termination::terminate_account(
            store,
            audit,
            now,
            account_id,
            TerminationCause::BossBacklash,
        )
        .await?;
        backlash = true;
    }

    let remaining_hp = after.remaining_hp;
    if remaining_hp > 0 {
        return Ok(AttackOutcome::Struck {
            remaining_hp,
            defeated: false,
            payout: None,
            backlash,
        });
    }

    // Every attacker that drove (or observed) the pool to zero races
    // this flip; the store picks exactly one winner.
    let felled = store::update_if::<WorldBoss, _, _, _>(
        store,
        keys::BOSS,
        |b| b.active && b.remaining_hp <= 0,
        |b| b.active = false,
    )
    .await?;

    match felled {
        CasOutcome::Applied { after: fallen, .. } => {
            // This caller owns the expensive phase; it runs outside any
            // lock because no second caller can get here.
            let payout = distribute_bounty(store, audit, config, rewards, now, &fallen).await?;
            seed_next_generation(store, config, now, fallen.generation).await?;
            Ok(AttackOutcome::Struck {
                remaining_hp,
                defeated: true,
                payout: Some(payout),
                backlash,
            })
        }
        // Someone else's flip won: the kill is already being handled.
        CasOutcome::Rejected { .. } | CasOutcome::Missing => Ok(AttackOutcome::Struck {
            remaining_hp,
            defeated: true,
            payout: None,
            backlash,
        }),
    }
}

/// Read the current boss, creating the first generation if the
/// singleton does not exist yet. Losing the creation race is normal.
async fn ensure_boss<S>(
    store: &S,
    config: &BossConfig,
    now: DateTime<Utc>,
) -> Result<WorldBoss, EngineError>
where
    S: DocumentStore + ?Sized,
{
    if let Some(boss) = store::fetch::<WorldBoss, _>(store, keys::BOSS).await? {
        return Ok(boss);
    }

    let fresh = new_generation(config, now, 1);
    let _ = store::create(store, keys::BOSS, &fresh).await?;
    store::fetch::<WorldBoss, _>(store, keys::BOSS)
        .await?
        .ok_or_else(|| {
            EngineError::Store(ironhold_db::StoreError::Decode {
                context: "boss singleton vanished immediately after creation".to_owned(),
            })
        })
}

/// Pay every participant its slice of the bounty and write the kill to
/// history. Runs exactly once per generation, by construction.
async fn distribute_bounty<S, A>(
    store: &S,
    audit: &A,
    config: &BossConfig,
    rewards: &dyn RewardTable,
    now: DateTime<Utc>,
    fallen: &WorldBoss,
) -> Result<BossPayout, EngineError>
where
    S: DocumentStore + ?Sized,
    A: AuditLog + ?Sized,
{
    let total_damage = fallen.total_damage();
    let mut shares = Vec::with_capacity(fallen.participants.len());

    for contribution in &fallen.participants {
        let share = rewards
            .boss_share(config.bounty, contribution, total_damage)
            .max(0);
        let mut paid = 0;
        if share > 0 {
            match ironhold_ledger::credit(store, contribution.account_id, share).await? {
                CreditOutcome::Applied { .. } => paid = share,
                CreditOutcome::AccountMissing => {
                    tracing::warn!(
                        account = %contribution.account_id,
                        share,
                        "bounty share dropped; account closed during the fight"
                    );
                }
            }
        }
        shares.push((contribution.account_id, paid));
    }

    let record = AuditEvent::new(
        AuditKind::BossFelled,
        None,
        serde_json::json!({
            "generation": fallen.generation,
            "total_damage": total_damage,
            "participants": fallen.participants.len(),
        }),
        now,
    );
    if let Err(err) = audit.append(&record).await {
        tracing::error!(%err, "failed to record boss kill");
    }

    tracing::info!(
        generation = fallen.generation,
        total_damage,
        participants = fallen.participants.len(),
        "world boss felled; bounty distributed"
    );

    Ok(BossPayout {
        generation: fallen.generation,
        total_damage,
        shares,
    })
}

/// Replace a spent generation with the next one (inactive, fuller
/// pool). Guarded so only the generation it targets is replaced;
/// idempotent against concurrent repair attempts.
async fn seed_next_generation<S>(
    store: &S,
    config: &BossConfig,
    now: DateTime<Utc>,
    spent_generation: u32,
) -> Result<(), EngineError>
where
    S: DocumentStore + ?Sized,
{
    let next = new_generation(config, now, spent_generation.saturating_add(1));
    let _ = store::update_if::<WorldBoss, _, _, _>(
        store,
        keys::BOSS,
        |b| !b.active && b.generation == spent_generation,
        |b| *b = next.clone(),
    )
    .await?;
    Ok(())
}

/// Build a dormant boss for `generation`.
fn new_generation(config: &BossConfig, now: DateTime<Utc>, generation: u32) -> WorldBoss {
    let expires_at = now
        .checked_add_signed(config.duration())
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    WorldBoss::new(generation, config.hp_for_generation(generation), expires_at)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic, clippy::arithmetic_side_effects)]
mod tests {
    use chrono::TimeZone;
    use ironhold_db::{MemoryAuditLog, MemoryStore};
    use ironhold_types::{Account, BossContribution};

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
    }

    fn test_config() -> BossConfig {
        BossConfig {
            base_hp: 10,
            hp_growth_per_generation: 5,
            duration_hours: 72,
            bounty: 900,
        }
    }

    /// Proportional payout, integer floor.
    struct Proportional;

    impl RewardTable for Proportional {
        fn venture_reward(
            &self,
            _venture: &ironhold_types::Venture,
            _roll: &crate::rules::VentureRoll,
        ) -> i64 {
            0
        }

        fn boss_share(
            &self,
            bounty: i64,
            contribution: &BossContribution,
            total_damage: i64,
        ) -> i64 {
            if total_damage <= 0 {
                return 0;
            }
            bounty
                .saturating_mul(contribution.damage)
                .checked_div(total_damage)
                .unwrap_or(0)
        }
    }

    async fn seed_account(store: &MemoryStore, balance: i64) -> AccountId {
        let account = Account::new(
            AccountId::new(),
            "Raider".to_owned(),
            balance,
            at(1_000_000),
            at(0),
        );
        assert!(
            store::create(store, &ironhold_db::keys::account(account.id), &account)
                .await
                .unwrap()
        );
        account.id
    }

    fn strike(damage: i64) -> BossStrike {
        BossStrike {
            damage,
            lethal_backlash: false,
        }
    }

    #[tokio::test]
    async fn first_attack_spawns_and_activates() {
        let store = MemoryStore::new();
        let audit = MemoryAuditLog::new();
        let config = test_config();
        let attacker = seed_account(&store, 0).await;

        let outcome = attack_boss(
            &store,
            &audit,
            &config,
            &Proportional,
            at(0),
            attacker,
            strike(4),
        )
        .await
        .unwrap();
        assert_eq!(
            outcome,
            AttackOutcome::Struck {
                remaining_hp: 6,
                defeated: false,
                payout: None,
                backlash: false
            }
        );

        let boss: WorldBoss = store::fetch(&store, keys::BOSS).await.unwrap().unwrap();
        assert!(boss.active);
        assert_eq!(boss.generation, 1);
        assert_eq!(boss.contribution(attacker).map(|c| c.damage), Some(4));
    }

    #[tokio::test]
    async fn last_hit_pays_out_and_seeds_successor() {
        let store = MemoryStore::new();
        let audit = MemoryAuditLog::new();
        let config = test_config();
        let first = seed_account(&store, 0).await;
        let second = seed_account(&store, 0).await;

        let _ = attack_boss(&store, &audit, &config, &Proportional, at(0), first, strike(6))
            .await
            .unwrap();
        let outcome = attack_boss(
            &store,
            &audit,
            &config,
            &Proportional,
            at(10),
            second,
            strike(7),
        )
        .await
        .unwrap();

        match outcome {
            AttackOutcome::Struck {
                remaining_hp,
                defeated: true,
                payout: Some(payout),
                backlash: false,
            } => {
                assert_eq!(remaining_hp, -3);
                assert_eq!(payout.generation, 1);
                assert_eq!(payout.total_damage, 13);
                // 900 * 6/13 = 415, 900 * 7/13 = 484 (integer floor).
                let paid: Vec<i64> = payout.shares.iter().map(|(_, coins)| *coins).collect();
                assert_eq!(paid, vec![415, 484]);
            }
            other => panic!("expected winning strike, got {other:?}"),
        }

        // Shares actually landed on the balances.
        let a: Account = store::fetch(&store, &ironhold_db::keys::account(first))
            .await
            .unwrap()
            .unwrap();
        let b: Account = store::fetch(&store, &ironhold_db::keys::account(second))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(a.balance, 415);
        assert_eq!(b.balance, 484);

        // The kill is in history and the next generation is dormant.
        let history = audit.all().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history.first().map(|e| e.kind), Some(AuditKind::BossFelled));

        let boss: WorldBoss = store::fetch(&store, keys::BOSS).await.unwrap().unwrap();
        assert_eq!(boss.generation, 2);
        assert_eq!(boss.remaining_hp, 15);
        assert!(!boss.active);
        assert!(boss.participants.is_empty());
    }

    #[tokio::test]
    async fn attack_after_the_kill_is_already_felled() {
        let store = MemoryStore::new();
        let audit = MemoryAuditLog::new();
        let config = test_config();
        let killer = seed_account(&store, 0).await;
        let late = seed_account(&store, 0).await;

        let _ = attack_boss(
            &store,
            &audit,
            &config,
            &Proportional,
            at(0),
            killer,
            strike(10),
        )
        .await
        .unwrap();

        // Generation 2 is dormant now; the late attacker simply starts
        // the next fight rather than hitting a corpse.
        let outcome = attack_boss(
            &store,
            &audit,
            &config,
            &Proportional,
            at(5),
            late,
            strike(3),
        )
        .await
        .unwrap();
        assert_eq!(
            outcome,
            AttackOutcome::Struck {
                remaining_hp: 12,
                defeated: false,
                payout: None,
                backlash: false
            }
        );
    }

    #[tokio::test]
    async fn expired_generation_closes_without_payout() {
        let store = MemoryStore::new();
        let audit = MemoryAuditLog::new();
        let config = test_config();
        let attacker = seed_account(&store, 0).await;

        let _ = attack_boss(
            &store,
            &audit,
            &config,
            &Proportional,
            at(0),
            attacker,
            strike(3),
        )
        .await
        .unwrap();

        // Past the 72h lifetime: the strike does not land.
        let late = at(73 * 3_600);
        let outcome = attack_boss(
            &store,
            &audit,
            &config,
            &Proportional,
            late,
            attacker,
            strike(3),
        )
        .await
        .unwrap();
        assert_eq!(outcome, AttackOutcome::Expired);

        // Nobody got paid; generation 2 is seeded.
        let account: Account = store::fetch(&store, &ironhold_db::keys::account(attacker))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(account.balance, 0);
        assert!(audit.all().await.is_empty());

        let boss: WorldBoss = store::fetch(&store, keys::BOSS).await.unwrap().unwrap();
        assert_eq!(boss.generation, 2);
        assert!(!boss.active);
    }

    #[tokio::test]
    async fn lethal_backlash_terminates_after_the_damage_lands() {
        let store = MemoryStore::new();
        let audit = MemoryAuditLog::new();
        let config = test_config();
        let doomed = seed_account(&store, 50).await;

        let outcome = attack_boss(
            &store,
            &audit,
            &config,
            &Proportional,
            at(0),
            doomed,
            BossStrike {
                damage: 4,
                lethal_backlash: true,
            },
        )
        .await
        .unwrap();
        assert_eq!(
            outcome,
            AttackOutcome::Struck {
                remaining_hp: 6,
                defeated: false,
                payout: None,
                backlash: true
            }
        );

        // The account is gone, the damage stands.
        let account: Option<Account> =
            store::fetch(&store, &ironhold_db::keys::account(doomed)).await.unwrap();
        assert!(account.is_none());
        let boss: WorldBoss = store::fetch(&store, keys::BOSS).await.unwrap().unwrap();
        assert_eq!(boss.remaining_hp, 6);
        assert_eq!(boss.contribution(doomed).map(|c| c.damage), Some(4));

        let history = audit.all().await;
        assert_eq!(history.len(), 1);
        assert_eq!(
            history.first().map(|e| e.kind),
            Some(AuditKind::BossBacklash)
        );
    }

    #[tokio::test]
    async fn non_positive_damage_is_refused() {
        let store = MemoryStore::new();
        let audit = MemoryAuditLog::new();
        let config = test_config();
        let attacker = seed_account(&store, 0).await;

        let outcome = attack_boss(
            &store,
            &audit,
            &config,
            &Proportional,
            at(0),
            attacker,
            strike(0),
        )
        .await;
        assert!(matches!(outcome, Err(EngineError::Validation { .. })));
    }

    #[tokio::test]
    async fn backlash_on_the_killing_blow_still_pays_survivors() {
        let store = MemoryStore::new();
        let audit = MemoryAuditLog::new();
        let config = test_config();
        let survivor = seed_account(&store, 0).await;
        let doomed = seed_account(&store, 0).await;

        let _ = attack_boss(
            &store,
            &audit,
            &config,
            &Proportional,
            at(0),
            survivor,
            strike(5),
        )
        .await
        .unwrap();

        let outcome = attack_boss(
            &store,
            &audit,
            &config,
            &Proportional,
            at(1),
            doomed,
            BossStrike {
                damage: 5,
                lethal_backlash: true,
            },
        )
        .await
        .unwrap();

        match outcome {
            AttackOutcome::Struck {
                defeated: true,
                payout: Some(payout),
                backlash: true,
                ..
            } => {
                // The dead killer's share is dropped; the survivor's lands.
                let by_account: Vec<(AccountId, i64)> = payout.shares;
                assert!(by_account.iter().any(|(id, coins)| *id == survivor && *coins == 450));
                assert!(by_account.iter().any(|(id, coins)| *id == doomed && *coins == 0));
            }
            other => panic!("expected winning strike with backlash, got {other:?}"),
        }

        let account: Account = store::fetch(&store, &ironhold_db::keys::account(survivor))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(account.balance, 450);
    }

    #[test]
    fn generations_grow_by_config() {
        let config = test_config();
        let g3 = new_generation(&config, at(0), 3);
        assert_eq!(g3.total_hp, 20);
        assert_eq!(g3.expires_at, at(72 * 3_600));
        assert!(!g3.active);
    }

    #[tokio::test]
    async fn expiry_duration_is_generation_relative() {
        // A generation seeded at t must expire at t + duration, not at
        // the original spawn time.
        let store = MemoryStore::new();
        let audit = MemoryAuditLog::new();
        let config = test_config();
        let attacker = seed_account(&store, 0).await;

        let _ = attack_boss(
            &store,
            &audit,
            &config,
            &Proportional,
            at(0),
            attacker,
            strike(10),
        )
        .await
        .unwrap();

        let boss: WorldBoss = store::fetch(&store, keys::BOSS).await.unwrap().unwrap();
        assert_eq!(boss.generation, 2);
        assert_eq!(boss.expires_at, at(72 * 3_600));
    }
}
