//! The engine facade consumed by game-action handlers.
//!
//! [`Engine`] wires the document store, the audit history, the clock,
//! and the content collaborators together and exposes the operations a
//! front-end calls. It holds no per-request state and no in-process
//! cache of any document's truth value: every operation re-derives from
//! the store, so any number of handler instances can share one store
//! safely.

use std::sync::Arc;

use ironhold_db::store::{self, CasOutcome};
use ironhold_db::{AuditLog, DocumentStore, keys};
use ironhold_types::{
    Account, AccountId, AuditEvent, AuditKind, Hireling, HirelingId, HirelingPool,
    TerminationCause, VentureKind,
};

use crate::boss::{self, AttackOutcome, BossStrike};
use crate::clock::GameClock;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::rent::{self, RentOutcome};
use crate::rules::{FateRoller, RewardTable};
use crate::termination::{self, Termination};
use crate::ventures::{self, StartOutcome, TrainingOutcome, VentureReport};

/// Everything a handler needs before dispatching a player action:
/// settlement first, then whatever fell due and resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prepared {
    /// What the settlement clock did.
    pub rent: RentOutcome,
    /// Ventures (and training stints) that resolved on this read.
    pub ventures: Vec<VentureReport>,
}

/// Result of a recruitment call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecruitOutcome {
    /// A hireling was claimed from the pool onto the roster.
    Hired(Hireling),
    /// The public pool had nobody idle.
    PoolEmpty,
    /// The account does not exist; the claimed hireling was returned
    /// to the pool.
    AccountClosed,
}

/// The deferred-resolution engine.
///
/// Generic over the document store and audit backends so tests run
/// against the in-memory pair while production uses Dragonfly and
/// `PostgreSQL`.
pub struct Engine<S, A> {
    store: Arc<S>,
    audit: Arc<A>,
    config: EngineConfig,
    clock: Arc<dyn GameClock>,
    roller: Arc<dyn FateRoller>,
    rewards: Arc<dyn RewardTable>,
}

impl<S, A> Engine<S, A>
where
    S: DocumentStore,
    A: AuditLog,
{
    /// Assemble an engine from its parts.
    pub fn new(
        store: Arc<S>,
        audit: Arc<A>,
        config: EngineConfig,
        clock: Arc<dyn GameClock>,
        roller: Arc<dyn FateRoller>,
        rewards: Arc<dyn RewardTable>,
    ) -> Self {
        Self {
            store,
            audit,
            config,
            clock,
            roller,
            rewards,
        }
    }

    /// The engine's configuration.
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create a fresh account with the configured starting balance and
    /// its first rent cycle scheduled one full cycle out.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on infrastructure failure or in the
    /// (practically impossible) case of an id collision.
    pub async fn register_account(&self, name: &str) -> Result<Account, EngineError> {
        let now = self.clock.now();
        let first_due = now
            .checked_add_signed(self.config.settlement.cycle())
            .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC);
        let account = Account::new(
            AccountId::new(),
            name.to_owned(),
            self.config.settlement.starting_balance,
            first_due,
            now,
        );

        let created =
            store::create(self.store.as_ref(), &keys::account(account.id), &account).await?;
        if !created {
            return Err(EngineError::Validation {
                reason: format!("account id collision: {}", account.id),
            });
        }

        tracing::info!(account = %account.id, name, "account registered");
        Ok(account)
    }

    /// Read an account document as-is, without resolving anything.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on infrastructure failure.
    pub async fn account(&self, account_id: AccountId) -> Result<Option<Account>, EngineError> {
        Ok(store::fetch(self.store.as_ref(), &keys::account(account_id)).await?)
    }

    /// The call-before-any-player-action entry point: settle due rent,
    /// then lazily resolve everything else that fell due.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on infrastructure failure.
    pub async fn prepare_account(&self, account_id: AccountId) -> Result<Prepared, EngineError> {
        let rent = self.settle_rent(account_id).await?;
        let ventures = match rent {
            RentOutcome::Bankrupt(_) | RentOutcome::AccountClosed => Vec::new(),
            RentOutcome::NotDue | RentOutcome::OnHold | RentOutcome::Settled(_) => {
                self.resolve_due_ventures(account_id).await?
            }
        };
        Ok(Prepared { rent, ventures })
    }

    /// Settle any due rent cycles. See [`rent::settle_rent`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on infrastructure failure.
    pub async fn settle_rent(&self, account_id: AccountId) -> Result<RentOutcome, EngineError> {
        rent::settle_rent(
            self.store.as_ref(),
            self.audit.as_ref(),
            &self.config.settlement,
            self.clock.now(),
            account_id,
        )
        .await
    }

    /// Dispatch a venture. See [`ventures::start_venture`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on infrastructure failure.
    pub async fn start_venture(
        &self,
        account_id: AccountId,
        kind: VentureKind,
        party: &[HirelingId],
    ) -> Result<StartOutcome, EngineError> {
        ventures::start_venture(
            self.store.as_ref(),
            &self.config.ventures,
            self.clock.now(),
            account_id,
            kind,
            party,
        )
        .await
    }

    /// Put a hireling into training. See [`ventures::start_training`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on infrastructure failure.
    pub async fn start_training(
        &self,
        account_id: AccountId,
        hireling_id: HirelingId,
    ) -> Result<TrainingOutcome, EngineError> {
        ventures::start_training(
            self.store.as_ref(),
            &self.config.ventures,
            self.clock.now(),
            account_id,
            hireling_id,
        )
        .await
    }

    /// Resolve everything due on an account.
    /// See [`ventures::resolve_due_ventures`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on infrastructure failure.
    pub async fn resolve_due_ventures(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<VentureReport>, EngineError> {
        ventures::resolve_due_ventures(
            self.store.as_ref(),
            self.audit.as_ref(),
            &self.config.ventures,
            self.roller.as_ref(),
            self.rewards.as_ref(),
            self.clock.now(),
            account_id,
        )
        .await
    }

    /// Attack the world boss. See [`boss::attack_boss`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on infrastructure failure or a
    /// non-positive damage figure.
    pub async fn attack_boss(
        &self,
        account_id: AccountId,
        strike: BossStrike,
    ) -> Result<AttackOutcome, EngineError> {
        boss::attack_boss(
            self.store.as_ref(),
            self.audit.as_ref(),
            &self.config.boss,
            self.rewards.as_ref(),
            self.clock.now(),
            account_id,
            strike,
        )
        .await
    }

    /// Tear down an account. See [`termination::terminate_account`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on infrastructure failure of the final
    /// delete.
    pub async fn terminate_account(
        &self,
        account_id: AccountId,
        cause: TerminationCause,
    ) -> Result<Termination, EngineError> {
        termination::terminate_account(
            self.store.as_ref(),
            self.audit.as_ref(),
            self.clock.now(),
            account_id,
            cause,
        )
        .await
    }

    /// Toggle the vacation flag. Returns `false` if the account is gone.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on infrastructure failure.
    pub async fn set_paused(
        &self,
        account_id: AccountId,
        paused: bool,
    ) -> Result<bool, EngineError> {
        let outcome = store::update_if::<Account, _, _, _>(
            self.store.as_ref(),
            &keys::account(account_id),
            |_| true,
            |a| a.paused = paused,
        )
        .await?;
        Ok(matches!(outcome, CasOutcome::Applied { .. }))
    }

    /// Claim an idle hireling from the public pool onto the roster.
    ///
    /// The pool pop is the claiming CAS; the roster push follows it.
    /// If the account turns out to be gone, the hireling goes back.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on infrastructure failure.
    pub async fn recruit_hireling(
        &self,
        account_id: AccountId,
    ) -> Result<RecruitOutcome, EngineError> {
        let claim = store::update_if::<HirelingPool, _, _, _>(
            self.store.as_ref(),
            keys::HIRELING_POOL,
            |pool| !pool.idle.is_empty(),
            |pool| {
                let _ = pool.idle.pop();
            },
        )
        .await?;

        let hireling = match claim {
            CasOutcome::Applied { before, .. } => match before.idle.last().cloned() {
                Some(hireling) => hireling,
                None => return Ok(RecruitOutcome::PoolEmpty),
            },
            CasOutcome::Rejected { .. } | CasOutcome::Missing => {
                return Ok(RecruitOutcome::PoolEmpty);
            }
        };

        let added = store::update_if::<Account, _, _, _>(
            self.store.as_ref(),
            &keys::account(account_id),
            |_| true,
            |a| {
                if !a.hirelings.iter().any(|h| h.id == hireling.id) {
                    a.hirelings.push(hireling.clone());
                }
            },
        )
        .await?;

        match added {
            CasOutcome::Applied { .. } => {
                tracing::info!(account = %account_id, hireling = %hireling.id, "hireling recruited");
                Ok(RecruitOutcome::Hired(hireling))
            }
            CasOutcome::Rejected { .. } | CasOutcome::Missing => {
                // Nobody to employ them: put the claim back.
                let returned = hireling.clone();
                let _ = store::update_if::<HirelingPool, _, _, _>(
                    self.store.as_ref(),
                    keys::HIRELING_POOL,
                    |_| true,
                    |pool| {
                        if !pool.idle.iter().any(|h| h.id == returned.id) {
                            pool.idle.push(returned.clone());
                        }
                    },
                )
                .await?;
                Ok(RecruitOutcome::AccountClosed)
            }
        }
    }

    /// Record a duel in the audit history, for the combat front-end.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on infrastructure failure.
    pub async fn record_duel(
        &self,
        account_id: AccountId,
        details: serde_json::Value,
    ) -> Result<AuditEvent, EngineError> {
        let event = AuditEvent::new(AuditKind::Duel, Some(account_id), details, self.clock.now());
        self.audit.append(&event).await?;
        Ok(event)
    }

    /// Duels recorded for an account since `since` -- the cooldown
    /// window query.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on infrastructure failure.
    pub async fn duels_since(
        &self,
        account_id: AccountId,
        since: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<AuditEvent>, EngineError> {
        Ok(self
            .audit
            .events_since(account_id, AuditKind::Duel, since)
            .await?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic, clippy::arithmetic_side_effects)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use ironhold_db::{MemoryAuditLog, MemoryStore};
    use ironhold_types::{BossContribution, Venture};

    use super::*;
    use crate::clock::ManualClock;
    use crate::rules::VentureRoll;

    struct NoFate;

    impl FateRoller for NoFate {
        fn venture_roll(&self, _v: &Venture, _p: &[Hireling]) -> VentureRoll {
            VentureRoll::default()
        }
    }

    struct NoRewards;

    impl RewardTable for NoRewards {
        fn venture_reward(&self, _v: &Venture, _r: &VentureRoll) -> i64 {
            0
        }

        fn boss_share(&self, _b: i64, _c: &BossContribution, _t: i64) -> i64 {
            0
        }
    }

    fn test_engine() -> (Engine<MemoryStore, MemoryAuditLog>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.timestamp_opt(0, 0).single().unwrap_or_default(),
        ));
        let engine = Engine::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryAuditLog::new()),
            EngineConfig::default(),
            Arc::clone(&clock) as Arc<dyn GameClock>,
            Arc::new(NoFate),
            Arc::new(NoRewards),
        );
        (engine, clock)
    }

    #[tokio::test]
    async fn register_seeds_balance_and_schedule() {
        let (engine, clock) = test_engine();
        let account = engine.register_account("Haldis").await.unwrap();

        assert_eq!(account.balance, 250);
        assert_eq!(account.next_due_at, clock.now() + Duration::hours(24));
        assert!(account.hirelings.is_empty());

        let stored = engine.account(account.id).await.unwrap();
        assert_eq!(stored, Some(account));
    }

    #[tokio::test]
    async fn prepare_on_a_fresh_account_is_quiet() {
        let (engine, _clock) = test_engine();
        let account = engine.register_account("Quiet").await.unwrap();

        let prepared = engine.prepare_account(account.id).await.unwrap();
        assert_eq!(prepared.rent, RentOutcome::NotDue);
        assert!(prepared.ventures.is_empty());
    }

    #[tokio::test]
    async fn recruit_claims_from_the_pool() {
        let (engine, _clock) = test_engine();
        let account = engine.register_account("Employer").await.unwrap();

        // Empty pool first.
        assert_eq!(
            engine.recruit_hireling(account.id).await.unwrap(),
            RecruitOutcome::PoolEmpty
        );

        // Seed the pool with one idle hireling.
        let pool = HirelingPool {
            idle: vec![Hireling::new(HirelingId::new(), "Brick".to_owned())],
        };
        assert!(
            store::create(engine.store.as_ref(), keys::HIRELING_POOL, &pool)
                .await
                .unwrap()
        );

        let hired = match engine.recruit_hireling(account.id).await.unwrap() {
            RecruitOutcome::Hired(h) => h,
            other => panic!("expected Hired, got {other:?}"),
        };
        assert_eq!(hired.name, "Brick");

        let stored = engine.account(account.id).await.unwrap().unwrap();
        assert_eq!(stored.hirelings.len(), 1);

        // Pool is drained now.
        assert_eq!(
            engine.recruit_hireling(account.id).await.unwrap(),
            RecruitOutcome::PoolEmpty
        );
    }

    #[tokio::test]
    async fn recruiting_for_a_dead_account_returns_the_claim() {
        let (engine, _clock) = test_engine();
        let pool = HirelingPool {
            idle: vec![Hireling::new(HirelingId::new(), "Stray".to_owned())],
        };
        assert!(
            store::create(engine.store.as_ref(), keys::HIRELING_POOL, &pool)
                .await
                .unwrap()
        );

        let outcome = engine.recruit_hireling(AccountId::new()).await.unwrap();
        assert_eq!(outcome, RecruitOutcome::AccountClosed);

        let pool: HirelingPool =
            store::fetch(engine.store.as_ref(), keys::HIRELING_POOL)
                .await
                .unwrap()
                .unwrap();
        assert_eq!(pool.idle.len(), 1);
    }

    #[tokio::test]
    async fn duel_history_serves_cooldown_windows() {
        let (engine, clock) = test_engine();
        let account = engine.register_account("Duelist").await.unwrap();

        let _ = engine
            .record_duel(account.id, serde_json::json!({ "won": false }))
            .await
            .unwrap();
        clock.advance(Duration::minutes(90));
        let _ = engine
            .record_duel(account.id, serde_json::json!({ "won": true }))
            .await
            .unwrap();

        let last_hour = engine
            .duels_since(account.id, clock.now() - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(last_hour.len(), 1);
    }

    #[tokio::test]
    async fn pause_toggle_round_trips() {
        let (engine, _clock) = test_engine();
        let account = engine.register_account("Idle").await.unwrap();

        assert!(engine.set_paused(account.id, true).await.unwrap());
        let stored = engine.account(account.id).await.unwrap().unwrap();
        assert!(stored.paused);

        assert!(engine.set_paused(account.id, false).await.unwrap());
        assert!(!engine.set_paused(AccountId::new(), true).await.unwrap());
    }
}
