//! Core entity structs for the Ironhold data model.
//!
//! Every struct here maps one-to-one onto a document (or an embedded
//! sub-document) in the store. Embedded sub-documents that come in
//! multiple shapes carry an explicit `kind` field so they deserialize
//! into tagged variants with a fixed schema per kind.
//!
//! Mutations to these documents go through the CAS helpers in
//! `ironhold-db`; nothing in this crate touches the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::{ActivityKind, AuditKind, VentureKind};
use crate::ids::{AccountId, AuditEventId, HirelingId};

/// Upper bound of the hireling condition stat.
pub const CONDITION_MAX: u8 = 100;

// ---------------------------------------------------------------------------
// Debt
// ---------------------------------------------------------------------------

/// Outstanding rent debt on an account.
///
/// Present only while the account is in arrears; a fully paid account
/// carries `None`. Invariant: a `Debt` always has `missed_cycles >= 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Debt {
    /// Total coins owed across all missed cycles.
    pub amount: i64,
    /// Number of consecutive billing cycles that went unpaid.
    pub missed_cycles: u32,
    /// When the account first fell into arrears.
    pub started_at: DateTime<Utc>,
}

impl Debt {
    /// Start a debt record for a first missed bill.
    pub const fn new(amount: i64, now: DateTime<Utc>) -> Self {
        Self {
            amount,
            missed_cycles: 1,
            started_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Hireling
// ---------------------------------------------------------------------------

/// What a hireling is currently occupied with, and until when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    /// The kind of occupation holding the lock.
    pub kind: ActivityKind,
    /// When the occupation ends and the hireling becomes idle again.
    pub ends_at: DateTime<Utc>,
}

/// A hired NPC on an account's roster.
///
/// The `activity` field is the mutual-exclusion lock across missions,
/// expeditions, and training: dispatching a hireling requires it to be
/// `None` at CAS time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hireling {
    /// Unique hireling identifier.
    pub id: HirelingId,
    /// Display name.
    pub name: String,
    /// Condition stat (0--100). Decays with use; a hireling below the
    /// configured floor cannot be dispatched.
    pub condition: u8,
    /// Current occupation, or `None` when idle.
    pub activity: Option<Activity>,
}

impl Hireling {
    /// Create a fresh hireling at full condition.
    pub const fn new(id: HirelingId, name: String) -> Self {
        Self {
            id,
            name,
            condition: CONDITION_MAX,
            activity: None,
        }
    }

    /// Whether the hireling holds no activity lock.
    pub const fn is_idle(&self) -> bool {
        self.activity.is_none()
    }
}

// ---------------------------------------------------------------------------
// Venture
// ---------------------------------------------------------------------------

/// A dispatched venture (mission or expedition) awaiting resolution.
///
/// Embedded in the account under the slot matching its kind. The CAS
/// that clears the slot back to `None` is the single source of truth
/// for "has this venture been resolved"; `started_at` doubles as the
/// venture's identity in that CAS predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Venture {
    /// Mission or expedition.
    pub kind: VentureKind,
    /// When the venture was dispatched. Identity token for resolution.
    pub started_at: DateTime<Utc>,
    /// When the venture becomes due for resolution.
    pub due_at: DateTime<Utc>,
    /// Roster ids of the hirelings dispatched on this venture.
    pub party: Vec<HirelingId>,
}

impl Venture {
    /// Whether the venture is due for resolution at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.due_at <= now
    }
}

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// A player account: one document in the store.
///
/// Concurrently mutated by every engine component; all writes are
/// CAS-guarded. Created on first action, destroyed only by the
/// termination handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Unique account identifier.
    pub id: AccountId,
    /// Display name.
    pub name: String,
    /// Coin balance. Kept non-negative by debit predicates.
    pub balance: i64,
    /// Outstanding rent debt, if any.
    pub debt: Option<Debt>,
    /// When the next rent cycle falls due. Doubles as the settlement
    /// cycle lock: a caller that CAS-advances this token owns the cycle.
    pub next_due_at: DateTime<Utc>,
    /// Vacation flag: suspends billing and all scheduling.
    pub paused: bool,
    /// Active mission slot, if a mission is out.
    pub active_mission: Option<Venture>,
    /// Active expedition slot, if an expedition is out.
    pub active_expedition: Option<Venture>,
    /// Hired NPC roster.
    pub hirelings: Vec<Hireling>,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Create a fresh account with an empty roster and no debt.
    pub const fn new(
        id: AccountId,
        name: String,
        starting_balance: i64,
        next_due_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name,
            balance: starting_balance,
            debt: None,
            next_due_at,
            paused: false,
            active_mission: None,
            active_expedition: None,
            hirelings: Vec::new(),
            created_at: now,
        }
    }

    /// Look up a hireling on the roster.
    pub fn hireling(&self, id: HirelingId) -> Option<&Hireling> {
        self.hirelings.iter().find(|h| h.id == id)
    }

    /// Look up a hireling on the roster, mutably.
    pub fn hireling_mut(&mut self, id: HirelingId) -> Option<&mut Hireling> {
        self.hirelings.iter_mut().find(|h| h.id == id)
    }

    /// The venture slot for the given kind.
    pub const fn venture(&self, kind: VentureKind) -> Option<&Venture> {
        match kind {
            VentureKind::Mission => self.active_mission.as_ref(),
            VentureKind::Expedition => self.active_expedition.as_ref(),
        }
    }

    /// The venture slot for the given kind, mutably.
    pub const fn venture_slot_mut(&mut self, kind: VentureKind) -> &mut Option<Venture> {
        match kind {
            VentureKind::Mission => &mut self.active_mission,
            VentureKind::Expedition => &mut self.active_expedition,
        }
    }
}

// ---------------------------------------------------------------------------
// World boss
// ---------------------------------------------------------------------------

/// One attacker's accumulated contribution to the current boss fight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BossContribution {
    /// The attacking account.
    pub account_id: AccountId,
    /// Total damage dealt across all attacks.
    pub damage: i64,
    /// Number of attacks landed.
    pub attacks: u32,
}

/// The server-wide boss encounter: a singleton document.
///
/// `remaining_hp` may go negative transiently while simultaneous final
/// blows land; the store serializes the decrements. `active` flips
/// `false -> true` exactly once per generation (lazy activation) and
/// `true -> false` exactly once (depletion or expiry), both CAS-guarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldBoss {
    /// Which boss instance this is. Incremented on succession.
    pub generation: u32,
    /// Full health pool of this generation.
    pub total_hp: i64,
    /// Health remaining. May dip below zero transiently.
    pub remaining_hp: i64,
    /// Whether the fight is live.
    pub active: bool,
    /// When the fight expires undefeated.
    pub expires_at: DateTime<Utc>,
    /// Per-account damage accumulators, upserted on every attack.
    pub participants: Vec<BossContribution>,
}

impl WorldBoss {
    /// Create a dormant boss instance at full health.
    pub const fn new(generation: u32, total_hp: i64, expires_at: DateTime<Utc>) -> Self {
        Self {
            generation,
            total_hp,
            remaining_hp: total_hp,
            active: false,
            expires_at,
            participants: Vec::new(),
        }
    }

    /// Look up an attacker's contribution entry.
    pub fn contribution(&self, account_id: AccountId) -> Option<&BossContribution> {
        self.participants.iter().find(|c| c.account_id == account_id)
    }

    /// Apply damage from an attacker: decrement the pool and upsert the
    /// attacker's accumulator. Pure in-memory mutation; the caller
    /// commits it through a CAS.
    pub fn record_damage(&mut self, account_id: AccountId, damage: i64) {
        self.remaining_hp = self.remaining_hp.saturating_sub(damage);
        if let Some(entry) = self
            .participants
            .iter_mut()
            .find(|c| c.account_id == account_id)
        {
            entry.damage = entry.damage.saturating_add(damage);
            entry.attacks = entry.attacks.saturating_add(1);
        } else {
            self.participants.push(BossContribution {
                account_id,
                damage,
                attacks: 1,
            });
        }
    }

    /// Total damage dealt by all participants.
    pub fn total_damage(&self) -> i64 {
        self.participants
            .iter()
            .fold(0_i64, |acc, c| acc.saturating_add(c.damage))
    }
}

// ---------------------------------------------------------------------------
// Hireling pool
// ---------------------------------------------------------------------------

/// The public pool of unemployed hirelings: a singleton document.
///
/// Termination releases a closed account's hirelings here; recruitment
/// claims them back out. Both sides are CAS-guarded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HirelingPool {
    /// Hirelings awaiting a new employer.
    pub idle: Vec<Hireling>,
}

// ---------------------------------------------------------------------------
// Audit history
// ---------------------------------------------------------------------------

/// An immutable audit history record.
///
/// Append-only once written. Queried with timestamp range scans (duel
/// cooldown windows, bankruptcy history); never used for coordination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique record identifier.
    pub id: AuditEventId,
    /// The category of event.
    pub kind: AuditKind,
    /// The primary account involved, if any.
    pub account_id: Option<AccountId>,
    /// Kind-specific payload serialized as JSON.
    pub details: serde_json::Value,
    /// When the event was recorded.
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    /// Create a record stamped at `now`.
    pub fn new(
        kind: AuditKind,
        account_id: Option<AccountId>,
        details: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AuditEventId::new(),
            kind,
            account_id,
            details,
            created_at: now,
        }
    }
}
