//! Collaborator ports for game content the engine does not own.
//!
//! Combat arithmetic, dice odds, and reward tables are content, not
//! coordination; they live in the front-ends that embed the engine. The
//! engine only requires that they be **pure**: the resolution protocols
//! compute every effect through these ports first, without touching the
//! store, and commit the results through a single CAS afterwards. A
//! re-rolled retry must therefore be acceptable to implementations
//! (under optimistic retry a roll may be recomputed against a fresher
//! snapshot).

use ironhold_types::{BossContribution, Hireling, HirelingId, Venture};

/// The computed outcome of a venture, before anything touches the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VentureRoll {
    /// Whether the venture succeeded.
    pub success: bool,
    /// Condition lost by each surviving party member.
    pub condition_loss: u8,
    /// Party members that did not come back.
    pub casualties: Vec<HirelingId>,
    /// Whether the mishap is one the account does not survive.
    pub fatal: bool,
}

/// Dice-roll collaborator: decides how a due venture went.
pub trait FateRoller: Send + Sync {
    /// Roll the outcome for a due venture. Must be pure with respect to
    /// the store: no side effects, results committed by the caller.
    fn venture_roll(&self, venture: &Venture, party: &[Hireling]) -> VentureRoll;
}

/// Reward-table collaborator: prices outcomes in coins.
pub trait RewardTable: Send + Sync {
    /// Coins granted for a venture that resolved with `roll`.
    /// Return 0 for no payout.
    fn venture_reward(&self, venture: &Venture, roll: &VentureRoll) -> i64;

    /// One participant's slice of the boss bounty.
    ///
    /// `total_damage` is the sum over all participants; implementations
    /// typically pay out proportionally. Return 0 for no share.
    fn boss_share(&self, bounty: i64, contribution: &BossContribution, total_damage: i64) -> i64;
}
