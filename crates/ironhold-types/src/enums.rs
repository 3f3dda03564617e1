//! Enumeration types shared across the Ironhold workspace.

use serde::{Deserialize, Serialize};

/// The kind of a dispatched venture.
///
/// Missions are short single-hireling jobs; expeditions are long
/// multi-hireling undertakings. An account holds at most one active
/// venture of each kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VentureKind {
    /// Short job for a single hireling.
    Mission,
    /// Long undertaking for a party of hirelings.
    Expedition,
}

impl VentureKind {
    /// Stable lowercase name, used in log fields and audit details.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mission => "mission",
            Self::Expedition => "expedition",
        }
    }
}

/// What a hireling is currently occupied with.
///
/// A hireling holds at most one activity at a time; the engine enforces
/// this by requiring the activity field be `None` as a CAS precondition
/// when starting new work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    /// Dispatched on a mission.
    Mission,
    /// Away on an expedition.
    Expedition,
    /// Recovering condition in training.
    Training,
}

impl From<VentureKind> for ActivityKind {
    fn from(kind: VentureKind) -> Self {
        match kind {
            VentureKind::Mission => Self::Mission,
            VentureKind::Expedition => Self::Expedition,
        }
    }
}

/// Why an account was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationCause {
    /// Sustained rent default past the missed-cycle limit.
    Bankruptcy,
    /// Killed by the world boss while attacking it.
    BossBacklash,
    /// A venture ended in a mishap the account does not survive.
    FatalMishap,
}

/// Category of an audit history record.
///
/// Audit records are immutable once written and are queried with
/// timestamp range scans (cooldown windows); they are never used for
/// coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// A duel between two accounts, recorded by the combat front-end.
    Duel,
    /// Account terminated for sustained rent default.
    Bankruptcy,
    /// The world boss was brought down.
    BossFelled,
    /// Account terminated by the world boss.
    BossBacklash,
    /// Account terminated by a fatal venture mishap.
    FatalMishap,
    /// A hireling died on a venture.
    HirelingLost,
}

impl AuditKind {
    /// Stable database string for this kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Duel => "duel",
            Self::Bankruptcy => "bankruptcy",
            Self::BossFelled => "boss_felled",
            Self::BossBacklash => "boss_backlash",
            Self::FatalMishap => "fatal_mishap",
            Self::HirelingLost => "hireling_lost",
        }
    }

    /// Parse a database string back into a kind.
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "duel" => Some(Self::Duel),
            "bankruptcy" => Some(Self::Bankruptcy),
            "boss_felled" => Some(Self::BossFelled),
            "boss_backlash" => Some(Self::BossBacklash),
            "fatal_mishap" => Some(Self::FatalMishap),
            "hireling_lost" => Some(Self::HirelingLost),
            _ => None,
        }
    }
}

impl From<TerminationCause> for AuditKind {
    fn from(cause: TerminationCause) -> Self {
        match cause {
            TerminationCause::Bankruptcy => Self::Bankruptcy,
            TerminationCause::BossBacklash => Self::BossBacklash,
            TerminationCause::FatalMishap => Self::FatalMishap,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_kind_db_roundtrip() {
        let kinds = [
            AuditKind::Duel,
            AuditKind::Bankruptcy,
            AuditKind::BossFelled,
            AuditKind::BossBacklash,
            AuditKind::FatalMishap,
            AuditKind::HirelingLost,
        ];
        for kind in kinds {
            assert_eq!(AuditKind::from_db(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn unknown_db_string_is_none() {
        assert_eq!(AuditKind::from_db("tea_party"), None);
    }

    #[test]
    fn termination_cause_maps_to_audit_kind() {
        assert_eq!(
            AuditKind::from(TerminationCause::Bankruptcy),
            AuditKind::Bankruptcy
        );
        assert_eq!(
            AuditKind::from(TerminationCause::BossBacklash),
            AuditKind::BossBacklash
        );
    }
}
