//! Document key patterns.
//!
//! | Pattern | Type | Description |
//! |---------|------|-------------|
//! | `account:{id}` | JSON | Full account document |
//! | `boss:current` | JSON | The singleton world-boss encounter |
//! | `pool:hirelings` | JSON | The singleton public hireling pool |

use ironhold_types::AccountId;

/// Key of the singleton world-boss document.
pub const BOSS: &str = "boss:current";

/// Key of the singleton public hireling pool.
pub const HIRELING_POOL: &str = "pool:hirelings";

/// Key of an account document.
pub fn account(id: AccountId) -> String {
    format!("account:{id}")
}
