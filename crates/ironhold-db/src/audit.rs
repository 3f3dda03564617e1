//! The `AuditLog` port and its backends.
//!
//! Audit records are append-only and immutable once written. The engine
//! writes them *before* destructive changes (so history survives partial
//! teardown) and front-ends query them with timestamp range scans --
//! duel cooldown windows, bankruptcy history. Nothing coordinates
//! through this log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ironhold_types::{AccountId, AuditEvent, AuditEventId, AuditKind};
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;

/// The append-only audit history port.
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Append one record. Records are never updated or deleted.
    async fn append(&self, event: &AuditEvent) -> Result<(), StoreError>;

    /// All records of `kind` for `account_id` at or after `since`,
    /// oldest first.
    async fn events_since(
        &self,
        account_id: AccountId,
        kind: AuditKind,
        since: DateTime<Utc>,
    ) -> Result<Vec<AuditEvent>, StoreError>;

    /// Number of records of `kind` for `account_id` at or after `since`.
    async fn count_since(
        &self,
        account_id: AccountId,
        kind: AuditKind,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError>;
}

// ---------------------------------------------------------------------------
// PostgreSQL backend
// ---------------------------------------------------------------------------

/// `PostgreSQL`-backed audit history (the `audit_events` table).
#[derive(Clone)]
pub struct PostgresAuditLog {
    pool: PgPool,
}

impl PostgresAuditLog {
    /// Create a log bound to a connection pool.
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// A row from the `audit_events` table.
#[derive(Debug, sqlx::FromRow)]
struct AuditRow {
    id: Uuid,
    kind: String,
    account_id: Option<Uuid>,
    details: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<AuditRow> for AuditEvent {
    type Error = StoreError;

    fn try_from(row: AuditRow) -> Result<Self, StoreError> {
        let kind = AuditKind::from_db(&row.kind).ok_or_else(|| StoreError::Decode {
            context: format!("unknown audit kind: {}", row.kind),
        })?;
        Ok(Self {
            id: AuditEventId::from(row.id),
            kind,
            account_id: row.account_id.map(AccountId::from),
            details: row.details,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl AuditLog for PostgresAuditLog {
    async fn append(&self, event: &AuditEvent) -> Result<(), StoreError> {
        sqlx::query(
            r"INSERT INTO audit_events (id, kind, account_id, details, created_at)
              VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(event.id.into_inner())
        .bind(event.kind.as_str())
        .bind(event.account_id.map(AccountId::into_inner))
        .bind(&event.details)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;

        tracing::debug!(kind = event.kind.as_str(), "Appended audit record");
        Ok(())
    }

    async fn events_since(
        &self,
        account_id: AccountId,
        kind: AuditKind,
        since: DateTime<Utc>,
    ) -> Result<Vec<AuditEvent>, StoreError> {
        let rows = sqlx::query_as::<_, AuditRow>(
            r"SELECT id, kind, account_id, details, created_at
              FROM audit_events
              WHERE account_id = $1 AND kind = $2 AND created_at >= $3
              ORDER BY created_at",
        )
        .bind(account_id.into_inner())
        .bind(kind.as_str())
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AuditEvent::try_from).collect()
    }

    async fn count_since(
        &self,
        account_id: AccountId,
        kind: AuditKind,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            r"SELECT COUNT(*)
              FROM audit_events
              WHERE account_id = $1 AND kind = $2 AND created_at >= $3",
        )
        .bind(account_id.into_inner())
        .bind(kind.as_str())
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(u64::try_from(count).unwrap_or(0))
    }
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

/// In-process audit history for tests and embedded runs.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    events: RwLock<Vec<AuditEvent>>,
}

impl MemoryAuditLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// All records appended so far, in order. Test convenience.
    pub async fn all(&self) -> Vec<AuditEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn append(&self, event: &AuditEvent) -> Result<(), StoreError> {
        self.events.write().await.push(event.clone());
        Ok(())
    }

    async fn events_since(
        &self,
        account_id: AccountId,
        kind: AuditKind,
        since: DateTime<Utc>,
    ) -> Result<Vec<AuditEvent>, StoreError> {
        Ok(self
            .events
            .read()
            .await
            .iter()
            .filter(|e| {
                e.account_id == Some(account_id) && e.kind == kind && e.created_at >= since
            })
            .cloned()
            .collect())
    }

    async fn count_since(
        &self,
        account_id: AccountId,
        kind: AuditKind,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let events = self.events_since(account_id, kind, since).await?;
        Ok(u64::try_from(events.len()).unwrap_or(u64::MAX))
    }
}
