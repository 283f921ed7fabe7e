//! # AuditEventRepository
//!
//! 監査イベントの永続化を担当するリポジトリ。
//!
//! 追記専用。レート制限は [`AuditEventRepository::count_since`] で直近の件数を数え、
//! 履歴表示は [`AuditEventRepository::find_by_identity`] で新しい順に読む。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use renthub_domain::{
    audit_event::{AuditAction, AuditEvent},
    rate_limit::Role,
    recipient::Email,
};
use sqlx::PgPool;
use uuid::Uuid;

use super::parse_column;
use crate::error::InfraError;

/// 監査イベントリポジトリトレイト
#[async_trait]
pub trait AuditEventRepository: Send + Sync {
    async fn insert(&self, event: &AuditEvent) -> Result<(), InfraError>;

    /// `since` より後に記録された `(identity, action, role)` のイベント数
    async fn count_since(
        &self,
        identity: &Email,
        action: AuditAction,
        role: Role,
        since: DateTime<Utc>,
    ) -> Result<u32, InfraError>;

    /// identity のイベントを新しい順に最大 `limit` 件取得する
    async fn find_by_identity(
        &self,
        identity: &Email,
        limit: u32,
    ) -> Result<Vec<AuditEvent>, InfraError>;
}

#[derive(Debug, sqlx::FromRow)]
struct AuditEventRow {
    id:         Uuid,
    identity:   String,
    action:     String,
    role:       String,
    detail:     Option<serde_json::Value>,
    created_at: DateTime<Utc>,
}

impl TryFrom<AuditEventRow> for AuditEvent {
    type Error = InfraError;

    fn try_from(row: AuditEventRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id:         row.id,
            identity:   Email::new(row.identity).map_err(|e| InfraError::corrupt_data(e.to_string()))?,
            action:     parse_column("action", &row.action)?,
            role:       parse_column("role", &row.role)?,
            detail:     row.detail,
            created_at: row.created_at,
        })
    }
}

/// PostgreSQL 実装の AuditEventRepository
#[derive(Debug, Clone)]
pub struct PostgresAuditEventRepository {
    pool: PgPool,
}

impl PostgresAuditEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditEventRepository for PostgresAuditEventRepository {
    #[tracing::instrument(skip_all, level = "debug", fields(action = %event.action))]
    async fn insert(&self, event: &AuditEvent) -> Result<(), InfraError> {
        sqlx::query(
            r#"
            INSERT INTO audit_events (id, identity, action, role, detail, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.id)
        .bind(event.identity.as_str())
        .bind(event.action.to_string())
        .bind(event.role.to_string())
        .bind(&event.detail)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip_all, level = "debug", fields(action = %action, role = %role))]
    async fn count_since(
        &self,
        identity: &Email,
        action: AuditAction,
        role: Role,
        since: DateTime<Utc>,
    ) -> Result<u32, InfraError> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM audit_events
            WHERE identity = $1 AND action = $2 AND role = $3 AND created_at > $4
            "#,
        )
        .bind(identity.as_str())
        .bind(action.to_string())
        .bind(role.to_string())
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    #[tracing::instrument(skip_all, level = "debug")]
    async fn find_by_identity(
        &self,
        identity: &Email,
        limit: u32,
    ) -> Result<Vec<AuditEvent>, InfraError> {
        let rows: Vec<AuditEventRow> = sqlx::query_as(
            r#"
            SELECT id, identity, action, role, detail, created_at
            FROM audit_events
            WHERE identity = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(identity.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AuditEvent::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn トレイトはsendとsyncを実装している() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PostgresAuditEventRepository>();
    }

    #[test]
    fn test_行から監査イベントを復元できる() {
        let row = AuditEventRow {
            id:         Uuid::now_v7(),
            identity:   "owner@example.com".to_string(),
            action:     "otp.issue".to_string(),
            role:       "owner".to_string(),
            detail:     Some(serde_json::json!({ "resend": true })),
            created_at: Utc::now(),
        };

        let event = AuditEvent::try_from(row).unwrap();

        assert_eq!(event.action, AuditAction::OtpIssue);
        assert_eq!(event.role, Role::Owner);
    }
}
