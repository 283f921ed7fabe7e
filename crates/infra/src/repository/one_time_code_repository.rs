//! # OneTimeCodeRepository
//!
//! ワンタイムコードの永続化を担当するリポジトリ。
//!
//! - **差し替え**: 発行時は同じ identity の未使用コードを削除してから挿入する（1 トランザクション）
//! - **条件付き更新**: 検証済み・使用済みへの更新は前提条件を `WHERE` に含め、
//!   並行した 2 回目の更新を `false` として検出する

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use renthub_domain::{
    otp::{OneTimeCode, OneTimeCodeId, OtpCode},
    recipient::Email,
};
use sqlx::PgPool;
use uuid::Uuid;

use super::parse_column;
use crate::error::InfraError;

/// ワンタイムコードリポジトリトレイト
#[async_trait]
pub trait OneTimeCodeRepository: Send + Sync {
    /// 同じ identity の未使用コードを削除して新しいコードを保存する
    ///
    /// 戻り値は削除した古いコードの件数。
    async fn replace(&self, code: &OneTimeCode) -> Result<u64, InfraError>;

    /// identity の最新の未使用コードを取得する（期限切れを含む）
    async fn find_latest_unconsumed(
        &self,
        identity: &Email,
    ) -> Result<Option<OneTimeCode>, InfraError>;

    /// 未検証・未使用・期限内のコードを検証済みにする
    ///
    /// 前提を満たさず更新しなかった場合は `false`。
    async fn mark_verified(
        &self,
        id: &OneTimeCodeId,
        now: DateTime<Utc>,
    ) -> Result<bool, InfraError>;

    /// 検証済み・未使用・期限内のコードを使用済みにする
    ///
    /// 前提を満たさず更新しなかった場合は `false`。
    async fn mark_consumed(
        &self,
        id: &OneTimeCodeId,
        now: DateTime<Utc>,
    ) -> Result<bool, InfraError>;

    /// 期限切れ・使用済みのコードを削除し、削除件数を返す
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, InfraError>;
}

#[derive(Debug, sqlx::FromRow)]
struct OneTimeCodeRow {
    id:         Uuid,
    identity:   String,
    code:       String,
    role:       String,
    expires_at: DateTime<Utc>,
    verified:   bool,
    consumed:   bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<OneTimeCodeRow> for OneTimeCode {
    type Error = InfraError;

    fn try_from(row: OneTimeCodeRow) -> Result<Self, Self::Error> {
        let corrupt = |e: renthub_domain::DomainError| InfraError::corrupt_data(e.to_string());
        Ok(OneTimeCode::from_db(
            OneTimeCodeId::from_uuid(row.id),
            Email::new(row.identity).map_err(corrupt)?,
            OtpCode::new(row.code).map_err(corrupt)?,
            parse_column("role", &row.role)?,
            row.expires_at,
            row.verified,
            row.consumed,
            row.created_at,
        ))
    }
}

/// PostgreSQL 実装の OneTimeCodeRepository
#[derive(Debug, Clone)]
pub struct PostgresOneTimeCodeRepository {
    pool: PgPool,
}

impl PostgresOneTimeCodeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OneTimeCodeRepository for PostgresOneTimeCodeRepository {
    #[tracing::instrument(skip_all, level = "debug", fields(code_id = %code.id()))]
    async fn replace(&self, code: &OneTimeCode) -> Result<u64, InfraError> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query("DELETE FROM one_time_codes WHERE identity = $1 AND NOT consumed")
            .bind(code.identity().as_str())
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query(
            r#"
            INSERT INTO one_time_codes (
                id, identity, code, role, expires_at, verified, consumed, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(code.id().as_uuid())
        .bind(code.identity().as_str())
        .bind(code.code().as_str())
        .bind(code.role().to_string())
        .bind(code.expires_at())
        .bind(code.is_verified())
        .bind(code.is_consumed())
        .bind(code.created_at())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(deleted)
    }

    #[tracing::instrument(skip_all, level = "debug")]
    async fn find_latest_unconsumed(
        &self,
        identity: &Email,
    ) -> Result<Option<OneTimeCode>, InfraError> {
        let row: Option<OneTimeCodeRow> = sqlx::query_as(
            r#"
            SELECT id, identity, code, role, expires_at, verified, consumed, created_at
            FROM one_time_codes
            WHERE identity = $1 AND NOT consumed
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(identity.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(OneTimeCode::try_from).transpose()
    }

    #[tracing::instrument(skip_all, level = "debug", fields(code_id = %id))]
    async fn mark_verified(
        &self,
        id: &OneTimeCodeId,
        now: DateTime<Utc>,
    ) -> Result<bool, InfraError> {
        let result = sqlx::query(
            r#"
            UPDATE one_time_codes
            SET verified = TRUE
            WHERE id = $1 AND NOT verified AND NOT consumed AND expires_at > $2
            "#,
        )
        .bind(id.as_uuid())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip_all, level = "debug", fields(code_id = %id))]
    async fn mark_consumed(
        &self,
        id: &OneTimeCodeId,
        now: DateTime<Utc>,
    ) -> Result<bool, InfraError> {
        let result = sqlx::query(
            r#"
            UPDATE one_time_codes
            SET consumed = TRUE
            WHERE id = $1 AND verified AND NOT consumed AND expires_at > $2
            "#,
        )
        .bind(id.as_uuid())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip_all, level = "debug")]
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, InfraError> {
        let result = sqlx::query("DELETE FROM one_time_codes WHERE expires_at <= $1 OR consumed")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use renthub_domain::rate_limit::Role;

    use super::*;

    #[test]
    fn トレイトはsendとsyncを実装している() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PostgresOneTimeCodeRepository>();
    }

    #[test]
    fn test_行からワンタイムコードを復元できる() {
        let now = Utc::now();
        let row = OneTimeCodeRow {
            id:         Uuid::now_v7(),
            identity:   "admin@example.com".to_string(),
            code:       "042917".to_string(),
            role:       "admin".to_string(),
            expires_at: now,
            verified:   true,
            consumed:   false,
            created_at: now,
        };

        let code = OneTimeCode::try_from(row).unwrap();

        assert_eq!(code.role(), Role::Admin);
        assert!(code.is_verified());
        assert!(code.code().matches("042917"));
    }
}
