//! # DeliveryRecordRepository
//!
//! 配信記録（監査証跡）の永続化を担当するリポジトリ。
//!
//! - **追記のみ**: 記録は挿入後に更新しない
//! - **一括削除**: 保持期間を過ぎた記録だけを `created_at` で削除する。
//!   下限日数の検証はドメイン層（`retention_cutoff`）で済ませてから呼ぶ

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use renthub_domain::{
    campaign::CampaignId,
    delivery::{DeliveryCount, DeliveryRecord, DeliveryRecordId},
    recipient::UserId,
};
use sqlx::PgPool;
use uuid::Uuid;

use super::{parse_column, to_i32, to_u32};
use crate::error::InfraError;

/// 配信記録リポジトリトレイト
#[async_trait]
pub trait DeliveryRecordRepository: Send + Sync {
    async fn insert(&self, record: &DeliveryRecord) -> Result<(), InfraError>;

    /// キャンペーンに属する配信記録を作成順に取得する
    async fn find_by_campaign(
        &self,
        campaign_id: &CampaignId,
    ) -> Result<Vec<DeliveryRecord>, InfraError>;

    /// 期間内の件数をメール種別・結果ごとに集計する（`since <= created_at < until`）
    async fn count_by_type_and_status(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<DeliveryCount>, InfraError>;

    /// `cutoff` より前に作成された記録を削除し、削除件数を返す
    async fn delete_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64, InfraError>;
}

#[derive(Debug, sqlx::FromRow)]
struct DeliveryRecordRow {
    id:                Uuid,
    recipient_email:   String,
    recipient_name:    Option<String>,
    recipient_user_id: Option<Uuid>,
    subject:           String,
    email_type:        String,
    template_name:     String,
    status:            String,
    error_message:     Option<String>,
    campaign_id:       Option<Uuid>,
    triggered_by:      Option<Uuid>,
    attempts:          i32,
    created_at:        DateTime<Utc>,
}

impl TryFrom<DeliveryRecordRow> for DeliveryRecord {
    type Error = InfraError;

    fn try_from(row: DeliveryRecordRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id:                DeliveryRecordId::from_uuid(row.id),
            recipient_email:   row.recipient_email,
            recipient_name:    row.recipient_name,
            recipient_user_id: row.recipient_user_id.map(UserId::from_uuid),
            subject:           row.subject,
            email_type:        parse_column("email_type", &row.email_type)?,
            template_name:     row.template_name,
            status:            parse_column("status", &row.status)?,
            error_message:     row.error_message,
            campaign_id:       row.campaign_id.map(CampaignId::from_uuid),
            triggered_by:      row.triggered_by.map(UserId::from_uuid),
            attempts:          to_u32("attempts", row.attempts)?,
            created_at:        row.created_at,
        })
    }
}

/// PostgreSQL 実装の DeliveryRecordRepository
#[derive(Debug, Clone)]
pub struct PostgresDeliveryRecordRepository {
    pool: PgPool,
}

impl PostgresDeliveryRecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeliveryRecordRepository for PostgresDeliveryRecordRepository {
    #[tracing::instrument(skip_all, level = "debug", fields(record_id = %record.id))]
    async fn insert(&self, record: &DeliveryRecord) -> Result<(), InfraError> {
        sqlx::query(
            r#"
            INSERT INTO delivery_records (
                id, recipient_email, recipient_name, recipient_user_id,
                subject, email_type, template_name, status, error_message,
                campaign_id, triggered_by, attempts, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(&record.recipient_email)
        .bind(&record.recipient_name)
        .bind(record.recipient_user_id.as_ref().map(UserId::as_uuid))
        .bind(&record.subject)
        .bind(record.email_type.to_string())
        .bind(&record.template_name)
        .bind(record.status.to_string())
        .bind(&record.error_message)
        .bind(record.campaign_id.as_ref().map(CampaignId::as_uuid))
        .bind(record.triggered_by.as_ref().map(UserId::as_uuid))
        .bind(to_i32("attempts", record.attempts)?)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip_all, level = "debug", fields(campaign_id = %campaign_id))]
    async fn find_by_campaign(
        &self,
        campaign_id: &CampaignId,
    ) -> Result<Vec<DeliveryRecord>, InfraError> {
        let rows: Vec<DeliveryRecordRow> = sqlx::query_as(
            r#"
            SELECT
                id, recipient_email, recipient_name, recipient_user_id,
                subject, email_type, template_name, status, error_message,
                campaign_id, triggered_by, attempts, created_at
            FROM delivery_records
            WHERE campaign_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(campaign_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DeliveryRecord::try_from).collect()
    }

    #[tracing::instrument(skip_all, level = "debug")]
    async fn count_by_type_and_status(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<DeliveryCount>, InfraError> {
        let rows: Vec<(String, String, i64)> = sqlx::query_as(
            r#"
            SELECT email_type, status, COUNT(*)
            FROM delivery_records
            WHERE created_at >= $1 AND created_at < $2
            GROUP BY email_type, status
            ORDER BY email_type, status
            "#,
        )
        .bind(since)
        .bind(until)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(email_type, status, count)| {
                Ok(DeliveryCount {
                    email_type: parse_column("email_type", &email_type)?,
                    status:     parse_column("status", &status)?,
                    count:      u64::try_from(count).unwrap_or(0),
                })
            })
            .collect()
    }

    #[tracing::instrument(skip_all, level = "debug", fields(cutoff = %cutoff))]
    async fn delete_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64, InfraError> {
        let result = sqlx::query("DELETE FROM delivery_records WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
