//! # CampaignRepository
//!
//! キャンペーンと配信集計の永続化を担当するリポジトリ。
//!
//! 集計の加算は [`CampaignRepository::increment_stats`] の 1 文で行う。
//! `sent + failed <= total` を `WHERE` 句で検査するため、並行に呼ばれても不変条件は壊れない。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use renthub_domain::{
    campaign::{Campaign, CampaignId, CampaignStats},
    recipient::UserId,
};
use sqlx::PgPool;
use uuid::Uuid;

use super::{parse_column, to_i32, to_u32};
use crate::error::InfraError;

/// キャンペーンリポジトリトレイト
#[async_trait]
pub trait CampaignRepository: Send + Sync {
    async fn insert(&self, campaign: &Campaign) -> Result<(), InfraError>;

    async fn find_by_id(&self, id: &CampaignId) -> Result<Option<Campaign>, InfraError>;

    /// 作成日時の新しい順に取得する
    async fn find_recent(&self, limit: u32) -> Result<Vec<Campaign>, InfraError>;

    /// 送信中のキャンペーンの集計に原子的に加算し、加算後の集計を返す
    ///
    /// 総数を超える加算、または送信中でないキャンペーンへの加算は `Conflict` を返す。
    async fn increment_stats(
        &self,
        id: &CampaignId,
        sent: u32,
        failed: u32,
    ) -> Result<CampaignStats, InfraError>;

    /// 状態・送信完了日時・集計を保存する
    ///
    /// 集計は `campaign` が保持する値で上書きする。途中のバッチで加算に失敗していても、
    /// 終端状態の行は `sent + failed = total` になる。
    async fn update_status(&self, campaign: &Campaign) -> Result<(), InfraError>;
}

#[derive(Debug, sqlx::FromRow)]
struct CampaignRow {
    id:               Uuid,
    name:             String,
    campaign_type:    String,
    subject:          String,
    status:           String,
    target_audience:  Option<String>,
    total_recipients: i32,
    emails_sent:      i32,
    emails_failed:    i32,
    created_by:       Option<Uuid>,
    created_at:       DateTime<Utc>,
    sent_at:          Option<DateTime<Utc>>,
}

impl TryFrom<CampaignRow> for Campaign {
    type Error = InfraError;

    fn try_from(row: CampaignRow) -> Result<Self, Self::Error> {
        Ok(Campaign::from_db(
            CampaignId::from_uuid(row.id),
            row.name,
            parse_column("campaign_type", &row.campaign_type)?,
            row.subject,
            parse_column("status", &row.status)?,
            row.target_audience,
            CampaignStats {
                total_recipients: to_u32("total_recipients", row.total_recipients)?,
                emails_sent:      to_u32("emails_sent", row.emails_sent)?,
                emails_failed:    to_u32("emails_failed", row.emails_failed)?,
            },
            row.created_by.map(UserId::from_uuid),
            row.created_at,
            row.sent_at,
        ))
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT
        id, name, campaign_type, subject, status, target_audience,
        total_recipients, emails_sent, emails_failed,
        created_by, created_at, sent_at
    FROM campaigns
"#;

/// PostgreSQL 実装の CampaignRepository
#[derive(Debug, Clone)]
pub struct PostgresCampaignRepository {
    pool: PgPool,
}

impl PostgresCampaignRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CampaignRepository for PostgresCampaignRepository {
    #[tracing::instrument(skip_all, level = "debug", fields(campaign_id = %campaign.id()))]
    async fn insert(&self, campaign: &Campaign) -> Result<(), InfraError> {
        let stats = campaign.stats();
        sqlx::query(
            r#"
            INSERT INTO campaigns (
                id, name, campaign_type, subject, status, target_audience,
                total_recipients, emails_sent, emails_failed,
                created_by, created_at, sent_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(campaign.id().as_uuid())
        .bind(campaign.name())
        .bind(campaign.campaign_type().to_string())
        .bind(campaign.subject())
        .bind(campaign.status().to_string())
        .bind(campaign.target_audience())
        .bind(to_i32("total_recipients", stats.total_recipients)?)
        .bind(to_i32("emails_sent", stats.emails_sent)?)
        .bind(to_i32("emails_failed", stats.emails_failed)?)
        .bind(campaign.created_by().map(UserId::as_uuid))
        .bind(campaign.created_at())
        .bind(campaign.sent_at())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip_all, level = "debug", fields(campaign_id = %id))]
    async fn find_by_id(&self, id: &CampaignId) -> Result<Option<Campaign>, InfraError> {
        let row: Option<CampaignRow> = sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Campaign::try_from).transpose()
    }

    #[tracing::instrument(skip_all, level = "debug")]
    async fn find_recent(&self, limit: u32) -> Result<Vec<Campaign>, InfraError> {
        let rows: Vec<CampaignRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} ORDER BY created_at DESC, id DESC LIMIT $1"
        ))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Campaign::try_from).collect()
    }

    #[tracing::instrument(skip_all, level = "debug", fields(campaign_id = %id, sent = sent, failed = failed))]
    async fn increment_stats(
        &self,
        id: &CampaignId,
        sent: u32,
        failed: u32,
    ) -> Result<CampaignStats, InfraError> {
        let row: Option<(i32, i32, i32)> = sqlx::query_as(
            r#"
            UPDATE campaigns
            SET emails_sent = emails_sent + $2,
                emails_failed = emails_failed + $3
            WHERE id = $1
              AND status = 'sending'
              AND emails_sent + emails_failed + $2 + $3 <= total_recipients
            RETURNING total_recipients, emails_sent, emails_failed
            "#,
        )
        .bind(id.as_uuid())
        .bind(to_i32("emails_sent", sent)?)
        .bind(to_i32("emails_failed", failed)?)
        .fetch_optional(&self.pool)
        .await?;

        let Some((total, emails_sent, emails_failed)) = row else {
            return Err(InfraError::conflict("Campaign", id.to_string()));
        };

        Ok(CampaignStats {
            total_recipients: to_u32("total_recipients", total)?,
            emails_sent:      to_u32("emails_sent", emails_sent)?,
            emails_failed:    to_u32("emails_failed", emails_failed)?,
        })
    }

    #[tracing::instrument(skip_all, level = "debug", fields(campaign_id = %campaign.id()))]
    async fn update_status(&self, campaign: &Campaign) -> Result<(), InfraError> {
        let stats = campaign.stats();
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET status = $2,
                sent_at = $3,
                emails_sent = $4,
                emails_failed = $5
            WHERE id = $1
              AND $4 + $5 <= total_recipients
            "#,
        )
        .bind(campaign.id().as_uuid())
        .bind(campaign.status().to_string())
        .bind(campaign.sent_at())
        .bind(to_i32("emails_sent", stats.emails_sent)?)
        .bind(to_i32("emails_failed", stats.emails_failed)?)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(InfraError::conflict("Campaign", campaign.id().to_string()));
        }
        Ok(())
    }
}
