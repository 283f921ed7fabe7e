//! # キャンペーン（一斉配信）
//!
//! ニュースレター・プロモーションなどの一斉配信 1 回分を表すエンティティ。
//!
//! ## 状態遷移
//!
//! ```text
//! draft ──→ sending ──→ sent
//!   │          │
//!   └──────────┴──────→ failed（キャンペーンの作成・開始に失敗した場合のみ）
//! ```
//!
//! 全件の送信が失敗しても、全バッチを処理し終えたキャンペーンは `sent` になる。
//! 結果の良し悪しは [`CampaignStats`] で判断する。
//!
//! ## 集計の不変条件
//!
//! `emails_sent + emails_failed <= total_recipients` を常に満たし、`sent` では等号が成立する。

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

use crate::{DomainError, recipient::UserId};

define_uuid_id! {
    /// キャンペーン ID
    pub struct CampaignId;
}

/// キャンペーン種別
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    IntoStaticStr,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CampaignType {
    Newsletter,
    Promotional,
    Seasonal,
    Retention,
}

/// キャンペーンの状態
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    IntoStaticStr,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CampaignStatus {
    Draft,
    Sending,
    Sent,
    Failed,
}

impl CampaignStatus {
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Draft, Self::Sending)
                | (Self::Sending, Self::Sent)
                | (Self::Draft, Self::Failed)
                | (Self::Sending, Self::Failed)
        )
    }
}

/// バッチ分割の設定
///
/// 1 バッチ内の送信は並行に行い、バッチ間では `inter_batch_delay` だけ待つ。
/// プロバイダのスロットリングを避けるための流量調整。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    batch_size:        usize,
    inter_batch_delay: Duration,
}

impl BatchPlan {
    pub const DEFAULT_BATCH_SIZE: usize = 50;
    pub const DEFAULT_DELAY: Duration = Duration::from_secs(2);
    pub const RETENTION_BATCH_SIZE: usize = 30;
    pub const RETENTION_DELAY: Duration = Duration::from_secs(3);

    pub fn new(batch_size: usize, inter_batch_delay: Duration) -> Result<Self, DomainError> {
        if batch_size == 0 {
            return Err(DomainError::Validation(
                "バッチサイズは 1 以上である必要があります".to_string(),
            ));
        }
        Ok(Self {
            batch_size,
            inter_batch_delay,
        })
    }

    /// キャンペーン種別ごとの既定値
    ///
    /// リテンション施策は休眠ユーザー宛てで到達率が落ちやすいため、小さめのバッチで間隔を空ける。
    pub fn for_campaign_type(campaign_type: CampaignType) -> Self {
        match campaign_type {
            CampaignType::Retention => Self {
                batch_size:        Self::RETENTION_BATCH_SIZE,
                inter_batch_delay: Self::RETENTION_DELAY,
            },
            _ => Self {
                batch_size:        Self::DEFAULT_BATCH_SIZE,
                inter_batch_delay: Self::DEFAULT_DELAY,
            },
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn inter_batch_delay(&self) -> Duration {
        self.inter_batch_delay
    }

    /// `total` 件を処理するのに必要なバッチ数
    pub fn batch_count(&self, total: usize) -> usize {
        total.div_ceil(self.batch_size)
    }
}

/// キャンペーン集計
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CampaignStats {
    pub total_recipients: u32,
    pub emails_sent:      u32,
    pub emails_failed:    u32,
}

impl CampaignStats {
    pub fn new(total_recipients: u32) -> Self {
        Self {
            total_recipients,
            emails_sent: 0,
            emails_failed: 0,
        }
    }

    pub fn processed(&self) -> u32 {
        self.emails_sent + self.emails_failed
    }

    pub fn is_complete(&self) -> bool {
        self.processed() == self.total_recipients
    }

    /// バッチ 1 回分の結果を加算する
    ///
    /// 加算後に総数を超える場合は何も変更せず `Conflict` を返す。
    pub fn record(&mut self, sent: u32, failed: u32) -> Result<(), DomainError> {
        let processed = u64::from(self.processed()) + u64::from(sent) + u64::from(failed);
        if processed > u64::from(self.total_recipients) {
            return Err(DomainError::Conflict(format!(
                "集計が宛先総数を超えます: {processed} > {}",
                self.total_recipients
            )));
        }
        self.emails_sent += sent;
        self.emails_failed += failed;
        Ok(())
    }
}

/// キャンペーン作成パラメータ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCampaign {
    pub id:              CampaignId,
    pub name:            String,
    pub campaign_type:   CampaignType,
    pub subject:         String,
    pub target_audience: Option<String>,
    pub created_by:      Option<UserId>,
}

/// キャンペーン エンティティ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Campaign {
    id:              CampaignId,
    name:            String,
    campaign_type:   CampaignType,
    subject:         String,
    status:          CampaignStatus,
    target_audience: Option<String>,
    stats:           CampaignStats,
    created_by:      Option<UserId>,
    created_at:      DateTime<Utc>,
    sent_at:         Option<DateTime<Utc>>,
}

impl Campaign {
    /// 下書き状態のキャンペーンを作成する
    pub fn new(params: NewCampaign, now: DateTime<Utc>) -> Result<Self, DomainError> {
        if params.name.trim().is_empty() {
            return Err(DomainError::Validation(
                "キャンペーン名は必須です".to_string(),
            ));
        }
        if params.subject.trim().is_empty() {
            return Err(DomainError::Validation(
                "キャンペーンの件名は必須です".to_string(),
            ));
        }
        Ok(Self {
            id: params.id,
            name: params.name,
            campaign_type: params.campaign_type,
            subject: params.subject,
            status: CampaignStatus::Draft,
            target_audience: params.target_audience,
            stats: CampaignStats::default(),
            created_by: params.created_by,
            created_at: now,
            sent_at: None,
        })
    }

    /// データベースから復元する
    #[allow(clippy::too_many_arguments)]
    pub fn from_db(
        id: CampaignId,
        name: String,
        campaign_type: CampaignType,
        subject: String,
        status: CampaignStatus,
        target_audience: Option<String>,
        stats: CampaignStats,
        created_by: Option<UserId>,
        created_at: DateTime<Utc>,
        sent_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            name,
            campaign_type,
            subject,
            status,
            target_audience,
            stats,
            created_by,
            created_at,
            sent_at,
        }
    }

    /// 宛先総数を確定して送信中にする
    pub fn start_sending(mut self, total_recipients: u32) -> Result<Self, DomainError> {
        self.transition(CampaignStatus::Sending)?;
        self.stats = CampaignStats::new(total_recipients);
        Ok(self)
    }

    /// バッチ 1 回分の結果を反映する
    pub fn record_batch(&mut self, sent: u32, failed: u32) -> Result<(), DomainError> {
        if self.status != CampaignStatus::Sending {
            return Err(DomainError::InvalidTransition {
                entity: "Campaign",
                from:   self.status.to_string(),
                to:     "record_batch".to_string(),
            });
        }
        self.stats.record(sent, failed)
    }

    /// 全バッチの処理を終えて送信済みにする
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        if !self.stats.is_complete() {
            return Err(DomainError::Conflict(format!(
                "未処理の宛先が残っています: {}/{}",
                self.stats.processed(),
                self.stats.total_recipients
            )));
        }
        self.transition(CampaignStatus::Sent)?;
        self.sent_at = Some(now);
        Ok(())
    }

    pub fn fail(&mut self) -> Result<(), DomainError> {
        self.transition(CampaignStatus::Failed)
    }

    fn transition(&mut self, next: CampaignStatus) -> Result<(), DomainError> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidTransition {
                entity: "Campaign",
                from:   self.status.to_string(),
                to:     next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    // Getter メソッド

    pub fn id(&self) -> &CampaignId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn campaign_type(&self) -> CampaignType {
        self.campaign_type
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn status(&self) -> CampaignStatus {
        self.status
    }

    pub fn target_audience(&self) -> Option<&str> {
        self.target_audience.as_deref()
    }

    pub fn stats(&self) -> CampaignStats {
        self.stats
    }

    pub fn created_by(&self) -> Option<&UserId> {
        self.created_by.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        self.sent_at
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    fn new_campaign(campaign_type: CampaignType) -> Campaign {
        Campaign::new(
            NewCampaign {
                id: CampaignId::new(),
                name: "Summer Stays".to_string(),
                campaign_type,
                subject: "夏の特集".to_string(),
                target_audience: Some("tenants".to_string()),
                created_by: None,
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn test_新規キャンペーンは下書き状態() {
        let campaign = new_campaign(CampaignType::Newsletter);

        assert_eq!(campaign.status(), CampaignStatus::Draft);
        assert_eq!(campaign.stats(), CampaignStats::default());
    }

    #[test]
    fn test_送信開始で総数が確定する() {
        let campaign = new_campaign(CampaignType::Newsletter)
            .start_sending(120)
            .unwrap();

        assert_eq!(campaign.status(), CampaignStatus::Sending);
        assert_eq!(campaign.stats().total_recipients, 120);
    }

    #[test]
    fn test_全件失敗でも送信完了にできる() {
        let mut campaign = new_campaign(CampaignType::Promotional)
            .start_sending(3)
            .unwrap();
        campaign.record_batch(0, 3).unwrap();

        campaign.complete(Utc::now()).unwrap();

        assert_eq!(campaign.status(), CampaignStatus::Sent);
        assert!(campaign.sent_at().is_some());
    }

    #[test]
    fn test_未処理が残っていると完了できない() {
        let mut campaign = new_campaign(CampaignType::Seasonal).start_sending(5).unwrap();
        campaign.record_batch(2, 1).unwrap();

        let result = campaign.complete(Utc::now());

        assert!(matches!(result, Err(DomainError::Conflict(_))));
        assert_eq!(campaign.status(), CampaignStatus::Sending);
    }

    #[test]
    fn test_総数を超える加算は拒否され集計は変わらない() {
        let mut stats = CampaignStats::new(10);
        stats.record(6, 2).unwrap();

        let result = stats.record(2, 1);

        assert!(result.is_err());
        assert_eq!(stats.processed(), 8);
    }

    #[test]
    fn test_送信済みから送信中には戻れない() {
        let mut campaign = new_campaign(CampaignType::Newsletter).start_sending(0).unwrap();
        campaign.complete(Utc::now()).unwrap();

        let result = campaign.fail();

        assert!(matches!(result, Err(DomainError::InvalidTransition { .. })));
    }

    #[rstest]
    #[case(CampaignType::Newsletter, 50, 2)]
    #[case(CampaignType::Promotional, 50, 2)]
    #[case(CampaignType::Seasonal, 50, 2)]
    #[case(CampaignType::Retention, 30, 3)]
    fn test_種別ごとのバッチ既定値(
        #[case] campaign_type: CampaignType,
        #[case] batch_size: usize,
        #[case] delay_secs: u64,
    ) {
        let plan = BatchPlan::for_campaign_type(campaign_type);

        assert_eq!(plan.batch_size(), batch_size);
        assert_eq!(plan.inter_batch_delay(), Duration::from_secs(delay_secs));
    }

    #[rstest]
    #[case(0, 0)]
    #[case(1, 1)]
    #[case(50, 1)]
    #[case(51, 2)]
    #[case(120, 3)]
    fn test_バッチ数の計算(#[case] total: usize, #[case] expected: usize) {
        let plan = BatchPlan::new(50, Duration::ZERO).unwrap();

        assert_eq!(plan.batch_count(total), expected);
    }

    #[test]
    fn test_バッチサイズ0は拒否する() {
        assert!(BatchPlan::new(0, Duration::ZERO).is_err());
    }
}
