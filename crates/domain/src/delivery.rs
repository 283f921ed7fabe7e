//! # メール配信
//!
//! 単発配信の依頼（[`DeliveryRequest`]）、送信メッセージ（[`EmailMessage`]）、
//! 監査用の配信記録（[`DeliveryRecord`]）を定義する。
//!
//! ## 設計方針
//!
//! - **1 送信 1 記録**: 論理的な 1 回の送信は、リトライ回数に関係なく終端で 1 件だけ記録する
//! - **不変**: 配信記録は作成後に更新しない。削除は保持期間を過ぎた一括削除のみ
//! - **失敗は値で返す**: 送信の失敗は [`SendOutcome`] の値として呼び出し元に返す。
//!   `Err` になるのは依頼そのものが不正な場合（[`NotificationError`]）だけ

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::IntoStaticStr;
use thiserror::Error;

use crate::{DomainError, campaign::CampaignId, recipient::UserId};

/// 配信記録を保持しなければならない最短日数
///
/// これより新しい記録を消す保持期間指定は拒否する。
pub const MIN_RETENTION_DAYS: i64 = 30;

define_uuid_id! {
    /// 配信記録 ID
    pub struct DeliveryRecordId;
}

/// メール種別（チャネル・メッセージ種別タグ）
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
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EmailType {
    Welcome,
    Otp,
    BookingConfirmation,
    BookingCancellation,
    PaymentReceipt,
    Campaign,
}

/// 配信結果
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
pub enum DeliveryStatus {
    Sent,
    Failed,
}

/// 添付ファイル
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename:     String,
    pub content_type: String,
    pub content:      Vec<u8>,
}

/// トランスポートに渡す送信メッセージ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to:          String,
    pub to_name:     Option<String>,
    pub subject:     String,
    pub html_body:   String,
    pub text_body:   String,
    pub attachments: Vec<Attachment>,
}

/// 単発配信の依頼
///
/// 業務コード（予約・決済・会員登録など）から渡されるペイロード。
/// キューに積む場合もそのままシリアライズして保持する。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRequest {
    pub to:                String,
    #[serde(default)]
    pub recipient_name:    Option<String>,
    pub subject:           String,
    pub email_type:        EmailType,
    pub template_name:     String,
    #[serde(default)]
    pub template_data:     Map<String, Value>,
    #[serde(default)]
    pub recipient_user_id: Option<UserId>,
    #[serde(default)]
    pub campaign_id:       Option<CampaignId>,
    #[serde(default)]
    pub triggered_by:      Option<UserId>,
    #[serde(default)]
    pub attachments:       Vec<Attachment>,
}

impl DeliveryRequest {
    pub fn new(
        to: impl Into<String>,
        subject: impl Into<String>,
        email_type: EmailType,
        template_name: impl Into<String>,
    ) -> Self {
        Self {
            to: to.into(),
            recipient_name: None,
            subject: subject.into(),
            email_type,
            template_name: template_name.into(),
            template_data: Map::new(),
            recipient_user_id: None,
            campaign_id: None,
            triggered_by: None,
            attachments: Vec::new(),
        }
    }

    /// テンプレート変数を 1 つ追加する
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.template_data.insert(key.into(), value.into());
        self
    }

    pub fn with_recipient_name(mut self, name: impl Into<String>) -> Self {
        self.recipient_name = Some(name.into());
        self
    }

    pub fn with_campaign(mut self, campaign_id: CampaignId) -> Self {
        self.campaign_id = Some(campaign_id);
        self
    }

    pub fn triggered_by(mut self, user_id: UserId) -> Self {
        self.triggered_by = Some(user_id);
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }
}

/// 送信の終端状態
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryResolution {
    Sent { attempts: u32 },
    Failed { attempts: u32, error: String },
}

impl DeliveryResolution {
    pub fn status(&self) -> DeliveryStatus {
        match self {
            Self::Sent { .. } => DeliveryStatus::Sent,
            Self::Failed { .. } => DeliveryStatus::Failed,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Sent { attempts } | Self::Failed { attempts, .. } => *attempts,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Sent { .. } => None,
            Self::Failed { error, .. } => Some(error),
        }
    }
}

/// 配信記録（監査証跡）
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryRecord {
    pub id:                DeliveryRecordId,
    pub recipient_email:   String,
    pub recipient_name:    Option<String>,
    pub recipient_user_id: Option<UserId>,
    pub subject:           String,
    pub email_type:        EmailType,
    pub template_name:     String,
    pub status:            DeliveryStatus,
    pub error_message:     Option<String>,
    pub campaign_id:       Option<CampaignId>,
    pub triggered_by:      Option<UserId>,
    pub attempts:          u32,
    pub created_at:        DateTime<Utc>,
}

impl DeliveryRecord {
    /// 依頼内容と終端状態から配信記録を作成する
    pub fn new(request: &DeliveryRequest, resolution: &DeliveryResolution, now: DateTime<Utc>) -> Self {
        Self {
            id: DeliveryRecordId::new(),
            recipient_email: request.to.trim().to_string(),
            recipient_name: request.recipient_name.clone(),
            recipient_user_id: request.recipient_user_id.clone(),
            subject: request.subject.clone(),
            email_type: request.email_type,
            template_name: request.template_name.clone(),
            status: resolution.status(),
            error_message: resolution.error().map(str::to_string),
            campaign_id: request.campaign_id.clone(),
            triggered_by: request.triggered_by.clone(),
            attempts: resolution.attempts(),
            created_at: now,
        }
    }

    pub fn is_sent(&self) -> bool {
        self.status == DeliveryStatus::Sent
    }
}

/// 単発送信の結果
///
/// `record_id` は配信記録の書き込みに失敗した場合 `None` になる。
/// 記録の失敗は送信結果そのものには影響しない。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOutcome {
    pub success:   bool,
    pub attempts:  u32,
    pub error:     Option<String>,
    pub record_id: Option<DeliveryRecordId>,
}

impl SendOutcome {
    pub fn new(resolution: &DeliveryResolution, record_id: Option<DeliveryRecordId>) -> Self {
        Self {
            success: resolution.status() == DeliveryStatus::Sent,
            attempts: resolution.attempts(),
            error: resolution.error().map(str::to_string),
            record_id,
        }
    }
}

/// 配信依頼の事前条件違反
///
/// トランスポートを呼ぶ前に判定でき、副作用なしで呼び出し元に返すエラー。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotificationError {
    #[error("宛先が不正です: {0}")]
    InvalidRecipient(String),

    #[error("件名は必須です")]
    MissingSubject,

    #[error("未登録のテンプレートです: {0}")]
    UnknownTemplate(String),

    #[error("テンプレート {template} に必須項目 {field} がありません")]
    MissingTemplateField { template: String, field: String },

    #[error("テンプレートのレンダリングに失敗しました: {0}")]
    RenderFailed(String),
}

/// 種別・結果ごとの件数（集計用の読み取り専用射影）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryCount {
    pub email_type: EmailType,
    pub status:     DeliveryStatus,
    pub count:      u64,
}

/// 期間内の配信統計
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryStats {
    pub since:        DateTime<Utc>,
    pub until:        DateTime<Utc>,
    pub total_sent:   u64,
    pub total_failed: u64,
    pub by_type:      Vec<DeliveryCount>,
}

impl DeliveryStats {
    pub fn from_counts(since: DateTime<Utc>, until: DateTime<Utc>, by_type: Vec<DeliveryCount>) -> Self {
        let sum = |status: DeliveryStatus| {
            by_type
                .iter()
                .filter(|c| c.status == status)
                .map(|c| c.count)
                .sum()
        };
        Self {
            since,
            until,
            total_sent: sum(DeliveryStatus::Sent),
            total_failed: sum(DeliveryStatus::Failed),
            by_type,
        }
    }
}

/// 保持期間の一括削除で使う境界時刻を求める
///
/// `older_than_days` が [`MIN_RETENTION_DAYS`] 未満の場合と、境界時刻が表現できないほど
/// 大きい場合は拒否する。
pub fn retention_cutoff(
    now: DateTime<Utc>,
    older_than_days: i64,
) -> Result<DateTime<Utc>, DomainError> {
    if older_than_days < MIN_RETENTION_DAYS {
        return Err(DomainError::Validation(format!(
            "配信記録は最低 {MIN_RETENTION_DAYS} 日間保持する必要があります（指定: {older_than_days} 日）"
        )));
    }
    Duration::try_days(older_than_days)
        .and_then(|age| now.checked_sub_signed(age))
        .ok_or_else(|| {
            DomainError::Validation(format!("保持日数が大きすぎます（指定: {older_than_days} 日）"))
        })
}
