//! # 通知サービス エラー定義
//!
//! 通知サービス固有のエラーと、HTTP レスポンスへの変換を定義する。
//!
//! | エラー | HTTP ステータス |
//! |--------|----------------|
//! | `InvalidRequest` / `Template` / `Otp` | 400 |
//! | `NotFound` | 404 |
//! | `QuotaExceeded` | 429 |
//! | `DeliveryFailed` | 502 |
//! | `CampaignSetup` / `Infra` / `Internal` | 500 |

use axum::{
   Json,
   http::StatusCode,
   response::{IntoResponse, Response},
};
use renthub_domain::{
   DomainError,
   delivery::NotificationError,
   otp::OtpError,
   rate_limit::Role,
};
use renthub_infra::InfraError;
use renthub_shared::{ErrorResponse, event_log::error as log_error};
use thiserror::Error;

/// 通知サービスで発生するエラー
#[derive(Debug, Error)]
pub enum NotifierError {
   /// 不正なリクエスト（宛先・件名・識別子など）
   #[error("不正なリクエスト: {0}")]
   InvalidRequest(String),

   /// テンプレート関連の事前条件違反
   #[error(transparent)]
   Template(#[from] NotificationError),

   /// 発行上限超過
   ///
   /// メッセージは利用者にそのまま提示する。
   #[error("Maximum {max} OTPs per hour allowed for {}", role.plural())]
   QuotaExceeded { max: u32, role: Role },

   /// ワンタイムコードの検証・使用の失敗
   #[error(transparent)]
   Otp(#[from] OtpError),

   /// キャンペーンの準備（レコード作成）に失敗
   #[error("キャンペーンの準備に失敗しました: {0}")]
   CampaignSetup(String),

   #[error("見つかりません: {0}")]
   NotFound(String),

   /// キューで実行した単発送信がリトライ後も失敗
   #[error("配信に失敗しました: {0}")]
   DeliveryFailed(String),

   #[error("インフラエラー: {0}")]
   Infra(#[from] InfraError),

   #[error("内部エラー: {0}")]
   Internal(String),
}

impl From<DomainError> for NotifierError {
   fn from(err: DomainError) -> Self {
      match err {
         DomainError::Validation(msg) => Self::InvalidRequest(msg),
         DomainError::NotFound { entity_type, id } => Self::NotFound(format!("{entity_type}: {id}")),
         other => Self::Internal(other.to_string()),
      }
   }
}

impl NotifierError {
   fn to_error_response(&self) -> ErrorResponse {
      match self {
         Self::InvalidRequest(msg) => ErrorResponse::validation_error(msg.clone()),
         Self::Template(e) => ErrorResponse::template_error(e.to_string()),
         Self::QuotaExceeded { .. } => ErrorResponse::rate_limited(self.to_string()),
         Self::Otp(e) => {
            let reason = match e {
               OtpError::NotFound => "not-found",
               OtpError::Expired => "expired",
               OtpError::Mismatch => "mismatch",
               OtpError::AlreadyVerified => "already-verified",
               OtpError::NotVerified => "not-verified",
               OtpError::AlreadyConsumed => "already-consumed",
            };
            ErrorResponse::otp_rejected(reason, e.to_string())
         }
         Self::NotFound(msg) => ErrorResponse::not_found(msg.clone()),
         Self::DeliveryFailed(msg) => ErrorResponse::delivery_failed(msg.clone()),
         Self::CampaignSetup(_) | Self::Infra(_) | Self::Internal(_) => ErrorResponse::internal_error(),
      }
   }
}

impl IntoResponse for NotifierError {
   fn into_response(self) -> Response {
      match &self {
         Self::Infra(e) => tracing::error!(
            error.category = log_error::category::INFRASTRUCTURE,
            error.kind = log_error::kind::DATABASE,
            "インフラエラー: {}\n{}",
            e,
            e.span_trace()
         ),
         Self::CampaignSetup(msg) | Self::Internal(msg) => tracing::error!(
            error.category = log_error::category::INFRASTRUCTURE,
            error.kind = log_error::kind::INTERNAL,
            "内部エラー: {}",
            msg
         ),
         _ => {}
      }

      let body = self.to_error_response();
      let status = StatusCode::from_u16(body.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
      (status, Json(body)).into_response()
   }
}
