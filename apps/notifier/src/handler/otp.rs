//! # ワンタイムコード API ハンドラ
//!
//! 発行・再送・検証・使用と、操作履歴の参照エンドポイントを実装する。
//!
//! コードそのものはレスポンスに含めない。利用者にはメールでのみ届く。

use std::sync::Arc;

use axum::{
   Json,
   extract::{Query, State},
   http::StatusCode,
   response::{IntoResponse, Response},
};
use renthub_domain::{audit_event::AuditEvent, rate_limit::Role};
use renthub_shared::ApiResponse;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{error::NotifierError, usecase::OtpIssuer};

const DEFAULT_HISTORY_LIMIT: u32 = 50;

/// ワンタイムコードハンドラーの State
pub struct OtpState {
   pub issuer: OtpIssuer,
}

/// 発行・再送リクエスト
#[derive(Debug, Deserialize)]
pub struct IssueOtpRequest {
   pub identity: String,
   /// 省略時は一般利用者
   #[serde(default)]
   pub role:     Role,
}

/// 検証・使用リクエスト
#[derive(Debug, Deserialize)]
pub struct CheckOtpRequest {
   pub identity: String,
   pub code:     String,
}

/// 履歴のクエリパラメータ
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
   pub identity: String,
   pub limit:    Option<u32>,
}

/// 使用結果 DTO
#[derive(Debug, Serialize)]
pub struct OtpConsumedDto {
   pub consumed: bool,
}

/// 監査イベント DTO
#[derive(Debug, Serialize)]
pub struct AuditEventDto {
   pub id:         String,
   pub identity:   String,
   pub action:     String,
   pub role:       Role,
   pub detail:     Option<Value>,
   pub created_at: String,
}

impl From<&AuditEvent> for AuditEventDto {
   fn from(event: &AuditEvent) -> Self {
      Self {
         id:         event.id.to_string(),
         identity:   event.identity.as_str().to_string(),
         action:     event.action.to_string(),
         role:       event.role,
         detail:     event.detail.clone(),
         created_at: event.created_at.to_rfc3339(),
      }
   }
}

/// ワンタイムコードを発行してメールで送る
///
/// ## エンドポイント
/// POST /internal/otp/issue
pub async fn issue_otp(
   State(state): State<Arc<OtpState>>,
   Json(body): Json<IssueOtpRequest>,
) -> Result<Response, NotifierError> {
   let issued = state.issuer.issue(&body.identity, body.role).await?;

   Ok((StatusCode::CREATED, Json(ApiResponse::new(issued))).into_response())
}

/// ワンタイムコードを再送する
///
/// 再送も発行として数え、同じ上限に従う。
///
/// ## エンドポイント
/// POST /internal/otp/resend
pub async fn resend_otp(
   State(state): State<Arc<OtpState>>,
   Json(body): Json<IssueOtpRequest>,
) -> Result<Response, NotifierError> {
   let issued = state.issuer.resend(&body.identity, body.role).await?;

   Ok((StatusCode::CREATED, Json(ApiResponse::new(issued))).into_response())
}

/// ワンタイムコードを検証する
///
/// ## エンドポイント
/// POST /internal/otp/verify
pub async fn verify_otp(
   State(state): State<Arc<OtpState>>,
   Json(body): Json<CheckOtpRequest>,
) -> Result<Response, NotifierError> {
   let verified = state.issuer.verify(&body.identity, &body.code).await?;

   Ok((StatusCode::OK, Json(ApiResponse::new(verified))).into_response())
}

/// 検証済みのコードを使用する
///
/// ## エンドポイント
/// POST /internal/otp/consume
pub async fn consume_otp(
   State(state): State<Arc<OtpState>>,
   Json(body): Json<CheckOtpRequest>,
) -> Result<Response, NotifierError> {
   state.issuer.consume(&body.identity, &body.code).await?;

   Ok((
      StatusCode::OK,
      Json(ApiResponse::new(OtpConsumedDto { consumed: true })),
   )
      .into_response())
}

/// 利用者の操作履歴を新しい順に取得する
///
/// ## エンドポイント
/// GET /internal/otp/history?identity={identity}&limit={limit}
pub async fn get_otp_history(
   State(state): State<Arc<OtpState>>,
   Query(query): Query<HistoryQuery>,
) -> Result<Response, NotifierError> {
   let events = state
      .issuer
      .history(&query.identity, query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
      .await?;

   let response = ApiResponse::new(events.iter().map(AuditEventDto::from).collect::<Vec<_>>());
   Ok((StatusCode::OK, Json(response)).into_response())
}
