//! # 通知 API ハンドラ
//!
//! 業務バックエンドから呼ばれる単発送信・キュー投入・配信統計・保持期間削除の
//! エンドポイントを実装する。

use std::sync::Arc;

use axum::{
   Json,
   extract::{Query, State},
   http::StatusCode,
   response::{IntoResponse, Response},
};
use chrono::{DateTime, Duration, Utc};
use renthub_domain::{clock::Clock, delivery::DeliveryRequest};
use renthub_shared::ApiResponse;
use serde::{Deserialize, Serialize};

use crate::{
   error::NotifierError,
   usecase::{DeliveryLogger, DeliveryQueue, DeliveryTask, EnqueueOptions, SingleSender},
};

/// 期間指定がない場合の集計範囲
const DEFAULT_STATS_WINDOW_HOURS: i64 = 24;

/// 通知ハンドラーの State
pub struct NotificationState {
   pub sender: SingleSender,
   pub logger: DeliveryLogger,
   pub queue:  DeliveryQueue,
   pub clock:  Arc<dyn Clock>,
}

/// キュー投入リクエスト
#[derive(Debug, Deserialize)]
pub struct QueueNotificationRequest {
   #[serde(flatten)]
   pub request:  DeliveryRequest,
   /// 実行までの待ち時間（ミリ秒）
   #[serde(default)]
   pub delay_ms: u64,
   #[serde(default)]
   pub priority: i32,
}

/// 配信統計のクエリパラメータ
#[derive(Debug, Deserialize)]
pub struct StatsQuery {
   pub since: Option<DateTime<Utc>>,
   pub until: Option<DateTime<Utc>>,
}

/// 保持期間削除のクエリパラメータ
#[derive(Debug, Deserialize)]
pub struct RetentionQuery {
   pub older_than_days: i64,
}

/// 保持期間削除の結果 DTO
#[derive(Debug, Serialize)]
pub struct RetentionPurgedDto {
   pub deleted: u64,
}

/// 1 通のメールを同期的に送信する
///
/// 送信の成否はレスポンスの `success` で返す。事前条件違反のみ 400 になる。
///
/// ## エンドポイント
/// POST /internal/notifications
#[tracing::instrument(skip_all)]
pub async fn send_notification(
   State(state): State<Arc<NotificationState>>,
   Json(request): Json<DeliveryRequest>,
) -> Result<Response, NotifierError> {
   let outcome = state.sender.send(request).await?;

   Ok((StatusCode::OK, Json(ApiResponse::new(outcome))).into_response())
}

/// 1 通のメールをキューに積む
///
/// ## エンドポイント
/// POST /internal/notifications/queue
#[tracing::instrument(skip_all)]
pub async fn queue_notification(
   State(state): State<Arc<NotificationState>>,
   Json(body): Json<QueueNotificationRequest>,
) -> Result<Response, NotifierError> {
   // 宛先・件名・テンプレートの不備はキューに積む前に返す
   state.sender.validate(&body.request)?;

   let handle = state.queue.enqueue(
      DeliveryTask::Single(body.request),
      EnqueueOptions {
         delay:    std::time::Duration::from_millis(body.delay_ms),
         priority: body.priority,
      },
   );

   Ok((StatusCode::ACCEPTED, Json(ApiResponse::new(handle))).into_response())
}

/// 期間内の配信件数を種別・結果ごとに集計する
///
/// 期間を省略した場合は直近 24 時間を集計する。
///
/// ## エンドポイント
/// GET /internal/notifications/stats?since={since}&until={until}
pub async fn get_delivery_stats(
   State(state): State<Arc<NotificationState>>,
   Query(query): Query<StatsQuery>,
) -> Result<Response, NotifierError> {
   let until = query.until.unwrap_or_else(|| state.clock.now());
   let since = query
      .since
      .unwrap_or_else(|| until - Duration::hours(DEFAULT_STATS_WINDOW_HOURS));

   let stats = state.logger.stats(since, until).await?;

   Ok((StatusCode::OK, Json(ApiResponse::new(stats))).into_response())
}

/// 保持期間を過ぎた配信記録を削除する
///
/// ## エンドポイント
/// DELETE /internal/notifications/retention?older_than_days={days}
#[tracing::instrument(skip_all, fields(older_than_days = query.older_than_days))]
pub async fn purge_delivery_records(
   State(state): State<Arc<NotificationState>>,
   Query(query): Query<RetentionQuery>,
) -> Result<Response, NotifierError> {
   let deleted = state.logger.purge_older_than(query.older_than_days).await?;

   Ok((
      StatusCode::OK,
      Json(ApiResponse::new(RetentionPurgedDto { deleted })),
   )
      .into_response())
}
