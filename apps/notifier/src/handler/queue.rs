//! # キュー API ハンドラ
//!
//! 配信キューの状態参照と、待機中タスクの取り消しエンドポイントを実装する。

use std::sync::Arc;

use axum::{
   Json,
   extract::{Path, State},
   http::StatusCode,
   response::{IntoResponse, Response},
};
use renthub_shared::ApiResponse;

use crate::{
   error::NotifierError,
   usecase::{DeliveryQueue, TaskId},
};

/// キューハンドラーの State
pub struct QueueState {
   pub queue: DeliveryQueue,
}

/// キューの件数を取得する
///
/// ## エンドポイント
/// GET /internal/queue/stats
pub async fn get_queue_stats(State(state): State<Arc<QueueState>>) -> Response {
   (StatusCode::OK, Json(ApiResponse::new(state.queue.stats()))).into_response()
}

/// 待機中のタスクを取り消す
///
/// 実行中・実行済みのタスクは取り消せず 404 になる。
///
/// ## エンドポイント
/// DELETE /internal/queue/tasks/{id}
#[tracing::instrument(skip_all, fields(task_id = id))]
pub async fn cancel_task(
   State(state): State<Arc<QueueState>>,
   Path(id): Path<u64>,
) -> Result<Response, NotifierError> {
   if state.queue.cancel(TaskId::new(id)) {
      Ok(StatusCode::NO_CONTENT.into_response())
   } else {
      Err(NotifierError::NotFound(format!("待機中のタスク: {id}")))
   }
}
