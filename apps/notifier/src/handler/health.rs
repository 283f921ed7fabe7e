//! # ヘルスチェックハンドラ
//!
//! 通知サービスの稼働状態を確認するためのエンドポイント。
//!
//! - `/health`: Liveness Check（常に `"healthy"` を返す）
//! - `/health/ready`: Readiness Check（DB / Redis の接続状態を確認）
//!
//! Redis を設定していない場合はインメモリのブラックリストで動くため、
//! `redis` は `skipped` として報告し、失敗扱いにしない。

use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use redis::aio::ConnectionManager;
use renthub_shared::{CheckStatus, HealthResponse, ReadinessResponse, ReadinessStatus};
use sqlx::PgPool;

const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// 通知サービスのヘルスチェックエンドポイント
pub async fn health_check() -> Json<HealthResponse> {
   Json(HealthResponse {
      status:  "healthy".to_string(),
      version: env!("CARGO_PKG_VERSION").to_string(),
   })
}

/// Readiness Check 用の State
pub struct ReadinessState {
   pub pool:  PgPool,
   pub redis: Option<ConnectionManager>,
}

/// 通知サービスの Readiness Check エンドポイント
///
/// DB と Redis の接続状態を並行チェックする。
/// 全チェック OK → 200、1 つでも失敗 → 503。
#[tracing::instrument(skip_all)]
pub async fn readiness_check(State(state): State<Arc<ReadinessState>>) -> impl IntoResponse {
   let (database, redis) = tokio::join!(check_database(&state.pool), check_redis(state.redis.as_ref()));

   let checks = HashMap::from([
      ("database".to_string(), database),
      ("redis".to_string(), redis),
   ]);
   let response = ReadinessResponse::from_checks(checks);
   let http_status = match response.status {
      ReadinessStatus::Ready => StatusCode::OK,
      ReadinessStatus::NotReady => StatusCode::SERVICE_UNAVAILABLE,
   };

   (http_status, Json(response))
}

/// `SELECT 1` で DB への接続を確認する（タイムアウト: 5 秒）
async fn check_database(pool: &PgPool) -> CheckStatus {
   match tokio::time::timeout(CHECK_TIMEOUT, renthub_infra::db::ping(pool)).await {
      Ok(Ok(())) => CheckStatus::Ok,
      Ok(Err(e)) => {
         tracing::warn!(error = %e, "readiness check: database ping failed");
         CheckStatus::Error
      }
      Err(_) => {
         tracing::warn!("readiness check: database check timed out");
         CheckStatus::Error
      }
   }
}

/// Redis への接続を PING で確認する（タイムアウト: 5 秒）
async fn check_redis(conn: Option<&ConnectionManager>) -> CheckStatus {
   let Some(conn) = conn else {
      return CheckStatus::Skipped;
   };
   match tokio::time::timeout(CHECK_TIMEOUT, renthub_infra::redis::ping(conn)).await {
      Ok(Ok(())) => CheckStatus::Ok,
      Ok(Err(e)) => {
         tracing::warn!(error = %e, "readiness check: redis ping failed");
         CheckStatus::Error
      }
      Err(_) => {
         tracing::warn!("readiness check: redis check timed out");
         CheckStatus::Error
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[tokio::test]
   async fn test_redis未設定はskippedになる() {
      assert_eq!(check_redis(None).await, CheckStatus::Skipped);
   }
}
