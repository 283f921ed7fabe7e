//! # Redis 接続管理
//!
//! 使用済みワンタイムコードのブラックリストに使う接続を作成する。
//! `ConnectionManager` は切断時に自動で再接続し、clone して共有できる。

use ::redis::aio::ConnectionManager;

use crate::error::InfraError;

/// Redis 接続マネージャを作成する
pub async fn create_connection_manager(redis_url: &str) -> Result<ConnectionManager, InfraError> {
    let client = ::redis::Client::open(redis_url)?;
    let manager = ConnectionManager::new(client).await?;
    Ok(manager)
}

/// 接続確認（readiness チェック用）
pub async fn ping(conn: &ConnectionManager) -> Result<(), InfraError> {
    let mut conn = conn.clone();
    let _: String = ::redis::cmd("PING").query_async(&mut conn).await?;
    Ok(())
}
