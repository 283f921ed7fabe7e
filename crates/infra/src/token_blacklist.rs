//! # トークンブラックリスト
//!
//! 使用済みワンタイムコードを二度と受け付けないための拒否リスト。
//!
//! データベースの `consumed` フラグとは別に持ち、期限切れ掃除でレコードが消えた後も
//! TTL の間は拒否し続ける。
//!
//! - [`RedisTokenBlacklist`]: 複数プロセスで共有する本番用実装
//! - [`InMemoryTokenBlacklist`]: 単一プロセス・Redis 未設定時の実装

use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
    time::{Duration, Instant},
};

use ::redis::{AsyncCommands, aio::ConnectionManager};
use async_trait::async_trait;

use crate::error::InfraError;

/// ブラックリストのトレイト
#[async_trait]
pub trait TokenBlacklist: Send + Sync {
    /// キーがブラックリストに載っているか
    async fn contains(&self, key: &str) -> Result<bool, InfraError>;

    /// キーを `ttl` の間ブラックリストに載せる
    async fn add(&self, key: &str, ttl: Duration) -> Result<(), InfraError>;
}

/// Redis を使用したブラックリスト
pub struct RedisTokenBlacklist {
    conn: ConnectionManager,
}

impl RedisTokenBlacklist {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn redis_key(key: &str) -> String {
        format!("blacklist:{key}")
    }
}

#[async_trait]
impl TokenBlacklist for RedisTokenBlacklist {
    async fn contains(&self, key: &str) -> Result<bool, InfraError> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(Self::redis_key(key)).await?;
        Ok(exists)
    }

    async fn add(&self, key: &str, ttl: Duration) -> Result<(), InfraError> {
        let mut conn = self.conn.clone();
        let seconds = ttl.as_secs().max(1);
        let _: () = conn.set_ex(Self::redis_key(key), "1", seconds).await?;
        Ok(())
    }
}

/// プロセス内のブラックリスト
#[derive(Default)]
pub struct InMemoryTokenBlacklist {
    entries: Mutex<HashMap<String, Instant>>,
}

impl InMemoryTokenBlacklist {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenBlacklist for InMemoryTokenBlacklist {
    async fn contains(&self, key: &str) -> Result<bool, InfraError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        entries.retain(|_, expires_at| *expires_at > now);
        Ok(entries.contains_key(key))
    }

    async fn add(&self, key: &str, ttl: Duration) -> Result<(), InfraError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), Instant::now() + ttl);
        Ok(())
    }
}
