//! # RentHub 通知配信インフラ層
//!
//! 外部システムとの接続・通信を担当するインフラストラクチャ層。
//!
//! ## 責務
//!
//! - **データベース接続**: PostgreSQL への接続プール管理とマイグレーション
//! - **リポジトリ実装**: 配信記録・キャンペーン・監査イベント・ワンタイムコード
//! - **メールトランスポート**: SMTP（lettre）、Amazon SES v2、Noop
//! - **ブラックリスト**: 使用済みワンタイムコードの拒否リスト（Redis / インメモリ）
//! - **Webhook**: ワンタイムコード検証時の外部通知（reqwest）
//!
//! ## 依存関係
//!
//! ```text
//! notifier → infra → domain
//! ```
//!
//! ## モジュール構成
//!
//! - [`db`] - PostgreSQL データベース接続管理
//! - [`redis`] - Redis 接続管理
//! - [`error`] - インフラ層エラー定義
//! - [`repository`] - リポジトリトレイトと PostgreSQL 実装
//! - [`transport`] - メールトランスポート
//! - [`token_blacklist`] - 使用済みトークンのブラックリスト
//! - [`webhook`] - 検証イベントの Webhook 通知
//!
//! ## 使用例
//!
//! ```rust,ignore
//! use renthub_infra::{db, redis};
//!
//! async fn setup() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = db::create_pool("postgres://localhost/renthub").await?;
//!     db::run_migrations(&pool).await?;
//!
//!     let redis = redis::create_connection_manager("redis://localhost").await?;
//!     Ok(())
//! }
//! ```

pub mod db;
pub mod error;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod redis;
pub mod repository;
pub mod token_blacklist;
pub mod transport;
pub mod webhook;

pub use error::{InfraError, InfraErrorKind};
pub use token_blacklist::{InMemoryTokenBlacklist, RedisTokenBlacklist, TokenBlacklist};
pub use transport::{
    MailTransport,
    NoopMailTransport,
    SesMailTransport,
    SmtpMailTransport,
    TransportError,
    TransportReceipt,
};
pub use webhook::{HttpVerificationHook, VerificationEvent, VerificationHook};
