//! # メールトランスポート
//!
//! メールを実際に外部へ送り出す境界。
//!
//! ## 設計方針
//!
//! - **trait による抽象化**: [`MailTransport`] で送信手段を抽象化し、ユースケース層に注入する
//! - **3 つの実装**: SMTP（開発・リレー）、SES（本番）、Noop（通知無効化時）
//! - **失敗の分類**: リトライで回復し得るか（[`TransportError::is_retryable`]）を
//!   トランスポート側で判定して返す。プロバイダ全体のレート制限（`Throttled`）は
//!   即座にリトライを打ち切る合図になる
//! - **1 呼び出し 1 試行**: リトライと待機は呼び出し側（単発送信）の責務

mod mime;
mod noop;
mod ses;
mod smtp;

use async_trait::async_trait;
pub use noop::NoopMailTransport;
use renthub_domain::delivery::EmailMessage;
pub use ses::SesMailTransport;
pub use smtp::SmtpMailTransport;
use thiserror::Error;

/// トランスポートの送信失敗
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// 一時的な失敗（接続断、タイムアウト、4xx 応答など）
    #[error("一時的な送信エラー: {0}")]
    Transient(String),

    /// プロバイダ全体のレート制限
    #[error("プロバイダのレート制限により送信できません: {0}")]
    Throttled(String),

    /// 恒久的な拒否（宛先不正、送信元未検証、5xx 応答など）
    #[error("送信が拒否されました: {0}")]
    Permanent(String),
}

impl TransportError {
    /// 待ってから再送すれば成功し得るか
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// 送信受付の結果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportReceipt {
    /// プロバイダが払い出したメッセージ ID（取得できる場合）
    pub message_id: Option<String>,
}

/// メール送信トレイト
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// メールを 1 回送信する
    async fn send(&self, email: &EmailMessage) -> Result<TransportReceipt, TransportError>;
}
