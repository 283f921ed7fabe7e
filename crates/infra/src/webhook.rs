//! # 検証イベント Webhook
//!
//! ワンタイムコードの検証成功を外部システムへ通知する。
//!
//! 呼び出し側はベストエフォートで扱う。失敗は `InfraError` として返すが、
//! 検証結果そのものには影響させない。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use renthub_domain::{rate_limit::Role, recipient::Email};
use serde::Serialize;

use crate::error::InfraError;

/// 検証成功イベントのペイロード
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationEvent {
    pub event:       &'static str,
    pub identity:    Email,
    pub role:        Role,
    pub verified_at: DateTime<Utc>,
}

impl VerificationEvent {
    pub fn new(identity: Email, role: Role, verified_at: DateTime<Utc>) -> Self {
        Self {
            event: "otp.verified",
            identity,
            role,
            verified_at,
        }
    }
}

/// 検証イベントの通知先トレイト
#[async_trait]
pub trait VerificationHook: Send + Sync {
    async fn notify_verified(&self, event: &VerificationEvent) -> Result<(), InfraError>;
}

/// HTTP POST で JSON を送る実装
pub struct HttpVerificationHook {
    url:    String,
    client: reqwest::Client,
}

impl HttpVerificationHook {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url:    url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl VerificationHook for HttpVerificationHook {
    #[tracing::instrument(skip_all, level = "debug", fields(url = %self.url))]
    async fn notify_verified(&self, event: &VerificationEvent) -> Result<(), InfraError> {
        self.client
            .post(&self.url)
            .json(event)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn トレイトはsendとsyncを実装している() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HttpVerificationHook>();
    }

    #[test]
    fn test_ペイロードはイベント名と小文字のロールを含む() {
        let verified_at = Utc::now();
        let event = VerificationEvent::new(
            Email::new("owner@example.com").unwrap(),
            Role::Owner,
            verified_at,
        );

        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event"], "otp.verified");
        assert_eq!(json["identity"], "owner@example.com");
        assert_eq!(json["role"], "owner");
    }
}
