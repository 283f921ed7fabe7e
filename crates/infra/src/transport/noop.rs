//! Noop トランスポート
//!
//! メールを実際に送信せず、ログ出力のみ行う。通知を無効化した環境で使用する。

use async_trait::async_trait;
use renthub_domain::delivery::EmailMessage;

use super::{MailTransport, TransportError, TransportReceipt};

#[derive(Debug, Clone)]
pub struct NoopMailTransport;

#[async_trait]
impl MailTransport for NoopMailTransport {
    async fn send(&self, email: &EmailMessage) -> Result<TransportReceipt, TransportError> {
        tracing::info!(
            to = %email.to,
            subject = %email.subject,
            attachments = email.attachments.len(),
            "Noop: メール送信をスキップ"
        );
        Ok(TransportReceipt::default())
    }
}
