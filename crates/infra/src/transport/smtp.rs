//! SMTP トランスポート
//!
//! lettre の `AsyncSmtpTransport` を使用してメールを送信する。
//! 開発環境では Mailpit などのローカル SMTP サーバーに接続する。
//!
//! ## 応答コードの分類
//!
//! | 応答 | 分類 |
//! |------|------|
//! | 421、またはレート制限を示す 4xx | `Throttled` |
//! | その他の 4xx | `Transient` |
//! | 5xx | `Permanent` |
//! | 応答なし（接続・TLS・タイムアウト） | `Transient` |

use async_trait::async_trait;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use renthub_domain::delivery::EmailMessage;

use super::{MailTransport, TransportError, TransportReceipt, mime};

pub struct SmtpMailTransport {
    transport:    AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
}

impl SmtpMailTransport {
    /// # 引数
    ///
    /// - `host`: SMTP サーバーのホスト名（例: "localhost"）
    /// - `port`: SMTP サーバーのポート番号（例: 1025 for Mailpit）
    /// - `from_address`: 送信元メールアドレス
    pub fn new(host: &str, port: u16, from_address: String) -> Self {
        // builder_dangerous: TLS なしで接続（ローカル SMTP 向け）
        let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
            .port(port)
            .build();

        Self {
            transport,
            from_address,
        }
    }
}

#[async_trait]
impl MailTransport for SmtpMailTransport {
    async fn send(&self, email: &EmailMessage) -> Result<TransportReceipt, TransportError> {
        let message = mime::build_message(&self.from_address, email)?;

        let response = self.transport.send(message).await.map_err(|e| {
            let code = e.status().and_then(|code| code.to_string().parse::<u16>().ok());
            classify_reply(code, &format!("SMTP 送信失敗: {e}"))
        })?;

        Ok(TransportReceipt {
            message_id: response.first_line().map(str::to_string),
        })
    }
}

/// SMTP 応答コードから失敗を分類する
fn classify_reply(code: Option<u16>, detail: &str) -> TransportError {
    let detail_lower = detail.to_lowercase();
    let mentions_rate_limit = ["rate", "throttl", "too many"]
        .iter()
        .any(|word| detail_lower.contains(word));

    match code {
        Some(421) => TransportError::Throttled(detail.to_string()),
        Some(400..=499) if mentions_rate_limit => TransportError::Throttled(detail.to_string()),
        Some(400..=499) => TransportError::Transient(detail.to_string()),
        Some(500..=599) => TransportError::Permanent(detail.to_string()),
        _ => TransportError::Transient(detail.to_string()),
    }
}
