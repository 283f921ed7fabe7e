//! SES トランスポート
//!
//! AWS SES v2 API を使用してメールを送信する。本番環境で使用する。
//! 添付ファイルがある場合は lettre で組み立てた MIME を raw メッセージとして送る。

use async_trait::async_trait;
use aws_sdk_sesv2::{
    Client,
    error::{DisplayErrorContext, SdkError},
    operation::send_email::SendEmailError,
    primitives::Blob,
    types::{Body, Content, Destination, EmailContent, Message, RawMessage},
};
use renthub_domain::delivery::EmailMessage;

use super::{MailTransport, TransportError, TransportReceipt, mime};

pub struct SesMailTransport {
    client:       Client,
    from_address: String,
}

impl SesMailTransport {
    /// # 引数
    ///
    /// - `client`: AWS SES v2 クライアント
    /// - `from_address`: 送信元メールアドレス（SES で検証済みであること）
    pub fn new(client: Client, from_address: String) -> Self {
        Self {
            client,
            from_address,
        }
    }

    fn simple_content(email: &EmailMessage) -> Result<EmailContent, TransportError> {
        let content = |data: &str, part: &str| {
            Content::builder()
                .data(data)
                .build()
                .map_err(|e| TransportError::Permanent(format!("{part}構築失敗: {e}")))
        };

        Ok(EmailContent::builder()
            .simple(
                Message::builder()
                    .subject(content(&email.subject, "件名")?)
                    .body(
                        Body::builder()
                            .html(content(&email.html_body, "HTML 本文")?)
                            .text(content(&email.text_body, "テキスト本文")?)
                            .build(),
                    )
                    .build(),
            )
            .build())
    }

    fn raw_content(&self, email: &EmailMessage) -> Result<EmailContent, TransportError> {
        let message = mime::build_message(&self.from_address, email)?;
        let raw = RawMessage::builder()
            .data(Blob::new(message.formatted()))
            .build()
            .map_err(|e| TransportError::Permanent(format!("raw メッセージ構築失敗: {e}")))?;

        Ok(EmailContent::builder().raw(raw).build())
    }
}

#[async_trait]
impl MailTransport for SesMailTransport {
    async fn send(&self, email: &EmailMessage) -> Result<TransportReceipt, TransportError> {
        let content = if email.attachments.is_empty() {
            Self::simple_content(email)?
        } else {
            self.raw_content(email)?
        };
        let destination = Destination::builder().to_addresses(&email.to).build();

        let output = self
            .client
            .send_email()
            .from_email_address(&self.from_address)
            .destination(destination)
            .content(content)
            .send()
            .await
            .map_err(|e| classify(&e))?;

        Ok(TransportReceipt {
            message_id: output.message_id().map(str::to_string),
        })
    }
}

/// SES のエラーを分類する
///
/// アカウント全体の送信レート超過（`TooManyRequests` / `LimitExceeded`）は `Throttled`。
/// メッセージ自体やアカウント状態に起因する拒否は `Permanent`。
/// それ以外（タイムアウト、ネットワーク、5xx）は `Transient`。
fn classify<R>(err: &SdkError<SendEmailError, R>) -> TransportError
where
    R: std::fmt::Debug + 'static,
{
    let detail = format!("SES 送信失敗: {}", DisplayErrorContext(err));

    match err.as_service_error() {
        Some(e) if e.is_too_many_requests_exception() || e.is_limit_exceeded_exception() => {
            TransportError::Throttled(detail)
        }
        Some(e)
            if e.is_message_rejected()
                || e.is_mail_from_domain_not_verified_exception()
                || e.is_account_suspended_exception()
                || e.is_sending_paused_exception()
                || e.is_bad_request_exception()
                || e.is_not_found_exception() =>
        {
            TransportError::Permanent(detail)
        }
        _ => TransportError::Transient(detail),
    }
}
