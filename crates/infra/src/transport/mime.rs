//! MIME メッセージ構築
//!
//! SMTP 送信と SES の raw 送信（添付あり）で同じ組み立てを使う。

use lettre::message::{
    Attachment as MimeAttachment,
    Mailbox,
    Message,
    MultiPart,
    SinglePart,
    header::ContentType,
};
use renthub_domain::delivery::EmailMessage;

use super::TransportError;

/// lettre の `Message` を組み立てる
///
/// アドレスやヘッダが不正な場合は再送しても直らないため `Permanent` を返す。
pub(super) fn build_message(from: &str, email: &EmailMessage) -> Result<Message, TransportError> {
    let from: Mailbox = from
        .parse()
        .map_err(|e| TransportError::Permanent(format!("送信元アドレス不正: {e}")))?;
    let to = Mailbox::new(
        email.to_name.clone(),
        email
            .to
            .parse()
            .map_err(|e| TransportError::Permanent(format!("宛先アドレス不正: {e}")))?,
    );

    let body = MultiPart::alternative()
        .singlepart(
            SinglePart::builder()
                .header(ContentType::TEXT_PLAIN)
                .body(email.text_body.clone()),
        )
        .singlepart(
            SinglePart::builder()
                .header(ContentType::TEXT_HTML)
                .body(email.html_body.clone()),
        );

    let body = if email.attachments.is_empty() {
        body
    } else {
        let mut mixed = MultiPart::mixed().multipart(body);
        for attachment in &email.attachments {
            let content_type = ContentType::parse(&attachment.content_type).map_err(|e| {
                TransportError::Permanent(format!(
                    "添付ファイルの Content-Type が不正です: {} ({e})",
                    attachment.content_type
                ))
            })?;
            mixed = mixed.singlepart(
                MimeAttachment::new(attachment.filename.clone())
                    .body(attachment.content.clone(), content_type),
            );
        }
        mixed
    };

    Message::builder()
        .from(from)
        .to(to)
        .subject(&email.subject)
        .multipart(body)
        .map_err(|e| TransportError::Permanent(format!("メッセージ構築失敗: {e}")))
}
