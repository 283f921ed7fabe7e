//! # テンプレートレンダラー
//!
//! tera テンプレートエンジンで配信メールを HTML/plaintext 両形式で生成する。
//!
//! ## 設計方針
//!
//! - **`include_str!` によるコンパイル時埋め込み**: テンプレートはバイナリに埋め込まれる
//! - **必須項目の事前検査**: テンプレートごとに必須の変数を登録し、欠けていれば
//!   送信前に [`NotificationError::MissingTemplateField`] を返す
//! - **共通変数**: `recipient_name` と `subject` はすべてのテンプレートで使える

use renthub_domain::{
    delivery::{DeliveryRequest, EmailMessage, NotificationError},
    recipient::Email,
};
use serde_json::Value;
use tera::{Context, Tera};

/// 登録済みテンプレートと必須項目
const TEMPLATES: &[(&str, &[&str])] = &[
    ("welcome", &["login_url"]),
    ("otp", &["code", "expires_in_minutes"]),
    (
        "booking_confirmation",
        &["property_name", "check_in", "check_out", "booking_reference"],
    ),
    ("booking_cancellation", &["property_name", "booking_reference"]),
    ("payment_receipt", &["amount", "currency", "payment_reference"]),
    ("campaign", &["body"]),
];

/// テンプレートレンダラー
pub struct TemplateRenderer {
    engine: Tera,
}

impl TemplateRenderer {
    /// `include_str!` で埋め込んだテンプレートを tera に登録する
    pub fn new() -> Result<Self, NotificationError> {
        let mut engine = Tera::default();

        engine
            .add_raw_templates(vec![
                (
                    "welcome.html",
                    include_str!("../../../templates/notifications/welcome.html"),
                ),
                (
                    "welcome.txt",
                    include_str!("../../../templates/notifications/welcome.txt"),
                ),
                (
                    "otp.html",
                    include_str!("../../../templates/notifications/otp.html"),
                ),
                (
                    "otp.txt",
                    include_str!("../../../templates/notifications/otp.txt"),
                ),
                (
                    "booking_confirmation.html",
                    include_str!("../../../templates/notifications/booking_confirmation.html"),
                ),
                (
                    "booking_confirmation.txt",
                    include_str!("../../../templates/notifications/booking_confirmation.txt"),
                ),
                (
                    "booking_cancellation.html",
                    include_str!("../../../templates/notifications/booking_cancellation.html"),
                ),
                (
                    "booking_cancellation.txt",
                    include_str!("../../../templates/notifications/booking_cancellation.txt"),
                ),
                (
                    "payment_receipt.html",
                    include_str!("../../../templates/notifications/payment_receipt.html"),
                ),
                (
                    "payment_receipt.txt",
                    include_str!("../../../templates/notifications/payment_receipt.txt"),
                ),
                (
                    "campaign.html",
                    include_str!("../../../templates/notifications/campaign.html"),
                ),
                (
                    "campaign.txt",
                    include_str!("../../../templates/notifications/campaign.txt"),
                ),
            ])
            .map_err(|e| NotificationError::RenderFailed(e.to_string()))?;

        Ok(Self { engine })
    }

    /// テンプレート名が登録済みで、必須項目がそろっているか検査する
    pub fn check(&self, request: &DeliveryRequest) -> Result<(), NotificationError> {
        let (_, required) = TEMPLATES
            .iter()
            .find(|(name, _)| *name == request.template_name)
            .ok_or_else(|| NotificationError::UnknownTemplate(request.template_name.clone()))?;

        for field in *required {
            match request.template_data.get(*field) {
                None | Some(Value::Null) => {
                    return Err(NotificationError::MissingTemplateField {
                        template: request.template_name.clone(),
                        field:    (*field).to_string(),
                    });
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// 配信依頼からメールメッセージを生成する
    pub fn render(
        &self,
        request: &DeliveryRequest,
        to: &Email,
    ) -> Result<EmailMessage, NotificationError> {
        self.check(request)?;

        let mut context = Context::from_value(Value::Object(request.template_data.clone()))
            .map_err(|e| NotificationError::RenderFailed(e.to_string()))?;
        context.insert(
            "recipient_name",
            request.recipient_name.as_deref().unwrap_or(""),
        );
        context.insert("subject", &request.subject);

        let template_name = &request.template_name;
        let html_body = self
            .engine
            .render(&format!("{template_name}.html"), &context)
            .map_err(|e| NotificationError::RenderFailed(e.to_string()))?;
        let text_body = self
            .engine
            .render(&format!("{template_name}.txt"), &context)
            .map_err(|e| NotificationError::RenderFailed(e.to_string()))?;

        Ok(EmailMessage {
            to: to.as_str().to_string(),
            to_name: request.recipient_name.clone(),
            subject: request.subject.clone(),
            html_body,
            text_body,
            attachments: request.attachments.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use renthub_domain::delivery::{Attachment, EmailType};
    use rstest::rstest;

    use super::*;

    fn renderer() -> TemplateRenderer {
        TemplateRenderer::new().unwrap()
    }

    fn to() -> Email {
        Email::new("guest@example.com").unwrap()
    }

    #[test]
    fn test_ワンタイムコードのメールにコードと有効期限が入る() {
        let request = DeliveryRequest::new("guest@example.com", "認証コード", EmailType::Otp, "otp")
            .with_data("code", "482913")
            .with_data("expires_in_minutes", 5);

        let email = renderer().render(&request, &to()).unwrap();

        assert_eq!(email.to, "guest@example.com");
        assert_eq!(email.subject, "認証コード");
        assert!(email.html_body.contains("482913"));
        assert!(email.text_body.contains("482913"));
        assert!(email.text_body.contains('5'));
    }

    #[test]
    fn test_予約確認メールに物件名と予約番号が入る() {
        let request = DeliveryRequest::new(
            "guest@example.com",
            "ご予約が確定しました",
            EmailType::BookingConfirmation,
            "booking_confirmation",
        )
        .with_recipient_name("山田花子")
        .with_data("property_name", "渋谷区のロフト")
        .with_data("check_in", "2026-11-01")
        .with_data("check_out", "2026-11-04")
        .with_data("booking_reference", "BK-1042");

        let email = renderer().render(&request, &to()).unwrap();

        assert!(email.html_body.contains("渋谷区のロフト"));
        assert!(email.html_body.contains("BK-1042"));
        assert!(email.text_body.contains("山田花子"));
        assert_eq!(email.to_name.as_deref(), Some("山田花子"));
    }

    #[test]
    fn test_領収書の添付ファイルはそのままメッセージに載る() {
        let receipt = Attachment {
            filename:     "receipt-PY-2201.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            content:      b"%PDF-1.7".to_vec(),
        };
        let request = DeliveryRequest::new(
            "guest@example.com",
            "お支払いありがとうございます",
            EmailType::PaymentReceipt,
            "payment_receipt",
        )
        .with_data("amount", 48000)
        .with_data("currency", "JPY")
        .with_data("payment_reference", "PY-2201")
        .with_attachment(receipt.clone());

        let email = renderer().render(&request, &to()).unwrap();

        assert!(email.text_body.contains("PY-2201"));
        assert_eq!(email.attachments, vec![receipt]);
    }

    #[test]
    fn test_html版では変数がエスケープされる() {
        let request = DeliveryRequest::new("guest@example.com", "お知らせ", EmailType::Campaign, "campaign")
            .with_data("body", "<script>alert(1)</script>");

        let email = renderer().render(&request, &to()).unwrap();

        assert!(!email.html_body.contains("<script>"));
    }

    #[test]
    fn test_未登録のテンプレートはunknown_template() {
        let request = DeliveryRequest::new("guest@example.com", "件名", EmailType::Welcome, "newsletter_v2");

        assert_eq!(
            renderer().check(&request),
            Err(NotificationError::UnknownTemplate("newsletter_v2".to_string()))
        );
    }

    #[rstest]
    #[case("otp", "code")]
    #[case("payment_receipt", "amount")]
    #[case("welcome", "login_url")]
    fn test_必須項目が欠けるとmissing_template_field(#[case] template: &str, #[case] field: &str) {
        let request = DeliveryRequest::new("guest@example.com", "件名", EmailType::Welcome, template);

        assert_eq!(
            renderer().check(&request),
            Err(NotificationError::MissingTemplateField {
                template: template.to_string(),
                field:    field.to_string(),
            })
        );
    }

    #[test]
    fn test_nullは欠けているものとして扱う() {
        let request = DeliveryRequest::new("guest@example.com", "件名", EmailType::Campaign, "campaign")
            .with_data("body", Value::Null);

        assert!(renderer().check(&request).is_err());
    }
}
