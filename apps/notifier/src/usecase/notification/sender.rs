//! # 単発送信
//!
//! 事前条件の検査 → テンプレートのレンダリング → リトライ付き送信 → 配信記録を統合する。
//!
//! ## 設計方針
//!
//! - **事前条件は `Err`**: 宛先・件名・テンプレートの不備はトランスポートを呼ぶ前に
//!   副作用なしで返す
//! - **送信失敗は値**: トランスポートの失敗は伝播させず、[`SendOutcome`] の
//!   `success: false` として返す
//! - **1 送信 1 記録**: リトライ回数に関係なく、終端状態で配信記録を 1 件だけ書く
//! - **リトライの打ち切り**: `Throttled` と `Permanent` は待っても回復しないため即座に終了する

use std::sync::Arc;

use renthub_domain::{
    delivery::{DeliveryRequest, DeliveryResolution, EmailMessage, NotificationError, SendOutcome},
    recipient::Email,
};
use renthub_infra::transport::MailTransport;
use renthub_shared::{event_log::event, log_business_event};

use super::{DeliveryLogger, RetryPolicy, TemplateRenderer, retry::saturating_millis};
use crate::error::NotifierError;

/// 単発送信
#[derive(Clone)]
pub struct SingleSender {
    transport: Arc<dyn MailTransport>,
    renderer:  Arc<TemplateRenderer>,
    logger:    DeliveryLogger,
    retry:     RetryPolicy,
}

impl SingleSender {
    pub fn new(
        transport: Arc<dyn MailTransport>,
        renderer: Arc<TemplateRenderer>,
        logger: DeliveryLogger,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            renderer,
            logger,
            retry,
        }
    }

    /// 1 通のメールを送信する
    ///
    /// 事前条件を満たさない場合のみ `Err` を返し、その場合は何も記録しない。
    #[tracing::instrument(
        skip_all,
        fields(email_type = %request.email_type, template = %request.template_name)
    )]
    pub async fn send(&self, request: DeliveryRequest) -> Result<SendOutcome, NotifierError> {
        let message = self.prepare(&request)?;
        Ok(self.deliver(&request, &message).await)
    }

    /// 事前条件違反も失敗の配信記録として残して送信する
    ///
    /// キャンペーンのように、宛先ごとの不備で全体を止めたくない呼び出し元が使う。
    /// 事前条件違反の記録は試行回数 0 になる。
    pub async fn send_or_record_failure(&self, request: DeliveryRequest) -> SendOutcome {
        match self.prepare(&request) {
            Ok(message) => self.deliver(&request, &message).await,
            Err(e) => {
                let resolution = DeliveryResolution::Failed {
                    attempts: 0,
                    error:    e.to_string(),
                };
                let record_id = self.logger.record(&request, &resolution).await;
                SendOutcome::new(&resolution, record_id)
            }
        }
    }

    /// 送信せずに事前条件だけを検査する
    ///
    /// キューに積む前の検査に使う。
    pub fn validate(&self, request: &DeliveryRequest) -> Result<(), NotificationError> {
        self.prepare(request).map(|_| ())
    }

    /// テンプレートが登録済みで必須項目がそろっているか検査する
    pub fn check_template(&self, request: &DeliveryRequest) -> Result<(), NotificationError> {
        self.renderer.check(request)
    }

    fn prepare(&self, request: &DeliveryRequest) -> Result<EmailMessage, NotificationError> {
        let to = Email::new(&request.to)
            .map_err(|_| NotificationError::InvalidRecipient(request.to.clone()))?;
        if request.subject.trim().is_empty() {
            return Err(NotificationError::MissingSubject);
        }
        self.renderer.render(request, &to)
    }

    async fn deliver(&self, request: &DeliveryRequest, message: &EmailMessage) -> SendOutcome {
        let mut attempt = 0;
        let resolution = loop {
            attempt += 1;
            match self.transport.send(message).await {
                Ok(_) => break DeliveryResolution::Sent { attempts: attempt },
                Err(e) if e.is_retryable() && self.retry.has_attempts_left(attempt) => {
                    let delay = self.retry.delay_after(attempt);
                    tracing::debug!(
                        attempt,
                        delay_ms = saturating_millis(delay),
                        error = %e,
                        "一時的な送信エラーのため再試行"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    break DeliveryResolution::Failed {
                        attempts: attempt,
                        error:    e.to_string(),
                    };
                }
            }
        };

        let email_type: &str = request.email_type.into();
        match &resolution {
            DeliveryResolution::Sent { attempts } => log_business_event!(
                event.category = event::category::NOTIFICATION,
                event.action = event::action::NOTIFICATION_SENT,
                event.entity_type = event::entity_type::DELIVERY_RECORD,
                event.result = event::result::SUCCESS,
                notification.email_type = email_type,
                notification.recipient = %message.to,
                notification.attempts = attempts,
                "メール送信成功"
            ),
            DeliveryResolution::Failed { attempts, error } => log_business_event!(
                event.category = event::category::NOTIFICATION,
                event.action = event::action::NOTIFICATION_FAILED,
                event.entity_type = event::entity_type::DELIVERY_RECORD,
                event.result = event::result::FAILURE,
                notification.email_type = email_type,
                notification.recipient = %message.to,
                notification.attempts = attempts,
                error = %error,
                "メール送信失敗"
            ),
        }

        let record_id = self.logger.record(request, &resolution).await;
        SendOutcome::new(&resolution, record_id)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use renthub_domain::{
        clock::FixedClock,
        delivery::{DeliveryStatus, EmailType},
    };
    use renthub_infra::{
        mock::{MockDeliveryRecordRepository, MockMailTransport},
        transport::TransportError,
    };
    use tokio::time::Instant;

    use super::*;

    fn make_sender(
        transport: &MockMailTransport,
        records: &MockDeliveryRecordRepository,
    ) -> SingleSender {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap());
        SingleSender::new(
            Arc::new(transport.clone()),
            Arc::new(TemplateRenderer::new().unwrap()),
            DeliveryLogger::new(Arc::new(records.clone()), Arc::new(clock)),
            RetryPolicy::default(),
        )
    }

    fn welcome(to: &str) -> DeliveryRequest {
        DeliveryRequest::new(to, "RentHub へようこそ", EmailType::Welcome, "welcome")
            .with_data("login_url", "https://renthub.example.com/login")
    }

    #[tokio::test]
    async fn test_初回で成功すると試行1回で記録される() {
        let transport = MockMailTransport::new();
        let records = MockDeliveryRecordRepository::new();
        let sender = make_sender(&transport, &records);

        let outcome = sender.send(welcome("tenant@example.com")).await.unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(transport.delivered().len(), 1);
        let stored = records.records();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, DeliveryStatus::Sent);
        assert_eq!(outcome.record_id, Some(stored[0].id.clone()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_一時的な失敗は待ってから再試行する() {
        let transport = MockMailTransport::new();
        transport.fail_next(2, TransportError::Transient("timeout".to_string()));
        let records = MockDeliveryRecordRepository::new();
        let sender = make_sender(&transport, &records);
        let started = Instant::now();

        let outcome = sender.send(welcome("tenant@example.com")).await.unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
        assert_eq!(records.records().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_試行回数を使い切ると失敗として1件だけ記録される() {
        let transport = MockMailTransport::new();
        transport.fail_next(5, TransportError::Transient("connection reset".to_string()));
        let records = MockDeliveryRecordRepository::new();
        let sender = make_sender(&transport, &records);

        let outcome = sender.send(welcome("tenant@example.com")).await.unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(transport.call_count(), 3);
        let stored = records.records();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, DeliveryStatus::Failed);
        assert_eq!(stored[0].attempts, 3);
        assert!(stored[0].error_message.as_deref().unwrap().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_プロバイダのレート制限は即座に打ち切る() {
        let transport = MockMailTransport::new();
        transport.fail_next(3, TransportError::Throttled("daily quota".to_string()));
        let records = MockDeliveryRecordRepository::new();
        let sender = make_sender(&transport, &records);

        let outcome = sender.send(welcome("tenant@example.com")).await.unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_恒久的な拒否も再試行しない() {
        let transport = MockMailTransport::new();
        transport.fail_next(1, TransportError::Permanent("550 mailbox unavailable".to_string()));
        let records = MockDeliveryRecordRepository::new();
        let sender = make_sender(&transport, &records);

        let outcome = sender.send(welcome("tenant@example.com")).await.unwrap();

        assert_eq!(outcome.attempts, 1);
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_宛先不正は送信も記録もせずにエラーを返す() {
        let transport = MockMailTransport::new();
        let records = MockDeliveryRecordRepository::new();
        let sender = make_sender(&transport, &records);

        let result = sender.send(welcome("not-an-address")).await;

        assert!(matches!(
            result,
            Err(NotifierError::Template(NotificationError::InvalidRecipient(_)))
        ));
        assert_eq!(transport.call_count(), 0);
        assert!(records.records().is_empty());
    }

    #[tokio::test]
    async fn test_件名が空ならmissing_subject() {
        let transport = MockMailTransport::new();
        let records = MockDeliveryRecordRepository::new();
        let sender = make_sender(&transport, &records);
        let mut request = welcome("tenant@example.com");
        request.subject = "  ".to_string();

        let result = sender.send(request).await;

        assert!(matches!(
            result,
            Err(NotifierError::Template(NotificationError::MissingSubject))
        ));
    }

    #[tokio::test]
    async fn test_記録の書き込みに失敗しても送信結果は変わらない() {
        let transport = MockMailTransport::new();
        let records = MockDeliveryRecordRepository::new();
        records.fail_inserts(true);
        let sender = make_sender(&transport, &records);

        let outcome = sender.send(welcome("tenant@example.com")).await.unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.record_id, None);
    }

    #[tokio::test]
    async fn test_事前条件違反を試行0回の失敗として記録できる() {
        let transport = MockMailTransport::new();
        let records = MockDeliveryRecordRepository::new();
        let sender = make_sender(&transport, &records);

        let outcome = sender.send_or_record_failure(welcome("broken@")).await;

        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 0);
        assert_eq!(transport.call_count(), 0);
        let stored = records.records();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].attempts, 0);
    }

    #[test]
    fn test_validateは送信せずに事前条件を検査する() {
        let transport = MockMailTransport::new();
        let records = MockDeliveryRecordRepository::new();
        let sender = make_sender(&transport, &records);

        assert!(sender.validate(&welcome("tenant@example.com")).is_ok());
        assert!(matches!(
            sender.validate(&welcome("nobody")),
            Err(NotificationError::InvalidRecipient(_))
        ));
        assert_eq!(transport.call_count(), 0);
    }
}
