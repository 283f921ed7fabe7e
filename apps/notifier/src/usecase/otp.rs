//! # ワンタイムコード発行
//!
//! レート制限 → コードの差し替え → 監査イベント → メール送信の順に発行し、
//! 検証・使用の状態遷移を管理する。
//!
//! ## 設計方針
//!
//! - **発行の成否は生成と保存で決まる**: メール送信はキューを通さず直接行い、
//!   送れたかどうかは [`EmailDelivery`] として結果に含める
//! - **再送は同じ枠で数える**: 再送も `otp.issue` として記録し、detail に `{"resend": true}` を残す
//! - **検証と使用は別操作**: 検証は 1 回だけ成功し、使用済みにはしない。
//!   使用は検証済みのコードを 1 回だけ使用済みにし、ブラックリストに載せる
//! - **Webhook はベストエフォート**: 検証成功の通知は別タスクで送り、失敗はログのみ

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use renthub_domain::{
    audit_event::{AuditAction, AuditEvent},
    clock::Clock,
    delivery::{DeliveryRequest, EmailType},
    otp::{OneTimeCode, OtpCode, OtpError, OtpPolicy},
    rate_limit::Role,
    recipient::Email,
};
use renthub_infra::{
    repository::OneTimeCodeRepository,
    token_blacklist::TokenBlacklist,
    webhook::{VerificationEvent, VerificationHook},
};
use renthub_shared::{
    event_log::{error as log_error, event},
    log_business_event,
};
use serde::Serialize;
use serde_json::json;

use super::{notification::SingleSender, rate_limit::RateLimiter};
use crate::error::NotifierError;

const OTP_SUBJECT: &str = "RentHub 認証コード";

/// 発行したコードのメール送信状況
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailDelivery {
    /// 送信できた
    Emailed,
    /// 送信に失敗した、または結果が分からない（コードは有効）
    Uncertain,
}

/// 発行結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OtpIssued {
    pub identity:   Email,
    pub role:       Role,
    pub expires_at: DateTime<Utc>,
    pub delivery:   EmailDelivery,
}

/// 検証結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OtpVerified {
    pub identity:    Email,
    pub role:        Role,
    pub verified_at: DateTime<Utc>,
}

/// ワンタイムコードの発行・検証・使用
#[derive(Clone)]
pub struct OtpIssuer {
    codes:     Arc<dyn OneTimeCodeRepository>,
    limiter:   RateLimiter,
    sender:    SingleSender,
    blacklist: Arc<dyn TokenBlacklist>,
    hook:      Option<Arc<dyn VerificationHook>>,
    policy:    OtpPolicy,
    clock:     Arc<dyn Clock>,
}

impl OtpIssuer {
    pub fn new(
        codes: Arc<dyn OneTimeCodeRepository>,
        limiter: RateLimiter,
        sender: SingleSender,
        blacklist: Arc<dyn TokenBlacklist>,
        policy: OtpPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            codes,
            limiter,
            sender,
            blacklist,
            hook: None,
            policy,
            clock,
        }
    }

    /// 検証成功の通知先を設定する
    pub fn with_hook(mut self, hook: Arc<dyn VerificationHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// 新しいコードを発行してメールで送る
    #[tracing::instrument(skip_all, fields(role = %role))]
    pub async fn issue(&self, identity: &str, role: Role) -> Result<OtpIssued, NotifierError> {
        self.issue_code(identity, role, false).await
    }

    /// コードを再発行する
    ///
    /// 発行と同じ上限で数える。
    #[tracing::instrument(skip_all, fields(role = %role))]
    pub async fn resend(&self, identity: &str, role: Role) -> Result<OtpIssued, NotifierError> {
        self.issue_code(identity, role, true).await
    }

    async fn issue_code(
        &self,
        identity: &str,
        role: Role,
        resend: bool,
    ) -> Result<OtpIssued, NotifierError> {
        let identity = Email::new(identity)?;

        if let Err(e) = self
            .limiter
            .ensure_allowed(&identity, AuditAction::OtpIssue, role)
            .await
        {
            if matches!(e, NotifierError::QuotaExceeded { .. }) {
                log_business_event!(
                    event.category = event::category::OTP,
                    event.action = event::action::OTP_RATE_LIMITED,
                    event.entity_type = event::entity_type::ONE_TIME_CODE,
                    event.result = event::result::FAILURE,
                    otp.identity = %identity,
                    otp.role = %role,
                    "ワンタイムコードの発行上限に到達"
                );
            }
            return Err(e);
        }

        let code = generate_code(self.policy.code_length())?;
        let otp = OneTimeCode::new(identity.clone(), code, role, &self.policy, self.clock.now());

        // 発行の監査イベントが上限の台帳になる。記録できなければ発行しない
        let detail = resend.then(|| json!({ "resend": true }));
        self.limiter
            .record(&identity, AuditAction::OtpIssue, role, detail)
            .await
            .inspect_err(|e| {
                tracing::error!(
                    error.category = log_error::category::INFRASTRUCTURE,
                    error.kind = log_error::kind::AUDIT_LOG,
                    error = %e,
                    "発行の監査イベントを記録できないため発行を中止"
                );
            })?;

        let replaced = self.codes.replace(&otp).await?;

        let delivery = self.send_code(&otp).await;

        log_business_event!(
            event.category = event::category::OTP,
            event.action = event::action::OTP_ISSUED,
            event.entity_type = event::entity_type::ONE_TIME_CODE,
            event.entity_id = %otp.id(),
            event.result = event::result::SUCCESS,
            otp.identity = %identity,
            otp.role = %role,
            otp.resend = resend,
            otp.replaced = replaced,
            otp.emailed = delivery == EmailDelivery::Emailed,
            "ワンタイムコードを発行"
        );

        Ok(OtpIssued {
            identity,
            role,
            expires_at: otp.expires_at(),
            delivery,
        })
    }

    async fn send_code(&self, otp: &OneTimeCode) -> EmailDelivery {
        let ttl_seconds = self.policy.ttl().num_seconds();
        let request = DeliveryRequest::new(
            otp.identity().as_str(),
            OTP_SUBJECT,
            EmailType::Otp,
            "otp",
        )
        .with_data("code", otp.code().as_str())
        .with_data("expires_in_minutes", (ttl_seconds + 59) / 60);

        match self.sender.send(request).await {
            Ok(outcome) if outcome.success => EmailDelivery::Emailed,
            Ok(outcome) => {
                tracing::warn!(
                    error.category = log_error::category::EXTERNAL_SERVICE,
                    error.kind = log_error::kind::MAIL_TRANSPORT,
                    error = outcome.error.as_deref().unwrap_or_default(),
                    "ワンタイムコードのメールを送信できません"
                );
                EmailDelivery::Uncertain
            }
            Err(e) => {
                tracing::warn!(
                    error.category = log_error::category::EXTERNAL_SERVICE,
                    error.kind = log_error::kind::MAIL_TRANSPORT,
                    error = %e,
                    "ワンタイムコードのメールを作成できません"
                );
                EmailDelivery::Uncertain
            }
        }
    }

    /// 入力されたコードを検証する
    #[tracing::instrument(skip_all)]
    pub async fn verify(&self, identity: &str, candidate: &str) -> Result<OtpVerified, NotifierError> {
        let identity = Email::new(identity)?;
        let now = self.clock.now();

        let mut otp = self.find_latest(&identity).await?;
        if let Err(e) = otp.verify(candidate, now) {
            self.log_rejected(&identity, e);
            return Err(e.into());
        }
        if !self.codes.mark_verified(otp.id(), now).await? {
            self.log_rejected(&identity, OtpError::AlreadyVerified);
            return Err(OtpError::AlreadyVerified.into());
        }

        self.record_audit(&identity, AuditAction::OtpVerify, otp.role()).await;
        log_business_event!(
            event.category = event::category::OTP,
            event.action = event::action::OTP_VERIFIED,
            event.entity_type = event::entity_type::ONE_TIME_CODE,
            event.entity_id = %otp.id(),
            event.result = event::result::SUCCESS,
            otp.identity = %identity,
            "ワンタイムコードを検証"
        );

        if let Some(hook) = &self.hook {
            let hook = hook.clone();
            let event = VerificationEvent::new(identity.clone(), otp.role(), now);
            tokio::spawn(async move {
                if let Err(e) = hook.notify_verified(&event).await {
                    tracing::warn!(
                        error.category = log_error::category::EXTERNAL_SERVICE,
                        error.kind = log_error::kind::WEBHOOK,
                        error = %e,
                        "検証イベントの Webhook 通知に失敗"
                    );
                }
            });
        }

        Ok(OtpVerified {
            identity,
            role: otp.role(),
            verified_at: now,
        })
    }

    /// 検証済みのコードを使用済みにする
    ///
    /// 使用済みのコードはブラックリストに載せ、以後は受け付けない。
    #[tracing::instrument(skip_all)]
    pub async fn consume(&self, identity: &str, candidate: &str) -> Result<(), NotifierError> {
        let identity = Email::new(identity)?;
        let now = self.clock.now();

        let mut otp = self.find_latest(&identity).await?;
        let key = otp.blacklist_key();
        if self.blacklist.contains(&key).await? {
            self.log_rejected(&identity, OtpError::AlreadyConsumed);
            return Err(OtpError::AlreadyConsumed.into());
        }
        if let Err(e) = otp.consume(candidate, now) {
            self.log_rejected(&identity, e);
            return Err(e.into());
        }
        if !self.codes.mark_consumed(otp.id(), now).await? {
            self.log_rejected(&identity, OtpError::AlreadyConsumed);
            return Err(OtpError::AlreadyConsumed.into());
        }

        let ttl = self
            .policy
            .ttl()
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(
                OtpPolicy::DEFAULT_TTL_SECONDS.unsigned_abs(),
            ));
        if let Err(e) = self.blacklist.add(&key, ttl).await {
            tracing::warn!(
                error.category = log_error::category::INFRASTRUCTURE,
                error.kind = log_error::kind::BLACKLIST,
                error = %e,
                "使用済みコードをブラックリストに登録できません"
            );
        }

        self.record_audit(&identity, AuditAction::OtpConsume, otp.role()).await;
        log_business_event!(
            event.category = event::category::OTP,
            event.action = event::action::OTP_CONSUMED,
            event.entity_type = event::entity_type::ONE_TIME_CODE,
            event.entity_id = %otp.id(),
            event.result = event::result::SUCCESS,
            otp.identity = %identity,
            "ワンタイムコードを使用"
        );
        Ok(())
    }

    /// 期限切れ・使用済みのコードを削除する
    pub async fn purge_expired(&self) -> Result<u64, NotifierError> {
        let deleted = self.codes.delete_expired(self.clock.now()).await?;
        if deleted > 0 {
            log_business_event!(
                event.category = event::category::OTP,
                event.action = event::action::OTP_PURGED,
                event.entity_type = event::entity_type::ONE_TIME_CODE,
                event.result = event::result::SUCCESS,
                otp.deleted = deleted,
                "期限切れのワンタイムコードを削除"
            );
        }
        Ok(deleted)
    }

    /// identity の操作履歴（新しい順）
    pub async fn history(&self, identity: &str, limit: u32) -> Result<Vec<AuditEvent>, NotifierError> {
        let identity = Email::new(identity)?;
        self.limiter.history(&identity, limit).await
    }

    async fn find_latest(&self, identity: &Email) -> Result<OneTimeCode, NotifierError> {
        match self.codes.find_latest_unconsumed(identity).await? {
            Some(otp) => Ok(otp),
            None => {
                self.log_rejected(identity, OtpError::NotFound);
                Err(OtpError::NotFound.into())
            }
        }
    }

    async fn record_audit(&self, identity: &Email, action: AuditAction, role: Role) {
        if let Err(e) = self.limiter.record(identity, action, role, None).await {
            tracing::warn!(
                error.category = log_error::category::INFRASTRUCTURE,
                error.kind = log_error::kind::AUDIT_LOG,
                error = %e,
                action = %action,
                "監査イベントを記録できません"
            );
        }
    }

    fn log_rejected(&self, identity: &Email, reason: OtpError) {
        log_business_event!(
            event.category = event::category::OTP,
            event.action = event::action::OTP_VERIFY_REJECTED,
            event.entity_type = event::entity_type::ONE_TIME_CODE,
            event.result = event::result::FAILURE,
            otp.identity = %identity,
            otp.reason = %reason,
            "ワンタイムコードを受け付けません"
        );
    }
}

fn generate_code(length: usize) -> Result<OtpCode, NotifierError> {
    let mut rng = rand::rng();
    let digits: String = (0..length)
        .map(|_| char::from(b'0' + rng.random_range(0..10u8)))
        .collect();
    OtpCode::new(digits).map_err(|e| NotifierError::Internal(e.to_string()))
}
