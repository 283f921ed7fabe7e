//! # レート制限
//!
//! 監査イベントを直近の時間窓で数え、ロール別の上限と比べて発行可否を判定する。
//!
//! ## 設計方針
//!
//! - **件数は保存しない**: 監査イベントの挿入そのものが記録になる
//! - **読み取り失敗は拒否**: 件数を数えられない場合は許可しない（フェイルクローズ）

use std::sync::Arc;

use renthub_domain::{
    audit_event::{AuditAction, AuditEvent},
    clock::Clock,
    rate_limit::{QuotaTable, RateLimitDecision, Role},
    recipient::Email,
};
use renthub_infra::repository::AuditEventRepository;
use renthub_shared::event_log::error as log_error;
use serde_json::Value;

use crate::error::NotifierError;

/// ロール別のレート制限
#[derive(Clone)]
pub struct RateLimiter {
    audit:  Arc<dyn AuditEventRepository>,
    quotas: QuotaTable,
    clock:  Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(audit: Arc<dyn AuditEventRepository>, quotas: QuotaTable, clock: Arc<dyn Clock>) -> Self {
        Self {
            audit,
            quotas,
            clock,
        }
    }

    /// 直近の時間窓内の件数から判定する
    pub async fn check(
        &self,
        identity: &Email,
        action: AuditAction,
        role: Role,
    ) -> Result<RateLimitDecision, NotifierError> {
        let since = self.clock.now() - self.quotas.window();
        let count = self.audit.count_since(identity, action, role, since).await?;
        Ok(self.quotas.decide(role, count))
    }

    /// 発行してよいか
    ///
    /// 件数を読めない場合は `false` になる。
    pub async fn is_allowed(&self, identity: &Email, action: AuditAction, role: Role) -> bool {
        match self.check(identity, action, role).await {
            Ok(decision) => decision.is_allowed(),
            Err(e) => {
                tracing::error!(
                    error.category = log_error::category::INFRASTRUCTURE,
                    error.kind = log_error::kind::AUDIT_LOG,
                    error = %e,
                    "レート制限の件数を取得できないため拒否"
                );
                false
            }
        }
    }

    /// 上限に達していれば [`NotifierError::QuotaExceeded`] を返す
    pub async fn ensure_allowed(
        &self,
        identity: &Email,
        action: AuditAction,
        role: Role,
    ) -> Result<(), NotifierError> {
        match self.check(identity, action, role).await? {
            RateLimitDecision::Allowed { .. } => Ok(()),
            RateLimitDecision::Rejected { max } => Err(NotifierError::QuotaExceeded { max, role }),
        }
    }

    /// 操作を 1 件記録する
    pub async fn record(
        &self,
        identity: &Email,
        action: AuditAction,
        role: Role,
        detail: Option<Value>,
    ) -> Result<(), NotifierError> {
        let event = AuditEvent::new(identity.clone(), action, role, detail, self.clock.now());
        self.audit.insert(&event).await?;
        Ok(())
    }

    /// 記録済みの操作を新しい順に返す
    pub async fn history(&self, identity: &Email, limit: u32) -> Result<Vec<AuditEvent>, NotifierError> {
        Ok(self.audit.find_by_identity(identity, limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use renthub_domain::clock::ManualClock;
    use renthub_infra::mock::MockAuditEventRepository;
    use rstest::rstest;

    use super::*;

    fn identity() -> Email {
        Email::new("owner@example.com").unwrap()
    }

    fn limiter(audit: &MockAuditEventRepository, clock: &Arc<ManualClock>) -> RateLimiter {
        RateLimiter::new(Arc::new(audit.clone()), QuotaTable::default(), clock.clone())
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()))
    }

    #[rstest]
    #[case(Role::User, 6)]
    #[case(Role::Owner, 8)]
    #[case(Role::Admin, 10)]
    #[tokio::test]
    async fn test_ロールの上限回数まで許可し次を拒否する(#[case] role: Role, #[case] max: u32) {
        let audit = MockAuditEventRepository::new();
        let clock = clock();
        let limiter = limiter(&audit, &clock);

        for _ in 0..max {
            assert!(limiter.is_allowed(&identity(), AuditAction::OtpIssue, role).await);
            limiter
                .record(&identity(), AuditAction::OtpIssue, role, None)
                .await
                .unwrap();
        }

        assert!(!limiter.is_allowed(&identity(), AuditAction::OtpIssue, role).await);
        let error = limiter
            .ensure_allowed(&identity(), AuditAction::OtpIssue, role)
            .await
            .unwrap_err();
        assert!(matches!(error, NotifierError::QuotaExceeded { max: m, .. } if m == max));
    }

    #[tokio::test]
    async fn test_時間窓を過ぎた記録は数えない() {
        let audit = MockAuditEventRepository::new();
        let clock = clock();
        let limiter = limiter(&audit, &clock);
        for _ in 0..6 {
            limiter
                .record(&identity(), AuditAction::OtpIssue, Role::User, None)
                .await
                .unwrap();
        }

        clock.advance(Duration::minutes(61));

        assert!(limiter.is_allowed(&identity(), AuditAction::OtpIssue, Role::User).await);
    }

    #[tokio::test]
    async fn test_ロールが違えば別の枠で数える() {
        let audit = MockAuditEventRepository::new();
        let clock = clock();
        let limiter = limiter(&audit, &clock);
        for _ in 0..6 {
            limiter
                .record(&identity(), AuditAction::OtpIssue, Role::User, None)
                .await
                .unwrap();
        }

        let decision = limiter
            .check(&identity(), AuditAction::OtpIssue, Role::Owner)
            .await
            .unwrap();

        assert_eq!(decision, RateLimitDecision::Allowed { remaining: 8 });
    }

    #[tokio::test]
    async fn test_件数を読めない場合は拒否する() {
        let audit = MockAuditEventRepository::new();
        audit.fail_reads(true);
        let clock = clock();
        let limiter = limiter(&audit, &clock);

        assert!(!limiter.is_allowed(&identity(), AuditAction::OtpIssue, Role::Admin).await);
        assert!(matches!(
            limiter
                .ensure_allowed(&identity(), AuditAction::OtpIssue, Role::Admin)
                .await,
            Err(NotifierError::Infra(_))
        ));
    }
}
