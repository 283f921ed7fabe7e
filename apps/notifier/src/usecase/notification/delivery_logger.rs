//! # 配信ロガー
//!
//! 送信の終端状態を 1 件の配信記録として書き込む。
//!
//! ## 設計方針
//!
//! - **送信結果を優先**: 記録の書き込みに失敗しても `warn` を出すだけで、呼び出し元に
//!   返す送信結果は変えない
//! - **読み取り射影**: 期間集計とキャンペーン別の記録取得はここから行う
//! - **保持期間**: 一括削除は [`MIN_RETENTION_DAYS`] より新しい記録を対象にできない

use std::sync::Arc;

use chrono::{DateTime, Utc};
use renthub_domain::{
    campaign::CampaignId,
    clock::Clock,
    delivery::{
        DeliveryRecord,
        DeliveryRecordId,
        DeliveryRequest,
        DeliveryResolution,
        DeliveryStats,
        MIN_RETENTION_DAYS,
        retention_cutoff,
    },
};
use renthub_infra::repository::DeliveryRecordRepository;
use renthub_shared::{
    event_log::{error as log_error, event},
    log_business_event,
};

use crate::error::NotifierError;

/// 配信ロガー
#[derive(Clone)]
pub struct DeliveryLogger {
    repo:  Arc<dyn DeliveryRecordRepository>,
    clock: Arc<dyn Clock>,
}

impl DeliveryLogger {
    pub fn new(repo: Arc<dyn DeliveryRecordRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repo, clock }
    }

    /// 終端状態を記録する
    ///
    /// 書き込みに失敗した場合は `None` を返す。
    pub async fn record(
        &self,
        request: &DeliveryRequest,
        resolution: &DeliveryResolution,
    ) -> Option<DeliveryRecordId> {
        let record = DeliveryRecord::new(request, resolution, self.clock.now());

        match self.repo.insert(&record).await {
            Ok(()) => Some(record.id),
            Err(e) => {
                tracing::warn!(
                    error.category = log_error::category::INFRASTRUCTURE,
                    error.kind = log_error::kind::DELIVERY_LOG,
                    error = %e,
                    recipient = %record.recipient_email,
                    status = %record.status,
                    "配信記録の書き込みに失敗"
                );
                None
            }
        }
    }

    /// 期間内の配信統計（`since <= created_at < until`）
    pub async fn stats(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<DeliveryStats, NotifierError> {
        if since >= until {
            return Err(NotifierError::InvalidRequest(
                "since は until より前である必要があります".to_string(),
            ));
        }
        let counts = self.repo.count_by_type_and_status(since, until).await?;
        Ok(DeliveryStats::from_counts(since, until, counts))
    }

    pub async fn campaign_records(
        &self,
        campaign_id: &CampaignId,
    ) -> Result<Vec<DeliveryRecord>, NotifierError> {
        Ok(self.repo.find_by_campaign(campaign_id).await?)
    }

    /// `older_than_days` 日より前の記録を削除し、削除件数を返す
    pub async fn purge_older_than(&self, older_than_days: i64) -> Result<u64, NotifierError> {
        let cutoff = retention_cutoff(self.clock.now(), older_than_days)?;
        let deleted = self.repo.delete_created_before(cutoff).await?;

        log_business_event!(
            event.category = event::category::NOTIFICATION,
            event.action = event::action::RETENTION_PURGED,
            event.entity_type = event::entity_type::DELIVERY_RECORD,
            event.result = event::result::SUCCESS,
            retention.cutoff = %cutoff,
            retention.min_days = MIN_RETENTION_DAYS,
            retention.deleted = deleted,
            "保持期間を過ぎた配信記録を削除"
        );
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;
    use renthub_domain::{
        clock::FixedClock,
        delivery::{DeliveryStatus, EmailType},
    };
    use renthub_infra::mock::MockDeliveryRecordRepository;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
    }

    fn logger(repo: &MockDeliveryRecordRepository) -> DeliveryLogger {
        DeliveryLogger::new(Arc::new(repo.clone()), Arc::new(FixedClock::new(now())))
    }

    fn request() -> DeliveryRequest {
        DeliveryRequest::new("guest@example.com", "領収書", EmailType::PaymentReceipt, "payment_receipt")
    }

    fn record_at(created_at: DateTime<Utc>, status: DeliveryStatus) -> DeliveryRecord {
        let resolution = match status {
            DeliveryStatus::Sent => DeliveryResolution::Sent { attempts: 1 },
            DeliveryStatus::Failed => DeliveryResolution::Failed {
                attempts: 3,
                error:    "timeout".to_string(),
            },
        };
        DeliveryRecord::new(&request(), &resolution, created_at)
    }

    #[tokio::test]
    async fn test_終端状態を1件記録してidを返す() {
        let repo = MockDeliveryRecordRepository::new();

        let id = logger(&repo)
            .record(&request(), &DeliveryResolution::Sent { attempts: 2 })
            .await;

        let records = repo.records();
        assert_eq!(records.len(), 1);
        assert_eq!(Some(records[0].id.clone()), id);
        assert_eq!(records[0].attempts, 2);
        assert_eq!(records[0].created_at, now());
    }

    #[tokio::test]
    async fn test_書き込み失敗はnoneになりパニックしない() {
        let repo = MockDeliveryRecordRepository::new();
        repo.fail_inserts(true);

        let id = logger(&repo)
            .record(&request(), &DeliveryResolution::Sent { attempts: 1 })
            .await;

        assert_eq!(id, None);
    }

    #[tokio::test]
    async fn test_統計は期間内の記録を結果ごとに合計する() {
        let repo = MockDeliveryRecordRepository::new();
        repo.add_record(record_at(now() - Duration::hours(1), DeliveryStatus::Sent));
        repo.add_record(record_at(now() - Duration::hours(2), DeliveryStatus::Sent));
        repo.add_record(record_at(now() - Duration::hours(3), DeliveryStatus::Failed));
        repo.add_record(record_at(now() - Duration::days(3), DeliveryStatus::Sent));

        let stats = logger(&repo)
            .stats(now() - Duration::days(1), now())
            .await
            .unwrap();

        assert_eq!(stats.total_sent, 2);
        assert_eq!(stats.total_failed, 1);
    }

    #[tokio::test]
    async fn test_逆転した期間は拒否する() {
        let repo = MockDeliveryRecordRepository::new();

        let result = logger(&repo).stats(now(), now() - Duration::days(1)).await;

        assert!(matches!(result, Err(NotifierError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_保持期間を過ぎた記録だけを削除する() {
        let repo = MockDeliveryRecordRepository::new();
        repo.add_record(record_at(now() - Duration::days(120), DeliveryStatus::Sent));
        repo.add_record(record_at(now() - Duration::days(10), DeliveryStatus::Sent));

        let deleted = logger(&repo).purge_older_than(90).await.unwrap();

        assert_eq!(deleted, 1);
        assert_eq!(repo.records().len(), 1);
    }

    #[tokio::test]
    async fn test_下限日数未満の削除は拒否して何も消さない() {
        let repo = MockDeliveryRecordRepository::new();
        repo.add_record(record_at(now() - Duration::days(120), DeliveryStatus::Sent));

        let result = logger(&repo).purge_older_than(7).await;

        assert!(matches!(result, Err(NotifierError::InvalidRequest(_))));
        assert_eq!(repo.records().len(), 1);
    }
}
