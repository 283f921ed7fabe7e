//! # 一斉配信キャンペーン
//!
//! 宛先リストをバッチに分割し、バッチ単位で並行送信しながらキャンペーンの集計を更新する。
//!
//! ## 設計方針
//!
//! - **送信前に作成**: キャンペーンは `sending` 状態で保存してから送信を始める。
//!   保存に失敗した場合は 1 通も送らずに [`NotifierError::CampaignSetup`] を返す
//! - **バッチ単位の並行送信**: 1 バッチ内の送信は [`JoinSet`] で並行に実行し、
//!   すべて終わるまで待ってから次のバッチに進む
//! - **集計の加算は 1 バッチ 1 回**: バッチ内の結果を手元で数え、
//!   `increment_stats` でまとめて加算する
//! - **宛先ごとの失敗は全体を止めない**: 事前条件違反やタスクのパニックも失敗として数える
//! - **終端は常に `sent`**: 全バッチを処理し終えたら、成功数が 0 でも `sent` にする

use std::sync::Arc;

use renthub_domain::{
    campaign::{BatchPlan, Campaign, CampaignId, CampaignType, NewCampaign},
    clock::Clock,
    delivery::{DeliveryRequest, EmailType, NotificationError},
    recipient::UserId,
};
use renthub_infra::repository::CampaignRepository;
use renthub_shared::{
    event_log::{error as log_error, event},
    log_business_event,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::task::JoinSet;

use super::notification::SingleSender;
use crate::error::NotifierError;

/// キャンペーンの宛先
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignRecipient {
    pub email:   String,
    #[serde(default)]
    pub name:    Option<String>,
    #[serde(default)]
    pub user_id: Option<UserId>,
}

/// 全宛先に共通のメール内容
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignTemplate {
    pub subject:       String,
    pub template_name: String,
    #[serde(default)]
    pub template_data: Map<String, Value>,
}

/// キャンペーン 1 回分の実行依頼
#[derive(Debug, Clone, PartialEq)]
pub struct CampaignJob {
    pub campaign_id:     CampaignId,
    pub name:            String,
    pub campaign_type:   CampaignType,
    pub target_audience: Option<String>,
    pub created_by:      Option<UserId>,
    pub template:        CampaignTemplate,
    pub recipients:      Vec<CampaignRecipient>,
    pub plan:            BatchPlan,
}

impl CampaignJob {
    /// キャンペーン種別の既定のバッチ設定で実行依頼を作る
    pub fn new(
        name: impl Into<String>,
        campaign_type: CampaignType,
        template: CampaignTemplate,
        recipients: Vec<CampaignRecipient>,
    ) -> Self {
        Self {
            campaign_id: CampaignId::new(),
            name: name.into(),
            campaign_type,
            target_audience: None,
            created_by: None,
            template,
            recipients,
            plan: BatchPlan::for_campaign_type(campaign_type),
        }
    }

    pub fn with_plan(mut self, plan: BatchPlan) -> Self {
        self.plan = plan;
        self
    }

    pub fn with_target_audience(mut self, audience: impl Into<String>) -> Self {
        self.target_audience = Some(audience.into());
        self
    }

    pub fn created_by(mut self, user_id: UserId) -> Self {
        self.created_by = Some(user_id);
        self
    }

    fn request_for(&self, recipient: &CampaignRecipient) -> DeliveryRequest {
        let mut request = DeliveryRequest::new(
            recipient.email.clone(),
            self.template.subject.clone(),
            EmailType::Campaign,
            self.template.template_name.clone(),
        )
        .with_campaign(self.campaign_id.clone());
        request.template_data = self.template.template_data.clone();
        request.recipient_name = recipient.name.clone();
        request.recipient_user_id = recipient.user_id.clone();
        request.triggered_by = self.created_by.clone();
        request
    }
}

/// キャンペーンの実行結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CampaignResult {
    pub campaign_id:   CampaignId,
    pub total_users:   u32,
    pub success_count: u32,
    pub failure_count: u32,
}

/// バッチ分割でキャンペーンを配信する
#[derive(Clone)]
pub struct BatchCampaignRunner {
    sender:    SingleSender,
    campaigns: Arc<dyn CampaignRepository>,
    clock:     Arc<dyn Clock>,
}

impl BatchCampaignRunner {
    pub fn new(
        sender: SingleSender,
        campaigns: Arc<dyn CampaignRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sender,
            campaigns,
            clock,
        }
    }

    /// キューに積む前に、宛先に依存しない不備を検査する
    pub fn validate(&self, job: &CampaignJob) -> Result<(), NotifierError> {
        if job.name.trim().is_empty() {
            return Err(NotifierError::InvalidRequest(
                "キャンペーン名は必須です".to_string(),
            ));
        }
        if job.template.subject.trim().is_empty() {
            return Err(NotificationError::MissingSubject.into());
        }
        let mut probe = DeliveryRequest::new(
            "",
            job.template.subject.clone(),
            EmailType::Campaign,
            job.template.template_name.clone(),
        );
        probe.template_data = job.template.template_data.clone();
        self.sender.check_template(&probe)?;
        Ok(())
    }

    /// キャンペーンを作成し、全宛先に配信する
    #[tracing::instrument(skip_all, fields(campaign_id = %job.campaign_id))]
    pub async fn run(&self, job: CampaignJob) -> Result<CampaignResult, NotifierError> {
        let total = u32::try_from(job.recipients.len()).map_err(|_| {
            NotifierError::InvalidRequest(format!("宛先が多すぎます: {}", job.recipients.len()))
        })?;

        let mut campaign = Campaign::new(
            NewCampaign {
                id:              job.campaign_id.clone(),
                name:            job.name.clone(),
                campaign_type:   job.campaign_type,
                subject:         job.template.subject.clone(),
                target_audience: job.target_audience.clone(),
                created_by:      job.created_by.clone(),
            },
            self.clock.now(),
        )?
        .start_sending(total)?;

        if let Err(e) = self.campaigns.insert(&campaign).await {
            log_business_event!(
                event.category = event::category::CAMPAIGN,
                event.action = event::action::CAMPAIGN_FAILED,
                event.entity_type = event::entity_type::CAMPAIGN,
                event.entity_id = %job.campaign_id,
                event.result = event::result::FAILURE,
                error = %e,
                "キャンペーンの作成に失敗"
            );
            return Err(NotifierError::CampaignSetup(e.to_string()));
        }

        let batch_count = job.plan.batch_count(job.recipients.len());
        log_business_event!(
            event.category = event::category::CAMPAIGN,
            event.action = event::action::CAMPAIGN_STARTED,
            event.entity_type = event::entity_type::CAMPAIGN,
            event.entity_id = %job.campaign_id,
            event.result = event::result::SUCCESS,
            campaign.total_recipients = total,
            campaign.batch_count = batch_count,
            "キャンペーン配信開始"
        );

        let mut success_count = 0;
        let mut failure_count = 0;

        for (index, batch) in job.recipients.chunks(job.plan.batch_size()).enumerate() {
            let (sent, failed) = self.run_batch(&job, batch).await;
            success_count += sent;
            failure_count += failed;

            if let Err(e) = self.campaigns.increment_stats(&job.campaign_id, sent, failed).await {
                tracing::error!(
                    error.category = log_error::category::INFRASTRUCTURE,
                    error.kind = log_error::kind::DATABASE,
                    error = %e,
                    batch = index + 1,
                    "キャンペーン集計の加算に失敗"
                );
            }
            campaign.record_batch(sent, failed)?;

            log_business_event!(
                event.category = event::category::CAMPAIGN,
                event.action = event::action::CAMPAIGN_BATCH_COMPLETED,
                event.entity_type = event::entity_type::CAMPAIGN,
                event.entity_id = %job.campaign_id,
                event.result = event::result::SUCCESS,
                campaign.batch = index + 1,
                campaign.batch_count = batch_count,
                campaign.batch_sent = sent,
                campaign.batch_failed = failed,
                "キャンペーンのバッチ送信完了"
            );

            if index + 1 < batch_count {
                tokio::time::sleep(job.plan.inter_batch_delay()).await;
            }
        }

        campaign.complete(self.clock.now())?;
        if let Err(e) = self.campaigns.update_status(&campaign).await {
            tracing::error!(
                error.category = log_error::category::INFRASTRUCTURE,
                error.kind = log_error::kind::DATABASE,
                error = %e,
                "キャンペーン状態の保存に失敗"
            );
        }

        log_business_event!(
            event.category = event::category::CAMPAIGN,
            event.action = event::action::CAMPAIGN_COMPLETED,
            event.entity_type = event::entity_type::CAMPAIGN,
            event.entity_id = %job.campaign_id,
            event.result = event::result::SUCCESS,
            campaign.emails_sent = success_count,
            campaign.emails_failed = failure_count,
            "キャンペーン配信完了"
        );

        Ok(CampaignResult {
            campaign_id: job.campaign_id,
            total_users: total,
            success_count,
            failure_count,
        })
    }

    /// 1 バッチ分を並行に送信し、`(成功数, 失敗数)` を返す
    async fn run_batch(&self, job: &CampaignJob, batch: &[CampaignRecipient]) -> (u32, u32) {
        let mut tasks = JoinSet::new();
        for recipient in batch {
            let sender = self.sender.clone();
            let request = job.request_for(recipient);
            tasks.spawn(async move { sender.send_or_record_failure(request).await });
        }

        let mut sent = 0;
        let mut failed = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) if outcome.success => sent += 1,
                Ok(_) => failed += 1,
                Err(e) => {
                    tracing::error!(
                        error.category = log_error::category::INFRASTRUCTURE,
                        error.kind = log_error::kind::INTERNAL,
                        error = %e,
                        "送信タスクが異常終了"
                    );
                    failed += 1;
                }
            }
        }
        (sent, failed)
    }

    pub async fn find(&self, id: &CampaignId) -> Result<Campaign, NotifierError> {
        self.campaigns
            .find_by_id(id)
            .await?
            .ok_or_else(|| NotifierError::NotFound(format!("Campaign: {id}")))
    }

    pub async fn recent(&self, limit: u32) -> Result<Vec<Campaign>, NotifierError> {
        Ok(self.campaigns.find_recent(limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use renthub_domain::{campaign::CampaignStatus, clock::FixedClock};
    use renthub_infra::{
        mock::{MockCampaignRepository, MockDeliveryRecordRepository, MockMailTransport},
        transport::TransportError,
    };
    use tokio::time::Instant;

    use super::*;
    use crate::usecase::notification::{DeliveryLogger, RetryPolicy, TemplateRenderer};

    struct Fixture {
        transport: MockMailTransport,
        records:   MockDeliveryRecordRepository,
        campaigns: MockCampaignRepository,
        runner:    BatchCampaignRunner,
    }

    fn fixture() -> Fixture {
        let transport = MockMailTransport::new();
        let records = MockDeliveryRecordRepository::new();
        let campaigns = MockCampaignRepository::new();
        let clock: Arc<dyn Clock> =
            Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 7, 1, 10, 0, 0).unwrap()));
        let sender = SingleSender::new(
            Arc::new(transport.clone()),
            Arc::new(TemplateRenderer::new().unwrap()),
            DeliveryLogger::new(Arc::new(records.clone()), clock.clone()),
            RetryPolicy::new(1, Duration::from_secs(1), Duration::from_secs(1)).unwrap(),
        );
        let runner = BatchCampaignRunner::new(sender, Arc::new(campaigns.clone()), clock);
        Fixture {
            transport,
            records,
            campaigns,
            runner,
        }
    }

    fn recipients(n: usize) -> Vec<CampaignRecipient> {
        (0..n)
            .map(|i| CampaignRecipient {
                email:   format!("tenant{i}@example.com"),
                name:    Some(format!("入居者{i}")),
                user_id: None,
            })
            .collect()
    }

    fn job(n: usize, batch_size: usize) -> CampaignJob {
        let template = CampaignTemplate {
            subject:       "夏の特集".to_string(),
            template_name: "campaign".to_string(),
            template_data: Map::from_iter([("body".to_string(), Value::from("海辺の物件"))]),
        };
        CampaignJob::new("Summer Stays", CampaignType::Seasonal, template, recipients(n))
            .with_plan(BatchPlan::new(batch_size, Duration::from_secs(2)).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_全宛先に送信してキャンペーンがsentになる() {
        let f = fixture();
        let job = job(5, 2);
        let id = job.campaign_id.clone();

        let result = f.runner.run(job).await.unwrap();

        assert_eq!(result.total_users, 5);
        assert_eq!(result.success_count, 5);
        assert_eq!(result.failure_count, 0);
        let stored = f.campaigns.get(&id).unwrap();
        assert_eq!(stored.status(), CampaignStatus::Sent);
        assert_eq!(stored.stats().emails_sent, 5);
        assert!(stored.sent_at().is_some());
        assert_eq!(f.records.records().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_集計はバッチごとに1回ずつ加算される() {
        let f = fixture();

        f.runner.run(job(5, 2)).await.unwrap();

        assert_eq!(f.campaigns.increments(), vec![(2, 0), (2, 0), (1, 0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_待機はバッチの間だけ入る() {
        let f = fixture();
        let started = Instant::now();

        f.runner.run(job(5, 2)).await.unwrap();

        assert_eq!(started.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_同時送信数はバッチサイズを超えない() {
        let f = fixture();
        f.transport.set_latency(Duration::from_millis(100));

        f.runner.run(job(7, 3)).await.unwrap();

        assert_eq!(f.transport.max_in_flight(), 3);
        assert_eq!(f.transport.call_count(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_全件失敗してもsentで終わる() {
        let f = fixture();
        f.transport.fail_next(3, TransportError::Permanent("550".to_string()));
        let job = job(3, 10);
        let id = job.campaign_id.clone();

        let result = f.runner.run(job).await.unwrap();

        assert_eq!(result.success_count, 0);
        assert_eq!(result.failure_count, 3);
        let stored = f.campaigns.get(&id).unwrap();
        assert_eq!(stored.status(), CampaignStatus::Sent);
        assert_eq!(stored.stats().emails_failed, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_宛先の不備は失敗として数えて記録も残す() {
        let f = fixture();
        let mut job = job(3, 10);
        job.recipients[1].email = "broken".to_string();

        let result = f.runner.run(job).await.unwrap();

        assert_eq!(result.success_count, 2);
        assert_eq!(result.failure_count, 1);
        assert_eq!(f.records.records().len(), 3);
        assert_eq!(f.transport.call_count(), 2);
    }

    #[tokio::test]
    async fn test_作成に失敗したら1通も送らない() {
        let f = fixture();
        f.campaigns.fail_insert(true);

        let result = f.runner.run(job(3, 10)).await;

        assert!(matches!(result, Err(NotifierError::CampaignSetup(_))));
        assert_eq!(f.transport.call_count(), 0);
        assert!(f.records.records().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_途中の加算に失敗しても完了時の集計は総数と一致する() {
        // Arrange
        let f = fixture();
        f.campaigns.fail_next_increments(1);
        let job = job(4, 2);
        let id = job.campaign_id.clone();

        // Act
        let result = f.runner.run(job).await.unwrap();

        // Assert
        assert_eq!(result.success_count, 4);
        assert_eq!(f.campaigns.increments(), vec![(2, 0)]);
        let stored = f.campaigns.get(&id).unwrap();
        assert_eq!(stored.status(), CampaignStatus::Sent);
        assert_eq!(stored.stats().emails_sent, 4);
        assert_eq!(stored.stats().processed(), stored.stats().total_recipients);
    }

    #[tokio::test]
    async fn test_配信記録にキャンペーンidが入る() {
        let f = fixture();
        let job = job(1, 10);
        let id = job.campaign_id.clone();

        f.runner.run(job).await.unwrap();

        assert_eq!(f.records.records()[0].campaign_id, Some(id));
    }

    #[test]
    fn test_未登録のテンプレートは投入前に検出する() {
        let f = fixture();
        let mut job = job(1, 10);
        job.template.template_name = "newsletter_v2".to_string();

        let result = f.runner.validate(&job);

        assert!(matches!(
            result,
            Err(NotifierError::Template(NotificationError::UnknownTemplate(_)))
        ));
    }

    #[test]
    fn test_本文のないキャンペーンは投入前に検出する() {
        let f = fixture();
        let mut job = job(1, 10);
        job.template.template_data.clear();

        assert!(f.runner.validate(&job).is_err());
        assert!(f.runner.validate(&self::job(1, 10)).is_ok());
    }

    #[tokio::test]
    async fn test_存在しないキャンペーンはnot_found() {
        let f = fixture();

        let result = f.runner.find(&CampaignId::new()).await;

        assert!(matches!(result, Err(NotifierError::NotFound(_))));
    }

    #[test]
    fn test_既定のバッチ設定はキャンペーン種別で決まる() {
        let template = CampaignTemplate {
            subject:       "お久しぶりです".to_string(),
            template_name: "campaign".to_string(),
            template_data: Map::new(),
        };

        let job = CampaignJob::new("Win back", CampaignType::Retention, template, recipients(1));

        assert_eq!(job.plan.batch_size(), 30);
        assert_eq!(job.plan.inter_batch_delay(), Duration::from_secs(3));
    }
}
