//! # アプリケーション構築
//!
//! DI（ユースケース・State）の初期化とルーター構築を担当する。
//! `main.rs` はインフラ初期化とサーバー起動に集中する。
//!
//! ## 設計方針
//!
//! - **依存はトレイトオブジェクトで受け取る**: テストではモックを渡して同じルーターを組み立てる
//! - **ユースケースは 1 度だけ組み立てる**: キューと HTTP ハンドラが同じ送信者・実行者を共有する

use std::sync::Arc;

use axum::{
   Router,
   routing::{delete, get, post},
};
use renthub_domain::{
   clock::Clock,
   delivery::NotificationError,
   otp::OtpPolicy,
   rate_limit::QuotaTable,
};
use renthub_infra::{
   MailTransport,
   TokenBlacklist,
   VerificationHook,
   repository::{
      AuditEventRepository,
      CampaignRepository,
      DeliveryRecordRepository,
      OneTimeCodeRepository,
   },
};
use tower_http::trace::TraceLayer;

use crate::{
   handler::{
      CampaignState,
      NotificationState,
      OtpState,
      QueueState,
      ReadinessState,
      cancel_task,
      consume_otp,
      create_campaign,
      get_campaign,
      get_delivery_stats,
      get_otp_history,
      get_queue_stats,
      health_check,
      issue_otp,
      list_campaign_deliveries,
      list_campaigns,
      purge_delivery_records,
      queue_notification,
      readiness_check,
      resend_otp,
      send_notification,
      verify_otp,
   },
   usecase::{
      BatchCampaignRunner,
      DeliveryDispatcher,
      DeliveryLogger,
      DeliveryQueue,
      OtpIssuer,
      RateLimiter,
      RetryPolicy,
      SingleSender,
      TemplateRenderer,
   },
};

/// インフラ初期化済みの依存
pub struct Dependencies {
   pub transport:        Arc<dyn MailTransport>,
   pub delivery_records: Arc<dyn DeliveryRecordRepository>,
   pub campaigns:        Arc<dyn CampaignRepository>,
   pub audit_events:     Arc<dyn AuditEventRepository>,
   pub codes:            Arc<dyn OneTimeCodeRepository>,
   pub blacklist:        Arc<dyn TokenBlacklist>,
   pub hook:             Option<Arc<dyn VerificationHook>>,
   pub clock:            Arc<dyn Clock>,
   pub retry:            RetryPolicy,
   pub quotas:           QuotaTable,
   pub otp_policy:       OtpPolicy,
}

/// 組み立て済みのユースケース
#[derive(Clone)]
pub struct Components {
   pub sender: SingleSender,
   pub logger: DeliveryLogger,
   pub runner: BatchCampaignRunner,
   pub queue:  DeliveryQueue,
   pub issuer: OtpIssuer,
   pub clock:  Arc<dyn Clock>,
}

impl Components {
   /// 依存からユースケースを組み立てる
   ///
   /// テンプレートの読み込みに失敗した場合はエラーを返す。
   pub fn build(deps: Dependencies) -> Result<Self, NotificationError> {
      let renderer = Arc::new(TemplateRenderer::new()?);
      let logger = DeliveryLogger::new(deps.delivery_records, deps.clock.clone());
      let sender = SingleSender::new(deps.transport, renderer, logger.clone(), deps.retry);
      let runner = BatchCampaignRunner::new(sender.clone(), deps.campaigns, deps.clock.clone());
      let queue = DeliveryQueue::new(Arc::new(DeliveryDispatcher::new(
         sender.clone(),
         runner.clone(),
      )));

      let limiter = RateLimiter::new(deps.audit_events, deps.quotas, deps.clock.clone());
      let mut issuer = OtpIssuer::new(
         deps.codes,
         limiter,
         sender.clone(),
         deps.blacklist,
         deps.otp_policy,
         deps.clock.clone(),
      );
      if let Some(hook) = deps.hook {
         issuer = issuer.with_hook(hook);
      }

      Ok(Self {
         sender,
         logger,
         runner,
         queue,
         issuer,
         clock: deps.clock,
      })
   }
}

/// ルーターを構築する
pub fn build_router(components: &Components, readiness_state: Arc<ReadinessState>) -> Router {
   let notification_state = Arc::new(NotificationState {
      sender: components.sender.clone(),
      logger: components.logger.clone(),
      queue:  components.queue.clone(),
      clock:  components.clock.clone(),
   });
   let campaign_state = Arc::new(CampaignState {
      runner: components.runner.clone(),
      logger: components.logger.clone(),
      queue:  components.queue.clone(),
   });
   let otp_state = Arc::new(OtpState {
      issuer: components.issuer.clone(),
   });
   let queue_state = Arc::new(QueueState {
      queue: components.queue.clone(),
   });

   Router::new()
      .route("/health", get(health_check))
      .merge(
         Router::new()
            .route("/health/ready", get(readiness_check))
            .with_state(readiness_state),
      )
      // 通知 API
      .merge(
         Router::new()
            .route("/internal/notifications", post(send_notification))
            .route("/internal/notifications/queue", post(queue_notification))
            .route("/internal/notifications/stats", get(get_delivery_stats))
            .route(
               "/internal/notifications/retention",
               delete(purge_delivery_records),
            )
            .with_state(notification_state),
      )
      // キャンペーン API
      .merge(
         Router::new()
            .route(
               "/internal/campaigns",
               post(create_campaign).get(list_campaigns),
            )
            .route("/internal/campaigns/{id}", get(get_campaign))
            .route(
               "/internal/campaigns/{id}/deliveries",
               get(list_campaign_deliveries),
            )
            .with_state(campaign_state),
      )
      // ワンタイムコード API
      .merge(
         Router::new()
            .route("/internal/otp/issue", post(issue_otp))
            .route("/internal/otp/resend", post(resend_otp))
            .route("/internal/otp/verify", post(verify_otp))
            .route("/internal/otp/consume", post(consume_otp))
            .route("/internal/otp/history", get(get_otp_history))
            .with_state(otp_state),
      )
      // キュー API
      .merge(
         Router::new()
            .route("/internal/queue/stats", get(get_queue_stats))
            .route("/internal/queue/tasks/{id}", delete(cancel_task))
            .with_state(queue_state),
      )
      .layer(TraceLayer::new_for_http())
}
