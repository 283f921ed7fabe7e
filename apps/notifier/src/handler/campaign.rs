//! # キャンペーン API ハンドラ
//!
//! キャンペーンの投入と、状態・配信記録の参照エンドポイントを実装する。
//!
//! 投入はキューに積むだけで、レスポンスは配信完了を待たずに返る。
//! 進捗は `GET /internal/campaigns/{id}` の `stats` で確認する。

use std::{sync::Arc, time::Duration};

use axum::{
   Json,
   extract::{Path, Query, State},
   http::StatusCode,
   response::{IntoResponse, Response},
};
use renthub_domain::{
   campaign::{BatchPlan, Campaign, CampaignId, CampaignStats, CampaignType},
   delivery::DeliveryRecord,
   recipient::UserId,
};
use renthub_shared::ApiResponse;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{
   error::NotifierError,
   usecase::{
      BatchCampaignRunner,
      CampaignJob,
      CampaignRecipient,
      CampaignTemplate,
      DeliveryLogger,
      DeliveryQueue,
      DeliveryTask,
      EnqueueOptions,
      TaskHandle,
   },
};

const DEFAULT_LIST_LIMIT: u32 = 20;

fn default_template_name() -> String {
   "campaign".to_string()
}

/// キャンペーンハンドラーの State
pub struct CampaignState {
   pub runner: BatchCampaignRunner,
   pub logger: DeliveryLogger,
   pub queue:  DeliveryQueue,
}

/// キャンペーン投入リクエスト
#[derive(Debug, Deserialize)]
pub struct CreateCampaignRequest {
   pub name:                 String,
   pub campaign_type:        CampaignType,
   pub subject:              String,
   #[serde(default = "default_template_name")]
   pub template_name:        String,
   #[serde(default)]
   pub template_data:        Map<String, Value>,
   pub recipients:           Vec<CampaignRecipient>,
   #[serde(default)]
   pub target_audience:      Option<String>,
   #[serde(default)]
   pub created_by:           Option<Uuid>,
   /// 省略時はキャンペーン種別の既定値
   #[serde(default)]
   pub batch_size:           Option<usize>,
   #[serde(default)]
   pub inter_batch_delay_ms: Option<u64>,
   #[serde(default)]
   pub priority:             i32,
   #[serde(default)]
   pub delay_ms:             u64,
}

impl CreateCampaignRequest {
   fn into_job(self) -> Result<(CampaignJob, EnqueueOptions), NotifierError> {
      let defaults = BatchPlan::for_campaign_type(self.campaign_type);
      let plan = BatchPlan::new(
         self.batch_size.unwrap_or(defaults.batch_size()),
         self
            .inter_batch_delay_ms
            .map_or(defaults.inter_batch_delay(), Duration::from_millis),
      )?;

      let template = CampaignTemplate {
         subject:       self.subject,
         template_name: self.template_name,
         template_data: self.template_data,
      };
      let mut job = CampaignJob::new(self.name, self.campaign_type, template, self.recipients)
         .with_plan(plan);
      if let Some(audience) = self.target_audience {
         job = job.with_target_audience(audience);
      }
      if let Some(user_id) = self.created_by {
         job = job.created_by(UserId::from_uuid(user_id));
      }

      let options = EnqueueOptions {
         delay:    Duration::from_millis(self.delay_ms),
         priority: self.priority,
      };
      Ok((job, options))
   }
}

/// キャンペーン投入の結果 DTO
#[derive(Debug, Serialize)]
pub struct CampaignAcceptedDto {
   pub campaign_id: CampaignId,
   pub task:        TaskHandle,
}

/// キャンペーン DTO
#[derive(Debug, Serialize)]
pub struct CampaignDto {
   pub id:              String,
   pub name:            String,
   pub campaign_type:   String,
   pub subject:         String,
   pub status:          String,
   pub target_audience: Option<String>,
   pub stats:           CampaignStats,
   pub created_by:      Option<String>,
   pub created_at:      String,
   pub sent_at:         Option<String>,
}

impl From<&Campaign> for CampaignDto {
   fn from(campaign: &Campaign) -> Self {
      Self {
         id:              campaign.id().to_string(),
         name:            campaign.name().to_string(),
         campaign_type:   campaign.campaign_type().to_string(),
         subject:         campaign.subject().to_string(),
         status:          campaign.status().to_string(),
         target_audience: campaign.target_audience().map(str::to_string),
         stats:           campaign.stats(),
         created_by:      campaign.created_by().map(ToString::to_string),
         created_at:      campaign.created_at().to_rfc3339(),
         sent_at:         campaign.sent_at().map(|t| t.to_rfc3339()),
      }
   }
}

/// 配信記録 DTO
#[derive(Debug, Serialize)]
pub struct DeliveryRecordDto {
   pub id:              String,
   pub recipient_email: String,
   pub recipient_name:  Option<String>,
   pub subject:         String,
   pub email_type:      String,
   pub template_name:   String,
   pub status:          String,
   pub error_message:   Option<String>,
   pub attempts:        u32,
   pub created_at:      String,
}

impl From<&DeliveryRecord> for DeliveryRecordDto {
   fn from(record: &DeliveryRecord) -> Self {
      Self {
         id:              record.id.to_string(),
         recipient_email: record.recipient_email.clone(),
         recipient_name:  record.recipient_name.clone(),
         subject:         record.subject.clone(),
         email_type:      record.email_type.to_string(),
         template_name:   record.template_name.clone(),
         status:          record.status.to_string(),
         error_message:   record.error_message.clone(),
         attempts:        record.attempts,
         created_at:      record.created_at.to_rfc3339(),
      }
   }
}

/// 一覧のクエリパラメータ
#[derive(Debug, Deserialize)]
pub struct ListQuery {
   pub limit: Option<u32>,
}

/// キャンペーンをキューに積む
///
/// キャンペーン名・件名・テンプレートの不備は投入前に 400 で返す。
/// 宛先ごとの不備は配信時に失敗として記録される。
///
/// ## エンドポイント
/// POST /internal/campaigns
#[tracing::instrument(skip_all)]
pub async fn create_campaign(
   State(state): State<Arc<CampaignState>>,
   Json(body): Json<CreateCampaignRequest>,
) -> Result<Response, NotifierError> {
   let (job, options) = body.into_job()?;
   state.runner.validate(&job)?;

   let campaign_id = job.campaign_id.clone();
   let task = state.queue.enqueue(DeliveryTask::Campaign(job), options);

   let response = ApiResponse::new(CampaignAcceptedDto { campaign_id, task });
   Ok((StatusCode::ACCEPTED, Json(response)).into_response())
}

/// 最近のキャンペーン一覧を取得する
///
/// ## エンドポイント
/// GET /internal/campaigns?limit={limit}
pub async fn list_campaigns(
   State(state): State<Arc<CampaignState>>,
   Query(query): Query<ListQuery>,
) -> Result<Response, NotifierError> {
   let campaigns = state
      .runner
      .recent(query.limit.unwrap_or(DEFAULT_LIST_LIMIT))
      .await?;

   let response = ApiResponse::new(campaigns.iter().map(CampaignDto::from).collect::<Vec<_>>());
   Ok((StatusCode::OK, Json(response)).into_response())
}

/// キャンペーンの状態と集計を取得する
///
/// ## エンドポイント
/// GET /internal/campaigns/{id}
pub async fn get_campaign(
   State(state): State<Arc<CampaignState>>,
   Path(id): Path<Uuid>,
) -> Result<Response, NotifierError> {
   let campaign = state.runner.find(&CampaignId::from_uuid(id)).await?;

   Ok((StatusCode::OK, Json(ApiResponse::new(CampaignDto::from(&campaign)))).into_response())
}

/// キャンペーンの配信記録を取得する
///
/// ## エンドポイント
/// GET /internal/campaigns/{id}/deliveries
pub async fn list_campaign_deliveries(
   State(state): State<Arc<CampaignState>>,
   Path(id): Path<Uuid>,
) -> Result<Response, NotifierError> {
   let campaign_id = CampaignId::from_uuid(id);
   // 存在しないキャンペーンは空配列ではなく 404 にする
   state.runner.find(&campaign_id).await?;
   let records = state.logger.campaign_records(&campaign_id).await?;

   let response = ApiResponse::new(records.iter().map(DeliveryRecordDto::from).collect::<Vec<_>>());
   Ok((StatusCode::OK, Json(response)).into_response())
}
