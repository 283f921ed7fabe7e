//! 結合テスト用のセットアップ
//!
//! モックの依存から本番と同じ組み立て（[`Components::build`]）でユースケースを作る。
//! テストバイナリごとに使う項目が異なるため、未使用警告は抑止する。

#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use chrono::{TimeZone, Utc};
use renthub_domain::{
   campaign::{BatchPlan, CampaignType},
   clock::ManualClock,
   delivery::{DeliveryRequest, EmailType},
   otp::OtpPolicy,
   rate_limit::QuotaTable,
};
use renthub_infra::{
   InMemoryTokenBlacklist,
   mock::{
      MockAuditEventRepository,
      MockCampaignRepository,
      MockDeliveryRecordRepository,
      MockMailTransport,
      MockOneTimeCodeRepository,
      MockVerificationHook,
   },
};
use renthub_notifier::{
   app_builder::{Components, Dependencies},
   usecase::{CampaignJob, CampaignRecipient, CampaignTemplate, RetryPolicy},
};
use serde_json::{Map, Value};

pub struct TestSetup {
   pub clock:      Arc<ManualClock>,
   pub transport:  MockMailTransport,
   pub records:    MockDeliveryRecordRepository,
   pub campaigns:  MockCampaignRepository,
   pub audit:      MockAuditEventRepository,
   pub codes:      MockOneTimeCodeRepository,
   pub hook:       MockVerificationHook,
   pub components: Components,
}

impl TestSetup {
   /// 既定の設定（3 回試行・1 秒から倍々の待ち時間・ロール別上限 6/8/10）で組み立てる
   pub fn new() -> Self {
      let clock = Arc::new(ManualClock::new(
         Utc.with_ymd_and_hms(2026, 5, 1, 10, 0, 0).unwrap(),
      ));
      let transport = MockMailTransport::new();
      let records = MockDeliveryRecordRepository::new();
      let campaigns = MockCampaignRepository::new();
      let audit = MockAuditEventRepository::new();
      let codes = MockOneTimeCodeRepository::new();
      let hook = MockVerificationHook::new();

      let components = Components::build(Dependencies {
         transport:        Arc::new(transport.clone()),
         delivery_records: Arc::new(records.clone()),
         campaigns:        Arc::new(campaigns.clone()),
         audit_events:     Arc::new(audit.clone()),
         codes:            Arc::new(codes.clone()),
         blacklist:        Arc::new(InMemoryTokenBlacklist::new()),
         hook:             Some(Arc::new(hook.clone())),
         clock:            clock.clone(),
         retry:            RetryPolicy::default(),
         quotas:           QuotaTable::default(),
         otp_policy:       OtpPolicy::default(),
      })
      .unwrap();

      Self {
         clock,
         transport,
         records,
         campaigns,
         audit,
         codes,
         hook,
         components,
      }
   }

   /// 最後に発行されたコード
   pub fn latest_code(&self) -> String {
      self.codes.codes().last().unwrap().code().as_str().to_string()
   }
}

pub fn welcome(to: &str) -> DeliveryRequest {
   DeliveryRequest::new(to, "RentHub へようこそ", EmailType::Welcome, "welcome")
      .with_data("login_url", "https://renthub.example.com/login")
}

pub fn recipient_address(i: usize) -> String {
   format!("guest{i}@example.com")
}

pub fn campaign_job(recipients: usize, batch_size: usize, delay: Duration) -> CampaignJob {
   let template = CampaignTemplate {
      subject:       "週末の特集".to_string(),
      template_name: "campaign".to_string(),
      template_data: Map::from_iter([("body".to_string(), Value::from("海の見える宿"))]),
   };
   let recipients = (0..recipients)
      .map(|i| CampaignRecipient {
         email:   recipient_address(i),
         name:    None,
         user_id: None,
      })
      .collect();
   CampaignJob::new("Weekend Picks", CampaignType::Newsletter, template, recipients)
      .with_plan(BatchPlan::new(batch_size, delay).unwrap())
}
