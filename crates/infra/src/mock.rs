//! # テスト用モック
//!
//! ユースケーステストで使用するインメモリのリポジトリ・トランスポート。
//! `test-utils` feature を有効にすることで、他クレートからも利用可能。
//!
//! ```toml
//! [dev-dependencies]
//! renthub-infra = { workspace = true, features = ["test-utils"] }
//! ```

use std::{
   collections::{HashMap, VecDeque},
   sync::{
      Arc,
      Mutex,
      atomic::{AtomicBool, AtomicUsize, Ordering},
   },
   time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use renthub_domain::{
   audit_event::{AuditAction, AuditEvent},
   campaign::{Campaign, CampaignId, CampaignStats},
   delivery::{DeliveryCount, DeliveryRecord, EmailMessage},
   otp::{OneTimeCode, OneTimeCodeId},
   rate_limit::Role,
   recipient::Email,
};

use crate::{
   error::InfraError,
   repository::{
      AuditEventRepository,
      CampaignRepository,
      DeliveryRecordRepository,
      OneTimeCodeRepository,
   },
   transport::{MailTransport, TransportError, TransportReceipt},
   webhook::{VerificationEvent, VerificationHook},
};

// ===== MockMailTransport =====

/// 呼び出しごとの結果を台本として与えられるトランスポート
///
/// - `script`: 先頭から 1 件ずつ消費する。空になったら成功を返す
/// - `failing_addresses`: 宛先ごとに常に返すエラー（台本より優先）
/// - `latency`: 1 回の送信にかかる時間（tokio の時間を進めるテストで使う）
#[derive(Clone, Default)]
pub struct MockMailTransport {
   script:            Arc<Mutex<VecDeque<Result<TransportReceipt, TransportError>>>>,
   failing_addresses: Arc<Mutex<HashMap<String, TransportError>>>,
   delivered:         Arc<Mutex<Vec<EmailMessage>>>,
   calls:             Arc<AtomicUsize>,
   in_flight:         Arc<AtomicUsize>,
   max_in_flight:     Arc<AtomicUsize>,
   latency:           Arc<Mutex<Option<Duration>>>,
}

impl MockMailTransport {
   pub fn new() -> Self {
      Self::default()
   }

   /// 次の呼び出し結果を台本の末尾に積む
   pub fn push_result(&self, result: Result<TransportReceipt, TransportError>) {
      self.script.lock().unwrap().push_back(result);
   }

   /// 次の `n` 回の呼び出しを同じエラーで失敗させる
   pub fn fail_next(&self, n: usize, error: TransportError) {
      let mut script = self.script.lock().unwrap();
      for _ in 0..n {
         script.push_back(Err(error.clone()));
      }
   }

   /// 宛先への送信を常に失敗させる
   pub fn fail_address(&self, address: &str, error: TransportError) {
      self.failing_addresses
         .lock()
         .unwrap()
         .insert(address.to_lowercase(), error);
   }

   pub fn set_latency(&self, latency: Duration) {
      *self.latency.lock().unwrap() = Some(latency);
   }

   /// 成功した送信のメッセージ
   pub fn delivered(&self) -> Vec<EmailMessage> {
      self.delivered.lock().unwrap().clone()
   }

   /// 成功・失敗を問わない呼び出し回数
   pub fn call_count(&self) -> usize {
      self.calls.load(Ordering::SeqCst)
   }

   /// 同時に実行中だった送信の最大数
   pub fn max_in_flight(&self) -> usize {
      self.max_in_flight.load(Ordering::SeqCst)
   }
}

#[async_trait]
impl MailTransport for MockMailTransport {
   async fn send(&self, email: &EmailMessage) -> Result<TransportReceipt, TransportError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
      self.max_in_flight.fetch_max(current, Ordering::SeqCst);

      let latency = *self.latency.lock().unwrap();
      if let Some(latency) = latency {
         tokio::time::sleep(latency).await;
      }

      let address_failure = self
         .failing_addresses
         .lock()
         .unwrap()
         .get(&email.to.to_lowercase())
         .cloned();
      let result = match address_failure {
         Some(error) => Err(error),
         None => self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(TransportReceipt::default())),
      };

      if result.is_ok() {
         self.delivered.lock().unwrap().push(email.clone());
      }
      self.in_flight.fetch_sub(1, Ordering::SeqCst);
      result
   }
}

// ===== MockDeliveryRecordRepository =====

#[derive(Clone, Default)]
pub struct MockDeliveryRecordRepository {
   records:      Arc<Mutex<Vec<DeliveryRecord>>>,
   fail_inserts: Arc<AtomicBool>,
}

impl MockDeliveryRecordRepository {
   pub fn new() -> Self {
      Self::default()
   }

   /// 以降の書き込みを失敗させる
   pub fn fail_inserts(&self, fail: bool) {
      self.fail_inserts.store(fail, Ordering::SeqCst);
   }

   pub fn records(&self) -> Vec<DeliveryRecord> {
      self.records.lock().unwrap().clone()
   }

   pub fn add_record(&self, record: DeliveryRecord) {
      self.records.lock().unwrap().push(record);
   }
}

#[async_trait]
impl DeliveryRecordRepository for MockDeliveryRecordRepository {
   async fn insert(&self, record: &DeliveryRecord) -> Result<(), InfraError> {
      if self.fail_inserts.load(Ordering::SeqCst) {
         return Err(InfraError::unexpected("配信記録の書き込みに失敗しました"));
      }
      self.records.lock().unwrap().push(record.clone());
      Ok(())
   }

   async fn find_by_campaign(
      &self,
      campaign_id: &CampaignId,
   ) -> Result<Vec<DeliveryRecord>, InfraError> {
      Ok(self
         .records
         .lock()
         .unwrap()
         .iter()
         .filter(|r| r.campaign_id.as_ref() == Some(campaign_id))
         .cloned()
         .collect())
   }

   async fn count_by_type_and_status(
      &self,
      since: DateTime<Utc>,
      until: DateTime<Utc>,
   ) -> Result<Vec<DeliveryCount>, InfraError> {
      let records = self.records.lock().unwrap();
      let mut counts: Vec<DeliveryCount> = Vec::new();
      for record in records
         .iter()
         .filter(|r| r.created_at >= since && r.created_at < until)
      {
         match counts
            .iter_mut()
            .find(|c| c.email_type == record.email_type && c.status == record.status)
         {
            Some(count) => count.count += 1,
            None => counts.push(DeliveryCount {
               email_type: record.email_type,
               status:     record.status,
               count:      1,
            }),
         }
      }
      Ok(counts)
   }

   async fn delete_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64, InfraError> {
      let mut records = self.records.lock().unwrap();
      let before = records.len();
      records.retain(|r| r.created_at >= cutoff);
      Ok((before - records.len()) as u64)
   }
}

// ===== MockCampaignRepository =====

#[derive(Clone, Default)]
pub struct MockCampaignRepository {
   campaigns:          Arc<Mutex<Vec<Campaign>>>,
   increments:         Arc<Mutex<Vec<(u32, u32)>>>,
   fail_insert:        Arc<AtomicBool>,
   increment_failures: Arc<AtomicUsize>,
}

impl MockCampaignRepository {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn fail_insert(&self, fail: bool) {
      self.fail_insert.store(fail, Ordering::SeqCst);
   }

   /// 次の `n` 回の `increment_stats` を失敗させる
   pub fn fail_next_increments(&self, n: usize) {
      self.increment_failures.store(n, Ordering::SeqCst);
   }

   pub fn get(&self, id: &CampaignId) -> Option<Campaign> {
      self.campaigns
         .lock()
         .unwrap()
         .iter()
         .find(|c| c.id() == id)
         .cloned()
   }

   /// `increment_stats` に渡された `(sent, failed)` の履歴
   pub fn increments(&self) -> Vec<(u32, u32)> {
      self.increments.lock().unwrap().clone()
   }
}

#[async_trait]
impl CampaignRepository for MockCampaignRepository {
   async fn insert(&self, campaign: &Campaign) -> Result<(), InfraError> {
      if self.fail_insert.load(Ordering::SeqCst) {
         return Err(InfraError::unexpected("キャンペーンの書き込みに失敗しました"));
      }
      let mut campaigns = self.campaigns.lock().unwrap();
      if campaigns.iter().any(|c| c.id() == campaign.id()) {
         return Err(InfraError::conflict("Campaign", campaign.id().to_string()));
      }
      campaigns.push(campaign.clone());
      Ok(())
   }

   async fn find_by_id(&self, id: &CampaignId) -> Result<Option<Campaign>, InfraError> {
      Ok(self.get(id))
   }

   async fn find_recent(&self, limit: u32) -> Result<Vec<Campaign>, InfraError> {
      let mut campaigns = self.campaigns.lock().unwrap().clone();
      campaigns.sort_by_key(|c| std::cmp::Reverse(c.created_at()));
      campaigns.truncate(limit as usize);
      Ok(campaigns)
   }

   async fn increment_stats(
      &self,
      id: &CampaignId,
      sent: u32,
      failed: u32,
   ) -> Result<CampaignStats, InfraError> {
      if self
         .increment_failures
         .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
         .is_ok()
      {
         return Err(InfraError::unexpected("集計の加算に失敗しました"));
      }
      let mut campaigns = self.campaigns.lock().unwrap();
      let campaign = campaigns
         .iter_mut()
         .find(|c| c.id() == id)
         .ok_or_else(|| InfraError::conflict("Campaign", id.to_string()))?;
      campaign
         .record_batch(sent, failed)
         .map_err(|_| InfraError::conflict("Campaign", id.to_string()))?;
      self.increments.lock().unwrap().push((sent, failed));
      Ok(campaign.stats())
   }

   async fn update_status(&self, campaign: &Campaign) -> Result<(), InfraError> {
      let mut campaigns = self.campaigns.lock().unwrap();
      let stored = campaigns
         .iter_mut()
         .find(|c| c.id() == campaign.id())
         .ok_or_else(|| InfraError::conflict("Campaign", campaign.id().to_string()))?;
      *stored = Campaign::from_db(
         stored.id().clone(),
         stored.name().to_string(),
         stored.campaign_type(),
         stored.subject().to_string(),
         campaign.status(),
         stored.target_audience().map(str::to_string),
         campaign.stats(),
         stored.created_by().cloned(),
         stored.created_at(),
         campaign.sent_at(),
      );
      Ok(())
   }
}

// ===== MockAuditEventRepository =====

#[derive(Clone, Default)]
pub struct MockAuditEventRepository {
   events:       Arc<Mutex<Vec<AuditEvent>>>,
   fail_reads:   Arc<AtomicBool>,
   fail_inserts: Arc<AtomicBool>,
}

impl MockAuditEventRepository {
   pub fn new() -> Self {
      Self::default()
   }

   /// `count_since` を失敗させる
   pub fn fail_reads(&self, fail: bool) {
      self.fail_reads.store(fail, Ordering::SeqCst);
   }

   pub fn fail_inserts(&self, fail: bool) {
      self.fail_inserts.store(fail, Ordering::SeqCst);
   }

   pub fn events(&self) -> Vec<AuditEvent> {
      self.events.lock().unwrap().clone()
   }
}

#[async_trait]
impl AuditEventRepository for MockAuditEventRepository {
   async fn insert(&self, event: &AuditEvent) -> Result<(), InfraError> {
      if self.fail_inserts.load(Ordering::SeqCst) {
         return Err(InfraError::unexpected("監査イベントの書き込みに失敗しました"));
      }
      self.events.lock().unwrap().push(event.clone());
      Ok(())
   }

   async fn count_since(
      &self,
      identity: &Email,
      action: AuditAction,
      role: Role,
      since: DateTime<Utc>,
   ) -> Result<u32, InfraError> {
      if self.fail_reads.load(Ordering::SeqCst) {
         return Err(InfraError::unexpected("監査イベントの読み取りに失敗しました"));
      }
      let count = self
         .events
         .lock()
         .unwrap()
         .iter()
         .filter(|e| e.matches(identity, action, role) && e.created_at > since)
         .count();
      Ok(count as u32)
   }

   async fn find_by_identity(
      &self,
      identity: &Email,
      limit: u32,
   ) -> Result<Vec<AuditEvent>, InfraError> {
      let mut events: Vec<AuditEvent> = self
         .events
         .lock()
         .unwrap()
         .iter()
         .filter(|e| &e.identity == identity)
         .cloned()
         .collect();
      events.sort_by_key(|e| std::cmp::Reverse((e.created_at, e.id)));
      events.truncate(limit as usize);
      Ok(events)
   }
}

// ===== MockOneTimeCodeRepository =====

#[derive(Clone, Default)]
pub struct MockOneTimeCodeRepository {
   codes: Arc<Mutex<Vec<OneTimeCode>>>,
}

impl MockOneTimeCodeRepository {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn codes(&self) -> Vec<OneTimeCode> {
      self.codes.lock().unwrap().clone()
   }

   fn update_flags(
      &self,
      id: &OneTimeCodeId,
      now: DateTime<Utc>,
      applies: impl Fn(&OneTimeCode) -> bool,
      verified: bool,
      consumed: bool,
   ) -> bool {
      let mut codes = self.codes.lock().unwrap();
      let Some(code) = codes
         .iter_mut()
         .find(|c| c.id() == id && !c.is_expired(now) && applies(c))
      else {
         return false;
      };
      *code = OneTimeCode::from_db(
         code.id().clone(),
         code.identity().clone(),
         code.code().clone(),
         code.role(),
         code.expires_at(),
         verified,
         consumed,
         code.created_at(),
      );
      true
   }
}

#[async_trait]
impl OneTimeCodeRepository for MockOneTimeCodeRepository {
   async fn replace(&self, code: &OneTimeCode) -> Result<u64, InfraError> {
      let mut codes = self.codes.lock().unwrap();
      let before = codes.len();
      codes.retain(|c| c.identity() != code.identity() || c.is_consumed());
      let deleted = (before - codes.len()) as u64;
      codes.push(code.clone());
      Ok(deleted)
   }

   async fn find_latest_unconsumed(
      &self,
      identity: &Email,
   ) -> Result<Option<OneTimeCode>, InfraError> {
      Ok(self
         .codes
         .lock()
         .unwrap()
         .iter()
         .filter(|c| c.identity() == identity && !c.is_consumed())
         .max_by_key(|c| c.created_at())
         .cloned())
   }

   async fn mark_verified(
      &self,
      id: &OneTimeCodeId,
      now: DateTime<Utc>,
   ) -> Result<bool, InfraError> {
      Ok(self.update_flags(
         id,
         now,
         |c| !c.is_verified() && !c.is_consumed(),
         true,
         false,
      ))
   }

   async fn mark_consumed(
      &self,
      id: &OneTimeCodeId,
      now: DateTime<Utc>,
   ) -> Result<bool, InfraError> {
      Ok(self.update_flags(
         id,
         now,
         |c| c.is_verified() && !c.is_consumed(),
         true,
         true,
      ))
   }

   async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, InfraError> {
      let mut codes = self.codes.lock().unwrap();
      let before = codes.len();
      codes.retain(|c| !c.is_expired(now) && !c.is_consumed());
      Ok((before - codes.len()) as u64)
   }
}

// ===== MockVerificationHook =====

#[derive(Clone, Default)]
pub struct MockVerificationHook {
   events: Arc<Mutex<Vec<VerificationEvent>>>,
   fail:   Arc<AtomicBool>,
}

impl MockVerificationHook {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn fail(&self, fail: bool) {
      self.fail.store(fail, Ordering::SeqCst);
   }

   pub fn events(&self) -> Vec<VerificationEvent> {
      self.events.lock().unwrap().clone()
   }
}

#[async_trait]
impl VerificationHook for MockVerificationHook {
   async fn notify_verified(&self, event: &VerificationEvent) -> Result<(), InfraError> {
      self.events.lock().unwrap().push(event.clone());
      if self.fail.load(Ordering::SeqCst) {
         return Err(InfraError::unexpected("webhook unreachable"));
      }
      Ok(())
   }
}
