//! 配信エンジン全体の性質を確かめる結合テスト
//!
//! 本番と同じ組み立てのユースケースをモックのトランスポート・リポジトリで動かし、
//! 配信記録・キャンペーン集計・レート制限・ワンタイムコードの不変条件を検証する。
//! 待ち時間は tokio の一時停止した時計で測る。

mod helpers;

use std::time::Duration;

use helpers::{TestSetup, campaign_job, recipient_address, welcome};
use pretty_assertions::assert_eq;
use renthub_domain::{
   campaign::CampaignStatus,
   delivery::DeliveryStatus,
   otp::OtpError,
   rate_limit::Role,
};
use renthub_infra::transport::TransportError;
use renthub_notifier::{
   error::NotifierError,
   usecase::{DeliveryTask, EnqueueOptions, QueueStats},
};
use rstest::rstest;
use tokio::time::Instant;

const OWNER: &str = "owner@example.com";

#[rstest]
#[case::成功(vec![], DeliveryStatus::Sent)]
#[case::一時的な失敗から回復(vec![TransportError::Transient("timeout".into())], DeliveryStatus::Sent)]
#[case::一時的な失敗を使い切る(vec![TransportError::Transient("timeout".into()); 3], DeliveryStatus::Failed)]
#[case::恒久的な拒否(vec![TransportError::Permanent("550".into())], DeliveryStatus::Failed)]
#[case::プロバイダのレート制限(vec![TransportError::Throttled("quota".into())], DeliveryStatus::Failed)]
#[tokio::test(start_paused = true)]
async fn test_単発送信は結果に関係なく配信記録をちょうど1件残す(
   #[case] failures: Vec<TransportError>,
   #[case] expected: DeliveryStatus,
) {
   // Arrange
   let s = TestSetup::new();
   for failure in failures {
      s.transport.push_result(Err(failure));
   }

   // Act
   let outcome = s.components.sender.send(welcome("tenant@example.com")).await.unwrap();

   // Assert
   let records = s.records.records();
   assert_eq!(records.len(), 1);
   assert_eq!(records[0].status, expected);
   assert_eq!(outcome.success, expected == DeliveryStatus::Sent);
   assert_eq!(outcome.record_id, Some(records[0].id.clone()));
}

#[tokio::test(start_paused = true)]
async fn test_キャンペーン集計は途中でも総数を超えず完了時に一致する() {
   // Arrange
   let s = TestSetup::new();
   s.transport.set_latency(Duration::from_millis(100));
   s.transport
      .fail_address(&recipient_address(3), TransportError::Permanent("550".into()));
   let job = campaign_job(7, 2, Duration::from_secs(1));
   let id = job.campaign_id.clone();
   let runner = s.components.runner.clone();

   // Act
   let handle = tokio::spawn(async move { runner.run(job).await });
   let mut observations = 0;
   while !handle.is_finished() {
      tokio::time::sleep(Duration::from_millis(50)).await;
      if let Some(campaign) = s.campaigns.get(&id) {
         let stats = campaign.stats();
         assert!(stats.processed() <= stats.total_recipients);
         observations += 1;
      }
   }
   let result = handle.await.unwrap().unwrap();

   // Assert
   assert!(observations > 1);
   let stats = s.campaigns.get(&id).unwrap().stats();
   assert_eq!(stats.total_recipients, 7);
   assert_eq!(stats.emails_sent + stats.emails_failed, 7);
   assert_eq!((stats.emails_sent, stats.emails_failed), (6, 1));
   assert_eq!(result.success_count + result.failure_count, result.total_users);
}

#[tokio::test]
async fn test_上限回数を超えた発行はコードも配信記録も作らない() {
   // Arrange
   let s = TestSetup::new();
   for _ in 0..8 {
      s.components.issuer.issue(OWNER, Role::Owner).await.unwrap();
   }
   let live_code = s.codes.codes().last().unwrap().id().clone();
   let records_before = s.records.records().len();

   // Act
   let result = s.components.issuer.issue(OWNER, Role::Owner).await;

   // Assert
   assert!(matches!(
      result,
      Err(NotifierError::QuotaExceeded { max: 8, role: Role::Owner })
   ));
   let codes = s.codes.codes();
   assert_eq!(codes.len(), 1);
   assert_eq!(codes[0].id(), &live_code);
   assert_eq!(s.records.records().len(), records_before);
   assert_eq!(s.transport.call_count(), 8);
}

#[tokio::test]
async fn test_再送後は未使用のコードが1件だけ残り古いコードは検証できない() {
   // Arrange
   let s = TestSetup::new();
   s.components.issuer.issue(OWNER, Role::Owner).await.unwrap();
   let old_code = s.latest_code();

   // Act
   s.components.issuer.resend(OWNER, Role::Owner).await.unwrap();
   let new_code = s.latest_code();

   // Assert
   let live: Vec<_> = s.codes.codes().into_iter().filter(|c| !c.is_consumed()).collect();
   assert_eq!(live.len(), 1);
   // 同じ数字が再び出た場合は古いコードを区別できない
   if old_code != new_code {
      assert!(matches!(
         s.components.issuer.verify(OWNER, &old_code).await,
         Err(NotifierError::Otp(OtpError::Mismatch))
      ));
   }
   assert!(s.components.issuer.verify(OWNER, &new_code).await.is_ok());
}

#[tokio::test]
async fn test_使用済みのコードは期限内でも再検証も再使用もできない() {
   // Arrange
   let s = TestSetup::new();
   s.components.issuer.issue(OWNER, Role::Owner).await.unwrap();
   let code = s.latest_code();
   s.components.issuer.verify(OWNER, &code).await.unwrap();

   // Act
   s.components.issuer.consume(OWNER, &code).await.unwrap();

   // Assert
   assert!(matches!(
      s.components.issuer.verify(OWNER, &code).await,
      Err(NotifierError::Otp(_))
   ));
   assert!(matches!(
      s.components.issuer.consume(OWNER, &code).await,
      Err(NotifierError::Otp(_))
   ));
}

#[tokio::test(start_paused = true)]
async fn test_1件の失敗はバッチ内の他の宛先に影響しない() {
   // Arrange
   let s = TestSetup::new();
   s.transport
      .fail_address(&recipient_address(17), TransportError::Permanent("550 mailbox unavailable".into()));
   let job = campaign_job(50, 50, Duration::from_secs(2));
   let id = job.campaign_id.clone();

   // Act
   let result = s.components.runner.run(job).await.unwrap();

   // Assert
   let records = s.records.records();
   let sent = records.iter().filter(|r| r.status == DeliveryStatus::Sent).count();
   let failed: Vec<_> = records
      .iter()
      .filter(|r| r.status == DeliveryStatus::Failed)
      .collect();
   assert_eq!(sent, 49);
   assert_eq!(failed.len(), 1);
   assert_eq!(failed[0].recipient_email, recipient_address(17));
   assert_eq!((result.success_count, result.failure_count), (49, 1));
   assert_eq!(s.campaigns.get(&id).unwrap().status(), CampaignStatus::Sent);
}

#[tokio::test(start_paused = true)]
async fn test_2回失敗して3回目で成功すると待ち時間は2回分になる() {
   // Arrange
   let s = TestSetup::new();
   s.transport
      .fail_next(2, TransportError::Transient("connection reset".into()));
   let started = Instant::now();

   // Act
   let outcome = s.components.sender.send(welcome("tenant@example.com")).await.unwrap();

   // Assert
   // 1 秒 + 2 秒。3 回目の待ち（4 秒）は発生しない
   assert_eq!(started.elapsed(), Duration::from_secs(3));
   assert_eq!(outcome.attempts, 3);
   let records = s.records.records();
   assert_eq!(records.len(), 1);
   assert_eq!(records[0].status, DeliveryStatus::Sent);
   assert_eq!(records[0].attempts, 3);
}

#[tokio::test(start_paused = true)]
async fn test_プロバイダのレート制限は1回で失敗として記録される() {
   // Arrange
   let s = TestSetup::new();
   s.transport
      .fail_next(3, TransportError::Throttled("daily sending quota exceeded".into()));
   let started = Instant::now();

   // Act
   let outcome = s.components.sender.send(welcome("tenant@example.com")).await.unwrap();

   // Assert
   assert_eq!(started.elapsed(), Duration::ZERO);
   assert_eq!(outcome.attempts, 1);
   assert_eq!(s.transport.call_count(), 1);
   let records = s.records.records();
   assert_eq!(records.len(), 1);
   assert_eq!(records[0].status, DeliveryStatus::Failed);
   assert_eq!(records[0].attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_キューに積んだ送信とキャンペーンが実行されて件数に反映される() {
   // Arrange
   let s = TestSetup::new();
   s.transport
      .fail_address("bounce@example.com", TransportError::Permanent("550".into()));
   let job = campaign_job(3, 2, Duration::from_secs(1));
   let campaign_id = job.campaign_id.clone();
   let queue = &s.components.queue;

   // Act
   queue.enqueue(DeliveryTask::Campaign(job), EnqueueOptions::default());
   queue.enqueue(
      DeliveryTask::Single(welcome("bounce@example.com")),
      EnqueueOptions::default(),
   );
   queue.enqueue(
      DeliveryTask::Single(welcome("tenant@example.com")),
      EnqueueOptions {
         delay:    Duration::from_secs(10),
         priority: 0,
      },
   );
   queue.wait_until_idle().await;

   // Assert
   assert_eq!(
      queue.stats(),
      QueueStats {
         completed: 2,
         failed: 1,
         ..QueueStats::default()
      }
   );
   assert_eq!(
      s.campaigns.get(&campaign_id).unwrap().status(),
      CampaignStatus::Sent
   );
   assert_eq!(s.records.records().len(), 5);
}
