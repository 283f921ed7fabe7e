//! 内部 API の結合テスト
//!
//! 本番と同じルーターをモックの依存で組み立て、`tower::ServiceExt::oneshot` で
//! リクエストを送る。Readiness Check は DB 接続が必要なため対象外。

mod helpers;

use std::sync::Arc;

use axum::{
   Router,
   body::Body,
   http::{Method, Request, StatusCode},
};
use chrono::Duration;
use helpers::TestSetup;
use pretty_assertions::assert_eq;
use renthub_infra::transport::TransportError;
use renthub_notifier::{app_builder::build_router, handler::ReadinessState};
use serde_json::{Value, json};
use sqlx::postgres::PgPoolOptions;
use tower::ServiceExt;

fn router(s: &TestSetup) -> Router {
   let pool = PgPoolOptions::new()
      .connect_lazy("postgres://localhost/renthub_test")
      .unwrap();
   build_router(&s.components, Arc::new(ReadinessState { pool, redis: None }))
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
   let request = Request::builder().method(method).uri(uri);
   let request = match body {
      Some(body) => request
         .header("content-type", "application/json")
         .body(Body::from(body.to_string())),
      None => request.body(Body::empty()),
   }
   .unwrap();

   let response = app.clone().oneshot(request).await.unwrap();
   let status = response.status();
   let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
      .await
      .unwrap();
   let json = if bytes.is_empty() {
      Value::Null
   } else {
      serde_json::from_slice(&bytes).unwrap()
   };
   (status, json)
}

fn welcome_body(to: &str) -> Value {
   json!({
      "to": to,
      "subject": "RentHub へようこそ",
      "email_type": "welcome",
      "template_name": "welcome",
      "template_data": { "login_url": "https://renthub.example.com/login" },
   })
}

#[tokio::test]
async fn test_health_checkはバージョンを返す() {
   let s = TestSetup::new();
   let app = router(&s);

   let (status, body) = call(&app, Method::GET, "/health", None).await;

   assert_eq!(status, StatusCode::OK);
   assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_単発送信の結果と配信記録idを返す() {
   // Arrange
   let s = TestSetup::new();
   let app = router(&s);

   // Act
   let (status, body) = call(
      &app,
      Method::POST,
      "/internal/notifications",
      Some(welcome_body("tenant@example.com")),
   )
   .await;

   // Assert
   assert_eq!(status, StatusCode::OK);
   assert_eq!(body["data"]["success"], true);
   assert_eq!(body["data"]["attempts"], 1);
   assert_eq!(
      body["data"]["record_id"],
      s.records.records()[0].id.to_string()
   );
}

#[tokio::test]
async fn test_送信失敗も200でsuccess_falseとして返す() {
   let s = TestSetup::new();
   s.transport
      .fail_next(1, TransportError::Permanent("550 mailbox unavailable".into()));
   let app = router(&s);

   let (status, body) = call(
      &app,
      Method::POST,
      "/internal/notifications",
      Some(welcome_body("tenant@example.com")),
   )
   .await;

   assert_eq!(status, StatusCode::OK);
   assert_eq!(body["data"]["success"], false);
   assert!(body["data"]["error"].as_str().unwrap().contains("550"));
}

#[tokio::test]
async fn test_宛先不正は400で何も記録しない() {
   let s = TestSetup::new();
   let app = router(&s);

   let (status, body) = call(
      &app,
      Method::POST,
      "/internal/notifications/queue",
      Some(welcome_body("not-an-address")),
   )
   .await;

   assert_eq!(status, StatusCode::BAD_REQUEST);
   assert_eq!(body["status"], 400);
   assert_eq!(s.components.queue.stats().completed, 0);
   assert!(s.records.records().is_empty());
}

#[tokio::test]
async fn test_キャンペーンを投入すると完了後に集計と配信記録を参照できる() {
   // Arrange
   let s = TestSetup::new();
   let app = router(&s);
   let request = json!({
      "name": "秋の特集",
      "campaign_type": "seasonal",
      "subject": "紅葉の宿",
      "template_data": { "body": "山あいの宿" },
      "recipients": [
         { "email": "a@example.com" },
         { "email": "b@example.com", "name": "Bさん" },
         { "email": "broken" },
      ],
      "inter_batch_delay_ms": 0,
   });

   // Act
   let (status, accepted) = call(&app, Method::POST, "/internal/campaigns", Some(request)).await;
   s.components.queue.wait_until_idle().await;
   let id = accepted["data"]["campaign_id"].as_str().unwrap().to_string();
   let (_, campaign) = call(&app, Method::GET, &format!("/internal/campaigns/{id}"), None).await;
   let (_, deliveries) = call(
      &app,
      Method::GET,
      &format!("/internal/campaigns/{id}/deliveries"),
      None,
   )
   .await;

   // Assert
   assert_eq!(status, StatusCode::ACCEPTED);
   assert_eq!(accepted["data"]["task"]["kind"], "campaign");
   assert_eq!(campaign["data"]["status"], "sent");
   assert_eq!(
      campaign["data"]["stats"],
      json!({ "total_recipients": 3, "emails_sent": 2, "emails_failed": 1 })
   );
   assert_eq!(deliveries["data"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_未登録テンプレートのキャンペーンは投入前に400() {
   let s = TestSetup::new();
   let app = router(&s);

   let (status, _) = call(
      &app,
      Method::POST,
      "/internal/campaigns",
      Some(json!({
         "name": "秋の特集",
         "campaign_type": "seasonal",
         "subject": "紅葉の宿",
         "template_name": "autumn_special",
         "recipients": [{ "email": "a@example.com" }],
      })),
   )
   .await;

   assert_eq!(status, StatusCode::BAD_REQUEST);
   assert_eq!(s.components.queue.stats(), Default::default());
}

#[tokio::test]
async fn test_存在しないキャンペーンは404() {
   let s = TestSetup::new();
   let app = router(&s);

   let (status, _) = call(
      &app,
      Method::GET,
      "/internal/campaigns/01890a5d-ac96-774b-bcce-b302099a8057",
      None,
   )
   .await;

   assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_発行上限を超えると429で上限回数を伝える() {
   // Arrange
   let s = TestSetup::new();
   let app = router(&s);
   let body = json!({ "identity": "guest@example.com" });
   for _ in 0..6 {
      let (status, _) = call(&app, Method::POST, "/internal/otp/issue", Some(body.clone())).await;
      assert_eq!(status, StatusCode::CREATED);
   }

   // Act
   let (status, error) = call(&app, Method::POST, "/internal/otp/resend", Some(body)).await;

   // Assert
   assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
   assert_eq!(error["detail"], "Maximum 6 OTPs per hour allowed for users");
}

#[tokio::test]
async fn test_検証と使用を経て履歴に残る() {
   // Arrange
   let s = TestSetup::new();
   let app = router(&s);
   let (_, issued) = call(
      &app,
      Method::POST,
      "/internal/otp/issue",
      Some(json!({ "identity": "Owner@Example.com", "role": "owner" })),
   )
   .await;
   let check = json!({ "identity": "owner@example.com", "code": s.latest_code() });

   // Act
   s.clock.advance(Duration::seconds(10));
   let (verify_status, _) = call(&app, Method::POST, "/internal/otp/verify", Some(check.clone())).await;
   s.clock.advance(Duration::seconds(10));
   let (consume_status, _) = call(&app, Method::POST, "/internal/otp/consume", Some(check.clone())).await;
   let (again_status, again) = call(&app, Method::POST, "/internal/otp/consume", Some(check)).await;
   let (_, history) = call(
      &app,
      Method::GET,
      "/internal/otp/history?identity=owner@example.com",
      None,
   )
   .await;

   // Assert
   assert_eq!(issued["data"]["identity"], "owner@example.com");
   assert_eq!(issued["data"]["role"], "owner");
   assert_eq!(issued["data"]["delivery"], "emailed");
   assert_eq!(verify_status, StatusCode::OK);
   assert_eq!(consume_status, StatusCode::OK);
   assert_eq!(again_status, StatusCode::BAD_REQUEST);
   assert!(again["type"].as_str().unwrap().starts_with("https://renthub.example.com/errors/otp-"));
   let actions: Vec<_> = history["data"]
      .as_array()
      .unwrap()
      .iter()
      .map(|e| e["action"].as_str().unwrap().to_string())
      .collect();
   assert_eq!(actions, vec!["otp.consume", "otp.verify", "otp.issue"]);
}

#[tokio::test]
async fn test_保持期間が短すぎる削除は400() {
   let s = TestSetup::new();
   let app = router(&s);

   let (status, _) = call(
      &app,
      Method::DELETE,
      "/internal/notifications/retention?older_than_days=7",
      None,
   )
   .await;

   assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_表現できない保持日数の削除は400() {
   let s = TestSetup::new();
   let app = router(&s);

   let (status, body) = call(
      &app,
      Method::DELETE,
      "/internal/notifications/retention?older_than_days=100000000",
      None,
   )
   .await;

   assert_eq!(status, StatusCode::BAD_REQUEST);
   assert_eq!(body["status"], 400);
}

#[tokio::test]
async fn test_配信統計は期間省略時に直近24時間を集計する() {
   let s = TestSetup::new();
   let app = router(&s);
   call(
      &app,
      Method::POST,
      "/internal/notifications",
      Some(welcome_body("tenant@example.com")),
   )
   .await;
   s.clock.advance(Duration::minutes(1));

   let (status, body) = call(&app, Method::GET, "/internal/notifications/stats", None).await;

   assert_eq!(status, StatusCode::OK);
   assert_eq!(body["data"]["total_sent"], 1);
   assert_eq!(body["data"]["total_failed"], 0);
}

#[tokio::test(start_paused = true)]
async fn test_待機中のタスクだけ取り消せる() {
   // Arrange
   let s = TestSetup::new();
   let app = router(&s);
   let mut body = welcome_body("tenant@example.com");
   body["delay_ms"] = json!(60_000);
   let (_, accepted) = call(&app, Method::POST, "/internal/notifications/queue", Some(body)).await;
   let id = accepted["data"]["id"].as_u64().unwrap();

   // Act
   let (first, _) = call(&app, Method::DELETE, &format!("/internal/queue/tasks/{id}"), None).await;
   let (second, _) = call(&app, Method::DELETE, &format!("/internal/queue/tasks/{id}"), None).await;
   let (_, stats) = call(&app, Method::GET, "/internal/queue/stats", None).await;

   // Assert
   assert_eq!(first, StatusCode::NO_CONTENT);
   assert_eq!(second, StatusCode::NOT_FOUND);
   assert_eq!(stats["data"]["delayed"], 0);
   assert_eq!(s.transport.call_count(), 0);
}
