//! # 通知配信サービス サーバー
//!
//! RentHub の業務バックエンドから呼ばれる内部サービス。
//! トランザクションメール・キャンペーン・ワンタイムコードの配信を担当する。
//!
//! ## 役割
//!
//! - **単発送信**: 予約確認・決済領収などをリトライ付きで送信し、配信記録を残す
//! - **キャンペーン**: 宛先をバッチに分けて並行送信し、集計をキャンペーンに反映する
//! - **ワンタイムコード**: ロール別のレート制限付きで発行・検証・使用する
//!
//! ## アクセス制御
//!
//! 内部ネットワークからのみアクセス可能とする。認証は前段の業務バックエンドが行う。
//!
//! ## 環境変数
//!
//! | 変数名 | 必須 | 説明 |
//! |--------|------|------|
//! | `NOTIFIER_HOST` | No | バインドアドレス（デフォルト: `0.0.0.0`） |
//! | `NOTIFIER_PORT` | **Yes** | ポート番号 |
//! | `DATABASE_URL` | **Yes** | PostgreSQL 接続 URL |
//! | `REDIS_URL` | No | 未設定ならインメモリのブラックリストを使う |
//! | `NOTIFICATION_BACKEND` | No | `smtp` / `ses` / `noop`（デフォルト: `noop`） |
//! | `OTP_WEBHOOK_URL` | No | 検証成功の通知先 |
//!
//! その他の項目は [`renthub_notifier::config`] を参照。
//!
//! ## 起動方法
//!
//! ```bash
//! NOTIFIER_PORT=13010 DATABASE_URL=postgres://... cargo run -p renthub-notifier
//! ```

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context as _;
use renthub_domain::clock::SystemClock;
use renthub_infra::{
   HttpVerificationHook,
   InMemoryTokenBlacklist,
   MailTransport,
   NoopMailTransport,
   RedisTokenBlacklist,
   SesMailTransport,
   SmtpMailTransport,
   TokenBlacklist,
   VerificationHook,
   db,
   repository::{
      PostgresAuditEventRepository,
      PostgresCampaignRepository,
      PostgresDeliveryRecordRepository,
      PostgresOneTimeCodeRepository,
   },
};
use renthub_notifier::{
   app_builder::{Components, Dependencies, build_router},
   config::{MailBackend, NotificationConfig, NotifierConfig},
   handler::ReadinessState,
   usecase::OtpIssuer,
};
use renthub_shared::observability::{TracingConfig, init_tracing};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
   // .env ファイルを読み込む（存在する場合）
   dotenvy::dotenv().ok();

   init_tracing(TracingConfig::from_env("notifier"));
   let _tracing_guard = tracing::info_span!("app", service = "notifier").entered();

   let config = NotifierConfig::from_env().context("設定の読み込みに失敗しました")?;

   tracing::info!(
      "通知サービスを起動します: {}:{}",
      config.host,
      config.port
   );

   let pool = db::create_pool(&config.database_url)
      .await
      .context("データベース接続に失敗しました")?;
   db::run_migrations(&pool)
      .await
      .context("マイグレーションに失敗しました")?;
   tracing::info!("データベースに接続しました");

   let redis_conn = match &config.redis_url {
      Some(url) => Some(
         renthub_infra::redis::create_connection_manager(url)
            .await
            .context("Redis への接続に失敗しました")?,
      ),
      None => None,
   };
   let blacklist: Arc<dyn TokenBlacklist> = match &redis_conn {
      Some(conn) => Arc::new(RedisTokenBlacklist::new(conn.clone())),
      None => {
         tracing::warn!("REDIS_URL が未設定のため、使用済みコードのブラックリストはプロセス内にのみ保持します");
         Arc::new(InMemoryTokenBlacklist::new())
      }
   };

   let hook = config.otp.webhook_url.as_deref().map(|url| {
      tracing::info!(url, "検証成功の Webhook を有効化しました");
      Arc::new(HttpVerificationHook::new(url)) as Arc<dyn VerificationHook>
   });

   let components = Components::build(Dependencies {
      transport: build_transport(&config.notification).await,
      delivery_records: Arc::new(PostgresDeliveryRecordRepository::new(pool.clone())),
      campaigns: Arc::new(PostgresCampaignRepository::new(pool.clone())),
      audit_events: Arc::new(PostgresAuditEventRepository::new(pool.clone())),
      codes: Arc::new(PostgresOneTimeCodeRepository::new(pool.clone())),
      blacklist,
      hook,
      clock: Arc::new(SystemClock),
      retry: config.retry,
      quotas: config.otp.quotas.clone(),
      otp_policy: config.otp.policy,
   })
   .context("メールテンプレートの読み込みに失敗しました")?;

   spawn_otp_cleanup(components.issuer.clone(), config.otp.cleanup_interval);

   let readiness_state = Arc::new(ReadinessState {
      pool,
      redis: redis_conn,
   });
   let app = build_router(&components, readiness_state);

   let addr: SocketAddr = format!("{}:{}", config.host, config.port)
      .parse()
      .context("バインドアドレスが不正です")?;
   let listener = TcpListener::bind(addr).await?;
   tracing::info!("通知サービスが起動しました: {}", addr);

   axum::serve(listener, app)
      .with_graceful_shutdown(shutdown_signal())
      .await?;

   // 実行中のキャンペーンは途中で打ち切られる。待機中のタスクは失われる
   let stats = components.queue.stats();
   if stats.waiting + stats.delayed + stats.active > 0 {
      tracing::warn!(
         waiting = stats.waiting,
         delayed = stats.delayed,
         active = stats.active,
         "未処理のタスクを残して停止します"
      );
   }

   Ok(())
}

/// 設定に応じたメールトランスポートを作る
async fn build_transport(config: &NotificationConfig) -> Arc<dyn MailTransport> {
   match config.backend {
      MailBackend::Smtp => {
         tracing::info!(
            "SMTP で送信します: {}:{}",
            config.smtp_host,
            config.smtp_port
         );
         Arc::new(SmtpMailTransport::new(
            &config.smtp_host,
            config.smtp_port,
            config.from_address.clone(),
         ))
      }
      MailBackend::Ses => {
         tracing::info!("Amazon SES で送信します");
         let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
         Arc::new(SesMailTransport::new(
            aws_sdk_sesv2::Client::new(&aws_config),
            config.from_address.clone(),
         ))
      }
      MailBackend::Noop => {
         tracing::info!("メールは送信せずログ出力のみ行います");
         Arc::new(NoopMailTransport)
      }
   }
}

/// 期限切れ・使用済みのワンタイムコードを定期的に削除する
fn spawn_otp_cleanup(issuer: OtpIssuer, every: std::time::Duration) {
   tokio::spawn(async move {
      let mut interval = tokio::time::interval(every);
      loop {
         interval.tick().await;
         if let Err(e) = issuer.purge_expired().await {
            tracing::warn!(error = %e, "期限切れのワンタイムコードを削除できませんでした");
         }
      }
   });
}

/// Ctrl+C / SIGTERM を待つ
async fn shutdown_signal() {
   let ctrl_c = async {
      tokio::signal::ctrl_c().await.ok();
   };
   #[cfg(unix)]
   let terminate = async {
      if let Ok(mut signal) =
         tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
      {
         signal.recv().await;
      }
   };
   #[cfg(not(unix))]
   let terminate = std::future::pending::<()>();

   tokio::select! {
      _ = ctrl_c => {},
      _ = terminate => {},
   }
   tracing::info!("停止シグナルを受信しました");
}
