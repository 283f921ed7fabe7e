//! # ビジネスイベントログとエラーコンテキストの構造化ヘルパー
//!
//! ログフィールドの命名規約とヘルパーマクロを提供する。
//!
//! ## ビジネスイベント
//!
//! [`log_business_event!`] マクロで出力する。`event.kind = "business_event"` マーカーが
//! 自動付与され、`jq 'select(.["event.kind"] == "business_event")'` でフィルタできる。
//!
//! ## エラーコンテキスト
//!
//! `tracing::error!` / `tracing::warn!` に `error.category` + `error.kind` フィールドを直接追加する。
//! 定数は [`error`] モジュールで提供。
//!
//! ## フィールド命名規約
//!
//! ドット記法（`event.category`、`error.kind`）を使用。JSON 出力でフラットなキーになる。

/// ビジネスイベントを構造化ログとして出力する。
///
/// `event.kind = "business_event"` マーカーを自動付与し、
/// `tracing::info!` レベルで出力する。
///
/// ## 必須フィールド（慣例）
///
/// - `event.category`: イベントカテゴリ（[`event::category`] の定数を使用）
/// - `event.action`: アクション名（[`event::action`] の定数を使用）
/// - `event.result`: 結果（[`event::result`] の定数を使用）
///
/// ## 推奨フィールド
///
/// - `event.entity_type`: エンティティ種別（[`event::entity_type`] の定数を使用）
/// - `event.entity_id`: エンティティ ID
#[macro_export]
macro_rules! log_business_event {
    ($($args:tt)*) => {
        ::tracing::info!(
            event.kind = "business_event",
            $($args)*
        )
    };
}

/// イベントフィールドの定数
pub mod event {
    pub mod category {
        pub const NOTIFICATION: &str = "notification";
        pub const CAMPAIGN: &str = "campaign";
        pub const OTP: &str = "otp";
        pub const QUEUE: &str = "queue";
    }

    pub mod action {
        // 通知
        pub const NOTIFICATION_SENT: &str = "notification.sent";
        pub const NOTIFICATION_FAILED: &str = "notification.failed";
        pub const RETENTION_PURGED: &str = "notification.retention_purged";

        // キャンペーン
        pub const CAMPAIGN_STARTED: &str = "campaign.started";
        pub const CAMPAIGN_BATCH_COMPLETED: &str = "campaign.batch_completed";
        pub const CAMPAIGN_COMPLETED: &str = "campaign.completed";
        pub const CAMPAIGN_FAILED: &str = "campaign.failed";

        // ワンタイムコード
        pub const OTP_ISSUED: &str = "otp.issued";
        pub const OTP_RATE_LIMITED: &str = "otp.rate_limited";
        pub const OTP_VERIFIED: &str = "otp.verified";
        pub const OTP_VERIFY_REJECTED: &str = "otp.verify_rejected";
        pub const OTP_CONSUMED: &str = "otp.consumed";
        pub const OTP_PURGED: &str = "otp.purged";

        // キュー
        pub const TASK_ENQUEUED: &str = "queue.task_enqueued";
        pub const TASK_COMPLETED: &str = "queue.task_completed";
        pub const TASK_FAILED: &str = "queue.task_failed";
        pub const TASK_CANCELLED: &str = "queue.task_cancelled";
    }

    pub mod entity_type {
        pub const DELIVERY_RECORD: &str = "delivery_record";
        pub const CAMPAIGN: &str = "campaign";
        pub const ONE_TIME_CODE: &str = "one_time_code";
        pub const QUEUE_TASK: &str = "queue_task";
    }

    pub mod result {
        pub const SUCCESS: &str = "success";
        pub const FAILURE: &str = "failure";
    }
}

/// エラーコンテキストフィールドの定数
pub mod error {
    pub mod category {
        /// インフラストラクチャ（DB、Redis）
        pub const INFRASTRUCTURE: &str = "infrastructure";
        /// 外部サービス呼び出し（メール配信事業者、Webhook）
        pub const EXTERNAL_SERVICE: &str = "external_service";
    }

    pub mod kind {
        pub const DATABASE: &str = "database";
        pub const BLACKLIST: &str = "blacklist";
        pub const MAIL_TRANSPORT: &str = "mail_transport";
        pub const DELIVERY_LOG: &str = "delivery_log";
        pub const AUDIT_LOG: &str = "audit_log";
        pub const WEBHOOK: &str = "webhook";
        pub const INTERNAL: &str = "internal";
    }
}
