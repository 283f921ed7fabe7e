//! # ユースケース層
//!
//! 通知サービスのビジネスロジックを実装する。
//!
//! ## 設計方針
//!
//! - **依存性注入**: リポジトリ・トランスポートを `Arc<dyn Trait>` で外部から注入
//! - **薄いハンドラ**: ハンドラは薄く保ち、ロジックはユースケースに集約
//! - **時刻の注入**: 現在時刻は [`renthub_domain::clock::Clock`] から取得する
//!
//! ## モジュール構成
//!
//! - [`notification`]: 単発送信・配信記録
//! - [`campaign`]: バッチ分割による一斉配信
//! - [`queue`]: プロセス内の配信キュー
//! - [`rate_limit`]: 監査イベントに基づく発行上限
//! - [`otp`]: ワンタイムコードの発行・検証・使用

pub mod campaign;
pub mod notification;
pub mod otp;
pub mod queue;
pub mod rate_limit;

pub use campaign::{
    BatchCampaignRunner,
    CampaignJob,
    CampaignRecipient,
    CampaignResult,
    CampaignTemplate,
};
pub use notification::{DeliveryLogger, RetryPolicy, SingleSender, TemplateRenderer};
pub use otp::{EmailDelivery, OtpIssued, OtpIssuer, OtpVerified};
pub use queue::{
    DeliveryDispatcher,
    DeliveryQueue,
    DeliveryTask,
    EnqueueOptions,
    QueueStats,
    TaskHandle,
    TaskHandler,
    TaskId,
};
pub use rate_limit::RateLimiter;
