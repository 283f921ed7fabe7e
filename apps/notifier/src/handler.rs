//! # HTTP リクエストハンドラ
//!
//! axum のルートに対応するハンドラ関数を定義する。
//!
//! ## 設計方針
//!
//! - 各ハンドラはサブモジュールに配置
//! - 親モジュール（この `handler.rs`）で re-export し、フラットな API を提供
//! - ハンドラは薄く保ち、配信・発行のロジックはユースケース層に委譲

pub mod campaign;
pub mod health;
pub mod notification;
pub mod otp;
pub mod queue;

pub use campaign::{
    CampaignState,
    create_campaign,
    get_campaign,
    list_campaign_deliveries,
    list_campaigns,
};
pub use health::{ReadinessState, health_check, readiness_check};
pub use notification::{
    NotificationState,
    get_delivery_stats,
    purge_delivery_records,
    queue_notification,
    send_notification,
};
pub use otp::{OtpState, consume_otp, get_otp_history, issue_otp, resend_otp, verify_otp};
pub use queue::{QueueState, cancel_task, get_queue_stats};
