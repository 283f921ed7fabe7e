//! # 通知ユースケース
//!
//! 単発メールの生成・送信・配信記録を統合する。
//!
//! ## モジュール構成
//!
//! - [`template_renderer`] - tera テンプレートエンジンによるメール生成
//! - [`retry`] - 一時的な送信失敗に対するリトライポリシー
//! - [`delivery_logger`] - 配信記録の書き込みと集計
//! - [`sender`] - 事前条件の検査 + リトライ付き送信 + 記録の統合

pub mod delivery_logger;
pub mod retry;
pub mod sender;
pub mod template_renderer;

pub use delivery_logger::DeliveryLogger;
pub use retry::RetryPolicy;
pub use sender::SingleSender;
pub use template_renderer::TemplateRenderer;
