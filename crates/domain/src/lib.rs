//! # RentHub 通知配信ドメイン層
//!
//! 賃貸マーケットプレイスのバックエンドから依頼されるメール配信・
//! キャンペーン・ワンタイムコードのドメインモデルを定義する。
//!
//! ## 設計方針
//!
//! - **エンティティ**: 一意の識別子と状態遷移を持つオブジェクト（例: Campaign, OneTimeCode）
//! - **値オブジェクト**: 検証済みの不変値（例: Email, OtpCode）
//! - **ポリシー**: データ駆動の規則（例: QuotaTable, BatchPlan）
//! - **ドメインエラー**: ビジネスルール違反を表現するエラー型
//!
//! ## 依存関係の方向
//!
//! ```text
//! notifier → infra → domain
//! ```
//!
//! ドメイン層はインフラ層（DB、SMTP、Redis）には一切依存しない。
//!
//! ## モジュール構成
//!
//! - [`delivery`] - 配信依頼・配信記録・送信結果
//! - [`campaign`] - 一斉配信キャンペーンと集計
//! - [`otp`] - ワンタイムコードの状態機械
//! - [`rate_limit`] - ロール別の発行上限
//! - [`audit_event`] - 履歴表示とレート制限で共有する監査イベント
//! - [`recipient`] - 宛先と利用者 ID
//! - [`clock`] - 時刻プロバイダ
//!
//! ## 使用例
//!
//! ```rust
//! use renthub_domain::{DomainError, recipient::Email};
//!
//! let email = Email::new("Tenant@Example.com").unwrap();
//! assert_eq!(email.as_str(), "tenant@example.com");
//!
//! let error = Email::new("not-an-address").unwrap_err();
//! assert!(matches!(error, DomainError::Validation(_)));
//! ```

#[macro_use]
mod macros;

pub mod audit_event;
pub mod campaign;
pub mod clock;
pub mod delivery;
pub mod error;
pub mod otp;
pub mod rate_limit;
pub mod recipient;

pub use error::DomainError;
