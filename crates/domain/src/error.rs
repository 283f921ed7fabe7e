//! # ドメイン層エラー定義
//!
//! ビジネスルール違反やドメイン固有の例外状態を表現するエラー型。
//!
//! | エラー種別 | HTTP ステータス | 用途 |
//! |-----------|----------------|------|
//! | `Validation` | 400 Bad Request | 入力値の検証失敗 |
//! | `NotFound` | 404 Not Found | エンティティが存在しない |
//! | `InvalidTransition` | 409 Conflict | 許可されない状態遷移 |
//! | `Conflict` | 409 Conflict | 集計の不変条件違反など |
//!
//! ## 使用例
//!
//! ```rust
//! use renthub_domain::DomainError;
//!
//! fn find_campaign(id: &str) -> Result<(), DomainError> {
//!     Err(DomainError::NotFound {
//!         entity_type: "Campaign",
//!         id:          id.to_string(),
//!     })
//! }
//!
//! assert!(find_campaign("c-1").is_err());
//! ```

use thiserror::Error;

/// ドメイン層で発生するエラー
#[derive(Debug, Error)]
pub enum DomainError {
    /// 入力値がビジネスルールに違反している
    #[error("バリデーションエラー: {0}")]
    Validation(String),

    /// 指定された ID のエンティティが存在しない
    #[error("{entity_type} が見つかりません: {id}")]
    NotFound {
        /// エンティティの種類（"Campaign", "OneTimeCode" など）
        entity_type: &'static str,
        /// 検索に使用した識別子
        id:          String,
    },

    /// 現在の状態から要求された状態へ遷移できない
    #[error("不正な状態遷移です: {entity} {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from:   String,
        to:     String,
    },

    /// 競合エラー
    ///
    /// キャンペーン集計が総数を超える加算など、不変条件を壊す更新を拒否した場合に使用する。
    #[error("競合が発生しました: {0}")]
    Conflict(String),
}
