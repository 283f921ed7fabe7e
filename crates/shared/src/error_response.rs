//! # エラーレスポンス（RFC 9457 Problem Details）
//!
//! 通知サービスが返す Problem Details の本体を定義する。
//!
//! ## 設計
//!
//! - 本体はデータ構造のみ。axum への変換は通知サービス側の `NotifierError` が行う
//! - `type` は `https://renthub.example.com/errors/{suffix}` 形式で、呼び出し側は suffix で分岐できる
//! - ワンタイムコードの拒否理由は suffix に `otp-` を付けて区別する

use serde::{Deserialize, Serialize};

const ERROR_TYPE_BASE: &str = "https://renthub.example.com/errors";

/// エラーレスポンス（RFC 9457 Problem Details）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
   #[serde(rename = "type")]
   pub error_type: String,
   pub title:      String,
   pub status:     u16,
   pub detail:     String,
}

impl ErrorResponse {
   /// `suffix` はベース URI に付加される（例: `"template-error"`）
   pub fn new(suffix: &str, title: impl Into<String>, status: u16, detail: impl Into<String>) -> Self {
      Self {
         error_type: format!("{ERROR_TYPE_BASE}/{suffix}"),
         title: title.into(),
         status,
         detail: detail.into(),
      }
   }

   /// 宛先・件名などの入力不備（400）
   pub fn validation_error(detail: impl Into<String>) -> Self {
      Self::new("validation-error", "Validation Error", 400, detail)
   }

   /// 未登録テンプレート・必須フィールド欠落（400）
   pub fn template_error(detail: impl Into<String>) -> Self {
      Self::new("template-error", "Template Error", 400, detail)
   }

   /// ワンタイムコードの検証・使用の拒否（400）
   ///
   /// `reason` は `"expired"` のような拒否理由で、`otp-expired` の suffix になる。
   pub fn otp_rejected(reason: &str, detail: impl Into<String>) -> Self {
      Self::new(&format!("otp-{reason}"), "Verification Failed", 400, detail)
   }

   /// キャンペーン・待機中タスクが見つからない（404）
   pub fn not_found(detail: impl Into<String>) -> Self {
      Self::new("not-found", "Not Found", 404, detail)
   }

   /// ワンタイムコードの発行上限超過（429）
   pub fn rate_limited(detail: impl Into<String>) -> Self {
      Self::new("rate-limit-exceeded", "Too Many Requests", 429, detail)
   }

   /// リトライ後もメール配信事業者への送信に失敗した（502）
   pub fn delivery_failed(detail: impl Into<String>) -> Self {
      Self::new("delivery-failed", "Bad Gateway", 502, detail)
   }

   /// 500。detail は内部情報を含まない固定文言
   pub fn internal_error() -> Self {
      Self::new(
         "internal-error",
         "Internal Server Error",
         500,
         "内部エラーが発生しました",
      )
   }
}
