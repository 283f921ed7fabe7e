//! # API レスポンスエンベロープ
//!
//! 内部 API の統一レスポンス形式 `{ "data": T }` を提供する。

use serde::{Deserialize, Serialize};

/// 内部 API の統一レスポンス型
///
/// 通知サービスのハンドラはすべて `{ "data": T }` 形式で成功レスポンスを返す。
/// 呼び出し側（マーケットプレイス本体のバックエンド）は `Deserialize` で受け取る。
///
/// ## 使用例
///
/// ```
/// use renthub_shared::ApiResponse;
///
/// let response = ApiResponse::new("queued");
/// assert_eq!(response.data, "queued");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}
