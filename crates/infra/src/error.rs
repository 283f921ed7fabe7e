//! # インフラ層エラー定義
//!
//! データベース・Redis・Webhook との通信で発生するエラーを表現する。
//!
//! ## 構造
//!
//! `std::io::Error` と同じ struct + enum パターン:
//! - [`InfraError`]: エラー種別（[`InfraErrorKind`]）と [`SpanTrace`] を保持するラッパー
//! - [`InfraErrorKind`]: エラーの具体的な種別
//!
//! `From` 実装と convenience constructor はどちらも生成時点の [`SpanTrace`] を捕捉する。
//! 捕捉された経路は `tracing_error::ErrorLayer` が登録されている場合のみ中身を持つ。
//!
//! メールトランスポートの失敗はここに含めない。リトライ可否の判定が必要なため、
//! 専用の [`TransportError`](crate::transport::TransportError) で表す。

use std::fmt;

use derive_more::Display;
use thiserror::Error;
use tracing_error::SpanTrace;

/// インフラ層で発生するエラー
#[derive(Display)]
#[display("{kind}")]
pub struct InfraError {
    kind:       InfraErrorKind,
    span_trace: SpanTrace,
}

/// インフラ層エラーの種別
#[derive(Debug, Error)]
pub enum InfraErrorKind {
    #[error("データベースエラー: {0}")]
    Database(#[source] sqlx::Error),

    #[error("Redis エラー: {0}")]
    Redis(#[source] redis::RedisError),

    #[error("シリアライズエラー: {0}")]
    Serialization(#[source] serde_json::Error),

    /// Webhook などの HTTP 呼び出しの失敗
    #[error("HTTP エラー: {0}")]
    Http(#[source] reqwest::Error),

    /// 条件付き更新の競合
    ///
    /// キャンペーン集計の加算が総数を超える場合などに返す。
    #[error("競合が発生しました: {entity}(id={id})")]
    Conflict {
        entity: String,
        id:     String,
    },

    /// 保存済みデータを復元できない（不正な列挙値など）
    #[error("保存データが不正です: {0}")]
    CorruptData(String),

    #[error("予期しないエラー: {0}")]
    Unexpected(String),
}

impl InfraError {
    pub fn kind(&self) -> &InfraErrorKind {
        &self.kind
    }

    pub fn span_trace(&self) -> &SpanTrace {
        &self.span_trace
    }

    // ===== Convenience constructors =====

    pub fn conflict(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::with_kind(InfraErrorKind::Conflict {
            entity: entity.into(),
            id:     id.into(),
        })
    }

    pub fn corrupt_data(msg: impl Into<String>) -> Self {
        Self::with_kind(InfraErrorKind::CorruptData(msg.into()))
    }

    pub fn unexpected(msg: impl Into<String>) -> Self {
        Self::with_kind(InfraErrorKind::Unexpected(msg.into()))
    }

    fn with_kind(kind: InfraErrorKind) -> Self {
        Self {
            kind,
            span_trace: SpanTrace::capture(),
        }
    }
}

impl fmt::Debug for InfraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InfraError")
            .field("kind", &self.kind)
            .field("span_trace", &self.span_trace)
            .finish()
    }
}

impl std::error::Error for InfraError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.kind.source()
    }
}

// ===== From 実装（SpanTrace 自動キャプチャ） =====

impl From<sqlx::Error> for InfraError {
    fn from(source: sqlx::Error) -> Self {
        Self::with_kind(InfraErrorKind::Database(source))
    }
}

impl From<redis::RedisError> for InfraError {
    fn from(source: redis::RedisError) -> Self {
        Self::with_kind(InfraErrorKind::Redis(source))
    }
}

impl From<serde_json::Error> for InfraError {
    fn from(source: serde_json::Error) -> Self {
        Self::with_kind(InfraErrorKind::Serialization(source))
    }
}

impl From<reqwest::Error> for InfraError {
    fn from(source: reqwest::Error) -> Self {
        Self::with_kind(InfraErrorKind::Http(source))
    }
}

#[cfg(test)]
mod tests {
    use tracing_subscriber::layer::SubscriberExt as _;

    use super::*;

    fn with_error_layer(f: impl FnOnce()) {
        let subscriber = tracing_subscriber::registry().with(tracing_error::ErrorLayer::default());
        let _guard = tracing::subscriber::set_default(subscriber);
        f();
    }

    #[test]
    fn test_from_sqlx_errorでspan_traceがキャプチャされる() {
        with_error_layer(|| {
            let span = tracing::info_span!("delivery_record_insert");
            let _enter = span.enter();

            let err: InfraError = sqlx::Error::RowNotFound.into();

            assert!(matches!(err.kind(), InfraErrorKind::Database(_)));
            let trace_str = format!("{}", err.span_trace());
            assert!(
                trace_str.contains("delivery_record_insert"),
                "SpanTrace がスパン名を含むこと: {trace_str}",
            );
        });
    }

    #[test]
    fn test_from_redis_errorはredis種別になる() {
        let redis_err: redis::RedisError = (redis::ErrorKind::Io, "接続失敗").into();
        let err: InfraError = redis_err.into();

        assert!(matches!(err.kind(), InfraErrorKind::Redis(_)));
    }

    #[test]
    fn test_conflictはentityとidを表示に含める() {
        let err = InfraError::conflict("Campaign", "c-001");

        assert!(matches!(
            err.kind(),
            InfraErrorKind::Conflict { entity, id } if entity == "Campaign" && id == "c-001"
        ));
        assert_eq!(err.to_string(), "競合が発生しました: Campaign(id=c-001)");
    }

    #[test]
    fn test_sourceは元のエラーを返す() {
        use std::error::Error as _;

        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: InfraError = json_err.into();

        assert!(err.source().is_some());
    }
}
