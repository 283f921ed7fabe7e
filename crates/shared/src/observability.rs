//! # Observability 基盤
//!
//! 通知サービスのトレーシング初期化を提供する。
//!
//! ## 設計方針
//!
//! - **出力形式は環境変数で切り替える**: 本番は `LOG_FORMAT=json`、開発は Pretty
//! - **ErrorLayer を常に登録する**: `InfraError` の `SpanTrace` にスパン経路を残す
//! - **ビジネスイベントは JSON のトップレベルに出す**: `event.kind` などで集計できるよう flatten する

/// ログ出力形式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// JSON 形式（本番環境向け）
    Json,
    /// 人間が読みやすい形式（開発環境向け）
    #[default]
    Pretty,
}

impl LogFormat {
    /// 大文字小文字を区別せずにパースする
    ///
    /// 不正な値は Pretty にフォールバックする。トレーシング初期化前に呼ばれるため
    /// 警告は stderr に出す。
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("json") {
            Self::Json
        } else if s.eq_ignore_ascii_case("pretty") {
            Self::Pretty
        } else {
            eprintln!("WARNING: unknown LOG_FORMAT={s:?}, falling back to pretty");
            Self::Pretty
        }
    }
}

/// トレーシング初期化設定
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// 起動ログに出すサービス名
    pub service_name:   String,
    pub log_format:     LogFormat,
    /// `RUST_LOG` 未設定時のフィルタ
    pub default_filter: String,
}

impl TracingConfig {
    /// `LOG_FORMAT` で出力形式を決め、フィルタは `info,renthub=debug` とする
    pub fn from_env(service_name: impl Into<String>) -> Self {
        let log_format = std::env::var("LOG_FORMAT")
            .map(|v| LogFormat::parse(&v))
            .unwrap_or_default();
        Self {
            service_name: service_name.into(),
            log_format,
            default_filter: "info,renthub=debug".to_string(),
        }
    }
}

/// トレーシングを初期化する
///
/// `RUST_LOG` が設定されていればそちらを優先する。
#[cfg(feature = "observability")]
pub fn init_tracing(config: TracingConfig) {
    use tracing_subscriber::{Layer as _, layer::SubscriberExt, util::SubscriberInitExt};

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.default_filter.as_str().into());

    let fmt_layer = match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer().with_target(false).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(tracing_error::ErrorLayer::default())
        .init();

    tracing::debug!(
        service = %config.service_name,
        format = ?config.log_format,
        "トレーシングを初期化しました"
    );
}
