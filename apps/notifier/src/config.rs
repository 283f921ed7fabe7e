//! # 通知サービス設定
//!
//! 環境変数から通知サービスの設定を読み込む。
//!
//! 値の取得元を関数で受け取る [`NotifierConfig::from_lookup`] を用意し、
//! テストでは環境変数を書き換えずに HashMap から読み込む。

use std::{collections::HashMap, env, str::FromStr, time::Duration};

use renthub_domain::{
    otp::OtpPolicy,
    rate_limit::{QuotaTable, Role},
};
use thiserror::Error;

use crate::usecase::notification::RetryPolicy;

/// 設定読み込みエラー
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} が設定されていません")]
    Missing(&'static str),

    #[error("{name} の値が不正です: {value}")]
    Invalid { name: &'static str, value: String },
}

/// 送信バックエンド
///
/// `NOTIFICATION_BACKEND` 環境変数で切り替える:
/// - `smtp`: Mailpit（開発）/ SMTP サーバー経由で送信
/// - `ses`: Amazon SES v2 経由で送信（本番）
/// - `noop`: 送信しない（ログ出力のみ）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailBackend {
    Smtp,
    Ses,
    Noop,
}

impl FromStr for MailBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "smtp" => Ok(Self::Smtp),
            "ses" => Ok(Self::Ses),
            "noop" => Ok(Self::Noop),
            _ => Err(()),
        }
    }
}

/// 通知サービスの設定
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// バインドアドレス
    pub host:         String,
    pub port:         u16,
    /// データベース接続 URL
    pub database_url: String,
    /// Redis 接続 URL（未設定ならインメモリのブラックリストを使う）
    pub redis_url:    Option<String>,
    pub notification: NotificationConfig,
    pub retry:        RetryPolicy,
    pub otp:          OtpConfig,
}

/// メール送信の設定
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    pub backend:      MailBackend,
    /// SMTP ホスト（backend=smtp の場合に使用）
    pub smtp_host:    String,
    pub smtp_port:    u16,
    /// 送信元メールアドレス
    pub from_address: String,
}

/// ワンタイムコードの設定
#[derive(Debug, Clone)]
pub struct OtpConfig {
    pub quotas:           QuotaTable,
    pub policy:           OtpPolicy,
    /// 検証成功時に通知する Webhook URL
    pub webhook_url:      Option<String>,
    /// 期限切れコードの掃除間隔
    pub cleanup_interval: Duration,
}

impl NotifierConfig {
    /// 環境変数から設定を読み込む
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// 任意の取得元から設定を読み込む
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let reader = Reader { lookup: &lookup };

        let retry = RetryPolicy::new(
            reader.parse_or("MAIL_MAX_ATTEMPTS", RetryPolicy::DEFAULT_MAX_ATTEMPTS)?,
            Duration::from_millis(reader.parse_or("MAIL_RETRY_BASE_MS", 1_000)?),
            Duration::from_millis(reader.parse_or("MAIL_RETRY_MAX_MS", 30_000)?),
        )
        .map_err(|_| ConfigError::Invalid {
            name:  "MAIL_MAX_ATTEMPTS",
            value: reader.raw("MAIL_MAX_ATTEMPTS").unwrap_or_default(),
        })?;

        let quotas = QuotaTable::default()
            .with_quota(
                Role::User,
                reader.parse_or("OTP_QUOTA_USER", QuotaTable::DEFAULT_USER)?,
            )
            .with_quota(
                Role::Owner,
                reader.parse_or("OTP_QUOTA_OWNER", QuotaTable::DEFAULT_OWNER)?,
            )
            .with_quota(
                Role::Admin,
                reader.parse_or("OTP_QUOTA_ADMIN", QuotaTable::DEFAULT_ADMIN)?,
            );

        let code_length = reader.parse_or("OTP_CODE_LENGTH", OtpPolicy::DEFAULT_CODE_LENGTH)?;
        let ttl_seconds = reader.parse_or("OTP_TTL_SECONDS", OtpPolicy::DEFAULT_TTL_SECONDS)?;
        let policy = OtpPolicy::new(code_length, chrono::Duration::seconds(ttl_seconds))
            .map_err(|_| ConfigError::Invalid {
                name:  "OTP_CODE_LENGTH / OTP_TTL_SECONDS",
                value: format!("{code_length} / {ttl_seconds}"),
            })?;

        let cleanup_seconds: u64 = reader.parse_or("OTP_CLEANUP_INTERVAL_SECONDS", 300)?;
        if cleanup_seconds == 0 {
            return Err(ConfigError::Invalid {
                name:  "OTP_CLEANUP_INTERVAL_SECONDS",
                value: "0".to_string(),
            });
        }

        let backend_raw = reader.raw("NOTIFICATION_BACKEND").unwrap_or_else(|| "noop".to_string());
        let backend = backend_raw.parse().map_err(|()| ConfigError::Invalid {
            name:  "NOTIFICATION_BACKEND",
            value: backend_raw.clone(),
        })?;

        Ok(Self {
            host: reader.raw("NOTIFIER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: reader.parse_required("NOTIFIER_PORT")?,
            database_url: reader.required("DATABASE_URL")?,
            redis_url: reader.raw("REDIS_URL"),
            notification: NotificationConfig {
                backend,
                smtp_host: reader.raw("SMTP_HOST").unwrap_or_else(|| "localhost".to_string()),
                smtp_port: reader.parse_or("SMTP_PORT", 1025)?,
                from_address: reader
                    .raw("NOTIFICATION_FROM_ADDRESS")
                    .unwrap_or_else(|| "noreply@renthub.example.com".to_string()),
            },
            retry,
            otp: OtpConfig {
                quotas,
                policy,
                webhook_url: reader.raw("OTP_WEBHOOK_URL"),
                cleanup_interval: Duration::from_secs(cleanup_seconds),
            },
        })
    }

    /// テスト用に HashMap から読み込む
    pub fn from_map(values: &HashMap<&str, &str>) -> Result<Self, ConfigError> {
        Self::from_lookup(|name| values.get(name).map(|v| (*v).to_string()))
    }
}

struct Reader<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> Reader<'_, F> {
    /// 空文字列は未設定として扱う
    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.raw(name).ok_or(ConfigError::Missing(name))
    }

    fn parse_required<T: FromStr>(&self, name: &'static str) -> Result<T, ConfigError> {
        let value = self.required(name)?;
        value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value })
    }

    fn parse_or<T: FromStr>(&self, name: &'static str, default: T) -> Result<T, ConfigError> {
        match self.raw(name) {
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid { name, value }),
            None => Ok(default),
        }
    }
}
