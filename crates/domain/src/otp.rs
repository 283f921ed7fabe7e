//! # ワンタイムコード
//!
//! メールで送る数字のワンタイムコード（OTP）と、その状態遷移を定義する。
//!
//! ## 状態遷移
//!
//! ```text
//! issued ──verify──→ verified ──consume──→ consumed
//!    │                  │
//!    └──── 期限切れ ────┴──→ expired
//! ```
//!
//! - 検証（verify）は未使用のコードに対して 1 回だけ成功する。検証は使用済みにしない
//! - 使用（consume）は検証済みのコードに対して 1 回だけ成功し、以後は二度と使えない
//! - 同じ identity に新しいコードを発行すると、未使用の古いコードはすべて破棄される
//!
//! コードの比較は定数時間で行う（`subtle`）。

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::{DomainError, rate_limit::Role, recipient::Email};

define_uuid_id! {
    /// ワンタイムコード ID
    pub struct OneTimeCodeId;
}

/// 数字のみのコード値
#[derive(Clone, PartialEq, Eq)]
pub struct OtpCode(String);

impl OtpCode {
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.is_empty() || !value.chars().all(|c| c.is_ascii_digit()) {
            return Err(DomainError::Validation(
                "ワンタイムコードは数字のみで構成される必要があります".to_string(),
            ));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 入力値と一致するか（定数時間比較）
    pub fn matches(&self, candidate: &str) -> bool {
        self.0.as_bytes().ct_eq(candidate.trim().as_bytes()).into()
    }
}

// コード値をログに出さない
impl std::fmt::Debug for OtpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("OtpCode").field(&"[REDACTED]").finish()
    }
}

/// 発行ポリシー（桁数・有効期限）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtpPolicy {
    code_length: usize,
    ttl:         Duration,
}

impl OtpPolicy {
    pub const DEFAULT_CODE_LENGTH: usize = 6;
    pub const DEFAULT_TTL_SECONDS: i64 = 300;

    pub fn new(code_length: usize, ttl: Duration) -> Result<Self, DomainError> {
        if !(4..=10).contains(&code_length) {
            return Err(DomainError::Validation(format!(
                "ワンタイムコードの桁数は 4〜10 桁である必要があります: {code_length}"
            )));
        }
        if ttl <= Duration::zero() {
            return Err(DomainError::Validation(
                "ワンタイムコードの有効期限は正の値である必要があります".to_string(),
            ));
        }
        Ok(Self { code_length, ttl })
    }

    pub fn code_length(&self) -> usize {
        self.code_length
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl Default for OtpPolicy {
    fn default() -> Self {
        Self {
            code_length: Self::DEFAULT_CODE_LENGTH,
            ttl:         Duration::seconds(Self::DEFAULT_TTL_SECONDS),
        }
    }
}

/// 検証・使用の失敗理由
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum OtpError {
    #[error("有効なワンタイムコードがありません")]
    NotFound,

    #[error("ワンタイムコードの有効期限が切れています")]
    Expired,

    #[error("ワンタイムコードが一致しません")]
    Mismatch,

    #[error("ワンタイムコードは検証済みです")]
    AlreadyVerified,

    #[error("ワンタイムコードが検証されていません")]
    NotVerified,

    #[error("ワンタイムコードは使用済みです")]
    AlreadyConsumed,
}

/// ワンタイムコードの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OtpState {
    Issued,
    Verified,
    Consumed,
    Expired,
}

/// ワンタイムコード エンティティ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneTimeCode {
    id:         OneTimeCodeId,
    identity:   Email,
    code:       OtpCode,
    role:       Role,
    expires_at: DateTime<Utc>,
    verified:   bool,
    consumed:   bool,
    created_at: DateTime<Utc>,
}

impl OneTimeCode {
    pub fn new(
        identity: Email,
        code: OtpCode,
        role: Role,
        policy: &OtpPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: OneTimeCodeId::new(),
            identity,
            code,
            role,
            expires_at: now + policy.ttl(),
            verified: false,
            consumed: false,
            created_at: now,
        }
    }

    /// データベースから復元する
    #[allow(clippy::too_many_arguments)]
    pub fn from_db(
        id: OneTimeCodeId,
        identity: Email,
        code: OtpCode,
        role: Role,
        expires_at: DateTime<Utc>,
        verified: bool,
        consumed: bool,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            identity,
            code,
            role,
            expires_at,
            verified,
            consumed,
            created_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn state(&self, now: DateTime<Utc>) -> OtpState {
        if self.consumed {
            OtpState::Consumed
        } else if self.is_expired(now) {
            OtpState::Expired
        } else if self.verified {
            OtpState::Verified
        } else {
            OtpState::Issued
        }
    }

    /// 入力されたコードを検証し、検証済みにする
    pub fn verify(&mut self, candidate: &str, now: DateTime<Utc>) -> Result<(), OtpError> {
        match self.state(now) {
            OtpState::Consumed => return Err(OtpError::AlreadyConsumed),
            OtpState::Expired => return Err(OtpError::Expired),
            OtpState::Verified => return Err(OtpError::AlreadyVerified),
            OtpState::Issued => {}
        }
        if !self.code.matches(candidate) {
            return Err(OtpError::Mismatch);
        }
        self.verified = true;
        Ok(())
    }

    /// 検証済みのコードを使用済みにする
    pub fn consume(&mut self, candidate: &str, now: DateTime<Utc>) -> Result<(), OtpError> {
        match self.state(now) {
            OtpState::Consumed => return Err(OtpError::AlreadyConsumed),
            OtpState::Expired => return Err(OtpError::Expired),
            OtpState::Issued => return Err(OtpError::NotVerified),
            OtpState::Verified => {}
        }
        if !self.code.matches(candidate) {
            return Err(OtpError::Mismatch);
        }
        self.consumed = true;
        Ok(())
    }

    /// 使用済みコードのブラックリストキー
    pub fn blacklist_key(&self) -> String {
        format!("otp:consumed:{}", self.id)
    }

    // Getter メソッド

    pub fn id(&self) -> &OneTimeCodeId {
        &self.id
    }

    pub fn identity(&self) -> &Email {
        &self.identity
    }

    pub fn code(&self) -> &OtpCode {
        &self.code
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_verified(&self) -> bool {
        self.verified
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
