//! # 監査イベント
//!
//! 利用者ごとの操作履歴を表す不変のイベント。
//!
//! ## 2 つの利用者
//!
//! 同じイベントを 2 つの目的で読む。片方の都合で形を変える場合はもう片方への影響を確認すること。
//!
//! - **履歴表示**: 管理画面で「いつ・誰に・何をしたか」を一覧する
//! - **レート制限**: `(identity, action, role)` で直近の時間窓内の件数を数え、発行上限の判定に使う
//!
//! ## アクション体系
//!
//! | バリアント | 文字列表現 |
//! |-----------|-----------|
//! | `OtpIssue` | `otp.issue` |
//! | `OtpVerify` | `otp.verify` |
//! | `OtpConsume` | `otp.consume` |

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{rate_limit::Role, recipient::Email};

/// 監査対象のアクション
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditAction {
   /// ワンタイムコードの発行（再送を含む）
   OtpIssue,
   OtpVerify,
   OtpConsume,
}

impl fmt::Display for AuditAction {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      let s = match self {
         Self::OtpIssue => "otp.issue",
         Self::OtpVerify => "otp.verify",
         Self::OtpConsume => "otp.consume",
      };
      write!(f, "{s}")
   }
}

impl FromStr for AuditAction {
   type Err = String;

   fn from_str(s: &str) -> Result<Self, Self::Err> {
      match s {
         "otp.issue" => Ok(Self::OtpIssue),
         "otp.verify" => Ok(Self::OtpVerify),
         "otp.consume" => Ok(Self::OtpConsume),
         _ => Err(format!("不明な監査アクション: {s}")),
      }
   }
}

/// 監査イベント
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
   pub id: Uuid,
   pub identity: Email,
   pub action: AuditAction,
   pub role: Role,
   pub detail: Option<serde_json::Value>,
   pub created_at: DateTime<Utc>,
}

impl AuditEvent {
   pub fn new(
      identity: Email,
      action: AuditAction,
      role: Role,
      detail: Option<serde_json::Value>,
      now: DateTime<Utc>,
   ) -> Self {
      Self {
         id: Uuid::now_v7(),
         identity,
         action,
         role,
         detail,
         created_at: now,
      }
   }

   /// レート制限の集計キーに一致するか
   pub fn matches(&self, identity: &Email, action: AuditAction, role: Role) -> bool {
      self.identity == *identity && self.action == action && self.role == role
   }
}
