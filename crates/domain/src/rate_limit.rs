//! # ロール別の発行上限
//!
//! ワンタイムコードの発行回数を、利用者のロールごとに時間窓内で制限する。
//!
//! | ロール | 1 時間あたりの上限 |
//! |--------|-------------------|
//! | `user` | 6 |
//! | `owner` | 8 |
//! | `admin` | 10 |
//!
//! 上限は [`QuotaTable`] にデータとして持ち、判定は純粋関数で行う。
//! 件数そのものは保存せず、監査イベントを数えて導出する（[`crate::audit_event`]）。

use std::collections::HashMap;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

/// 利用者のロール
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    IntoStaticStr,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    /// 入居者・ゲスト
    #[default]
    User,
    /// 物件オーナー
    Owner,
    Admin,
}

impl Role {
    /// メッセージ用の複数形
    pub fn plural(self) -> &'static str {
        match self {
            Self::User => "users",
            Self::Owner => "owners",
            Self::Admin => "admins",
        }
    }
}

/// ロール別の上限表
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaTable {
    quotas: HashMap<Role, u32>,
    window: Duration,
}

impl QuotaTable {
    pub const DEFAULT_USER: u32 = 6;
    pub const DEFAULT_OWNER: u32 = 8;
    pub const DEFAULT_ADMIN: u32 = 10;

    pub fn new(quotas: HashMap<Role, u32>, window: Duration) -> Self {
        Self { quotas, window }
    }

    /// 上限表を 1 ロール分だけ差し替える
    pub fn with_quota(mut self, role: Role, max: u32) -> Self {
        self.quotas.insert(role, max);
        self
    }

    /// ロールの上限
    ///
    /// 表に無いロールは `user` の上限で扱う。
    pub fn max_for(&self, role: Role) -> u32 {
        self.quotas
            .get(&role)
            .or_else(|| self.quotas.get(&Role::User))
            .copied()
            .unwrap_or(Self::DEFAULT_USER)
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// 時間窓内の件数から発行可否を判定する
    pub fn decide(&self, role: Role, count_in_window: u32) -> RateLimitDecision {
        let max = self.max_for(role);
        if count_in_window < max {
            RateLimitDecision::Allowed {
                remaining: max - count_in_window,
            }
        } else {
            RateLimitDecision::Rejected { max }
        }
    }
}

impl Default for QuotaTable {
    fn default() -> Self {
        Self::new(
            HashMap::from([
                (Role::User, Self::DEFAULT_USER),
                (Role::Owner, Self::DEFAULT_OWNER),
                (Role::Admin, Self::DEFAULT_ADMIN),
            ]),
            Duration::hours(1),
        )
    }
}

/// 判定結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// 許可（今回を含めて残り `remaining` 回発行できる）
    Allowed { remaining: u32 },
    /// 上限到達
    Rejected { max: u32 },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}
