//! # 送信リトライポリシー
//!
//! 一時的な送信失敗に対する試行回数と指数バックオフの待ち時間を決める。
//!
//! 待ち時間は `base * 2^(attempt - 1)` を `max_delay` で頭打ちにする。
//! 既定値では 1 回目の失敗後に 1 秒、2 回目の失敗後に 2 秒待ち、3 回目で打ち切る。

use std::time::Duration;

use renthub_domain::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay:   Duration,
    max_delay:    Duration,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
    ) -> Result<Self, DomainError> {
        if max_attempts == 0 {
            return Err(DomainError::Validation(
                "最大試行回数は 1 以上である必要があります".to_string(),
            ));
        }
        Ok(Self {
            max_attempts,
            base_delay,
            max_delay: max_delay.max(base_delay),
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// `attempt` 回目の試行が失敗した後、次の試行までに待つ時間
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// `attempt` 回目の試行の後にまだ試行できるか
    pub fn has_attempts_left(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            base_delay:   Duration::from_secs(1),
            max_delay:    Duration::from_secs(30),
        }
    }
}

/// ログ出力用のミリ秒。`u64` に収まらない値は `u64::MAX` に丸める
pub(crate) fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
