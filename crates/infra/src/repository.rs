//! # リポジトリ
//!
//! 永続化の境界となるトレイトと、その PostgreSQL 実装を提供する。
//!
//! ## 設計方針
//!
//! - **トレイト経由の注入**: ユースケース層は `Arc<dyn XxxRepository>` だけに依存する
//! - **実行時クエリ**: `sqlx::query` / `query_as` を使い、ビルド時にデータベースを要求しない
//! - **条件付き更新**: 集計の加算や状態遷移は `WHERE` 句に前提条件を含めた 1 文で行い、
//!   前提が崩れていれば更新件数 0 として検出する

pub mod audit_event_repository;
pub mod campaign_repository;
pub mod delivery_record_repository;
pub mod one_time_code_repository;

pub use audit_event_repository::{AuditEventRepository, PostgresAuditEventRepository};
pub use campaign_repository::{CampaignRepository, PostgresCampaignRepository};
pub use delivery_record_repository::{
    DeliveryRecordRepository,
    PostgresDeliveryRecordRepository,
};
pub use one_time_code_repository::{OneTimeCodeRepository, PostgresOneTimeCodeRepository};

use crate::error::InfraError;

/// 保存済みの文字列列挙値を復元する
fn parse_column<T>(column: &str, value: &str) -> Result<T, InfraError>
where
    T: std::str::FromStr,
{
    value
        .parse()
        .map_err(|_| InfraError::corrupt_data(format!("{column} の値が不正です: {value}")))
}

/// 件数列（INTEGER）を u32 に変換する
fn to_u32(column: &str, value: i32) -> Result<u32, InfraError> {
    u32::try_from(value)
        .map_err(|_| InfraError::corrupt_data(format!("{column} が負の値です: {value}")))
}

/// u32 を INTEGER 列に書き込める値に変換する
fn to_i32(column: &str, value: u32) -> Result<i32, InfraError> {
    i32::try_from(value)
        .map_err(|_| InfraError::unexpected(format!("{column} が INTEGER の範囲を超えます: {value}")))
}
