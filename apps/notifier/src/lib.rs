//! # 通知配信サービス ライブラリ
//!
//! 通知サービスのユースケース・ハンドラ・ルーター構築を公開する。
//! 結合テストから同じ組み立てでルーターを作れるよう、バイナリとは分けて置く。

pub mod app_builder;
pub mod config;
pub mod error;
pub mod handler;
pub mod usecase;
