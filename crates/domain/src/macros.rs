/// UUID v7 ベースの ID 型を定義する宣言型マクロ
///
/// Newtype 構造体と `new()` / `from_uuid()` / `as_uuid()` / `Default` をまとめて生成する。
/// UUID v7 は時刻順に並ぶため、配信記録や監査イベントの挿入順インデックスとも相性が良い。
///
/// # 使用例
///
/// ```rust
/// use renthub_domain::campaign::CampaignId;
///
/// let id = CampaignId::new();
/// let restored = CampaignId::from_uuid(*id.as_uuid());
/// assert_eq!(id, restored);
/// ```
macro_rules! define_uuid_id {
    (
        $(#[$meta:meta])*
        $vis:vis struct $Name:ident;
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash,
            serde::Serialize, serde::Deserialize,
            derive_more::Display,
        )]
        #[display("{_0}")]
        #[serde(transparent)]
        $vis struct $Name(uuid::Uuid);

        impl $Name {
            /// 新しい ID を生成する（UUID v7）
            pub fn new() -> Self {
                Self(uuid::Uuid::now_v7())
            }

            /// 永続化された UUID から ID を復元する
            pub fn from_uuid(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &uuid::Uuid {
                &self.0
            }
        }

        impl Default for $Name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}
