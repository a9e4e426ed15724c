//! src/domain/list_id.rs

/// Identifies a logical mailing list on the provider side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ListId(i32);

impl ListId {
    /// The one list every user can opt in to.
    pub const GLOBAL: ListId = ListId(-1);

    pub fn as_i32(&self) -> i32 {
        self.0
    }
}

impl std::fmt::Display for ListId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
