use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user profile synced from the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub external_id: String,
    pub name: String,
    pub email: String,
    pub avatar_url: String,
    pub is_online: bool,
    /// Milliseconds since the Unix epoch.
    pub last_seen: i64,
    pub created_at: DateTime<Utc>,
}

/// Which kind of chat a message or typing row belongs to.
/// Direct conversations and groups share one message store, discriminated
/// by this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Dm,
    Group,
}

impl ChatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dm => "dm",
            Self::Group => "group",
        }
    }
}

impl fmt::Display for ChatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChatKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dm" => Ok(Self::Dm),
            "group" => Ok(Self::Group),
            other => Err(format!("unknown chat kind: {other}")),
        }
    }
}

/// Identifies a single chat: a direct conversation or a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatRef {
    pub kind: ChatKind,
    pub id: Uuid,
}

impl ChatRef {
    pub fn dm(id: Uuid) -> Self {
        Self { kind: ChatKind::Dm, id }
    }

    pub fn group(id: Uuid) -> Self {
        Self { kind: ChatKind::Group, id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_kind_round_trip() {
        assert_eq!("dm".parse::<ChatKind>().unwrap(), ChatKind::Dm);
        assert_eq!("group".parse::<ChatKind>().unwrap(), ChatKind::Group);
        assert!("voice".parse::<ChatKind>().is_err());
        assert_eq!(ChatKind::Dm.as_str(), "dm");
    }
}
