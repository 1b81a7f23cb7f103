//! 实体类型枚举
//!
//! 同步引擎按实体类型分组处理事件，补丁中每种类型各有一组 upsert/remove。

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 镜像的实体类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    Mail,
    Folder,
    Contact,
    ConversationEntry,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Mail,
        EntityKind::Folder,
        EntityKind::Contact,
        EntityKind::ConversationEntry,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mail => "mails",
            Self::Folder => "folders",
            Self::Contact => "contacts",
            Self::ConversationEntry => "conversationEntries",
        }
    }
}

impl FromStr for EntityKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mails" => Ok(Self::Mail),
            "folders" => Ok(Self::Folder),
            "contacts" => Ok(Self::Contact),
            "conversationEntries" => Ok(Self::ConversationEntry),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_kind_as_str_and_from_str() {
        assert_eq!(EntityKind::Mail.as_str(), "mails");
        assert_eq!(EntityKind::ConversationEntry.to_string(), "conversationEntries");
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::from_str(kind.as_str()).unwrap(), kind);
        }
        assert!(EntityKind::from_str("unknown").is_err());
    }
}
