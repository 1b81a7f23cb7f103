//! Provider API 边界
//!
//! 同步引擎只通过这个 trait 访问远端邮箱，具体 Provider 的数据提取
//! 由各自的适配器实现，不进入对账逻辑。

use async_trait::async_trait;

use crate::error::{MirrorError, ProviderError, Result};
use crate::storage::entities::{
    build_pk, Contact, ConversationEntry, Entity, EventCursor, Folder, Mail, Pk,
};
use crate::storage::patch::DbPatch;
use crate::sync::entity_kind::EntityKind;
use crate::sync::events::EntityChangeEvent;

/// 已被 Provider 删除的实体错误码（HTTP 422 时）
pub const ENTITY_ALREADY_REMOVED_CODE: u32 = 15052;

/// 实体引用（Provider 原生 id + 可选列表 id）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityRef {
    pub id: String,
    pub list_id: Option<String>,
}

impl EntityRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            list_id: None,
        }
    }

    pub fn with_list(id: impl Into<String>, list_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            list_id: Some(list_id.into()),
        }
    }

    pub fn pk(&self) -> Pk {
        build_pk(&self.id, self.list_id.as_deref())
    }
}

/// Provider 返回的已转换实体
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteEntity {
    Mail(Mail),
    Folder(Folder),
    Contact(Contact),
    ConversationEntry(ConversationEntry),
}

impl RemoteEntity {
    pub fn kind(&self) -> EntityKind {
        match self {
            RemoteEntity::Mail(_) => EntityKind::Mail,
            RemoteEntity::Folder(_) => EntityKind::Folder,
            RemoteEntity::Contact(_) => EntityKind::Contact,
            RemoteEntity::ConversationEntry(_) => EntityKind::ConversationEntry,
        }
    }

    pub fn pk(&self) -> &str {
        match self {
            RemoteEntity::Mail(e) => e.pk(),
            RemoteEntity::Folder(e) => e.pk(),
            RemoteEntity::Contact(e) => e.pk(),
            RemoteEntity::ConversationEntry(e) => e.pk(),
        }
    }

    /// 作为 upsert 加入补丁
    pub fn upsert_into(self, patch: &mut DbPatch) {
        match self {
            RemoteEntity::Mail(e) => patch.mails.upsert.push(e),
            RemoteEntity::Folder(e) => patch.folders.upsert.push(e),
            RemoteEntity::Contact(e) => patch.contacts.upsert.push(e),
            RemoteEntity::ConversationEntry(e) => patch.conversation_entries.upsert.push(e),
        }
    }
}

/// 增量变更页
#[derive(Debug, Clone, Default)]
pub struct ChangesPage {
    pub events: Vec<EntityChangeEvent>,
    pub next_cursor: EventCursor,
    /// 还有更多变更
    pub more: bool,
    /// Provider 要求全量刷新
    pub refresh: bool,
}

/// 全量分页结果
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<RemoteEntity>,
    pub next_page_token: Option<String>,
}

/// 错误分类
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorClass {
    pub retriable: bool,
    pub skippable: bool,
}

/// 默认的网络类错误判定：状态码 0/-1/503/504，或 Abort/Timeout/Offline 错误
pub fn is_network_error(error: &ProviderError) -> bool {
    matches!(error.status, 0 | -1 | 503 | 504)
        || matches!(
            error.name.to_lowercase().as_str(),
            "aborterror" | "timeouterror" | "offlineerror"
        )
}

#[async_trait]
pub trait ProviderApi: Send + Sync {
    /// 当前最新的事件游标
    async fn latest_cursor(&self) -> Result<EventCursor>;

    /// 拉取游标之后的变更
    async fn fetch_changes_since(&self, cursor: &EventCursor) -> Result<ChangesPage>;

    /// 全量分页拉取某类实体
    async fn fetch_all_paged(&self, kind: EntityKind, page_token: Option<&str>) -> Result<Page>;

    /// 按 id 拉取单个实体
    async fn fetch_by_id(&self, kind: EntityKind, entity: &EntityRef) -> Result<RemoteEntity>;

    /// 实体已不存在的错误特征（默认：404，或 422 + 15052）
    fn is_entity_gone(&self, error: &ProviderError) -> bool {
        error.status == 404
            || (error.status == 422 && error.code == Some(ENTITY_ALREADY_REMOVED_CODE))
    }

    /// 为重试管线分类错误
    fn preprocess_error(&self, error: &MirrorError) -> ErrorClass {
        match error {
            MirrorError::Provider(e) if is_network_error(e) => ErrorClass {
                retriable: true,
                skippable: true,
            },
            _ => ErrorClass::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockProvider;

    #[test]
    fn default_error_classification() {
        let provider = MockProvider::new();
        for error in [
            ProviderError::new(0, "offline"),
            ProviderError::new(-1, "offline"),
            ProviderError::new(503, "unavailable"),
            ProviderError::new(504, "gateway"),
            ProviderError::new(400, "x").with_name("TimeoutError"),
        ] {
            let class = provider.preprocess_error(&MirrorError::Provider(error));
            assert_eq!(class, ErrorClass { retriable: true, skippable: true });
        }
        let class = provider.preprocess_error(&MirrorError::Provider(ProviderError::new(500, "boom")));
        assert_eq!(class, ErrorClass::default());
        let class = provider.preprocess_error(&MirrorError::HeaderNotFound("x".into()));
        assert_eq!(class, ErrorClass::default());
    }

    #[test]
    fn default_entity_gone_signature() {
        let provider = MockProvider::new();
        assert!(provider.is_entity_gone(&ProviderError::new(404, "not found")));
        assert!(provider.is_entity_gone(&ProviderError::new(422, "removed").with_code(15052)));
        assert!(!provider.is_entity_gone(&ProviderError::new(422, "other").with_code(2001)));
        assert!(!provider.is_entity_gone(&ProviderError::new(500, "boom")));
    }

    #[test]
    fn entity_ref_pk() {
        assert_eq!(EntityRef::new("m1").pk(), "m1");
        assert_eq!(EntityRef::with_list("m1", "l1").pk(), r#"["l1","m1"]"#);
    }
}
