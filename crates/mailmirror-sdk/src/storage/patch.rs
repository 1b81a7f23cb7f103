//! 数据库补丁模型
//!
//! `DbPatch` 是同步引擎产出、数据库消费的唯一差异单元：
//! 每种实体一组 upsert/remove，同一补丁内同一 pk 不能同时出现在两边。

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{MirrorError, Result};
use crate::storage::entities::{
    AccountMetadata, Account, Contact, ConversationEntry, Entity, EventCursor, FetchStage, Folder,
    Mail, Pk,
};

/// 删除引用
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PkRef {
    pub pk: Pk,
}

impl PkRef {
    pub fn new(pk: impl Into<Pk>) -> Self {
        Self { pk: pk.into() }
    }
}

/// 单一实体类型的补丁
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Entity"))]
pub struct EntityPatch<T> {
    #[serde(default)]
    pub upsert: Vec<T>,
    #[serde(default)]
    pub remove: Vec<PkRef>,
}

impl<T> Default for EntityPatch<T> {
    fn default() -> Self {
        Self {
            upsert: Vec::new(),
            remove: Vec::new(),
        }
    }
}

impl<T: Entity> EntityPatch<T> {
    pub fn is_empty(&self) -> bool {
        self.upsert.is_empty() && self.remove.is_empty()
    }

    pub fn len(&self) -> usize {
        self.upsert.len() + self.remove.len()
    }

    /// 校验同一 pk 不同时出现在 upsert 与 remove 中
    pub fn validate(&self, kind: &str) -> Result<()> {
        let upserted: HashSet<&str> = self.upsert.iter().map(|e| e.pk()).collect();
        if let Some(conflict) = self.remove.iter().find(|r| upserted.contains(r.pk.as_str())) {
            return Err(MirrorError::InvalidData(format!(
                "{} 补丁中 pk 同时出现在 upsert 与 remove: {}",
                kind, conflict.pk
            )));
        }
        Ok(())
    }

    /// 先删除后按 pk 覆盖写入，返回是否有实际变更
    pub fn apply_to(&self, target: &mut BTreeMap<Pk, T>) -> bool {
        let mut modified = false;
        for removal in &self.remove {
            if target.remove(&removal.pk).is_some() {
                modified = true;
            }
        }
        for entity in &self.upsert {
            match target.get(entity.pk()) {
                Some(existing) if existing == entity => {}
                _ => {
                    target.insert(entity.pk().to_string(), entity.clone());
                    modified = true;
                }
            }
        }
        modified
    }

    /// 合并另一个补丁（后者追加在后）
    pub fn extend(&mut self, other: EntityPatch<T>) {
        self.upsert.extend(other.upsert);
        self.remove.extend(other.remove);
    }
}

/// 数据库补丁
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbPatch {
    #[serde(default)]
    pub mails: EntityPatch<Mail>,
    #[serde(default)]
    pub folders: EntityPatch<Folder>,
    #[serde(default)]
    pub contacts: EntityPatch<Contact>,
    #[serde(default)]
    pub conversation_entries: EntityPatch<ConversationEntry>,
}

impl DbPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.mails.is_empty()
            && self.folders.is_empty()
            && self.contacts.is_empty()
            && self.conversation_entries.is_empty()
    }

    /// 补丁内的条目总数（upsert + remove）
    pub fn len(&self) -> usize {
        self.mails.len() + self.folders.len() + self.contacts.len() + self.conversation_entries.len()
    }

    pub fn validate(&self) -> Result<()> {
        self.mails.validate("mails")?;
        self.folders.validate("folders")?;
        self.contacts.validate("contacts")?;
        self.conversation_entries.validate("conversationEntries")?;
        Ok(())
    }

    /// 应用到账号，返回实体是否有实际变更
    pub fn apply_to(&self, account: &mut Account) -> bool {
        // 逐个求值，避免短路跳过后续实体类型
        let mails = self.mails.apply_to(&mut account.mails);
        let folders = self.folders.apply_to(&mut account.folders);
        let contacts = self.contacts.apply_to(&mut account.contacts);
        let entries = self.conversation_entries.apply_to(&mut account.conversation_entries);
        mails || folders || contacts || entries
    }

    pub fn extend(&mut self, other: DbPatch) {
        self.mails.extend(other.mails);
        self.folders.extend(other.folders);
        self.contacts.extend(other.contacts);
        self.conversation_entries.extend(other.conversation_entries);
    }
}

/// 元数据补丁（None 表示不修改该字段）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataPatch {
    pub latest_event_id: Option<EventCursor>,
    pub fetch_stage: Option<FetchStage>,
}

impl MetadataPatch {
    pub fn new(latest_event_id: EventCursor, fetch_stage: FetchStage) -> Self {
        Self {
            latest_event_id: Some(latest_event_id),
            fetch_stage: Some(fetch_stage),
        }
    }

    /// 合并到现有元数据，返回是否有实际变更
    pub fn apply_to(&self, metadata: &mut AccountMetadata) -> bool {
        let before = metadata.clone();
        if let Some(cursor) = &self.latest_event_id {
            metadata.latest_event_id = cursor.clone();
        }
        if let Some(stage) = self.fetch_stage {
            metadata.fetch_stage = stage;
        }
        *metadata != before
    }
}
