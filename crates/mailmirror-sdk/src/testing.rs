//! 测试辅助：实体构造器与脚本化的 Provider

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{MirrorError, ProviderError, Result};
use crate::storage::encryption::{AesGcmEncryptionAdapter, EncryptionAdapter};
use crate::storage::entities::{
    Contact, ConversationEntry, EventCursor, Folder, FolderType, Mail, MailAddress,
};
use crate::sync::entity_kind::EntityKind;
use crate::sync::provider::{ChangesPage, EntityRef, Page, ProviderApi, RemoteEntity};

pub fn mail(pk: &str, folder_id: &str) -> Mail {
    Mail {
        pk: pk.to_string(),
        id: pk.to_string(),
        raw: format!("{{\"ID\":\"{}\"}}", pk),
        conversation_entry_pk: format!("entry-{}", pk),
        mail_folder_ids: vec![folder_id.to_string()],
        subject: format!("subject {}", pk),
        sent_date: 1_600_000_000_000,
        received_date: 1_600_000_001_000,
        sender: MailAddress {
            address: "sender@example.com".to_string(),
            name: "Sender".to_string(),
        },
        to_recipients: vec![MailAddress {
            address: "alice@example.com".to_string(),
            name: String::new(),
        }],
        body: Some(format!("<p>body {}</p>", pk)),
        ..Default::default()
    }
}

pub fn folder(pk: &str) -> Folder {
    let folder_type = match pk {
        "inbox" => FolderType::Inbox,
        "sent" => FolderType::Sent,
        "trash" => FolderType::Trash,
        "archive" => FolderType::Archive,
        _ => FolderType::Custom,
    };
    Folder {
        pk: pk.to_string(),
        id: pk.to_string(),
        raw: String::new(),
        title: pk.to_uppercase(),
        folder_type,
        parent_id: None,
    }
}

pub fn contact(pk: &str) -> Contact {
    Contact {
        pk: pk.to_string(),
        id: pk.to_string(),
        first_name: format!("first {}", pk),
        mail_addresses: vec![format!("{}@example.com", pk)],
        ..Default::default()
    }
}

pub fn conversation_entry(pk: &str, mail_pk: Option<&str>) -> ConversationEntry {
    ConversationEntry {
        pk: pk.to_string(),
        id: pk.to_string(),
        mail_pk: mail_pk.map(str::to_string),
        ..Default::default()
    }
}

pub fn test_adapter() -> Arc<dyn EncryptionAdapter> {
    let key = AesGcmEncryptionAdapter::generate_key();
    Arc::new(AesGcmEncryptionAdapter::new(&key).expect("valid generated key"))
}

#[derive(Default)]
struct MockState {
    latest_cursor: EventCursor,
    latest_cursor_error: Option<ProviderError>,
    latest_cursor_calls: usize,
    changes: VecDeque<ChangesPage>,
    changes_error: Option<ProviderError>,
    requested_cursors: Vec<EventCursor>,
    paged: HashMap<EntityKind, Vec<Page>>,
    entities: HashMap<(EntityKind, String), RemoteEntity>,
    fetch_errors: HashMap<String, ProviderError>,
    fetch_by_id_calls: usize,
}

/// 脚本化的 Provider：按预设返回数据或错误，并记录调用
#[derive(Default)]
pub struct MockProvider {
    state: Mutex<MockState>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_latest_cursor(&self, cursor: EventCursor) {
        self.state.lock().latest_cursor = cursor;
    }

    pub fn fail_latest_cursor(&self, error: ProviderError) {
        self.state.lock().latest_cursor_error = Some(error);
    }

    pub fn latest_cursor_calls(&self) -> usize {
        self.state.lock().latest_cursor_calls
    }

    pub fn push_changes(&self, page: ChangesPage) {
        self.state.lock().changes.push_back(page);
    }

    /// 之后每次拉取变更都返回该错误
    pub fn fail_changes(&self, error: ProviderError) {
        self.state.lock().changes_error = Some(error);
    }

    pub fn requested_cursors(&self) -> Vec<EventCursor> {
        self.state.lock().requested_cursors.clone()
    }

    /// 按 page_size 切分为多页，页码作为翻页 token
    pub fn set_paged(&self, kind: EntityKind, items: Vec<RemoteEntity>, page_size: usize) {
        let chunks: Vec<Vec<RemoteEntity>> = items
            .chunks(page_size.max(1))
            .map(|chunk| chunk.to_vec())
            .collect();
        let total = chunks.len();
        let pages = chunks
            .into_iter()
            .enumerate()
            .map(|(index, items)| Page {
                items,
                next_page_token: (index + 1 < total).then(|| (index + 1).to_string()),
            })
            .collect();
        self.state.lock().paged.insert(kind, pages);
    }

    pub fn set_entity(&self, entity: RemoteEntity) {
        let key = (entity.kind(), entity.pk().to_string());
        self.state.lock().entities.insert(key, entity);
    }

    pub fn set_fetch_error(&self, id: &str, error: ProviderError) {
        self.state.lock().fetch_errors.insert(id.to_string(), error);
    }

    pub fn fetch_by_id_calls(&self) -> usize {
        self.state.lock().fetch_by_id_calls
    }
}

#[async_trait]
impl ProviderApi for MockProvider {
    async fn latest_cursor(&self) -> Result<EventCursor> {
        let mut state = self.state.lock();
        state.latest_cursor_calls += 1;
        if let Some(error) = &state.latest_cursor_error {
            return Err(MirrorError::Provider(error.clone()));
        }
        Ok(state.latest_cursor.clone())
    }

    async fn fetch_changes_since(&self, cursor: &EventCursor) -> Result<ChangesPage> {
        let mut state = self.state.lock();
        state.requested_cursors.push(cursor.clone());
        if let Some(error) = &state.changes_error {
            return Err(MirrorError::Provider(error.clone()));
        }
        Ok(state.changes.pop_front().unwrap_or_else(|| ChangesPage {
            next_cursor: cursor.clone(),
            ..Default::default()
        }))
    }

    async fn fetch_all_paged(&self, kind: EntityKind, page_token: Option<&str>) -> Result<Page> {
        let state = self.state.lock();
        let index = match page_token {
            None => 0,
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| MirrorError::Provider(ProviderError::new(400, "bad page token")))?,
        };
        Ok(state
            .paged
            .get(&kind)
            .and_then(|pages| pages.get(index))
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_by_id(&self, kind: EntityKind, entity: &EntityRef) -> Result<RemoteEntity> {
        let mut state = self.state.lock();
        state.fetch_by_id_calls += 1;
        if let Some(error) = state.fetch_errors.get(&entity.id) {
            return Err(MirrorError::Provider(error.clone()));
        }
        state
            .entities
            .get(&(kind, entity.pk()))
            .cloned()
            .ok_or_else(|| MirrorError::Provider(ProviderError::new(404, "not found")))
    }
}
