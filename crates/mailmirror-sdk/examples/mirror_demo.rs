//! 镜像同步演示：内存 Provider -> 引导 -> 增量同步 -> 重新加载容器文件

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use mailmirror_sdk::error::{MirrorError, ProviderError, Result};
use mailmirror_sdk::storage::entities::MailAddress;
use mailmirror_sdk::sync::{ChangesPage, EntityRef, Page};
use mailmirror_sdk::{
    init_logging, AesGcmEncryptionAdapter, CompressionType, Database, EntityChangeEvent,
    EntityKind, EventAction, EventCursor, Folder, FolderType, Mail, MailSyncEngine, MirrorConfig,
    ProviderApi, SessionCookie, SessionStorage, SyncOutcome,
};
use mailmirror_sdk::sync::RemoteEntity;

/// 内存中的邮箱，模拟 Provider 的事件流
struct InMemoryProvider {
    cursor: Mutex<u64>,
    mails: Mutex<BTreeMap<String, Mail>>,
    folders: Vec<Folder>,
    pending: Mutex<VecDeque<EntityChangeEvent>>,
}

impl InMemoryProvider {
    fn new() -> Self {
        let folders = vec![
            folder("inbox", FolderType::Inbox),
            folder("trash", FolderType::Trash),
        ];
        let mails = (1..=7)
            .map(|i| {
                let id = format!("mail-{}", i);
                (id.clone(), demo_mail(&id, "inbox"))
            })
            .collect();
        Self {
            cursor: Mutex::new(1),
            mails: Mutex::new(mails),
            folders,
            pending: Mutex::new(VecDeque::new()),
        }
    }

    /// 模拟远端变更：新邮件 + 一封移入回收站
    fn simulate_changes(&self) {
        let mut mails = self.mails.lock();
        mails.insert("mail-8".to_string(), demo_mail("mail-8", "inbox"));
        if let Some(mail) = mails.get_mut("mail-2") {
            mail.mail_folder_ids = vec!["trash".to_string()];
        }
        let mut pending = self.pending.lock();
        pending.push_back(EntityChangeEvent::new(EntityKind::Mail, "mail-8", EventAction::Create));
        pending.push_back(
            EntityChangeEvent::new(EntityKind::Mail, "mail-2", EventAction::Update)
                .moved_to_terminal_folder(),
        );
        pending.push_back(EntityChangeEvent::new(EntityKind::Mail, "mail-3", EventAction::Delete));
        mails.remove("mail-3");
        *self.cursor.lock() += 1;
    }
}

fn folder(id: &str, folder_type: FolderType) -> Folder {
    Folder {
        pk: id.to_string(),
        id: id.to_string(),
        title: id.to_string(),
        folder_type,
        ..Default::default()
    }
}

fn demo_mail(id: &str, folder_id: &str) -> Mail {
    Mail {
        pk: id.to_string(),
        id: id.to_string(),
        subject: format!("Hello from {}", id),
        mail_folder_ids: vec![folder_id.to_string()],
        sender: MailAddress {
            address: "news@example.com".to_string(),
            name: "News".to_string(),
        },
        body: Some("<p>demo</p>".to_string()),
        ..Default::default()
    }
}

#[async_trait]
impl ProviderApi for InMemoryProvider {
    async fn latest_cursor(&self) -> Result<EventCursor> {
        Ok(EventCursor::Single(self.cursor.lock().to_string()))
    }

    async fn fetch_changes_since(&self, _cursor: &EventCursor) -> Result<ChangesPage> {
        Ok(ChangesPage {
            events: self.pending.lock().drain(..).collect(),
            next_cursor: EventCursor::Single(self.cursor.lock().to_string()),
            more: false,
            refresh: false,
        })
    }

    async fn fetch_all_paged(&self, kind: EntityKind, page_token: Option<&str>) -> Result<Page> {
        const PAGE_SIZE: usize = 3;
        let offset: usize = page_token.and_then(|t| t.parse().ok()).unwrap_or(0);
        let all: Vec<RemoteEntity> = match kind {
            EntityKind::Mail => self.mails.lock().values().cloned().map(RemoteEntity::Mail).collect(),
            EntityKind::Folder => self.folders.iter().cloned().map(RemoteEntity::Folder).collect(),
            _ => Vec::new(),
        };
        let items: Vec<RemoteEntity> = all.iter().skip(offset).take(PAGE_SIZE).cloned().collect();
        let next = offset + items.len();
        Ok(Page {
            items,
            next_page_token: (next < all.len()).then(|| next.to_string()),
        })
    }

    async fn fetch_by_id(&self, kind: EntityKind, entity: &EntityRef) -> Result<RemoteEntity> {
        let found = match kind {
            EntityKind::Mail => self.mails.lock().get(&entity.id).cloned().map(RemoteEntity::Mail),
            EntityKind::Folder => self
                .folders
                .iter()
                .find(|f| f.id == entity.id)
                .cloned()
                .map(RemoteEntity::Folder),
            _ => None,
        };
        found.ok_or_else(|| MirrorError::Provider(ProviderError::new(404, "not found")))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(true);

    let dir = tempfile::tempdir()?;
    let config = MirrorConfig::builder()
        .data_dir(dir.path())
        .compression(CompressionType::Zstd, 7)
        .mails_portion_size(2, 4)
        .messages_store_portion_size(3)
        .build();
    config.validate()?;

    let key = AesGcmEncryptionAdapter::generate_key();
    let adapter = Arc::new(AesGcmEncryptionAdapter::new(&key)?);
    let database = Arc::new(Database::new(
        config.database_path(),
        adapter.clone(),
        config.db_compression.clone(),
    ));

    let provider = Arc::new(InMemoryProvider::new());
    let engine = MailSyncEngine::new(provider.clone(), database.clone(), &config);
    let cancel = CancellationToken::new();
    let login = "demo@example.com";

    match engine.sync_account(login, &cancel).await? {
        SyncOutcome::Bootstrapped(report) => info!(
            "📦 引导完成: folders={}, mails={}, persists={}",
            report.folders, report.mails, report.persists
        ),
        other => info!("同步结果: {:?}", other),
    }

    provider.simulate_changes();
    if let SyncOutcome::Incremental { events, outcome } = engine.sync_account(login, &cancel).await? {
        info!("🔄 增量同步: events={}, modified={}", events, outcome.modified());
    }

    // 从容器文件重新加载，验证落盘结果
    let reloaded = Database::new(
        config.database_path(),
        adapter.clone(),
        config.db_compression.clone(),
    );
    reloaded.load_from_file().await?;
    info!("📂 重新加载后的统计: {:?}", reloaded.account_stat(login).await);

    let sessions = SessionStorage::new(config.session_storage_path(), adapter);
    sessions.load(&[login.to_string()]).await?;
    let mut session = sessions
        .get_session(login, "https://mail.example.com")
        .await
        .unwrap_or_default();
    session.cookies.push(SessionCookie {
        name: "Session-Id".to_string(),
        value: "demo".to_string(),
        ..Default::default()
    });
    sessions
        .save_session(login, "https://mail.example.com", session)
        .await?;
    info!("🍪 会话已保存");

    Ok(())
}
