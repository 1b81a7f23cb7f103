//! 镜像数据库 - 内存快照 + 容器文件持久化
//!
//! - 内存中的 `FsDb` 由 tokio `RwLock` 保护
//! - 补丁应用在写锁内完成，落盘在锁外通过写队列串行执行
//! - 落盘任务执行时在读锁内拷贝快照，释放锁后再压缩、加密、写盘

use std::path::Path;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::DbCompressionConfig;
use crate::error::Result;
use crate::storage::encryption::EncryptionAdapter;
use crate::storage::entities::{Account, AccountMetadata, AccountStat, FsDb};
use crate::storage::patch::{DbPatch, MetadataPatch};
use crate::storage::serialization::DatabaseSerializer;
use crate::storage::write_queue::WriteQueue;

/// 补丁应用结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchOutcome {
    /// 实体是否有实际变更（重复应用同一补丁时为 false）
    pub entities_modified: bool,
    pub metadata_modified: bool,
}

impl PatchOutcome {
    pub fn modified(&self) -> bool {
        self.entities_modified || self.metadata_modified
    }
}

pub struct Database {
    db: Arc<RwLock<FsDb>>,
    serializer: DatabaseSerializer,
    compression: DbCompressionConfig,
    write_queue: WriteQueue,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.serializer.path())
            .field("write_queue", &self.write_queue)
            .finish()
    }
}

impl Database {
    /// 创建数据库（需要在 tokio 运行时中调用）
    pub fn new(
        path: impl AsRef<Path>,
        adapter: Arc<dyn EncryptionAdapter>,
        compression: DbCompressionConfig,
    ) -> Self {
        Self {
            db: Arc::new(RwLock::new(FsDb::default())),
            serializer: DatabaseSerializer::new(path.as_ref(), adapter),
            compression,
            write_queue: WriteQueue::spawn("database"),
        }
    }

    /// 数据库文件是否已存在
    pub async fn persisted(&self) -> bool {
        tokio::fs::metadata(self.serializer.path()).await.is_ok()
    }

    /// 从文件加载，替换内存快照
    pub async fn load_from_file(&self) -> Result<()> {
        let loaded = self.serializer.read().await?;
        info!(
            "📂 数据库已加载: accounts={}, mails={}",
            loaded.accounts.len(),
            loaded.mails_count()
        );
        *self.db.write().await = loaded;
        Ok(())
    }

    /// 排队落盘并等待完成
    pub async fn save_to_file(&self) -> Result<()> {
        let db = self.db.clone();
        let serializer = self.serializer.clone();
        let compression = self.compression.clone();
        self.write_queue
            .enqueue(async move {
                // 拷贝后立即释放读锁，写盘期间不阻塞 apply_patch
                let snapshot = db.read().await.clone();
                serializer.write(&snapshot, &compression).await.map(|_| ())
            })
            .await
    }

    pub fn pending_writes(&self) -> usize {
        self.write_queue.in_flight()
    }

    pub async fn account_metadata(&self, login: &str) -> Option<AccountMetadata> {
        self.db
            .read()
            .await
            .accounts
            .get(login)
            .map(|account| account.metadata.clone())
    }

    /// 初始化账号（已存在时不做任何修改），返回是否新建
    pub async fn init_account(&self, login: &str) -> bool {
        let mut db = self.db.write().await;
        if db.accounts.contains_key(login) {
            return false;
        }
        db.accounts.insert(login.to_string(), Account::default());
        debug!("初始化账号: {}", login);
        true
    }

    /// 删除账号，返回是否存在
    pub async fn delete_account(&self, login: &str) -> bool {
        let removed = self.db.write().await.accounts.remove(login).is_some();
        if removed {
            info!("🗑️ 已删除账号: {}", login);
        }
        removed
    }

    pub async fn account_stat(&self, login: &str) -> Option<AccountStat> {
        self.db.read().await.accounts.get(login).map(Account::stat)
    }

    pub async fn logins(&self) -> Vec<String> {
        self.db.read().await.accounts.keys().cloned().collect()
    }

    /// 读取账号（闭包内持有读锁）
    pub async fn with_account<R>(&self, login: &str, f: impl FnOnce(&Account) -> R) -> Option<R> {
        self.db.read().await.accounts.get(login).map(f)
    }

    /// 内存快照的拷贝
    pub async fn snapshot(&self) -> FsDb {
        self.db.read().await.clone()
    }

    /// 应用补丁
    ///
    /// 顺序：先删除，再按 pk 覆盖写入，最后合并元数据。
    /// 有实际变更或 `force_flush` 时落盘。
    pub async fn apply_patch(
        &self,
        login: &str,
        patch: &DbPatch,
        metadata: Option<&MetadataPatch>,
        force_flush: bool,
    ) -> Result<PatchOutcome> {
        patch.validate()?;

        let outcome = {
            let mut db = self.db.write().await;
            let account = db.accounts.entry(login.to_string()).or_default();
            let entities_modified = patch.apply_to(account);
            let metadata_modified = metadata
                .map(|m| m.apply_to(&mut account.metadata))
                .unwrap_or(false);
            PatchOutcome {
                entities_modified,
                metadata_modified,
            }
        };

        debug!(
            "应用补丁: login={}, entries={}, entities_modified={}, metadata_modified={}",
            login,
            patch.len(),
            outcome.entities_modified,
            outcome.metadata_modified
        );

        if outcome.modified() || force_flush {
            if let Err(e) = self.save_to_file().await {
                warn!("⚠️ 补丁已应用到内存但落盘失败: login={}, error={}", login, e);
                return Err(e);
            }
        }
        Ok(outcome)
    }
}
