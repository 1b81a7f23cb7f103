//! Mailmirror SDK - 加密邮箱本地镜像
//!
//! 本 SDK 提供：
//! - 🔐 加密、压缩、分块的容器文件格式（msgpack + gzip/zstd + AES-256-GCM）
//! - 🧾 内存快照数据库，补丁应用与串行落盘
//! - 🔄 增量事件对账与可中断重启的引导同步
//! - ⏱️ 可跳过/可重试的错误分类重试管线
//! - 🍪 带版本升级的会话存储
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mailmirror_sdk::{AesGcmEncryptionAdapter, Database, MailSyncEngine, MirrorConfig, ProviderApi};
//! use tokio_util::sync::CancellationToken;
//!
//! async fn run(provider: Arc<dyn ProviderApi>) -> mailmirror_sdk::Result<()> {
//!     let config = MirrorConfig::builder()
//!         .data_dir("/path/to/data")
//!         .build();
//!     config.validate()?;
//!
//!     let key = AesGcmEncryptionAdapter::generate_key();
//!     let adapter = Arc::new(AesGcmEncryptionAdapter::new(&key)?);
//!     let database = Arc::new(Database::new(
//!         config.database_path(),
//!         adapter,
//!         config.db_compression.clone(),
//!     ));
//!     if database.persisted().await {
//!         database.load_from_file().await?;
//!     }
//!
//!     let engine = MailSyncEngine::new(provider, database, &config);
//!     engine.sync_account("user@example.com", &CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod storage;
pub mod sync;
pub mod version;

#[cfg(test)]
pub(crate) mod testing;

// 重新导出核心类型，方便使用
pub use config::{
    CompressionType, DbCompressionConfig, FetchingConfig, MailsPortionSize, MirrorConfig,
    MirrorConfigBuilder, RetryConfig,
};
pub use error::{MirrorError, ProviderError, Result};
pub use logging::init_logging;
pub use storage::{
    AccountPersistentSession, AesGcmEncryptionAdapter, Database, DatabaseSerializer, DbPatch,
    EncryptionAdapter, EntityPatch, MetadataPatch, PatchOutcome, PkRef, SessionCookie,
    SessionStorage, SessionStorageModel, SessionStoragePatch, WriteQueue,
};
pub use storage::entities::{
    build_pk, is_bootstrapped, Account, AccountMetadata, AccountStat, Contact, ConversationEntry,
    EventCursor, FetchStage, Folder, FolderType, FsDb, Mail,
};
pub use sync::{
    BootstrapReport, EntityChangeEvent, EntityKind, EventAction, MailSyncEngine, ProviderApi,
    RetryOutcome, RetryPipeline, SyncOutcome,
};
pub use version::{DATABASE_VERSION, SDK_VERSION, SESSION_STORAGE_VERSION};
