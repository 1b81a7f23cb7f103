//! 存储模块 - 镜像邮箱的数据持久化层
//!
//! 采用分层设计：
//! - Entities / Patch: 数据实体与补丁模型
//! - Serialization: 加密、压缩、分块的容器文件格式
//! - Database: 内存快照 + 补丁应用 + 串行落盘
//! - SessionStorage: 带版本升级的会话存储

pub mod compression;
pub mod database;
pub mod encryption;
pub mod entities;
pub mod patch;
pub mod serialization;
pub mod session_storage;
pub mod write_queue;

// 重新导出核心类型
pub use database::{Database, PatchOutcome};
pub use encryption::{AesGcmEncryptionAdapter, EncryptionAdapter};
pub use entities::*;
pub use patch::{DbPatch, EntityPatch, MetadataPatch, PkRef};
pub use serialization::DatabaseSerializer;
pub use session_storage::{
    AccountPersistentSession, SessionCookie, SessionStorage, SessionStorageModel,
    SessionStoragePatch,
};
pub use write_queue::WriteQueue;
