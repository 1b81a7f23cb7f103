//! SDK 版本与持久化格式版本
//!
//! - **SDK Version** → Cargo.toml（唯一权威源）
//! - **数据库版本** → 写入 `FsDb.version`，读取时原样保留
//! - **会话存储版本** → 由 `storage::session_storage::upgrade` 的迁移阶梯维护

/// SDK semver，来自 Cargo.toml
///
/// 禁止手写版本号，必须用 `env!("CARGO_PKG_VERSION")` 与 Cargo.toml 保持同步。
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// 新建数据库写入的格式版本
pub const DATABASE_VERSION: &str = "1";

/// 当前 SDK 支持的最高会话存储版本。
/// 用于启动时校验：若存储版本 > 此值则拒绝打开（防 downgrade 导致数据不兼容）。
pub const SESSION_STORAGE_VERSION: u32 = 3;
