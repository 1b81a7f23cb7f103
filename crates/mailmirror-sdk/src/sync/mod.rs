//! 同步模块
//!
//! 职责：
//! - 遍历 Provider 增量事件（游标）
//! - 事件对账，生成数据库补丁
//! - 引导同步（全量拉取，分批落盘，可中断重启）
//! - 重试管线与按账号互斥

pub mod bootstrap;
pub mod entity_kind;
pub mod events;
pub mod gate;
pub mod patch_builder;
pub mod provider;
pub mod retry_pipeline;
pub mod sync_engine;

pub use bootstrap::{run_bootstrap, BootstrapReport, PatchStore};
pub use entity_kind::EntityKind;
pub use events::{fetch_events, EntityChangeEvent, EventAction, FetchedEvents};
pub use gate::{AccountGate, AccountGateGuard, BootstrapRegistry};
pub use patch_builder::{build_db_patch, reconcile, InstanceAction, ReconciledInstance};
pub use provider::{
    ChangesPage, EntityRef, ErrorClass, Page, ProviderApi, RemoteEntity,
    ENTITY_ALREADY_REMOVED_CODE,
};
pub use retry_pipeline::{RetryOutcome, RetryPipeline};
pub use sync_engine::{MailSyncEngine, SyncOutcome};
