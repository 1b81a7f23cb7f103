//! 同步引擎 - 单账号同步周期的编排
//!
//! 一个同步周期：
//! - 已引导：遍历增量事件 -> 对账生成补丁 -> 连同新游标（阶段 `events`）落盘
//! - Provider 要求刷新，或尚未引导：执行引导
//! - 整个周期包在重试管线里
//!
//! 同一账号同一时刻只允许一个周期在执行。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::MirrorConfig;
use crate::error::Result;
use crate::storage::database::{Database, PatchOutcome};
use crate::storage::entities::{is_bootstrapped, FetchStage};
use crate::storage::patch::MetadataPatch;
use crate::sync::bootstrap::{run_bootstrap, BootstrapReport};
use crate::sync::entity_kind::EntityKind;
use crate::sync::events::{fetch_events, EntityChangeEvent, EventAction, FetchedEvents};
use crate::sync::gate::{AccountGate, BootstrapRegistry};
use crate::sync::patch_builder::build_db_patch;
use crate::sync::provider::ProviderApi;
use crate::sync::retry_pipeline::{RetryOutcome, RetryPipeline};

/// 单次同步周期的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Bootstrapped(BootstrapReport),
    Incremental {
        events: usize,
        outcome: PatchOutcome,
    },
    /// 可跳过的错误重试用尽，本轮放弃
    Skipped,
}

pub struct MailSyncEngine {
    provider: Arc<dyn ProviderApi>,
    database: Arc<Database>,
    retry: RetryPipeline,
    messages_store_portion_size: usize,
    gate: AccountGate,
    bootstrap_registry: BootstrapRegistry,
}

impl std::fmt::Debug for MailSyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailSyncEngine")
            .field("retry", &self.retry)
            .field("messages_store_portion_size", &self.messages_store_portion_size)
            .finish()
    }
}

impl MailSyncEngine {
    pub fn new(
        provider: Arc<dyn ProviderApi>,
        database: Arc<Database>,
        config: &MirrorConfig,
    ) -> Self {
        Self {
            provider,
            database,
            retry: RetryPipeline::from_config(&config.retry),
            messages_store_portion_size: config.fetching.messages_store_portion_size,
            gate: AccountGate::new("sync"),
            bootstrap_registry: BootstrapRegistry::new("bootstrap"),
        }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    /// 账号是否正在同步
    pub fn is_syncing(&self, login: &str) -> bool {
        self.gate.is_active(login)
    }

    /// 执行一次同步周期
    pub async fn sync_account(&self, login: &str, cancel: &CancellationToken) -> Result<SyncOutcome> {
        let _guard = self.gate.try_enter(login)?;

        let bootstrapped = self
            .database
            .account_metadata(login)
            .await
            .map(|m| is_bootstrapped(&m))
            .unwrap_or(false);

        let outcome = self
            .retry
            .run(bootstrapped, self.provider.as_ref(), cancel, || {
                self.sync_cycle(login, cancel)
            })
            .await?;

        match outcome {
            RetryOutcome::Completed(outcome) => Ok(outcome),
            RetryOutcome::Skipped => Ok(SyncOutcome::Skipped),
        }
    }

    async fn sync_cycle(&self, login: &str, cancel: &CancellationToken) -> Result<SyncOutcome> {
        let metadata = self
            .database
            .account_metadata(login)
            .await
            .unwrap_or_default();

        if is_bootstrapped(&metadata) {
            match fetch_events(self.provider.as_ref(), &metadata.latest_event_id).await? {
                FetchedEvents::Events {
                    events,
                    latest_cursor,
                } => {
                    let patch = build_db_patch(self.provider.as_ref(), &events).await?;
                    let outcome = self
                        .database
                        .apply_patch(
                            login,
                            &patch,
                            Some(&MetadataPatch::new(latest_cursor, FetchStage::Events)),
                            false,
                        )
                        .await?;
                    info!(
                        "✅ 增量同步完成: login={}, events={}, entries={}",
                        login,
                        events.len(),
                        patch.len()
                    );
                    return Ok(SyncOutcome::Incremental {
                        events: events.len(),
                        outcome,
                    });
                }
                FetchedEvents::Refresh => {
                    warn!("🔄 Provider 要求刷新，重新引导: login={}", login);
                    let reset = MetadataPatch {
                        latest_event_id: None,
                        fetch_stage: Some(FetchStage::Unset),
                    };
                    self.database
                        .apply_patch(login, &Default::default(), Some(&reset), false)
                        .await?;
                }
            }
        }

        let report = run_bootstrap(
            self.provider.as_ref(),
            self.database.as_ref(),
            &self.bootstrap_registry,
            login,
            self.messages_store_portion_size,
            cancel,
        )
        .await?;
        Ok(SyncOutcome::Bootstrapped(report))
    }

    /// 重新拉取单封邮件并落盘，不修改元数据
    ///
    /// 与同步周期共用账号闸门，账号正在同步时返回 `InvalidState`。
    pub async fn fetch_single_mail(&self, login: &str, id: &str) -> Result<PatchOutcome> {
        let _guard = self.gate.try_enter(login)?;
        // 任何非删除动作都会触发重新拉取
        let events = [EntityChangeEvent::new(EntityKind::Mail, id, EventAction::Update)];
        let patch = build_db_patch(self.provider.as_ref(), &events).await?;
        self.database.apply_patch(login, &patch, None, false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::DbCompressionConfig;
    use crate::error::{MirrorError, ProviderError};
    use crate::storage::entities::EventCursor;
    use crate::sync::provider::{ChangesPage, RemoteEntity};
    use crate::testing::{folder, mail, test_adapter, MockProvider};

    struct Fixture {
        _dir: tempfile::TempDir,
        provider: Arc<MockProvider>,
        engine: MailSyncEngine,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = MirrorConfig::builder()
            .data_dir(dir.path())
            .messages_store_portion_size(2)
            .retry(2, Duration::from_millis(5))
            .build();
        let database = Arc::new(Database::new(
            config.database_path(),
            test_adapter(),
            DbCompressionConfig::default(),
        ));
        let provider = Arc::new(MockProvider::new());
        provider.set_latest_cursor(EventCursor::from("c1"));
        provider.set_paged(EntityKind::Folder, vec![RemoteEntity::Folder(folder("inbox"))], 10);
        provider.set_paged(
            EntityKind::Mail,
            vec![
                RemoteEntity::Mail(mail("m1", "inbox")),
                RemoteEntity::Mail(mail("m2", "inbox")),
                RemoteEntity::Mail(mail("m3", "inbox")),
            ],
            2,
        );
        let engine = MailSyncEngine::new(provider.clone(), database, &config);
        Fixture {
            _dir: dir,
            provider,
            engine,
        }
    }

    #[tokio::test]
    async fn first_cycle_bootstraps_then_goes_incremental() {
        let f = fixture();
        let cancel = CancellationToken::new();

        let outcome = f.engine.sync_account("alice", &cancel).await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Bootstrapped(ref r) if r.mails == 3));

        let mut updated = mail("m1", "archive");
        updated.unread = true;
        f.provider.set_entity(RemoteEntity::Mail(updated.clone()));
        f.provider.push_changes(ChangesPage {
            events: vec![
                EntityChangeEvent::new(EntityKind::Mail, "m1", EventAction::Update),
                EntityChangeEvent::new(EntityKind::Mail, "m2", EventAction::Delete),
            ],
            next_cursor: EventCursor::from("c2"),
            more: false,
            refresh: false,
        });

        let outcome = f.engine.sync_account("alice", &cancel).await.unwrap();
        assert!(matches!(
            outcome,
            SyncOutcome::Incremental { events: 2, outcome } if outcome.entities_modified
        ));

        let db = f.engine.database();
        let metadata = db.account_metadata("alice").await.unwrap();
        assert_eq!(metadata.latest_event_id, EventCursor::from("c2"));
        assert_eq!(metadata.fetch_stage, FetchStage::Events);
        let (m1, has_m2) = db
            .with_account("alice", |a| (a.mails.get("m1").cloned(), a.mails.contains_key("m2")))
            .await
            .unwrap();
        assert_eq!(m1, Some(updated));
        assert!(!has_m2);
    }

    #[tokio::test]
    async fn refresh_signal_bootstraps_again() {
        let f = fixture();
        let cancel = CancellationToken::new();
        f.engine.sync_account("alice", &cancel).await.unwrap();

        f.provider.set_latest_cursor(EventCursor::from("c9"));
        f.provider.push_changes(ChangesPage {
            refresh: true,
            ..Default::default()
        });
        let outcome = f.engine.sync_account("alice", &cancel).await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Bootstrapped(_)));
        let metadata = f.engine.database().account_metadata("alice").await.unwrap();
        assert_eq!(metadata.latest_event_id, EventCursor::from("c9"));
    }

    #[tokio::test]
    async fn transient_errors_are_skipped_after_bootstrap() {
        let f = fixture();
        let cancel = CancellationToken::new();
        f.engine.sync_account("alice", &cancel).await.unwrap();

        f.provider.fail_changes(ProviderError::new(503, "unavailable"));
        let outcome = f.engine.sync_account("alice", &cancel).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Skipped);
        // 首次 + 2 次重试
        assert_eq!(f.provider.requested_cursors().len(), 3);
        assert!(!f.engine.is_syncing("alice"));
    }

    #[tokio::test]
    async fn bootstrap_errors_propagate_without_retry() {
        let f = fixture();
        f.provider.fail_latest_cursor(ProviderError::new(503, "unavailable"));
        let result = f.engine.sync_account("alice", &CancellationToken::new()).await;
        assert!(matches!(result, Err(MirrorError::Provider(e)) if e.status == 503));
        assert_eq!(f.provider.latest_cursor_calls(), 1);
    }

    #[tokio::test]
    async fn fetch_single_mail_keeps_metadata() {
        let f = fixture();
        let cancel = CancellationToken::new();
        f.engine.sync_account("alice", &cancel).await.unwrap();
        let before = f.engine.database().account_metadata("alice").await.unwrap();

        f.provider.set_entity(RemoteEntity::Mail(mail("m9", "inbox")));
        let outcome = f.engine.fetch_single_mail("alice", "m9").await.unwrap();
        assert!(outcome.entities_modified);
        assert!(!outcome.metadata_modified);
        assert_eq!(
            f.engine.database().account_metadata("alice").await.unwrap(),
            before
        );
        assert_eq!(f.engine.database().account_stat("alice").await.unwrap().mails, 4);
    }

    #[tokio::test]
    async fn fetch_single_mail_rejected_while_syncing() {
        let f = fixture();
        f.provider.set_entity(RemoteEntity::Mail(mail("m9", "inbox")));

        let guard = f.engine.gate.try_enter("alice").unwrap();
        let result = f.engine.fetch_single_mail("alice", "m9").await;
        assert!(matches!(result, Err(MirrorError::InvalidState(_))));
        assert_eq!(f.provider.fetch_by_id_calls(), 0);

        drop(guard);
        f.engine.fetch_single_mail("alice", "m9").await.unwrap();
        assert!(!f.engine.is_syncing("alice"));
    }
}
