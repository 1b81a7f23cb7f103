//! 引导同步（Bootstrap）
//!
//! 账号尚未完成引导时执行，顺序：
//! 1. 先记录 Provider 当前的最新事件游标，引导期间发生的变更之后走增量同步补齐
//! 2. 拉取全部文件夹与联系人，作为一个补丁落盘，部分同步的邮箱即可浏览
//! 3. 分页拉取会话条目与邮件，按 portion 分批落盘；中间落盘的游标一律为空，
//!    中途崩溃后 `is_bootstrapped` 仍为 false，重启时从第 0 页重新引导
//! 4. 最后一次落盘写入记录的游标，标记引导完成
//!
//! 取消只在 portion 边界检查，已落盘的数据不会回滚。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{MirrorError, Result};
use crate::storage::database::Database;
use crate::storage::entities::{EventCursor, FetchStage};
use crate::storage::patch::{DbPatch, MetadataPatch};
use crate::sync::entity_kind::EntityKind;
use crate::sync::gate::BootstrapRegistry;
use crate::sync::provider::{ProviderApi, RemoteEntity};

/// 补丁落盘回调
#[async_trait]
pub trait PatchStore: Send + Sync {
    async fn persist(&self, login: &str, patch: DbPatch, metadata: MetadataPatch) -> Result<()>;
}

#[async_trait]
impl PatchStore for Database {
    async fn persist(&self, login: &str, patch: DbPatch, metadata: MetadataPatch) -> Result<()> {
        self.apply_patch(login, &patch, Some(&metadata), true)
            .await
            .map(|_| ())
    }
}

/// 引导结果统计
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    pub folders: usize,
    pub contacts: usize,
    pub conversation_entries: usize,
    pub mails: usize,
    /// 落盘次数（含最终落盘）
    pub persists: usize,
    pub latest_cursor: EventCursor,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// 拉取某类实体的全部分页
async fn fetch_all(provider: &dyn ProviderApi, kind: EntityKind) -> Result<Vec<RemoteEntity>> {
    let mut items = Vec::new();
    let mut page_token: Option<String> = None;
    loop {
        let page = provider.fetch_all_paged(kind, page_token.as_deref()).await?;
        for item in page.items {
            ensure_kind(&item, kind)?;
            items.push(item);
        }
        match page.next_page_token {
            Some(token) => page_token = Some(token),
            None => break,
        }
    }
    debug!("全量拉取完成: kind={}, count={}", kind, items.len());
    Ok(items)
}

fn ensure_kind(item: &RemoteEntity, kind: EntityKind) -> Result<()> {
    if item.kind() != kind {
        return Err(MirrorError::InvalidData(format!(
            "Provider 返回的实体类型不匹配: expected={}, actual={}",
            kind,
            item.kind()
        )));
    }
    Ok(())
}

fn ensure_not_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(MirrorError::Cancelled);
    }
    Ok(())
}

/// 执行一次完整的引导
pub async fn run_bootstrap(
    provider: &dyn ProviderApi,
    store: &dyn PatchStore,
    registry: &BootstrapRegistry,
    login: &str,
    portion_size: usize,
    cancel: &CancellationToken,
) -> Result<BootstrapReport> {
    let _guard = registry.try_enter(login)?;
    let started_at = Utc::now();
    let portion_size = portion_size.max(1);

    info!("🚀 开始引导同步: login={}", login);

    let latest_cursor = provider.latest_cursor().await?;
    if latest_cursor.is_empty() {
        return Err(MirrorError::InvalidData(
            "Provider 返回了空的最新事件游标".to_string(),
        ));
    }

    let mut report = BootstrapReport {
        folders: 0,
        contacts: 0,
        conversation_entries: 0,
        mails: 0,
        persists: 0,
        latest_cursor: latest_cursor.clone(),
        started_at,
        finished_at: started_at,
    };

    // 文件夹 + 联系人
    let mut init_patch = DbPatch::new();
    for kind in [EntityKind::Folder, EntityKind::Contact] {
        for item in fetch_all(provider, kind).await? {
            item.upsert_into(&mut init_patch);
        }
    }
    report.folders = init_patch.folders.upsert.len();
    report.contacts = init_patch.contacts.upsert.len();
    store
        .persist(
            login,
            init_patch,
            MetadataPatch::new(EventCursor::empty(), FetchStage::BootstrapInit),
        )
        .await?;
    report.persists += 1;
    info!(
        "📁 文件夹/联系人已落盘: folders={}, contacts={}",
        report.folders, report.contacts
    );
    ensure_not_cancelled(cancel)?;

    // 会话条目、邮件分批落盘
    let mut buffer = DbPatch::new();
    for (kind, stage) in [
        (EntityKind::ConversationEntry, FetchStage::BootstrapMessagesMetadata),
        (EntityKind::Mail, FetchStage::BootstrapMessagesContent),
    ] {
        let mut page_token: Option<String> = None;
        loop {
            let page = provider.fetch_all_paged(kind, page_token.as_deref()).await?;
            for item in page.items {
                ensure_kind(&item, kind)?;
                item.upsert_into(&mut buffer);
                match kind {
                    EntityKind::Mail => report.mails += 1,
                    _ => report.conversation_entries += 1,
                }

                if buffer.len() >= portion_size {
                    let portion = std::mem::take(&mut buffer);
                    debug!("落盘引导 portion: kind={}, size={}", kind, portion.len());
                    store
                        .persist(login, portion, MetadataPatch::new(EventCursor::empty(), stage))
                        .await?;
                    report.persists += 1;
                    ensure_not_cancelled(cancel)?;
                }
            }
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        // 会话条目的剩余部分单独落盘，邮件的剩余部分随最终落盘写入
        if kind == EntityKind::ConversationEntry && !buffer.is_empty() {
            let portion = std::mem::take(&mut buffer);
            store
                .persist(login, portion, MetadataPatch::new(EventCursor::empty(), stage))
                .await?;
            report.persists += 1;
            ensure_not_cancelled(cancel)?;
        }
    }

    store
        .persist(
            login,
            buffer,
            MetadataPatch::new(latest_cursor, FetchStage::Unset),
        )
        .await?;
    report.persists += 1;
    report.finished_at = Utc::now();

    info!(
        "✅ 引导同步完成: login={}, mails={}, conversation_entries={}, persists={}",
        login, report.mails, report.conversation_entries, report.persists
    );
    Ok(report)
}
