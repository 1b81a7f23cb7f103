//! 增量变更事件
//!
//! Provider 的原始事件形态各不相同，适配器统一转换为 `EntityChangeEvent`，
//! 之后的分组、对账逻辑与 Provider 无关。

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::error::Result;
use crate::storage::entities::EventCursor;
use crate::sync::entity_kind::EntityKind;
use crate::sync::provider::{EntityRef, ProviderApi};

/// 同一游标连续重复的容忍次数，超过后中断遍历
const SAME_CURSOR_LIMIT: usize = 2;

/// 事件动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    Create,
    Update,
    UpdateFlags,
    Delete,
}

/// 单条实体变更事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityChangeEvent {
    pub kind: EntityKind,
    pub id: String,
    #[serde(default)]
    pub list_id: Option<String>,
    pub action: EventAction,
    /// 邮件移入了终态文件夹（之后可能被彻底清除）
    #[serde(default)]
    pub moved_to_terminal_folder: bool,
}

impl EntityChangeEvent {
    pub fn new(kind: EntityKind, id: impl Into<String>, action: EventAction) -> Self {
        Self {
            kind,
            id: id.into(),
            list_id: None,
            action,
            moved_to_terminal_folder: false,
        }
    }

    pub fn with_list(mut self, list_id: impl Into<String>) -> Self {
        self.list_id = Some(list_id.into());
        self
    }

    pub fn moved_to_terminal_folder(mut self) -> Self {
        self.moved_to_terminal_folder = true;
        self
    }

    pub fn is_upsert(&self) -> bool {
        !matches!(self.action, EventAction::Delete)
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef {
            id: self.id.clone(),
            list_id: self.list_id.clone(),
        }
    }
}

/// 事件遍历结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchedEvents {
    Events {
        events: Vec<EntityChangeEvent>,
        latest_cursor: EventCursor,
    },
    /// Provider 要求丢弃本地数据重新引导
    Refresh,
}

/// 从游标开始遍历所有增量事件
///
/// 一直翻页直到 `more == false`。Provider 声称还有更多事件却连续返回
/// 相同游标时，记录错误并提前结束，下次同步会从该游标继续。
pub async fn fetch_events(
    provider: &dyn ProviderApi,
    cursor: &EventCursor,
) -> Result<FetchedEvents> {
    let mut events = Vec::new();
    let mut latest_cursor = cursor.clone();
    let mut same_cursor_counter = 0usize;

    loop {
        let page = provider.fetch_changes_since(&latest_cursor).await?;
        if page.refresh {
            info!("🔄 Provider 要求全量刷新");
            return Ok(FetchedEvents::Refresh);
        }

        debug!("拉取到 {} 条变更事件, more={}", page.events.len(), page.more);
        events.extend(page.events);

        // 先计数再更新游标；游标前进则重新计数
        if page.next_cursor == latest_cursor {
            same_cursor_counter += 1;
        } else {
            same_cursor_counter = 0;
        }
        latest_cursor = page.next_cursor;

        if !page.more {
            break;
        }
        if same_cursor_counter > SAME_CURSOR_LIMIT {
            error!(
                "❌ 事件接口声称还有更多事件，但连续 {} 次返回相同的游标",
                same_cursor_counter
            );
            break;
        }
    }

    info!("📥 共拉取 {} 条遗漏的变更事件", events.len());

    Ok(FetchedEvents::Events {
        events,
        latest_cursor,
    })
}
