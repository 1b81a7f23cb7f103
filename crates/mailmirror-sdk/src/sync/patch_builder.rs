//! 事件对账：变更事件 -> 数据库补丁
//!
//! 1. 按实体类型、实例（id + 列表 id）分组，保持到达顺序
//! 2. 每个实例从最新事件往回扫描：先遇到删除则删除，先遇到 upsert 则重新拉取
//! 3. upsert 的内容一律从 Provider 重新拉取，不信任事件负载
//! 4. 只有"已移入终态文件夹"的实例允许拉取时"实体已不存在"，其余错误中止整个补丁

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::error::{MirrorError, Result};
use crate::storage::patch::{DbPatch, PkRef};
use crate::sync::entity_kind::EntityKind;
use crate::sync::events::EntityChangeEvent;
use crate::sync::provider::{EntityRef, ProviderApi};

/// 对账后的实例动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceAction {
    /// 重新拉取并写入；`tolerate_gone` 表示允许拉取时实体已不存在
    Upsert { tolerate_gone: bool },
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciledInstance {
    pub kind: EntityKind,
    pub entity: EntityRef,
    pub action: InstanceAction,
}

/// 纯函数部分：决定每个实例的最终动作
pub fn reconcile(events: &[EntityChangeEvent]) -> Vec<ReconciledInstance> {
    let mut result = Vec::new();

    for kind in EntityKind::ALL {
        let mut order: Vec<EntityRef> = Vec::new();
        let mut groups: HashMap<EntityRef, Vec<&EntityChangeEvent>> = HashMap::new();

        for event in events.iter().filter(|e| e.kind == kind) {
            let key = event.entity_ref();
            groups
                .entry(key.clone())
                .or_insert_with(|| {
                    order.push(key);
                    Vec::new()
                })
                .push(event);
        }

        for entity in order {
            let Some(instance_events) = groups.get(&entity) else {
                continue;
            };
            // 最新的事件决定最终动作：删除在前则删除，upsert 在前则重新拉取
            let action = instance_events.last().map(|event| {
                if event.is_upsert() {
                    InstanceAction::Upsert {
                        tolerate_gone: event.moved_to_terminal_folder,
                    }
                } else {
                    InstanceAction::Remove
                }
            });
            if let Some(action) = action {
                result.push(ReconciledInstance {
                    kind,
                    entity,
                    action,
                });
            }
        }
    }

    result
}

fn push_removal(patch: &mut DbPatch, kind: EntityKind, entity: &EntityRef) {
    let pk = PkRef::new(entity.pk());
    match kind {
        EntityKind::Mail => patch.mails.remove.push(pk),
        EntityKind::Folder => patch.folders.remove.push(pk),
        EntityKind::Contact => patch.contacts.remove.push(pk),
        EntityKind::ConversationEntry => patch.conversation_entries.remove.push(pk),
    }
}

/// 对账并重新拉取需要写入的实体，生成补丁
pub async fn build_db_patch(
    provider: &dyn ProviderApi,
    events: &[EntityChangeEvent],
) -> Result<DbPatch> {
    let mut patch = DbPatch::new();

    for instance in reconcile(events) {
        let ReconciledInstance {
            kind,
            entity,
            action,
        } = instance;

        let tolerate_gone = match action {
            InstanceAction::Remove => {
                push_removal(&mut patch, kind, &entity);
                continue;
            }
            InstanceAction::Upsert { tolerate_gone } => tolerate_gone,
        };

        match provider.fetch_by_id(kind, &entity).await {
            Ok(remote) => {
                if remote.kind() != kind {
                    return Err(MirrorError::InvalidData(format!(
                        "Provider 返回的实体类型不匹配: expected={}, actual={}",
                        kind,
                        remote.kind()
                    )));
                }
                remote.upsert_into(&mut patch);
            }
            Err(MirrorError::Provider(e)) if tolerate_gone && provider.is_entity_gone(&e) => {
                warn!(
                    "⚠️ 实体已不存在，跳过: kind={}, id={}, status={}, code={:?}",
                    kind, entity.id, e.status, e.code
                );
            }
            Err(e) => {
                if let MirrorError::Provider(provider_error) = &e {
                    warn!(
                        "拉取实体失败: kind={}, id={}, status={}, code={:?}",
                        kind, entity.id, provider_error.status, provider_error.code
                    );
                }
                return Err(e);
            }
        }
    }

    debug!(
        "补丁构建完成: events={}, entries={}",
        events.len(),
        patch.len()
    );
    Ok(patch)
}
