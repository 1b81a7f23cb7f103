//! 会话存储版本升级
//!
//! 每个迁移步骤只理解相对上一版本的差异，按版本号顺序执行，
//! 仅当存储版本低于该步骤版本时才执行。存储版本高于 SDK 支持的版本视为致命错误。

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::{MirrorError, Result};
use crate::version::SESSION_STORAGE_VERSION;

pub const INSTANCE_KEY: &str = "instance";
pub const PATCH_INSTANCE_KEY: &str = "sessionStoragePatchInstance";
pub const VERSION_KEY: &str = "version";

/// 会话存储迁移步骤
#[derive(Clone)]
pub struct SessionMigration {
    /// 目标版本号
    pub version: u32,
    /// 升级名称
    pub name: &'static str,
    /// 升级描述
    pub description: &'static str,
    /// 升级函数（作用于原始 JSON）
    pub up: fn(&mut Value) -> Result<()>,
}

impl std::fmt::Debug for SessionMigration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionMigration")
            .field("version", &self.version)
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

/// 全部迁移步骤（按版本升序）
pub fn migrations() -> Vec<SessionMigration> {
    vec![
        SessionMigration {
            version: 1,
            name: "wrap_instance",
            description: "旧版文件只保存 instance 映射，包装为带版本号的结构",
            up: wrap_legacy_instance,
        },
        SessionMigration {
            version: 2,
            name: "add_patch_instance",
            description: "新增 sessionStoragePatchInstance",
            up: add_patch_instance,
        },
        SessionMigration {
            version: 3,
            name: "normalize_api_origins",
            description: "统一 api origin 键（小写、去掉末尾斜杠）",
            up: normalize_api_origins,
        },
    ]
}

/// 读取存储版本（缺失或非数字视为 0）
pub fn stored_version(entity: &Value) -> u32 {
    entity
        .get(VERSION_KEY)
        .and_then(Value::as_u64)
        .map(|v| u32::try_from(v).unwrap_or(u32::MAX))
        .unwrap_or(0)
}

/// 执行升级，返回是否发生了变更
pub fn upgrade_session_storage(entity: &mut Value) -> Result<bool> {
    let current = stored_version(entity);
    if current == SESSION_STORAGE_VERSION {
        return Ok(false);
    }
    if current > SESSION_STORAGE_VERSION {
        return Err(MirrorError::Migration(format!(
            "会话存储版本 {} 高于 SDK 支持的版本 {}",
            current, SESSION_STORAGE_VERSION
        )));
    }
    info!("🔄 升级会话存储: {} -> {}", current, SESSION_STORAGE_VERSION);

    for migration in migrations() {
        if current < migration.version {
            debug!(
                "执行会话存储迁移 v{} {}: {}",
                migration.version, migration.name, migration.description
            );
            (migration.up)(entity).map_err(|e| {
                MirrorError::Migration(format!(
                    "迁移 v{} {} 失败: {}",
                    migration.version, migration.name, e
                ))
            })?;
        }
    }

    object_mut(entity)?.insert(VERSION_KEY.to_string(), Value::from(SESSION_STORAGE_VERSION));
    Ok(true)
}

fn object_mut(entity: &mut Value) -> Result<&mut Map<String, Value>> {
    entity
        .as_object_mut()
        .ok_or_else(|| MirrorError::Migration("会话存储不是 JSON 对象".to_string()))
}

fn wrap_legacy_instance(entity: &mut Value) -> Result<()> {
    let instance = match std::mem::take(entity) {
        Value::Null => Value::Object(Map::new()),
        Value::Object(map) => Value::Object(map),
        other => {
            return Err(MirrorError::Migration(format!(
                "无法识别的旧版会话存储: {}",
                other
            )))
        }
    };
    let mut wrapped = Map::new();
    wrapped.insert(VERSION_KEY.to_string(), Value::from(1u32));
    wrapped.insert(INSTANCE_KEY.to_string(), instance);
    wrapped.insert(PATCH_INSTANCE_KEY.to_string(), Value::Object(Map::new()));
    *entity = Value::Object(wrapped);
    Ok(())
}

fn add_patch_instance(entity: &mut Value) -> Result<()> {
    let map = object_mut(entity)?;
    match map.get(PATCH_INSTANCE_KEY) {
        Some(Value::Object(_)) => {}
        _ => {
            map.insert(PATCH_INSTANCE_KEY.to_string(), Value::Object(Map::new()));
        }
    }
    if !matches!(map.get(INSTANCE_KEY), Some(Value::Object(_))) {
        map.insert(INSTANCE_KEY.to_string(), Value::Object(Map::new()));
    }
    Ok(())
}

/// 规范化 api origin：小写、去掉末尾斜杠
pub fn normalize_api_origin(origin: &str) -> String {
    origin.trim().trim_end_matches('/').to_lowercase()
}

fn normalize_api_origins(entity: &mut Value) -> Result<()> {
    let map = object_mut(entity)?;
    for key in [INSTANCE_KEY, PATCH_INSTANCE_KEY] {
        let Some(Value::Object(by_login)) = map.get_mut(key) else {
            continue;
        };
        for by_origin in by_login.values_mut() {
            let Value::Object(records) = by_origin else {
                continue;
            };
            let original = std::mem::take(records);
            // 已规范化的键优先，不覆盖已存在的目标记录
            let (canonical, others): (Vec<_>, Vec<_>) = original
                .into_iter()
                .partition(|(origin, _)| normalize_api_origin(origin) == *origin);
            for (origin, record) in canonical.into_iter().chain(others) {
                let normalized = normalize_api_origin(&origin);
                if !records.contains_key(&normalized) {
                    records.insert(normalized, record);
                }
            }
        }
    }
    Ok(())
}
