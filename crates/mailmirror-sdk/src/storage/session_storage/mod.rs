//! 会话存储 - 按账号和 api origin 保存 Web 会话数据
//!
//! 持久化使用与数据库相同的容器格式（单条目），所有写入经过单写者队列。
//! 加载时先执行版本升级，再清理已不在账号列表中的登录名。

pub mod upgrade;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::CompressionType;
use crate::error::Result;
use crate::storage::encryption::EncryptionAdapter;
use crate::storage::entities::Login;
use crate::storage::serialization::{read_single, write_single};
use crate::storage::write_queue::WriteQueue;
use crate::version::SESSION_STORAGE_VERSION;

pub use upgrade::{normalize_api_origin, upgrade_session_storage, SessionMigration};

pub type ApiOrigin = String;

const SESSION_COMPRESSION: CompressionType = CompressionType::Gzip;
const SESSION_COMPRESSION_LEVEL: i32 = 6;

/// 会话 cookie
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub expiration_date: Option<f64>,
}

/// 单个账号在某个 api origin 下的持久化会话
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountPersistentSession {
    #[serde(default)]
    pub cookies: Vec<SessionCookie>,
    #[serde(default)]
    pub session_storage: BTreeMap<String, String>,
}

/// 客户端 cookie 存储快照
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStoragePatch {
    #[serde(rename = "__cookieStore__")]
    pub cookie_store: String,
}

/// 会话存储文件模型
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStorageModel {
    pub version: u32,
    #[serde(default)]
    pub instance: BTreeMap<Login, BTreeMap<ApiOrigin, AccountPersistentSession>>,
    #[serde(default)]
    pub session_storage_patch_instance: BTreeMap<Login, BTreeMap<ApiOrigin, SessionStoragePatch>>,
}

impl Default for SessionStorageModel {
    fn default() -> Self {
        Self {
            version: SESSION_STORAGE_VERSION,
            instance: BTreeMap::new(),
            session_storage_patch_instance: BTreeMap::new(),
        }
    }
}

impl SessionStorageModel {
    /// 移除不在列表中的登录名，返回移除数量
    fn retain_logins(&mut self, actual_logins: &[String]) -> usize {
        let before = self.instance.len() + self.session_storage_patch_instance.len();
        self.instance.retain(|login, _| actual_logins.contains(login));
        self.session_storage_patch_instance
            .retain(|login, _| actual_logins.contains(login));
        before - self.instance.len() - self.session_storage_patch_instance.len()
    }
}

pub struct SessionStorage {
    path: PathBuf,
    adapter: Arc<dyn EncryptionAdapter>,
    model: Arc<RwLock<SessionStorageModel>>,
    write_queue: WriteQueue,
}

impl std::fmt::Debug for SessionStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStorage")
            .field("path", &self.path)
            .field("write_queue", &self.write_queue)
            .finish()
    }
}

impl SessionStorage {
    /// 创建会话存储（需要在 tokio 运行时中调用）
    pub fn new(path: impl AsRef<Path>, adapter: Arc<dyn EncryptionAdapter>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            adapter,
            model: Arc::new(RwLock::new(SessionStorageModel::default())),
            write_queue: WriteQueue::spawn("session-storage"),
        }
    }

    /// 清空内存数据（不落盘）
    pub async fn reset(&self) {
        debug!("重置会话存储内存数据");
        *self.model.write().await = SessionStorageModel::default();
    }

    /// 加载、升级并清理不存在的登录名
    pub async fn load(&self, actual_logins: &[String]) -> Result<()> {
        info!("📂 加载会话存储: {}", self.path.display());
        let (model, upgraded) = if tokio::fs::metadata(&self.path).await.is_ok() {
            let mut raw: Value = read_single(&self.path, self.adapter.as_ref()).await?;
            let upgraded = upgrade_session_storage(&mut raw)?;
            let model: SessionStorageModel = serde_json::from_value(raw)?;
            (model, upgraded)
        } else {
            (SessionStorageModel::default(), false)
        };
        *self.model.write().await = model;

        let removed = self.model.write().await.retain_logins(actual_logins);
        if removed > 0 {
            info!("🧹 清理了 {} 个不存在账号的会话记录", removed);
        }
        if upgraded || removed > 0 {
            self.save().await?;
        }
        Ok(())
    }

    pub async fn get_session(&self, login: &str, api_origin: &str) -> Option<AccountPersistentSession> {
        self.model
            .read()
            .await
            .instance
            .get(login)
            .and_then(|bundle| bundle.get(&normalize_api_origin(api_origin)))
            .cloned()
    }

    pub async fn save_session(
        &self,
        login: &str,
        api_origin: &str,
        session: AccountPersistentSession,
    ) -> Result<()> {
        debug!("保存会话: login={}", login);
        self.model
            .write()
            .await
            .instance
            .entry(login.to_string())
            .or_default()
            .insert(normalize_api_origin(api_origin), session);
        self.save().await
    }

    /// 清除会话，返回记录是否存在
    pub async fn clear_session(&self, login: &str, api_origin: &str) -> Result<bool> {
        let removed = {
            let mut model = self.model.write().await;
            model
                .instance
                .get_mut(login)
                .map(|bundle| bundle.remove(&normalize_api_origin(api_origin)).is_some())
                .unwrap_or(false)
        };
        if removed {
            info!("🧹 清除会话: login={}", login);
            self.save().await?;
        }
        Ok(removed)
    }

    pub async fn get_session_storage_patch(
        &self,
        login: &str,
        api_origin: &str,
    ) -> Option<SessionStoragePatch> {
        self.model
            .read()
            .await
            .session_storage_patch_instance
            .get(login)
            .and_then(|bundle| bundle.get(&normalize_api_origin(api_origin)))
            .cloned()
    }

    pub async fn save_session_storage_patch(
        &self,
        login: &str,
        api_origin: &str,
        patch: SessionStoragePatch,
    ) -> Result<()> {
        self.model
            .write()
            .await
            .session_storage_patch_instance
            .entry(login.to_string())
            .or_default()
            .insert(normalize_api_origin(api_origin), patch);
        self.save().await
    }

    /// 内存模型的拷贝
    pub async fn snapshot(&self) -> SessionStorageModel {
        self.model.read().await.clone()
    }

    pub fn pending_writes(&self) -> usize {
        self.write_queue.in_flight()
    }

    async fn save(&self) -> Result<()> {
        let model = self.model.clone();
        let adapter = self.adapter.clone();
        let path = self.path.clone();
        self.write_queue
            .enqueue(async move {
                let snapshot = model.read().await.clone();
                write_single(
                    &path,
                    adapter.as_ref(),
                    &snapshot,
                    SESSION_COMPRESSION,
                    SESSION_COMPRESSION_LEVEL,
                )
                .await
            })
            .await
    }
}
