//! 数据实体定义 - 对应镜像数据库的内存结构
//!
//! 这里定义了镜像邮箱的全部实体，用于：
//! - 容器文件的 msgpack 序列化/反序列化
//! - 补丁（DbPatch）的 upsert 载荷
//! - 账号元数据（游标 + 拉取阶段）

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::version::DATABASE_VERSION;

/// 登录名（账号唯一标识）
pub type Login = String;
/// 实体主键
pub type Pk = String;

/// 由 Provider 原生 id（以及列表 id）确定性地生成主键
///
/// 无列表 id 时主键即 id；有列表 id 时为 `["listId","id"]` 的 JSON 文本。
pub fn build_pk(id: &str, list_id: Option<&str>) -> Pk {
    match list_id {
        None => id.to_string(),
        Some(list_id) => serde_json::Value::from(vec![list_id, id]).to_string(),
    }
}

/// 实体公共行为
pub trait Entity: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static {
    fn pk(&self) -> &str;
}

/// 邮件地址
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailAddress {
    pub address: String,
    pub name: String,
}

/// 附件
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct File {
    pub pk: Pk,
    pub id: String,
    pub mime_type: Option<String>,
    pub name: String,
    pub size: u64,
}

/// 邮件实体
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mail {
    pub pk: Pk,
    pub id: String,
    /// Provider 原始载荷（不透明）
    pub raw: String,
    pub conversation_entry_pk: Pk,
    pub mail_folder_ids: Vec<String>,
    pub subject: String,
    pub sent_date: i64,
    pub received_date: i64,
    pub sender: MailAddress,
    pub to_recipients: Vec<MailAddress>,
    pub cc_recipients: Vec<MailAddress>,
    pub bcc_recipients: Vec<MailAddress>,
    pub attachments: Vec<File>,
    pub unread: bool,
    pub body: Option<String>,
    /// 正文拉取失败（保留元数据）
    pub failed_download: bool,
}

/// 文件夹类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FolderType {
    #[default]
    Custom,
    Inbox,
    Sent,
    Trash,
    Archive,
    Spam,
    Draft,
}

/// 文件夹实体
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub pk: Pk,
    pub id: String,
    pub raw: String,
    pub title: String,
    pub folder_type: FolderType,
    pub parent_id: Option<String>,
}

/// 联系人实体
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub pk: Pk,
    pub id: String,
    pub raw: String,
    pub first_name: String,
    pub last_name: String,
    pub comment: String,
    pub mail_addresses: Vec<String>,
    pub phone_numbers: Vec<String>,
}

/// 会话条目实体（邮件在会话中的位置）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationEntry {
    pub pk: Pk,
    pub id: String,
    pub raw: String,
    pub previous_pk: Option<Pk>,
    pub mail_pk: Option<Pk>,
}

impl Entity for Mail {
    fn pk(&self) -> &str {
        &self.pk
    }
}

impl Entity for Folder {
    fn pk(&self) -> &str {
        &self.pk
    }
}

impl Entity for Contact {
    fn pk(&self) -> &str {
        &self.pk
    }
}

impl Entity for ConversationEntry {
    fn pk(&self) -> &str {
        &self.pk
    }
}

/// 事件游标：单值字符串，或按分组维护的游标表
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventCursor {
    Single(String),
    Groups(BTreeMap<String, String>),
}

impl Default for EventCursor {
    fn default() -> Self {
        EventCursor::Single(String::new())
    }
}

impl EventCursor {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        match self {
            EventCursor::Single(value) => value.trim().is_empty(),
            EventCursor::Groups(groups) => groups.values().all(|v| v.trim().is_empty()),
        }
    }
}

impl From<&str> for EventCursor {
    fn from(value: &str) -> Self {
        EventCursor::Single(value.to_string())
    }
}

/// 拉取阶段
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FetchStage {
    #[default]
    #[serde(rename = "")]
    Unset,
    #[serde(rename = "bootstrap_init")]
    BootstrapInit,
    #[serde(rename = "bootstrap_messages_metadata")]
    BootstrapMessagesMetadata,
    #[serde(rename = "bootstrap_messages_content")]
    BootstrapMessagesContent,
    #[serde(rename = "events")]
    Events,
}

impl FetchStage {
    /// 是否为引导进行中的阶段标记
    pub fn is_bootstrap_marker(&self) -> bool {
        matches!(
            self,
            FetchStage::BootstrapInit
                | FetchStage::BootstrapMessagesMetadata
                | FetchStage::BootstrapMessagesContent
        )
    }
}

/// 账号元数据
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountMetadata {
    #[serde(default)]
    pub latest_event_id: EventCursor,
    #[serde(default)]
    pub fetch_stage: FetchStage,
}

/// 账号是否已完成引导
///
/// 游标非空且拉取阶段不是引导标记时才视为已引导，
/// 引导中途崩溃时游标始终为空，因此重启后会重新引导。
pub fn is_bootstrapped(metadata: &AccountMetadata) -> bool {
    !metadata.latest_event_id.is_empty() && !metadata.fetch_stage.is_bootstrap_marker()
}

/// 账号镜像
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    #[serde(default)]
    pub metadata: AccountMetadata,
    #[serde(default)]
    pub mails: BTreeMap<Pk, Mail>,
    #[serde(default)]
    pub folders: BTreeMap<Pk, Folder>,
    #[serde(default)]
    pub contacts: BTreeMap<Pk, Contact>,
    #[serde(default)]
    pub conversation_entries: BTreeMap<Pk, ConversationEntry>,
}

/// 账号统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountStat {
    pub mails: usize,
    pub folders: usize,
    pub contacts: usize,
    pub conversation_entries: usize,
}

impl Account {
    pub fn stat(&self) -> AccountStat {
        AccountStat {
            mails: self.mails.len(),
            folders: self.folders.len(),
            contacts: self.contacts.len(),
            conversation_entries: self.conversation_entries.len(),
        }
    }
}

/// 镜像数据库快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsDb {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub accounts: BTreeMap<Login, Account>,
}

impl Default for FsDb {
    fn default() -> Self {
        Self {
            version: DATABASE_VERSION.to_string(),
            accounts: BTreeMap::new(),
        }
    }
}

impl FsDb {
    /// 所有账号的邮件总数
    pub fn mails_count(&self) -> usize {
        self.accounts.values().map(|a| a.mails.len()).sum()
    }
}
