//! MailMirror SDK 配置
//!
//! 配置在启动时构造一次，之后显式传递给各组件（不做全局缓存）。

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MirrorError, Result};

/// 压缩算法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    Gzip,
    Zstd,
    None,
}

impl CompressionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionType::Gzip => "gzip",
            CompressionType::Zstd => "zstd",
            CompressionType::None => "none",
        }
    }
}

/// 邮件分片大小区间（闭区间，每次写入随机取一次）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailsPortionSize {
    pub min: usize,
    pub max: usize,
}

impl Default for MailsPortionSize {
    fn default() -> Self {
        Self { min: 400, max: 5000 }
    }
}

/// 数据库容器压缩配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbCompressionConfig {
    /// 压缩算法
    pub compression_type: CompressionType,
    /// 压缩级别（超出算法范围时回退到默认级别）
    pub level: i32,
    /// 邮件分片大小
    pub mails_portion_size: MailsPortionSize,
}

impl Default for DbCompressionConfig {
    fn default() -> Self {
        Self {
            compression_type: CompressionType::Gzip,
            level: 6,
            mails_portion_size: MailsPortionSize::default(),
        }
    }
}

/// 拉取配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchingConfig {
    /// 引导阶段每累积多少条记录落盘一次
    pub messages_store_portion_size: usize,
}

impl Default for FetchingConfig {
    fn default() -> Self {
        Self {
            messages_store_portion_size: 500,
        }
    }
}

/// 重试配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// 最大重试次数
    pub retries_limit: u32,
    /// 重试间隔（毫秒）
    pub retries_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries_limit: 3,
            retries_delay_ms: 5000,
        }
    }
}

impl RetryConfig {
    pub fn retries_delay(&self) -> Duration {
        Duration::from_millis(self.retries_delay_ms)
    }
}

/// MailMirror SDK 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// 数据存储目录
    pub data_dir: PathBuf,
    /// 数据库文件名（相对 data_dir）
    pub database_file: String,
    /// 会话存储文件名（相对 data_dir）
    pub session_storage_file: String,
    /// 数据库压缩配置
    pub db_compression: DbCompressionConfig,
    /// 拉取配置
    pub fetching: FetchingConfig,
    /// 重试配置
    pub retry: RetryConfig,
    /// 调试模式
    pub debug_mode: bool,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            data_dir: get_default_data_dir(),
            database_file: "database.bin".to_string(),
            session_storage_file: "session-storage.bin".to_string(),
            db_compression: DbCompressionConfig::default(),
            fetching: FetchingConfig::default(),
            retry: RetryConfig::default(),
            debug_mode: false,
        }
    }
}

/// 获取默认数据目录 ~/.mailmirror/
fn get_default_data_dir() -> PathBuf {
    if let Some(home_dir) = std::env::var("HOME").ok().map(PathBuf::from) {
        home_dir.join(".mailmirror")
    } else if let Some(home_dir) = std::env::var("USERPROFILE").ok().map(PathBuf::from) {
        // Windows 支持
        home_dir.join(".mailmirror")
    } else {
        PathBuf::from("./mailmirror_data")
    }
}

impl MirrorConfig {
    pub fn builder() -> MirrorConfigBuilder {
        MirrorConfigBuilder::new()
    }

    /// 从 JSON 文件加载配置
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| MirrorError::Config(format!("读取配置文件失败: {}", e)))?;
        let config: MirrorConfig = serde_json::from_str(&content)
            .map_err(|e| MirrorError::Config(format!("解析配置文件失败: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(MirrorError::Config("data_dir 不能为空".to_string()));
        }
        if self.fetching.messages_store_portion_size == 0 {
            return Err(MirrorError::Config(
                "messages_store_portion_size 必须大于 0".to_string(),
            ));
        }
        let portion = &self.db_compression.mails_portion_size;
        if portion.min == 0 && portion.max == 0 {
            return Err(MirrorError::Config("mails_portion_size 必须大于 0".to_string()));
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    pub fn session_storage_path(&self) -> PathBuf {
        self.data_dir.join(&self.session_storage_file)
    }
}

/// MailMirror SDK 配置构建器
pub struct MirrorConfigBuilder {
    config: MirrorConfig,
}

impl Default for MirrorConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MirrorConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: MirrorConfig::default(),
        }
    }

    pub fn data_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.data_dir = path.as_ref().to_path_buf();
        self
    }

    pub fn database_file<S: Into<String>>(mut self, name: S) -> Self {
        self.config.database_file = name.into();
        self
    }

    pub fn session_storage_file<S: Into<String>>(mut self, name: S) -> Self {
        self.config.session_storage_file = name.into();
        self
    }

    /// 设置压缩算法和级别
    pub fn compression(mut self, compression_type: CompressionType, level: i32) -> Self {
        self.config.db_compression.compression_type = compression_type;
        self.config.db_compression.level = level;
        self
    }

    pub fn mails_portion_size(mut self, min: usize, max: usize) -> Self {
        self.config.db_compression.mails_portion_size = MailsPortionSize { min, max };
        self
    }

    pub fn messages_store_portion_size(mut self, size: usize) -> Self {
        self.config.fetching.messages_store_portion_size = size;
        self
    }

    pub fn retry(mut self, retries_limit: u32, retries_delay: Duration) -> Self {
        self.config.retry = RetryConfig {
            retries_limit,
            retries_delay_ms: retries_delay.as_millis() as u64,
        };
        self
    }

    pub fn debug_mode(mut self, enabled: bool) -> Self {
        self.config.debug_mode = enabled;
        self
    }

    pub fn build(self) -> MirrorConfig {
        self.config
    }
}
