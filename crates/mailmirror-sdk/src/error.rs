use std::fmt;

/// Provider API 返回的错误（已脱敏，只保留状态码/错误码/名称）
///
/// 注意：不得携带实体内容，日志中可以安全打印
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("provider error [status={status}, code={code:?}, name={name}]: {message}")]
pub struct ProviderError {
    /// HTTP 状态码（0 / -1 表示网络层失败）
    pub status: i32,
    /// Provider 业务错误码
    pub code: Option<u32>,
    /// 错误名称（例如 "TimeoutError"）
    pub name: String,
    /// 简短描述
    pub message: String,
}

impl ProviderError {
    pub fn new(status: i32, message: impl Into<String>) -> Self {
        Self {
            status,
            code: None,
            name: String::new(),
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: u32) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[derive(Debug)]
pub enum MirrorError {
    IO(String),
    JsonError(String),
    Serialization(String),
    // 容器格式错误（致命，不重试）
    HeaderNotFound(String),
    UnsupportedFormat(String),
    IncompleteData(String),
    // 加密错误（不得包含密钥或明文）
    Crypto(String),
    Compression(String),
    // Provider 拉取错误，由重试管线分类
    Provider(ProviderError),
    NotFound(String),
    InvalidData(String),
    InvalidState(String), // 并发/重入等编排错误
    Config(String),
    Migration(String),
    Cancelled,
    Other(String),
}

impl fmt::Display for MirrorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MirrorError::IO(e) => write!(f, "IO error: {}", e),
            MirrorError::JsonError(e) => write!(f, "JSON error: {}", e),
            MirrorError::Serialization(e) => write!(f, "Serialization error: {}", e),
            MirrorError::HeaderNotFound(e) => write!(f, "Header not found: {}", e),
            MirrorError::UnsupportedFormat(e) => write!(f, "Unsupported format: {}", e),
            MirrorError::IncompleteData(e) => write!(f, "Incomplete data: {}", e),
            MirrorError::Crypto(e) => write!(f, "Crypto error: {}", e),
            MirrorError::Compression(e) => write!(f, "Compression error: {}", e),
            MirrorError::Provider(e) => write!(f, "{}", e),
            MirrorError::NotFound(e) => write!(f, "Not found: {}", e),
            MirrorError::InvalidData(e) => write!(f, "Invalid data: {}", e),
            MirrorError::InvalidState(e) => write!(f, "Invalid state: {}", e),
            MirrorError::Config(e) => write!(f, "Config error: {}", e),
            MirrorError::Migration(e) => write!(f, "Migration error: {}", e),
            MirrorError::Cancelled => write!(f, "Cancelled"),
            MirrorError::Other(e) => write!(f, "Other error: {}", e),
        }
    }
}

impl std::error::Error for MirrorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MirrorError::Provider(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for MirrorError {
    fn from(error: std::io::Error) -> Self {
        MirrorError::IO(error.to_string())
    }
}

impl From<serde_json::Error> for MirrorError {
    fn from(error: serde_json::Error) -> Self {
        MirrorError::JsonError(error.to_string())
    }
}

impl From<rmp_serde::encode::Error> for MirrorError {
    fn from(error: rmp_serde::encode::Error) -> Self {
        MirrorError::Serialization(format!("msgpack 编码失败: {}", error))
    }
}

impl From<rmp_serde::decode::Error> for MirrorError {
    fn from(error: rmp_serde::decode::Error) -> Self {
        MirrorError::Serialization(format!("msgpack 解码失败: {}", error))
    }
}

impl From<ProviderError> for MirrorError {
    fn from(error: ProviderError) -> Self {
        MirrorError::Provider(error)
    }
}

impl MirrorError {
    /// 获取 Provider 错误（如果这是一个 Provider 错误）
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            MirrorError::Provider(e) => Some(e),
            _ => None,
        }
    }

    /// 容器格式类错误：表示文件损坏而非瞬时故障，不应重试
    pub fn is_fatal_format(&self) -> bool {
        matches!(
            self,
            MirrorError::HeaderNotFound(_)
                | MirrorError::UnsupportedFormat(_)
                | MirrorError::IncompleteData(_)
                | MirrorError::Crypto(_)
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, MirrorError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, MirrorError>;
