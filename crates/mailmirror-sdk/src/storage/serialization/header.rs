//! 容器头部定位与解析
//!
//! 容器文件布局：
//! `[条目0][条目1]..[条目N][0x00][汇总头部 JSON]`，
//! 每个条目自身为 `[条目头部 JSON][0x00][密文]`。
//!
//! 旧版文件只有一个加密块，头部位于文件开头。

use std::io::SeekFrom;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncSeekExt, BufReader};
use tracing::debug;

use crate::config::CompressionType;
use crate::error::{MirrorError, Result};
use crate::storage::encryption::HEADER_ZERO_BYTE;

/// 头部扫描块大小
pub const HEADER_READING_BUFFER_SIZE: usize = 50;
/// 头部扫描上限（超过即认为文件损坏）
pub const HEADER_SCAN_LIMIT: usize = 1024 * 1024;

pub const MSGPACK_SERIALIZATION_TYPE: &str = "msgpack";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderPosition {
    Start,
    End,
}

/// 已定位的头部
#[derive(Debug, Clone, PartialEq)]
pub struct LocatedHeader {
    pub value: Value,
    /// 载荷起始偏移
    pub payload_offset_start: u64,
}

/// 汇总头部中的单个条目描述
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataMapItemInfo {
    #[serde(rename = "byteLength")]
    pub byte_length: u64,
}

/// 多条目容器描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataMap {
    #[serde(default)]
    pub compression: Option<CompressionType>,
    pub items: Vec<DataMapItemInfo>,
}

#[derive(Debug, Serialize)]
struct SummarySerialization<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    #[serde(rename = "dataMap")]
    data_map: &'a DataMap,
}

#[derive(Debug, Serialize)]
struct SummaryHeader<'a> {
    serialization: SummarySerialization<'a>,
}

/// 生成写入文件末尾的汇总头部 JSON
pub fn summary_header_bytes(data_map: &DataMap) -> Result<Vec<u8>> {
    let header = SummaryHeader {
        serialization: SummarySerialization {
            kind: MSGPACK_SERIALIZATION_TYPE,
            data_map,
        },
    };
    Ok(serde_json::to_vec(&header)?)
}

/// 头部描述的序列化方式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerializationKind {
    /// 最早的格式：整个文件是一个加密的 JSON
    LegacyJson,
    /// 单块 msgpack（没有 dataMap）
    LegacyMsgpack,
    /// 多条目容器
    DataMap(DataMap),
}

impl SerializationKind {
    pub fn from_header(header: &Value) -> Result<Self> {
        let serialization = match header.get("serialization") {
            Some(Value::Object(map)) => map,
            _ => return Ok(SerializationKind::LegacyJson),
        };
        let kind = match serialization.get("type") {
            None | Some(Value::Null) => return Ok(SerializationKind::LegacyJson),
            Some(Value::String(kind)) => kind.as_str(),
            Some(other) => {
                return Err(MirrorError::UnsupportedFormat(format!(
                    "serialization.type 类型无效: {}",
                    other
                )))
            }
        };
        if kind != MSGPACK_SERIALIZATION_TYPE {
            return Err(MirrorError::UnsupportedFormat(format!(
                "不支持的序列化类型: {}",
                kind
            )));
        }
        match serialization.get("dataMap") {
            None | Some(Value::Null) => Ok(SerializationKind::LegacyMsgpack),
            Some(data_map) => {
                let data_map: DataMap = serde_json::from_value(data_map.clone()).map_err(|e| {
                    MirrorError::UnsupportedFormat(format!("dataMap 解析失败: {}", e))
                })?;
                Ok(SerializationKind::DataMap(data_map))
            }
        }
    }
}

/// 以 50 字节为块扫描 `0x00` 分隔符定位头部
///
/// - 从开头扫描：头部是分隔符之前的内容，载荷紧随其后
/// - 从末尾扫描：头部是最后一个分隔符之后的内容，载荷从偏移 0 开始
pub async fn locate_header(path: &Path, position: HeaderPosition) -> Result<LocatedHeader> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| MirrorError::IO(format!("打开文件失败 {}: {}", path.display(), e)))?;
    let file_len = file.metadata().await?.len();
    let mut file = BufReader::new(file);
    let mut chunk = [0u8; HEADER_READING_BUFFER_SIZE];

    let header_bytes = match position {
        HeaderPosition::Start => {
            let mut buffer: Vec<u8> = Vec::new();
            loop {
                let read = file.read(&mut chunk).await?;
                if read == 0 {
                    return Err(header_not_found(path, buffer.len(), position));
                }
                if let Some(index) = chunk[..read].iter().position(|b| *b == HEADER_ZERO_BYTE) {
                    buffer.extend_from_slice(&chunk[..index]);
                    break buffer;
                }
                buffer.extend_from_slice(&chunk[..read]);
                if buffer.len() > HEADER_SCAN_LIMIT {
                    return Err(header_not_found(path, buffer.len(), position));
                }
            }
        }
        HeaderPosition::End => {
            // 反向读取的块依次前插，最终得到正序的头部
            let mut reversed_chunks: Vec<Vec<u8>> = Vec::new();
            let mut collected = 0usize;
            let mut end = file_len;
            loop {
                if end == 0 {
                    return Err(header_not_found(path, collected, position));
                }
                let start = end.saturating_sub(HEADER_READING_BUFFER_SIZE as u64);
                let size = (end - start) as usize;
                file.seek(SeekFrom::Start(start)).await?;
                file.read_exact(&mut chunk[..size]).await?;
                end = start;

                if let Some(index) = chunk[..size].iter().rposition(|b| *b == HEADER_ZERO_BYTE) {
                    reversed_chunks.push(chunk[index + 1..size].to_vec());
                    break;
                }
                collected += size;
                reversed_chunks.push(chunk[..size].to_vec());
                if collected > HEADER_SCAN_LIMIT {
                    return Err(header_not_found(path, collected, position));
                }
            }
            reversed_chunks.into_iter().rev().flatten().collect()
        }
    };

    let value: Value = serde_json::from_slice(&header_bytes)
        .map_err(|e| MirrorError::HeaderNotFound(format!("头部 JSON 解析失败: {}", e)))?;
    let payload_offset_start = match position {
        HeaderPosition::Start => header_bytes.len() as u64 + 1,
        HeaderPosition::End => 0,
    };
    debug!(
        "📄 定位头部: position={:?}, header_len={}, payload_offset_start={}",
        position,
        header_bytes.len(),
        payload_offset_start
    );
    Ok(LocatedHeader {
        value,
        payload_offset_start,
    })
}

fn header_not_found(path: &Path, scanned: usize, position: HeaderPosition) -> MirrorError {
    MirrorError::HeaderNotFound(format!(
        "无法定位 {} 的头部（已扫描 {} 字节, from_end={}）",
        path.display(),
        scanned,
        position == HeaderPosition::End
    ))
}

/// 按兼容策略解析汇总头部
///
/// 先读开头：`serialization` 不是对象则为旧格式直接返回；
/// 带 `dataMapItem` 标记说明开头只是首个条目的头部，改从末尾读取汇总头部；
/// 其余情况（早期预发布版本写出的形态）原样返回。
pub async fn read_summary_header(path: &Path) -> Result<LocatedHeader> {
    let start_header = locate_header(path, HeaderPosition::Start).await?;
    let serialization = match start_header.value.get("serialization") {
        Some(Value::Object(map)) => map,
        _ => return Ok(start_header),
    };
    let is_data_map_item = serialization
        .get("dataMapItem")
        .map(|v| match v {
            Value::Bool(flag) => *flag,
            Value::Null => false,
            _ => true,
        })
        .unwrap_or(false);
    if is_data_map_item {
        return locate_header(path, HeaderPosition::End).await;
    }
    Ok(start_header)
}
