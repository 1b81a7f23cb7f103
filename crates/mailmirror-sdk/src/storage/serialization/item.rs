//! 容器条目编解码：msgpack → 压缩 → 加密 → 追加 `dataMapItem` 标记

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::config::CompressionType;
use crate::error::{MirrorError, Result};
use crate::storage::compression;
use crate::storage::encryption::{split_header, EncryptionAdapter, HEADER_ZERO_BYTE};

/// 编码单个条目，返回 `[条目头部 JSON][0x00][密文]`
pub async fn serialize_data_map_item<T: Serialize + ?Sized>(
    data: &T,
    adapter: &dyn EncryptionAdapter,
    compression_type: CompressionType,
    level: i32,
) -> Result<Vec<u8>> {
    let packed = rmp_serde::to_vec_named(data)?;
    let compressed = compression::compress(&packed, compression_type, level)?;
    drop(packed);
    let encrypted = adapter.encrypt(&compressed).await?;
    drop(compressed);

    let (header_bytes, ciphertext) = split_header(&encrypted)?;
    let mut header = match serde_json::from_slice::<Value>(header_bytes)? {
        Value::Object(map) => map,
        other => {
            return Err(MirrorError::Crypto(format!(
                "加密头部不是 JSON 对象: {}",
                json_type_name(&other)
            )))
        }
    };
    header.insert(
        "serialization".to_string(),
        serde_json::json!({ "dataMapItem": true }),
    );

    let mut item = serde_json::to_vec(&header)?;
    item.reserve(ciphertext.len() + 1);
    item.push(HEADER_ZERO_BYTE);
    item.extend_from_slice(ciphertext);
    Ok(item)
}

/// 解码单个条目（适配器会忽略头部中的 `serialization` 字段）
pub async fn deserialize_data_map_item<T: DeserializeOwned>(
    item: &[u8],
    adapter: &dyn EncryptionAdapter,
    compression_type: CompressionType,
) -> Result<T> {
    let decrypted = adapter.decrypt(item).await?;
    let decompressed = compression::decompress(&decrypted, compression_type)?;
    drop(decrypted);
    Ok(rmp_serde::from_slice(&decompressed)?)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
