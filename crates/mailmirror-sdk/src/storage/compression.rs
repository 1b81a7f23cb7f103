//! 容器条目压缩（gzip / zstd / 不压缩）

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tracing::error;

use crate::config::CompressionType;
use crate::error::{MirrorError, Result};

const GZIP_LEVELS: (i32, i32) = (1, 9);
const ZSTD_LEVELS: (i32, i32) = (1, 22);
const GZIP_FALLBACK_LEVEL: i32 = 6;
const ZSTD_FALLBACK_LEVEL: i32 = 8;

/// 将压缩级别限定在算法允许范围内，越界时回退到默认级别
pub fn resolve_level(compression_type: CompressionType, level: i32) -> i32 {
    let ((min, max), fallback) = match compression_type {
        CompressionType::Gzip => (GZIP_LEVELS, GZIP_FALLBACK_LEVEL),
        CompressionType::Zstd => (ZSTD_LEVELS, ZSTD_FALLBACK_LEVEL),
        CompressionType::None => return level,
    };
    if level < min || level > max {
        error!(
            "无效的 {} 压缩级别 {}，回退到默认值: {}",
            compression_type.as_str(),
            level,
            fallback
        );
        return fallback;
    }
    level
}

pub fn compress(data: &[u8], compression_type: CompressionType, level: i32) -> Result<Vec<u8>> {
    let level = resolve_level(compression_type, level);
    match compression_type {
        CompressionType::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::new(level as u32));
            encoder
                .write_all(data)
                .map_err(|e| MirrorError::Compression(format!("gzip 压缩失败: {}", e)))?;
            encoder
                .finish()
                .map_err(|e| MirrorError::Compression(format!("gzip 压缩失败: {}", e)))
        }
        CompressionType::Zstd => zstd::encode_all(data, level)
            .map_err(|e| MirrorError::Compression(format!("zstd 压缩失败: {}", e))),
        CompressionType::None => Ok(data.to_vec()),
    }
}

pub fn decompress(data: &[u8], compression_type: CompressionType) -> Result<Vec<u8>> {
    match compression_type {
        CompressionType::Gzip => {
            let mut decoder = GzDecoder::new(data);
            let mut output = Vec::new();
            decoder
                .read_to_end(&mut output)
                .map_err(|e| MirrorError::Compression(format!("gzip 解压失败: {}", e)))?;
            Ok(output)
        }
        CompressionType::Zstd => zstd::decode_all(data)
            .map_err(|e| MirrorError::Compression(format!("zstd 解压失败: {}", e))),
        CompressionType::None => Ok(data.to_vec()),
    }
}
