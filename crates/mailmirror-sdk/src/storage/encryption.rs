//! 加密适配器
//!
//! 输出格式统一为 `[头部 JSON][0x00][密文]`，头部由适配器自行描述
//! （算法、nonce 等），容器层只负责在头部上追加序列化标记。
//!
//! 错误信息中不得包含密钥或明文。

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};

use crate::error::{MirrorError, Result};

/// 头部与载荷之间的分隔字节
pub const HEADER_ZERO_BYTE: u8 = 0x00;

const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;
const AES_256_GCM: &str = "aes-256-gcm";

/// 对称加密适配器
#[async_trait]
pub trait EncryptionAdapter: Send + Sync {
    /// 加密，返回 `[头部 JSON][0x00][密文]`
    async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// 解密 `encrypt` 的输出
    async fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>>;
}

#[derive(Debug, Serialize, Deserialize)]
struct EncryptionHeaderBody {
    #[serde(rename = "type")]
    kind: String,
    nonce: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct EncryptionHeader {
    encryption: EncryptionHeaderBody,
}

/// AES-256-GCM 适配器（base64 编码的 32 字节密钥，每次加密随机 96 位 nonce）
pub struct AesGcmEncryptionAdapter {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for AesGcmEncryptionAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmEncryptionAdapter").finish_non_exhaustive()
    }
}

impl AesGcmEncryptionAdapter {
    pub fn new(key_base64: &str) -> Result<Self> {
        let key = BASE64
            .decode(key_base64.trim())
            .map_err(|_| MirrorError::Crypto("Invalid encryption key encoding".to_string()))?;
        if key.len() != KEY_SIZE {
            return Err(MirrorError::Crypto(format!(
                "Invalid encryption key length, expected: {}, actual: {}",
                KEY_SIZE,
                key.len()
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|_| MirrorError::Crypto("加密器初始化失败".to_string()))?;
        Ok(Self { cipher })
    }

    /// 生成随机密钥（base64）
    pub fn generate_key() -> String {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        BASE64.encode(key.as_slice())
    }
}

/// 拆分 `[头部 JSON][0x00][载荷]`
pub fn split_header(data: &[u8]) -> Result<(&[u8], &[u8])> {
    let index = data
        .iter()
        .position(|b| *b == HEADER_ZERO_BYTE)
        .ok_or_else(|| MirrorError::HeaderNotFound("加密数据缺少头部分隔符".to_string()))?;
    Ok((&data[..index], &data[index + 1..]))
}

#[async_trait]
impl EncryptionAdapter for AesGcmEncryptionAdapter {
    async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| MirrorError::Crypto("加密失败".to_string()))?;

        let header = EncryptionHeader {
            encryption: EncryptionHeaderBody {
                kind: AES_256_GCM.to_string(),
                nonce: BASE64.encode(nonce.as_slice()),
            },
        };
        let mut output = serde_json::to_vec(&header)?;
        output.reserve(ciphertext.len() + 1);
        output.push(HEADER_ZERO_BYTE);
        output.extend_from_slice(&ciphertext);
        Ok(output)
    }

    async fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let (header_bytes, ciphertext) = split_header(data)?;
        let header: EncryptionHeader = serde_json::from_slice(header_bytes)
            .map_err(|e| MirrorError::Crypto(format!("加密头部解析失败: {}", e)))?;
        if header.encryption.kind != AES_256_GCM {
            return Err(MirrorError::Crypto(format!(
                "不支持的加密类型: {}",
                header.encryption.kind
            )));
        }
        let nonce_bytes = BASE64
            .decode(&header.encryption.nonce)
            .map_err(|_| MirrorError::Crypto("nonce 编码无效".to_string()))?;
        if nonce_bytes.len() != NONCE_SIZE {
            return Err(MirrorError::Crypto(format!(
                "nonce 长度无效, expected: {}, actual: {}",
                NONCE_SIZE,
                nonce_bytes.len()
            )));
        }
        self.cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext)
            .map_err(|_| MirrorError::Crypto("解密失败（密钥错误或数据损坏）".to_string()))
    }
}
