//! 分块容器序列化
//!
//! 写入：先写一个“骨架”条目（所有账号，邮件清空），再把邮件按随机大小分片逐个写入，
//! 最后写入 `0x00` + 汇总头部。条目严格顺序写入，内存中最多保留一个分片。
//!
//! 读取：解析汇总头部后按 `byteLength` 逐个读取条目，复用同一个读缓冲区，
//! 首个条目建立数据库骨架，后续条目把邮件合并回对应账号。

pub mod header;
pub mod item;

use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

use crate::config::{CompressionType, DbCompressionConfig, MailsPortionSize};
use crate::error::{MirrorError, Result};
use crate::storage::encryption::{EncryptionAdapter, HEADER_ZERO_BYTE};
use crate::storage::entities::{
    AccountMetadata, Contact, ConversationEntry, Folder, FsDb, Mail, Pk,
};

pub use header::{
    locate_header, read_summary_header, DataMap, DataMapItemInfo, HeaderPosition, LocatedHeader,
    SerializationKind,
};
pub use item::{deserialize_data_map_item, serialize_data_map_item};

/// 写缓冲区大小
pub const DATA_WRITING_BUFFER_SIZE: usize = 1024 * 1024;
/// 邮件分片大小的硬性上下限
pub const MAILS_PORTION_HARD_LIMITS: (usize, usize) = (1, 100_000);

/// 按配置区间随机选取本次写入的分片大小
///
/// 区间为闭区间；min > max 时交换；两端先限定在硬性上下限内。
pub fn resolve_portion_size_limit(range: &MailsPortionSize) -> usize {
    let (hard_min, hard_max) = MAILS_PORTION_HARD_LIMITS;
    let min = range.min.clamp(hard_min, hard_max);
    let max = range.max.clamp(hard_min, hard_max);
    let (low, high) = if min <= max { (min, max) } else { (max, min) };
    rand::thread_rng().gen_range(low..=high)
}

/// 原子写入器：写入同目录下的临时文件，完成后 fsync 并重命名覆盖目标文件
pub struct ContainerWriter {
    target: PathBuf,
    temp_path: PathBuf,
    writer: BufWriter<tokio::fs::File>,
    data_map: DataMap,
}

impl ContainerWriter {
    pub async fn create(target: &Path, compression: CompressionType) -> Result<Self> {
        let dir = target
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| MirrorError::IO(format!("创建目录失败: {}", e)))?;
        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "container".to_string());
        let temp_path = dir.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));
        let file = tokio::fs::File::create(&temp_path)
            .await
            .map_err(|e| MirrorError::IO(format!("创建临时文件失败: {}", e)))?;

        Ok(Self {
            target: target.to_path_buf(),
            temp_path,
            writer: BufWriter::with_capacity(DATA_WRITING_BUFFER_SIZE, file),
            data_map: DataMap {
                compression: Some(compression),
                items: Vec::new(),
            },
        })
    }

    /// 追加一个已编码的条目
    pub async fn write_item(&mut self, item: &[u8]) -> Result<()> {
        self.writer.write_all(item).await?;
        self.data_map.items.push(DataMapItemInfo {
            byte_length: item.len() as u64,
        });
        Ok(())
    }

    /// 写入汇总头部并原子替换目标文件
    pub async fn finish(mut self) -> Result<DataMap> {
        let header = header::summary_header_bytes(&self.data_map)?;
        self.writer.write_all(&[HEADER_ZERO_BYTE]).await?;
        self.writer.write_all(&header).await?;
        self.writer.flush().await?;
        self.writer.get_mut().sync_all().await?;
        drop(self.writer);
        tokio::fs::rename(&self.temp_path, &self.target)
            .await
            .map_err(|e| MirrorError::IO(format!("重命名临时文件失败: {}", e)))?;
        Ok(self.data_map)
    }

    /// 放弃写入并删除临时文件
    pub async fn abort(self) {
        drop(self.writer);
        if let Err(e) = tokio::fs::remove_file(&self.temp_path).await {
            warn!("删除临时文件失败: {}", e);
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AccountShape<'a> {
    metadata: &'a AccountMetadata,
    mails: BTreeMap<&'a str, &'a Mail>,
    folders: &'a BTreeMap<Pk, Folder>,
    contacts: &'a BTreeMap<Pk, Contact>,
    conversation_entries: &'a BTreeMap<Pk, ConversationEntry>,
}

#[derive(Serialize)]
struct DbShape<'a> {
    version: &'a str,
    accounts: BTreeMap<&'a str, AccountShape<'a>>,
}

#[derive(Serialize)]
struct MailsPortionAccount<'a> {
    mails: BTreeMap<&'a str, &'a Mail>,
}

#[derive(Deserialize)]
struct MailsPortionAccountOwned {
    #[serde(default)]
    mails: BTreeMap<Pk, Mail>,
}

/// 镜像数据库的容器读写器
#[derive(Clone)]
pub struct DatabaseSerializer {
    path: PathBuf,
    adapter: Arc<dyn EncryptionAdapter>,
}

impl DatabaseSerializer {
    pub fn new(path: impl Into<PathBuf>, adapter: Arc<dyn EncryptionAdapter>) -> Self {
        Self {
            path: path.into(),
            adapter,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 写入数据库：骨架条目 + 邮件分片
    pub async fn write(&self, db: &FsDb, compression: &DbCompressionConfig) -> Result<DataMap> {
        let mut writer = ContainerWriter::create(&self.path, compression.compression_type).await?;
        match self.write_items(&mut writer, db, compression).await {
            Ok(()) => {
                let data_map = writer.finish().await?;
                info!(
                    "💾 数据库写入完成: accounts={}, mails={}, items={}",
                    db.accounts.len(),
                    db.mails_count(),
                    data_map.items.len()
                );
                Ok(data_map)
            }
            Err(e) => {
                writer.abort().await;
                Err(e)
            }
        }
    }

    async fn write_items(
        &self,
        writer: &mut ContainerWriter,
        db: &FsDb,
        compression: &DbCompressionConfig,
    ) -> Result<()> {
        let compression_type = compression.compression_type;
        let level = compression.level;
        let adapter = self.adapter.as_ref();

        let shape = DbShape {
            version: &db.version,
            accounts: db
                .accounts
                .iter()
                .map(|(login, account)| {
                    (
                        login.as_str(),
                        AccountShape {
                            metadata: &account.metadata,
                            mails: BTreeMap::new(),
                            folders: &account.folders,
                            contacts: &account.contacts,
                            conversation_entries: &account.conversation_entries,
                        },
                    )
                })
                .collect(),
        };
        let item = serialize_data_map_item(&shape, adapter, compression_type, level).await?;
        writer.write_item(&item).await?;
        drop(item);

        let portion_limit = resolve_portion_size_limit(&compression.mails_portion_size);
        debug!("邮件分片大小: {}", portion_limit);

        let mut portion: BTreeMap<&str, MailsPortionAccount<'_>> = BTreeMap::new();
        let mut portion_counter = 0usize;
        for (login, account) in &db.accounts {
            for (pk, mail) in &account.mails {
                portion
                    .entry(login.as_str())
                    .or_insert_with(|| MailsPortionAccount {
                        mails: BTreeMap::new(),
                    })
                    .mails
                    .insert(pk.as_str(), mail);
                portion_counter += 1;

                if portion_counter == portion_limit {
                    let item =
                        serialize_data_map_item(&portion, adapter, compression_type, level).await?;
                    writer.write_item(&item).await?;
                    portion.clear();
                    portion_counter = 0;
                }
            }
        }
        if portion_counter > 0 {
            let item = serialize_data_map_item(&portion, adapter, compression_type, level).await?;
            writer.write_item(&item).await?;
        }
        Ok(())
    }

    /// 读取数据库（兼容旧格式）
    pub async fn read(&self) -> Result<FsDb> {
        let located = read_summary_header(&self.path).await?;
        let data_map = match SerializationKind::from_header(&located.value)? {
            SerializationKind::DataMap(data_map) => data_map,
            legacy => return self.read_legacy(legacy).await,
        };
        let compression_type = data_map.compression.unwrap_or(CompressionType::None);

        let mut file = tokio::fs::File::open(&self.path).await?;
        let mut buffer: Vec<u8> = Vec::new();
        let mut offset = located.payload_offset_start;
        let mut result: Option<FsDb> = None;

        for info in &data_map.items {
            let len = usize::try_from(info.byte_length)
                .map_err(|_| MirrorError::InvalidData(format!("条目过大: {}", info.byte_length)))?;
            if buffer.len() < len {
                buffer.resize(len, 0);
            }
            file.seek(SeekFrom::Start(offset)).await?;
            file.read_exact(&mut buffer[..len]).await.map_err(|e| {
                MirrorError::IncompleteData(format!("读取条目失败 (offset={}): {}", offset, e))
            })?;
            offset += info.byte_length;

            match result.as_mut() {
                None => {
                    // 首个条目：数据库骨架
                    let db: FsDb = deserialize_data_map_item(
                        &buffer[..len],
                        self.adapter.as_ref(),
                        compression_type,
                    )
                    .await?;
                    result = Some(db);
                }
                Some(db) => {
                    let portion: BTreeMap<String, MailsPortionAccountOwned> =
                        deserialize_data_map_item(
                            &buffer[..len],
                            self.adapter.as_ref(),
                            compression_type,
                        )
                        .await?;
                    for (login, portion_account) in portion {
                        let account = db.accounts.get_mut(&login).ok_or_else(|| {
                            MirrorError::InvalidData(format!(
                                "邮件分片引用了骨架中不存在的账号（文件损坏或被截断）: {}",
                                login
                            ))
                        })?;
                        account.mails.extend(portion_account.mails);
                    }
                }
            }
        }

        let db = result.ok_or_else(|| {
            MirrorError::IncompleteData("无法反序列化不完整的数据".to_string())
        })?;
        info!(
            "📖 数据库读取完成: accounts={}, mails={}, items={}",
            db.accounts.len(),
            db.mails_count(),
            data_map.items.len()
        );
        Ok(db)
    }

    async fn read_legacy<T: DeserializeOwned>(&self, kind: SerializationKind) -> Result<T> {
        read_legacy_file(&self.path, self.adapter.as_ref(), kind).await
    }
}

/// 旧格式：整个文件为一个加密块（JSON 或单块 msgpack，不压缩）
async fn read_legacy_file<T: DeserializeOwned>(
    path: &Path,
    adapter: &dyn EncryptionAdapter,
    kind: SerializationKind,
) -> Result<T> {
    debug!("读取旧格式文件: {:?}", kind);
    let data = tokio::fs::read(path).await?;
    let decrypted = adapter.decrypt(&data).await?;
    match kind {
        SerializationKind::LegacyJson => Ok(serde_json::from_slice(&decrypted)?),
        SerializationKind::LegacyMsgpack => Ok(rmp_serde::from_slice(&decrypted)?),
        SerializationKind::DataMap(_) => Err(MirrorError::UnsupportedFormat(
            "多条目容器不能按旧格式读取".to_string(),
        )),
    }
}

/// 以单条目容器写入任意值（会话存储等小文件）
pub async fn write_single<T: Serialize + ?Sized>(
    path: &Path,
    adapter: &dyn EncryptionAdapter,
    value: &T,
    compression_type: CompressionType,
    level: i32,
) -> Result<()> {
    let mut writer = ContainerWriter::create(path, compression_type).await?;
    let item = match serialize_data_map_item(value, adapter, compression_type, level).await {
        Ok(item) => item,
        Err(e) => {
            writer.abort().await;
            return Err(e);
        }
    };
    if let Err(e) = writer.write_item(&item).await {
        writer.abort().await;
        return Err(e);
    }
    writer.finish().await?;
    Ok(())
}

/// 读取单条目容器（兼容旧格式）
pub async fn read_single<T: DeserializeOwned>(
    path: &Path,
    adapter: &dyn EncryptionAdapter,
) -> Result<T> {
    let located = read_summary_header(path).await?;
    let data_map = match SerializationKind::from_header(&located.value)? {
        SerializationKind::DataMap(data_map) => data_map,
        legacy => return read_legacy_file(path, adapter, legacy).await,
    };
    let info = data_map
        .items
        .first()
        .ok_or_else(|| MirrorError::IncompleteData("容器中没有条目".to_string()))?;
    let len = usize::try_from(info.byte_length)
        .map_err(|_| MirrorError::InvalidData(format!("条目过大: {}", info.byte_length)))?;

    let mut file = tokio::fs::File::open(path).await?;
    file.seek(SeekFrom::Start(located.payload_offset_start)).await?;
    let mut buffer = vec![0u8; len];
    file.read_exact(&mut buffer)
        .await
        .map_err(|e| MirrorError::IncompleteData(format!("读取条目失败: {}", e)))?;
    deserialize_data_map_item(
        &buffer,
        adapter,
        data_map.compression.unwrap_or(CompressionType::None),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::encryption::AesGcmEncryptionAdapter;
    use crate::storage::entities::{Account, EventCursor, FetchStage};
    use crate::testing::{contact, conversation_entry, folder, mail, test_adapter};

    fn compression(compression_type: CompressionType, min: usize, max: usize) -> DbCompressionConfig {
        DbCompressionConfig {
            compression_type,
            level: 5,
            mails_portion_size: MailsPortionSize { min, max },
        }
    }

    fn sample_db(mails_per_account: usize) -> FsDb {
        let mut db = FsDb::default();
        for login in ["alice@example.com", "bob@example.com"] {
            let mut account = Account::default();
            account.metadata.latest_event_id = EventCursor::from("cursor-7");
            account.metadata.fetch_stage = FetchStage::Events;
            account.folders.insert("inbox".into(), folder("inbox"));
            account.folders.insert("archive".into(), folder("archive"));
            account.contacts.insert("c1".into(), contact("c1"));
            account
                .conversation_entries
                .insert("e1".into(), conversation_entry("e1", Some("m0")));
            for i in 0..mails_per_account {
                let pk = format!("{}-m{}", login, i);
                account.mails.insert(pk.clone(), mail(&pk, "inbox"));
            }
            db.accounts.insert(login.to_string(), account);
        }
        db
    }

    #[tokio::test]
    async fn round_trip_all_codecs() {
        let dir = tempfile::tempdir().unwrap();
        let db = sample_db(7);
        for compression_type in [CompressionType::Gzip, CompressionType::Zstd, CompressionType::None] {
            let path = dir.path().join(format!("db-{}.bin", compression_type.as_str()));
            let serializer = DatabaseSerializer::new(&path, test_adapter());
            serializer
                .write(&db, &compression(compression_type, 3, 5))
                .await
                .unwrap();
            assert_eq!(serializer.read().await.unwrap(), db);
        }
    }

    #[tokio::test]
    async fn three_mails_with_portion_of_two() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.bin");
        let mut db = FsDb::default();
        let mut account = Account::default();
        account.folders.insert("inbox".into(), folder("inbox"));
        account.folders.insert("sent".into(), folder("sent"));
        account.mails.insert("m1".into(), mail("m1", "inbox"));
        account.mails.insert("m2".into(), mail("m2", "inbox"));
        account.mails.insert("m3".into(), mail("m3", "sent"));
        db.accounts.insert("alice@example.com".into(), account);

        let adapter = test_adapter();
        let serializer = DatabaseSerializer::new(&path, adapter.clone());
        let data_map = serializer
            .write(&db, &compression(CompressionType::Gzip, 2, 2))
            .await
            .unwrap();
        assert_eq!(data_map.items.len(), 3);

        let located = read_summary_header(&path).await.unwrap();
        match SerializationKind::from_header(&located.value).unwrap() {
            SerializationKind::DataMap(header_map) => assert_eq!(header_map, data_map),
            other => panic!("unexpected kind: {:?}", other),
        }

        let bytes = std::fs::read(&path).unwrap();
        let mut offset = 0usize;
        let mut portion_sizes = Vec::new();
        for (index, info) in data_map.items.iter().enumerate() {
            let item = &bytes[offset..offset + info.byte_length as usize];
            offset += info.byte_length as usize;
            if index == 0 {
                let shape: FsDb = deserialize_data_map_item(item, adapter.as_ref(), CompressionType::Gzip)
                    .await
                    .unwrap();
                assert!(shape.accounts["alice@example.com"].mails.is_empty());
                assert_eq!(shape.accounts["alice@example.com"].folders.len(), 2);
                continue;
            }
            let portion: BTreeMap<String, MailsPortionAccountOwned> =
                deserialize_data_map_item(item, adapter.as_ref(), CompressionType::Gzip)
                    .await
                    .unwrap();
            portion_sizes.push(portion.values().map(|a| a.mails.len()).sum::<usize>());
        }
        assert_eq!(portion_sizes, vec![2, 1]);
        assert_eq!(serializer.read().await.unwrap(), db);
    }

    #[tokio::test]
    async fn portions_stay_within_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.bin");
        let db = sample_db(20);
        let adapter = test_adapter();
        let serializer = DatabaseSerializer::new(&path, adapter.clone());

        for _ in 0..5 {
            let data_map = serializer
                .write(&db, &compression(CompressionType::None, 9, 4))
                .await
                .unwrap();
            let bytes = std::fs::read(&path).unwrap();
            let mut offset = data_map.items[0].byte_length as usize;
            let portions = &data_map.items[1..];
            for (index, info) in portions.iter().enumerate() {
                let item = &bytes[offset..offset + info.byte_length as usize];
                offset += info.byte_length as usize;
                let portion: BTreeMap<String, MailsPortionAccountOwned> =
                    deserialize_data_map_item(item, adapter.as_ref(), CompressionType::None)
                        .await
                        .unwrap();
                let size: usize = portion.values().map(|a| a.mails.len()).sum();
                if index + 1 < portions.len() {
                    assert!((4..=9).contains(&size), "portion size {} out of range", size);
                } else {
                    assert!(size >= 1 && size <= 9);
                }
            }
        }
    }

    #[test]
    fn portion_limit_is_clamped() {
        for _ in 0..50 {
            let limit = resolve_portion_size_limit(&MailsPortionSize { min: 0, max: 0 });
            assert_eq!(limit, 1);
            let limit = resolve_portion_size_limit(&MailsPortionSize { min: 500, max: 400 });
            assert!((400..=500).contains(&limit));
            let limit = resolve_portion_size_limit(&MailsPortionSize { min: 1, max: usize::MAX });
            assert!(limit <= MAILS_PORTION_HARD_LIMITS.1);
        }
    }

    #[tokio::test]
    async fn legacy_json_file_is_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.bin");
        let adapter = test_adapter();
        let db = sample_db(2);
        let encrypted = adapter.encrypt(&serde_json::to_vec(&db).unwrap()).await.unwrap();
        std::fs::write(&path, encrypted).unwrap();

        let serializer = DatabaseSerializer::new(&path, adapter);
        assert_eq!(serializer.read().await.unwrap(), db);
    }

    #[tokio::test]
    async fn legacy_msgpack_blob_is_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy-msgpack.bin");
        let adapter = test_adapter();
        let db = sample_db(3);

        let encrypted = adapter
            .encrypt(&rmp_serde::to_vec_named(&db).unwrap())
            .await
            .unwrap();
        let (header, ciphertext) = crate::storage::encryption::split_header(&encrypted).unwrap();
        let mut header: serde_json::Value = serde_json::from_slice(header).unwrap();
        header["serialization"] = serde_json::json!({"type": "msgpack"});
        let mut bytes = serde_json::to_vec(&header).unwrap();
        bytes.push(0);
        bytes.extend_from_slice(ciphertext);
        std::fs::write(&path, bytes).unwrap();

        let serializer = DatabaseSerializer::new(&path, adapter);
        assert_eq!(serializer.read().await.unwrap(), db);
    }

    #[tokio::test]
    async fn unsupported_serialization_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cbor.bin");
        std::fs::write(&path, b"{\"serialization\":{\"type\":\"cbor\"}}\0payload").unwrap();
        let serializer = DatabaseSerializer::new(&path, test_adapter());
        assert!(matches!(
            serializer.read().await,
            Err(MirrorError::UnsupportedFormat(_))
        ));
    }

    #[tokio::test]
    async fn empty_data_map_is_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        let mut bytes = br#"{"serialization":{"dataMapItem":true}}"#.to_vec();
        bytes.push(0);
        bytes.push(0);
        bytes.extend_from_slice(
            br#"{"serialization":{"type":"msgpack","dataMap":{"compression":"gzip","items":[]}}}"#,
        );
        std::fs::write(&path, bytes).unwrap();

        let serializer = DatabaseSerializer::new(&path, test_adapter());
        assert!(matches!(
            serializer.read().await,
            Err(MirrorError::IncompleteData(_))
        ));
    }

    #[tokio::test]
    async fn portion_for_unknown_login_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.bin");
        let adapter = test_adapter();

        let shape = FsDb::default();
        let mut portion = BTreeMap::new();
        let orphan = mail("m1", "inbox");
        let mut mails = BTreeMap::new();
        mails.insert("m1", &orphan);
        portion.insert("ghost@example.com", MailsPortionAccount { mails });

        let mut writer = ContainerWriter::create(&path, CompressionType::Gzip).await.unwrap();
        let item = serialize_data_map_item(&shape, adapter.as_ref(), CompressionType::Gzip, 6)
            .await
            .unwrap();
        writer.write_item(&item).await.unwrap();
        let item = serialize_data_map_item(&portion, adapter.as_ref(), CompressionType::Gzip, 6)
            .await
            .unwrap();
        writer.write_item(&item).await.unwrap();
        writer.finish().await.unwrap();

        let serializer = DatabaseSerializer::new(&path, adapter);
        assert!(matches!(
            serializer.read().await,
            Err(MirrorError::InvalidData(_))
        ));
    }

    #[tokio::test]
    async fn single_item_container() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("single.bin");
        let adapter = AesGcmEncryptionAdapter::new(&AesGcmEncryptionAdapter::generate_key()).unwrap();
        let mut value = BTreeMap::new();
        value.insert("k".to_string(), "v".to_string());

        write_single(&path, &adapter, &value, CompressionType::Zstd, 3)
            .await
            .unwrap();
        let loaded: BTreeMap<String, String> = read_single(&path, &adapter).await.unwrap();
        assert_eq!(loaded, value);
        // 临时文件已被重命名
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
