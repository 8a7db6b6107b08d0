use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::core::KeywordRecord;
use crate::storage::gateway::{
    sort_by_count_desc, sort_by_last_seen_desc, PersistenceGateway, StorageError,
};

/// 表文件 Header
const MAGIC: u32 = 0x5352_4B01;
const VERSION_CURRENT: u32 = 1;
const STATE_COMMITTED: u32 = 0x0000_0001;
const STATE_INCOMPLETE: u32 = 0xFFFF_FFFF;
const HEADER_SIZE: usize = 4 + 4 + 4 + 4 + 4; // magic + version + state + data_len + checksum

#[derive(Serialize, Deserialize, Default)]
struct TableBody {
    rows: Vec<KeywordRecord>,
}

/// 文件型 durable 表：整表常驻内存，每次写入以原子替换的方式落盘。
///
/// 落盘流程：
/// 1) 写 keywords.db.tmp 的 INCOMPLETE header（len/checksum 先置 0）
/// 2) `bincode::serialize_into(file)` 流式写 body，边写边算 checksum / data_len
/// 3) seek 回开头覆盖 COMMITTED header
/// 4) fsync(tmpfile)
/// 5) rename(tmp, target)：原子替换
/// 6) fsync(dir)
///
/// 写入失败时内存中的行保持不变（先落盘，后提交内存）。
pub struct FileGateway {
    path: PathBuf,
    rows: Mutex<HashMap<String, KeywordRecord>>,
}

impl FileGateway {
    /// 打开（或新建）表文件。损坏的文件被改名为 `*.corrupt` 保留现场，然后以空表启动。
    pub async fn open(path: PathBuf) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let rows = match load_if_valid(&path).await {
            Ok(Some(body)) => {
                tracing::info!("Loaded keyword table: {} rows from {:?}", body.rows.len(), path);
                body.rows.into_iter().map(|r| (r.term.clone(), r)).collect()
            }
            Ok(None) => {
                tracing::info!("No keyword table at {:?}, starting empty", path);
                HashMap::new()
            }
            Err(StorageError::Corrupted(reason)) => {
                let aside = path.with_extension("db.corrupt");
                tracing::warn!(
                    "Keyword table corrupted ({}), moving it to {:?} and starting empty",
                    reason,
                    aside
                );
                tokio::fs::rename(&path, &aside).await?;
                HashMap::new()
            }
            Err(e) => return Err(e),
        };

        Ok(Self {
            path,
            rows: Mutex::new(rows),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn commit(&self, next: HashMap<String, KeywordRecord>) -> Result<(), StorageError> {
        let path = self.path.clone();
        let body = TableBody {
            rows: next.values().cloned().collect(),
        };
        tokio::task::spawn_blocking(move || write_atomic(&path, &body))
            .await
            .map_err(|e| StorageError::Unavailable(format!("table writer panicked: {}", e)))??;
        Ok(())
    }

    async fn query(
        &self,
        filter: impl Fn(&KeywordRecord) -> bool,
        sort: fn(&mut [KeywordRecord]),
        n: usize,
    ) -> Vec<KeywordRecord> {
        let rows = self.rows.lock().await;
        let mut out: Vec<KeywordRecord> = rows.values().filter(|r| filter(r)).cloned().collect();
        drop(rows);
        sort(&mut out);
        out.truncate(n);
        out
    }
}

impl PersistenceGateway for FileGateway {
    async fn find_top_n_by_count_desc(&self, n: usize) -> Result<Vec<KeywordRecord>, StorageError> {
        Ok(self.query(|_| true, sort_by_count_desc, n).await)
    }

    async fn find_top_n_by_last_seen_desc(
        &self,
        n: usize,
    ) -> Result<Vec<KeywordRecord>, StorageError> {
        Ok(self.query(|_| true, sort_by_last_seen_desc, n).await)
    }

    async fn find_by_terms(&self, terms: &[String]) -> Result<Vec<KeywordRecord>, StorageError> {
        let rows = self.rows.lock().await;
        Ok(terms.iter().filter_map(|t| rows.get(t).cloned()).collect())
    }

    async fn find_by_prefix(
        &self,
        prefix: &str,
        n: usize,
    ) -> Result<Vec<KeywordRecord>, StorageError> {
        Ok(self
            .query(|r| r.term.starts_with(prefix), sort_by_count_desc, n)
            .await)
    }

    async fn upsert_all(&self, records: Vec<KeywordRecord>) -> Result<(), StorageError> {
        if records.is_empty() {
            return Ok(());
        }
        // 持锁贯穿落盘：写者串行，读者看不到半提交状态
        let mut rows = self.rows.lock().await;
        let mut next = rows.clone();
        for r in records {
            next.insert(r.term.clone(), r);
        }
        self.commit(next.clone()).await?;
        *rows = next;
        Ok(())
    }

    async fn count_all(&self) -> Result<u64, StorageError> {
        Ok(self.rows.lock().await.len() as u64)
    }

    async fn delete_all(&self) -> Result<(), StorageError> {
        let mut rows = self.rows.lock().await;
        self.commit(HashMap::new()).await?;
        rows.clear();
        Ok(())
    }
}

struct SimpleChecksum {
    hash: u32,
    pending: [u8; 4],
    pending_len: usize,
}

impl SimpleChecksum {
    fn new() -> Self {
        Self {
            hash: 0,
            pending: [0u8; 4],
            pending_len: 0,
        }
    }

    fn update(&mut self, mut data: &[u8]) {
        if self.pending_len > 0 {
            let take = (4 - self.pending_len).min(data.len());
            self.pending[self.pending_len..self.pending_len + take].copy_from_slice(&data[..take]);
            self.pending_len += take;
            data = &data[take..];
            if self.pending_len == 4 {
                self.process_chunk(self.pending);
                self.pending_len = 0;
            }
        }

        let mut chunks = data.chunks_exact(4);
        for chunk in &mut chunks {
            self.process_chunk([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        let rest = chunks.remainder();
        if !rest.is_empty() {
            self.pending[..rest.len()].copy_from_slice(rest);
            self.pending_len = rest.len();
        }
    }

    fn finalize(mut self) -> u32 {
        if self.pending_len > 0 {
            let mut buf = [0u8; 4];
            buf[..self.pending_len].copy_from_slice(&self.pending[..self.pending_len]);
            self.process_chunk(buf);
        }
        self.hash
    }

    fn process_chunk(&mut self, chunk: [u8; 4]) {
        self.hash = self.hash.wrapping_add(u32::from_le_bytes(chunk));
        self.hash = self.hash.rotate_left(7);
    }
}

struct ChecksumWriter<'a, W: Write> {
    inner: &'a mut W,
    checksum: SimpleChecksum,
    bytes: u64,
}

impl<'a, W: Write> ChecksumWriter<'a, W> {
    fn new(inner: &'a mut W) -> Self {
        Self {
            inner,
            checksum: SimpleChecksum::new(),
            bytes: 0,
        }
    }

    fn finish(self) -> (u64, u32) {
        (self.bytes, self.checksum.finalize())
    }
}

impl<'a, W: Write> Write for ChecksumWriter<'a, W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.checksum.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

fn encode_header(state: u32, data_len: u32, checksum: u32) -> [u8; HEADER_SIZE] {
    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(&MAGIC.to_le_bytes());
    header[4..8].copy_from_slice(&VERSION_CURRENT.to_le_bytes());
    header[8..12].copy_from_slice(&state.to_le_bytes());
    header[12..16].copy_from_slice(&data_len.to_le_bytes());
    header[16..20].copy_from_slice(&checksum.to_le_bytes());
    header
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&data[at..at + 4]);
    u32::from_le_bytes(b)
}

/// 不存在返回 Ok(None)；header/长度/校验任何不一致都报 Corrupted
async fn load_if_valid(path: &Path) -> Result<Option<TableBody>, StorageError> {
    if !tokio::fs::try_exists(path).await? {
        return Ok(None);
    }

    let data = tokio::fs::read(path).await?;
    if data.len() < HEADER_SIZE {
        return Err(StorageError::Corrupted("table file too small".into()));
    }

    let magic = read_u32(&data, 0);
    let version = read_u32(&data, 4);
    let state = read_u32(&data, 8);
    let data_len = read_u32(&data, 12) as usize;
    let stored_checksum = read_u32(&data, 16);

    if magic != MAGIC {
        return Err(StorageError::Corrupted(format!(
            "magic mismatch: {:#x} != {:#x}",
            magic, MAGIC
        )));
    }
    if version != VERSION_CURRENT {
        return Err(StorageError::Corrupted(format!(
            "unsupported version {}",
            version
        )));
    }
    if state != STATE_COMMITTED {
        return Err(StorageError::Corrupted("state INCOMPLETE".into()));
    }

    let body = &data[HEADER_SIZE..];
    if body.len() != data_len {
        return Err(StorageError::Corrupted("data length mismatch".into()));
    }

    let mut c = SimpleChecksum::new();
    c.update(body);
    let computed = c.finalize();
    if computed != stored_checksum {
        return Err(StorageError::Corrupted(format!(
            "checksum mismatch: {} != {}",
            computed, stored_checksum
        )));
    }

    let table: TableBody = bincode::deserialize(body)?;
    Ok(Some(table))
}

fn write_atomic(path: &Path, body: &TableBody) -> Result<(), StorageError> {
    let tmp_path = path.with_extension("db.tmp");

    let mut file = std::fs::File::create(&tmp_path)?;
    file.write_all(&encode_header(STATE_INCOMPLETE, 0, 0))?;

    let (data_len_u64, checksum) = {
        let mut cw = ChecksumWriter::new(&mut file);
        bincode::serialize_into(&mut cw, body)?;
        cw.finish()
    };

    let data_len: u32 = data_len_u64.try_into().map_err(|_| {
        StorageError::Unavailable(format!("keyword table too large (>{} bytes)", u32::MAX))
    })?;

    file.seek(SeekFrom::Start(0))?;
    file.write_all(&encode_header(STATE_COMMITTED, data_len, checksum))?;
    file.sync_all()?;

    std::fs::rename(&tmp_path, path)?;

    if let Some(parent) = path.parent() {
        if let Ok(dir) = std::fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }

    tracing::debug!(
        "Keyword table written: {} rows, {} bytes",
        body.rows.len(),
        HEADER_SIZE + data_len as usize
    );
    Ok(())
}
