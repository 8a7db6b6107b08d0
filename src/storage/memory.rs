use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::core::KeywordRecord;
use crate::storage::gateway::{
    sort_by_count_desc, sort_by_last_seen_desc, PersistenceGateway, StorageError,
};

/// 内存 durable 表：用于测试与 `memory_only` 运行模式。
///
/// 支持故障注入（读/写分别开关），用来覆盖 resync 的失败路径。
#[derive(Default)]
pub struct MemoryGateway {
    rows: RwLock<HashMap<String, KeywordRecord>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    upsert_calls: AtomicU64,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<KeywordRecord>) -> Self {
        let gw = Self::new();
        {
            let mut rows = gw.rows.write();
            for r in records {
                rows.insert(r.term.clone(), r);
            }
        }
        gw
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// 成功的 upsert_all 次数
    pub fn upsert_calls(&self) -> u64 {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    pub fn get(&self, term: &str) -> Option<KeywordRecord> {
        self.rows.read().get(term).cloned()
    }

    fn check_read(&self) -> Result<(), StorageError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("injected read failure".into()));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("injected write failure".into()));
        }
        Ok(())
    }

    fn collect_sorted(
        &self,
        filter: impl Fn(&KeywordRecord) -> bool,
        sort: fn(&mut [KeywordRecord]),
        n: usize,
    ) -> Vec<KeywordRecord> {
        let mut out: Vec<KeywordRecord> =
            self.rows.read().values().filter(|r| filter(r)).cloned().collect();
        sort(&mut out);
        out.truncate(n);
        out
    }
}

impl PersistenceGateway for MemoryGateway {
    async fn find_top_n_by_count_desc(&self, n: usize) -> Result<Vec<KeywordRecord>, StorageError> {
        self.check_read()?;
        Ok(self.collect_sorted(|_| true, sort_by_count_desc, n))
    }

    async fn find_top_n_by_last_seen_desc(
        &self,
        n: usize,
    ) -> Result<Vec<KeywordRecord>, StorageError> {
        self.check_read()?;
        Ok(self.collect_sorted(|_| true, sort_by_last_seen_desc, n))
    }

    async fn find_by_terms(&self, terms: &[String]) -> Result<Vec<KeywordRecord>, StorageError> {
        self.check_read()?;
        let rows = self.rows.read();
        Ok(terms.iter().filter_map(|t| rows.get(t).cloned()).collect())
    }

    async fn find_by_prefix(
        &self,
        prefix: &str,
        n: usize,
    ) -> Result<Vec<KeywordRecord>, StorageError> {
        self.check_read()?;
        Ok(self.collect_sorted(|r| r.term.starts_with(prefix), sort_by_count_desc, n))
    }

    async fn upsert_all(&self, records: Vec<KeywordRecord>) -> Result<(), StorageError> {
        self.check_write()?;
        let mut rows = self.rows.write();
        for r in records {
            rows.insert(r.term.clone(), r);
        }
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn count_all(&self) -> Result<u64, StorageError> {
        self.check_read()?;
        Ok(self.rows.read().len() as u64)
    }

    async fn delete_all(&self) -> Result<(), StorageError> {
        self.check_write()?;
        self.rows.write().clear();
        Ok(())
    }
}
