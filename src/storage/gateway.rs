use std::future::Future;

use thiserror::Error;

use crate::core::KeywordRecord;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("storage corrupted: {0}")]
    Corrupted(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// durable 存储的批量读写契约（Reconciler 是唯一写者）。
///
/// ## 契约
/// - `find_by_terms` 必须实现为一次批量查询，返回顺序不作要求，缺失的 term 直接省略。
/// - `upsert_all` 按 `term` 整行覆盖；要么全部生效要么全部不生效。
/// - 排序查询在同值时按 term 升序，保证结果确定。
pub trait PersistenceGateway: Send + Sync + 'static {
    fn find_top_n_by_count_desc(
        &self,
        n: usize,
    ) -> impl Future<Output = Result<Vec<KeywordRecord>, StorageError>> + Send;

    fn find_top_n_by_last_seen_desc(
        &self,
        n: usize,
    ) -> impl Future<Output = Result<Vec<KeywordRecord>, StorageError>> + Send;

    fn find_by_terms(
        &self,
        terms: &[String],
    ) -> impl Future<Output = Result<Vec<KeywordRecord>, StorageError>> + Send;

    /// 前缀匹配，按 count 降序
    fn find_by_prefix(
        &self,
        prefix: &str,
        n: usize,
    ) -> impl Future<Output = Result<Vec<KeywordRecord>, StorageError>> + Send;

    fn upsert_all(
        &self,
        records: Vec<KeywordRecord>,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    fn count_all(&self) -> impl Future<Output = Result<u64, StorageError>> + Send;

    fn delete_all(&self) -> impl Future<Output = Result<(), StorageError>> + Send;
}

/// count 降序 + term 升序
pub(crate) fn sort_by_count_desc(records: &mut [KeywordRecord]) {
    records.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.term.cmp(&b.term)));
}

/// last_seen 降序（缺失视为最旧）+ term 升序
pub(crate) fn sort_by_last_seen_desc(records: &mut [KeywordRecord]) {
    records.sort_by(|a, b| {
        b.last_seen_at
            .cmp(&a.last_seen_at)
            .then_with(|| a.term.cmp(&b.term))
    });
}
