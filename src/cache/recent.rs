use parking_lot::Mutex;
use std::collections::VecDeque;

pub const DEFAULT_RECENT_CAPACITY: usize = 10;

/// 最近检索词：有界、去重、最新在前。
///
/// remove → push_front → truncate 必须在同一把锁内完成，否则并发 push
/// 会交错出重复项或错误的截断结果。
pub struct RecentList {
    inner: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl RecentList {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity + 1)),
            capacity,
        }
    }

    pub fn push_recent(&self, term: &str) {
        if term.trim().is_empty() {
            return;
        }
        let mut list = self.inner.lock();
        promote(&mut list, term);
        list.truncate(self.capacity);
    }

    /// 批量 push：按顺序逐个提升，最后统一截断一次（整体持锁）
    pub fn push_many<I, S>(&self, terms: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = self.inner.lock();
        for term in terms {
            let term = term.as_ref();
            if term.trim().is_empty() {
                continue;
            }
            promote(&mut list, term);
        }
        list.truncate(self.capacity);
    }

    pub fn range(&self, n: usize) -> Vec<String> {
        self.inner.lock().iter().take(n).cloned().collect()
    }

    pub fn size(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

impl Default for RecentList {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_RECENT_CAPACITY)
    }
}

fn promote(list: &mut VecDeque<String>, term: &str) {
    list.retain(|t| t != term);
    list.push_front(term.to_string());
}
