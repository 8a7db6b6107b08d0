use parking_lot::Mutex;
use std::collections::HashSet;

/// 自上次 dirty resync 以来被修改过的 term。
///
/// `drain_all` 在锁内把整个集合换成空集：与之竞争的 mark 要么先于交换
/// 进入旧集合（被本轮带走），要么落进新集合（留给下一轮），不会丢失。
#[derive(Default)]
pub struct DirtyKeySet {
    keys: Mutex<HashSet<String>>,
}

impl DirtyKeySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self, term: &str) {
        if term.trim().is_empty() {
            return;
        }
        let mut keys = self.keys.lock();
        if !keys.contains(term) {
            keys.insert(term.to_string());
        }
    }

    pub fn mark_all<I, S>(&self, terms: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut keys = self.keys.lock();
        for term in terms {
            let term = term.as_ref();
            if !term.trim().is_empty() && !keys.contains(term) {
                keys.insert(term.to_string());
            }
        }
    }

    pub fn drain_all(&self) -> HashSet<String> {
        std::mem::take(&mut *self.keys.lock())
    }

    pub fn contains(&self, term: &str) -> bool {
        self.keys.lock().contains(term)
    }

    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn mark_is_idempotent_and_drain_empties() {
        let dirty = DirtyKeySet::new();
        dirty.mark("a");
        dirty.mark("a");
        dirty.mark_all(["b", "c", "a", " "]);
        assert_eq!(dirty.len(), 3);

        let drained = dirty.drain_all();
        assert_eq!(drained.len(), 3);
        assert!(drained.contains("b"));
        assert!(dirty.is_empty());
        assert!(dirty.drain_all().is_empty());
    }

    #[test]
    fn marks_racing_drains_are_never_lost() {
        let dirty = DirtyKeySet::new();
        let done = AtomicBool::new(false);
        let total = 20_000;

        let collected = std::thread::scope(|s| {
            let writer = s.spawn(|| {
                for i in 0..total {
                    dirty.mark(&format!("k{}", i));
                }
                done.store(true, Ordering::Release);
            });
            let drainer = s.spawn(|| {
                let mut seen = HashSet::new();
                while !done.load(Ordering::Acquire) {
                    seen.extend(dirty.drain_all());
                }
                seen
            });
            writer.join().unwrap();
            let mut seen = drainer.join().unwrap();
            seen.extend(dirty.drain_all());
            seen
        });

        assert_eq!(collected.len(), total);
    }
}
