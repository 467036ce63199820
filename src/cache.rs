use std::num::NonZeroUsize;
use std::sync::Mutex;

use crate::Inode;

/// Memoizes decoded inodes. `add` reports whether the value was kept;
/// implementations bound their own memory, the filesystem assumes
/// nothing about eviction.
pub trait InodeCache: Send + Sync {
    fn add(&self, ino: u64, inode: &Inode) -> bool;
    fn get(&self, ino: u64) -> Option<Inode>;
}

/// Default cache: stores nothing.
#[derive(Debug, Default)]
pub struct NoopCache;

impl InodeCache for NoopCache {
    fn add(&self, _ino: u64, _inode: &Inode) -> bool {
        false
    }

    fn get(&self, _ino: u64) -> Option<Inode> {
        None
    }
}

/// Bounded LRU cache, safe to share under the same discipline as the
/// reader.
pub struct LruInodeCache {
    inner: Mutex<lru::LruCache<u64, Inode>>,
}

impl LruInodeCache {
    pub fn new(capacity: usize) -> LruInodeCache {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("clamped to at least one");
        LruInodeCache {
            inner: Mutex::new(lru::LruCache::new(capacity)),
        }
    }
}

impl InodeCache for LruInodeCache {
    fn add(&self, ino: u64, inode: &Inode) -> bool {
        match self.inner.lock() {
            Ok(mut cache) => {
                cache.put(ino, inode.clone());
                true
            }
            Err(_) => false,
        }
    }

    fn get(&self, ino: u64) -> Option<Inode> {
        match self.inner.lock() {
            Ok(mut cache) => cache.get(&ino).cloned(),
            Err(_) => None,
        }
    }
}
