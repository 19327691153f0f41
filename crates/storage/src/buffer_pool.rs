use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use graindb_catalog::catalog::TableId;
use graindb_catalog::tuple::Tuple;
use graindb_error::{errbuf, Error};
use log::{debug, trace};

use crate::catalog::Catalog;
use crate::lock::lock_manager::LockManager;
use crate::lock::LockMode;
use crate::page::{Page, PageId};
use crate::transaction::TransactionId;
use crate::Result;

/// Default number of pages a buffer pool caches.
pub const DEFAULT_POOL_SIZE: usize = 50;

/// Bounded page cache enforcing transaction isolation through page-granular
/// two-phase locking.
///
/// Every page access goes through the lock manager before any page state is
/// observed; commit writes all of a transaction's dirty pages to their stores
/// (FORCE) and abort discards them, and a dirty page is never evicted
/// (NO-STEAL), so the on-disk image only ever contains committed data.
pub struct BufferPool {
    capacity: usize,
    catalog: Arc<Catalog>,
    lock_mgr: LockManager,
    inner: Mutex<PoolInner>,
}

/// Cache map, LRU ordering and dirty bookkeeping; guarded by one monitor. A
/// thread holding this monitor may call into the lock manager, never the
/// reverse.
#[derive(Debug)]
struct PoolInner {
    cache: HashMap<PageId, Page>,
    /// Cached page ids, least-recently-used first.
    lru: VecDeque<PageId>,
}

impl PoolInner {
    /// Moves `pid` to the most-recently-used position.
    fn touch(&mut self, pid: PageId) {
        self.lru.retain(|&cached| cached != pid);
        self.lru.push_back(pid);
    }

    /// Installs `page`, replacing any cached image of the same id, and marks it
    /// most recently used.
    fn install(&mut self, page: Page) {
        let pid = page.pid();
        self.cache.insert(pid, page);
        self.touch(pid);
    }

    fn remove(&mut self, pid: PageId) -> Option<Page> {
        self.lru.retain(|&cached| cached != pid);
        self.cache.remove(&pid)
    }

    /// NO-STEAL eviction: drops the least-recently-used clean page. Dirty pages
    /// are never evicted; if every cached page is dirty the pool is stuck and
    /// the operation fails.
    fn evict_one(&mut self) -> Result<()> {
        let victim = self
            .lru
            .iter()
            .copied()
            .find(|pid| self.cache[pid].dirtied_by().is_none());
        match victim {
            Some(pid) => {
                self.remove(pid);
                trace!("evicted clean page {}", pid);
                Ok(())
            }
            None => errbuf!("buffer pool full of dirty pages"),
        }
    }
}

impl BufferPool {
    /// Creates a buffer pool that caches up to `num_pages` pages of the tables
    /// registered in `catalog`.
    pub fn new(num_pages: usize, catalog: Arc<Catalog>) -> Self {
        Self {
            capacity: num_pages,
            catalog,
            lock_mgr: LockManager::new(),
            inner: Mutex::new(PoolInner {
                cache: HashMap::new(),
                lru: VecDeque::new(),
            }),
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Retrieves the page `pid` on behalf of `tid` with the requested access
    /// mode.
    ///
    /// Blocks in the lock manager until the lock is granted; an unresolvable
    /// wait surfaces as [`Error::TransactionAborted`] and the caller must abort
    /// `tid`. On a cache miss the page is fetched from its store, evicting the
    /// least-recently-used clean page if the cache is at capacity. A fetch
    /// failure leaves the granted lock in place.
    pub fn get_page(&self, tid: TransactionId, pid: PageId, mode: LockMode) -> Result<Page> {
        if let Err(e) = self.lock_mgr.acquire(tid, pid, mode) {
            return Err(match e {
                Error::Deadlock => Error::TransactionAborted,
                other => other,
            });
        }

        {
            let mut inner = self.inner.lock()?;
            if let Some(page) = inner.cache.get(&pid).cloned() {
                inner.touch(pid);
                return Ok(page);
            }
        }

        // Cache miss: fetch from the store without holding the pool monitor.
        let store = self.catalog.store(pid.table_id())?;
        let page = store.read_page(&pid)?;

        let mut inner = self.inner.lock()?;
        if let Some(cached) = inner.cache.get(&pid).cloned() {
            // Another compatible-mode holder fetched it while we were reading.
            inner.touch(pid);
            return Ok(cached);
        }
        if inner.cache.len() >= self.capacity {
            inner.evict_one()?;
        }
        inner.install(page.clone());
        Ok(page)
    }

    /// Inserts `tuple` into `table_id` on behalf of `tid`.
    ///
    /// Slot-level work is delegated to the table's store, which takes exclusive
    /// locks on every page it touches; each affected page image is then marked
    /// dirty by `tid` and installed in the cache so later requests see it.
    pub fn insert_tuple(&self, tid: TransactionId, table_id: TableId, tuple: &Tuple) -> Result<()> {
        let store = self.catalog.store(table_id)?;
        let pages = store.insert_tuple(self, tid, tuple)?;
        self.install_dirty(tid, pages)
    }

    /// Deletes the tuple named by `tuple`'s record id on behalf of `tid`,
    /// symmetric to [`BufferPool::insert_tuple`].
    pub fn delete_tuple(&self, tid: TransactionId, tuple: &Tuple) -> Result<()> {
        let rid = tuple
            .rid()
            .ok_or_else(|| Error::InvalidInput("tuple has no record id".to_string()))?;
        let store = self.catalog.store(rid.table_id())?;
        let pages = store.delete_tuple(self, tid, tuple)?;
        self.install_dirty(tid, pages)
    }

    fn install_dirty(&self, tid: TransactionId, pages: Vec<Page>) -> Result<()> {
        let mut inner = self.inner.lock()?;
        for mut page in pages {
            page.mark_dirty(Some(tid));
            if !inner.cache.contains_key(&page.pid()) && inner.cache.len() >= self.capacity {
                inner.evict_one()?;
            }
            trace!("installed dirty page {} for {}", page.pid(), tid);
            inner.install(page);
        }
        Ok(())
    }

    /// Commits (`commit = true`) or aborts `tid`, then releases all of its
    /// locks.
    ///
    /// Commit writes every page dirtied by `tid` to its store and clears the
    /// dirty markers; abort drops those pages from the cache so the next read
    /// refetches the clean on-disk image. Lock release strictly follows the
    /// durability action.
    pub fn transaction_complete(&self, tid: TransactionId, commit: bool) -> Result<()> {
        if commit {
            self.flush_pages(tid)?;
        } else {
            self.discard_pages(tid)?;
        }
        self.lock_mgr.release_all(tid);
        Ok(())
    }

    /// Commits `tid`: [`BufferPool::transaction_complete`] with `commit = true`.
    pub fn commit(&self, tid: TransactionId) -> Result<()> {
        self.transaction_complete(tid, true)
    }

    /// Aborts `tid`: [`BufferPool::transaction_complete`] with `commit = false`.
    pub fn abort(&self, tid: TransactionId) -> Result<()> {
        self.transaction_complete(tid, false)
    }

    /// Writes every page dirtied by `tid` to its store and clears the markers.
    /// A write failure propagates with the failed page still dirty in cache.
    pub fn flush_pages(&self, tid: TransactionId) -> Result<()> {
        let mut inner = self.inner.lock()?;
        let dirty: Vec<PageId> = inner
            .cache
            .values()
            .filter(|page| page.dirtied_by() == Some(tid))
            .map(|page| page.pid())
            .collect();
        for pid in dirty {
            let store = self.catalog.store(pid.table_id())?;
            if let Some(page) = inner.cache.get(&pid) {
                store.write_page(page)?;
            }
            if let Some(page) = inner.cache.get_mut(&pid) {
                page.mark_dirty(None);
            }
            debug!("flushed page {} for {}", pid, tid);
        }
        Ok(())
    }

    /// Drops every page dirtied by `tid` from the cache; the next read of each
    /// refetches the pre-mutation on-disk image.
    fn discard_pages(&self, tid: TransactionId) -> Result<()> {
        let mut inner = self.inner.lock()?;
        let doomed: Vec<PageId> = inner
            .cache
            .values()
            .filter(|page| page.dirtied_by() == Some(tid))
            .map(|page| page.pid())
            .collect();
        for pid in doomed {
            inner.remove(pid);
            debug!("discarded page {} dirtied by {}", pid, tid);
        }
        Ok(())
    }

    /// Flushes one cached page if it is dirty. Fails if the page is not cached.
    pub fn flush_page(&self, pid: PageId) -> Result<()> {
        let mut inner = self.inner.lock()?;
        let dirty = match inner.cache.get(&pid) {
            None => return errbuf!("page {} not in buffer pool", pid),
            Some(page) => page.dirtied_by().is_some(),
        };
        if dirty {
            let store = self.catalog.store(pid.table_id())?;
            if let Some(page) = inner.cache.get(&pid) {
                store.write_page(page)?;
            }
            if let Some(page) = inner.cache.get_mut(&pid) {
                page.mark_dirty(None);
            }
        }
        Ok(())
    }

    /// Flushes every dirty page in the cache. This writes uncommitted data to
    /// disk and therefore breaks NO-STEAL isolation; recovery and tooling only.
    ///
    /// The pool monitor is held for the whole sweep, so pages cannot be
    /// discarded or evicted between the scan and their flush.
    pub fn flush_all_pages(&self) -> Result<()> {
        let mut inner = self.inner.lock()?;
        let dirty: Vec<PageId> = inner
            .cache
            .values()
            .filter(|page| page.dirtied_by().is_some())
            .map(|page| page.pid())
            .collect();
        for pid in dirty {
            let store = self.catalog.store(pid.table_id())?;
            if let Some(page) = inner.cache.get(&pid) {
                store.write_page(page)?;
            }
            if let Some(page) = inner.cache.get_mut(&pid) {
                page.mark_dirty(None);
            }
            debug!("flushed page {}", pid);
        }
        Ok(())
    }

    /// Drops one page from the cache without writing it, whatever its dirty
    /// state. Recovery hook for rolled-back pages.
    pub fn discard_page(&self, pid: PageId) -> Result<()> {
        let mut inner = self.inner.lock()?;
        inner.remove(pid);
        Ok(())
    }

    /// Releases the lock `tid` holds on `pid` without completing the
    /// transaction. This forfeits two-phase locking for that page; callers must
    /// know the page was never read or written on `tid`'s behalf.
    pub fn release_page(&self, tid: TransactionId, pid: PageId) {
        self.lock_mgr.release(tid, pid);
    }

    /// Whether `tid` holds a lock on `pid`.
    pub fn holds(&self, tid: TransactionId, pid: PageId) -> bool {
        self.lock_mgr.holds(tid, pid)
    }
}
