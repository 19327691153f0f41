use std::collections::{HashMap, HashSet};
use std::sync::{Condvar, Mutex};

use graindb_error::Error;
use log::{debug, trace};

use crate::lock::LockMode;
use crate::page::PageId;
use crate::transaction::TransactionId;
use crate::Result;

/// Page-granular shared/exclusive lock table with waits-for deadlock detection.
///
/// The lock table, the per-transaction page index, and the waits-for graph all
/// live behind one monitor; blocked acquirers sleep on the condition variable
/// and every release wakes them all, after which each re-validates its grant
/// preconditions. Which of several eligible waiters wins after a release is
/// scheduler-dependent.
pub struct LockManager {
    state: Mutex<LockTable>,
    waiters: Condvar,
}

#[derive(Default)]
struct LockTable {
    /// Every lock currently held on each page, by holder.
    page_locks: HashMap<PageId, HashMap<TransactionId, LockMode>>,
    /// Every page each transaction holds a lock on.
    txn_pages: HashMap<TransactionId, HashSet<PageId>>,
    /// Waiter -> the holders it is currently blocked on.
    waits_for: HashMap<TransactionId, HashSet<TransactionId>>,
}

enum Grant {
    Granted,
    Blocked(Vec<TransactionId>),
}

impl LockTable {
    /// Attempts to grant `mode` on `pid` to `tid`.
    ///
    /// A request conflicts with any lock held by a different transaction when
    /// either side is exclusive. Re-entrant requests never conflict: a holder of
    /// an exclusive lock is granted anything, a shared holder is granted another
    /// shared lock, and a shared holder requesting exclusive is upgraded once it
    /// is the sole holder. On conflict, returns every holder blocking the
    /// request (for an upgrade, every other shared holder).
    fn try_grant(&mut self, tid: TransactionId, pid: PageId, mode: LockMode) -> Grant {
        let blockers: Vec<TransactionId> = self
            .page_locks
            .get(&pid)
            .map(|holders| {
                holders
                    .iter()
                    .filter(|&(&holder, &held)| {
                        holder != tid
                            && (mode == LockMode::Exclusive || held == LockMode::Exclusive)
                    })
                    .map(|(&holder, _)| holder)
                    .collect()
            })
            .unwrap_or_default();

        if !blockers.is_empty() {
            return Grant::Blocked(blockers);
        }

        let held = self.page_locks.get(&pid).and_then(|h| h.get(&tid)).copied();
        match (held, mode) {
            // An exclusive holder already covers any request; a shared holder
            // covers another shared request.
            (Some(LockMode::Exclusive), _) | (Some(LockMode::Shared), LockMode::Shared) => {}
            // Fresh grant, or sole-holder upgrade from shared to exclusive.
            _ => {
                self.page_locks.entry(pid).or_default().insert(tid, mode);
                self.txn_pages.entry(tid).or_default().insert(pid);
            }
        }
        Grant::Granted
    }

    /// Removes whatever lock `tid` holds on `pid`, pruning empty entries.
    fn release(&mut self, tid: TransactionId, pid: PageId) {
        if let Some(holders) = self.page_locks.get_mut(&pid) {
            holders.remove(&tid);
            if holders.is_empty() {
                self.page_locks.remove(&pid);
            }
        }
        if let Some(pages) = self.txn_pages.get_mut(&tid) {
            pages.remove(&pid);
            if pages.is_empty() {
                self.txn_pages.remove(&tid);
            }
        }
    }

    fn add_wait_edges(&mut self, tid: TransactionId, holders: &[TransactionId]) {
        let edges = self.waits_for.entry(tid).or_default();
        for &holder in holders {
            edges.insert(holder);
        }
    }

    fn clear_wait_edges(&mut self, tid: TransactionId) {
        self.waits_for.remove(&tid);
    }

    /// DFS over outgoing waits-for edges; revisiting a node on the current path
    /// is a cycle.
    fn has_cycle_from(&self, start: TransactionId) -> bool {
        let mut visited = HashSet::new();
        let mut path = HashSet::new();
        self.dfs(start, &mut visited, &mut path)
    }

    fn dfs(
        &self,
        node: TransactionId,
        visited: &mut HashSet<TransactionId>,
        path: &mut HashSet<TransactionId>,
    ) -> bool {
        if path.contains(&node) {
            return true;
        }
        if !visited.insert(node) {
            return false;
        }
        path.insert(node);
        for &next in self.waits_for.get(&node).into_iter().flatten() {
            if self.dfs(next, visited, path) {
                return true;
            }
        }
        path.remove(&node);
        false
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LockTable::default()),
            waiters: Condvar::new(),
        }
    }

    /// Blocks until `tid` holds a lock of at least `mode` on `pid`, or fails
    /// with [`Error::Deadlock`] when waiting would close a cycle in the
    /// waits-for graph. A deadlocked acquire leaves no residual state; the
    /// caller must abort `tid`.
    pub fn acquire(&self, tid: TransactionId, pid: PageId, mode: LockMode) -> Result<()> {
        let mut state = self.state.lock()?;
        loop {
            match state.try_grant(tid, pid, mode) {
                Grant::Granted => {
                    trace!("{} acquired {:?} on page {}", tid, mode, pid);
                    return Ok(());
                }
                Grant::Blocked(holders) => {
                    state.add_wait_edges(tid, &holders);
                    if state.has_cycle_from(tid) {
                        state.clear_wait_edges(tid);
                        debug!("{} deadlocked requesting {:?} on page {}", tid, mode, pid);
                        return Err(Error::Deadlock);
                    }
                    trace!("{} waiting for {:?} on page {}", tid, mode, pid);
                    state = self.waiters.wait(state)?;
                    state.clear_wait_edges(tid);
                }
            }
        }
    }

    /// Releases any lock `tid` holds on `pid` and wakes all waiters. Releasing
    /// a lock that is not held is a no-op.
    pub fn release(&self, tid: TransactionId, pid: PageId) {
        let mut state = self.state.lock().unwrap();
        state.release(tid, pid);
        self.waiters.notify_all();
    }

    /// Releases every lock `tid` holds and wakes all waiters. This is the
    /// strict two-phase-locking release point, called once commit or abort has
    /// finished its durability work.
    pub fn release_all(&self, tid: TransactionId) {
        let mut state = self.state.lock().unwrap();
        if let Some(pages) = state.txn_pages.remove(&tid) {
            for pid in pages {
                if let Some(holders) = state.page_locks.get_mut(&pid) {
                    holders.remove(&tid);
                    if holders.is_empty() {
                        state.page_locks.remove(&pid);
                    }
                }
            }
        }
        state.clear_wait_edges(tid);
        debug!("released all locks held by {}", tid);
        self.waiters.notify_all();
    }

    /// Whether `tid` currently holds a lock on `pid`.
    pub fn holds(&self, tid: TransactionId, pid: PageId) -> bool {
        self.held_mode(tid, pid).is_some()
    }

    /// The mode of the lock `tid` holds on `pid`, if any.
    pub fn held_mode(&self, tid: TransactionId, pid: PageId) -> Option<LockMode> {
        let state = self.state.lock().unwrap();
        state.page_locks.get(&pid).and_then(|h| h.get(&tid)).copied()
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}
