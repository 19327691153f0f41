use core::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::BytesMut;

use crate::transaction::TransactionId;
use crate::typedef::{PageNo, TableId};

pub mod heap_page;

/// Default number of bytes per page, including the page header.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

static PAGE_SIZE: AtomicUsize = AtomicUsize::new(DEFAULT_PAGE_SIZE);

/// Returns the process-wide page size in bytes.
pub fn page_size() -> usize {
    PAGE_SIZE.load(Ordering::Acquire)
}

/// Overrides the process-wide page size. This should be used for testing only,
/// and must happen before any page-store I/O.
pub fn set_page_size(bytes: usize) {
    PAGE_SIZE.store(bytes, Ordering::Release);
}

/// Restores the default page size. This should be used for testing only.
pub fn reset_page_size() {
    PAGE_SIZE.store(DEFAULT_PAGE_SIZE, Ordering::Release);
}

/// Identifies one fixed-size page of a table. Equality and hashing cover both
/// the table id and the page number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PageId {
    table_id: TableId,
    page_no: PageNo,
}

impl PageId {
    pub fn new(table_id: TableId, page_no: PageNo) -> Self {
        Self { table_id, page_no }
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn page_no(&self) -> PageNo {
        self.page_no
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table_id, self.page_no)
    }
}

/// In-memory image of one on-disk page.
///
/// The storage core treats the contents as an opaque blob; the only metadata it
/// maintains is the dirty marker naming the transaction whose uncommitted
/// mutations the image carries, if any.
#[derive(Clone, Debug)]
pub struct Page {
    pid: PageId,
    data: BytesMut,
    dirty: Option<TransactionId>,
}

impl Page {
    /// Creates a zeroed page image of the process-wide page size.
    pub fn new(pid: PageId) -> Self {
        Self {
            pid,
            data: BytesMut::zeroed(page_size()),
            dirty: None,
        }
    }

    /// Creates a page image from raw bytes, padded or truncated to the
    /// process-wide page size.
    pub fn from_bytes(pid: PageId, bytes: &[u8]) -> Self {
        let mut page = Self::new(pid);
        let len = bytes.len().min(page.data.len());
        page.data[..len].copy_from_slice(&bytes[..len]);
        page
    }

    pub fn pid(&self) -> PageId {
        self.pid
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Stamps or clears the dirty marker. `Some(tid)` records that `tid`'s
    /// uncommitted mutations live in this image; `None` marks it clean.
    pub fn mark_dirty(&mut self, tid: Option<TransactionId>) {
        self.dirty = tid;
    }

    /// The transaction that dirtied this page since its last clean state.
    pub fn dirtied_by(&self) -> Option<TransactionId> {
        self.dirty
    }
}
