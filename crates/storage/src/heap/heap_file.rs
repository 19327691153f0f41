use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fs2::FileExt;
use graindb_catalog::tuple::Tuple;
use graindb_error::{errinput, Error};
use log::trace;

use crate::buffer_pool::BufferPool;
use crate::catalog::PageStore;
use crate::lock::LockMode;
use crate::page::heap_page::HeapPage;
use crate::page::{page_size, Page, PageId};
use crate::transaction::TransactionId;
use crate::typedef::{PageNo, TableId};
use crate::Result;

/// A heap table backed by one file of fixed-size pages concatenated in page
/// order: page `k` occupies the byte range `[k * page_size, (k + 1) * page_size)`.
///
/// The file is locked exclusively for the lifetime of the handle, so no other
/// process can mutate it underneath the buffer pool.
pub struct HeapFile {
    table_id: TableId,
    path: PathBuf,
    file: Mutex<File>,
}

impl HeapFile {
    /// Creates the backing file for a new, empty table, truncating any previous
    /// contents.
    pub fn create(path: impl AsRef<Path>, table_id: TableId) -> Result<Self> {
        Self::open_with(path, table_id, true)
    }

    /// Opens the backing file of an existing table.
    pub fn open(path: impl AsRef<Path>, table_id: TableId) -> Result<Self> {
        Self::open_with(path, table_id, false)
    }

    fn open_with(path: impl AsRef<Path>, table_id: TableId, truncate: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(truncate)
            .open(&path)
            .map_err(|e| Error::IO(format!("Unable to open file {}: {}", path.display(), e)))?;

        // Acquire an exclusive lock on the file at creation.
        file.lock_exclusive()
            .map_err(|e| Error::IO(format!("Failed to acquire exclusive file lock: {}", e)))?;

        Ok(Self {
            table_id,
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one zeroed page to the file, returning its id.
    pub fn allocate_page(&self) -> Result<PageId> {
        let file = self.file.lock()?;
        let psize = page_size() as u64;
        let pages = file.metadata()?.len().div_ceil(psize);
        file.set_len((pages + 1) * psize)?;
        trace!("table {} grew to {} pages", self.table_id, pages + 1);
        Ok(PageId::new(self.table_id, pages as PageNo))
    }
}

impl PageStore for HeapFile {
    fn table_id(&self) -> TableId {
        self.table_id
    }

    fn read_page(&self, pid: &PageId) -> Result<Page> {
        let mut file = self.file.lock()?;
        let psize = page_size() as u64;
        let pages = file.metadata()?.len().div_ceil(psize);
        if pid.table_id() != self.table_id || pid.page_no() as u64 >= pages {
            return errinput!("page {} out of range for table {}", pid, self.table_id);
        }

        file.seek(SeekFrom::Start(pid.page_no() as u64 * psize))?;
        let mut buf = vec![0u8; psize as usize];
        file.read_exact(&mut buf)?;
        Ok(Page::from_bytes(*pid, &buf))
    }

    fn write_page(&self, page: &Page) -> Result<()> {
        let pid = page.pid();
        if pid.table_id() != self.table_id {
            return errinput!("page {} does not belong to table {}", pid, self.table_id);
        }

        let mut file = self.file.lock()?;
        file.seek(SeekFrom::Start(pid.page_no() as u64 * page_size() as u64))?;
        file.write_all(page.data())?;
        file.sync_all()?;
        Ok(())
    }

    fn num_pages(&self) -> Result<usize> {
        let file = self.file.lock()?;
        let len = file.metadata()?.len();
        Ok(len.div_ceil(page_size() as u64) as usize)
    }

    /// Scans the table's pages for one with room, under an exclusive lock per
    /// visited page, appending a fresh page when every existing one is full.
    fn insert_tuple(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        tuple: &Tuple,
    ) -> Result<Vec<Page>> {
        for page_no in 0..self.num_pages()? {
            let pid = PageId::new(self.table_id, page_no as PageNo);
            let mut page = pool.get_page(tid, pid, LockMode::Exclusive)?;
            match HeapPage::from(&mut page).insert_tuple(tuple) {
                Ok(_) => return Ok(vec![page]),
                Err(Error::OutOfBounds) => continue,
                Err(e) => return Err(e),
            }
        }

        let pid = self.allocate_page()?;
        let mut page = pool.get_page(tid, pid, LockMode::Exclusive)?;
        HeapPage::from(&mut page).insert_tuple(tuple)?;
        Ok(vec![page])
    }

    fn delete_tuple(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        tuple: &Tuple,
    ) -> Result<Vec<Page>> {
        let rid = tuple
            .rid()
            .ok_or_else(|| Error::InvalidInput("tuple has no record id".to_string()))?;
        if rid.table_id() != self.table_id {
            return errinput!("record {} does not belong to table {}", rid, self.table_id);
        }

        let pid = PageId::new(rid.table_id(), rid.page_no());
        let mut page = pool.get_page(tid, pid, LockMode::Exclusive)?;
        HeapPage::from(&mut page).delete_tuple(rid.slot_id())?;
        Ok(vec![page])
    }
}

impl Drop for HeapFile {
    /// We unlock the file when the handle is dropped, so a new handle (or
    /// another process) can take over the table safely.
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&*self.file.lock().unwrap()) {
            panic!("Failed to unlock file: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use graindb_catalog::tuple::Tuple;
    use serial_test::serial;

    use crate::buffer_pool::BufferPool;
    use crate::catalog::{Catalog, PageStore};
    use crate::page::heap_page::HeapPage;
    use crate::page::{page_size, Page, PageId, DEFAULT_PAGE_SIZE};
    use crate::transaction::TransactionId;

    use super::HeapFile;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(name)
    }

    #[test]
    #[serial]
    fn test_heap_file_allocates_pages_in_file_order() {
        let hf = HeapFile::create(temp_path("hf_allocate.tbl"), 1).unwrap();
        assert_eq!(hf.num_pages().unwrap(), 0);

        for expected in 0..3 {
            let pid = hf.allocate_page().unwrap();
            assert_eq!(pid, PageId::new(1, expected));
        }
        assert_eq!(hf.num_pages().unwrap(), 3);
    }

    #[test]
    #[serial]
    fn test_heap_file_read_out_of_range_faults() {
        let hf = HeapFile::create(temp_path("hf_range.tbl"), 1).unwrap();
        hf.allocate_page().unwrap();

        assert!(hf.read_page(&PageId::new(1, 1)).is_err());
        assert!(hf.read_page(&PageId::new(2, 0)).is_err());
        assert!(hf.read_page(&PageId::new(1, 0)).is_ok());
    }

    #[test]
    #[serial]
    fn test_heap_file_write_read_roundtrip_persists() {
        let path = temp_path("hf_roundtrip.tbl");
        let pid = PageId::new(1, 0);
        {
            let hf = HeapFile::create(&path, 1).unwrap();
            hf.allocate_page().unwrap();

            let mut page = Page::new(pid);
            page.data_mut()[..4].copy_from_slice(&[1, 2, 3, 4]);
            hf.write_page(&page).unwrap();
            assert_eq!(&hf.read_page(&pid).unwrap().data()[..4], &[1, 2, 3, 4]);
        }

        // Reopening the file sees the same image.
        let hf = HeapFile::open(&path, 1).unwrap();
        assert_eq!(hf.num_pages().unwrap(), 1);
        assert_eq!(&hf.read_page(&pid).unwrap().data()[..4], &[1, 2, 3, 4]);
    }

    #[test]
    #[serial]
    fn test_heap_file_num_pages_rounds_up() {
        let path = temp_path("hf_ceil.tbl");
        std::fs::write(&path, vec![0u8; page_size() + 10]).unwrap();

        let hf = HeapFile::open(&path, 1).unwrap();
        assert_eq!(hf.num_pages().unwrap(), 2);
    }

    #[test]
    #[serial]
    fn test_heap_file_insert_appends_page_when_table_is_full() {
        let catalog = Arc::new(Catalog::new());
        let table_id = catalog.reserve_table_id();
        let hf = Arc::new(HeapFile::create(temp_path("hf_extend.tbl"), table_id).unwrap());
        catalog.add_table("table", Arc::clone(&hf) as _).unwrap();
        let pool = BufferPool::new(4, catalog);

        let tid = TransactionId::new();
        let big = Tuple::new(vec![7; DEFAULT_PAGE_SIZE - 200].into());

        // The first insert allocates page 0 for the empty table; the second
        // finds it full and appends page 1.
        pool.insert_tuple(tid, table_id, &big).unwrap();
        assert_eq!(hf.num_pages().unwrap(), 1);
        pool.insert_tuple(tid, table_id, &big).unwrap();
        assert_eq!(hf.num_pages().unwrap(), 2);

        pool.commit(tid).unwrap();
        for page_no in 0..2 {
            let page = hf.read_page(&PageId::new(table_id, page_no)).unwrap();
            assert_eq!(HeapPage::from(&page).tuple_count(), 1);
        }
    }

    #[test]
    #[serial]
    fn test_heap_file_delete_requires_record_id() {
        let catalog = Arc::new(Catalog::new());
        let table_id = catalog.reserve_table_id();
        let hf = Arc::new(HeapFile::create(temp_path("hf_delete.tbl"), table_id).unwrap());
        catalog.add_table("table", Arc::clone(&hf) as _).unwrap();
        let pool = BufferPool::new(4, catalog);

        let tid = TransactionId::new();
        let err = hf
            .delete_tuple(&pool, tid, &Tuple::new(vec![1].into()))
            .unwrap_err();
        assert!(matches!(err, graindb_error::Error::InvalidInput(_)));
    }

    #[test]
    #[serial]
    fn test_heap_file_delete_tombstones_slot() {
        let catalog = Arc::new(Catalog::new());
        let table_id = catalog.reserve_table_id();
        let hf = Arc::new(HeapFile::create(temp_path("hf_tombstone.tbl"), table_id).unwrap());
        catalog.add_table("table", Arc::clone(&hf) as _).unwrap();
        let pool = BufferPool::new(4, catalog);

        let tid = TransactionId::new();
        pool.insert_tuple(tid, table_id, &Tuple::new(vec![1, 2].into()))
            .unwrap();
        let page = pool
            .get_page(tid, PageId::new(table_id, 0), crate::lock::LockMode::Exclusive)
            .unwrap();
        let (_, stored) = HeapPage::from(&page).get_tuple(0).unwrap();

        let pages = hf.delete_tuple(&pool, tid, &stored).unwrap();
        let (meta, _) = HeapPage::from(&pages[0]).get_tuple(0).unwrap();
        assert!(meta.is_deleted());
    }
}
