use std::sync::Arc;

use graindb_catalog::tuple::Tuple;
use graindb_error::Error;

use crate::buffer_pool::BufferPool;
use crate::lock::LockMode;
use crate::page::heap_page::HeapPage;
use crate::page::PageId;
use crate::transaction::TransactionId;
use crate::typedef::{PageNo, SlotId, TableId};
use crate::Result;

/// An iterator over all non-deleted tuples of a table, in page and slot order.
///
/// Each page is fetched through the buffer pool under a shared lock on `tid`'s
/// behalf, so a scan observes only committed data plus `tid`'s own mutations,
/// and the locks it takes are held until `tid` completes.
pub struct TableIter {
    pool: Arc<BufferPool>,
    tid: TransactionId,
    table_id: TableId,
    /// Page count as of the last time the scan ran past it; refreshed from the
    /// store before the scan concludes, so pages appended mid-scan are visited.
    num_pages: usize,
    page_no: PageNo,
    slot: SlotId,
}

impl TableIter {
    /// Positions a new scan at the first slot of the table's first page.
    pub fn new(pool: Arc<BufferPool>, tid: TransactionId, table_id: TableId) -> Result<Self> {
        let num_pages = pool.catalog().store(table_id)?.num_pages()?;
        Ok(Self {
            pool,
            tid,
            table_id,
            num_pages,
            page_no: 0,
            slot: 0,
        })
    }

    fn refresh_num_pages(&mut self) -> Result<()> {
        self.num_pages = self.pool.catalog().store(self.table_id)?.num_pages()?;
        Ok(())
    }
}

impl Iterator for TableIter {
    type Item = Result<Tuple>;

    /// Emits the next non-deleted tuple not yet emitted by this scan, if one
    /// exists. Any recoverable error is propagated as `Some(Err(e))`, except
    /// the out-of-bounds probe past a page's last slot, which advances the scan
    /// to the next page.
    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.page_no as usize >= self.num_pages {
                // Inserts may have appended pages since the count was last
                // read; only a fresh count can end the scan.
                if let Err(e) = self.refresh_num_pages() {
                    return Some(Err(e));
                }
                if self.page_no as usize >= self.num_pages {
                    return None;
                }
            }

            let pid = PageId::new(self.table_id, self.page_no);
            let page = match self.pool.get_page(self.tid, pid, LockMode::Shared) {
                Ok(page) => page,
                Err(e) => return Some(Err(e)),
            };

            match HeapPage::from(&page).get_tuple(self.slot) {
                Ok((metadata, tuple)) => {
                    self.slot += 1;
                    if !metadata.is_deleted() {
                        return Some(Ok(tuple));
                    }
                }
                Err(Error::OutOfBounds) => {
                    self.page_no += 1;
                    self.slot = 0;
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use graindb_catalog::tuple::Tuple;
    use serial_test::serial;

    use crate::buffer_pool::BufferPool;
    use crate::catalog::Catalog;
    use crate::heap::heap_file::HeapFile;
    use crate::page::DEFAULT_PAGE_SIZE;
    use crate::transaction::TransactionId;
    use crate::Result;

    use super::TableIter;

    fn setup(file: &str) -> (Arc<BufferPool>, u32) {
        let catalog = Arc::new(Catalog::new());
        let table_id = catalog.reserve_table_id();
        let path = std::env::temp_dir().join(file);
        let store = Arc::new(HeapFile::create(&path, table_id).unwrap());
        catalog.add_table("table", store).unwrap();
        (Arc::new(BufferPool::new(10, catalog)), table_id)
    }

    /// The iterator visits all non-deleted tuples in insertion order.
    #[test]
    #[serial]
    fn test_table_iter_skips_deleted_tuples() -> Result<()> {
        let (pool, table_id) = setup("iter_skip.tbl");
        let writer = TransactionId::new();

        for i in 0..5u8 {
            pool.insert_tuple(writer, table_id, &Tuple::new(vec![i, i, i].into()))?;
        }

        // Scan on the writer's own behalf to find the third tuple's record id,
        // then delete it and commit.
        let victim = TableIter::new(Arc::clone(&pool), writer, table_id)?
            .collect::<Result<Vec<Tuple>>>()?
            .into_iter()
            .find(|t| t.data().to_vec() == vec![2, 2, 2])
            .expect("inserted tuple must be visible to its own transaction");
        pool.delete_tuple(writer, &victim)?;
        pool.commit(writer)?;

        let reader = TransactionId::new();
        let tuples: Vec<Tuple> =
            TableIter::new(Arc::clone(&pool), reader, table_id)?.collect::<Result<_>>()?;
        assert_eq!(tuples.len(), 4);
        for (tuple, expected) in tuples.iter().zip([0u8, 1, 3, 4]) {
            assert_eq!(tuple.data().to_vec(), vec![expected; 3]);
        }
        pool.commit(reader)?;
        Ok(())
    }

    /// A scan crosses page boundaries and takes a shared lock on every page it
    /// visits, held until the scanning transaction completes.
    #[test]
    #[serial]
    fn test_table_iter_scans_across_pages_under_shared_locks() -> Result<()> {
        let (pool, table_id) = setup("iter_pages.tbl");
        let writer = TransactionId::new();

        for fill in [1u8, 2] {
            let big = Tuple::new(vec![fill; DEFAULT_PAGE_SIZE - 200].into());
            pool.insert_tuple(writer, table_id, &big)?;
        }
        pool.commit(writer)?;

        let reader = TransactionId::new();
        let tuples: Vec<Tuple> =
            TableIter::new(Arc::clone(&pool), reader, table_id)?.collect::<Result<_>>()?;
        assert_eq!(tuples.len(), 2);
        assert_eq!(tuples[0].data()[0], 1);
        assert_eq!(tuples[1].data()[0], 2);

        for page_no in 0..2 {
            assert!(pool.holds(reader, crate::page::PageId::new(table_id, page_no)));
        }
        pool.commit(reader)?;
        Ok(())
    }

    /// Pages appended to the table after the scan starts are still visited.
    #[test]
    #[serial]
    fn test_table_iter_sees_pages_appended_mid_scan() -> Result<()> {
        let (pool, table_id) = setup("iter_append.tbl");
        let writer = TransactionId::new();

        let big = |fill: u8| Tuple::new(vec![fill; DEFAULT_PAGE_SIZE - 200].into());
        pool.insert_tuple(writer, table_id, &big(1))?;

        let mut iter = TableIter::new(Arc::clone(&pool), writer, table_id)?;
        assert_eq!(iter.next().unwrap()?.data()[0], 1);

        // The table grows by a page while the scan is mid-flight.
        pool.insert_tuple(writer, table_id, &big(2))?;
        assert_eq!(iter.next().unwrap()?.data()[0], 2);
        assert!(iter.next().is_none());
        pool.commit(writer)?;
        Ok(())
    }

    /// An empty table yields an empty scan.
    #[test]
    #[serial]
    fn test_table_iter_empty_table() -> Result<()> {
        let (pool, table_id) = setup("iter_empty.tbl");
        let reader = TransactionId::new();
        assert_eq!(
            TableIter::new(pool, reader, table_id)?
                .collect::<Result<Vec<Tuple>>>()?
                .len(),
            0
        );
        Ok(())
    }
}
