use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use graindb_catalog::catalog::{TableId, TableInfo};
use graindb_catalog::tuple::Tuple;
use graindb_error::{errinput, Error};

use crate::buffer_pool::BufferPool;
use crate::page::{Page, PageId};
use crate::transaction::TransactionId;
use crate::Result;

/// Backing store for one heap-organized table of fixed-size pages.
///
/// The buffer pool treats page images as opaque blobs and this trait as the
/// authority on slot-level mutation: `insert_tuple` and `delete_tuple` return
/// every page image they modified, and the pool marks exactly those dirty and
/// installs them in its cache.
///
/// The tuple operations receive the calling [`BufferPool`] as explicit context
/// and must route their page access through [`BufferPool::get_page`] with an
/// exclusive mode, so that they observe cached uncommitted images and hold
/// write locks on every page they touch.
pub trait PageStore: Send + Sync {
    /// The table this store backs.
    fn table_id(&self) -> TableId;

    /// Reads the on-disk image of `pid`. Faults if `pid` is out of range.
    fn read_page(&self, pid: &PageId) -> Result<Page>;

    /// Writes `page` at its on-disk offset.
    fn write_page(&self, page: &Page) -> Result<()>;

    /// The number of pages currently in the table.
    fn num_pages(&self) -> Result<usize>;

    /// Inserts `tuple` into some page with room, returning the modified page
    /// images.
    fn insert_tuple(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        tuple: &Tuple,
    ) -> Result<Vec<Page>>;

    /// Deletes the tuple named by `tuple`'s record id, returning the modified
    /// page images.
    fn delete_tuple(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        tuple: &Tuple,
    ) -> Result<Vec<Page>>;
}

struct CatalogEntry {
    info: TableInfo,
    store: Arc<dyn PageStore>,
}

/// Maps table ids to the page stores backing them.
///
/// A catalog handle is passed explicitly to every [`BufferPool`]; nothing here
/// is process-global.
pub struct Catalog {
    tables: RwLock<HashMap<TableId, CatalogEntry>>,
    next_table_id: AtomicU32,
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            next_table_id: AtomicU32::new(1),
        }
    }

    /// Reserves a fresh table id for a store about to be created.
    pub fn reserve_table_id(&self) -> TableId {
        self.next_table_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Registers `store` under `name`. Table names and ids must be unique.
    pub fn add_table(&self, name: &str, store: Arc<dyn PageStore>) -> Result<TableId> {
        let id = store.table_id();
        let mut tables = self.tables.write()?;
        if tables.contains_key(&id) {
            return errinput!("table id {} already registered", id);
        }
        if tables.values().any(|entry| entry.info.name() == name) {
            return errinput!("table name {} already registered", name);
        }
        tables.insert(
            id,
            CatalogEntry {
                info: TableInfo::new(id, name.to_string()),
                store,
            },
        );
        Ok(id)
    }

    /// The store backing `table_id`.
    pub fn store(&self, table_id: TableId) -> Result<Arc<dyn PageStore>> {
        self.tables
            .read()?
            .get(&table_id)
            .map(|entry| Arc::clone(&entry.store))
            .ok_or_else(|| Error::InvalidInput(format!("table {} not found", table_id)))
    }

    /// Metadata for `table_id`, if registered.
    pub fn table_info(&self, table_id: TableId) -> Option<TableInfo> {
        self.tables
            .read()
            .unwrap()
            .get(&table_id)
            .map(|entry| entry.info.clone())
    }

    /// The id registered under `name`, if any.
    pub fn table_id_by_name(&self, name: &str) -> Option<TableId> {
        self.tables
            .read()
            .unwrap()
            .values()
            .find(|entry| entry.info.name() == name)
            .map(|entry| entry.info.id())
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serial_test::serial;

    use crate::heap::heap_file::HeapFile;

    use super::Catalog;

    #[test]
    #[serial]
    fn test_catalog_registers_and_resolves_tables() {
        let catalog = Catalog::new();
        let id = catalog.reserve_table_id();
        let path = std::env::temp_dir().join("catalog_resolves.tbl");
        let store = Arc::new(HeapFile::create(&path, id).unwrap());

        assert_eq!(catalog.add_table("users", store).unwrap(), id);
        assert_eq!(catalog.store(id).unwrap().table_id(), id);
        assert_eq!(catalog.table_id_by_name("users"), Some(id));
        assert_eq!(catalog.table_info(id).unwrap().name(), "users");

        assert!(catalog.store(id + 1).is_err());
        assert_eq!(catalog.table_id_by_name("orders"), None);
    }

    #[test]
    #[serial]
    fn test_catalog_rejects_duplicate_names_and_ids() {
        let catalog = Catalog::new();
        let id = catalog.reserve_table_id();
        let path = std::env::temp_dir().join("catalog_dupes.tbl");
        let store = Arc::new(HeapFile::create(&path, id).unwrap());
        catalog.add_table("users", Arc::clone(&store) as _).unwrap();

        let path2 = std::env::temp_dir().join("catalog_dupes2.tbl");
        let other = Arc::new(HeapFile::create(&path2, catalog.reserve_table_id()).unwrap());
        assert!(catalog.add_table("users", other).is_err());
        assert!(catalog.add_table("users_again", store).is_err());
    }
}
