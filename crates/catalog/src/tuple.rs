use bytes::Bytes;

use crate::catalog::TableId;

/// Identifies the slot a tuple occupies: the table, the page within the table,
/// and the slot within that page.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RecordId {
    table_id: TableId,
    page_no: u32,
    slot_id: u32,
}

impl RecordId {
    pub fn new(table_id: TableId, page_no: u32, slot_id: u32) -> Self {
        Self {
            table_id,
            page_no,
            slot_id,
        }
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn page_no(&self) -> u32 {
        self.page_no
    }

    pub fn slot_id(&self) -> u32 {
        self.slot_id
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.table_id, self.page_no, self.slot_id)
    }
}

impl Ord for RecordId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.table_id, self.page_no, self.slot_id).cmp(&(
            other.table_id,
            other.page_no,
            other.slot_id,
        ))
    }
}

impl PartialOrd for RecordId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// An opaque tuple payload, optionally stamped with the record id of the slot it
/// was read from or inserted into.
#[derive(Clone, Debug)]
pub struct Tuple {
    data: Bytes,
    rid: Option<RecordId>,
}

impl Tuple {
    pub fn new(data: Bytes) -> Self {
        Self { data, rid: None }
    }

    pub fn with_rid(data: Bytes, rid: RecordId) -> Self {
        Self {
            data,
            rid: Some(rid),
        }
    }

    pub fn data(&self) -> Bytes {
        // Note this does not copy the tuple data into a new container; it returns a
        // reference-counted pointer to the existing one, incrementing the reference count.
        Bytes::clone(&self.data)
    }

    pub fn tuple_size(&self) -> usize {
        self.data.len()
    }

    pub fn rid(&self) -> Option<RecordId> {
        self.rid
    }

    pub fn set_rid(&mut self, rid: RecordId) {
        self.rid = Some(rid);
    }
}
