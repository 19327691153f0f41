use std::mem;
use std::ops::{Deref, DerefMut};

use bytemuck::{Pod, Zeroable};
use graindb_catalog::tuple::{RecordId, Tuple};
use graindb_error::Error;

use crate::page::Page;
use crate::typedef::SlotId;
use crate::Result;

#[repr(C)]
#[derive(Pod, Zeroable, Copy, Clone)]
pub(crate) struct HeapPageHeader {
    tuple_cnt: u16,
    deleted_tuple_cnt: u16,
}

#[repr(C)]
#[derive(Pod, Zeroable, Copy, Clone)]
pub(crate) struct TupleInfo {
    offset: u16,
    size_bytes: u16,
    metadata: TupleMetadata,
}

pub(crate) const HEAP_PAGE_HEADER_SIZE: usize = mem::size_of::<HeapPageHeader>();
pub(crate) const TUPLE_INFO_SIZE: usize = mem::size_of::<TupleInfo>();

#[repr(C)]
#[derive(Pod, Zeroable, Copy, Clone, Debug)]
pub struct TupleMetadata {
    is_deleted: u8,
    _padding: [u8; 1],
}

impl TupleMetadata {
    pub(crate) fn new(is_deleted: bool) -> Self {
        Self {
            is_deleted: is_deleted as u8,
            _padding: [0; 1],
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.is_deleted != 0
    }
}

/// Slotted-page view over a [`Page`] image: a header with live/deleted tuple
/// counts, a slot array growing from the front, and tuple bytes packed from the
/// end of the page. A zeroed image reads as an empty page.
///
/// Generic over mutable and immutable page references, like the handles the
/// buffer pool hands out.
pub struct HeapPage<T> {
    page: T,
}

impl<T> From<T> for HeapPage<T> {
    fn from(page: T) -> Self {
        Self { page }
    }
}

impl<T: Deref<Target = Page>> HeapPage<T> {
    pub(crate) fn header(&self) -> HeapPageHeader {
        bytemuck::pod_read_unaligned(&self.page.data()[..HEAP_PAGE_HEADER_SIZE])
    }

    pub fn tuple_count(&self) -> u32 {
        self.header().tuple_cnt as u32
    }

    pub fn deleted_count(&self) -> u32 {
        self.header().deleted_tuple_cnt as u32
    }

    fn slot(&self, slot_id: SlotId) -> TupleInfo {
        let start = HEAP_PAGE_HEADER_SIZE + slot_id as usize * TUPLE_INFO_SIZE;
        bytemuck::pod_read_unaligned(&self.page.data()[start..start + TUPLE_INFO_SIZE])
    }

    /// Reads the tuple in the given slot, stamped with its record id. Returns
    /// [`Error::OutOfBounds`] past the last occupied slot.
    pub fn get_tuple(&self, slot_id: SlotId) -> Result<(TupleMetadata, Tuple)> {
        if slot_id >= self.tuple_count() {
            return Err(Error::OutOfBounds);
        }
        let slot = self.slot(slot_id);
        let offset = slot.offset as usize;
        let data = &self.page.data()[offset..offset + slot.size_bytes as usize];

        let pid = self.page.pid();
        let rid = RecordId::new(pid.table_id(), pid.page_no(), slot_id);
        Ok((
            slot.metadata,
            Tuple::with_rid(bytes::Bytes::copy_from_slice(data), rid),
        ))
    }
}

impl<T: DerefMut<Target = Page>> HeapPage<T> {
    fn set_header(&mut self, header: HeapPageHeader) {
        self.page.data_mut()[..HEAP_PAGE_HEADER_SIZE].copy_from_slice(bytemuck::bytes_of(&header));
    }

    fn set_slot(&mut self, slot_id: SlotId, info: TupleInfo) {
        let start = HEAP_PAGE_HEADER_SIZE + slot_id as usize * TUPLE_INFO_SIZE;
        self.page.data_mut()[start..start + TUPLE_INFO_SIZE]
            .copy_from_slice(bytemuck::bytes_of(&info));
    }

    /// Appends a tuple, returning its slot. Returns [`Error::OutOfBounds`] when
    /// the tuple does not fit in the remaining free space.
    pub fn insert_tuple(&mut self, tuple: &Tuple) -> Result<SlotId> {
        let len = tuple.tuple_size();
        if len > u16::MAX as usize {
            return Err(Error::OutOfBounds);
        }

        let mut header = self.header();
        let cnt = header.tuple_cnt as usize;

        // Tuples pack downward from the end of the page, so the slot appended
        // last holds the lowest occupied offset.
        let end = if cnt == 0 {
            self.page.data().len()
        } else {
            self.slot(cnt as SlotId - 1).offset as usize
        };
        let offset = end.checked_sub(len).ok_or(Error::OutOfBounds)?;
        let slots_end = HEAP_PAGE_HEADER_SIZE + (cnt + 1) * TUPLE_INFO_SIZE;
        if offset < slots_end {
            return Err(Error::OutOfBounds);
        }

        self.page.data_mut()[offset..offset + len].copy_from_slice(&tuple.data());
        self.set_slot(
            cnt as SlotId,
            TupleInfo {
                offset: offset as u16,
                size_bytes: len as u16,
                metadata: TupleMetadata::new(false),
            },
        );
        header.tuple_cnt += 1;
        self.set_header(header);

        Ok(cnt as SlotId)
    }

    /// Tombstones the tuple in the given slot. Deleting an already-deleted
    /// tuple is a no-op.
    pub fn delete_tuple(&mut self, slot_id: SlotId) -> Result<()> {
        if slot_id >= self.tuple_count() {
            return Err(Error::OutOfBounds);
        }
        let mut slot = self.slot(slot_id);
        if slot.metadata.is_deleted() {
            return Ok(());
        }
        slot.metadata = TupleMetadata::new(true);
        self.set_slot(slot_id, slot);

        let mut header = self.header();
        header.deleted_tuple_cnt += 1;
        self.set_header(header);
        Ok(())
    }
}
