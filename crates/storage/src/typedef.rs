pub use graindb_catalog::catalog::TableId;

pub type PageNo = u32;
pub type SlotId = u32;
