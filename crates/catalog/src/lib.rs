//! Table identity and tuple representations shared across the graindb crates.
//!
//! The storage engine treats tuples as opaque byte payloads; this crate only pins
//! down how tuples and the tables they belong to are identified.
pub mod catalog;
pub mod tuple;
