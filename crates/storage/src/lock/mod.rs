pub mod lock_manager;

/// Requested access level for a page lock: `Shared` permits reads and is
/// compatible with other shared holders, `Exclusive` permits reads and writes
/// and is compatible with nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LockMode {
    Shared,
    Exclusive,
}
