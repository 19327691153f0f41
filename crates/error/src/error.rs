pub type Result<T> = std::result::Result<T, Error>;
impl<T> From<Error> for Result<T> {
    fn from(e: Error) -> Self {
        Err(e)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// Invalid data, which typically includes decoding errors or unexpected internal values.
    InvalidData(String),
    /// Invalid user input, such as an unknown table or a tuple without a record id.
    InvalidInput(String),
    /// An IO error has occurred.
    IO(String),
    /// An out-of-bounds access has occurred.
    OutOfBounds,
    /// Granting a lock would close a cycle in the waits-for graph.
    Deadlock,
    /// The transaction could not proceed safely and must abort.
    TransactionAborted,
    /// A buffer pool error has occurred.
    BufferPoolError(String),
}

impl std::error::Error for Error {}
impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidData(msg) => write!(f, "Invalid data: {}", msg),
            Error::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            Error::IO(msg) => write!(f, "IO error: {}", msg),
            Error::OutOfBounds => write!(f, "Out of bounds"),
            Error::Deadlock => write!(f, "Deadlock detected"),
            Error::TransactionAborted => write!(f, "Transaction aborted"),
            Error::BufferPoolError(msg) => write!(f, "Buffer error: {}", msg),
        }
    }
}

impl From<std::array::TryFromSliceError> for Error {
    fn from(e: std::array::TryFromSliceError) -> Self {
        Error::InvalidData(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IO(e.to_string())
    }
}

impl From<std::num::TryFromIntError> for Error {
    fn from(e: std::num::TryFromIntError) -> Self {
        Error::InvalidData(e.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        // This occurs when a different thread panics when holding a mutex. Since this is
        // fatal, we should panic here too.
        panic!("{e}")
    }
}
