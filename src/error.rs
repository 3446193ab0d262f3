use std::fmt::Display;
use std::io;

/// A cinderdb Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

/// WAL operations that can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalOp {
    CreateFile,
    ReadFile,
    Append,
    Rollback,
    Delete,
}

impl Display for WalOp {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            WalOp::CreateFile => write!(f, "create file"),
            WalOp::ReadFile => write!(f, "read file"),
            WalOp::Append => write!(f, "append"),
            WalOp::Rollback => write!(f, "rollback"),
            WalOp::Delete => write!(f, "delete"),
        }
    }
}

/// SSTable operations that can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableOp {
    CreateFile,
    ReadFile,
    LoadIndex,
    LoadDatablock,
    WriteData,
    WriteIndex,
}

impl Display for TableOp {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            TableOp::CreateFile => write!(f, "create file"),
            TableOp::ReadFile => write!(f, "read file"),
            TableOp::LoadIndex => write!(f, "load index"),
            TableOp::LoadDatablock => write!(f, "load datablock"),
            TableOp::WriteData => write!(f, "write data"),
            TableOp::WriteIndex => write!(f, "write index"),
        }
    }
}

/// cinderdb errors.
#[derive(Debug)]
pub enum Error {
    /// A WAL operation failed. `before_last_seq` is the sequence number of
    /// the last record committed before the failing operation.
    Wal {
        op: WalOp,
        before_last_seq: u32,
        source: io::Error,
    },
    /// An SSTable operation failed.
    Table {
        op: TableOp,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// Invalid data, typically decoding errors, corruption, or unexpected
    /// internal values.
    Corruption(String),
    /// The empty key is reserved for internal use.
    EmptyKey,
    /// An IO error outside the WAL and SSTable paths.
    Io(io::Error),
}

impl Error {
    /// Constructs a WAL error for the given operation.
    pub fn wal(op: WalOp, before_last_seq: u32, source: io::Error) -> Self {
        Error::Wal {
            op,
            before_last_seq,
            source,
        }
    }

    /// Constructs an SSTable error for the given operation.
    pub fn table<E>(op: TableOp, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error::Table {
            op,
            source: source.into(),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Wal {
                op,
                before_last_seq,
                source,
            } => write!(
                f,
                "wal {op} failed (last committed seq {before_last_seq}): {source}"
            ),
            Error::Table { op, source } => write!(f, "sstable {op} failed: {source}"),
            Error::Corruption(msg) => write!(f, "corruption: {msg}"),
            Error::EmptyKey => write!(f, "keys must be non-empty"),
            Error::Io(err) => write!(f, "io error: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Wal { source, .. } => Some(source),
            Error::Table { source, .. } => Some(source.as_ref()),
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<Box<bincode::ErrorKind>> for Error {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        Error::Corruption(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::Corruption(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wal_error_display() {
        let err = Error::wal(
            WalOp::Append,
            3,
            io::Error::new(io::ErrorKind::Other, "disk gone"),
        );
        assert_eq!(
            err.to_string(),
            "wal append failed (last committed seq 3): disk gone"
        );
    }

    #[test]
    fn test_table_error_display() {
        let err = Error::table(
            TableOp::LoadDatablock,
            io::Error::new(io::ErrorKind::UnexpectedEof, "short read"),
        );
        assert_eq!(err.to_string(), "sstable load datablock failed: short read");
    }

    #[test]
    fn test_source_is_preserved() {
        let err = Error::wal(WalOp::Delete, 0, io::Error::new(io::ErrorKind::Other, "x"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
