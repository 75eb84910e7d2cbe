//! Error kinds for the transactional layer and the filesystem adapter.

use thiserror::Error;

/// Everything that can go wrong below the mount boundary.
///
/// `Conflict` never escapes the STM retry wrapper (see `crate::stm`); every
/// other variant is translated to a POSIX errno by [`posix_errno`] at the
/// mount boundary.
#[derive(Error, Debug)]
pub enum FfsError {
    #[error("no such file or directory: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("directory not empty: {0}")]
    NotEmpty(String),

    #[error("path segment too long in {0:?}")]
    NameTooLong(String),

    #[error("open handle table exhausted")]
    HandleExhausted,

    #[error("operation not implemented")]
    NotImplemented,

    #[error("transaction conflict")]
    Conflict,

    #[error("a transaction is already open on this STM instance")]
    AlreadyInTransaction,

    #[error("store error: {0}")]
    Store(String),

    #[error("corrupt metadata for {path}: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, FfsError>;

/// Maps an [`FfsError`] to the errno the mount boundary should surface.
///
/// `Conflict` has no entry here: it is always caught and retried by
/// [`crate::stm::run_with_retry`] and must never reach this function.
pub fn posix_errno(err: &FfsError) -> i32 {
    match err {
        FfsError::NotFound(_) => libc::ENOENT,
        FfsError::AlreadyExists(_) => libc::EEXIST,
        FfsError::NotADirectory(_) => libc::ENOTDIR,
        FfsError::NotEmpty(_) => libc::ENOTEMPTY,
        FfsError::NameTooLong(_) => libc::ENAMETOOLONG,
        FfsError::HandleExhausted => libc::ENFILE,
        FfsError::NotImplemented => libc::ENOSYS,
        FfsError::Store(_) => libc::EIO,
        FfsError::Corrupt { .. } => libc::EIO,
        FfsError::Conflict | FfsError::AlreadyInTransaction => {
            debug_assert!(false, "{:?} must not reach the mount boundary", err);
            libc::EIO
        }
    }
}
