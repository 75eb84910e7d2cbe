//! A POSIX filesystem mounted over a distributed, CAS-versioned
//! key-value store: every filesystem call becomes one bounded optimistic
//! transaction against the store, so concurrent mounts observe a
//! consistent, linearizable view of the tree.

pub mod error;
pub mod fs;
pub mod metadata;
pub mod path;
pub mod stm;
pub mod store;

pub use error::{FfsError, Result};
pub use fs::{Filesystem, FsOptions};
