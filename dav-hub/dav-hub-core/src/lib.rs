pub mod collection;
pub mod conditional;
pub mod error;
pub mod handler;
pub mod headers;
pub mod lock;
pub mod multistatus;
pub mod path;
pub mod props;
pub mod storage;
pub mod xml;

pub use error::{DavError, DavResult};
pub use handler::{DavConfig, DavHandler};
pub use lock::LockManager;
pub use path::{DavPath, PathResolver};
pub use storage::{FileSystem, LocalFs, MemFs};
