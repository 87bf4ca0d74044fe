//! Storage abstraction the protocol engine runs on.
//!
//! Backends implement [`FileSystem`]; the engine never touches the host
//! filesystem directly. Two backends ship with the crate: [`MemFs`], an
//! ephemeral tree that is also what the tests run against, and [`LocalFs`],
//! which serves a directory on disk.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::time::SystemTime;

use crate::path::DavPath;
use crate::xml::{Element, QName};

pub mod local;
pub mod memory;


pub use local::LocalFs;
pub use memory::MemFs;

pub type FsResult<T> = Result<T, FsError>;

#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("resource not found")]
    NotFound,
    #[error("resource already exists")]
    Exists,
    #[error("parent collection missing or not a collection")]
    Conflict,
    #[error("operation not permitted")]
    Forbidden,
    #[error("operation not supported by this backend")]
    NotImplemented,
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
}

/// What `stat` reports about a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Metadata {
    pub is_collection: bool,
    pub size: u64,
    pub modified: SystemTime,
}

impl Metadata {
    /// Strong entity tag derived from size and modification time.
    pub fn etag(&self) -> String {
        let nanos = self
            .modified
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        format!("\"{:x}-{:x}\"", self.size, nanos)
    }
}

/// A single dead property mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PropPatch {
    /// Store `value`, whose element name is the property name.
    Set(Element),
    Remove(QName),
}

impl PropPatch {
    pub fn name(&self) -> &QName {
        match self {
            PropPatch::Set(value) => &value.name,
            PropPatch::Remove(name) => name,
        }
    }
}

/// An open resource. Dropping the handle closes it.
#[async_trait]
pub trait FileHandle: Send + Sync {
    async fn stat(&self) -> FsResult<Metadata>;

    /// Child names in a stable order. Collections carry a trailing `/`.
    async fn list(&self) -> FsResult<Vec<String>>;

    async fn read(&self) -> FsResult<Bytes>;
}

#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn open(&self, path: &DavPath) -> FsResult<Box<dyn FileHandle>>;

    /// Create or replace a non-collection resource. Returns `true` when the
    /// resource did not exist before.
    async fn write(&self, path: &DavPath, data: Bytes) -> FsResult<bool>;

    /// Fails with [`FsError::Exists`] when the path is taken and with
    /// [`FsError::Conflict`] when the parent collection is missing.
    async fn mkdir(&self, path: &DavPath) -> FsResult<()>;

    /// Remove a resource together with anything still below it.
    async fn remove(&self, path: &DavPath) -> FsResult<()>;

    async fn dead_props(&self, _path: &DavPath) -> FsResult<Vec<Element>> {
        Ok(Vec::new())
    }

    async fn patch_prop(&self, _path: &DavPath, _patch: PropPatch) -> FsResult<()> {
        Err(FsError::NotImplemented)
    }

    async fn stat(&self, path: &DavPath) -> FsResult<Metadata> {
        self.open(path).await?.stat().await
    }

    async fn exists(&self, path: &DavPath) -> bool {
        self.stat(path).await.is_ok()
    }
}

/// Dead property table shared by the bundled backends, keyed by resource
/// identifier.
#[derive(Debug, Default)]
pub(crate) struct DeadProps {
    props: HashMap<DavPath, BTreeMap<QName, Element>>,
}

impl DeadProps {
    pub fn get(&self, path: &DavPath) -> Vec<Element> {
        self.props
            .get(path)
            .map(|p| p.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn apply(&mut self, path: &DavPath, patch: PropPatch) {
        match patch {
            PropPatch::Set(value) => {
                self.props
                    .entry(path.clone())
                    .or_default()
                    .insert(value.name.clone(), value);
            }
            PropPatch::Remove(name) => {
                if let Some(props) = self.props.get_mut(path) {
                    props.remove(&name);
                    if props.is_empty() {
                        self.props.remove(path);
                    }
                }
            }
        }
    }

    /// Forget properties of `path` and everything below it.
    pub fn remove_tree(&mut self, path: &DavPath) {
        self.props.retain(|p, _| !path.contains(p));
    }
}
