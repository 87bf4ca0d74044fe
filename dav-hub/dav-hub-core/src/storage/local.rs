//! Backend serving a directory of the local filesystem.
//!
//! Dead properties are kept in memory next to the tree; they do not survive
//! a restart.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{DeadProps, FileHandle, FileSystem, FsError, FsResult, Metadata, PropPatch};
use crate::path::DavPath;
use crate::xml::Element;

fn map_io(err: std::io::Error) -> FsError {
    match err.kind() {
        ErrorKind::NotFound => FsError::NotFound,
        ErrorKind::AlreadyExists => FsError::Exists,
        ErrorKind::PermissionDenied => FsError::Forbidden,
        _ => FsError::Io(err),
    }
}

fn metadata_of(meta: &std::fs::Metadata) -> Metadata {
    Metadata {
        is_collection: meta.is_dir(),
        size: if meta.is_dir() { 0 } else { meta.len() },
        modified: meta.modified().unwrap_or(std::time::UNIX_EPOCH),
    }
}

pub struct LocalFs {
    root: PathBuf,
    props: RwLock<DeadProps>,
}

impl LocalFs {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            props: RwLock::new(DeadProps::default()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn fs_path(&self, path: &DavPath) -> PathBuf {
        let mut out = self.root.clone();
        for segment in path.segments() {
            out.push(segment);
        }
        out
    }

    async fn parent_is_dir(&self, path: &DavPath) -> bool {
        let Some(parent) = path.parent() else {
            return false;
        };
        tokio::fs::metadata(self.fs_path(&parent))
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }
}

struct LocalHandle {
    path: PathBuf,
    meta: Metadata,
}

#[async_trait]
impl FileHandle for LocalHandle {
    async fn stat(&self) -> FsResult<Metadata> {
        Ok(self.meta)
    }

    async fn list(&self) -> FsResult<Vec<String>> {
        if !self.meta.is_collection {
            return Err(FsError::Conflict);
        }
        let mut entries = tokio::fs::read_dir(&self.path).await.map_err(map_io)?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(map_io)? {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await.map_err(map_io)?.is_dir() {
                name.push('/');
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    async fn read(&self) -> FsResult<Bytes> {
        if self.meta.is_collection {
            return Err(FsError::Forbidden);
        }
        Ok(tokio::fs::read(&self.path).await.map_err(map_io)?.into())
    }
}

#[async_trait]
impl FileSystem for LocalFs {
    async fn open(&self, path: &DavPath) -> FsResult<Box<dyn FileHandle>> {
        let fs_path = self.fs_path(path);
        let meta = tokio::fs::metadata(&fs_path).await.map_err(map_io)?;
        Ok(Box::new(LocalHandle {
            path: fs_path,
            meta: metadata_of(&meta),
        }))
    }

    async fn write(&self, path: &DavPath, data: Bytes) -> FsResult<bool> {
        if !self.parent_is_dir(path).await {
            return Err(FsError::Conflict);
        }
        let fs_path = self.fs_path(path);
        let created = match tokio::fs::metadata(&fs_path).await {
            Ok(meta) if meta.is_dir() => return Err(FsError::Forbidden),
            Ok(_) => false,
            Err(err) if err.kind() == ErrorKind::NotFound => true,
            Err(err) => return Err(map_io(err)),
        };
        tokio::fs::write(&fs_path, &data).await.map_err(map_io)?;
        Ok(created)
    }

    async fn mkdir(&self, path: &DavPath) -> FsResult<()> {
        if !self.parent_is_dir(path).await {
            return Err(FsError::Conflict);
        }
        tokio::fs::create_dir(self.fs_path(path))
            .await
            .map_err(map_io)
    }

    async fn remove(&self, path: &DavPath) -> FsResult<()> {
        if path.is_root() {
            return Err(FsError::Forbidden);
        }
        let fs_path = self.fs_path(path);
        let meta = tokio::fs::symlink_metadata(&fs_path).await.map_err(map_io)?;
        if meta.is_dir() {
            tokio::fs::remove_dir_all(&fs_path).await.map_err(map_io)?;
        } else {
            tokio::fs::remove_file(&fs_path).await.map_err(map_io)?;
        }
        self.props.write().remove_tree(path);
        Ok(())
    }

    async fn dead_props(&self, path: &DavPath) -> FsResult<Vec<Element>> {
        Ok(self.props.read().get(path))
    }

    async fn patch_prop(&self, path: &DavPath, patch: PropPatch) -> FsResult<()> {
        if !self.exists(path).await {
            return Err(FsError::NotFound);
        }
        self.props.write().apply(path, patch);
        Ok(())
    }
}
