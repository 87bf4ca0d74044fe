//! Ephemeral in-memory backend.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::time::SystemTime;

use super::{DeadProps, FileHandle, FileSystem, FsError, FsResult, Metadata, PropPatch};
use crate::path::DavPath;
use crate::xml::Element;

#[derive(Clone, Debug)]
enum Content {
    Collection,
    File(Bytes),
}

#[derive(Clone, Debug)]
struct MemNode {
    content: Content,
    modified: SystemTime,
}

impl MemNode {
    fn collection() -> Self {
        Self {
            content: Content::Collection,
            modified: SystemTime::now(),
        }
    }

    fn metadata(&self) -> Metadata {
        match &self.content {
            Content::Collection => Metadata {
                is_collection: true,
                size: 0,
                modified: self.modified,
            },
            Content::File(data) => Metadata {
                is_collection: false,
                size: data.len() as u64,
                modified: self.modified,
            },
        }
    }
}

struct Tree {
    nodes: BTreeMap<DavPath, MemNode>,
    props: DeadProps,
}

impl Tree {
    fn parent_is_collection(&self, path: &DavPath) -> bool {
        path.parent()
            .and_then(|parent| self.nodes.get(&parent))
            .map(|node| matches!(node.content, Content::Collection))
            .unwrap_or(false)
    }

    fn children(&self, path: &DavPath) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|(p, _)| p.parent().as_ref() == Some(path))
            .map(|(p, node)| match node.content {
                Content::Collection => format!("{}/", p.name()),
                Content::File(_) => p.name().to_string(),
            })
            .collect()
    }
}

/// In-memory resource tree guarded by a read/write lock.
pub struct MemFs {
    tree: RwLock<Tree>,
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemFs {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(DavPath::root(), MemNode::collection());
        Self {
            tree: RwLock::new(Tree {
                nodes,
                props: DeadProps::default(),
            }),
        }
    }
}

struct MemHandle {
    meta: Metadata,
    children: Vec<String>,
    data: Bytes,
}

#[async_trait]
impl FileHandle for MemHandle {
    async fn stat(&self) -> FsResult<Metadata> {
        Ok(self.meta)
    }

    async fn list(&self) -> FsResult<Vec<String>> {
        if !self.meta.is_collection {
            return Err(FsError::Conflict);
        }
        Ok(self.children.clone())
    }

    async fn read(&self) -> FsResult<Bytes> {
        if self.meta.is_collection {
            return Err(FsError::Forbidden);
        }
        Ok(self.data.clone())
    }
}

#[async_trait]
impl FileSystem for MemFs {
    async fn open(&self, path: &DavPath) -> FsResult<Box<dyn FileHandle>> {
        let tree = self.tree.read();
        let node = tree.nodes.get(path).ok_or(FsError::NotFound)?;
        let (children, data) = match &node.content {
            Content::Collection => (tree.children(path), Bytes::new()),
            Content::File(data) => (Vec::new(), data.clone()),
        };
        Ok(Box::new(MemHandle {
            meta: node.metadata(),
            children,
            data,
        }))
    }

    async fn write(&self, path: &DavPath, data: Bytes) -> FsResult<bool> {
        let mut tree = self.tree.write();
        if !tree.parent_is_collection(path) {
            return Err(FsError::Conflict);
        }
        let created = match tree.nodes.get(path) {
            Some(MemNode {
                content: Content::Collection,
                ..
            }) => return Err(FsError::Forbidden),
            Some(_) => false,
            None => true,
        };
        tree.nodes.insert(
            path.clone(),
            MemNode {
                content: Content::File(data),
                modified: SystemTime::now(),
            },
        );
        Ok(created)
    }

    async fn mkdir(&self, path: &DavPath) -> FsResult<()> {
        let mut tree = self.tree.write();
        if tree.nodes.contains_key(path) {
            return Err(FsError::Exists);
        }
        if !tree.parent_is_collection(path) {
            return Err(FsError::Conflict);
        }
        tree.nodes.insert(path.clone(), MemNode::collection());
        Ok(())
    }

    async fn remove(&self, path: &DavPath) -> FsResult<()> {
        if path.is_root() {
            return Err(FsError::Forbidden);
        }
        let mut tree = self.tree.write();
        if !tree.nodes.contains_key(path) {
            return Err(FsError::NotFound);
        }
        tree.nodes.retain(|p, _| !path.contains(p));
        tree.props.remove_tree(path);
        Ok(())
    }

    async fn dead_props(&self, path: &DavPath) -> FsResult<Vec<Element>> {
        let tree = self.tree.read();
        if !tree.nodes.contains_key(path) {
            return Err(FsError::NotFound);
        }
        Ok(tree.props.get(path))
    }

    async fn patch_prop(&self, path: &DavPath, patch: PropPatch) -> FsResult<()> {
        let mut tree = self.tree.write();
        if !tree.nodes.contains_key(path) {
            return Err(FsError::NotFound);
        }
        tree.props.apply(path, patch);
        Ok(())
    }
}
