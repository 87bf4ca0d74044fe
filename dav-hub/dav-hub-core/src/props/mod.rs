//! Property discovery (PROPFIND) and mutation (PROPPATCH).
//!
//! Live properties are computed from storage metadata and the lock table
//! and are all protected. Everything outside the `DAV:` namespace is a dead
//! property held by the storage backend.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use http::StatusCode;
use std::time::SystemTime;
use tracing::{debug, warn};

use crate::error::DavResult;
use crate::headers::Depth;
use crate::lock::{Lock, LockManager};
use crate::multistatus::{MultiStatus, PropStat};
use crate::path::{DavPath, PathResolver};
use crate::storage::{FileSystem, FsError, FsResult, Metadata, PropPatch};
use crate::xml::{self, Element, QName, XmlError};


/// Names of the live properties, in the order `allprop` reports them.
pub const LIVE_PROPS: [&str; 8] = [
    "resourcetype",
    "displayname",
    "getcontentlength",
    "getlastmodified",
    "getetag",
    "getcontenttype",
    "supportedlock",
    "lockdiscovery",
];

/// What a PROPFIND body asks for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PropFind {
    /// Every property; `include` names extra ones to report.
    AllProp { include: Vec<QName> },
    PropName,
    Prop(Vec<QName>),
}

impl Default for PropFind {
    fn default() -> Self {
        PropFind::AllProp {
            include: Vec::new(),
        }
    }
}

fn names_of(prop: &Element) -> Vec<QName> {
    prop.elements().map(|e| e.name.clone()).collect()
}

impl PropFind {
    /// Parse a PROPFIND body. An empty body means `allprop`.
    pub fn parse(body: &[u8]) -> Result<Self, XmlError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        let root = xml::parse(body)?;
        if !root.is_dav("propfind") {
            return Err(XmlError::Malformed("expected DAV:propfind".into()));
        }
        if root.dav_child("propname").is_some() {
            return Ok(PropFind::PropName);
        }
        if root.dav_child("allprop").is_some() {
            let include = root.dav_child("include").map(names_of).unwrap_or_default();
            return Ok(PropFind::AllProp { include });
        }
        match root.dav_child("prop") {
            Some(prop) => Ok(PropFind::Prop(names_of(prop))),
            None => Err(XmlError::Malformed(
                "propfind without allprop, propname or prop".into(),
            )),
        }
    }
}

/// Parse a `DAV:propertyupdate` body into its instructions, in document
/// order.
pub fn parse_propertyupdate(body: &[u8]) -> Result<Vec<PropPatch>, XmlError> {
    let root = xml::parse(body)?;
    if !root.is_dav("propertyupdate") {
        return Err(XmlError::Malformed("expected DAV:propertyupdate".into()));
    }
    let mut patches = Vec::new();
    for op in root.elements() {
        let set = if op.is_dav("set") {
            true
        } else if op.is_dav("remove") {
            false
        } else {
            continue;
        };
        for prop in op.elements().filter(|e| e.is_dav("prop")) {
            for value in prop.elements() {
                patches.push(if set {
                    PropPatch::Set(value.clone())
                } else {
                    PropPatch::Remove(value.name.clone())
                });
            }
        }
    }
    if patches.is_empty() {
        return Err(XmlError::Malformed("propertyupdate names no property".into()));
    }
    Ok(patches)
}

/// `Sun, 06 Nov 1994 08:49:37 GMT`
pub fn http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// Media type guessed from the file extension.
pub fn content_type(path: &DavPath) -> &'static str {
    let ext = path
        .name()
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html",
        "txt" => "text/plain",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

/// `DAV:lockdiscovery` listing `locks`.
pub fn lock_discovery(locks: &[Lock], resolver: &PathResolver) -> Element {
    let mut discovery = Element::dav("lockdiscovery");
    for lock in locks {
        discovery.push(lock.active_lock(&resolver.to_address(&lock.path)));
    }
    discovery
}

fn supported_lock() -> Element {
    let entry = |scope: &str| {
        Element::dav("lockentry")
            .with_child(Element::dav("lockscope").with_child(Element::dav(scope)))
            .with_child(Element::dav("locktype").with_child(Element::dav("write")))
    };
    Element::dav("supportedlock")
        .with_child(entry("exclusive"))
        .with_child(entry("shared"))
}

/// A resource found while walking, with its metadata if `stat` succeeded.
struct Found {
    path: DavPath,
    meta: Option<Metadata>,
}

pub struct PropertyEngine<'a> {
    fs: &'a dyn FileSystem,
    locks: &'a LockManager,
    resolver: &'a PathResolver,
}

impl<'a> PropertyEngine<'a> {
    pub fn new(fs: &'a dyn FileSystem, locks: &'a LockManager, resolver: &'a PathResolver) -> Self {
        Self {
            fs,
            locks,
            resolver,
        }
    }

    /// Live property `name` of a resource, `None` when it does not apply.
    fn live(&self, path: &DavPath, meta: &Metadata, name: &str) -> Option<Element> {
        let prop = Element::dav(name);
        Some(match name {
            "resourcetype" => {
                if meta.is_collection {
                    prop.with_child(Element::dav("collection"))
                } else {
                    prop
                }
            }
            "displayname" => prop.with_text(path.name()),
            "getcontentlength" if !meta.is_collection => prop.with_text(meta.size.to_string()),
            "getlastmodified" => prop.with_text(http_date(meta.modified)),
            "getetag" if !meta.is_collection => prop.with_text(meta.etag()),
            "getcontenttype" if !meta.is_collection => prop.with_text(content_type(path)),
            "supportedlock" => supported_lock(),
            "lockdiscovery" => lock_discovery(&self.locks.covering(path), self.resolver),
            _ => return None,
        })
    }

    async fn dead(&self, path: &DavPath) -> Vec<Element> {
        match self.fs.dead_props(path).await {
            Ok(props) => props,
            Err(err) => {
                debug!(%path, error = %err, "dead properties unavailable");
                Vec::new()
            }
        }
    }

    async fn propstats(&self, path: &DavPath, meta: &Metadata, request: &PropFind) -> Vec<PropStat> {
        let mut found = Vec::new();
        let mut missing = Vec::new();
        match request {
            PropFind::AllProp { include } => {
                found.extend(LIVE_PROPS.iter().filter_map(|n| self.live(path, meta, n)));
                let dead = self.dead(path).await;
                for name in include {
                    let known = (name.is_dav() && LIVE_PROPS.contains(&name.name.as_str()))
                        || dead.iter().any(|d| d.name == *name);
                    if !known {
                        missing.push(Element::new(name.clone()));
                    }
                }
                found.extend(dead);
            }
            PropFind::PropName => {
                found.extend(
                    LIVE_PROPS
                        .iter()
                        .filter_map(|n| self.live(path, meta, n))
                        .map(|e| Element::new(e.name)),
                );
                found.extend(self.dead(path).await.into_iter().map(|e| Element::new(e.name)));
            }
            PropFind::Prop(names) => {
                let dead = self.dead(path).await;
                for name in names {
                    let value = if name.is_dav() {
                        self.live(path, meta, &name.name)
                    } else {
                        None
                    }
                    .or_else(|| dead.iter().find(|d| d.name == *name).cloned());
                    match value {
                        Some(value) => found.push(value),
                        None => missing.push(Element::new(name.clone())),
                    }
                }
            }
        }

        let mut propstats = Vec::new();
        if !found.is_empty() {
            propstats.push(PropStat {
                status: StatusCode::OK,
                props: found,
            });
        }
        if !missing.is_empty() {
            propstats.push(PropStat {
                status: StatusCode::NOT_FOUND,
                props: missing,
            });
        }
        propstats
    }

    /// Members below `path`, in listing order. With `recurse` the whole
    /// subtree is returned depth first. A member collection that cannot be
    /// listed is reported without metadata so it surfaces as a 500.
    fn members<'b>(
        &'b self,
        path: &'b DavPath,
        recurse: bool,
    ) -> BoxFuture<'b, FsResult<Vec<Found>>> {
        async move {
            let names = self.fs.open(path).await?.list().await?;
            let mut found = Vec::new();
            for name in names {
                let child = path.join(&name);
                let mut meta = self.fs.stat(&child).await.ok();
                let mut below = Vec::new();
                if recurse && meta.map(|m| m.is_collection).unwrap_or(false) {
                    match self.members(&child, true).await {
                        Ok(members) => below = members,
                        Err(err) => {
                            warn!(path = %child, error = %err, "cannot list collection");
                            meta = None;
                        }
                    }
                }
                found.push(Found { path: child, meta });
                found.extend(below);
            }
            Ok(found)
        }
        .boxed()
    }

    /// Report `request` for `path` and, depending on `depth`, its members.
    /// The caller decides whether an infinite depth is acceptable.
    pub async fn discover(
        &self,
        path: &DavPath,
        depth: Depth,
        request: &PropFind,
    ) -> DavResult<MultiStatus> {
        let meta = self.fs.stat(path).await?;
        let mut resources = vec![Found {
            path: path.clone(),
            meta: Some(meta),
        }];
        if meta.is_collection && depth != Depth::Zero {
            resources.extend(self.members(path, depth == Depth::Infinity).await?);
        }

        let mut ms = MultiStatus::new();
        for found in resources {
            match found.meta {
                Some(meta) => {
                    let propstats = self.propstats(&found.path, &meta, request).await;
                    ms.push_propstats(self.resolver.href(&found.path, meta.is_collection), propstats);
                }
                None => ms.push_status(
                    self.resolver.to_address(&found.path),
                    StatusCode::INTERNAL_SERVER_ERROR,
                ),
            }
        }
        debug!(%path, ?depth, responses = ms.len(), "propfind");
        Ok(ms)
    }

    /// Apply `patches` in order. Each property succeeds or fails on its
    /// own: protected names get 403, storage failures 500.
    pub async fn patch(&self, path: &DavPath, patches: Vec<PropPatch>) -> DavResult<MultiStatus> {
        let meta = self.fs.stat(path).await?;
        let mut propstats: Vec<PropStat> = Vec::new();
        for patch in patches {
            let name = Element::new(patch.name().clone());
            let status = if patch.name().is_dav() {
                StatusCode::FORBIDDEN
            } else {
                match self.fs.patch_prop(path, patch).await {
                    Ok(()) => StatusCode::OK,
                    Err(FsError::Forbidden | FsError::NotImplemented) => StatusCode::FORBIDDEN,
                    Err(err) => {
                        warn!(%path, error = %err, "property update failed");
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                }
            };
            match propstats.iter_mut().find(|p| p.status == status) {
                Some(group) => group.props.push(name),
                None => propstats.push(PropStat {
                    status,
                    props: vec![name],
                }),
            }
        }
        let mut ms = MultiStatus::new();
        ms.push_propstats(self.resolver.href(path, meta.is_collection), propstats);
        Ok(ms)
    }
}
