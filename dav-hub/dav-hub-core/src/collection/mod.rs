//! Recursive DELETE, COPY and MOVE over a resource subtree.
//!
//! Every traversal returns the outcomes of the members it failed on; the
//! caller concatenates them. Nothing is rolled back: members already
//! processed stay processed when a sibling fails.

use futures::future::{BoxFuture, FutureExt};
use http::StatusCode;
use tracing::{debug, warn};

use crate::conditional::Precondition;
use crate::error::{DavError, DavResult};
use crate::headers::Depth;
use crate::multistatus::Outcome;
use crate::path::DavPath;
use crate::storage::{FileSystem, FsResult, PropPatch};


/// Result of a COPY or MOVE.
#[derive(Debug, Default)]
pub struct Transfer {
    /// The destination did not exist before.
    pub created: bool,
    pub outcomes: Vec<Outcome>,
}

pub struct CollectionOps<'a> {
    fs: &'a dyn FileSystem,
    gate: &'a Precondition<'a>,
}

impl<'a> CollectionOps<'a> {
    pub fn new(fs: &'a dyn FileSystem, gate: &'a Precondition<'a>) -> Self {
        Self { fs, gate }
    }

    async fn members(&self, path: &DavPath) -> FsResult<Vec<String>> {
        self.fs.open(path).await?.list().await
    }

    /// Delete `path`. The caller has already gated `path` itself.
    ///
    /// A non-collection is removed in one step and any storage failure is
    /// fatal. A collection is emptied member by member first; locked
    /// members are reported and skipped by the walk, failed members are
    /// reported and their siblings still processed. The final removal of
    /// the collection is recursive, so a member reported as locked goes
    /// with it; the caller drops the locks rooted below `path` afterwards.
    pub async fn delete(&self, path: &DavPath) -> DavResult<Vec<Outcome>> {
        let meta = self.fs.stat(path).await?;
        if !meta.is_collection {
            self.fs.remove(path).await.map_err(|err| {
                warn!(%path, error = %err, "delete failed");
                DavError::Status(StatusCode::INTERNAL_SERVER_ERROR)
            })?;
            return Ok(Vec::new());
        }

        let mut outcomes = match self.delete_members(path).await {
            Ok(outcomes) => outcomes,
            Err(err) => {
                warn!(%path, error = %err, "cannot list collection");
                return Ok(vec![Outcome::new(
                    path.clone(),
                    StatusCode::INTERNAL_SERVER_ERROR,
                )]);
            }
        };
        if let Err(err) = self.fs.remove(path).await {
            warn!(%path, error = %err, "collection removal failed");
            outcomes.push(Outcome::new(
                path.clone(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ));
        }
        Ok(outcomes)
    }

    /// Post-order removal of everything below `path`. Fails only when
    /// `path` itself cannot be listed.
    fn delete_members<'b>(&'b self, path: &'b DavPath) -> BoxFuture<'b, FsResult<Vec<Outcome>>> {
        async move {
            let mut outcomes = Vec::new();
            for name in self.members(path).await? {
                let child = path.join(&name);
                if self.gate.evaluate(&child).is_err() {
                    debug!(%child, "member is locked, leaving it in place");
                    outcomes.push(Outcome::new(child, StatusCode::LOCKED));
                    continue;
                }
                if name.ends_with('/') {
                    match self.delete_members(&child).await {
                        Ok(nested) => outcomes.extend(nested),
                        Err(err) => {
                            warn!(%child, error = %err, "cannot list collection");
                            outcomes.push(Outcome::new(child, StatusCode::INTERNAL_SERVER_ERROR));
                            continue;
                        }
                    }
                }
                if let Err(err) = self.fs.remove(&child).await {
                    warn!(%child, error = %err, "member removal failed");
                    outcomes.push(Outcome::new(child, StatusCode::INTERNAL_SERVER_ERROR));
                }
            }
            Ok(outcomes)
        }
        .boxed()
    }

    /// Copy `src` to `dst`. The caller has already gated `dst`.
    ///
    /// An existing destination is refused with 412 unless `overwrite` is
    /// set, in which case it is deleted first; if that delete reports any
    /// failure the copy does not start.
    pub async fn copy(
        &self,
        src: &DavPath,
        dst: &DavPath,
        overwrite: bool,
        depth: Depth,
    ) -> DavResult<Transfer> {
        let meta = self.fs.stat(src).await?;
        if src.contains(dst) || dst.contains(src) {
            return Err(DavError::Status(StatusCode::FORBIDDEN));
        }
        let parent_is_collection = match dst.parent() {
            Some(parent) => self
                .fs
                .stat(&parent)
                .await
                .map(|m| m.is_collection)
                .unwrap_or(false),
            None => false,
        };
        if !parent_is_collection {
            return Err(DavError::Status(StatusCode::CONFLICT));
        }

        let existed = self.fs.exists(dst).await;
        if existed {
            if !overwrite {
                return Err(DavError::Status(StatusCode::PRECONDITION_FAILED));
            }
            let outcomes = self.delete(dst).await?;
            if !outcomes.is_empty() {
                return Ok(Transfer {
                    created: false,
                    outcomes,
                });
            }
        }

        let outcomes = self.copy_node(src, dst, meta.is_collection, depth).await;
        Ok(Transfer {
            created: !existed,
            outcomes,
        })
    }

    async fn copy_file(&self, src: &DavPath, dst: &DavPath) -> FsResult<()> {
        let data = self.fs.open(src).await?.read().await?;
        self.fs.write(dst, data).await?;
        Ok(())
    }

    async fn copy_props(&self, src: &DavPath, dst: &DavPath) {
        let Ok(props) = self.fs.dead_props(src).await else {
            return;
        };
        for prop in props {
            if let Err(err) = self.fs.patch_prop(dst, PropPatch::Set(prop)).await {
                debug!(%dst, error = %err, "dead property not copied");
            }
        }
    }

    fn copy_node<'b>(
        &'b self,
        src: &'b DavPath,
        dst: &'b DavPath,
        is_collection: bool,
        depth: Depth,
    ) -> BoxFuture<'b, Vec<Outcome>> {
        async move {
            if !is_collection {
                if let Err(err) = self.copy_file(src, dst).await {
                    warn!(%src, %dst, error = %err, "copy failed");
                    return vec![Outcome::new(dst.clone(), StatusCode::INTERNAL_SERVER_ERROR)];
                }
                self.copy_props(src, dst).await;
                return Vec::new();
            }

            if let Err(err) = self.fs.mkdir(dst).await {
                warn!(%dst, error = %err, "mkcol during copy failed");
                return vec![Outcome::new(dst.clone(), StatusCode::INTERNAL_SERVER_ERROR)];
            }
            self.copy_props(src, dst).await;
            if depth == Depth::Zero {
                return Vec::new();
            }

            let children = match self.members(src).await {
                Ok(children) => children,
                Err(err) => {
                    warn!(%src, error = %err, "cannot list collection");
                    return vec![Outcome::new(src.clone(), StatusCode::INTERNAL_SERVER_ERROR)];
                }
            };
            let mut outcomes = Vec::new();
            for name in children {
                let child_src = src.join(&name);
                let child_dst = dst.join(&name);
                if self.gate.evaluate(&child_dst).is_err() {
                    outcomes.push(Outcome::new(child_dst, StatusCode::LOCKED));
                    continue;
                }
                outcomes.extend(
                    self.copy_node(&child_src, &child_dst, name.ends_with('/'), Depth::Infinity)
                        .await,
                );
            }
            outcomes
        }
        .boxed()
    }

    /// Copy followed by delete of the source. The delete only runs when
    /// the copy reported no failure at all.
    pub async fn move_to(&self, src: &DavPath, dst: &DavPath, overwrite: bool) -> DavResult<Transfer> {
        let mut transfer = self.copy(src, dst, overwrite, Depth::Infinity).await?;
        if !transfer.outcomes.is_empty() {
            warn!(
                %src,
                %dst,
                failures = transfer.outcomes.len(),
                "copy phase failed, source left untouched"
            );
            return Ok(transfer);
        }
        transfer.outcomes = self.delete(src).await?;
        Ok(transfer)
    }
}
