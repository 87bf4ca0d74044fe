//! Method dispatcher: the entry point of the protocol engine.
//!
//! [`DavHandler::handle`] takes a fully buffered request and always
//! produces a response; errors are turned into statuses here and never
//! escape to the transport.

use bytes::Bytes;
use http::{header, HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use quick_xml::escape::escape;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::collection::CollectionOps;
use crate::conditional::{Conditions, Precondition};
use crate::error::{status_response, DavError, DavResult};
use crate::headers::{self, Depth};
use crate::lock::LockManager;
use crate::multistatus::{MultiStatus, Outcome};
use crate::path::{DavPath, PathResolver};
use crate::props::{self, parse_propertyupdate, PropFind, PropertyEngine};
use crate::storage::{FileSystem, Metadata};
use crate::xml;

mod lock;


/// Engine settings. Deserializable so the server can load them from a
/// config file.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DavConfig {
    /// Mount point of the tree, e.g. `/dav`. Empty serves at `/`.
    pub prefix: String,
    pub read_only: bool,
    /// Directory listings for GET and PROPFIND.
    pub listings: bool,
    pub allow_infinite_propfind: bool,
    /// Lock timeout when the client asks for none, in seconds. `None`
    /// grants infinite locks.
    pub lock_timeout_secs: Option<u64>,
    /// Upper bound for any granted lock timeout. `None` means uncapped.
    pub max_lock_timeout_secs: Option<u64>,
}

impl Default for DavConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            read_only: false,
            listings: true,
            allow_infinite_propfind: false,
            lock_timeout_secs: Some(3600),
            max_lock_timeout_secs: Some(7 * 24 * 3600),
        }
    }
}

impl DavConfig {
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn with_listings(mut self, listings: bool) -> Self {
        self.listings = listings;
        self
    }

    pub fn with_infinite_propfind(mut self, allow: bool) -> Self {
        self.allow_infinite_propfind = allow;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout_secs = timeout.map(|t| t.as_secs());
        self
    }

    pub fn with_max_lock_timeout(mut self, max: Option<Duration>) -> Self {
        self.max_lock_timeout_secs = max.map(|t| t.as_secs());
        self
    }

    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout_secs.map(Duration::from_secs)
    }

    pub fn max_lock_timeout(&self) -> Option<Duration> {
        self.max_lock_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DavMethod {
    Options,
    Get,
    Head,
    Post,
    Put,
    Delete,
    Mkcol,
    Copy,
    Move,
    PropFind,
    PropPatch,
    Lock,
    Unlock,
}

impl DavMethod {
    pub fn parse(method: &Method) -> Option<Self> {
        Some(match method.as_str() {
            "OPTIONS" => DavMethod::Options,
            "GET" => DavMethod::Get,
            "HEAD" => DavMethod::Head,
            "POST" => DavMethod::Post,
            "PUT" => DavMethod::Put,
            "DELETE" => DavMethod::Delete,
            "MKCOL" => DavMethod::Mkcol,
            "COPY" => DavMethod::Copy,
            "MOVE" => DavMethod::Move,
            "PROPFIND" => DavMethod::PropFind,
            "PROPPATCH" => DavMethod::PropPatch,
            "LOCK" => DavMethod::Lock,
            "UNLOCK" => DavMethod::Unlock,
            _ => return None,
        })
    }

    /// Methods refused outright on a read-only server.
    pub fn is_mutating(self) -> bool {
        matches!(
            self,
            DavMethod::Put
                | DavMethod::Delete
                | DavMethod::Mkcol
                | DavMethod::Copy
                | DavMethod::Move
                | DavMethod::PropPatch
                | DavMethod::Lock
                | DavMethod::Unlock
        )
    }
}

/// A request after header parsing, handed to the method implementations.
struct DavRequest {
    path: DavPath,
    headers: HeaderMap,
    body: Bytes,
    conditions: Conditions,
}

#[derive(Clone)]
pub struct DavHandler {
    fs: Arc<dyn FileSystem>,
    locks: Arc<LockManager>,
    config: Arc<DavConfig>,
    resolver: PathResolver,
}

fn header_value(value: &str) -> DavResult<HeaderValue> {
    HeaderValue::from_str(value).map_err(|_| DavError::Status(StatusCode::INTERNAL_SERVER_ERROR))
}

impl DavHandler {
    pub fn new(fs: Arc<dyn FileSystem>, config: DavConfig) -> Self {
        let resolver = PathResolver::new(&config.prefix);
        Self {
            fs,
            locks: Arc::new(LockManager::new()),
            config: Arc::new(config),
            resolver,
        }
    }

    /// Share a lock table with other handlers.
    pub fn with_locks(mut self, locks: Arc<LockManager>) -> Self {
        self.locks = locks;
        self
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    pub fn config(&self) -> &DavConfig {
        &self.config
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub async fn handle(&self, request: Request<Bytes>) -> Response<Bytes> {
        let method = request.method().clone();
        let uri = request.uri().clone();
        let response = match self.dispatch(request).await {
            Ok(response) => response,
            Err(err) => {
                if err.status().is_server_error() {
                    warn!(%method, %uri, error = %err, "request failed");
                } else {
                    debug!(%method, %uri, error = %err, "request refused");
                }
                err.into_response()
            }
        };
        debug!(%method, %uri, status = response.status().as_u16(), "handled");
        response
    }

    async fn dispatch(&self, request: Request<Bytes>) -> DavResult<Response<Bytes>> {
        let Some(method) = DavMethod::parse(request.method()) else {
            warn!(method = %request.method(), "unknown method");
            return Err(DavError::Status(StatusCode::BAD_REQUEST));
        };
        if self.config.read_only && method.is_mutating() {
            return Err(DavError::Status(StatusCode::FORBIDDEN));
        }
        let path = self
            .resolver
            .to_identifier(request.uri().path())
            .ok_or(DavError::Status(StatusCode::NOT_FOUND))?;

        let (parts, body) = request.into_parts();
        let conditions = Conditions::from_headers(
            headers::text(&parts.headers, headers::IF)?,
            headers::text(&parts.headers, headers::LOCK_TOKEN)?,
            &self.resolver,
        )?;
        let req = DavRequest {
            path,
            headers: parts.headers,
            body,
            conditions,
        };
        if method != DavMethod::Options
            && !req
                .conditions
                .holds(&req.path, &self.locks, self.fs.as_ref())
                .await
        {
            return Err(DavError::Status(StatusCode::PRECONDITION_FAILED));
        }

        match method {
            DavMethod::Options => self.options(&req).await,
            DavMethod::Get | DavMethod::Post => self.get(&req, true).await,
            DavMethod::Head => self.get(&req, false).await,
            DavMethod::Put => self.put(&req).await,
            DavMethod::Delete => self.delete(&req).await,
            DavMethod::Mkcol => self.mkcol(&req).await,
            DavMethod::Copy => self.transfer(&req, false).await,
            DavMethod::Move => self.transfer(&req, true).await,
            DavMethod::PropFind => self.propfind(&req).await,
            DavMethod::PropPatch => self.proppatch(&req).await,
            DavMethod::Lock => self.lock(&req).await,
            DavMethod::Unlock => self.unlock(&req).await,
        }
    }

    fn gate(&self, req: &DavRequest, path: &DavPath) -> DavResult<()> {
        Precondition::new(&self.locks, &req.conditions).evaluate(path)?;
        Ok(())
    }

    /// Value of the `Allow` header for a resource with `meta`, `None` when
    /// it does not exist.
    fn allow(&self, meta: Option<&Metadata>) -> String {
        let Some(meta) = meta else {
            return "OPTIONS, MKCOL, PUT, LOCK".to_string();
        };
        let mut allowed =
            String::from("OPTIONS, GET, HEAD, POST, DELETE, PROPPATCH, COPY, MOVE, LOCK, UNLOCK");
        if self.config.listings {
            allowed.push_str(", PROPFIND");
        }
        if !meta.is_collection {
            allowed.push_str(", PUT");
        }
        allowed
    }

    fn method_not_allowed(&self, meta: Option<&Metadata>) -> DavResult<Response<Bytes>> {
        let mut response = status_response(StatusCode::METHOD_NOT_ALLOWED);
        response
            .headers_mut()
            .insert(header::ALLOW, header_value(&self.allow(meta))?);
        Ok(response)
    }

    /// 207 when anything failed, `success` otherwise.
    fn outcome_response(&self, outcomes: Vec<Outcome>, success: StatusCode) -> Response<Bytes> {
        if outcomes.is_empty() {
            status_response(success)
        } else {
            MultiStatus::from_outcomes(&outcomes, &self.resolver).into_response()
        }
    }

    async fn options(&self, req: &DavRequest) -> DavResult<Response<Bytes>> {
        let meta = self.fs.stat(&req.path).await.ok();
        let mut response = status_response(StatusCode::OK);
        let map = response.headers_mut();
        map.insert(headers::DAV, HeaderValue::from_static("1, 2"));
        map.insert(header::ALLOW, header_value(&self.allow(meta.as_ref()))?);
        map.insert("ms-author-via", HeaderValue::from_static("DAV"));
        Ok(response)
    }

    async fn listing(&self, path: &DavPath) -> DavResult<String> {
        let names = self.fs.open(path).await?.list().await?;
        let title = escape(self.resolver.href(path, true).as_str()).into_owned();
        let mut html = format!(
            "<!DOCTYPE html>\n<html><head><title>Index of {title}</title></head>\
             <body><h1>Index of {title}</h1><ul>"
        );
        if let Some(parent) = path.parent() {
            html.push_str(&format!(
                "<li><a href=\"{}\">..</a></li>",
                escape(self.resolver.href(&parent, true).as_str())
            ));
        }
        for name in names {
            let child = path.join(&name);
            html.push_str(&format!(
                "<li><a href=\"{}\">{}</a></li>",
                escape(self.resolver.href(&child, name.ends_with('/')).as_str()),
                escape(name.as_str())
            ));
        }
        html.push_str("</ul></body></html>\n");
        Ok(html)
    }

    async fn get(&self, req: &DavRequest, with_body: bool) -> DavResult<Response<Bytes>> {
        let meta = self.fs.stat(&req.path).await?;
        let (content_type, data) = if meta.is_collection {
            if !self.config.listings {
                return self.method_not_allowed(Some(&meta));
            }
            (
                "text/html; charset=utf-8",
                Bytes::from(self.listing(&req.path).await?),
            )
        } else {
            (
                props::content_type(&req.path),
                self.fs.open(&req.path).await?.read().await?,
            )
        };

        let len = data.len();
        let mut response = Response::new(if with_body { data } else { Bytes::new() });
        let headers = response.headers_mut();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        headers.insert(header::CONTENT_LENGTH, len.into());
        headers.insert(
            header::LAST_MODIFIED,
            header_value(&props::http_date(meta.modified))?,
        );
        if !meta.is_collection {
            headers.insert(header::ETAG, header_value(&meta.etag())?);
        }
        Ok(response)
    }

    async fn put(&self, req: &DavRequest) -> DavResult<Response<Bytes>> {
        self.gate(req, &req.path)?;
        if let Ok(meta) = self.fs.stat(&req.path).await {
            if meta.is_collection {
                return self.method_not_allowed(Some(&meta));
            }
        }
        let created = self.fs.write(&req.path, req.body.clone()).await?;
        info!(path = %req.path, bytes = req.body.len(), created, "put");
        Ok(status_response(if created {
            StatusCode::CREATED
        } else {
            StatusCode::NO_CONTENT
        }))
    }

    async fn mkcol(&self, req: &DavRequest) -> DavResult<Response<Bytes>> {
        self.gate(req, &req.path)?;
        if let Ok(meta) = self.fs.stat(&req.path).await {
            return self.method_not_allowed(Some(&meta));
        }
        if !req.body.is_empty() {
            let status = match xml::parse(&req.body) {
                Ok(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                Err(_) => StatusCode::BAD_REQUEST,
            };
            return Err(DavError::Status(status));
        }
        self.fs.mkdir(&req.path).await?;
        info!(path = %req.path, "mkcol");
        Ok(status_response(StatusCode::CREATED))
    }

    async fn delete(&self, req: &DavRequest) -> DavResult<Response<Bytes>> {
        if matches!(headers::depth(&req.headers)?, Some(Depth::Zero | Depth::One)) {
            return Err(DavError::Status(StatusCode::BAD_REQUEST));
        }
        self.gate(req, &req.path)?;
        if req.path.is_root() {
            return Err(DavError::Status(StatusCode::FORBIDDEN));
        }
        let gate = Precondition::new(&self.locks, &req.conditions);
        let outcomes = CollectionOps::new(self.fs.as_ref(), &gate)
            .delete(&req.path)
            .await?;
        // Locked members reported in the 207 were removed with the
        // collection; their locks go too.
        if !self.fs.exists(&req.path).await {
            self.locks.release_subtree(&req.path);
        }
        info!(path = %req.path, failures = outcomes.len(), "delete");
        Ok(self.outcome_response(outcomes, StatusCode::NO_CONTENT))
    }

    async fn transfer(&self, req: &DavRequest, is_move: bool) -> DavResult<Response<Bytes>> {
        let dst = headers::destination(&req.headers, &self.resolver)?;
        let overwrite = headers::overwrite(&req.headers)?;
        let depth = match headers::depth(&req.headers)? {
            None | Some(Depth::Infinity) => Depth::Infinity,
            Some(Depth::Zero) if !is_move => Depth::Zero,
            Some(_) => return Err(DavError::Status(StatusCode::BAD_REQUEST)),
        };

        let gate = Precondition::new(&self.locks, &req.conditions);
        if is_move {
            gate.evaluate(&req.path)?;
        }
        gate.evaluate(&dst)?;

        let ops = CollectionOps::new(self.fs.as_ref(), &gate);
        let transfer = if is_move {
            ops.move_to(&req.path, &dst, overwrite).await?
        } else {
            ops.copy(&req.path, &dst, overwrite, depth).await?
        };
        if is_move && !self.fs.exists(&req.path).await {
            self.locks.release_subtree(&req.path);
        }
        info!(
            src = %req.path,
            %dst,
            is_move,
            created = transfer.created,
            failures = transfer.outcomes.len(),
            "transfer"
        );
        let success = if transfer.created {
            StatusCode::CREATED
        } else {
            StatusCode::NO_CONTENT
        };
        Ok(self.outcome_response(transfer.outcomes, success))
    }

    async fn propfind(&self, req: &DavRequest) -> DavResult<Response<Bytes>> {
        if !self.config.listings {
            let meta = self.fs.stat(&req.path).await.ok();
            return self.method_not_allowed(meta.as_ref());
        }
        let depth = match headers::depth(&req.headers)? {
            Some(Depth::Zero) => Depth::Zero,
            Some(Depth::One) => Depth::One,
            None | Some(Depth::Infinity) if self.config.allow_infinite_propfind => Depth::Infinity,
            None | Some(Depth::Infinity) => {
                return Err(DavError::Precondition {
                    status: StatusCode::FORBIDDEN,
                    condition: "propfind-finite-depth",
                })
            }
        };
        let request = PropFind::parse(&req.body)?;
        let ms = PropertyEngine::new(self.fs.as_ref(), &self.locks, &self.resolver)
            .discover(&req.path, depth, &request)
            .await?;
        Ok(ms.into_response())
    }

    async fn proppatch(&self, req: &DavRequest) -> DavResult<Response<Bytes>> {
        self.gate(req, &req.path)?;
        let patches = parse_propertyupdate(&req.body)?;
        let ms = PropertyEngine::new(self.fs.as_ref(), &self.locks, &self.resolver)
            .patch(&req.path, patches)
            .await?;
        Ok(ms.into_response())
    }
}
