//! LOCK and UNLOCK.

use bytes::Bytes;
use http::{Response, StatusCode};
use tracing::info;

use super::{header_value, DavHandler, DavRequest};
use crate::error::{status_response, DavError, DavResult};
use crate::headers::{self, Depth};
use crate::lock::{Lock, LockDepth, LockScope};
use crate::multistatus::xml_response;
use crate::props::lock_discovery;
use crate::xml::{self, Element, XmlError};

/// Parsed `DAV:lockinfo` body.
#[derive(Debug, PartialEq)]
struct LockInfo {
    scope: LockScope,
    owner: Option<Element>,
}

impl LockInfo {
    fn parse(body: &[u8]) -> Result<Self, XmlError> {
        let root = xml::parse(body)?;
        if !root.is_dav("lockinfo") {
            return Err(XmlError::Malformed("expected DAV:lockinfo".into()));
        }
        let scope = match root
            .dav_child("lockscope")
            .and_then(|s| s.elements().next())
        {
            Some(s) if s.is_dav("exclusive") => LockScope::Exclusive,
            Some(s) if s.is_dav("shared") => LockScope::Shared,
            _ => return Err(XmlError::Malformed("missing or unknown lockscope".into())),
        };
        let write = root
            .dav_child("locktype")
            .map(|t| t.elements().any(|e| e.is_dav("write")))
            .unwrap_or(false);
        if !write {
            return Err(XmlError::Malformed("only write locks are supported".into()));
        }
        Ok(LockInfo {
            scope,
            owner: root.dav_child("owner").cloned(),
        })
    }
}

impl DavHandler {
    fn lock_response(&self, lock: &Lock, status: StatusCode) -> Response<Bytes> {
        let body = Element::dav("prop").with_child(lock_discovery(
            std::slice::from_ref(lock),
            &self.resolver,
        ));
        xml_response(status, &body)
    }

    pub(super) async fn lock(&self, req: &DavRequest) -> DavResult<Response<Bytes>> {
        let timeout = headers::timeout(
            &req.headers,
            self.config.lock_timeout(),
            self.config.max_lock_timeout(),
        )?;
        if req.body.iter().all(u8::is_ascii_whitespace) {
            return self.refresh(req, timeout);
        }

        let info = LockInfo::parse(&req.body)?;
        let depth = match headers::depth(&req.headers)? {
            None | Some(Depth::Infinity) => LockDepth::Infinity,
            Some(Depth::Zero) => LockDepth::Zero,
            Some(Depth::One) => return Err(DavError::Status(StatusCode::BAD_REQUEST)),
        };

        let lock = self
            .locks
            .acquire(&req.path, info.scope, depth, timeout, info.owner)?;
        let mut status = StatusCode::OK;
        if !self.fs.exists(&req.path).await {
            if let Err(err) = self.fs.write(&req.path, Bytes::new()).await {
                self.locks.release(&lock.token).ok();
                return Err(err.into());
            }
            status = StatusCode::CREATED;
        }
        info!(path = %req.path, token = %lock.token, created = status == StatusCode::CREATED, "lock");

        let mut response = self.lock_response(&lock, status);
        response.headers_mut().insert(
            headers::LOCK_TOKEN,
            header_value(&format!("<{}>", lock.token))?,
        );
        Ok(response)
    }

    /// LOCK without a body: restart the timer of a lock named in `If`.
    fn refresh(
        &self,
        req: &DavRequest,
        timeout: Option<std::time::Duration>,
    ) -> DavResult<Response<Bytes>> {
        if !req.conditions.has_if() {
            return Err(DavError::Status(StatusCode::BAD_REQUEST));
        }
        let current = req
            .conditions
            .tokens_for(&req.path)
            .iter()
            .filter_map(|token| self.locks.find(token))
            .find(|lock| lock.covers(&req.path))
            .ok_or(DavError::Status(StatusCode::PRECONDITION_FAILED))?;
        let lock = self.locks.refresh(&current.token, timeout)?;
        Ok(self.lock_response(&lock, StatusCode::OK))
    }

    pub(super) async fn unlock(&self, req: &DavRequest) -> DavResult<Response<Bytes>> {
        let token = req
            .conditions
            .lock_token()
            .ok_or(DavError::Status(StatusCode::BAD_REQUEST))?;
        if let Some(lock) = self.locks.find(token) {
            if !lock.covers(&req.path) {
                return Err(DavError::Precondition {
                    status: StatusCode::CONFLICT,
                    condition: "lock-token-matches-request-uri",
                });
            }
        }
        self.locks.release(token)?;
        info!(path = %req.path, %token, "unlock");
        Ok(status_response(StatusCode::NO_CONTENT))
    }
}
