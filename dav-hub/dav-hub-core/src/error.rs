use bytes::Bytes;
use http::{header, Response, StatusCode};

use crate::conditional::{ConditionError, Locked};
use crate::lock::LockError;
use crate::multistatus::xml_response;
use crate::storage::FsError;
use crate::xml::{Element, XmlError};

pub type DavResult<T> = Result<T, DavError>;

/// Errors that end a request with a single status.
#[derive(Debug, thiserror::Error)]
pub enum DavError {
    #[error("{0}")]
    Status(StatusCode),
    /// Status plus a `DAV:error` body naming the failed precondition.
    #[error("{status} ({condition})")]
    Precondition {
        status: StatusCode,
        condition: &'static str,
    },
    #[error(transparent)]
    Storage(#[from] FsError),
    #[error("malformed request body: {0}")]
    Xml(#[from] XmlError),
    #[error(transparent)]
    Condition(#[from] ConditionError),
    #[error(transparent)]
    Locked(#[from] Locked),
    #[error(transparent)]
    Lock(#[from] LockError),
}

impl FsError {
    pub fn status(&self) -> StatusCode {
        match self {
            FsError::NotFound => StatusCode::NOT_FOUND,
            FsError::Exists => StatusCode::METHOD_NOT_ALLOWED,
            FsError::Conflict => StatusCode::CONFLICT,
            FsError::Forbidden => StatusCode::FORBIDDEN,
            FsError::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            FsError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl DavError {
    pub fn status(&self) -> StatusCode {
        match self {
            DavError::Status(status) => *status,
            DavError::Precondition { status, .. } => *status,
            DavError::Storage(err) => err.status(),
            DavError::Xml(_) | DavError::Condition(_) => StatusCode::BAD_REQUEST,
            DavError::Locked(_) => StatusCode::LOCKED,
            DavError::Lock(LockError::Conflict) => StatusCode::LOCKED,
            DavError::Lock(LockError::NotFound) => StatusCode::CONFLICT,
        }
    }

    pub fn into_response(self) -> Response<Bytes> {
        let condition = match &self {
            DavError::Precondition { condition, .. } => Some(*condition),
            DavError::Lock(LockError::Conflict) => Some("no-conflicting-lock"),
            DavError::Lock(LockError::NotFound) => Some("lock-token-matches-request-uri"),
            _ => None,
        };
        let status = self.status();
        match condition {
            Some(condition) => xml_response(
                status,
                &Element::dav("error").with_child(Element::dav(condition)),
            ),
            None => status_response(status),
        }
    }
}

/// Empty response with an explicit zero length.
pub fn status_response(status: StatusCode) -> Response<Bytes> {
    let mut response = Response::new(Bytes::new());
    *response.status_mut() = status;
    if status != StatusCode::NO_CONTENT {
        response
            .headers_mut()
            .insert(header::CONTENT_LENGTH, header::HeaderValue::from_static("0"));
    }
    response
}
