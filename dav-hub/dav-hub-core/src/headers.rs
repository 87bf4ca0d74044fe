//! Typed views of the WebDAV request headers.

use http::{HeaderMap, StatusCode, Uri};
use std::time::Duration;

use crate::error::{DavError, DavResult};
use crate::path::{DavPath, PathResolver};

pub const DEPTH: &str = "depth";
pub const DESTINATION: &str = "destination";
pub const OVERWRITE: &str = "overwrite";
pub const TIMEOUT: &str = "timeout";
pub const IF: &str = "if";
pub const LOCK_TOKEN: &str = "lock-token";
pub const DAV: &str = "dav";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Depth {
    Zero,
    One,
    Infinity,
}

/// Trimmed header value; a value that is not visible ASCII is a bad request.
pub fn text<'a>(headers: &'a HeaderMap, name: &str) -> DavResult<Option<&'a str>> {
    match headers.get(name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(|v| Some(v.trim()))
            .map_err(|_| DavError::Status(StatusCode::BAD_REQUEST)),
    }
}

/// `Depth` header; `None` when absent.
pub fn depth(headers: &HeaderMap) -> DavResult<Option<Depth>> {
    Ok(match text(headers, DEPTH)? {
        None => None,
        Some("0") => Some(Depth::Zero),
        Some("1") => Some(Depth::One),
        Some(v) if v.eq_ignore_ascii_case("infinity") => Some(Depth::Infinity),
        Some(_) => return Err(DavError::Status(StatusCode::BAD_REQUEST)),
    })
}

/// `Overwrite` header, defaulting to `T`.
pub fn overwrite(headers: &HeaderMap) -> DavResult<bool> {
    match text(headers, OVERWRITE)? {
        None => Ok(true),
        Some(v) if v.eq_ignore_ascii_case("t") => Ok(true),
        Some(v) if v.eq_ignore_ascii_case("f") => Ok(false),
        Some(_) => Err(DavError::Status(StatusCode::BAD_REQUEST)),
    }
}

/// `Timeout` header: the first usable alternative, capped at `max`.
/// `Ok(None)` means an infinite timeout was granted; absence of the header
/// yields `default`.
pub fn timeout(
    headers: &HeaderMap,
    default: Option<Duration>,
    max: Option<Duration>,
) -> DavResult<Option<Duration>> {
    let Some(value) = text(headers, TIMEOUT)? else {
        return Ok(cap(default, max));
    };
    for alternative in value.split(',').map(str::trim) {
        if alternative.eq_ignore_ascii_case("infinite") {
            return Ok(cap(None, max));
        }
        if let Some(secs) = alternative
            .get(..7)
            .filter(|p| p.eq_ignore_ascii_case("second-"))
            .and_then(|_| alternative[7..].parse::<u64>().ok())
        {
            return Ok(cap(Some(Duration::from_secs(secs)), max));
        }
    }
    Ok(cap(default, max))
}

fn cap(timeout: Option<Duration>, max: Option<Duration>) -> Option<Duration> {
    match (timeout, max) {
        (None, max) => max,
        (Some(t), Some(max)) => Some(t.min(max)),
        (Some(t), None) => Some(t),
    }
}

/// Resolve the `Destination` header. An absent or unparsable header is a
/// bad request; a destination outside this server is a bad gateway.
pub fn destination(headers: &HeaderMap, resolver: &PathResolver) -> DavResult<DavPath> {
    let value = text(headers, DESTINATION)?
        .ok_or(DavError::Status(StatusCode::BAD_REQUEST))?;
    let uri: Uri = value
        .parse()
        .map_err(|_| DavError::Status(StatusCode::BAD_REQUEST))?;
    resolver
        .to_identifier(uri.path())
        .ok_or(DavError::Status(StatusCode::BAD_GATEWAY))
}
