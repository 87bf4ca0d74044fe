//! Mapping between request addresses and canonical resource identifiers.
//!
//! A [`DavPath`] is the slash separated, percent-decoded path of a resource
//! relative to the served root. The root collection is the empty path.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::fmt;

/// Bytes left unescaped inside a single path segment.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Canonical resource identifier.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DavPath(String);

impl DavPath {
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Normalize an already decoded path. Empty and `.` segments are dropped,
    /// `..` removes the previous segment but never climbs above the root.
    pub fn parse(path: &str) -> Self {
        let mut segments: Vec<&str> = Vec::new();
        for segment in path.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                s => segments.push(s),
            }
        }
        Self(segments.join("/"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Last segment, empty for the root.
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }

    pub fn parent(&self) -> Option<DavPath> {
        if self.is_root() {
            return None;
        }
        Some(match self.0.rfind('/') {
            Some(idx) => Self(self.0[..idx].to_string()),
            None => Self::root(),
        })
    }

    /// Child identifier. A trailing slash on `name` (as storage listings
    /// use for collections) is ignored.
    pub fn join(&self, name: &str) -> DavPath {
        let name = name.trim_matches('/');
        if self.is_root() {
            Self::parse(name)
        } else {
            Self::parse(&format!("{}/{}", self.0, name))
        }
    }

    /// True when `other` lies strictly below `self`.
    pub fn is_ancestor_of(&self, other: &DavPath) -> bool {
        if self.is_root() {
            return !other.is_root();
        }
        other.0.len() > self.0.len()
            && other.0.starts_with(&self.0)
            && other.0.as_bytes()[self.0.len()] == b'/'
    }

    /// `self` equals `other` or is one of its ancestors.
    pub fn contains(&self, other: &DavPath) -> bool {
        self == other || self.is_ancestor_of(other)
    }

    /// Move `self` from below `from` to the same place below `to`.
    pub fn rebase(&self, from: &DavPath, to: &DavPath) -> Option<DavPath> {
        if !from.contains(self) {
            return None;
        }
        let rest = self.0[from.0.len()..].trim_start_matches('/');
        Some(to.join(rest))
    }
}

impl fmt::Display for DavPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0)
    }
}

/// Converts between request addresses and [`DavPath`]s, honoring the
/// prefix the server is mounted under.
#[derive(Clone, Debug, Default)]
pub struct PathResolver {
    prefix: String,
}

impl PathResolver {
    pub fn new(prefix: &str) -> Self {
        let prefix = prefix.trim_matches('/');
        Self {
            prefix: if prefix.is_empty() {
                String::new()
            } else {
                format!("/{prefix}")
            },
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Resolve the path component of a request URI. Returns `None` when the
    /// address is not below the configured prefix.
    pub fn to_identifier(&self, address: &str) -> Option<DavPath> {
        let rest = if self.prefix.is_empty() {
            address
        } else {
            let rest = address.strip_prefix(&self.prefix)?;
            if !(rest.is_empty() || rest.starts_with('/')) {
                return None;
            }
            rest
        };
        let decoded = percent_decode_str(rest).decode_utf8_lossy();
        Some(DavPath::parse(&decoded))
    }

    /// Inverse of [`to_identifier`](Self::to_identifier).
    pub fn to_address(&self, path: &DavPath) -> String {
        let mut out = String::with_capacity(self.prefix.len() + path.as_str().len() + 1);
        out.push_str(&self.prefix);
        if path.is_root() {
            out.push('/');
            return out;
        }
        for segment in path.segments() {
            out.push('/');
            out.extend(utf8_percent_encode(segment, SEGMENT));
        }
        out
    }

    /// Address used in `href` elements; collections get a trailing slash.
    pub fn href(&self, path: &DavPath, is_collection: bool) -> String {
        let mut address = self.to_address(path);
        if is_collection && !address.ends_with('/') {
            address.push('/');
        }
        address
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_separators() {
        assert_eq!(DavPath::parse("//a///b/").as_str(), "a/b");
        assert_eq!(DavPath::parse("/").as_str(), "");
        assert_eq!(DavPath::parse("a/./b/../c").as_str(), "a/c");
        assert_eq!(DavPath::parse("../../etc").as_str(), "etc");
    }

    #[test]
    fn root_address_maps_to_root() {
        let resolver = PathResolver::default();
        assert!(resolver.to_identifier("").unwrap().is_root());
        assert!(resolver.to_identifier("/").unwrap().is_root());
        assert_eq!(resolver.to_address(&DavPath::root()), "/");
    }

    #[test]
    fn round_trip_through_address() {
        let resolver = PathResolver::new("/dav/");
        for raw in ["", "a", "a/b c", "dir/ünï/x%y", "q?#"] {
            let path = DavPath::parse(raw);
            let address = resolver.to_address(&path);
            let back = resolver.to_identifier(&address).unwrap();
            assert_eq!(back, path);
            assert_eq!(resolver.to_address(&back), address);
        }
    }

    #[test]
    fn prefix_is_enforced() {
        let resolver = PathResolver::new("dav");
        assert_eq!(resolver.to_identifier("/dav/x").unwrap().as_str(), "x");
        assert!(resolver.to_identifier("/dav").unwrap().is_root());
        assert!(resolver.to_identifier("/davx/y").is_none());
        assert!(resolver.to_identifier("/other").is_none());
    }

    #[test]
    fn ancestry() {
        let root = DavPath::root();
        let a = DavPath::parse("a");
        let ab = DavPath::parse("a/b");
        let abc = DavPath::parse("abc");
        assert!(root.is_ancestor_of(&a));
        assert!(a.is_ancestor_of(&ab));
        assert!(!a.is_ancestor_of(&abc));
        assert!(!a.is_ancestor_of(&a));
        assert!(a.contains(&a));
        assert_eq!(ab.parent(), Some(a.clone()));
        assert_eq!(a.parent(), Some(root.clone()));
        assert_eq!(root.parent(), None);
        assert_eq!(
            ab.rebase(&a, &DavPath::parse("z")),
            Some(DavPath::parse("z/b"))
        );
        assert_eq!(a.join("child/").as_str(), "a/child");
    }

    #[test]
    fn collection_href_has_trailing_slash() {
        let resolver = PathResolver::default();
        assert_eq!(resolver.href(&DavPath::parse("b"), true), "/b/");
        assert_eq!(resolver.href(&DavPath::parse("a"), false), "/a");
        assert_eq!(resolver.href(&DavPath::root(), true), "/");
    }
}
