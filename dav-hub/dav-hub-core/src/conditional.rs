//! Conditional request evaluation: the `If` and `Lock-Token` headers.
//!
//! The `If` header follows RFC 4918 section 10.4: a sequence of lists, each
//! optionally preceded by a resource tag. Lists are OR-ed, the conditions
//! inside one list are AND-ed, and every condition is a state token
//! (`<opaquelocktoken:...>`) or an entity tag (`["..."]`), optionally
//! negated with `Not`.
//!
//! A lock token counts as *submitted* for a resource when it appears,
//! un-negated, in an untagged list, in a list tagged with that resource or
//! one of its ancestors, or in the `Lock-Token` header.

use crate::lock::LockManager;
use crate::path::{DavPath, PathResolver};
use crate::storage::FileSystem;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConditionError {
    #[error("invalid If header: {0}")]
    InvalidIf(String),
    #[error("invalid Lock-Token header")]
    InvalidLockToken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    StateToken(String),
    ETag(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    pub not: bool,
    pub condition: Condition,
}

/// Resource a list applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// No tag: the request URI.
    Untagged,
    Resource(DavPath),
    /// Tag naming something outside this server.
    Foreign,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfList {
    pub target: Target,
    pub predicates: Vec<Predicate>,
}

struct Cursor<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn skip_ws(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn eat(&mut self, c: char) -> bool {
        if self.rest().starts_with(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    fn until(&mut self, end: char) -> Result<&'a str, ConditionError> {
        let rest = self.rest();
        let idx = rest
            .find(end)
            .ok_or_else(|| ConditionError::InvalidIf(format!("missing '{end}'")))?;
        self.pos += idx + end.len_utf8();
        Ok(&rest[..idx])
    }
}

/// Parse an `If` header into its lists, resolving resource tags.
pub fn parse_if(header: &str, resolver: &PathResolver) -> Result<Vec<IfList>, ConditionError> {
    let mut cursor = Cursor {
        input: header,
        pos: 0,
    };
    let mut lists = Vec::new();
    let mut target = Target::Untagged;
    loop {
        cursor.skip_ws();
        if cursor.rest().is_empty() {
            break;
        }
        if cursor.eat('<') {
            let tag = cursor.until('>')?;
            target = resolve_tag(tag, resolver);
            continue;
        }
        if !cursor.eat('(') {
            return Err(ConditionError::InvalidIf(format!(
                "unexpected input at {}",
                cursor.pos
            )));
        }
        let mut predicates = Vec::new();
        loop {
            cursor.skip_ws();
            if cursor.eat(')') {
                break;
            }
            let not = cursor
                .rest()
                .get(..3)
                .map(|w| w.eq_ignore_ascii_case("not"))
                .unwrap_or(false);
            if not {
                cursor.pos += 3;
                cursor.skip_ws();
            }
            let condition = if cursor.eat('<') {
                Condition::StateToken(cursor.until('>')?.trim().to_string())
            } else if cursor.eat('[') {
                Condition::ETag(cursor.until(']')?.trim().to_string())
            } else {
                return Err(ConditionError::InvalidIf(format!(
                    "expected condition at {}",
                    cursor.pos
                )));
            };
            predicates.push(Predicate { not, condition });
        }
        if predicates.is_empty() {
            return Err(ConditionError::InvalidIf("empty list".into()));
        }
        lists.push(IfList {
            target: target.clone(),
            predicates,
        });
    }
    if lists.is_empty() {
        return Err(ConditionError::InvalidIf("no condition lists".into()));
    }
    Ok(lists)
}

fn resolve_tag(tag: &str, resolver: &PathResolver) -> Target {
    let uri_path = match tag.parse::<http::Uri>() {
        Ok(uri) => uri.path().to_string(),
        Err(_) => return Target::Foreign,
    };
    match resolver.to_identifier(&uri_path) {
        Some(path) => Target::Resource(path),
        None => Target::Foreign,
    }
}

/// Parse a `Lock-Token` header value (`<token>`).
pub fn parse_lock_token(header: &str) -> Result<String, ConditionError> {
    let token = header
        .trim()
        .strip_prefix('<')
        .and_then(|t| t.strip_suffix('>'))
        .ok_or(ConditionError::InvalidLockToken)?
        .trim();
    if token.is_empty() {
        return Err(ConditionError::InvalidLockToken);
    }
    Ok(token.to_string())
}

/// Everything a request asserts through its conditional headers.
#[derive(Debug, Clone, Default)]
pub struct Conditions {
    lists: Vec<IfList>,
    lock_token: Option<String>,
}

fn etag_matches(wanted: &str, actual: &str) -> bool {
    wanted.trim_start_matches("W/") == actual.trim_start_matches("W/")
}

impl Conditions {
    pub fn from_headers(
        if_header: Option<&str>,
        lock_token: Option<&str>,
        resolver: &PathResolver,
    ) -> Result<Self, ConditionError> {
        Ok(Self {
            lists: match if_header {
                Some(h) => parse_if(h, resolver)?,
                None => Vec::new(),
            },
            lock_token: lock_token.map(parse_lock_token).transpose()?,
        })
    }

    pub fn has_if(&self) -> bool {
        !self.lists.is_empty()
    }

    pub fn lock_token(&self) -> Option<&str> {
        self.lock_token.as_deref()
    }

    fn applies_to(target: &Target, path: &DavPath) -> bool {
        match target {
            Target::Untagged => true,
            Target::Resource(tagged) => tagged.contains(path),
            Target::Foreign => false,
        }
    }

    /// Whether `token` was submitted for `path`.
    pub fn submits(&self, path: &DavPath, token: &str) -> bool {
        if self.lock_token.as_deref() == Some(token) {
            return true;
        }
        self.lists
            .iter()
            .filter(|list| Self::applies_to(&list.target, path))
            .flat_map(|list| list.predicates.iter())
            .any(|p| !p.not && p.condition == Condition::StateToken(token.to_string()))
    }

    /// State tokens submitted for `path`, in header order.
    pub fn tokens_for(&self, path: &DavPath) -> Vec<String> {
        let mut tokens: Vec<String> = self
            .lists
            .iter()
            .filter(|list| Self::applies_to(&list.target, path))
            .flat_map(|list| list.predicates.iter())
            .filter_map(|p| match (&p.condition, p.not) {
                (Condition::StateToken(t), false) => Some(t.clone()),
                _ => None,
            })
            .collect();
        if let Some(token) = &self.lock_token {
            if !tokens.contains(token) {
                tokens.push(token.clone());
            }
        }
        tokens
    }

    /// Evaluate the `If` header as a whole against the request URI. True
    /// when no `If` header was sent.
    pub async fn holds(&self, request: &DavPath, locks: &LockManager, fs: &dyn FileSystem) -> bool {
        if self.lists.is_empty() {
            return true;
        }
        for list in &self.lists {
            let resource = match &list.target {
                Target::Untagged => request.clone(),
                Target::Resource(path) => path.clone(),
                Target::Foreign => continue,
            };
            let mut etag = None;
            let mut all = true;
            for predicate in &list.predicates {
                let value = match &predicate.condition {
                    Condition::StateToken(token) => locks
                        .find(token)
                        .map(|lock| lock.covers(&resource))
                        .unwrap_or(false),
                    Condition::ETag(wanted) => {
                        if etag.is_none() {
                            etag = Some(fs.stat(&resource).await.ok().map(|m| m.etag()));
                        }
                        etag.as_ref()
                            .and_then(|e| e.as_deref())
                            .map(|actual| etag_matches(wanted, actual))
                            .unwrap_or(false)
                    }
                };
                if value == predicate.not {
                    all = false;
                    break;
                }
            }
            if all {
                return true;
            }
        }
        false
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{path} is locked")]
pub struct Locked {
    pub path: DavPath,
}

/// Lock gate for mutating operations.
///
/// A resource with no covering lock always passes. A covered resource
/// passes only when the request submitted the token of one of the locks
/// covering it.
pub struct Precondition<'a> {
    locks: &'a LockManager,
    conditions: &'a Conditions,
}

impl<'a> Precondition<'a> {
    pub fn new(locks: &'a LockManager, conditions: &'a Conditions) -> Self {
        Self { locks, conditions }
    }

    pub fn evaluate(&self, path: &DavPath) -> Result<(), Locked> {
        let covering = self.locks.covering(path);
        if covering.is_empty()
            || covering
                .iter()
                .any(|lock| self.conditions.submits(path, &lock.token))
        {
            Ok(())
        } else {
            Err(Locked { path: path.clone() })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::{LockDepth, LockScope};
    use crate::storage::MemFs;
    use bytes::Bytes;
    use std::time::Duration;

    fn resolver() -> PathResolver {
        PathResolver::default()
    }

    #[test]
    fn parses_untagged_and_tagged_lists() {
        let lists = parse_if(
            r#"(<opaquelocktoken:a> ["etag1"]) (Not <DAV:no-lock>) <http://host/x/y> (<opaquelocktoken:b>)"#,
            &resolver(),
        )
        .unwrap();
        assert_eq!(lists.len(), 3);
        assert_eq!(lists[0].target, Target::Untagged);
        assert_eq!(
            lists[0].predicates,
            vec![
                Predicate {
                    not: false,
                    condition: Condition::StateToken("opaquelocktoken:a".into())
                },
                Predicate {
                    not: false,
                    condition: Condition::ETag("\"etag1\"".into())
                },
            ]
        );
        assert!(lists[1].predicates[0].not);
        assert_eq!(lists[2].target, Target::Resource(DavPath::parse("x/y")));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_if("", &resolver()).is_err());
        assert!(parse_if("()", &resolver()).is_err());
        assert!(parse_if("(<a>", &resolver()).is_err());
        assert!(parse_if("token", &resolver()).is_err());
        assert!(parse_lock_token("abc").is_err());
        assert_eq!(parse_lock_token(" <opaquelocktoken:x> ").unwrap(), "opaquelocktoken:x");
    }

    #[test]
    fn tagged_tokens_apply_to_the_tagged_subtree_only() {
        let conditions = Conditions::from_headers(
            Some("</dir> (<opaquelocktoken:t>)"),
            None,
            &resolver(),
        )
        .unwrap();
        assert!(conditions.submits(&DavPath::parse("dir"), "opaquelocktoken:t"));
        assert!(conditions.submits(&DavPath::parse("dir/f"), "opaquelocktoken:t"));
        assert!(!conditions.submits(&DavPath::parse("other"), "opaquelocktoken:t"));
    }

    #[test]
    fn negated_tokens_are_not_submitted() {
        let conditions =
            Conditions::from_headers(Some("(Not <opaquelocktoken:t>)"), None, &resolver()).unwrap();
        assert!(!conditions.submits(&DavPath::root(), "opaquelocktoken:t"));
    }

    #[test]
    fn lock_token_header_counts_as_submitted() {
        let conditions =
            Conditions::from_headers(None, Some("<opaquelocktoken:z>"), &resolver()).unwrap();
        assert!(conditions.submits(&DavPath::parse("any"), "opaquelocktoken:z"));
        assert_eq!(conditions.tokens_for(&DavPath::root()), vec!["opaquelocktoken:z"]);
    }

    #[test]
    fn gate_requires_matching_token() {
        let locks = LockManager::new();
        let lock = locks
            .acquire(
                &DavPath::parse("dir"),
                LockScope::Exclusive,
                LockDepth::Infinity,
                Some(Duration::from_secs(60)),
                None,
            )
            .unwrap();

        let none = Conditions::default();
        let gate = Precondition::new(&locks, &none);
        assert!(gate.evaluate(&DavPath::parse("free")).is_ok());
        assert_eq!(
            gate.evaluate(&DavPath::parse("dir/f")).unwrap_err().path,
            DavPath::parse("dir/f")
        );

        let header = format!("(<{}>)", lock.token);
        let with_token = Conditions::from_headers(Some(&header), None, &resolver()).unwrap();
        let gate = Precondition::new(&locks, &with_token);
        assert!(gate.evaluate(&DavPath::parse("dir/f")).is_ok());
    }

    #[tokio::test]
    async fn if_header_truth_uses_locks_and_etags() {
        let fs = MemFs::new();
        fs.write(&DavPath::parse("f"), Bytes::from_static(b"x"))
            .await
            .unwrap();
        let etag = fs.stat(&DavPath::parse("f")).await.unwrap().etag();
        let locks = LockManager::new();
        let lock = locks
            .acquire(
                &DavPath::parse("f"),
                LockScope::Exclusive,
                LockDepth::Zero,
                None,
                None,
            )
            .unwrap();
        let f = DavPath::parse("f");

        let good = Conditions::from_headers(
            Some(&format!("(<{}> [{}])", lock.token, etag)),
            None,
            &resolver(),
        )
        .unwrap();
        assert!(good.holds(&f, &locks, &fs).await);

        let stale = Conditions::from_headers(Some(r#"(["nope"])"#), None, &resolver()).unwrap();
        assert!(!stale.holds(&f, &locks, &fs).await);

        let no_lock =
            Conditions::from_headers(Some("(Not <DAV:no-lock>)"), None, &resolver()).unwrap();
        assert!(no_lock.holds(&f, &locks, &fs).await);

        assert!(Conditions::default().holds(&f, &locks, &fs).await);
    }
}
