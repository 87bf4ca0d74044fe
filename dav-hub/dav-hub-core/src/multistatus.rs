//! `207 Multi-Status` bodies.

use bytes::Bytes;
use http::{header, Response, StatusCode};

use crate::path::{DavPath, PathResolver};
use crate::xml::Element;

pub const XML_CONTENT_TYPE: &str = "application/xml; charset=utf-8";

/// Result of one operation on one resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outcome {
    pub path: DavPath,
    pub status: StatusCode,
}

impl Outcome {
    pub fn new(path: DavPath, status: StatusCode) -> Self {
        Self { path, status }
    }
}

/// Properties sharing one status inside a `DAV:response`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropStat {
    pub status: StatusCode,
    pub props: Vec<Element>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Entry {
    Status { href: String, status: StatusCode },
    PropStat { href: String, propstats: Vec<PropStat> },
}

/// `HTTP/1.1 423 Locked`
pub fn status_line(status: StatusCode) -> String {
    format!(
        "HTTP/1.1 {} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or_default()
    )
}

/// Ordered collection of per-resource results. Entries are rendered in
/// insertion order.
#[derive(Clone, Debug, Default)]
pub struct MultiStatus {
    entries: Vec<Entry>,
}

impl MultiStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_outcomes(outcomes: &[Outcome], resolver: &PathResolver) -> Self {
        let mut ms = Self::new();
        for outcome in outcomes {
            ms.push_status(resolver.to_address(&outcome.path), outcome.status);
        }
        ms
    }

    pub fn push_status(&mut self, href: String, status: StatusCode) {
        self.entries.push(Entry::Status { href, status });
    }

    pub fn push_propstats(&mut self, href: String, propstats: Vec<PropStat>) {
        self.entries.push(Entry::PropStat { href, propstats });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn to_xml(&self) -> Element {
        let mut root = Element::dav("multistatus");
        for entry in &self.entries {
            let response = match entry {
                Entry::Status { href, status } => Element::dav("response")
                    .with_child(Element::dav("href").with_text(href.clone()))
                    .with_child(Element::dav("status").with_text(status_line(*status))),
                Entry::PropStat { href, propstats } => {
                    let mut response = Element::dav("response")
                        .with_child(Element::dav("href").with_text(href.clone()));
                    for propstat in propstats {
                        let mut prop = Element::dav("prop");
                        for p in &propstat.props {
                            prop.push(p.clone());
                        }
                        response.push(
                            Element::dav("propstat")
                                .with_child(prop)
                                .with_child(
                                    Element::dav("status").with_text(status_line(propstat.status)),
                                ),
                        );
                    }
                    response
                }
            };
            root.push(response);
        }
        root
    }

    pub fn into_response(self) -> Response<Bytes> {
        xml_response(StatusCode::MULTI_STATUS, &self.to_xml())
    }
}

/// Response carrying an XML document with exact length and content type.
pub fn xml_response(status: StatusCode, body: &Element) -> Response<Bytes> {
    let body = Bytes::from(body.to_document());
    let len = body.len();
    let mut response = Response::new(body);
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static(XML_CONTENT_TYPE),
    );
    headers.insert(header::CONTENT_LENGTH, len.into());
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_lines_use_reason_phrases() {
        assert_eq!(status_line(StatusCode::LOCKED), "HTTP/1.1 423 Locked");
        assert_eq!(
            status_line(StatusCode::INTERNAL_SERVER_ERROR),
            "HTTP/1.1 500 Internal Server Error"
        );
    }

    #[test]
    fn outcomes_render_in_insertion_order() {
        let resolver = PathResolver::new("/dav");
        let outcomes = vec![
            Outcome::new(DavPath::parse("z/locked"), StatusCode::LOCKED),
            Outcome::new(DavPath::parse("a/broken file"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        let ms = MultiStatus::from_outcomes(&outcomes, &resolver);
        assert_eq!(ms.len(), 2);
        let response = ms.into_response();
        assert_eq!(response.status(), StatusCode::MULTI_STATUS);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            XML_CONTENT_TYPE
        );
        assert_eq!(
            response.headers()[header::CONTENT_LENGTH],
            response.body().len().to_string().as_str()
        );
        let body = std::str::from_utf8(response.body()).unwrap();
        let locked = body.find("<D:href>/dav/z/locked</D:href>").unwrap();
        let broken = body.find("<D:href>/dav/a/broken%20file</D:href>").unwrap();
        assert!(locked < broken);
        assert!(body.contains("<D:status>HTTP/1.1 423 Locked</D:status>"));
        assert!(body.starts_with(r#"<?xml version="1.0" encoding="utf-8"?><D:multistatus xmlns:D="DAV:">"#));
    }

    #[test]
    fn propstat_entries_group_properties() {
        let mut ms = MultiStatus::new();
        ms.push_propstats(
            "/a".into(),
            vec![
                PropStat {
                    status: StatusCode::OK,
                    props: vec![Element::dav("getcontentlength").with_text("3")],
                },
                PropStat {
                    status: StatusCode::NOT_FOUND,
                    props: vec![Element::dav("getetag")],
                },
            ],
        );
        let xml = ms.to_xml().to_document();
        assert!(xml.contains(
            "<D:propstat><D:prop><D:getcontentlength>3</D:getcontentlength></D:prop><D:status>HTTP/1.1 200 OK</D:status></D:propstat>"
        ));
        assert!(xml.contains("<D:prop><D:getetag/></D:prop><D:status>HTTP/1.1 404 Not Found</D:status>"));
    }
}
