//! Path-addressable document model for converted XML.
//!
//! The advisory feed and every per-entry warning report arrive as XML. This
//! module converts the raw bytes into a [`Node`] tree that can be walked with
//! string key paths, mirroring the shape a generic XML-to-JSON conversion
//! would produce:
//!
//! - child elements become mapping keys
//! - an attribute `x="v"` becomes the key `-x`
//! - character data alongside attributes or children lands under `#content`
//! - repeated sibling elements collapse into a sequence
//!
//! [`fetch_document`] is the single retrieval seam: HTTP GET, size-capped
//! body read, then conversion. It imposes no timeout of its own; callers
//! configure that on the `reqwest::Client` they pass in.

use futures::StreamExt;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::ser::{Serialize, Serializer};
use std::collections::BTreeMap;
use thiserror::Error;

/// Maximum document size accepted from a remote server (10 MB).
const MAX_DOCUMENT_SIZE: usize = 10 * 1024 * 1024;

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised while retrieving or navigating a document.
///
/// `Fetch`, `HttpStatus` and `ResponseTooLarge` cover the network leg;
/// `Conversion` covers XML normalization; `PathNotFound` and `TypeMismatch`
/// cover navigation of the converted tree.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// Transport-level failure (DNS, connection, TLS, body read).
    #[error("request failed for {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    /// Server answered with a non-success status code.
    #[error("HTTP error for {url}: status {status}")]
    HttpStatus { url: String, status: u16 },
    /// Response body exceeded the size cap.
    #[error("response too large for {url}")]
    ResponseTooLarge { url: String },
    /// The byte stream could not be normalized into a node tree.
    #[error("failed to convert document: {0}")]
    Conversion(String),
    /// A key in the requested path does not exist in the document.
    #[error("path not found: {0}")]
    PathNotFound(String),
    /// A node was coerced to a shape it does not have.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
}

impl DocumentError {
    /// True for the fetch family of errors (transport, bad status, oversize).
    pub fn is_fetch(&self) -> bool {
        matches!(
            self,
            DocumentError::Fetch { .. }
                | DocumentError::HttpStatus { .. }
                | DocumentError::ResponseTooLarge { .. }
        )
    }
}

// ============================================================================
// Node
// ============================================================================

/// One node of a converted document.
///
/// Serializes as the equivalent JSON value, so a subtree can be persisted
/// verbatim as a record field.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Null,
    Text(String),
    Sequence(Vec<Node>),
    Mapping(BTreeMap<String, Node>),
}

impl Node {
    /// Shape name used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Node::Null => "null",
            Node::Text(_) => "text",
            Node::Sequence(_) => "sequence",
            Node::Mapping(_) => "mapping",
        }
    }

    /// Walk the tree by mapping keys.
    ///
    /// Fails with [`DocumentError::PathNotFound`] as soon as a key is absent.
    /// A non-mapping node has no keys, so descending into one fails the same
    /// way; the error names the longest prefix that could not be resolved.
    pub fn get_by_path(&self, path: &[&str]) -> Result<&Node, DocumentError> {
        let mut node = self;
        for (i, key) in path.iter().enumerate() {
            let next = match node {
                Node::Mapping(map) => map.get(*key),
                _ => None,
            };
            node = next.ok_or_else(|| DocumentError::PathNotFound(path[..=i].join(" -> ")))?;
        }
        Ok(node)
    }

    pub fn as_text(&self) -> Result<&str, DocumentError> {
        match self {
            Node::Text(text) => Ok(text),
            other => Err(DocumentError::TypeMismatch {
                expected: "text",
                found: other.kind(),
            }),
        }
    }

    pub fn as_sequence(&self) -> Result<&[Node], DocumentError> {
        match self {
            Node::Sequence(items) => Ok(items),
            other => Err(DocumentError::TypeMismatch {
                expected: "sequence",
                found: other.kind(),
            }),
        }
    }

    pub fn as_mapping(&self) -> Result<&BTreeMap<String, Node>, DocumentError> {
        match self {
            Node::Mapping(map) => Ok(map),
            other => Err(DocumentError::TypeMismatch {
                expected: "mapping",
                found: other.kind(),
            }),
        }
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Node::Null => serializer.serialize_unit(),
            Node::Text(text) => serializer.serialize_str(text),
            Node::Sequence(items) => serializer.collect_seq(items),
            Node::Mapping(map) => serializer.collect_map(map),
        }
    }
}

// ============================================================================
// XML Conversion
// ============================================================================

/// An element being assembled while its end tag is still pending.
struct PartialElement {
    name: String,
    children: BTreeMap<String, Node>,
    text: String,
}

impl PartialElement {
    fn new(name: String) -> Self {
        Self {
            name,
            children: BTreeMap::new(),
            text: String::new(),
        }
    }

    /// Open an element from its start tag, folding attributes in as `-key`
    /// children.
    fn from_start(start: &BytesStart<'_>) -> Result<Self, DocumentError> {
        let mut element = Self::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
        for attr in start.attributes() {
            let attr = attr.map_err(|e| DocumentError::Conversion(e.to_string()))?;
            let value = attr
                .unescape_value()
                .map_err(|e| DocumentError::Conversion(e.to_string()))?;
            let key = format!("-{}", String::from_utf8_lossy(attr.key.as_ref()));
            element.children.insert(key, Node::Text(value.into_owned()));
        }
        Ok(element)
    }

    fn into_node(mut self) -> Node {
        if self.children.is_empty() {
            return Node::Text(self.text);
        }
        if !self.text.is_empty() {
            self.children.insert("#content".to_string(), Node::Text(self.text));
        }
        Node::Mapping(self.children)
    }
}

/// Insert a finished child, collapsing repeated siblings into a sequence.
fn insert_child(parent: &mut BTreeMap<String, Node>, name: String, node: Node) {
    match parent.get_mut(&name) {
        None => {
            parent.insert(name, node);
        }
        Some(Node::Sequence(items)) => items.push(node),
        Some(existing) => {
            let first = std::mem::replace(existing, Node::Null);
            *existing = Node::Sequence(vec![first, node]);
        }
    }
}

/// Convert an XML byte stream into a node tree.
///
/// The result is a mapping keyed by the root element name, so path lookups
/// start at the root (for an Atom feed: `feed -> entry`).
pub fn from_xml(bytes: &[u8]) -> Result<Node, DocumentError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| DocumentError::Conversion(format!("invalid UTF-8: {}", e)))?;
    let mut reader = Reader::from_str(text);

    // The virtual root holds the document element once it closes.
    let mut stack = vec![PartialElement::new(String::new())];

    loop {
        let event = reader
            .read_event()
            .map_err(|e| DocumentError::Conversion(e.to_string()))?;
        match event {
            Event::Start(start) => {
                stack.push(PartialElement::from_start(&start)?);
            }
            Event::Empty(start) => {
                let element = PartialElement::from_start(&start)?;
                let parent = stack
                    .last_mut()
                    .ok_or_else(|| DocumentError::Conversion("element outside root".into()))?;
                let name = element.name.clone();
                insert_child(&mut parent.children, name, element.into_node());
            }
            Event::Text(t) => {
                let unescaped = t
                    .unescape()
                    .map_err(|e| DocumentError::Conversion(e.to_string()))?;
                let trimmed = unescaped.trim();
                if !trimmed.is_empty() {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(trimmed);
                    }
                }
            }
            Event::CData(t) => {
                let raw = String::from_utf8_lossy(&t.into_inner()).into_owned();
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&raw);
                }
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| DocumentError::Conversion("unbalanced end tag".into()))?;
                let parent = stack
                    .last_mut()
                    .ok_or_else(|| DocumentError::Conversion("unbalanced end tag".into()))?;
                let name = element.name.clone();
                insert_child(&mut parent.children, name, element.into_node());
            }
            Event::Eof => break,
            // Declarations, comments and processing instructions carry no data.
            _ => {}
        }
    }

    if stack.len() != 1 {
        return Err(DocumentError::Conversion("unclosed element".into()));
    }
    let root = stack.pop().map(|e| e.children).unwrap_or_default();
    if root.is_empty() {
        return Err(DocumentError::Conversion("document has no root element".into()));
    }
    Ok(Node::Mapping(root))
}

// ============================================================================
// Retrieval
// ============================================================================

/// Fetch `url` and convert the response body into a node tree.
///
/// Fails with the fetch family of [`DocumentError`] when the request cannot
/// complete or the server answers with a non-success status, and with
/// [`DocumentError::Conversion`] when the body is not well-formed XML.
pub async fn fetch_document(client: &reqwest::Client, url: &str) -> Result<Node, DocumentError> {
    let response = client.get(url).send().await.map_err(|e| DocumentError::Fetch {
        url: url.to_string(),
        source: e,
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(DocumentError::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let bytes = read_limited(response, url, MAX_DOCUMENT_SIZE).await?;
    from_xml(&bytes)
}

async fn read_limited(
    response: reqwest::Response,
    url: &str,
    limit: usize,
) -> Result<Vec<u8>, DocumentError> {
    // Fast path: trust Content-Length when the server sends one.
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(DocumentError::ResponseTooLarge {
                url: url.to_string(),
            });
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| DocumentError::Fetch {
            url: url.to_string(),
            source: e,
        })?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(DocumentError::ResponseTooLarge {
                url: url.to_string(),
            });
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

// ============================================================================
// Tests
// ============================================================================
