//! Per-entry field extraction, the aggregate record, and key derivation.

use crate::document::{DocumentError, Node};
use serde::Serialize;

/// The aggregate unit stored per feed entry.
///
/// `body` is the warning subtree extracted from the entry's detail report,
/// kept opaque beyond extraction and serialized verbatim as JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub title: String,
    pub name: String,
    pub updated: String,
    pub content: String,
    pub body: Node,
}

/// The scalar fields of one feed entry, pulled out before the detail fetch.
#[derive(Debug, Clone)]
pub struct EntryFields {
    pub title: String,
    pub name: String,
    pub updated: String,
    pub content: String,
    pub link: String,
}

impl EntryFields {
    /// Extract the entry fields from one parsed `<entry>` node.
    ///
    /// These are local lookups against the already-parsed feed, not network
    /// calls. A malformed entry surfaces as `PathNotFound` or `TypeMismatch`
    /// from the underlying accessors rather than being swallowed.
    pub fn from_entry(entry: &Node) -> Result<Self, DocumentError> {
        let title = entry.get_by_path(&["title"])?.as_text()?.to_string();
        let name = entry.get_by_path(&["author", "name"])?.as_text()?.to_string();
        let updated = entry.get_by_path(&["updated"])?.as_text()?.to_string();
        let content = entry
            .get_by_path(&["content", "#content"])?
            .as_text()?
            .to_string();
        let link = entry.get_by_path(&["link", "-href"])?.as_text()?.to_string();
        Ok(Self {
            title,
            name,
            updated,
            content,
            link,
        })
    }

    /// Derived snapshot key, e.g. `気象特別警報・警報・注意報_鳥取地方気象台`.
    ///
    /// Not guaranteed unique across a feed; collisions are last-writer-wins
    /// at the collector.
    pub fn key(&self) -> String {
        format!("{}_{}", self.title, self.name)
    }

    /// Consume the fields and attach the fetched warning body.
    pub fn into_record(self, body: Node) -> Record {
        Record {
            title: self.title,
            name: self.name,
            updated: self.updated,
            content: self.content,
            body,
        }
    }
}
