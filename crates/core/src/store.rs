//! Result store: the single slot holding the latest downloadable artifact.
//!
//! Explicitly constructed and injected rather than ambient, so tests can
//! substitute their own instance. `set` replaces unconditionally; the
//! orchestrator clears the slot when a new conversion starts and takes it
//! when the caller triggers a download.

use bytes::Bytes;
use chrono::Utc;
use std::sync::Mutex;

use crate::item::ConversionItem;

/// Kind of content held in a conversion result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// A single markdown document.
    Markdown,
    /// A zip (or otherwise opaque binary) archive of documents.
    Archive,
}

impl ContentKind {
    /// Map a declared content type onto a kind.
    ///
    /// `application/zip` and `application/octet-stream` are archives;
    /// markdown and other text types are single documents. No declared
    /// type means archive.
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        match content_type {
            Some(ct) if ct.starts_with("text/") => Self::Markdown,
            _ => Self::Archive,
        }
    }

    /// File extension for artifacts of this kind.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Markdown => "md",
            Self::Archive => "zip",
        }
    }
}

/// A finished conversion artifact.
#[derive(Debug, Clone)]
pub struct ConversionResult {
    /// Raw artifact bytes.
    pub payload: Bytes,
    /// Single document or archive.
    pub content_kind: ContentKind,
    /// Originating items in order, for filename derivation.
    pub source_items: Vec<ConversionItem>,
}

impl ConversionResult {
    /// Derive the download filename.
    ///
    /// A markdown result reuses the first source item's name with its
    /// extension replaced by `.md`; archives and nameless results get a
    /// timestamped name. Collisions are not deduplicated; last write wins.
    pub fn suggested_filename(&self) -> String {
        if self.content_kind == ContentKind::Markdown {
            if let Some(stem) = self.source_items.first().and_then(|i| filename_stem(&i.name)) {
                return format!("{}.md", stem);
            }
        }

        format!(
            "markpress-{}.{}",
            Utc::now().format("%Y%m%d-%H%M%S"),
            self.content_kind.extension()
        )
    }
}

/// Usable stem from an item name: the last path segment, query and
/// extension dropped. Returns `None` when nothing survives.
fn filename_stem(name: &str) -> Option<String> {
    let tail = name.rsplit('/').find(|s| !s.is_empty())?;
    let tail = tail.split('?').next().unwrap_or(tail);
    let stem = match tail.rfind('.') {
        Some(idx) if idx > 0 => &tail[..idx],
        _ => tail,
    };
    let stem = stem.trim();
    if stem.is_empty() || stem.contains(':') {
        None
    } else {
        Some(stem.to_string())
    }
}

/// A payload handed to the caller's save mechanism.
#[derive(Debug, Clone)]
pub struct DownloadArtifact {
    pub filename: String,
    pub content_kind: ContentKind,
    pub payload: Bytes,
}

/// Holds at most one live conversion result.
#[derive(Debug, Default)]
pub struct ResultStore {
    slot: Mutex<Option<ConversionResult>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current result unconditionally.
    pub fn set(&self, result: ConversionResult) {
        *self.slot.lock().expect("result store lock poisoned") = Some(result);
    }

    /// Drop the current result, if any.
    pub fn clear(&self) {
        *self.slot.lock().expect("result store lock poisoned") = None;
    }

    /// Take the result out, leaving the store empty.
    pub fn take(&self) -> Option<ConversionResult> {
        self.slot.lock().expect("result store lock poisoned").take()
    }

    /// Snapshot of the current result.
    pub fn get(&self) -> Option<ConversionResult> {
        self.slot
            .lock()
            .expect("result store lock poisoned")
            .clone()
    }

    pub fn is_empty(&self) -> bool {
        self.slot
            .lock()
            .expect("result store lock poisoned")
            .is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{ConversionOptions, ItemKind, ItemSource};

    fn item_named(name: &str) -> ConversionItem {
        ConversionItem {
            id: "i-1".to_string(),
            name: name.to_string(),
            kind: ItemKind::Document,
            source: ItemSource::File {
                path: "/tmp/x.pdf".into(),
            },
            size_bytes: 1,
            options: ConversionOptions::default(),
            requires_credential: false,
        }
    }

    fn result(kind: ContentKind, items: Vec<ConversionItem>) -> ConversionResult {
        ConversionResult {
            payload: Bytes::from_static(b"# hi"),
            content_kind: kind,
            source_items: items,
        }
    }

    #[test]
    fn test_content_kind_mapping() {
        assert_eq!(
            ContentKind::from_content_type(Some("text/markdown")),
            ContentKind::Markdown
        );
        assert_eq!(
            ContentKind::from_content_type(Some("text/markdown; charset=utf-8")),
            ContentKind::Markdown
        );
        assert_eq!(
            ContentKind::from_content_type(Some("application/zip")),
            ContentKind::Archive
        );
        assert_eq!(
            ContentKind::from_content_type(Some("application/octet-stream")),
            ContentKind::Archive
        );
        assert_eq!(ContentKind::from_content_type(None), ContentKind::Archive);
    }

    #[test]
    fn test_markdown_filename_from_source() {
        let result = result(ContentKind::Markdown, vec![item_named("original.pdf")]);
        assert_eq!(result.suggested_filename(), "original.md");
    }

    #[test]
    fn test_markdown_filename_from_url_name() {
        let result = result(
            ContentKind::Markdown,
            vec![item_named("https://example.com/docs/intro")],
        );
        assert_eq!(result.suggested_filename(), "intro.md");
    }

    #[test]
    fn test_archive_filename_is_timestamped() {
        let result = result(ContentKind::Archive, vec![item_named("original.pdf")]);
        let name = result.suggested_filename();
        assert!(name.starts_with("markpress-"));
        assert!(name.ends_with(".zip"));
    }

    #[test]
    fn test_markdown_filename_without_source_is_timestamped() {
        let result = result(ContentKind::Markdown, vec![]);
        let name = result.suggested_filename();
        assert!(name.starts_with("markpress-"));
        assert!(name.ends_with(".md"));
    }

    #[test]
    fn test_store_replaces_wholesale() {
        let store = ResultStore::new();
        assert!(store.is_empty());

        store.set(result(ContentKind::Markdown, vec![item_named("a.pdf")]));
        store.set(result(ContentKind::Archive, vec![item_named("b.pdf")]));

        let current = store.get().unwrap();
        assert_eq!(current.content_kind, ContentKind::Archive);
        assert_eq!(current.source_items[0].name, "b.pdf");
    }

    #[test]
    fn test_store_take_empties() {
        let store = ResultStore::new();
        store.set(result(ContentKind::Markdown, vec![item_named("a.pdf")]));

        assert!(store.take().is_some());
        assert!(store.is_empty());
        assert!(store.take().is_none());
    }

    #[test]
    fn test_store_clear() {
        let store = ResultStore::new();
        store.set(result(ContentKind::Markdown, vec![item_named("a.pdf")]));
        store.clear();
        assert!(store.get().is_none());
    }
}
