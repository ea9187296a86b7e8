//! Core item data types.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What kind of conversion an item needs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// Office/text documents (pdf, docx, txt, ...).
    Document,
    /// Audio files, transcribed server-side.
    Audio,
    /// Video files, transcribed server-side.
    Video,
    /// Structured data files (csv, xlsx, ...), rendered as tables.
    Data,
    /// A single web page.
    Url,
    /// A site crawl rooted at one URL.
    ParentUrl,
}

impl ItemKind {
    /// Whether items of this kind are backed by a local file.
    pub fn is_file_backed(&self) -> bool {
        matches!(self, Self::Document | Self::Audio | Self::Video | Self::Data)
    }

    /// Whether this kind needs a caller-supplied credential before dispatch.
    ///
    /// Audio/video transcription and anything URL-derived are metered
    /// server-side, so they are credential-gated.
    pub fn requires_credential(&self) -> bool {
        matches!(self, Self::Audio | Self::Video | Self::Url | Self::ParentUrl)
    }

    /// Whether this is a plain document-class upload (document or data).
    ///
    /// Batches made up entirely of plain documents are dispatched per item
    /// rather than as one multipart batch.
    pub fn is_plain_document(&self) -> bool {
        matches!(self, Self::Document | Self::Data)
    }

    /// Short name used in messages and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Data => "data",
            Self::Url => "url",
            Self::ParentUrl => "parent_url",
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an item's content comes from.
///
/// Exactly one of file/url, enforced by the type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ItemSource {
    /// A local file, exclusively owned by the item.
    File { path: PathBuf },
    /// A canonical absolute URL (lowercase, no trailing slash).
    Url { url: String },
}

/// Per-item conversion parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConversionOptions {
    /// Crawl depth for parent-URL items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crawl_depth: Option<u32>,

    /// Maximum pages to crawl for parent-URL items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<u32>,

    /// Include images in the converted output.
    #[serde(default)]
    pub include_images: bool,
}

impl ConversionOptions {
    /// Options for a site crawl.
    pub fn crawl(depth: u32, max_pages: u32) -> Self {
        Self {
            crawl_depth: Some(depth),
            max_pages: Some(max_pages),
            include_images: false,
        }
    }
}

/// A raw, not-yet-validated user input.
#[derive(Debug, Clone)]
pub enum RawItem {
    /// A local file to upload.
    File {
        path: PathBuf,
        options: ConversionOptions,
    },
    /// A URL; `crawl` selects the parent-URL (site crawl) kind.
    Url {
        url: String,
        crawl: bool,
        options: ConversionOptions,
    },
}

impl RawItem {
    /// A file item with default options.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File {
            path: path.into(),
            options: ConversionOptions::default(),
        }
    }

    /// A single-page URL item with default options.
    pub fn url(url: impl Into<String>) -> Self {
        Self::Url {
            url: url.into(),
            crawl: false,
            options: ConversionOptions::default(),
        }
    }

    /// A site-crawl URL item.
    pub fn parent_url(url: impl Into<String>, options: ConversionOptions) -> Self {
        Self::Url {
            url: url.into(),
            crawl: true,
            options,
        }
    }
}

/// A validated, normalized conversion item.
///
/// Immutable after normalization; per-run status lives in the
/// orchestrator's item registry, not here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversionItem {
    /// Unique id within a batch.
    pub id: String,
    /// Display name (file name, or the canonical URL).
    pub name: String,
    /// Conversion kind.
    pub kind: ItemKind,
    /// Content source; exactly one of file/url.
    pub source: ItemSource,
    /// File size in bytes; 0 for URL-backed items.
    pub size_bytes: u64,
    /// Conversion parameters.
    #[serde(default)]
    pub options: ConversionOptions,
    /// Whether dispatch requires a credential.
    pub requires_credential: bool,
}

impl ConversionItem {
    /// The local path, for file-backed items.
    pub fn source_path(&self) -> Option<&Path> {
        match &self.source {
            ItemSource::File { path } => Some(path),
            ItemSource::Url { .. } => None,
        }
    }

    /// The canonical URL, for URL-backed items.
    pub fn source_url(&self) -> Option<&str> {
        match &self.source {
            ItemSource::File { .. } => None,
            ItemSource::Url { url } => Some(url),
        }
    }
}

/// Per-run status of an item, tracked by the orchestrator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Not yet dispatched.
    Pending,
    /// Dispatched and being converted.
    Converting,
    /// Conversion finished successfully.
    Completed,
    /// Conversion failed for this item.
    Error,
    /// Cancelled before reaching a terminal state.
    Cancelled,
}

impl ItemStatus {
    /// Terminal statuses receive no further updates.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }
}
