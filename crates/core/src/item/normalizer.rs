//! Validation and canonicalization of raw items.

use std::path::Path;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::config::LimitsConfig;

use super::error::ValidationError;
use super::types::{ConversionItem, ItemKind, ItemSource, RawItem};

/// Document extensions handled by the document endpoint.
const DOCUMENT_EXTENSIONS: &[&str] = &[
    "pdf", "docx", "doc", "txt", "md", "html", "htm", "pptx", "epub",
];

/// Structured-data extensions, also handled by the document endpoint.
const DATA_EXTENSIONS: &[&str] = &["csv", "xlsx", "json", "xml"];

/// Audio extensions (transcription).
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a", "flac", "ogg"];

/// Video extensions (transcription).
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "mkv", "webm", "avi"];

/// Infer the conversion kind from a file extension.
fn kind_for_extension(extension: &str) -> Option<ItemKind> {
    let ext = extension.to_lowercase();
    if DOCUMENT_EXTENSIONS.contains(&ext.as_str()) {
        Some(ItemKind::Document)
    } else if DATA_EXTENSIONS.contains(&ext.as_str()) {
        Some(ItemKind::Data)
    } else if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
        Some(ItemKind::Audio)
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(ItemKind::Video)
    } else {
        None
    }
}

/// Canonicalize a URL for display and duplicate detection.
///
/// The whole string is lowercased and the trailing slash is stripped from
/// the path component only; scheme, host, port and query survive.
pub fn canonicalize_url(raw: &str) -> Result<String, ValidationError> {
    let lowered = raw.trim().to_lowercase();
    let parsed = Url::parse(&lowered).map_err(|e| ValidationError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ValidationError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme: {}", parsed.scheme()),
        });
    }

    let host = parsed.host_str().ok_or_else(|| ValidationError::InvalidUrl {
        url: raw.to_string(),
        reason: "missing host".to_string(),
    })?;

    let mut canonical = format!("{}://{}", parsed.scheme(), host);
    if let Some(port) = parsed.port() {
        canonical.push(':');
        canonical.push_str(&port.to_string());
    }
    canonical.push_str(parsed.path().trim_end_matches('/'));
    if let Some(query) = parsed.query() {
        canonical.push('?');
        canonical.push_str(query);
    }

    Ok(canonical)
}

/// Validate and canonicalize a raw item into a [`ConversionItem`].
///
/// `credential` is the caller-supplied credential, if any; credential-gated
/// kinds fail without one so nothing reaches dispatch half-authorized.
pub fn normalize(
    raw: &RawItem,
    limits: &LimitsConfig,
    credential: Option<&str>,
) -> Result<ConversionItem, ValidationError> {
    match raw {
        RawItem::File { path, options } => {
            let name = file_name(path)?;
            let extension = path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or_default()
                .to_string();

            let kind = kind_for_extension(&extension).ok_or(
                ValidationError::UnsupportedExtension {
                    extension: extension.clone(),
                },
            )?;

            let size_bytes = std::fs::metadata(path)
                .map_err(|e| ValidationError::FileUnreadable {
                    path: path.clone(),
                    reason: e.to_string(),
                })?
                .len();

            let limit_bytes = match kind {
                ItemKind::Video => limits.video_limit_bytes(),
                _ => limits.file_limit_bytes(),
            };
            if size_bytes > limit_bytes {
                return Err(ValidationError::FileTooLarge {
                    name,
                    size_bytes,
                    limit_bytes,
                });
            }

            check_credential(kind, credential)?;

            debug!(name = %name, kind = %kind, size_bytes, "Normalized file item");

            Ok(ConversionItem {
                id: Uuid::new_v4().to_string(),
                name,
                kind,
                source: ItemSource::File { path: path.clone() },
                size_bytes,
                options: options.clone(),
                requires_credential: kind.requires_credential(),
            })
        }
        RawItem::Url {
            url,
            crawl,
            options,
        } => {
            let canonical = canonicalize_url(url)?;
            let kind = if *crawl {
                ItemKind::ParentUrl
            } else {
                ItemKind::Url
            };

            check_credential(kind, credential)?;

            debug!(url = %canonical, kind = %kind, "Normalized URL item");

            Ok(ConversionItem {
                id: Uuid::new_v4().to_string(),
                name: canonical.clone(),
                kind,
                source: ItemSource::Url { url: canonical },
                size_bytes: 0,
                options: options.clone(),
                requires_credential: kind.requires_credential(),
            })
        }
    }
}

/// Re-run validation over an already-normalized item.
///
/// Normalization is idempotent: an item that passed [`normalize`] passes
/// here unchanged, unless its backing file changed on disk or the
/// credential it needs went away.
pub fn revalidate(
    item: &ConversionItem,
    limits: &LimitsConfig,
    credential: Option<&str>,
) -> Result<(), ValidationError> {
    match &item.source {
        ItemSource::File { path } => {
            let size_bytes = std::fs::metadata(path)
                .map_err(|e| ValidationError::FileUnreadable {
                    path: path.clone(),
                    reason: e.to_string(),
                })?
                .len();
            let limit_bytes = match item.kind {
                ItemKind::Video => limits.video_limit_bytes(),
                _ => limits.file_limit_bytes(),
            };
            if size_bytes > limit_bytes {
                return Err(ValidationError::FileTooLarge {
                    name: item.name.clone(),
                    size_bytes,
                    limit_bytes,
                });
            }
        }
        ItemSource::Url { url } => {
            let canonical = canonicalize_url(url)?;
            debug_assert_eq!(&canonical, url);
        }
    }

    check_credential(item.kind, credential)
}

fn check_credential(kind: ItemKind, credential: Option<&str>) -> Result<(), ValidationError> {
    if kind.requires_credential() && credential.map_or(true, str::is_empty) {
        return Err(ValidationError::CredentialRequired { kind });
    }
    Ok(())
}

fn file_name(path: &Path) -> Result<String, ValidationError> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .filter(|n| !n.is_empty())
        .ok_or(ValidationError::EmptyName)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ConversionOptions;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn temp_file_with_ext(ext: &str, bytes: usize) -> NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(&format!(".{}", ext))
            .tempfile()
            .unwrap();
        file.write_all(&vec![0u8; bytes]).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_kind_inference() {
        assert_eq!(kind_for_extension("pdf"), Some(ItemKind::Document));
        assert_eq!(kind_for_extension("PDF"), Some(ItemKind::Document));
        assert_eq!(kind_for_extension("csv"), Some(ItemKind::Data));
        assert_eq!(kind_for_extension("mp3"), Some(ItemKind::Audio));
        assert_eq!(kind_for_extension("mkv"), Some(ItemKind::Video));
        assert_eq!(kind_for_extension("exe"), None);
    }

    #[test]
    fn test_canonicalize_case_and_trailing_slash() {
        let a = canonicalize_url("HTTP://Example.com/Path/").unwrap();
        let b = canonicalize_url("http://example.com/path").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, "http://example.com/path");
    }

    #[test]
    fn test_canonicalize_preserves_query() {
        let url = canonicalize_url("https://example.com/search/?q=Rust").unwrap();
        assert_eq!(url, "https://example.com/search?q=rust");
    }

    #[test]
    fn test_canonicalize_bare_host() {
        let url = canonicalize_url("https://Example.com/").unwrap();
        assert_eq!(url, "https://example.com");
    }

    #[test]
    fn test_canonicalize_is_idempotent() {
        let once = canonicalize_url("HTTP://Example.com/A/B/?X=1").unwrap();
        let twice = canonicalize_url(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_canonicalize_rejects_garbage() {
        let err = canonicalize_url("not a url").unwrap_err();
        assert!(matches!(err, ValidationError::InvalidUrl { .. }));
    }

    #[test]
    fn test_canonicalize_rejects_ftp() {
        let err = canonicalize_url("ftp://example.com/file").unwrap_err();
        assert!(matches!(err, ValidationError::InvalidUrl { .. }));
    }

    #[test]
    fn test_normalize_document_file() {
        let file = temp_file_with_ext("pdf", 1024);
        let item = normalize(&RawItem::file(file.path()), &LimitsConfig::default(), None).unwrap();

        assert_eq!(item.kind, ItemKind::Document);
        assert_eq!(item.size_bytes, 1024);
        assert!(!item.requires_credential);
        assert!(item.name.ends_with(".pdf"));
    }

    #[test]
    fn test_normalize_unsupported_extension() {
        let file = temp_file_with_ext("exe", 16);
        let err =
            normalize(&RawItem::file(file.path()), &LimitsConfig::default(), None).unwrap_err();
        assert!(matches!(err, ValidationError::UnsupportedExtension { .. }));
    }

    #[test]
    fn test_normalize_oversized_file() {
        let file = temp_file_with_ext("pdf", 2 * 1024 * 1024);
        let limits = LimitsConfig {
            max_file_mb: 1,
            max_video_mb: 500,
        };
        let err = normalize(&RawItem::file(file.path()), &limits, None).unwrap_err();
        assert!(matches!(err, ValidationError::FileTooLarge { .. }));
    }

    #[test]
    fn test_video_uses_larger_ceiling() {
        let file = temp_file_with_ext("mp4", 2 * 1024 * 1024);
        let limits = LimitsConfig {
            max_file_mb: 1,
            max_video_mb: 10,
        };
        // Over the file ceiling but under the video ceiling
        let item = normalize(&RawItem::file(file.path()), &limits, Some("key")).unwrap();
        assert_eq!(item.kind, ItemKind::Video);
    }

    #[test]
    fn test_normalize_audio_without_credential() {
        let file = temp_file_with_ext("mp3", 16);
        let err =
            normalize(&RawItem::file(file.path()), &LimitsConfig::default(), None).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::CredentialRequired {
                kind: ItemKind::Audio
            }
        ));
        assert_eq!(err.code(), "CREDENTIAL_REQUIRED");
    }

    #[test]
    fn test_normalize_url_without_credential() {
        let err = normalize(
            &RawItem::url("https://example.com"),
            &LimitsConfig::default(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::CredentialRequired { .. }));
    }

    #[test]
    fn test_normalize_url_item() {
        let item = normalize(
            &RawItem::url("HTTPS://Example.com/Docs/"),
            &LimitsConfig::default(),
            Some("key"),
        )
        .unwrap();

        assert_eq!(item.kind, ItemKind::Url);
        assert_eq!(item.source_url(), Some("https://example.com/docs"));
        assert_eq!(item.name, "https://example.com/docs");
        assert!(item.requires_credential);
    }

    #[test]
    fn test_normalize_parent_url_item() {
        let item = normalize(
            &RawItem::parent_url("https://example.com", ConversionOptions::crawl(2, 50)),
            &LimitsConfig::default(),
            Some("key"),
        )
        .unwrap();

        assert_eq!(item.kind, ItemKind::ParentUrl);
        assert_eq!(item.options.crawl_depth, Some(2));
        assert_eq!(item.options.max_pages, Some(50));
    }

    #[test]
    fn test_unique_ids() {
        let file = temp_file_with_ext("pdf", 16);
        let a = normalize(&RawItem::file(file.path()), &LimitsConfig::default(), None).unwrap();
        let b = normalize(&RawItem::file(file.path()), &LimitsConfig::default(), None).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_revalidate_normalized_item_is_noop() {
        let file = temp_file_with_ext("pdf", 64);
        let limits = LimitsConfig::default();
        let item = normalize(&RawItem::file(file.path()), &limits, None).unwrap();
        assert!(revalidate(&item, &limits, None).is_ok());

        let url_item = normalize(&RawItem::url("https://example.com/a"), &limits, Some("k")).unwrap();
        assert!(revalidate(&url_item, &limits, Some("k")).is_ok());
    }

    #[test]
    fn test_revalidate_catches_lost_credential() {
        let limits = LimitsConfig::default();
        let item = normalize(&RawItem::url("https://example.com/a"), &limits, Some("k")).unwrap();
        let err = revalidate(&item, &limits, None).unwrap_err();
        assert!(matches!(err, ValidationError::CredentialRequired { .. }));
    }
}
