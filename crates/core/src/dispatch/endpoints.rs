//! Endpoint paths for each conversion kind.

use crate::item::ItemKind;

/// Path of the shared multipart batch endpoint.
pub const BATCH_PATH: &str = "/api/convert/batch";

/// Resolve the endpoint path for an item kind.
///
/// Total over `ItemKind`; data files are plain-document uploads and share
/// the document endpoint.
pub fn resolve(kind: ItemKind) -> &'static str {
    match kind {
        ItemKind::Document | ItemKind::Data => "/api/convert/document",
        ItemKind::Audio => "/api/convert/audio",
        ItemKind::Video => "/api/convert/video",
        ItemKind::Url => "/api/convert/url",
        ItemKind::ParentUrl => "/api/convert/site",
    }
}
