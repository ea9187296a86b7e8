//! Conversion items and their normalization.
//!
//! A raw user-supplied input (a file path or a URL) becomes a typed,
//! immutable [`ConversionItem`] through [`normalize`]. Everything downstream
//! of this module only ever sees normalized items.

mod error;
mod normalizer;
mod types;

pub use error::ValidationError;
pub use normalizer::{canonicalize_url, normalize, revalidate};
pub use types::*;
