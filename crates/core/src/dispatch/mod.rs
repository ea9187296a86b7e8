//! Request dispatch against the conversion service.
//!
//! This module provides a `Dispatcher` trait for submitting normalized
//! items to the backend (per item or as one multipart batch) and an HTTP
//! implementation over reqwest.

mod endpoints;
mod error;
mod http;
mod traits;
mod types;

pub use endpoints::{resolve, BATCH_PATH};
pub use error::DispatchError;
pub use http::{use_batch_mode, HttpDispatcher};
pub use traits::Dispatcher;
pub use types::*;
