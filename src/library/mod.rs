//! Book library: catalog, remote refresh and text extraction

mod catalog;
mod extract;
mod remote;

use std::path::PathBuf;

pub use catalog::{load_catalog, ContentItem};
pub use extract::{CommandExtractor, TextExtractor};
pub use remote::LibraryUpdater;

/// Errors from the library collaborators
#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    #[error("no library listing URL configured")]
    NotConfigured,

    #[error("library listing has no books")]
    EmptyListing,

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to encode catalog: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
