use thiserror::Error;

/// Failure kinds of the extraction pipeline. Every kind is fatal to the
/// run except a malformed per-chapter page manifest, which the walker
/// downgrades to an empty chapter.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(
        "session cookie `{name}` is not present in the browser context; \
         make sure the login completed and the viewer opened before the API is called"
    )]
    MissingCredential { name: String },

    #[error("scan token not found within {timeout_secs}s; polled urls: {seen_urls:?}")]
    ScanIdNotFound {
        timeout_secs: u64,
        seen_urls: Vec<String>,
    },

    #[error("unusable api response from {url}: {reason}; body: {snippet}")]
    MalformedApiResponse {
        url: String,
        reason: String,
        snippet: String,
    },

    #[error("image download failed with http {status} for key {key}")]
    DownloadFailed { status: u16, key: String },

    #[error("viewer url has no book id path segment: {url:?}")]
    MissingViewerContext { url: String },
}
