use thiserror::Error;

/// Errors that terminate a feed fetch attempt.
///
/// Both network-level failures and document-level parse failures end up here;
/// they surface to listeners as a single `fetch-error` bus event.
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Failed to fetch feed from {url}: {source}")]
    FetchFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP error {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Failed to parse feed: {0}")]
    Parse(#[from] ParseError),
}

/// Structural failures of the feed document as a whole.
///
/// Per-item problems (a missing link, an unparseable date) are handled inside
/// the parser and never become a `ParseError`.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Malformed XML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Document root is <{found}>, expected <rss> or <rdf:RDF>")]
    InvalidRoot { found: String },

    #[error("Document contains no root element")]
    NoRootElement,

    #[error("Unexpected end of document ({open} element(s) left open)")]
    UnexpectedEof { open: usize },
}

/// Errors scoped to a single image fetch.
///
/// These reach only the completion callback of the request that caused them
/// and never affect feed state.
#[derive(Error, Debug)]
pub enum ImageError {
    #[error("HTTP request failed for {url}: {source}")]
    FetchFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP error {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Stream error while fetching {url}: {source}")]
    StreamFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Image at {url} exceeds the {limit} byte limit")]
    TooLarge { url: String, limit: usize },

    #[error("Failed to decode image from {url}: {source}")]
    DecodeFailed {
        url: String,
        #[source]
        source: image::ImageError,
    },
}
