pub mod bus;
pub mod client;
pub mod error;
pub mod feed;
pub mod http;
pub mod image;
pub mod task;

// Re-export main types for convenience
pub use bus::{FeedBus, FeedEvent};
pub use client::{DEFAULT_MAX_INFLIGHT_IMAGES, FeedClient};
pub use error::{FeedError, ImageError, ParseError};
pub use feed::{FeedItem, parse_feed};
pub use http::{HttpBytes, HttpClient, HttpResponse, ReqwestClient};
pub use self::image::{FetchedImage, ImageHandle, MAX_IMAGE_BYTES, fetch_image};
pub use task::ParseTask;
