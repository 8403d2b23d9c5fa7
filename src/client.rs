// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{Semaphore, broadcast};
use url::Url;

use crate::bus::{FeedBus, FeedEvent};
use crate::error::{FeedError, ImageError};
use crate::http::HttpClient;
use crate::image::{FetchedImage, ImageHandle, fetch_image};
use crate::task::ParseTask;

/// Default cap on concurrently in-flight image fetches
pub const DEFAULT_MAX_INFLIGHT_IMAGES: usize = 4;

/// Client for one configured feed URL.
///
/// Owns the broadcast bus on which terminal fetch outcomes are published and
/// the permit pool bounding image fetches. Constructed explicitly and passed
/// to whatever composes the application; there is no shared global instance.
pub struct FeedClient<C: HttpClient + Clone + 'static> {
    http: C,
    feed_url: Url,
    bus: FeedBus,
    image_permits: Arc<Semaphore>,
}

impl<C: HttpClient + Clone + 'static> FeedClient<C> {
    pub fn new(http: C, feed_url: Url) -> Self {
        Self::with_bus(http, feed_url, FeedBus::new())
    }

    /// Create a client publishing on an existing bus, for compositions where
    /// several producers share one listener population.
    pub fn with_bus(http: C, feed_url: Url, bus: FeedBus) -> Self {
        Self {
            http,
            feed_url,
            bus,
            image_permits: Arc::new(Semaphore::new(DEFAULT_MAX_INFLIGHT_IMAGES)),
        }
    }

    /// Override the cap on concurrently in-flight image fetches
    pub fn max_inflight_images(mut self, permits: usize) -> Self {
        self.image_permits = Arc::new(Semaphore::new(permits));
        self
    }

    pub fn bus(&self) -> &FeedBus {
        &self.bus
    }

    /// Attach a listener to this client's bus
    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.bus.subscribe()
    }

    pub fn feed_url(&self) -> &Url {
        &self.feed_url
    }

    /// Fetch and parse the configured feed. Returns immediately.
    ///
    /// The terminal outcome is published as exactly one bus event: either
    /// [`FeedEvent::ItemsReady`] with the whole ordered item batch or
    /// [`FeedEvent::FetchError`] with a descriptive message. Never both, and
    /// never a partial batch.
    ///
    /// Overlapping calls are allowed and proceed independently; each
    /// publishes its own event and the last one to complete wins on the bus.
    /// There is no request fencing: a slow earlier response can overwrite a
    /// faster later one in listeners that only retain the latest batch.
    pub fn fetch_feed(&self) {
        let http = self.http.clone();
        let url = self.feed_url.clone();
        let bus = self.bus.clone();

        tokio::spawn(async move {
            match fetch_feed_bytes(&http, url.as_str()).await {
                Ok(body) => {
                    ParseTask::spawn(body, move |result| match result {
                        Ok(items) => {
                            tracing::debug!(count = items.len(), "feed parse complete");
                            bus.publish(FeedEvent::ItemsReady(Arc::new(items)));
                        }
                        Err(e) => {
                            let e = FeedError::from(e);
                            tracing::warn!(error = %e, "feed parse failed");
                            bus.publish(FeedEvent::FetchError(e.to_string()));
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "feed fetch failed");
                    bus.publish(FeedEvent::FetchError(e.to_string()));
                }
            }
        });
    }

    /// Fetch and decode one image, delivering the result to `on_complete`.
    /// Returns immediately with a handle whose `cancel()` suppresses the
    /// callback if it has not fired yet.
    ///
    /// Errors are scoped to this call: they reach only `on_complete` and
    /// never touch the bus or feed state. At most
    /// [`DEFAULT_MAX_INFLIGHT_IMAGES`] fetches (or the override given to
    /// [`max_inflight_images`]) run at once; the rest queue on the permit
    /// pool. A cancelled request holds its permit until the suppressed
    /// completion is observed, keeping the bound honest.
    ///
    /// [`max_inflight_images`]: FeedClient::max_inflight_images
    pub fn fetch_image<F>(&self, url: Url, on_complete: F) -> ImageHandle
    where
        F: FnOnce(Result<FetchedImage, ImageError>) + Send + 'static,
    {
        let handle = ImageHandle::new();
        let task_handle = handle.clone();
        let http = self.http.clone();
        let permits = Arc::clone(&self.image_permits);

        tokio::spawn(async move {
            // Only fails when the semaphore is closed, which never happens
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };

            let result = fetch_image(&http, &url).await;

            // Single delivery point; the cancellation flag is checked here
            // and nowhere else
            if task_handle.is_cancelled() {
                tracing::debug!(url = %url, "image completion suppressed by cancellation");
                return;
            }
            on_complete(result);
        });

        handle
    }
}

/// Fetch raw feed bytes, mapping transport failures and non-2xx statuses
async fn fetch_feed_bytes<C: HttpClient>(client: &C, url: &str) -> Result<Bytes, FeedError> {
    let response = client
        .get_bytes(url)
        .await
        .map_err(|e| FeedError::FetchFailed {
            url: url.to_string(),
            source: e,
        })?;

    if response.status >= 400 {
        return Err(FeedError::HttpStatus {
            url: url.to_string(),
            status: response.status,
        });
    }

    Ok(response.body)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::time::timeout;

    use crate::http::{ByteStream, HttpBytes, HttpResponse};

    const SAMPLE_FEED: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Test Blog</title>
    <item>
      <title>Post Three</title>
      <link>https://example.com/posts/3</link>
      <pubDate>Wed, 03 Jan 2024 09:30:00 +0000</pubDate>
    </item>
    <item>
      <title>Post Two</title>
      <link>https://example.com/posts/2</link>
    </item>
    <item>
      <title>Post One</title>
      <link>https://example.com/posts/1</link>
    </item>
  </channel>
</rss>"#;

    #[derive(Clone)]
    struct MockHttpClient {
        body: Vec<u8>,
        status: u16,
        response_delay: Option<Duration>,
        inflight: Arc<AtomicUsize>,
        max_inflight: Arc<AtomicUsize>,
    }

    impl MockHttpClient {
        fn new(body: impl Into<Vec<u8>>, status: u16) -> Self {
            Self {
                body: body.into(),
                status,
                response_delay: None,
                inflight: Arc::new(AtomicUsize::new(0)),
                max_inflight: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.response_delay = Some(delay);
            self
        }

        async fn track_request(&self) {
            let current = self.inflight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_inflight.fetch_max(current, Ordering::SeqCst);

            if let Some(delay) = self.response_delay {
                tokio::time::sleep(delay).await;
            }

            self.inflight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn get_bytes(&self, _url: &str) -> Result<HttpBytes, reqwest::Error> {
            self.track_request().await;
            Ok(HttpBytes {
                status: self.status,
                body: Bytes::from(self.body.clone()),
            })
        }

        async fn get_stream(&self, _url: &str) -> Result<HttpResponse, reqwest::Error> {
            self.track_request().await;
            let data = self.body.clone();
            let len = data.len() as u64;
            let stream: ByteStream =
                Box::pin(futures::stream::once(async move { Ok(Bytes::from(data)) }));

            Ok(HttpResponse {
                status: self.status,
                content_length: Some(len),
                body: stream,
            })
        }
    }

    fn feed_url() -> Url {
        Url::parse("https://example.com/feed.xml").unwrap()
    }

    fn png_bytes() -> Vec<u8> {
        let bitmap = image::RgbaImage::from_pixel(2, 2, image::Rgba([0, 0, 0, 255]));
        let mut out = Vec::new();
        image::DynamicImage::ImageRgba8(bitmap)
            .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
            .unwrap();
        out
    }

    async fn expect_no_more_events(rx: &mut broadcast::Receiver<FeedEvent>) {
        let extra = timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(extra.is_err(), "unexpected extra event: {:?}", extra);
    }

    #[tokio::test]
    async fn successful_fetch_publishes_exactly_one_items_ready_event() {
        let client = FeedClient::new(MockHttpClient::new(SAMPLE_FEED, 200), feed_url());
        let mut rx = client.subscribe();

        client.fetch_feed();

        let event = timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();

        let items = match event {
            FeedEvent::ItemsReady(items) => items,
            other => panic!("expected items, got {:?}", other),
        };
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].title, "Post Three");

        expect_no_more_events(&mut rx).await;
    }

    #[tokio::test]
    async fn http_error_publishes_exactly_one_fetch_error_event() {
        let client = FeedClient::new(MockHttpClient::new("service down", 503), feed_url());
        let mut rx = client.subscribe();

        client.fetch_feed();

        let event = timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();

        let message = match event {
            FeedEvent::FetchError(message) => message,
            other => panic!("expected error, got {:?}", other),
        };
        assert!(message.contains("503"));

        expect_no_more_events(&mut rx).await;
    }

    #[tokio::test]
    async fn malformed_feed_publishes_fetch_error() {
        let client = FeedClient::new(
            MockHttpClient::new("<rss><channel><item>", 200),
            feed_url(),
        );
        let mut rx = client.subscribe();

        client.fetch_feed();

        let event = timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(event, FeedEvent::FetchError(_)));
        expect_no_more_events(&mut rx).await;
    }

    #[tokio::test]
    async fn concurrent_fetches_publish_one_event_each() {
        let client = FeedClient::new(MockHttpClient::new(SAMPLE_FEED, 200), feed_url());
        let mut rx = client.subscribe();

        client.fetch_feed();
        client.fetch_feed();

        for _ in 0..2 {
            let event = timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert!(matches!(event, FeedEvent::ItemsReady(_)));
        }

        expect_no_more_events(&mut rx).await;
    }

    #[tokio::test]
    async fn fetch_image_delivers_decoded_image() {
        let client = FeedClient::new(MockHttpClient::new(png_bytes(), 200), feed_url());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let url = Url::parse("https://example.com/thumb.png").unwrap();
        client.fetch_image(url.clone(), move |result| {
            tx.send(result).unwrap();
        });

        let fetched = timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(fetched.source_url, url);
        assert_eq!(fetched.image.width(), 2);
    }

    #[tokio::test]
    async fn cancelled_image_fetch_never_invokes_the_callback() {
        let slow = MockHttpClient::new(png_bytes(), 200).with_delay(Duration::from_millis(100));
        let client = FeedClient::new(slow, feed_url());

        let delivered = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&delivered);

        let url = Url::parse("https://example.com/thumb.png").unwrap();
        let handle = client.fetch_image(url, move |_result| {
            flag.store(true, Ordering::SeqCst);
        });
        handle.cancel();

        // Well past the mocked response delay
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!delivered.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn image_errors_stay_off_the_bus() {
        let client = FeedClient::new(MockHttpClient::new("gone", 404), feed_url());
        let mut rx = client.subscribe();
        let (tx, mut result_rx) = tokio::sync::mpsc::unbounded_channel();

        let url = Url::parse("https://example.com/thumb.png").unwrap();
        client.fetch_image(url, move |result| {
            tx.send(result).unwrap();
        });

        let result = timeout(Duration::from_secs(5), result_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(ImageError::HttpStatus { .. })));

        expect_no_more_events(&mut rx).await;
    }

    #[tokio::test]
    async fn inflight_image_fetches_are_bounded() {
        let mock = MockHttpClient::new(png_bytes(), 200).with_delay(Duration::from_millis(50));
        let max_seen = Arc::clone(&mock.max_inflight);

        let client = FeedClient::new(mock, feed_url()).max_inflight_images(2);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let url = Url::parse("https://example.com/thumb.png").unwrap();
        for _ in 0..8 {
            let tx = tx.clone();
            client.fetch_image(url.clone(), move |result| {
                tx.send(result.is_ok()).unwrap();
            });
        }

        for _ in 0..8 {
            assert!(timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap());
        }
        assert!(max_seen.load(Ordering::SeqCst) <= 2);
    }
}
