use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;

use crate::error::ParseError;
use crate::feed::{FeedItem, parse_feed};

/// One cancellable unit of background parse work.
///
/// The parse runs on the blocking worker pool, never on the caller's thread.
/// `on_complete` is invoked at most once, from a single delivery point;
/// [`cancel`] suppresses a completion that has not been delivered yet. The
/// parse itself is not interrupted mid-document; it is short relative to the
/// network I/O that precedes it, so suppression at the delivery point is all
/// the cancellation that is needed.
///
/// Several tasks may be in flight at once (a refresh started while an earlier
/// one is still parsing); each is fully independent.
///
/// [`cancel`]: ParseTask::cancel
pub struct ParseTask {
    cancelled: Arc<AtomicBool>,
}

impl ParseTask {
    /// Start parsing `bytes` on a background worker. Returns immediately.
    pub fn spawn<F>(bytes: Bytes, on_complete: F) -> Self
    where
        F: FnOnce(Result<Vec<FeedItem>, ParseError>) + Send + 'static,
    {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);

        tokio::task::spawn_blocking(move || {
            let result = parse_feed(&bytes);

            // Single delivery point; the cancellation flag is checked here
            // and nowhere else
            if flag.load(Ordering::SeqCst) {
                tracing::debug!("parse completion suppressed by cancellation");
                return;
            }
            on_complete(result);
        });

        Self { cancelled }
    }

    /// Best-effort cancellation: a completion not yet delivered will be
    /// suppressed; one already delivered is unaffected.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    const SMALL_FEED: &str = r#"<rss><channel>
        <item><title>A</title><link>https://example.com/a</link></item>
        <item><title>B</title><link>https://example.com/b</link></item>
    </channel></rss>"#;

    /// A feed large enough that its parse cannot finish before the test's
    /// next statement runs
    fn large_feed() -> String {
        let mut feed = String::from("<rss><channel>");
        for i in 0..20_000 {
            feed.push_str(&format!(
                "<item><title>Post {i}</title><link>https://example.com/{i}</link></item>"
            ));
        }
        feed.push_str("</channel></rss>");
        feed
    }

    #[tokio::test]
    async fn completion_is_delivered_exactly_once() {
        let (tx, rx) = mpsc::channel();

        let _task = ParseTask::spawn(Bytes::from(SMALL_FEED), move |result| {
            tx.send(result).unwrap();
        });

        let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(result.unwrap().len(), 2);

        // The sender was moved into the callback; a second delivery would
        // show up here
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[tokio::test]
    async fn parse_error_is_delivered_through_the_callback() {
        let (tx, rx) = mpsc::channel();

        let _task = ParseTask::spawn(Bytes::from("<rss><channel>"), move |result| {
            tx.send(result).unwrap();
        });

        let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(result, Err(ParseError::UnexpectedEof { .. })));
    }

    #[tokio::test]
    async fn cancel_suppresses_an_undelivered_completion() {
        let (tx, rx) = mpsc::channel::<Result<Vec<FeedItem>, ParseError>>();

        let task = ParseTask::spawn(Bytes::from(large_feed()), move |result| {
            let _ = tx.send(result);
        });
        task.cancel();

        assert!(rx.recv_timeout(Duration::from_millis(500)).is_err());
    }

    #[tokio::test]
    async fn concurrent_tasks_are_independent() {
        let (tx_a, rx_a) = mpsc::channel();
        let (tx_b, rx_b) = mpsc::channel();

        let _a = ParseTask::spawn(Bytes::from(SMALL_FEED), move |result| {
            tx_a.send(result).unwrap();
        });
        let _b = ParseTask::spawn(Bytes::from("<rss><channel></channel></rss>"), move |result| {
            tx_b.send(result).unwrap();
        });

        assert_eq!(rx_a.recv_timeout(Duration::from_secs(5)).unwrap().unwrap().len(), 2);
        assert!(rx_b.recv_timeout(Duration::from_secs(5)).unwrap().unwrap().is_empty());
    }
}
