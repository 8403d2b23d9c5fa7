// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::feed::FeedItem;

/// Broadcast channel capacity. Terminal fetch outcomes are rare events, so a
/// small buffer is enough; a subscriber that still manages to lag skips old
/// events rather than blocking publishers.
const EVENT_CAPACITY: usize = 16;

/// Terminal outcome of one feed fetch, broadcast to every subscriber.
///
/// The item list is shared behind an `Arc` so fan-out to many listeners
/// clones a pointer, not the parsed feed.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// The fetch completed and the whole ordered item batch is available
    ItemsReady(Arc<Vec<FeedItem>>),
    /// The fetch failed; payload is a human-readable message
    FetchError(String),
}

/// Broadcast bus decoupling feed acquisition from its listeners.
///
/// Any number of listeners may subscribe; each sees events in publish order.
/// There is no replay: a subscriber attached after an event was published
/// does not receive it. Dropping the receiver returned by [`subscribe`]
/// unsubscribes.
///
/// [`subscribe`]: FeedBus::subscribe
#[derive(Clone)]
pub struct FeedBus {
    sender: broadcast::Sender<FeedEvent>,
}

impl FeedBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    /// Attach a new listener. The receiver only observes events published
    /// after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.sender.subscribe()
    }

    /// Fan an event out to all current subscribers. Publishing with no
    /// subscribers attached is not an error; the event is simply gone.
    pub fn publish(&self, event: FeedEvent) {
        if self.sender.send(event).is_err() {
            tracing::debug!("feed event published with no subscribers attached");
        }
    }

    /// Number of currently attached subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for FeedBus {
    fn default() -> Self {
        Self::new()
    }
}
