// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use url::Url;

/// One parsed blog entry.
///
/// Constructed by the parser during a single pass and read-only afterwards.
/// The vector handed to listeners preserves feed document order; the most
/// recent post comes first in a reverse-chronological feed.
#[derive(Debug, Clone, Serialize)]
pub struct FeedItem {
    /// Entity-decoded title; may retain inline HTML markup
    pub title: String,
    /// Entity-decoded description, sourced from escaped text or a CDATA block
    pub description: String,
    /// First media reference found within the item, if any
    pub image_url: Option<Url>,
    /// Publication timestamp; feeds with unparseable dates still yield items
    pub pub_date: Option<DateTime<FixedOffset>>,
    /// Link to the full article; items without one are never constructed
    pub link: Url,
}
