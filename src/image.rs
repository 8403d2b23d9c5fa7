// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::BytesMut;
use futures::StreamExt;
use image::DynamicImage;
use url::Url;

use crate::error::ImageError;
use crate::http::HttpClient;

/// Upper bound on a thumbnail response body. Bodies past this limit fail
/// with [`ImageError::TooLarge`] instead of exhausting memory during a
/// fast-scroll burst of requests.
pub const MAX_IMAGE_BYTES: usize = 8 * 1024 * 1024;

/// A decoded thumbnail, owned by the requester for the duration of its use
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub source_url: Url,
    pub image: DynamicImage,
}

/// Cancellation handle for one in-flight image request.
///
/// `cancel()` suppresses the completion callback if it has not fired yet.
/// This is the contract a recycling list view needs so a stale request cannot
/// paint the wrong image into a repurposed slot. The underlying network
/// request is not aborted; it finishes and its result is discarded.
#[derive(Debug, Clone)]
pub struct ImageHandle {
    cancelled: Arc<AtomicBool>,
}

impl ImageHandle {
    pub(crate) fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Fetch an image and decode it into a displayable bitmap
pub async fn fetch_image<C: HttpClient>(
    client: &C,
    url: &Url,
) -> Result<FetchedImage, ImageError> {
    fetch_image_with_limit(client, url, MAX_IMAGE_BYTES).await
}

pub(crate) async fn fetch_image_with_limit<C: HttpClient>(
    client: &C,
    url: &Url,
    limit: usize,
) -> Result<FetchedImage, ImageError> {
    let response =
        client
            .get_stream(url.as_str())
            .await
            .map_err(|e| ImageError::FetchFailed {
                url: url.to_string(),
                source: e,
            })?;

    if response.status >= 400 {
        return Err(ImageError::HttpStatus {
            url: url.to_string(),
            status: response.status,
        });
    }

    if let Some(length) = response.content_length
        && length as usize > limit
    {
        return Err(ImageError::TooLarge {
            url: url.to_string(),
            limit,
        });
    }

    // Accumulate the body chunk by chunk, enforcing the limit even when the
    // server did not announce a Content-Length
    let mut body = BytesMut::new();
    let mut stream = response.body;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| ImageError::StreamFailed {
            url: url.to_string(),
            source: e,
        })?;

        if body.len() + chunk.len() > limit {
            return Err(ImageError::TooLarge {
                url: url.to_string(),
                limit,
            });
        }
        body.extend_from_slice(&chunk);
    }

    let image = image::load_from_memory(&body).map_err(|e| ImageError::DecodeFailed {
        url: url.to_string(),
        source: e,
    })?;

    Ok(FetchedImage {
        source_url: url.clone(),
        image,
    })
}
