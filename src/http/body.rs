//! Body acquisition for buffered route kinds.
//!
//! The inbound stream is consumed once, chunk by chunk, against a byte
//! budget. Crossing the budget stops reading immediately. The result is
//! UTF-8 text and is never parsed.

use axum::{
    body::Body,
    http::{header, HeaderMap},
};
use futures_util::StreamExt;

use crate::error::{Error, Result};

/// Read `body` into a string, failing with `PAYLOAD_TOO_LARGE` once more
/// than `limit` bytes have arrived.
///
/// Bytes are concatenated before decoding so multi-byte characters split
/// across chunks survive. Invalid sequences become U+FFFD.
pub async fn read_body(body: Body, limit: usize) -> Result<String> {
    let mut stream = body.into_data_stream();
    let mut buf = Vec::new();
    let mut received = 0usize;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        received = received.saturating_add(chunk.len());
        if received > limit {
            tracing::debug!(received, limit, "Request body over budget");
            return Err(Error::payload_too_large());
        }
        buf.extend_from_slice(&chunk);
    }

    Ok(match String::from_utf8(buf) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    })
}

/// True when a declared `content-length` already exceeds `limit`.
pub fn declared_over_limit(headers: &HeaderMap, limit: usize) -> bool {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .is_some_and(|len| len > limit as u64)
}
