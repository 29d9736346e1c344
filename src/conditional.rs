// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Keeps conditional requests meaningful when the proxy rewrites bodies.
//!
//! The browser only ever sees wrapped validators (see [`crate::etag`]), so
//! outbound requests are translated back to what the origin issued, and
//! anything that cannot be translated is dropped.

use crate::etag;
use crate::fingerprint::Fingerprint;
use crate::http_date::same_http_date;
use crate::state::ConditionalState;
use hyper::header::{
    HeaderMap, HeaderValue, ACCEPT_ENCODING, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH,
    LAST_MODIFIED,
};
use tracing::trace;

pub struct ConditionalBridge {
    state: ConditionalState,
    fingerprint: Fingerprint,
}

impl ConditionalBridge {
    pub fn new(state: ConditionalState, fingerprint: Fingerprint) -> Self {
        Self { state, fingerprint }
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn state(&self) -> &ConditionalState {
        &self.state
    }

    /// Rewrite validators on a request before it is forwarded upstream.
    pub fn adjust_request_headers(&self, headers: &mut HeaderMap, url: &str) {
        if headers.contains_key(IF_NONE_MATCH) {
            let decoded: Vec<String> = headers
                .get_all(IF_NONE_MATCH)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .flat_map(etag::parse_entity_tags)
                .filter_map(|tag| etag::decode(tag, &self.fingerprint))
                .collect();
            headers.remove(IF_NONE_MATCH);
            if decoded.is_empty() {
                trace!(%url, "dropping undecodable If-None-Match");
            } else if let Ok(v) = HeaderValue::from_str(&decoded.join(", ")) {
                headers.insert(IF_NONE_MATCH, v);
            }
        }

        if let Some(since) = headers.get(IF_MODIFIED_SINCE) {
            let keep = match (since.to_str(), self.state.last_modified(url)) {
                (Ok(since), Some(recorded)) => same_http_date(since, &recorded),
                _ => false,
            };
            if !keep {
                trace!(%url, "dropping If-Modified-Since without matching record");
                headers.remove(IF_MODIFIED_SINCE);
            }
        }

        // Bodies must arrive as identity to be rewritten.
        headers.remove(ACCEPT_ENCODING);
    }

    /// Wrap the upstream ETag and remember Last-Modified for `url`.
    pub fn adjust_response_headers(&self, headers: &mut HeaderMap, url: &str) {
        if let Some(raw) = headers.get(ETAG).and_then(|v| v.to_str().ok()) {
            let wrapped = etag::encode(raw, &self.fingerprint);
            if let Ok(v) = HeaderValue::from_str(&wrapped) {
                headers.insert(ETAG, v);
            }
        }
        if let Some(lm) = headers.get(LAST_MODIFIED).and_then(|v| v.to_str().ok()) {
            self.state.record(url, lm);
        }
    }

    pub fn cleanup_expired(&self) -> usize {
        self.state.cleanup_expired()
    }
}
