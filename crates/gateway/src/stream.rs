//! Byte-serving header plumbing for proxied downloads.
//!
//! The gateway forwards inbound `Range` headers verbatim and mirrors the
//! upstream's partial-content headers back, so byte accuracy is the remote
//! store's and the headers just have to survive the trip. What is decided
//! here: the `Content-Disposition` (inline preview vs attachment save, with
//! an RFC 5987 encoded filename so non-ASCII names survive) and which
//! requests count as range continuations.

use axum::http::header::{self, HeaderMap, HeaderValue};

/// `Sec-Fetch-Dest` values that indicate in-browser preview rather than a
/// direct save.
const PREVIEW_DESTS: &[&str] = &["audio", "video", "image", "embed", "object", "iframe"];

/// Whether the request looks like an in-browser preview (range present or a
/// preview-indicating fetch destination).
pub fn is_preview_request(headers: &HeaderMap) -> bool {
    if headers.contains_key(header::RANGE) {
        return true;
    }
    headers
        .get("sec-fetch-dest")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|dest| PREVIEW_DESTS.contains(&dest))
}

/// Whether a `Range` header is a continuation of an already-started
/// download (anything not anchored at byte zero). Continuations are exempt
/// from the download rate limit so byte-serving does not multiply a
/// client's quota cost.
pub fn is_range_continuation(headers: &HeaderMap) -> bool {
    headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|range| {
            !range
                .trim_start_matches("bytes=")
                .starts_with("0-")
                && range != "bytes=0-"
        })
}

/// Builds the `Content-Disposition` value for a download of `name`.
///
/// Always carries both the plain `filename` fallback (non-ASCII replaced)
/// and the RFC 5987 `filename*=UTF-8''` form.
pub fn content_disposition(name: &str, inline: bool) -> HeaderValue {
    let kind = if inline { "inline" } else { "attachment" };
    let fallback: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();
    let encoded = percent_encode_attr(name);

    let value = format!("{kind}; filename=\"{fallback}\"; filename*=UTF-8''{encoded}");
    // The encoded form is ASCII-only by construction.
    HeaderValue::from_str(&value)
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

/// Percent-encodes a string per RFC 5987 `attr-char` rules: unreserved
/// characters and the few explicitly allowed marks pass through, everything
/// else (UTF-8 bytes included) is `%XX` encoded.
fn percent_encode_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len() * 3);
    for byte in value.bytes() {
        let keep = byte.is_ascii_alphanumeric()
            || matches!(
                byte,
                b'!' | b'#' | b'$' | b'&' | b'+' | b'-' | b'.' | b'^' | b'_' | b'`' | b'|' | b'~'
            );
        if keep {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}
