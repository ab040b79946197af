//! URL helpers used by the dispatcher and the terminal responder.
//!
//! Request targets are handled as raw strings, exactly as they arrived on the
//! wire. Mount-path rewriting must preserve everything it does not strip, so
//! nothing here normalizes or decodes.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Bytes left as-is by [`encode_url`]. `%` is handled separately.
const URL_SAFE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'&')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b'+')
    .remove(b',')
    .remove(b'-')
    .remove(b'.')
    .remove(b'/')
    .remove(b':')
    .remove(b';')
    .remove(b'=')
    .remove(b'?')
    .remove(b'@')
    .remove(b'[')
    .remove(b']')
    .remove(b'_')
    .remove(b'~');

/// Returns the scheme and authority of an absolute-form target
/// (`http://example.com/path` gives `http://example.com`).
///
/// Origin-form targets (`/path`) and targets whose `://` only appears in the
/// query string have no protohost.
pub fn protohost(url: &str) -> Option<&str> {
    if url.is_empty() || url.starts_with('/') {
        return None;
    }
    let path_len = url.find('?').unwrap_or(url.len());
    let scheme_end = url.get(..path_len)?.find("://")?;
    let authority_start = scheme_end + 3;
    let end = url
        .get(authority_start..)
        .and_then(|rest| rest.find('/'))
        .map_or(url.len(), |i| authority_start + i);
    url.get(..end)
}

/// Returns the path component of a target: the protohost is skipped and the
/// query string and fragment are cut off.
pub fn pathname(url: &str) -> &str {
    let start = protohost(url).map_or(0, str::len);
    let rest = url.get(start..).unwrap_or_default();
    let end = rest.find(['?', '#']).unwrap_or(rest.len());
    rest.get(..end).unwrap_or_default()
}

/// Percent-encodes every byte that may not appear in a URL, leaving valid
/// `%XX` escapes untouched. A `%` that does not start an escape becomes `%25`.
pub fn encode_url(url: &str) -> String {
    let mut out = String::with_capacity(url.len());
    let mut rest = url;
    while let Some(pos) = rest.find('%') {
        let (head, tail) = rest.split_at(pos);
        out.extend(utf8_percent_encode(head, URL_SAFE));
        let tail = &tail[1..];
        if matches!(tail.as_bytes(), [a, b, ..] if a.is_ascii_hexdigit() && b.is_ascii_hexdigit())
        {
            out.push('%');
        } else {
            out.push_str("%25");
        }
        rest = tail;
    }
    out.extend(utf8_percent_encode(rest, URL_SAFE));
    out
}
