//! # 📖 MIME multipart encoding and decoding
// (c) 2025 Ross Younger
//!
//! Requests and responses on the event and downchannel streams are `multipart/related`
//! documents. On the wire, a document with a JSON part and one attachment looks like this:
//!
//! ```text
//! --B\r\n
//! Content-Disposition: form-data; name="metadata"\r\n
//! Content-Type: application/json\r\n
//! \r\n
//! {"event":...}\r\n
//! --B\r\n
//! Content-Disposition: form-data; name="audio"\r\n
//! Content-Type: application/octet-stream\r\n
//! \r\n
//! <bytes>\r\n
//! --B--\r\n
//! ```
//!
//! Both directions work incrementally. The [`MimeEncoder`] is pulled a buffer at a time by the
//! connection; the [`MimeDecoder`] is pushed whatever chunks arrive and reports parts through a
//! [`MimePartHandler`].

use std::fmt;

use rand::{distributions::Alphanumeric, Rng as _};

mod decoder;
pub use decoder::{
    DecodeError, DecodeErrorKind, MimeDecoder, MimePartHandler, MAX_PART_HEADER_BYTES,
};

mod encoder;
pub use encoder::{EncoderPoll, MimeEncoder};

pub(crate) const CRLF: &str = "\r\n";
pub(crate) const JSON_CONTENT_TYPE: &str = "application/json";
pub(crate) const METADATA_PART_NAME: &str = "metadata";

/// Length of generated boundaries
pub const BOUNDARY_LENGTH: usize = 32;

/// Generates a random boundary string
#[must_use]
pub fn generate_boundary() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(BOUNDARY_LENGTH)
        .map(char::from)
        .collect()
}

/// Extracts the boundary parameter from a `Content-Type` header value, if the value
/// describes a multipart document.
///
/// ```
/// use downchannel::mime::boundary_from_content_type;
/// assert_eq!(
///     boundary_from_content_type("multipart/related; boundary=\"abc 123\"; type=application/json"),
///     Some("abc 123".to_string())
/// );
/// assert_eq!(boundary_from_content_type("application/json"), None);
/// ```
#[must_use]
pub fn boundary_from_content_type(value: &str) -> Option<String> {
    let mut fields = value.split(';');
    let media_type = fields.next()?.trim();
    if !media_type
        .get(..10)
        .is_some_and(|p| p.eq_ignore_ascii_case("multipart/"))
    {
        return None;
    }
    fields
        .filter_map(|param| param.split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, v)| {
            let v = v.trim();
            v.strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(v)
                .to_owned()
        })
        .filter(|b| !b.is_empty())
}

/// The headers of one MIME part, in the order received
#[derive(Clone, Default, PartialEq, Eq)]
pub struct PartHeaders(Vec<(String, String)>);

impl PartHeaders {
    /// Appends a header
    pub fn push(&mut self, name: &str, value: &str) {
        self.0.push((name.to_owned(), value.to_owned()));
    }

    /// The first value of the named header (case-insensitive)
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values of the named header (case-insensitive), in order
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.0
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether there are no headers
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of header lines
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the part declares a JSON content type
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.get("Content-Type").is_some_and(|ct| {
            ct.split(';')
                .next()
                .is_some_and(|t| t.trim().eq_ignore_ascii_case(JSON_CONTENT_TYPE))
        })
    }

    /// The `Content-ID`, without angle brackets
    #[must_use]
    pub fn content_id(&self) -> Option<&str> {
        self.get("Content-ID").map(|id| {
            let id = id.trim();
            id.strip_prefix('<')
                .and_then(|i| i.strip_suffix('>'))
                .unwrap_or(id)
        })
    }
}

impl fmt::Debug for PartHeaders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.0.iter().map(|(k, v)| (k, v)))
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::{boundary_from_content_type, generate_boundary, PartHeaders, BOUNDARY_LENGTH};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("multipart/related; boundary=abc", Some("abc"))]
    #[case("Multipart/Related;Boundary=abc;type=application/json", Some("abc"))]
    #[case("multipart/form-data; charset=utf-8; boundary=\"q u o\"", Some("q u o"))]
    #[case("multipart/related", None)]
    #[case("multipart/related; boundary=", None)]
    #[case("application/json; boundary=abc", None)]
    #[case("text", None)]
    fn content_type_parsing(#[case] value: &str, #[case] expected: Option<&str>) {
        assert_eq!(
            boundary_from_content_type(value).as_deref(),
            expected,
            "{value}"
        );
    }

    #[test]
    fn boundaries() {
        let b = generate_boundary();
        assert_eq!(b.len(), BOUNDARY_LENGTH);
        assert!(b.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(b, generate_boundary());
    }

    #[test]
    fn headers() {
        let mut h = PartHeaders::default();
        assert!(h.is_empty());
        h.push("Content-Type", "application/json; charset=UTF-8");
        h.push("content-id", "<abc123>");
        h.push("X-Thing", "1");
        h.push("x-thing", "2");
        assert_eq!(h.len(), 4);
        assert!(h.is_json());
        assert_eq!(h.content_id(), Some("abc123"));
        assert_eq!(h.get("X-THING"), Some("1"));
        assert_eq!(h.get_all("x-thing").collect::<Vec<_>>(), ["1", "2"]);

        let mut bin = PartHeaders::default();
        bin.push("Content-Type", "application/octet-stream");
        assert!(!bin.is_json());
        assert_eq!(bin.content_id(), None);
    }
}
