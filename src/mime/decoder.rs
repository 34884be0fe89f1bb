//! Incremental multipart decoder
// (c) 2025 Ross Younger

use std::ops::ControlFlow;

use bytes::{Buf as _, BytesMut};
use tracing::trace;

use super::{PartHeaders, CRLF};

/// Upper bound on the total size of one part's header block
pub const MAX_PART_HEADER_BYTES: usize = 8192;

/// Receives the parts of a multipart document as they are decoded.
///
/// For each part: [`on_begin_part`](Self::on_begin_part), then zero or more
/// [`on_part_data`](Self::on_part_data), then [`on_end_part`](Self::on_end_part).
/// Returning [`ControlFlow::Break`] stops decoding.
pub trait MimePartHandler {
    /// A part's headers have been read
    fn on_begin_part(&mut self, headers: &PartHeaders) -> ControlFlow<()>;
    /// Some of the current part's body
    fn on_part_data(&mut self, data: &[u8]) -> ControlFlow<()>;
    /// The current part has ended
    fn on_end_part(&mut self) -> ControlFlow<()>;
}

/// Why decoding failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum DecodeErrorKind {
    /// A part's header block grew beyond [`MAX_PART_HEADER_BYTES`]
    #[strum(to_string = "part headers too long")]
    HeadersTooLong,
    /// A part header line had no colon
    #[strum(to_string = "malformed part header")]
    MalformedHeader,
    /// A delimiter was followed by something other than CRLF or `--`
    #[strum(to_string = "malformed boundary delimiter")]
    BadDelimiter,
    /// The body ended before the closing delimiter
    #[strum(to_string = "document truncated")]
    Truncated,
}

/// A decoding failure, with the bytes that had not been consumed when it happened
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}")]
pub struct DecodeError {
    /// What went wrong
    pub kind: DecodeErrorKind,
    /// Input that was received but not delivered to the handler
    pub unparsed: Vec<u8>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum State {
    /// Before the first delimiter; bytes here are discarded
    Preamble,
    /// Just read a delimiter; expecting CRLF (next part) or `--` (end)
    AfterDelimiter,
    Headers,
    Body,
    /// After the closing delimiter; bytes here are discarded
    Epilogue,
    Failed,
}

/// Push-style decoder for one multipart document.
///
/// Chunks may split the document anywhere, including in the middle of a delimiter. Between calls
/// the decoder keeps only the bytes that might still turn out to be part of a delimiter or of an
/// incomplete header line.
#[derive(Debug)]
pub struct MimeDecoder {
    /// `CRLF--boundary`
    delimiter: Vec<u8>,
    state: State,
    carry: BytesMut,
    headers: PartHeaders,
    header_bytes: usize,
}

impl MimeDecoder {
    /// Creates a decoder for the given boundary (without leading dashes)
    #[must_use]
    pub fn new(boundary: &str) -> Self {
        let delimiter = format!("{CRLF}--{boundary}").into_bytes();
        let mut carry = BytesMut::with_capacity(delimiter.len() * 2);
        // The first delimiter may appear at the very start of the body, without a preceding CRLF.
        carry.extend_from_slice(CRLF.as_bytes());
        Self {
            delimiter,
            state: State::Preamble,
            carry,
            headers: PartHeaders::default(),
            header_bytes: 0,
        }
    }

    /// Whether the closing delimiter has been seen
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state == State::Epilogue
    }

    /// Decodes a chunk of input.
    ///
    /// Returns `Break` if the handler asked to stop. After an error, the decoder is unusable;
    /// the error carries the bytes it had not delivered.
    pub fn feed<H>(&mut self, chunk: &[u8], handler: &mut H) -> Result<ControlFlow<()>, DecodeError>
    where
        H: MimePartHandler + ?Sized,
    {
        self.carry.extend_from_slice(chunk);
        self.process(handler)
    }

    /// Signals the end of input. Fails if the document was not properly closed.
    pub fn finish(&mut self) -> Result<(), DecodeError> {
        match self.state {
            State::Epilogue => Ok(()),
            _ => Err(self.fail(DecodeErrorKind::Truncated)),
        }
    }

    fn fail(&mut self, kind: DecodeErrorKind) -> DecodeError {
        self.state = State::Failed;
        DecodeError {
            kind,
            unparsed: self.carry.split().to_vec(),
        }
    }

    #[allow(clippy::too_many_lines)]
    fn process<H>(&mut self, handler: &mut H) -> Result<ControlFlow<()>, DecodeError>
    where
        H: MimePartHandler + ?Sized,
    {
        loop {
            match self.state {
                State::Preamble => {
                    if let Some(at) = find(&self.carry, &self.delimiter) {
                        self.carry.advance(at + self.delimiter.len());
                        self.state = State::AfterDelimiter;
                    } else {
                        let keep = partial_suffix_len(&self.carry, &self.delimiter);
                        self.carry.advance(self.carry.len() - keep);
                        return Ok(ControlFlow::Continue(()));
                    }
                }
                State::AfterDelimiter => {
                    // RFC 2046 transport padding
                    let padding = self
                        .carry
                        .iter()
                        .take_while(|b| **b == b' ' || **b == b'\t')
                        .count();
                    self.carry.advance(padding);
                    if self.carry.len() < 2 {
                        return Ok(ControlFlow::Continue(()));
                    }
                    if self.carry.starts_with(b"--") {
                        trace!("closing delimiter");
                        self.carry.clear();
                        self.state = State::Epilogue;
                        return Ok(ControlFlow::Continue(()));
                    }
                    if !self.carry.starts_with(CRLF.as_bytes()) {
                        return Err(self.fail(DecodeErrorKind::BadDelimiter));
                    }
                    self.carry.advance(2);
                    self.headers = PartHeaders::default();
                    self.header_bytes = 0;
                    self.state = State::Headers;
                }
                State::Headers => match find(&self.carry, CRLF.as_bytes()) {
                    None => {
                        if self.header_bytes + self.carry.len() > MAX_PART_HEADER_BYTES {
                            return Err(self.fail(DecodeErrorKind::HeadersTooLong));
                        }
                        return Ok(ControlFlow::Continue(()));
                    }
                    Some(0) => {
                        self.carry.advance(2);
                        self.state = State::Body;
                        trace!(headers = ?self.headers, "begin part");
                        if handler.on_begin_part(&self.headers).is_break() {
                            return Ok(ControlFlow::Break(()));
                        }
                    }
                    Some(at) => {
                        self.header_bytes += at + 2;
                        if self.header_bytes > MAX_PART_HEADER_BYTES {
                            return Err(self.fail(DecodeErrorKind::HeadersTooLong));
                        }
                        let line = String::from_utf8_lossy(&self.carry[..at]).into_owned();
                        let Some((name, value)) = line.split_once(':') else {
                            return Err(self.fail(DecodeErrorKind::MalformedHeader));
                        };
                        self.headers.push(name.trim(), value.trim());
                        self.carry.advance(at + 2);
                    }
                },
                State::Body => {
                    if let Some(at) = find(&self.carry, &self.delimiter) {
                        let flow = if at > 0 {
                            handler.on_part_data(&self.carry[..at])
                        } else {
                            ControlFlow::Continue(())
                        };
                        self.carry.advance(at + self.delimiter.len());
                        self.state = State::AfterDelimiter;
                        if flow.is_break() || handler.on_end_part().is_break() {
                            return Ok(ControlFlow::Break(()));
                        }
                    } else {
                        let keep = partial_suffix_len(&self.carry, &self.delimiter);
                        let emit = self.carry.len() - keep;
                        if emit > 0 {
                            let flow = handler.on_part_data(&self.carry[..emit]);
                            self.carry.advance(emit);
                            if flow.is_break() {
                                return Ok(ControlFlow::Break(()));
                            }
                        }
                        return Ok(ControlFlow::Continue(()));
                    }
                }
                State::Epilogue => {
                    self.carry.clear();
                    return Ok(ControlFlow::Continue(()));
                }
                State::Failed => {
                    return Err(DecodeError {
                        kind: DecodeErrorKind::BadDelimiter,
                        unparsed: self.carry.split().to_vec(),
                    });
                }
            }
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Length of the longest suffix of `data` that is a proper prefix of `delimiter`
fn partial_suffix_len(data: &[u8], delimiter: &[u8]) -> usize {
    (1..delimiter.len().min(data.len() + 1))
        .rev()
        .find(|&k| data.ends_with(&delimiter[..k]))
        .unwrap_or(0)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::ops::ControlFlow;

    use pretty_assertions::assert_eq;

    use super::{partial_suffix_len, DecodeErrorKind, MimeDecoder, MimePartHandler};
    use crate::mime::PartHeaders;

    #[derive(Default, Debug)]
    struct Collector {
        parts: Vec<(PartHeaders, Vec<u8>)>,
        open: bool,
        stop_after_parts: Option<usize>,
    }

    impl MimePartHandler for Collector {
        fn on_begin_part(&mut self, headers: &PartHeaders) -> ControlFlow<()> {
            assert!(!self.open);
            self.open = true;
            self.parts.push((headers.clone(), Vec::new()));
            ControlFlow::Continue(())
        }
        fn on_part_data(&mut self, data: &[u8]) -> ControlFlow<()> {
            assert!(self.open);
            assert!(!data.is_empty());
            self.parts.last_mut().unwrap().1.extend_from_slice(data);
            ControlFlow::Continue(())
        }
        fn on_end_part(&mut self) -> ControlFlow<()> {
            assert!(self.open);
            self.open = false;
            if self.stop_after_parts == Some(self.parts.len()) {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        }
    }

    const DOC: &str = "preamble text\r\n\
        --frontier\r\n\
        Content-Type: application/json\r\n\
        \r\n\
        {\"directive\":1}\r\n\
        --frontier  \r\n\
        Content-Type: application/octet-stream\r\n\
        Content-ID: <att1>\r\n\
        \r\n\
        binary\r\n--front data\r\n\
        --frontier--\r\n\
        epilogue";

    fn check(c: &Collector) {
        assert_eq!(c.parts.len(), 2);
        assert!(c.parts[0].0.is_json());
        assert_eq!(c.parts[0].1, b"{\"directive\":1}");
        assert_eq!(c.parts[1].0.content_id(), Some("att1"));
        assert_eq!(c.parts[1].1, b"binary\r\n--front data");
        assert!(!c.open);
    }

    #[test]
    fn whole_document() {
        let mut d = MimeDecoder::new("frontier");
        let mut c = Collector::default();
        assert_eq!(d.feed(DOC.as_bytes(), &mut c).unwrap(), ControlFlow::Continue(()));
        assert!(d.is_finished());
        d.finish().unwrap();
        check(&c);
    }

    #[test]
    fn every_split_point() {
        let bytes = DOC.as_bytes();
        for split in 0..=bytes.len() {
            let mut d = MimeDecoder::new("frontier");
            let mut c = Collector::default();
            let _ = d.feed(&bytes[..split], &mut c).unwrap();
            let _ = d.feed(&bytes[split..], &mut c).unwrap();
            d.finish().unwrap();
            check(&c);
        }
    }

    #[test]
    fn byte_at_a_time() {
        let mut d = MimeDecoder::new("frontier");
        let mut c = Collector::default();
        for b in DOC.as_bytes() {
            let _ = d.feed(std::slice::from_ref(b), &mut c).unwrap();
            // never hold on to more than a delimiter's worth of body bytes
            assert!(d.carry.len() <= 64, "{}", d.carry.len());
        }
        d.finish().unwrap();
        check(&c);
    }

    #[test]
    fn delimiter_at_start_of_body() {
        let mut d = MimeDecoder::new("b");
        let mut c = Collector::default();
        let _ = d
            .feed(b"--b\r\nX: y\r\n\r\nhello\r\n--b--", &mut c)
            .unwrap();
        d.finish().unwrap();
        assert_eq!(c.parts.len(), 1);
        assert_eq!(c.parts[0].0.get("x"), Some("y"));
        assert_eq!(c.parts[0].1, b"hello");
    }

    #[test]
    fn handler_can_stop() {
        let mut d = MimeDecoder::new("frontier");
        let mut c = Collector {
            stop_after_parts: Some(1),
            ..Default::default()
        };
        assert_eq!(d.feed(DOC.as_bytes(), &mut c).unwrap(), ControlFlow::Break(()));
        assert_eq!(c.parts.len(), 1);
    }

    #[test]
    fn truncated() {
        let mut d = MimeDecoder::new("b");
        let mut c = Collector::default();
        let _ = d.feed(b"--b\r\n\r\nhalf a pa", &mut c).unwrap();
        let e = d.finish().unwrap_err();
        assert_eq!(e.kind, DecodeErrorKind::Truncated);
    }

    #[test]
    fn malformed_header_returns_unparsed() {
        let mut d = MimeDecoder::new("b");
        let mut c = Collector::default();
        let e = d
            .feed(b"--b\r\nno colon here\r\n\r\nbody", &mut c)
            .unwrap_err();
        assert_eq!(e.kind, DecodeErrorKind::MalformedHeader);
        assert_eq!(e.unparsed, b"no colon here\r\n\r\nbody");
        // unusable afterwards
        assert!(d.feed(b"more", &mut c).is_err());
    }

    #[test]
    fn oversized_headers() {
        let mut d = MimeDecoder::new("b");
        let mut c = Collector::default();
        let _ = d.feed(b"--b\r\nX-Long: ", &mut c).unwrap();
        let big = vec![b'a'; super::MAX_PART_HEADER_BYTES];
        let e = d.feed(&big, &mut c).unwrap_err();
        assert_eq!(e.kind, DecodeErrorKind::HeadersTooLong);
    }

    #[test]
    fn bad_delimiter() {
        let mut d = MimeDecoder::new("b");
        let mut c = Collector::default();
        let e = d.feed(b"--b\r\n\r\nx\r\n--bzz", &mut c).unwrap_err();
        assert_eq!(e.kind, DecodeErrorKind::BadDelimiter);
    }

    #[test]
    fn suffixes() {
        let delim = b"\r\n--abc";
        assert_eq!(partial_suffix_len(b"hello", delim), 0);
        assert_eq!(partial_suffix_len(b"hello\r", delim), 1);
        assert_eq!(partial_suffix_len(b"hello\r\n--ab", delim), 6);
        assert_eq!(partial_suffix_len(b"\r\n-", delim), 3);
        assert_eq!(partial_suffix_len(b"", delim), 0);
    }
}
