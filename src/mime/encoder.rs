//! Incremental multipart/related encoder
// (c) 2025 Ross Younger

use tracing::{trace, warn};

use super::{generate_boundary, CRLF, JSON_CONTENT_TYPE, METADATA_PART_NAME};
use crate::message::{NamedAttachment, ReadStatus};

/// Outcome of one [`MimeEncoder::poll_fill`] call
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EncoderPoll {
    /// This many bytes (always more than zero) were written to the front of the buffer
    Data(usize),
    /// An attachment has no data ready; poll again later
    Pending,
    /// The whole document has been produced
    Done,
    /// An attachment failed; the document cannot be completed
    Aborted,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Phase {
    Start,
    Json { offset: usize },
    Attachment { index: usize },
    Closing,
    Finished,
    Aborted,
}

/// Serializes a JSON payload and its attachments as a `multipart/related` document.
///
/// The encoder is a resumable state machine: each call to [`poll_fill`](Self::poll_fill) writes
/// as much as fits, and a later call carries on from exactly where the previous one stopped.
/// Framing (boundaries and part headers) is staged internally so it can be split across calls.
#[derive(Debug)]
pub struct MimeEncoder {
    boundary: String,
    json: Vec<u8>,
    attachments: Vec<NamedAttachment>,
    phase: Phase,
    staged: Vec<u8>,
    staged_pos: usize,
}

impl MimeEncoder {
    /// Creates an encoder with a fresh random boundary
    #[must_use]
    pub fn new(json: String, attachments: Vec<NamedAttachment>) -> Self {
        Self::with_boundary(generate_boundary(), json, attachments)
    }

    /// Creates an encoder with a given boundary.
    ///
    /// The boundary must not occur in the payload or any attachment.
    #[must_use]
    pub fn with_boundary(
        boundary: String,
        json: String,
        attachments: Vec<NamedAttachment>,
    ) -> Self {
        Self {
            boundary,
            json: json.into_bytes(),
            attachments,
            phase: Phase::Start,
            staged: Vec::new(),
            staged_pos: 0,
        }
    }

    /// The boundary in use
    #[must_use]
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// The value of the request's `Content-Type` header
    #[must_use]
    pub fn content_type(&self) -> String {
        format!(
            "multipart/related; boundary={}; type={JSON_CONTENT_TYPE}",
            self.boundary
        )
    }

    /// Writes the next part of the document into `buf`.
    ///
    /// [`EncoderPoll::Data`] is returned whenever anything was written, even if the encoder then
    /// ran out of input; the pause, completion or failure is reported by the following call.
    /// An empty `buf` yields [`EncoderPoll::Pending`].
    pub fn poll_fill(&mut self, buf: &mut [u8]) -> EncoderPoll {
        if buf.is_empty() {
            return EncoderPoll::Pending;
        }
        let mut written = 0;
        loop {
            written += self.flush_staged(&mut buf[written..]);
            if self.staged_pos < self.staged.len() {
                // buffer is full
                return EncoderPoll::Data(written);
            }
            match self.phase {
                Phase::Start => {
                    self.staged.clear();
                    self.staged_pos = 0;
                    self.stage_part_start(METADATA_PART_NAME.to_owned(), JSON_CONTENT_TYPE);
                    self.phase = Phase::Json { offset: 0 };
                }
                Phase::Json { offset } => {
                    let remaining = &self.json[offset..];
                    if remaining.is_empty() {
                        self.stage_after_part(0);
                        continue;
                    }
                    let room = buf.len() - written;
                    if room == 0 {
                        return EncoderPoll::Data(written);
                    }
                    let n = room.min(remaining.len());
                    buf[written..written + n].copy_from_slice(&remaining[..n]);
                    written += n;
                    self.phase = Phase::Json { offset: offset + n };
                }
                Phase::Attachment { index } => {
                    let room = buf.len() - written;
                    if room == 0 {
                        return EncoderPoll::Data(written);
                    }
                    let attachment = &mut self.attachments[index];
                    match attachment.reader.read(&mut buf[written..]) {
                        ReadStatus::Data(n) if n > room => {
                            warn!(
                                name = %attachment.name,
                                n, room, "attachment reader overran the buffer"
                            );
                            self.phase = Phase::Aborted;
                            return EncoderPoll::Aborted;
                        }
                        ReadStatus::Data(0) | ReadStatus::WouldBlock => {
                            return if written > 0 {
                                EncoderPoll::Data(written)
                            } else {
                                EncoderPoll::Pending
                            };
                        }
                        ReadStatus::Data(n) => written += n,
                        ReadStatus::Closed => {
                            trace!(name = %attachment.name, "attachment complete");
                            self.stage_after_part(index + 1);
                        }
                        ReadStatus::Error(e) => {
                            warn!(name = %attachment.name, "{e}");
                            self.phase = Phase::Aborted;
                            return EncoderPoll::Aborted;
                        }
                    }
                }
                Phase::Closing => self.phase = Phase::Finished,
                Phase::Finished => {
                    return if written > 0 {
                        EncoderPoll::Data(written)
                    } else {
                        EncoderPoll::Done
                    };
                }
                Phase::Aborted => return EncoderPoll::Aborted,
            }
        }
    }

    fn flush_staged(&mut self, buf: &mut [u8]) -> usize {
        let pending = &self.staged[self.staged_pos..];
        let n = pending.len().min(buf.len());
        buf[..n].copy_from_slice(&pending[..n]);
        self.staged_pos += n;
        n
    }

    fn stage_part_start(&mut self, name: String, content_type: &str) {
        let header = format!(
            "--{b}{CRLF}Content-Disposition: form-data; name=\"{name}\"{CRLF}Content-Type: {content_type}{CRLF}{CRLF}",
            b = self.boundary
        );
        self.staged.extend_from_slice(header.as_bytes());
    }

    /// Ends the current part's body, then opens the next attachment part or closes the document
    fn stage_after_part(&mut self, next_attachment: usize) {
        self.staged.clear();
        self.staged_pos = 0;
        self.staged.extend_from_slice(CRLF.as_bytes());
        if let Some(next) = self.attachments.get(next_attachment) {
            let name = next.name.clone();
            self.stage_part_start(name, "application/octet-stream");
            self.phase = Phase::Attachment {
                index: next_attachment,
            };
        } else {
            let close = format!("--{b}--{CRLF}", b = self.boundary);
            self.staged.extend_from_slice(close.as_bytes());
            self.phase = Phase::Closing;
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use bytes::Bytes;
    use pretty_assertions::assert_eq;

    use super::{EncoderPoll, MimeEncoder};
    use crate::message::{pipe, NamedAttachment};

    fn drain(encoder: &mut MimeEncoder, chunk: usize) -> (Vec<u8>, EncoderPoll) {
        let mut out = Vec::new();
        let mut buf = vec![0u8; chunk];
        loop {
            match encoder.poll_fill(&mut buf) {
                EncoderPoll::Data(n) => {
                    assert!(n > 0);
                    out.extend_from_slice(&buf[..n]);
                }
                other => return (out, other),
            }
        }
    }

    fn attachment(name: &str, data: &'static [u8]) -> NamedAttachment {
        NamedAttachment {
            name: name.into(),
            reader: Box::new(Bytes::from_static(data)),
        }
    }

    #[test]
    fn json_only() {
        let mut enc = MimeEncoder::with_boundary("BNDRY".into(), "aaabbccc".into(), vec![]);
        let (out, end) = drain(&mut enc, 1024);
        assert_eq!(end, EncoderPoll::Done);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "--BNDRY\r\nContent-Disposition: form-data; name=\"metadata\"\r\nContent-Type: application/json\r\n\r\naaabbccc\r\n--BNDRY--\r\n"
        );
        // stays done
        assert_eq!(enc.poll_fill(&mut [0u8; 4]), EncoderPoll::Done);
    }

    #[test]
    fn with_attachment_tiny_buffer() {
        let mut expected = Vec::new();
        for chunk in [1, 3, 7, 1024] {
            let mut enc = MimeEncoder::with_boundary(
                "xyz".into(),
                "{}".into(),
                vec![attachment("audio", b"MY_A_T_T_ACHMENT")],
            );
            let (out, end) = drain(&mut enc, chunk);
            assert_eq!(end, EncoderPoll::Done);
            if expected.is_empty() {
                expected = out;
            } else {
                assert_eq!(out, expected, "chunk size {chunk}");
            }
        }
        let text = String::from_utf8(expected).unwrap();
        assert_eq!(
            text,
            "--xyz\r\nContent-Disposition: form-data; name=\"metadata\"\r\nContent-Type: application/json\r\n\r\n{}\r\n\
             --xyz\r\nContent-Disposition: form-data; name=\"audio\"\r\nContent-Type: application/octet-stream\r\n\r\nMY_A_T_T_ACHMENT\r\n\
             --xyz--\r\n"
        );
    }

    #[test]
    fn pauses_when_attachment_is_empty() {
        let (writer, reader) = pipe();
        let mut enc = MimeEncoder::with_boundary(
            "b".into(),
            "{}".into(),
            vec![NamedAttachment {
                name: "audio".into(),
                reader: Box::new(reader),
            }],
        );
        let (first, end) = drain(&mut enc, 64);
        assert_eq!(end, EncoderPoll::Pending);
        assert!(String::from_utf8_lossy(&first).ends_with("octet-stream\r\n\r\n"));
        // still nothing: pause again, no zero-length data
        assert_eq!(enc.poll_fill(&mut [0u8; 64]), EncoderPoll::Pending);

        writer.write(b"PCM");
        let (second, end) = drain(&mut enc, 64);
        assert_eq!(second, b"PCM");
        assert_eq!(end, EncoderPoll::Pending);

        writer.close();
        let (third, end) = drain(&mut enc, 64);
        assert_eq!(end, EncoderPoll::Done);
        assert_eq!(third, b"\r\n--b--\r\n");
    }

    #[test]
    fn attachment_failure_aborts() {
        let (writer, reader) = pipe();
        writer.write(b"partial");
        writer.fail("gone");
        let mut enc = MimeEncoder::with_boundary(
            "b".into(),
            "{}".into(),
            vec![NamedAttachment {
                name: "audio".into(),
                reader: Box::new(reader),
            }],
        );
        let (_, end) = drain(&mut enc, 64);
        assert_eq!(end, EncoderPoll::Aborted);
        assert_eq!(enc.poll_fill(&mut [0u8; 64]), EncoderPoll::Aborted);
    }

    #[test]
    fn random_boundary() {
        let a = MimeEncoder::new("{}".into(), vec![]);
        let b = MimeEncoder::new("{}".into(), vec![]);
        assert_ne!(a.boundary(), b.boundary());
        assert_eq!(
            a.content_type(),
            format!(
                "multipart/related; boundary={}; type=application/json",
                a.boundary()
            )
        );
    }

    #[test]
    fn empty_buffer_is_not_progress() {
        let mut enc = MimeEncoder::with_boundary("b".into(), "{}".into(), vec![]);
        assert_eq!(enc.poll_fill(&mut []), EncoderPoll::Pending);
    }
}
