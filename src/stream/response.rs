//! Response sink that decodes MIME bodies
// (c) 2025 Ross Younger

use std::ops::ControlFlow;

use tracing::{debug, error, warn};

use super::{FinishedStatus, ReceiveStatus, ResponseSink};
use crate::mime::{boundary_from_content_type, MimeDecoder, MimePartHandler};

/// Receives a decoded response.
///
/// MIME parts arrive through the [`MimePartHandler`] methods. A body without a multipart
/// `Content-Type`, or one that fails to parse, arrives through
/// [`on_non_mime_data`](Self::on_non_mime_data) instead.
pub trait MimeResponseHandler: MimePartHandler + Send {
    /// The HTTP status code. Returns false to refuse the response.
    fn on_response_code(&mut self, code: i32) -> bool;

    /// Body bytes that are not part of a MIME document
    fn on_non_mime_data(&mut self, data: &[u8]) -> ControlFlow<()>;

    /// Called for every chunk received, before it is decoded
    fn on_activity(&mut self) {}

    /// The request has ended
    fn on_response_finished(&mut self, status: FinishedStatus);
}

/// Adapts a [`MimeResponseHandler`] to the [`ResponseSink`] interface the connection drives.
#[derive(Debug)]
pub struct MimeResponseDecoder<H> {
    handler: H,
    code: Option<i32>,
    decoder: Option<MimeDecoder>,
    passthrough: bool,
    aborted: bool,
}

impl<H: MimeResponseHandler> MimeResponseDecoder<H> {
    /// Constructor
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            code: None,
            decoder: None,
            passthrough: false,
            aborted: false,
        }
    }

    /// Accessor
    pub fn handler(&self) -> &H {
        &self.handler
    }

    fn violation(&mut self, what: &str) -> bool {
        error!("{what} received before the response code; refusing response");
        self.aborted = true;
        false
    }
}

impl<H: MimeResponseHandler> ResponseSink for MimeResponseDecoder<H> {
    fn on_receive_response_code(&mut self, code: i32) -> bool {
        if self.aborted {
            return false;
        }
        if let Some(previous) = self.code {
            warn!(previous, code, "second response code ignored");
            return true;
        }
        self.code = Some(code);
        self.handler.on_response_code(code)
    }

    fn on_receive_header_line(&mut self, line: &str) -> bool {
        if self.aborted {
            return false;
        }
        if self.code.is_none() {
            return self.violation("header line");
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-type") {
                if let Some(boundary) = boundary_from_content_type(value) {
                    debug!(%boundary, "multipart response");
                    self.decoder = Some(MimeDecoder::new(&boundary));
                }
            }
        }
        true
    }

    fn on_receive_data(&mut self, data: &[u8]) -> ReceiveStatus {
        if self.aborted {
            return ReceiveStatus::Abort;
        }
        if self.code.is_none() {
            let _ = self.violation("body data");
            return ReceiveStatus::Abort;
        }
        self.handler.on_activity();
        let flow = match &mut self.decoder {
            Some(decoder) if !self.passthrough => match decoder.feed(data, &mut self.handler) {
                Ok(flow) => flow,
                Err(e) => {
                    warn!("{e}; delivering the rest of the body undecoded");
                    self.passthrough = true;
                    if e.unparsed.is_empty() {
                        ControlFlow::Continue(())
                    } else {
                        self.handler.on_non_mime_data(&e.unparsed)
                    }
                }
            },
            _ => self.handler.on_non_mime_data(data),
        };
        if flow.is_break() {
            self.aborted = true;
            ReceiveStatus::Abort
        } else {
            ReceiveStatus::Success
        }
    }

    fn on_response_finished(&mut self, status: FinishedStatus) {
        if let Some(decoder) = &mut self.decoder {
            if status == FinishedStatus::Complete && !self.passthrough && !self.aborted {
                if let Err(e) = decoder.finish() {
                    warn!("response body: {e}");
                    if !e.unparsed.is_empty() {
                        let _ = self.handler.on_non_mime_data(&e.unparsed);
                    }
                }
            }
        }
        self.handler.on_response_finished(status);
    }
}
