//! Request source for event bodies
// (c) 2025 Ross Younger

use super::{authorization_header, RequestSource, SendResult};
use crate::mime::{EncoderPoll, MimeEncoder};

/// Feeds a [`MimeEncoder`] to the connection
#[derive(Debug)]
pub struct MimeRequestSource {
    encoder: MimeEncoder,
    token: String,
}

impl MimeRequestSource {
    /// Constructor. `token` is sent in the `Authorization` header.
    #[must_use]
    pub fn new(encoder: MimeEncoder, token: String) -> Self {
        Self { encoder, token }
    }
}

impl RequestSource for MimeRequestSource {
    fn header_lines(&mut self) -> Vec<String> {
        vec![
            authorization_header(&self.token),
            format!("Content-Type: {}", self.encoder.content_type()),
        ]
    }

    fn on_send_data(&mut self, buf: &mut [u8]) -> SendResult {
        match self.encoder.poll_fill(buf) {
            EncoderPoll::Data(n) => SendResult::data(n),
            EncoderPoll::Pending => SendResult::PAUSE,
            EncoderPoll::Done => SendResult::COMPLETE,
            EncoderPoll::Aborted => SendResult::ABORT,
        }
    }
}
