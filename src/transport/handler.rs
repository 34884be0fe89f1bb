//! Per-stream response handling
// (c) 2025 Ross Younger

use std::{ops::ControlFlow, sync::Arc};

use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{
    handle::{Command, StreamEvent},
    MessageConsumer,
};
use crate::{
    message::AttachmentWriter,
    mime::{MimePartHandler, PartHeaders},
    stream::{FinishedStatus, MimeResponseHandler, RequestId},
};

#[derive(Debug)]
enum Part {
    /// Collected whole, then handed over
    Json(Vec<u8>),
    /// Streamed to the consumer's writer as it arrives
    Attachment(AttachmentWriter),
    /// Nobody wants it
    Discard,
}

/// Runs in the connection's I/O context.
///
/// Decoded parts go straight to the [`MessageConsumer`]; everything the transport needs to
/// know is posted to its mailbox as a [`StreamEvent`].
pub(super) struct StreamHandler {
    id: RequestId,
    commands: mpsc::WeakUnboundedSender<Command>,
    consumer: Option<Arc<dyn MessageConsumer>>,
    part: Option<Part>,
    code: Option<i32>,
    exception: Vec<u8>,
    exception_limit: usize,
}

impl std::fmt::Debug for StreamHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandler")
            .field("id", &self.id)
            .field("code", &self.code)
            .field("part", &self.part)
            .finish_non_exhaustive()
    }
}

impl StreamHandler {
    /// `consumer` is `None` for streams whose parts are not interesting (pings).
    /// At most `exception_limit` bytes of non-MIME body are kept.
    pub(super) fn new(
        id: RequestId,
        commands: mpsc::WeakUnboundedSender<Command>,
        consumer: Option<Arc<dyn MessageConsumer>>,
        exception_limit: usize,
    ) -> Self {
        Self {
            id,
            commands,
            consumer,
            part: None,
            code: None,
            exception: Vec::new(),
            exception_limit,
        }
    }

    fn post(&self, event: StreamEvent) {
        // If the transport has gone away there is nobody left to tell
        if let Some(tx) = self.commands.upgrade() {
            let _ = tx.send(Command::Stream(self.id.clone(), event));
        }
    }
}

impl MimePartHandler for StreamHandler {
    fn on_begin_part(&mut self, headers: &PartHeaders) -> ControlFlow<()> {
        let part = match (&self.consumer, headers.is_json(), headers.content_id()) {
            (None, _, _) => Part::Discard,
            (Some(_), true, _) => Part::Json(Vec::new()),
            (Some(consumer), false, Some(content_id)) => {
                trace!(id = %self.id, %content_id, "attachment");
                consumer
                    .begin_attachment(self.id.as_str(), content_id)
                    .map_or(Part::Discard, Part::Attachment)
            }
            (Some(_), false, None) => {
                debug!(id = %self.id, "dropping a non-JSON part without a Content-ID");
                Part::Discard
            }
        };
        self.part = Some(part);
        ControlFlow::Continue(())
    }

    fn on_part_data(&mut self, data: &[u8]) -> ControlFlow<()> {
        match &mut self.part {
            Some(Part::Json(json)) => json.extend_from_slice(data),
            Some(Part::Attachment(writer)) => writer.write(data),
            Some(Part::Discard) | None => (),
        }
        ControlFlow::Continue(())
    }

    fn on_end_part(&mut self) -> ControlFlow<()> {
        match self.part.take() {
            Some(Part::Json(json)) => {
                if let Some(consumer) = &self.consumer {
                    let message = String::from_utf8_lossy(&json);
                    trace!(id = %self.id, %message, "directive");
                    consumer.consume_message(self.id.as_str(), &message);
                }
            }
            Some(Part::Attachment(writer)) => writer.close(),
            Some(Part::Discard) | None => (),
        }
        ControlFlow::Continue(())
    }
}

impl MimeResponseHandler for StreamHandler {
    fn on_response_code(&mut self, code: i32) -> bool {
        self.code = Some(code);
        self.post(StreamEvent::ResponseCode(code));
        true
    }

    fn on_non_mime_data(&mut self, data: &[u8]) -> ControlFlow<()> {
        let room = self.exception_limit.saturating_sub(self.exception.len());
        self.exception
            .extend_from_slice(&data[..data.len().min(room)]);
        ControlFlow::Continue(())
    }

    fn on_activity(&mut self) {
        self.post(StreamEvent::Activity);
    }

    fn on_response_finished(&mut self, status: FinishedStatus) {
        if let Some(part) = self.part.take() {
            debug!(id = %self.id, %status, "response ended inside a part; part dropped");
            if let Part::Attachment(writer) = part {
                writer.fail("response ended before the attachment was complete");
            }
        }
        let exception = (!self.exception.is_empty())
            .then(|| String::from_utf8_lossy(&self.exception).into_owned());
        self.post(StreamEvent::Finished {
            status,
            code: self.code,
            exception,
        });
    }
}
