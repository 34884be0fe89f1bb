//! Outbound message requests
// (c) 2025 Ross Younger

use std::{fmt, sync::Arc};

use tracing::trace;

use super::{AttachmentReader, MessageStatus};

/// Receives the outcome of a [`MessageRequest`].
pub trait MessageRequestObserver: Send + Sync {
    /// Called exactly once, when the message reaches its terminal status
    fn on_send_completed(&self, status: MessageStatus);

    /// Called before [`on_send_completed`](Self::on_send_completed) when the server replied with
    /// an error and a human-readable body
    fn on_exception_received(&self, _message: &str) {}
}

/// An attachment and the name of the MIME part that carries it
pub struct NamedAttachment {
    /// Field name, sent as the `Content-Disposition` name of the part
    pub name: String,
    /// Where the bytes come from
    pub reader: Box<dyn AttachmentReader>,
}

impl fmt::Debug for NamedAttachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedAttachment")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// One outbound event: a JSON payload plus optional attachments
///
/// ```
/// use downchannel::message::MessageRequest;
/// use bytes::Bytes;
/// let msg = MessageRequest::new(r#"{"event":{}}"#)
///     .with_attachment("audio", Bytes::from_static(b"\x00\x01"))
///     .with_uri_path_extension("/v20160207/events");
/// assert_eq!(msg.attachment_count(), 1);
/// ```
pub struct MessageRequest {
    json: String,
    uri_path_extension: Option<String>,
    attachments: Vec<NamedAttachment>,
    observers: Vec<Arc<dyn MessageRequestObserver>>,
}

impl fmt::Debug for MessageRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageRequest")
            .field("json_len", &self.json.len())
            .field("uri_path_extension", &self.uri_path_extension)
            .field("attachments", &self.attachments)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl MessageRequest {
    /// Creates a message carrying the given JSON payload
    #[must_use]
    pub fn new<S: Into<String>>(json: S) -> Self {
        Self {
            json: json.into(),
            uri_path_extension: None,
            attachments: Vec::new(),
            observers: Vec::new(),
        }
    }

    /// Adds an attachment, sent as a MIME part after the JSON
    #[must_use]
    pub fn with_attachment<R>(mut self, name: &str, reader: R) -> Self
    where
        R: AttachmentReader + 'static,
    {
        self.attachments.push(NamedAttachment {
            name: name.to_owned(),
            reader: Box::new(reader),
        });
        self
    }

    /// Sends this message to the given path instead of the configured event path
    #[must_use]
    pub fn with_uri_path_extension(mut self, path: &str) -> Self {
        self.uri_path_extension = Some(path.to_owned());
        self
    }

    /// Registers an observer (builder form of [`add_observer`](Self::add_observer))
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn MessageRequestObserver>) -> Self {
        self.add_observer(observer);
        self
    }

    /// Registers an observer, to be told the outcome
    pub fn add_observer(&mut self, observer: Arc<dyn MessageRequestObserver>) {
        self.observers.push(observer);
    }

    /// The JSON payload
    #[must_use]
    pub fn json(&self) -> &str {
        &self.json
    }

    /// The path override, if any
    #[must_use]
    pub fn uri_path_extension(&self) -> Option<&str> {
        self.uri_path_extension.as_deref()
    }

    /// Number of attachments
    #[must_use]
    pub fn attachment_count(&self) -> usize {
        self.attachments.len()
    }

    /// Completes a message that never left the queue
    pub(crate) fn complete(self, status: MessageStatus) {
        let (_, completion) = self.into_parts();
        completion.complete(status);
    }

    /// Splits the message into what the encoder needs and what the transport keeps to report
    /// the outcome
    pub(crate) fn into_parts(self) -> (OutboundBody, MessageCompletion) {
        (
            OutboundBody {
                json: self.json,
                uri_path_extension: self.uri_path_extension,
                attachments: self.attachments,
            },
            MessageCompletion {
                observers: self.observers,
            },
        )
    }
}

/// The sendable content of a [`MessageRequest`]
#[derive(Debug)]
pub(crate) struct OutboundBody {
    pub(crate) json: String,
    pub(crate) uri_path_extension: Option<String>,
    pub(crate) attachments: Vec<NamedAttachment>,
}

/// The observers of a message that has been taken apart for sending.
///
/// [`complete`](Self::complete) consumes the value, so a message cannot be completed twice.
pub(crate) struct MessageCompletion {
    observers: Vec<Arc<dyn MessageRequestObserver>>,
}

impl fmt::Debug for MessageCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageCompletion")
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl MessageCompletion {
    pub(crate) fn exception_received(&self, text: &str) {
        for o in &self.observers {
            o.on_exception_received(text);
        }
    }

    pub(crate) fn complete(self, status: MessageStatus) {
        trace!(%status, observers = self.observers.len(), "message completed");
        for o in &self.observers {
            o.on_send_completed(status);
        }
    }
}
