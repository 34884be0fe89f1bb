//! Outbound messages and their lifecycle
// (c) 2025 Ross Younger
//!
//! A [`MessageRequest`] is a JSON payload with zero or more named binary attachments.
//! Once handed to the [`Transport`](crate::Transport) it is in exactly one of three places:
//! the pending queue, in flight on an EVENT stream, or completed. Completion is reported to
//! every registered [`MessageRequestObserver`] exactly once, as a [`MessageStatus`].

mod attachment;
pub use attachment::{pipe, AttachmentError, AttachmentReader, AttachmentWriter, PipeReader, ReadStatus};

mod request;
pub(crate) use request::{MessageCompletion, OutboundBody};
pub use request::{MessageRequest, MessageRequestObserver, NamedAttachment};

mod status;
pub use status::{map_message_status, MessageStatus};
