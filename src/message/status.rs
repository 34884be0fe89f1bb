//! Terminal status of an outbound message
// (c) 2025 Ross Younger

use crate::stream::FinishedStatus;

/// The outcome of sending one [`MessageRequest`](super::MessageRequest).
///
/// Every message submitted to the transport ends with exactly one of these.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    /// The server accepted the message and replied 200
    Success,
    /// The server accepted the message and replied 204
    SuccessNoContent,
    /// The transport was not connected, or disconnected before the message was sent
    NotConnected,
    /// The message was in flight when the transport disconnected
    Canceled,
    /// The connection gave up waiting for the server
    TimedOut,
    /// Something went wrong locally (no response code, encoding failure, refused request)
    InternalError,
    /// The server replied 400
    BadRequest,
    /// The server replied 403, or no credential was available
    InvalidAuth,
    /// The server replied 500
    ServerInternalError,
    /// Any other response code
    ServerOtherError,
}

impl MessageStatus {
    /// Whether this status means the server accepted the message
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success | Self::SuccessNoContent)
    }
}

/// Maps the way a request finished, and the response code if one was received, to a
/// [`MessageStatus`].
///
/// This is a total function: every combination of inputs has exactly one result.
#[must_use]
pub fn map_message_status(code: Option<i32>, finished: FinishedStatus) -> MessageStatus {
    match finished {
        FinishedStatus::Cancelled => return MessageStatus::Canceled,
        FinishedStatus::Timeout => return MessageStatus::TimedOut,
        FinishedStatus::InternalError => return MessageStatus::InternalError,
        FinishedStatus::Complete => (),
    }
    match code {
        None => MessageStatus::InternalError,
        Some(200) => MessageStatus::Success,
        Some(204) => MessageStatus::SuccessNoContent,
        Some(400) => MessageStatus::BadRequest,
        Some(403) => MessageStatus::InvalidAuth,
        Some(500) => MessageStatus::ServerInternalError,
        Some(_) => MessageStatus::ServerOtherError,
    }
}
