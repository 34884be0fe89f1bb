//! Collaborators of the transport
// (c) 2025 Ross Younger

use std::{fmt, sync::Arc};

#[cfg(test)]
use mockall::automock;

use super::PostConnectHandle;
use crate::{message::AttachmentWriter, stream::Connection};

/// Why the transport disconnected
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangedReason {
    /// The application called `disconnect()` or `shutdown()`
    ClientRequest,
    /// The server closed the downchannel
    ServerSideDisconnect,
    /// The connection was inactive and a ping went unanswered
    PingTimedOut,
    /// A ping was answered with an error
    PingFailed,
    /// The post-connect handshake failed
    PostConnectFailed,
    /// The credential is permanently unusable
    InvalidAuth,
    /// Something else went wrong
    InternalError,
}

/// Told about changes in connectivity
#[cfg_attr(test, automock)]
pub trait TransportObserver: Send + Sync {
    /// The transport has become fully connected
    fn on_connected(&self);
    /// The transport has disconnected
    fn on_disconnected(&self, reason: ChangedReason);
    /// The server closed the connection. Always followed by
    /// [`on_disconnected`](Self::on_disconnected).
    fn on_server_side_disconnect(&self) {}
}

/// Receives inbound directives
#[cfg_attr(test, automock)]
pub trait MessageConsumer: Send + Sync {
    /// One JSON part, from the downchannel or from an event response.
    /// `context_id` identifies the request that carried it.
    fn consume_message(&self, context_id: &str, message: &str);

    /// A non-JSON part is starting, keyed by its `Content-ID`.
    ///
    /// The part's bytes are written to the returned writer as they arrive, and the writer is
    /// closed when the part ends (or failed, if the response ends first).
    /// Returning `None` discards the part.
    fn begin_attachment(&self, _context_id: &str, _content_id: &str) -> Option<AttachmentWriter> {
        None
    }
}

/// Sees the JSON payload of every event the connection accepts
#[cfg_attr(test, automock)]
pub trait EventTracer: Send + Sync {
    /// An event request has been handed to the connection
    fn trace_event(&self, json: &str);
}

/// State of the credential held by an [`AuthDelegate`]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthState {
    /// No credential yet
    #[default]
    Uninitialized,
    /// A current credential is available
    Refreshed,
    /// The credential has expired and is being renewed
    Expired,
    /// No credential will ever be available
    UnrecoverableError,
}

/// Told when the credential changes
pub trait AuthObserver: Send + Sync {
    /// The credential state has changed
    fn on_auth_state_change(&self, state: AuthState);
}

/// Supplies credentials.
///
/// Implementations must report the current state to an observer as soon as it is added.
pub trait AuthDelegate: Send + Sync {
    /// Registers an observer
    fn add_auth_observer(&self, observer: Arc<dyn AuthObserver>);
    /// Removes an observer previously added
    fn remove_auth_observer(&self, observer: &Arc<dyn AuthObserver>);
    /// The current token, or an empty string if there is none
    fn auth_token(&self) -> String;
    /// The server rejected this token
    fn on_auth_failure(&self, _token: &str) {}
}

/// The handshake run once the downchannel is up, before the transport reports itself connected.
///
/// The handshake typically sends one or more messages with
/// [`PostConnectHandle::send_post_connect_message`], then calls
/// [`PostConnectHandle::on_post_connected`] or [`PostConnectHandle::on_post_connect_failed`].
pub trait PostConnect: Send {
    /// Starts the handshake. Returning false fails it immediately.
    fn do_post_connect(&mut self, transport: PostConnectHandle) -> bool;
    /// The connection dropped before the handshake finished
    fn on_disconnect(&mut self) {}
}

/// Creates a [`PostConnect`] for each connection attempt
pub trait PostConnectFactory: Send + Sync {
    /// Returns `None` if no handshake object could be created
    fn create_post_connect(&self) -> Option<Box<dyn PostConnect>>;
}

/// Everything the transport depends on
#[derive(Clone)]
pub struct Collaborators {
    /// The HTTP/2 connection
    pub connection: Arc<dyn Connection>,
    /// Credentials
    pub auth: Arc<dyn AuthDelegate>,
    /// Where inbound directives go
    pub consumer: Arc<dyn MessageConsumer>,
    /// Post-connect handshakes
    pub post_connect: Arc<dyn PostConnectFactory>,
    /// Optional record of outbound events
    pub event_tracer: Option<Arc<dyn EventTracer>>,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
