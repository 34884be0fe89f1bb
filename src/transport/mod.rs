// (c) 2025 Ross Younger
//! # 🔌 The transport state machine
//!
//! A [`Transport`] owns one HTTP/2 [`Connection`](crate::stream::Connection) and multiplexes
//! onto it a downchannel, an occasional ping, and a bounded pool of event streams.
//!
//! All state lives in a single tokio task. [`Transport`] handles post commands into its
//! mailbox; stream callbacks (which run in the connection's I/O context) post stream events
//! into the same mailbox, so everything the state machine does happens in order on one task.
//!
//! ## Lifecycle
//!
//! | State | Leaves when |
//! | --- | --- |
//! | `DISCONNECTED` | [`connect()`](Transport::connect) is called |
//! | `AUTHORIZING` | the [`AuthDelegate`] reports a refreshed, non-empty credential |
//! | `CONNECTING` | the downchannel answers 2xx; failures retry with exponential backoff |
//! | `POST_CONNECTING` | the [`PostConnect`] handshake reports success or failure |
//! | `CONNECTED` | the connection is torn down |
//! | `DISCONNECTING` | teardown has completed every outstanding message |
//!
//! Teardown happens on [`disconnect()`](Transport::disconnect),
//! [`shutdown()`](Transport::shutdown), when the server closes the downchannel, when a ping
//! fails or times out, when the post-connect handshake fails, or when the credential becomes
//! permanently unavailable. Observers are told the [`ChangedReason`].
//!
//! ## Stream budget
//!
//! Of `max_total_streams`, one stream is reserved for the downchannel and one for pings.
//! The rest carry events. Messages wait in a first-in, first-out queue until a stream is free.
//! Messages sent by the post-connect handshake jump the queue.
//!
//! ## Credential renewal
//!
//! While an established connection's credential is expired, nothing new is sent: messages stay
//! queued and any ping is put off. Both resume once the credential is refreshed.

mod actor;
mod admission;
mod handle;
mod handler;
mod state;
mod traits;
mod watchdog;

pub use handle::{PostConnectHandle, Transport};
pub use state::TransportState;
pub use traits::{
    AuthDelegate, AuthObserver, AuthState, ChangedReason, Collaborators, EventTracer,
    MessageConsumer, PostConnect, PostConnectFactory, TransportObserver,
};
#[cfg(test)]
pub(crate) use traits::{MockEventTracer, MockMessageConsumer, MockTransportObserver};

/// Errors returned by the [`Transport`] API
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The configuration failed validation
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// [`Transport::create`] was called outside a tokio runtime
    #[error("no tokio runtime is available")]
    NoRuntime,
    /// The transport has been shut down
    #[error("the transport has shut down")]
    ShutDown,
}

#[cfg(test)]
mod test_helpers;
