//! Request descriptions and the traits the connection drives
// (c) 2025 Ross Younger

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

/// What a stream is for
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum RequestKind {
    /// The long-lived stream on which the server pushes directives
    Downchannel,
    /// A keep-alive probe with an empty body
    Ping,
    /// One outbound message
    Event,
}

/// HTTP method
#[derive(Copy, Clone, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum RequestMethod {
    /// GET
    Get,
    /// POST
    Post,
}

impl RequestKind {
    /// The HTTP method used for this kind of request
    #[must_use]
    pub fn method(self) -> RequestMethod {
        match self {
            RequestKind::Downchannel | RequestKind::Ping => RequestMethod::Get,
            RequestKind::Event => RequestMethod::Post,
        }
    }
}

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a request
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(String);

impl RequestId {
    /// Allocates a fresh identifier, prefixed with the kind of request
    #[must_use]
    pub fn next(kind: RequestKind) -> Self {
        let n = NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed);
        Self(format!("{kind}-{n}"))
    }

    /// The identifier as text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a request ended, as reported by the connection
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum FinishedStatus {
    /// The response was received in full
    Complete,
    /// The request was cancelled, usually because the connection was torn down
    Cancelled,
    /// One of the request's timeouts expired
    Timeout,
    /// The connection failed in some other way
    InternalError,
}

/// What a [`RequestSource`] wants the connection to do next
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SendStatus {
    /// `size` bytes were written; call again
    Continue,
    /// Nothing is available now; wait to be resumed
    Pause,
    /// The body is finished
    Complete,
    /// The body cannot be produced; fail the request
    Abort,
}

/// Result of [`RequestSource::on_send_data`]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SendResult {
    /// What to do next
    pub status: SendStatus,
    /// Bytes written to the buffer. Only meaningful (and never zero) for [`SendStatus::Continue`].
    pub size: usize,
}

impl SendResult {
    /// Body finished
    pub const COMPLETE: Self = Self {
        status: SendStatus::Complete,
        size: 0,
    };
    /// No data ready
    pub const PAUSE: Self = Self {
        status: SendStatus::Pause,
        size: 0,
    };
    /// Give up
    pub const ABORT: Self = Self {
        status: SendStatus::Abort,
        size: 0,
    };

    /// `size` bytes were produced
    #[must_use]
    pub fn data(size: usize) -> Self {
        Self {
            status: SendStatus::Continue,
            size,
        }
    }
}

/// What a [`ResponseSink`] wants the connection to do with the rest of the response
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReceiveStatus {
    /// Keep going
    Success,
    /// Stop receiving and fail the request
    Abort,
}

/// Produces the request headers and body. Called from the connection's I/O context.
pub trait RequestSource: Send {
    /// Additional request header lines, in `Name: value` form
    fn header_lines(&mut self) -> Vec<String>;

    /// Fills `buf` with the next part of the body
    fn on_send_data(&mut self, buf: &mut [u8]) -> SendResult;
}

/// Consumes the response. Called from the connection's I/O context.
///
/// The connection calls [`on_receive_response_code`](Self::on_receive_response_code) once, then
/// any number of header lines and data chunks, then
/// [`on_response_finished`](Self::on_response_finished) exactly once.
pub trait ResponseSink: Send {
    /// The HTTP status code. Returns false to refuse the response.
    fn on_receive_response_code(&mut self, code: i32) -> bool;

    /// One response header line. Returns false to refuse the response.
    fn on_receive_header_line(&mut self, line: &str) -> bool;

    /// A chunk of the response body
    fn on_receive_data(&mut self, data: &[u8]) -> ReceiveStatus;

    /// The request has ended
    fn on_response_finished(&mut self, status: FinishedStatus);
}

/// Everything the connection needs to run one request
pub struct RequestConfig {
    /// Identifier, for logging and correlation
    pub id: RequestId,
    /// What the request is for; also selects the method
    pub kind: RequestKind,
    /// Absolute URL
    pub url: String,
    /// Request headers and body
    pub source: Box<dyn RequestSource>,
    /// Response handling
    pub sink: Box<dyn ResponseSink>,
    /// Give up if the response has not started within this time
    pub connection_timeout: Option<Duration>,
    /// Give up if the whole exchange has not finished within this time
    pub transfer_timeout: Option<Duration>,
    /// Give up if no bytes move in either direction for this long
    pub activity_timeout: Option<Duration>,
}

impl fmt::Debug for RequestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestConfig")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("url", &self.url)
            .field("connection_timeout", &self.connection_timeout)
            .field("transfer_timeout", &self.transfer_timeout)
            .field("activity_timeout", &self.activity_timeout)
            .finish_non_exhaustive()
    }
}

/// A request that the connection has accepted
pub trait RequestHandle: Send + Sync {
    /// The identifier given in the [`RequestConfig`]
    fn id(&self) -> &RequestId;

    /// Asks the connection to abandon the request. The sink is still told how it finished.
    fn cancel(&self);
}

/// The HTTP/2 connection. This crate does not implement one; the embedding application
/// supplies it.
///
/// Implementations call the request's source and sink from their own I/O context, and must
/// eventually call [`ResponseSink::on_response_finished`] exactly once for every request they
/// accepted, including those cut short by [`disconnect`](Self::disconnect).
pub trait Connection: Send + Sync {
    /// Starts a request. Returns `None` if the request could not be started.
    fn create_and_send_request(&self, config: RequestConfig) -> Option<Arc<dyn RequestHandle>>;

    /// Tears down the connection and every request on it
    fn disconnect(&self);
}

/// A body-less request source, used by the downchannel and ping.
#[derive(Debug, Clone)]
pub struct EmptySource {
    headers: Vec<String>,
}

impl EmptySource {
    /// Constructor
    #[must_use]
    pub fn new(headers: Vec<String>) -> Self {
        Self { headers }
    }
}

impl RequestSource for EmptySource {
    fn header_lines(&mut self) -> Vec<String> {
        self.headers.clone()
    }

    fn on_send_data(&mut self, _buf: &mut [u8]) -> SendResult {
        SendResult::COMPLETE
    }
}

/// Formats the `Authorization` header line for a token
#[must_use]
pub fn authorization_header(token: &str) -> String {
    format!("Authorization: Bearer {token}")
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::{
        authorization_header, EmptySource, RequestId, RequestKind, RequestMethod,
        RequestSource as _, SendResult,
    };
    use pretty_assertions::assert_eq;

    #[test]
    fn methods() {
        assert_eq!(RequestKind::Downchannel.method(), RequestMethod::Get);
        assert_eq!(RequestKind::Ping.method(), RequestMethod::Get);
        assert_eq!(RequestKind::Event.method(), RequestMethod::Post);
        assert_eq!(RequestMethod::Post.to_string(), "POST");
    }

    #[test]
    fn ids_are_unique_and_labelled() {
        let a = RequestId::next(RequestKind::Event);
        let b = RequestId::next(RequestKind::Event);
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("event-"));
        assert!(RequestId::next(RequestKind::Ping).to_string().starts_with("ping-"));
    }

    #[test]
    fn empty_source() {
        let mut src = EmptySource::new(vec![authorization_header("T0KEN")]);
        assert_eq!(src.header_lines(), ["Authorization: Bearer T0KEN"]);
        let mut buf = [0u8; 16];
        assert_eq!(src.on_send_data(&mut buf), SendResult::COMPLETE);
    }
}
