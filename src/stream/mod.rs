//! Contract between the transport and the HTTP/2 connection
// (c) 2025 Ross Younger
//!
//! The connection itself lives outside this crate. The transport describes each request with a
//! [`RequestConfig`]; the connection pulls the request body from its [`RequestSource`] and pushes
//! the response into its [`ResponseSink`], both from the connection's own I/O context, and
//! finally reports a [`FinishedStatus`].

mod request;
pub use request::{
    authorization_header, Connection, EmptySource, FinishedStatus, ReceiveStatus, RequestConfig,
    RequestHandle, RequestId, RequestKind, RequestMethod, RequestSource, ResponseSink, SendResult,
    SendStatus,
};

mod response;
pub use response::{MimeResponseDecoder, MimeResponseHandler};

mod source;
pub use source::MimeRequestSource;
