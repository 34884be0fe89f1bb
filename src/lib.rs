// (c) 2025 Ross Younger

#![allow(clippy::doc_markdown)]
//! `downchannel` is a client-side transport that multiplexes three kinds of HTTP/2 stream over a
//! single connection to a directive/event service:
//!
//! * one long-lived **downchannel**, on which the server pushes directives;
//! * at most one **ping** at a time, to detect a silently dead connection;
//! * a bounded pool of **event** streams, each carrying one outbound message.
//!
//! Request and response bodies are `multipart/related` MIME documents: a JSON part,
//! optionally followed by binary attachments.
//!
//! ## 📖 How it fits together
//!
//! ```text
//!  application ──send()──► Transport ──RequestConfig──► Connection (HTTP/2, external)
//!                            │  ▲                           │
//!                            │  └──── stream events ◄───────┤ ResponseSink (MimeResponseDecoder)
//!                            ▼                              ▼
//!                  MessageRequestObserver          MessageConsumer (directive JSON)
//! ```
//!
//! * [`mime`] holds the incremental multipart encoder and decoder.
//! * [`stream`] defines the contract with the HTTP/2 layer: request sources, response sinks,
//!   finished-status values, and the [`Connection`](stream::Connection) trait.
//! * [`message`] holds outbound messages, their attachments, and the mapping from
//!   (response code, finished-status) to [`MessageStatus`](message::MessageStatus).
//! * [`transport`] is the state machine. It runs as a single tokio task fed by a mailbox,
//!   so none of its state needs a lock.
//!
//! ## Connection lifecycle
//!
//! `DISCONNECTED → AUTHORIZING → CONNECTING → POST_CONNECTING → CONNECTED`, and from anywhere
//! through `DISCONNECTING` back to `DISCONNECTED`. Observers are told about the connection only
//! once authorization has succeeded, the downchannel has answered 2xx **and** the post-connect
//! handshake has signalled success.
//!
//! ## Configuration
//!
//! See [config] for the configuration mechanism and [`Configuration`] for the available fields.
//! The `downchannel` binary prints the resolved configuration.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub(crate) mod cli;
pub use cli::cli as main;

pub mod config;
pub use config::Configuration;

pub mod message;
pub mod mime;
pub mod stream;
pub mod transport;
pub use transport::{Transport, TransportError};

pub mod util;
