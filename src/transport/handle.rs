//! The public face of the transport
// (c) 2025 Ross Younger

use std::{
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use tokio::sync::{
    mpsc::{self, error::SendError},
    watch,
};
use tracing::{debug, trace_span, Instrument as _};

use super::{
    actor::TransportActor, AuthState, Collaborators, TransportError, TransportObserver,
    TransportState,
};
use crate::{
    config::Configuration,
    message::{MessageRequest, MessageStatus},
    stream::{FinishedStatus, RequestId},
    util::ObserverId,
};

/// Something that happened on a stream, reported by its response handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StreamEvent {
    /// The response code arrived
    ResponseCode(i32),
    /// Bytes arrived
    Activity,
    /// The request ended
    Finished {
        status: FinishedStatus,
        code: Option<i32>,
        /// Non-MIME body text, if any was received
        exception: Option<String>,
    },
}

/// The transport's mailbox
pub(crate) enum Command {
    Connect,
    Disconnect,
    Shutdown,
    Send(MessageRequest),
    /// A privileged message from the post-connect handshake of the given attempt
    SendPostConnect(u64, MessageRequest),
    PostConnected(u64),
    PostConnectFailed(u64),
    AddObserver(ObserverId, Arc<dyn TransportObserver>),
    RemoveObserver(ObserverId),
    Auth(AuthState),
    Stream(RequestId, StreamEvent),
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Connect => f.write_str("Connect"),
            Command::Disconnect => f.write_str("Disconnect"),
            Command::Shutdown => f.write_str("Shutdown"),
            Command::Send(m) => f.debug_tuple("Send").field(m).finish(),
            Command::SendPostConnect(a, m) => {
                f.debug_tuple("SendPostConnect").field(a).field(m).finish()
            }
            Command::PostConnected(a) => f.debug_tuple("PostConnected").field(a).finish(),
            Command::PostConnectFailed(a) => f.debug_tuple("PostConnectFailed").field(a).finish(),
            Command::AddObserver(id, _) => f.debug_tuple("AddObserver").field(id).finish(),
            Command::RemoveObserver(id) => f.debug_tuple("RemoveObserver").field(id).finish(),
            Command::Auth(s) => f.debug_tuple("Auth").field(s).finish(),
            Command::Stream(id, e) => f.debug_tuple("Stream").field(id).field(e).finish(),
        }
    }
}

/// A cheaply cloneable handle to a running transport.
///
/// Every method may be called from any thread; the work happens on the transport's own task.
/// The transport stops when [`shutdown`](Self::shutdown) is called or when the last handle is
/// dropped.
///
/// ```no_run
/// # use downchannel::{Configuration, Transport, transport::Collaborators};
/// # async fn doc(collaborators: Collaborators) -> anyhow::Result<()> {
/// let transport = Transport::create(Configuration::system_default(), collaborators)?;
/// transport.connect()?;
/// transport.send(downchannel::message::MessageRequest::new(r#"{"event":{}}"#));
/// transport.shutdown().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Transport {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<TransportState>,
    done: watch::Receiver<bool>,
    peak_in_flight: Arc<AtomicUsize>,
}

impl Transport {
    /// Validates the configuration and starts the transport task on the current tokio runtime.
    ///
    /// The transport starts out [`Disconnected`](TransportState::Disconnected).
    pub fn create(
        config: &Configuration,
        collaborators: Collaborators,
    ) -> Result<Self, TransportError> {
        config
            .validate()
            .map_err(|e| TransportError::InvalidConfiguration(format!("{e:#}")))?;
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| TransportError::NoRuntime)?;

        let (commands, mailbox) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(TransportState::Disconnected);
        let (done_tx, done) = watch::channel(false);
        let peak_in_flight = Arc::new(AtomicUsize::new(0));

        let actor = TransportActor::new(
            config.clone(),
            collaborators,
            mailbox,
            commands.downgrade(),
            state_tx,
            done_tx,
            peak_in_flight.clone(),
        );
        debug!(config = %config.format_summary(), "starting transport");
        drop(runtime.spawn(actor.run().instrument(trace_span!("transport"))));

        Ok(Self {
            commands,
            state,
            done,
            peak_in_flight,
        })
    }

    fn post(&self, command: Command) -> Result<(), TransportError> {
        self.commands
            .send(command)
            .map_err(|_| TransportError::ShutDown)
    }

    /// Starts connecting. Has no effect unless the transport is disconnected.
    ///
    /// Nothing is sent over the network until the [`AuthDelegate`](super::AuthDelegate) reports
    /// a refreshed credential.
    pub fn connect(&self) -> Result<(), TransportError> {
        self.post(Command::Connect)
    }

    /// Tears down the connection, reporting [`ClientRequest`](super::ChangedReason::ClientRequest).
    /// The transport may be connected again afterwards.
    pub fn disconnect(&self) -> Result<(), TransportError> {
        self.post(Command::Disconnect)
    }

    /// Tears down the connection and stops the transport for good.
    ///
    /// When this returns, every message handed to the transport has had its terminal status
    /// reported. Calling it again is harmless.
    pub async fn shutdown(&self) {
        let _ = self.post(Command::Shutdown);
        let mut done = self.done.clone();
        // An error means the task is gone, which is as finished as it gets
        let _ = done.wait_for(|finished| *finished).await;
    }

    /// Queues a message for sending.
    ///
    /// The outcome is always reported to the message's observers, even if the transport has
    /// already shut down.
    pub fn send(&self, message: MessageRequest) {
        if let Err(SendError(Command::Send(message))) = self.commands.send(Command::Send(message))
        {
            debug!("transport has shut down; message not sent");
            message.complete(MessageStatus::NotConnected);
        }
    }

    /// Registers an observer of connectivity changes
    pub fn add_observer(&self, observer: Arc<dyn TransportObserver>) -> ObserverId {
        let id = ObserverId::next();
        let _ = self.post(Command::AddObserver(id, observer));
        id
    }

    /// Removes an observer. Unknown identifiers are ignored.
    pub fn remove_observer(&self, id: ObserverId) {
        let _ = self.post(Command::RemoveObserver(id));
    }

    /// The current state
    #[must_use]
    pub fn state(&self) -> TransportState {
        *self.state.borrow()
    }

    /// Whether the transport is fully connected
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == TransportState::Connected
    }

    /// Waits until the transport reaches the given state.
    ///
    /// Only the latest state is observed, so a state that is passed through quickly
    /// (such as [`Disconnecting`](TransportState::Disconnecting)) may be missed.
    pub async fn wait_for_state(&self, wanted: TransportState) -> Result<(), TransportError> {
        let mut state = self.state.clone();
        state
            .wait_for(|s| *s == wanted)
            .await
            .map(|_| ())
            .map_err(|_| TransportError::ShutDown)
    }

    /// The largest number of event streams that have been open at once
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::Relaxed)
    }
}

/// The transport, as seen by a [`PostConnect`](super::PostConnect) handshake.
///
/// A handle belongs to one connection attempt. Once that attempt has ended, calls on it have
/// no effect (and messages sent through it complete as
/// [`NotConnected`](MessageStatus::NotConnected)).
#[derive(Debug, Clone)]
pub struct PostConnectHandle {
    commands: mpsc::WeakUnboundedSender<Command>,
    attempt: u64,
}

impl PostConnectHandle {
    pub(crate) fn new(commands: mpsc::WeakUnboundedSender<Command>, attempt: u64) -> Self {
        Self { commands, attempt }
    }

    fn post(&self, command: Command) -> Result<(), Command> {
        match self.commands.upgrade() {
            Some(tx) => tx.send(command).map_err(|SendError(c)| c),
            None => Err(command),
        }
    }

    /// Sends a message ahead of everything queued by the application, before the transport is
    /// connected
    pub fn send_post_connect_message(&self, message: MessageRequest) {
        if let Err(Command::SendPostConnect(_, message)) =
            self.post(Command::SendPostConnect(self.attempt, message))
        {
            message.complete(MessageStatus::NotConnected);
        }
    }

    /// The handshake succeeded; the transport becomes connected
    pub fn on_post_connected(&self) {
        let _ = self.post(Command::PostConnected(self.attempt));
    }

    /// The handshake failed; the transport disconnects
    pub fn on_post_connect_failed(&self) {
        let _ = self.post(Command::PostConnectFailed(self.attempt));
    }
}
