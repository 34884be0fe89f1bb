//! The transport task: all connection state lives here
// (c) 2025 Ross Younger

use std::{
    collections::HashMap,
    ops::ControlFlow,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use human_repr::HumanDuration as _;
use tokio::{
    sync::{mpsc, watch},
    time::Instant,
};
use tracing::{debug, error, info, trace, warn};

use super::{
    admission::AdmissionQueue,
    handle::{Command, StreamEvent},
    handler::StreamHandler,
    watchdog::InactivityWatchdog,
    AuthObserver, AuthState, ChangedReason, Collaborators, PostConnect, PostConnectHandle,
    TransportObserver, TransportState,
};
use crate::{
    config::Configuration,
    message::{map_message_status, MessageCompletion, MessageRequest, MessageStatus},
    mime::MimeEncoder,
    stream::{
        authorization_header, EmptySource, FinishedStatus, MimeRequestSource,
        MimeResponseDecoder, RequestConfig, RequestHandle, RequestId, RequestKind,
    },
    util::{Registry, RetryTimer},
};

fn is_success_code(code: i32) -> bool {
    (200..300).contains(&code)
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Forwards credential changes into the mailbox
struct AuthBridge {
    commands: mpsc::WeakUnboundedSender<Command>,
}

impl AuthObserver for AuthBridge {
    fn on_auth_state_change(&self, state: AuthState) {
        if let Some(tx) = self.commands.upgrade() {
            let _ = tx.send(Command::Auth(state));
        }
    }
}

/// The downchannel or the ping
struct ActiveRequest {
    id: RequestId,
    handle: Arc<dyn RequestHandle>,
    /// The credential the request was sent with
    token: String,
}

struct InFlightEvent {
    completion: MessageCompletion,
    token: String,
}

pub(super) struct TransportActor {
    config: Configuration,
    collab: Collaborators,
    commands: mpsc::UnboundedReceiver<Command>,
    weak_tx: mpsc::WeakUnboundedSender<Command>,
    state_tx: watch::Sender<TransportState>,
    done_tx: watch::Sender<bool>,
    peak: Arc<AtomicUsize>,

    observers: Registry<dyn TransportObserver>,
    auth_observer: Option<Arc<dyn AuthObserver>>,
    auth_state: AuthState,
    /// Connection attempt counter, so late calls from an old post-connect handshake are ignored
    attempt: u64,
    post_connect: Option<Box<dyn PostConnect>>,

    downchannel: Option<ActiveRequest>,
    ping: Option<ActiveRequest>,
    /// A ping was wanted while the credential was being renewed
    ping_deferred: bool,
    events: HashMap<RequestId, InFlightEvent>,
    queue: AdmissionQueue<MessageRequest>,

    watchdog: InactivityWatchdog,
    backoff: RetryTimer,
    retry_at: Option<Instant>,
    retry_attempt: u32,
}

impl TransportActor {
    pub(super) fn new(
        config: Configuration,
        collab: Collaborators,
        commands: mpsc::UnboundedReceiver<Command>,
        weak_tx: mpsc::WeakUnboundedSender<Command>,
        state_tx: watch::Sender<TransportState>,
        done_tx: watch::Sender<bool>,
        peak: Arc<AtomicUsize>,
    ) -> Self {
        let (backoff_min, backoff_max) = config.reconnect_backoff();
        Self {
            queue: AdmissionQueue::new(config.max_post_streams()),
            watchdog: InactivityWatchdog::new(config.inactivity_timeout_duration()),
            backoff: RetryTimer::new(backoff_min, backoff_max),
            config,
            collab,
            commands,
            weak_tx,
            state_tx,
            done_tx,
            peak,
            observers: Registry::default(),
            auth_observer: None,
            auth_state: AuthState::default(),
            attempt: 0,
            post_connect: None,
            downchannel: None,
            ping: None,
            ping_deferred: false,
            events: HashMap::new(),
            retry_at: None,
            retry_attempt: 0,
        }
    }

    pub(super) async fn run(mut self) {
        debug!("started");
        loop {
            let watchdog = self.watchdog.deadline();
            let retry = self.retry_at;
            tokio::select! {
                biased;
                cmd = self.commands.recv() => {
                    let Some(cmd) = cmd else {
                        debug!("every handle has been dropped");
                        break;
                    };
                    if self.handle_command(cmd).is_break() {
                        break;
                    }
                }
                () = sleep_until_opt(watchdog) => self.on_inactivity(),
                () = sleep_until_opt(retry) => self.on_retry_timer(),
            }
        }
        let done = self.finish();
        info!("transport stopped");
        let _ = done.send_replace(true);
    }

    /// Tears down, then completes anything still in the mailbox.
    /// Everything but the completion signal is dropped on return.
    fn finish(mut self) -> watch::Sender<bool> {
        self.teardown(ChangedReason::ClientRequest);
        self.commands.close();
        while let Ok(cmd) = self.commands.try_recv() {
            match cmd {
                Command::Send(message) | Command::SendPostConnect(_, message) => {
                    message.complete(MessageStatus::NotConnected);
                }
                other => trace!(?other, "discarded after shutdown"),
            }
        }
        self.done_tx
    }

    fn handle_command(&mut self, cmd: Command) -> ControlFlow<()> {
        match cmd {
            Command::Connect => self.connect(),
            Command::Disconnect => self.teardown(ChangedReason::ClientRequest),
            Command::Shutdown => {
                debug!("shutdown requested");
                return ControlFlow::Break(());
            }
            Command::Send(message) => self.send(message),
            Command::SendPostConnect(attempt, message) => self.send_post_connect(attempt, message),
            Command::PostConnected(attempt) => self.post_connected(attempt),
            Command::PostConnectFailed(attempt) => self.post_connect_failed(attempt),
            Command::AddObserver(id, observer) => self.observers.insert(id, observer),
            Command::RemoveObserver(id) => {
                if !self.observers.remove(id) {
                    debug!(%id, "remove_observer: not registered");
                }
            }
            Command::Auth(state) => self.auth_changed(state),
            Command::Stream(id, event) => self.stream_event(&id, event),
        }
        ControlFlow::Continue(())
    }

    // STATE //////////////////////////////////////////////////////////////////////

    fn state(&self) -> TransportState {
        *self.state_tx.borrow()
    }

    fn is_active(&self) -> bool {
        matches!(
            self.state(),
            TransportState::PostConnecting | TransportState::Connected
        )
    }

    fn set_state(&mut self, next: TransportState) {
        let current = self.state();
        if current == next {
            return;
        }
        if !current.can_transition_to(next) {
            error!(%current, %next, "refusing invalid state transition");
            return;
        }
        debug!(from = %current, to = %next, "state change");
        let _ = self.state_tx.send_replace(next);
    }

    /// The current credential, if it is refreshed and non-empty
    fn usable_token(&self) -> Option<String> {
        if self.auth_state != AuthState::Refreshed {
            return None;
        }
        let token = self.collab.auth.auth_token();
        (!token.is_empty()).then_some(token)
    }

    fn handler(&self, id: &RequestId, consume: bool) -> Box<MimeResponseDecoder<StreamHandler>> {
        let consumer = consume.then(|| self.collab.consumer.clone());
        Box::new(MimeResponseDecoder::new(StreamHandler::new(
            id.clone(),
            self.weak_tx.clone(),
            consumer,
            self.config.max_exception_body,
        )))
    }

    // CONNECTING ////////////////////////////////////////////////////////////////

    fn connect(&mut self) {
        if self.state() != TransportState::Disconnected {
            debug!(state = %self.state(), "connect: already under way");
            return;
        }
        self.attempt += 1;
        self.retry_attempt = 0;
        self.set_state(TransportState::Authorizing);
        let bridge: Arc<dyn AuthObserver> = Arc::new(AuthBridge {
            commands: self.weak_tx.clone(),
        });
        self.auth_observer = Some(bridge.clone());
        self.collab.auth.add_auth_observer(bridge);
    }

    fn auth_changed(&mut self, state: AuthState) {
        if self.auth_observer.is_none() {
            trace!(%state, "credential change while disconnected ignored");
            return;
        }
        debug!(%state, "credential state");
        self.auth_state = state;
        match state {
            AuthState::Refreshed => {
                if self.state() == TransportState::Authorizing {
                    self.open_downchannel();
                } else if self.is_active() {
                    if std::mem::take(&mut self.ping_deferred) {
                        self.send_ping();
                    }
                    self.admit();
                }
            }
            AuthState::UnrecoverableError => {
                error!("credential is permanently unavailable");
                self.teardown(ChangedReason::InvalidAuth);
            }
            AuthState::Uninitialized | AuthState::Expired => (),
        }
    }

    fn open_downchannel(&mut self) {
        let Some(token) = self.usable_token() else {
            debug!("waiting for a refreshed credential");
            self.set_state(TransportState::Authorizing);
            return;
        };
        self.set_state(TransportState::Connecting);

        let id = RequestId::next(RequestKind::Downchannel);
        let request = RequestConfig {
            id: id.clone(),
            kind: RequestKind::Downchannel,
            url: self.config.downchannel_url(),
            source: Box::new(EmptySource::new(vec![authorization_header(&token)])),
            sink: self.handler(&id, true),
            connection_timeout: Some(self.config.connection_timeout_duration()),
            transfer_timeout: None,
            activity_timeout: None,
        };
        debug!(%id, url = %request.url, "opening downchannel");
        match self.collab.connection.create_and_send_request(request) {
            Some(handle) => self.downchannel = Some(ActiveRequest { id, handle, token }),
            None => {
                warn!("connection refused the downchannel request");
                self.schedule_retry();
            }
        }
    }

    fn schedule_retry(&mut self) {
        let delay = self.backoff.delay(self.retry_attempt);
        self.retry_attempt = self.retry_attempt.saturating_add(1);
        info!(
            attempt = self.retry_attempt,
            "downchannel not established; retrying in {}",
            delay.human_duration()
        );
        self.retry_at = Some(Instant::now() + delay);
    }

    fn on_retry_timer(&mut self) {
        self.retry_at = None;
        if self.state() == TransportState::Connecting {
            self.open_downchannel();
        }
    }

    fn downchannel_event(&mut self, event: &StreamEvent) {
        match *event {
            StreamEvent::ResponseCode(code) if is_success_code(code) => {
                if self.state() == TransportState::Connecting {
                    info!(code, "downchannel established");
                    self.retry_attempt = 0;
                    self.set_state(TransportState::PostConnecting);
                    self.start_post_connect();
                }
            }
            StreamEvent::ResponseCode(code) => {
                warn!(code, "downchannel refused");
                if code == 403 {
                    if let Some(dc) = &self.downchannel {
                        self.collab.auth.on_auth_failure(&dc.token);
                    }
                }
            }
            StreamEvent::Activity => (),
            StreamEvent::Finished { status, code, .. } => {
                self.downchannel = None;
                debug!(%status, ?code, state = %self.state(), "downchannel finished");
                match self.state() {
                    TransportState::Connecting => self.schedule_retry(),
                    TransportState::PostConnecting | TransportState::Connected => {
                        if status == FinishedStatus::Complete {
                            self.teardown(ChangedReason::ServerSideDisconnect);
                        } else {
                            self.teardown(ChangedReason::InternalError);
                        }
                    }
                    _ => (),
                }
            }
        }
    }

    fn start_post_connect(&mut self) {
        let Some(mut post_connect) = self.collab.post_connect.create_post_connect() else {
            warn!("no post-connect handshake available");
            self.teardown(ChangedReason::PostConnectFailed);
            return;
        };
        let handle = PostConnectHandle::new(self.weak_tx.clone(), self.attempt);
        if post_connect.do_post_connect(handle) {
            self.post_connect = Some(post_connect);
        } else {
            warn!("post-connect handshake refused to start");
            self.teardown(ChangedReason::PostConnectFailed);
        }
    }

    fn post_connected(&mut self, attempt: u64) {
        if attempt != self.attempt || self.state() != TransportState::PostConnecting {
            debug!(attempt, "stale post-connect completion ignored");
            return;
        }
        self.post_connect = None;
        self.set_state(TransportState::Connected);
        self.watchdog.arm();
        info!("connected");
        for observer in self.observers.snapshot() {
            observer.on_connected();
        }
        self.admit();
    }

    fn post_connect_failed(&mut self, attempt: u64) {
        if attempt != self.attempt || self.state() != TransportState::PostConnecting {
            debug!(attempt, "stale post-connect failure ignored");
            return;
        }
        warn!("post-connect handshake failed");
        self.teardown(ChangedReason::PostConnectFailed);
    }

    // EVENTS ////////////////////////////////////////////////////////////////////

    fn send(&mut self, message: MessageRequest) {
        match self.state() {
            TransportState::Disconnected | TransportState::Disconnecting => {
                debug!("not connected; message rejected");
                message.complete(MessageStatus::NotConnected);
            }
            _ => {
                self.queue.push(message);
                trace!(queued = self.queue.queued(), "message queued");
                self.admit();
            }
        }
    }

    fn send_post_connect(&mut self, attempt: u64, message: MessageRequest) {
        if attempt == self.attempt && self.is_active() {
            self.queue.push_privileged(message);
            self.admit();
        } else {
            debug!(attempt, "post-connect message for a finished attempt rejected");
            message.complete(MessageStatus::NotConnected);
        }
    }

    /// Starts as many queued messages as the stream budget allows
    fn admit(&mut self) {
        if !self.is_active() {
            return;
        }
        if self.auth_state != AuthState::Refreshed {
            trace!(queued = self.queue.queued(), "credential being renewed; holding messages");
            return;
        }
        let general = self.state() == TransportState::Connected;
        while let Some(message) = self.queue.pop_admissible(general) {
            self.start_event(message);
        }
        trace!(
            in_flight = self.queue.in_flight(),
            queued = self.queue.queued(),
            "admission"
        );
        let _ = self.peak.fetch_max(self.queue.peak(), Ordering::Relaxed);
    }

    fn start_event(&mut self, message: MessageRequest) {
        let (body, completion) = message.into_parts();
        let Some(token) = self.usable_token() else {
            warn!("no credential for event");
            self.queue.release();
            completion.complete(MessageStatus::InvalidAuth);
            return;
        };
        let id = RequestId::next(RequestKind::Event);
        let url = self.config.event_url(body.uri_path_extension.as_deref());
        trace!(%id, json = %body.json, attachments = body.attachments.len(), "sending event");
        let traced = self.collab.event_tracer.as_ref().map(|_| body.json.clone());
        let encoder = MimeEncoder::new(body.json, body.attachments);
        let request = RequestConfig {
            id: id.clone(),
            kind: RequestKind::Event,
            url,
            source: Box::new(MimeRequestSource::new(encoder, token.clone())),
            sink: self.handler(&id, true),
            connection_timeout: None,
            transfer_timeout: None,
            activity_timeout: Some(self.config.stream_progress_timeout_duration()),
        };
        if self
            .collab
            .connection
            .create_and_send_request(request)
            .is_some()
        {
            if let (Some(tracer), Some(json)) = (&self.collab.event_tracer, traced) {
                tracer.trace_event(&json);
            }
            let _ = self
                .events
                .insert(id, InFlightEvent { completion, token });
        } else {
            warn!(%id, "connection refused the event request");
            self.queue.release();
            completion.complete(MessageStatus::InternalError);
        }
    }

    fn event_finished(
        &mut self,
        id: &RequestId,
        status: FinishedStatus,
        code: Option<i32>,
        exception: Option<&str>,
    ) {
        let Some(event) = self.events.remove(id) else {
            return;
        };
        self.queue.release();
        if code == Some(403) {
            self.collab.auth.on_auth_failure(&event.token);
        }
        if code != Some(200) {
            if let Some(text) = exception {
                event.completion.exception_received(text);
            }
        }
        let outcome = map_message_status(code, status);
        debug!(%id, %status, ?code, %outcome, "event finished");
        event.completion.complete(outcome);

        if status == FinishedStatus::Timeout {
            debug!("event stalled; checking the connection");
            self.send_ping();
        }
        self.admit();
    }

    // LIVENESS //////////////////////////////////////////////////////////////////

    fn send_ping(&mut self) {
        if self.ping.is_some() || !self.is_active() {
            return;
        }
        if self.auth_state != AuthState::Refreshed {
            debug!(credential = %self.auth_state, "ping put off until the credential is renewed");
            self.ping_deferred = true;
            return;
        }
        self.ping_deferred = false;
        let Some(token) = self.usable_token() else {
            warn!("no credential for ping");
            self.teardown(ChangedReason::InvalidAuth);
            return;
        };
        let id = RequestId::next(RequestKind::Ping);
        let request = RequestConfig {
            id: id.clone(),
            kind: RequestKind::Ping,
            url: self.config.ping_url(),
            source: Box::new(EmptySource::new(vec![authorization_header(&token)])),
            sink: self.handler(&id, false),
            connection_timeout: None,
            transfer_timeout: Some(self.config.ping_timeout_duration()),
            activity_timeout: None,
        };
        debug!(%id, "sending ping");
        match self.collab.connection.create_and_send_request(request) {
            Some(handle) => self.ping = Some(ActiveRequest { id, handle, token }),
            None => {
                warn!("connection refused the ping request");
                self.teardown(ChangedReason::PingFailed);
            }
        }
    }

    fn ping_finished(&mut self, status: FinishedStatus, code: Option<i32>) {
        self.ping = None;
        match (status, code) {
            (FinishedStatus::Complete, Some(code)) if is_success_code(code) => {
                trace!(code, "ping answered");
                self.watchdog.record_activity();
            }
            (FinishedStatus::Timeout, _) => {
                warn!("ping timed out");
                self.teardown(ChangedReason::PingTimedOut);
            }
            _ => {
                warn!(%status, ?code, "ping failed");
                self.teardown(ChangedReason::PingFailed);
            }
        }
    }

    fn on_inactivity(&mut self) {
        if self.state() != TransportState::Connected {
            self.watchdog.disarm();
            return;
        }
        if let Some(ping) = self.ping.take() {
            warn!(id = %ping.id, "still no answer to ping");
            ping.handle.cancel();
            self.teardown(ChangedReason::PingTimedOut);
            return;
        }
        debug!("connection idle");
        self.watchdog.record_activity();
        self.send_ping();
    }

    fn stream_event(&mut self, id: &RequestId, event: StreamEvent) {
        if event == StreamEvent::Activity {
            self.watchdog.record_activity();
        }
        if self.downchannel.as_ref().is_some_and(|r| r.id == *id) {
            self.downchannel_event(&event);
        } else if self.ping.as_ref().is_some_and(|r| r.id == *id) {
            if let StreamEvent::Finished { status, code, .. } = event {
                self.ping_finished(status, code);
            }
        } else if self.events.contains_key(id) {
            if let StreamEvent::Finished {
                status,
                code,
                exception,
            } = event
            {
                self.event_finished(id, status, code, exception.as_deref());
            }
        } else {
            trace!(%id, ?event, "event for a retired stream ignored");
        }
    }

    // TEARDOWN //////////////////////////////////////////////////////////////////

    /// Takes the transport to `Disconnected`, completing every outstanding message and
    /// telling the observers why
    fn teardown(&mut self, reason: ChangedReason) {
        let from = self.state();
        if matches!(
            from,
            TransportState::Disconnected | TransportState::Disconnecting
        ) {
            return;
        }
        info!(%reason, %from, "disconnecting");
        self.set_state(TransportState::Disconnecting);
        self.retry_at = None;
        self.watchdog.disarm();
        if let Some(observer) = self.auth_observer.take() {
            self.collab.auth.remove_auth_observer(&observer);
        }
        self.auth_state = AuthState::default();
        self.downchannel = None;
        self.ping = None;
        self.ping_deferred = false;
        self.collab.connection.disconnect();

        let in_flight = std::mem::take(&mut self.events);
        let queued = self.queue.drain();
        debug!(
            in_flight = in_flight.len(),
            queued = queued.len(),
            "completing outstanding messages"
        );
        for event in in_flight.into_values() {
            event.completion.complete(MessageStatus::Canceled);
        }
        for message in queued {
            message.complete(MessageStatus::NotConnected);
        }

        let observers = self.observers.snapshot();
        if reason == ChangedReason::ServerSideDisconnect {
            for observer in &observers {
                observer.on_server_side_disconnect();
            }
        }
        for observer in &observers {
            observer.on_disconnected(reason);
        }
        if let Some(mut post_connect) = self.post_connect.take() {
            post_connect.on_disconnect();
        }
        self.set_state(TransportState::Disconnected);
    }
}
